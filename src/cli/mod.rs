pub mod actions;
pub mod commands;
pub mod dispatch;
pub mod telemetry;

use anyhow::Result;

use self::actions::Action;

/// Parse the command line, bring up logging, and resolve the action to run.
///
/// # Errors
///
/// Returns an error if telemetry initialization or action dispatch fails
pub fn start() -> Result<Action> {
    let matches = commands::new().get_matches();

    let verbosity = matches
        .get_one::<u8>(commands::ARG_VERBOSITY)
        .copied()
        .unwrap_or(0);
    telemetry::init(verbosity)?;

    dispatch::handler(&matches)
}
