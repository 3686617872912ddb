//! CLI output: error mapping from domain errors to the stable CLI surface.

use crate::error::GenError;

/// Exit code for configuration problems, including a second instance.
pub const EXIT_CONFIGURATION: i32 = 2;

/// Map an error to the line printed on stderr.
pub fn map_error(e: &GenError) -> String {
    if e.is_configuration() {
        format!("genloop: {}", e)
    } else {
        format!("genloop: run ended with error: {}", e)
    }
}

/// Only configuration errors produce a non-zero exit.
pub fn exit_code(e: &GenError) -> i32 {
    if e.is_configuration() {
        EXIT_CONFIGURATION
    } else {
        0
    }
}
