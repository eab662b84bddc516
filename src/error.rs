use thiserror::Error;

/// Failures the cluster manager needs to tell apart.
///
/// They travel inside `anyhow::Error` and are recovered at the entry point to
/// pick the process exit status.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("missing {0} parameter")]
    MissingInput(String),

    #[error("invalid {name} parameter '{value}': {reason}")]
    InvalidInput {
        name: String,
        value: String,
        reason: String,
    },

    #[error("volume {name} already exists in pool {pool}")]
    AlreadyExists { name: String, pool: String },

    #[error("volume {0} could not be found")]
    NotFound(String),

    #[error("more than one device matches volume {name}: {}", .matches.join(", "))]
    AmbiguousDevice { name: String, matches: Vec<String> },

    #[error("no block device available for volume {0}")]
    DeviceUnavailable(String),

    #[error("command failed: {command} ({status})")]
    CommandFailed { command: String, status: String },

    #[error("no return code in remote output from {node}")]
    ReturnCode { node: String },

    #[error("remote command on {node} exited with return code {code}")]
    NonZeroReturnCode { node: String, code: i32 },

    #[error("no value for {node} in remote output")]
    MissingIdentifier { node: String },
}

pub const EXIT_DEVICE_UNAVAILABLE: u8 = 1;
pub const EXIT_REMOTE_RETURN_CODE: u8 = 2;
pub const EXIT_REMOTE_IDENTIFIER: u8 = 3;
pub const EXIT_FAILURE: u8 = 4;

impl DriverError {
    pub fn exit_code(&self) -> u8 {
        match self {
            DriverError::DeviceUnavailable(_) => EXIT_DEVICE_UNAVAILABLE,
            DriverError::ReturnCode { .. } | DriverError::NonZeroReturnCode { .. } => {
                EXIT_REMOTE_RETURN_CODE
            }
            DriverError::MissingIdentifier { .. } => EXIT_REMOTE_IDENTIFIER,
            _ => EXIT_FAILURE,
        }
    }
}

/// Exit status for any error chain, classified or not.
pub fn exit_code_of(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|e| e.downcast_ref::<DriverError>())
        .map(DriverError::exit_code)
        .unwrap_or(EXIT_FAILURE)
}
