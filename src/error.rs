use thiserror::Error;

use crate::analyzer::image_prep::CaptureError;
use crate::analyzer::vision::AdvisorError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum WeldMasterError {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Advisor error: {0}")]
    Advisor(#[from] AdvisorError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Keychain error: {0}")]
    Keychain(String),
}

impl From<WeldMasterError> for String {
    fn from(err: WeldMasterError) -> Self {
        err.to_string()
    }
}
