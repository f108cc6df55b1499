//! Delegation of file encryption to the external single-instance helper.

pub mod helper;
pub mod queue;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use helper::{ExternalHelper, HelperError};
pub use queue::EncryptionQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CryptoOperation {
    Encrypt,
    Decrypt,
}

impl CryptoOperation {
    /// Command-line switch understood by the helper.
    pub fn flag(&self) -> &'static str {
        match self {
            CryptoOperation::Encrypt => "-c",
            CryptoOperation::Decrypt => "-d",
        }
    }
}

impl fmt::Display for CryptoOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoOperation::Encrypt => f.write_str("encrypt"),
            CryptoOperation::Decrypt => f.write_str("decrypt"),
        }
    }
}
