//! Error types and result definitions for the tuyaface crate.
//! Includes TinyTuya-compatible error codes and conversion from standard IO/JSON errors.

use thiserror::Error;

/// Represents all possible errors that can occur when communicating with a Tuya device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TuyaError {
    /// Standard IO error (network, write failure, etc.)
    #[error("IO error: {0}")]
    Io(String),

    /// JSON serialization or deserialization error
    #[error("JSON error: {0}")]
    Json(String),

    /// Failed to decrypt a message from the device (wrong key or version)
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Failed to encrypt a message for the device, or the key is not 16 bytes
    #[error("Encryption failed")]
    EncryptionFailed,

    /// The payload passed in or received was malformed or unexpected
    #[error("Invalid payload")]
    InvalidPayload,

    /// Connecting or writing timed out
    #[error("Timeout waiting for device")]
    Timeout,

    /// CRC check failed for the received message
    #[error("CRC mismatch")]
    CrcMismatch,

    /// TCP connection could not be established
    #[error("Socket connection failed")]
    ConnectionFailed,

    /// The frame did not start with the prefix or end with the suffix magic
    #[error("Invalid header")]
    InvalidHeader,

    /// Failed to decode a frame
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// No open socket to the device
    #[error("Device offline")]
    Offline,

    /// The configured protocol version is not one of "3.1" or "3.3"
    #[error("Unsupported protocol version '{0}'")]
    UnsupportedVersion(String),
}

/// A specialized Result type for Tuya operations.
pub type Result<T> = std::result::Result<T, TuyaError>;

impl From<std::io::Error> for TuyaError {
    fn from(err: std::io::Error) -> Self {
        TuyaError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TuyaError {
    fn from(err: serde_json::Error) -> Self {
        TuyaError::Json(err.to_string())
    }
}

impl TuyaError {
    pub fn code(&self) -> u32 {
        match self {
            TuyaError::Io(_) => ERR_CONNECT,
            TuyaError::Json(_) => ERR_JSON,
            TuyaError::DecryptionFailed => ERR_KEY_OR_VER,
            TuyaError::EncryptionFailed => ERR_KEY_OR_VER,
            TuyaError::InvalidPayload => ERR_PARAMS,
            TuyaError::Timeout => ERR_TIMEOUT,
            TuyaError::CrcMismatch => ERR_KEY_OR_VER,
            TuyaError::ConnectionFailed => ERR_CONNECT,
            TuyaError::InvalidHeader => ERR_PAYLOAD,
            TuyaError::DecodeError(_) => ERR_PAYLOAD,
            TuyaError::Offline => ERR_OFFLINE,
            TuyaError::UnsupportedVersion(_) => ERR_KEY_OR_VER,
        }
    }
}

// TinyTuya Error Response Codes
define_error_codes! {
    ERR_SUCCESS = 0 => "Connection Successful",
    ERR_JSON = 900 => "Invalid JSON Response from Device",
    ERR_CONNECT = 901 => "Network Error: Unable to Connect",
    ERR_TIMEOUT = 902 => "Timeout Waiting for Device",
    ERR_RANGE = 903 => "Specified Value Out of Range",
    ERR_PAYLOAD = 904 => "Unexpected Payload from Device",
    ERR_OFFLINE = 905 => "Network Error: Device Unreachable",
    ERR_STATE = 906 => "Device in Unknown State",
    ERR_FUNCTION = 907 => "Function Not Supported by Device",
    ERR_PARAMS = 912 => "Missing Function Parameters",
    ERR_KEY_OR_VER = 914 => "Check device key or version",
}
