use std::fmt;

/// Failure category of a recoverable RHI call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ArgumentOutOfRange,
    RuntimeError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::ArgumentOutOfRange => f.write_str("argument out of range"),
            ErrorCode::RuntimeError => f.write_str("runtime error"),
        }
    }
}

/// Error returned by resource creation, uploads and submission.
///
/// Creation failures never leave a live pool entry behind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RhiError {
    pub code: ErrorCode,
    pub message: String,
}

impl RhiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ArgumentOutOfRange, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RuntimeError, message)
    }
}

#[cfg(feature = "vulkan")]
impl From<ash::vk::Result> for RhiError {
    fn from(value: ash::vk::Result) -> Self {
        Self::runtime(format!("vulkan call failed: {value}"))
    }
}

pub type RhiResult<T> = Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_and_message() {
        let err = RhiError::out_of_range("upload past the end of `vb`");
        assert_eq!(err.to_string(), "argument out of range: upload past the end of `vb`");
        assert_eq!(err.code, ErrorCode::ArgumentOutOfRange);
    }
}
