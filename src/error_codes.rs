use std::fmt;

use anyhow::Error;
use serde::Serialize;
use serde_json::Value;

pub const INVALID_BLOCK_COUNT: &str = "INVALID_BLOCK_COUNT";
pub const INVALID_POINT: &str = "INVALID_POINT";
pub const INVALID_PAINT: &str = "INVALID_PAINT";
pub const INVALID_CANVAS: &str = "INVALID_CANVAS";
pub const IMAGE_DECODE_FAILED: &str = "IMAGE_DECODE_FAILED";
pub const IMAGE_LOAD_TIMEOUT: &str = "IMAGE_LOAD_TIMEOUT";
pub const SCRIPT_INVALID: &str = "SCRIPT_INVALID";
pub const EXPORT_FAILED: &str = "EXPORT_FAILED";
pub const TEXTURE_TOO_LARGE: &str = "TEXTURE_TOO_LARGE";
pub const RUNTIME_ERROR: &str = "RUNTIME_ERROR";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodedErrorKind {
    Usage,
    Runtime,
}

#[derive(Debug, Clone)]
pub struct CodedError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
    pub kind: CodedErrorKind,
}

impl CodedError {
    pub fn usage(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Usage,
        }
    }

    pub fn runtime(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Runtime,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn exit_code(&self) -> u8 {
        match self.kind {
            CodedErrorKind::Usage => 2,
            CodedErrorKind::Runtime => 1,
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code.to_owned(),
                message: self.message.clone(),
                details: self.details.clone(),
            },
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
}
