//! Separation error types
//!
//! Every failure in the pipeline surfaces as a [`SeparationError`]. Nothing is
//! retried: a failing decode, model load or accelerator call ends the run.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Point inside a single engine invocation where a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceStage {
    /// Host to device copy of the input window
    TransferIn,
    /// Executing the network on the bound stream
    Execute,
    /// Device to host copy of the stem window
    TransferOut,
    /// Status code outside the documented set
    Unknown,
}

impl InferenceStage {
    /// Status code reported across the native boundary for this stage
    pub fn code(&self) -> i32 {
        match self {
            Self::TransferIn => 1,
            Self::Execute => 2,
            Self::TransferOut => 3,
            Self::Unknown => -1,
        }
    }

    /// Map a non-zero native status code back to its stage
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::TransferIn,
            2 => Self::Execute,
            3 => Self::TransferOut,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for InferenceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TransferIn => "host-to-device transfer",
            Self::Execute => "execution",
            Self::TransferOut => "device-to-host transfer",
            Self::Unknown => "unknown stage",
        };
        f.write_str(name)
    }
}

/// Failure of one `process` call on an inference engine
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{stage} failed (code {code}): {detail}")]
pub struct InferenceError {
    pub stage: InferenceStage,
    pub code: i32,
    pub detail: String,
}

impl InferenceError {
    pub fn new(stage: InferenceStage, detail: impl Into<String>) -> Self {
        Self {
            stage,
            code: stage.code(),
            detail: detail.into(),
        }
    }

    /// Build from a raw native status code
    pub fn from_code(code: i32) -> Self {
        Self {
            stage: InferenceStage::from_code(code),
            code,
            detail: String::from("native engine reported failure"),
        }
    }
}

/// Errors that can occur during audio separation
#[derive(Error, Debug)]
pub enum SeparationError {
    #[error("Failed to read audio file: {path}")]
    AudioReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode audio: {0}")]
    Decode(String),

    #[error("Model not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error("Unsupported stem count {0}: expected 4 or 6 sources")]
    UnsupportedStemCount(usize),

    #[error("Inference failed on chunk {chunk}: {source}")]
    Inference {
        chunk: usize,
        #[source]
        source: InferenceError,
    },

    #[error("Output directory not writable: {path}")]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write stem file: {path}")]
    StemWriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SeparationError {
    /// True for failures that happened while a chunk was on the accelerator
    pub fn is_inference(&self) -> bool {
        matches!(self, Self::Inference { .. })
    }
}

pub type Result<T> = std::result::Result<T, SeparationError>;
