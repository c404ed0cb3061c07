//! Inference engine backends
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  Separator (demix-core)                  │
//! │  • normalization, chunk schedule, overlap-add           │
//! └─────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │              InferenceEngine (trait)                     │
//! │  • shape() - window length and source count             │
//! │  • process() - one window in, all stems out             │
//! └─────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┴──────────────┐
//!               ▼                              ▼
//!     ┌─────────────────┐            ┌─────────────────┐
//!     │   OnnxEngine    │            │  BridgeEngine   │
//!     │  (ort session)  │            │ (native C ABI)  │
//!     └─────────────────┘            └─────────────────┘
//! ```

mod bridge;
mod onnx;

pub use bridge::BridgeEngine;
pub use onnx::OnnxEngine;

use demix_core::{InferenceEngine, Result, SeparationError};

use crate::config::{BackendType, SeparationConfig};

/// Load the configured backend
pub fn open_engine(config: &SeparationConfig) -> Result<Box<dyn InferenceEngine>> {
    config.check_backend()?;

    log::info!("Opening {} engine", config.backend.display_name());
    match config.backend {
        BackendType::OnnxRuntime => Ok(Box::new(OnnxEngine::load(config)?)),
        BackendType::NativeBridge => {
            let library = config.bridge_library.as_deref().ok_or_else(|| {
                SeparationError::InvalidConfig(String::from("bridge_library is not set"))
            })?;
            Ok(Box::new(BridgeEngine::load(library, &config.model_path)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_bridge_without_library_is_rejected() {
        let config = SeparationConfig {
            backend: BackendType::NativeBridge,
            ..Default::default()
        };
        assert!(matches!(
            open_engine(&config),
            Err(SeparationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_missing_model_for_each_backend() {
        for backend in [BackendType::OnnxRuntime, BackendType::NativeBridge] {
            let config = SeparationConfig {
                backend,
                model_path: PathBuf::from("/nonexistent/model.onnx"),
                bridge_library: Some(PathBuf::from("libdemix_trt.so")),
                ..Default::default()
            };
            assert!(matches!(
                open_engine(&config),
                Err(SeparationError::ModelNotFound(_))
            ));
        }
    }
}
