//! Configuration for demix
//!
//! Configuration is stored as YAML in the platform config directory.
//! Default location: ~/.config/demix/config.yaml
//!
//! The resolved [`SeparationConfig`] is built once before a run (file, then
//! command-line overrides) and is not changed while tracks are processed.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Chunk length used when a model declares a dynamic time axis
///
/// HTDemucs segment (7.8 s) at 44.1 kHz.
pub const DEFAULT_DYNAMIC_CHUNK_FRAMES: usize = 343_980;

/// Resolved separation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparationConfig {
    /// Compiled model artifact (ONNX file or native engine plan)
    pub model_path: PathBuf,

    /// Directory stem files are written to
    pub output_dir: PathBuf,

    /// Debug switch: stop after the first chunk
    pub single_chunk: bool,

    /// Which engine backend to load the model with
    pub backend: BackendType,

    /// Shared library exposing the native engine ABI (native bridge only)
    pub bridge_library: Option<PathBuf>,

    /// ONNX Runtime execution provider
    pub execution_provider: ExecutionProvider,

    /// Accelerator ordinal for GPU execution providers
    pub device_id: i32,

    /// Fallback chunk length for models with a dynamic time axis
    pub dynamic_chunk_frames: usize,

    /// Stem WAV sample format
    pub sample_format: SampleFormat,
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            output_dir: PathBuf::from("separated"),
            single_chunk: false,
            backend: BackendType::OnnxRuntime,
            bridge_library: None,
            execution_provider: ExecutionProvider::Cpu,
            device_id: 0,
            dynamic_chunk_frames: DEFAULT_DYNAMIC_CHUNK_FRAMES,
            sample_format: SampleFormat::Float32,
        }
    }
}

impl SeparationConfig {
    /// Validate and clamp values
    pub fn validate(&mut self) {
        // At least one full second per window; shorter windows give the model no context
        if self.dynamic_chunk_frames < 44_100 {
            log::warn!(
                "dynamic_chunk_frames {} too small, using {}",
                self.dynamic_chunk_frames,
                DEFAULT_DYNAMIC_CHUNK_FRAMES
            );
            self.dynamic_chunk_frames = DEFAULT_DYNAMIC_CHUNK_FRAMES;
        }
        self.device_id = self.device_id.max(0);
    }

    /// Check that the selected backend has everything it needs
    pub fn check_backend(&self) -> demix_core::Result<()> {
        if self.backend == BackendType::NativeBridge && self.bridge_library.is_none() {
            return Err(demix_core::SeparationError::InvalidConfig(String::from(
                "native-bridge backend requires bridge_library",
            )));
        }
        Ok(())
    }
}

/// Available engine backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackendType {
    /// ONNX Runtime via the ort crate
    #[default]
    OnnxRuntime,

    /// Prebuilt native engine library loaded at runtime
    NativeBridge,
}

impl BackendType {
    /// Display name for logs
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::OnnxRuntime => "ONNX Runtime",
            Self::NativeBridge => "Native bridge",
        }
    }
}

/// ONNX Runtime execution providers
///
/// GPU providers need the matching cargo feature; without it the engine
/// logs a warning and runs on the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    #[default]
    Cpu,
    Cuda,
    TensorRt,
    DirectMl,
}

impl ExecutionProvider {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::Cuda => "CUDA",
            Self::TensorRt => "TensorRT",
            Self::DirectMl => "DirectML",
        }
    }
}

/// Stem WAV sample formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// 32-bit IEEE float, no clipping
    #[default]
    Float32,
    /// 16-bit PCM, clamped to [-1, 1]
    Int16,
}

/// Default model location
///
/// Returns: ~/.local/share/demix/models/htdemucs_6s.onnx
pub fn default_model_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("demix")
        .join("models")
        .join("htdemucs_6s.onnx")
}

/// Get the default config file path
///
/// Returns: ~/.config/demix/config.yaml
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("demix")
        .join("config.yaml")
}

/// Load configuration from a YAML file
///
/// If the file doesn't exist or can't be parsed, returns default config.
pub fn load_config(path: &Path) -> SeparationConfig {
    log::info!("load_config: Loading from {:?}", path);

    if !path.exists() {
        log::info!("load_config: Config file doesn't exist, using defaults");
        return SeparationConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<SeparationConfig>(&contents) {
            Ok(mut config) => {
                config.validate();
                log::info!(
                    "load_config: Loaded config - model: {:?}, backend: {}",
                    config.model_path,
                    config.backend.display_name()
                );
                config
            }
            Err(e) => {
                log::warn!("load_config: Failed to parse config: {}, using defaults", e);
                SeparationConfig::default()
            }
        },
        Err(e) => {
            log::warn!("load_config: Failed to read config file: {}, using defaults", e);
            SeparationConfig::default()
        }
    }
}

/// Save configuration to a YAML file
///
/// Creates parent directories if they don't exist.
pub fn save_config(config: &SeparationConfig, path: &Path) -> Result<()> {
    log::info!("save_config: Saving to {:?}", path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write config: {:?}", path))?;

    log::info!("save_config: Config saved successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SeparationConfig::default();
        assert_eq!(config.output_dir, PathBuf::from("separated"));
        assert!(!config.single_chunk);
        assert_eq!(config.backend, BackendType::OnnxRuntime);
        assert_eq!(config.dynamic_chunk_frames, 343_980);
        assert_eq!(config.sample_format, SampleFormat::Float32);
        assert!(config.model_path.ends_with("htdemucs_6s.onnx"));
    }

    #[test]
    fn test_validation_clamps_values() {
        let mut config = SeparationConfig {
            dynamic_chunk_frames: 10,
            device_id: -3,
            ..Default::default()
        };
        config.validate();
        assert_eq!(config.dynamic_chunk_frames, DEFAULT_DYNAMIC_CHUNK_FRAMES);
        assert_eq!(config.device_id, 0);
    }

    #[test]
    fn test_bridge_needs_library() {
        let mut config = SeparationConfig {
            backend: BackendType::NativeBridge,
            ..Default::default()
        };
        assert!(config.check_backend().is_err());

        config.bridge_library = Some(PathBuf::from("libdemix_trt.so"));
        assert!(config.check_backend().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "backend: native-bridge\nexecution_provider: tensorrt\nsample_format: int16\n";
        let config: SeparationConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.backend, BackendType::NativeBridge);
        assert_eq!(config.execution_provider, ExecutionProvider::TensorRt);
        assert_eq!(config.sample_format, SampleFormat::Int16);
        assert_eq!(config.output_dir, PathBuf::from("separated"));
        assert_eq!(config.dynamic_chunk_frames, DEFAULT_DYNAMIC_CHUNK_FRAMES);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let config = SeparationConfig {
            model_path: PathBuf::from("/models/htdemucs.onnx"),
            single_chunk: true,
            execution_provider: ExecutionProvider::Cuda,
            device_id: 1,
            ..Default::default()
        };
        save_config(&config, &path).unwrap();

        assert_eq!(load_config(&path), config);
    }

    #[test]
    fn test_missing_and_invalid_files_fall_back() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("absent.yaml");
        assert_eq!(load_config(&missing), SeparationConfig::default());

        let invalid = dir.path().join("invalid.yaml");
        std::fs::write(&invalid, "backend: [not, a, backend").unwrap();
        assert_eq!(load_config(&invalid), SeparationConfig::default());
    }
}
