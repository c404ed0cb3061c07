//! demix - separate audio files into stems
//!
//! ```bash
//! demix [--model <FILE>] [--output-dir <DIR>] [--backend onnx-runtime|native-bridge]
//!       [--bridge-library <LIB>] [--provider cpu|cuda|tensorrt|directml] [--device <N>]
//!       [--format float32|int16] [--single-chunk] [--config <FILE>] [--save-config]
//!       <INPUT>...
//! ```
//!
//! Flags override values from the config file; `--save-config` writes the
//! merged settings back to it. Set RUST_LOG=debug for per-chunk output.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use demix::config::{default_config_path, load_config, save_config};
use demix::{
    BackendType, ExecutionProvider, SampleFormat, SeparationConfig, SeparationProgress,
    SeparationService, SeparationStage, ServiceProgressCallback,
};

/// Separate full-length tracks into stems
#[derive(Parser, Debug)]
#[clap(name = "demix", version)]
#[clap(about = "Chunked overlap-add stem separation")]
struct Args {
    /// Audio files to separate
    #[clap(required = true, value_name = "INPUT")]
    inputs: Vec<PathBuf>,

    /// Compiled model artifact
    #[clap(long, value_name = "FILE")]
    model: Option<PathBuf>,

    /// Directory for stem files
    #[clap(long, short = 'o', value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Stop after the first chunk (debug)
    #[clap(long)]
    single_chunk: bool,

    /// Engine backend
    #[clap(long, value_enum)]
    backend: Option<CliBackend>,

    /// Native bridge shared library
    #[clap(long, value_name = "LIB", env = "DEMIX_BRIDGE_LIBRARY")]
    bridge_library: Option<PathBuf>,

    /// ONNX Runtime execution provider
    #[clap(long, value_enum)]
    provider: Option<CliProvider>,

    /// Accelerator ordinal
    #[clap(long)]
    device: Option<i32>,

    /// Stem sample format
    #[clap(long, value_enum)]
    format: Option<CliFormat>,

    /// Config file (default: platform config dir)
    #[clap(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write the effective settings to the config file
    #[clap(long)]
    save_config: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliBackend {
    OnnxRuntime,
    NativeBridge,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliProvider {
    Cpu,
    Cuda,
    Tensorrt,
    Directml,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliFormat {
    Float32,
    Int16,
}

impl Args {
    /// Layer command-line flags over the file configuration
    fn apply(&self, config: &mut SeparationConfig) {
        if let Some(model) = &self.model {
            config.model_path = model.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if self.single_chunk {
            config.single_chunk = true;
        }
        if let Some(backend) = self.backend {
            config.backend = match backend {
                CliBackend::OnnxRuntime => BackendType::OnnxRuntime,
                CliBackend::NativeBridge => BackendType::NativeBridge,
            };
        }
        if let Some(lib) = &self.bridge_library {
            config.bridge_library = Some(lib.clone());
        }
        if let Some(provider) = self.provider {
            config.execution_provider = match provider {
                CliProvider::Cpu => ExecutionProvider::Cpu,
                CliProvider::Cuda => ExecutionProvider::Cuda,
                CliProvider::Tensorrt => ExecutionProvider::TensorRt,
                CliProvider::Directml => ExecutionProvider::DirectMl,
            };
        }
        if let Some(device) = self.device {
            config.device_id = device;
        }
        if let Some(format) = self.format {
            config.sample_format = match format {
                CliFormat::Float32 => SampleFormat::Float32,
                CliFormat::Int16 => SampleFormat::Int16,
            };
        }
    }
}

/// Load the config file, layer the flags over it and save it if asked
fn resolve_config(args: &Args) -> Result<SeparationConfig> {
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut config = load_config(&config_path);
    args.apply(&mut config);
    config.validate();

    if args.save_config {
        save_config(&config, &config_path)?;
    }
    Ok(config)
}

fn log_progress(p: SeparationProgress) {
    match (p.stage, p.chunk) {
        (SeparationStage::Separating, Some(chunk)) => log::info!(
            "Chunk {}/{} ({:.0}%) elapsed {:.1}s, ETA {:.1}s",
            chunk.chunk_index + 1,
            chunk.chunk_count,
            chunk.fraction() * 100.0,
            chunk.elapsed.as_secs_f64(),
            chunk.eta().as_secs_f64()
        ),
        _ => log::info!("{}", p.message),
    }
}

fn main() -> Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();

    let config = resolve_config(&args)?;
    config.check_backend()?;

    log::info!(
        "demix starting: {} file(s), backend {}, model {:?}, output {:?}",
        args.inputs.len(),
        config.backend.display_name(),
        config.model_path,
        config.output_dir
    );

    let service = SeparationService::new(config);
    let progress: ServiceProgressCallback = Arc::new(log_progress);

    let reports = service
        .separate_files(&args.inputs, Some(progress))
        .context("Separation failed")?;

    for report in &reports {
        log::info!(
            "{:?}: {} frames in {} chunk(s), separated in {:.1}s",
            report.input,
            report.frames,
            report.chunks,
            report.separate_time.as_secs_f64()
        );
        for path in &report.stem_paths {
            println!("{}", path.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "demix",
            "--backend",
            "native-bridge",
            "--bridge-library",
            "/opt/lib/libdemix_trt.so",
            "--provider",
            "tensorrt",
            "--format",
            "int16",
            "--single-chunk",
            "-o",
            "out",
            "song.flac",
        ]);
        let mut config = SeparationConfig::default();
        args.apply(&mut config);

        assert_eq!(config.backend, BackendType::NativeBridge);
        assert_eq!(config.bridge_library, Some(PathBuf::from("/opt/lib/libdemix_trt.so")));
        assert_eq!(config.execution_provider, ExecutionProvider::TensorRt);
        assert_eq!(config.sample_format, SampleFormat::Int16);
        assert!(config.single_chunk);
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(args.inputs, vec![PathBuf::from("song.flac")]);
    }

    #[test]
    fn test_absent_flags_keep_config() {
        let args = Args::parse_from(["demix", "a.wav", "b.wav"]);
        let original = SeparationConfig {
            device_id: 2,
            single_chunk: true,
            ..Default::default()
        };
        let mut config = original.clone();
        args.apply(&mut config);
        assert_eq!(config, original);
    }

    #[test]
    fn test_save_config_persists_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demix").join("config.yaml");
        let path_arg = path.to_string_lossy().into_owned();

        let args = Args::parse_from([
            "demix",
            "--config",
            path_arg.as_str(),
            "--device",
            "1",
            "--format",
            "int16",
            "--save-config",
            "song.flac",
        ]);
        let config = resolve_config(&args).unwrap();
        assert!(path.exists());

        // A later run without flags picks the saved values up
        let args = Args::parse_from(["demix", "--config", path_arg.as_str(), "song.flac"]);
        let reloaded = resolve_config(&args).unwrap();
        assert_eq!(reloaded, config);
        assert_eq!(reloaded.device_id, 1);
        assert_eq!(reloaded.sample_format, SampleFormat::Int16);
    }

    #[test]
    fn test_config_not_written_without_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let path_arg = path.to_string_lossy().into_owned();
        let args = Args::parse_from(["demix", "--config", path_arg.as_str(), "song.flac"]);
        resolve_config(&args).unwrap();
        assert!(!path.exists());
    }
}
