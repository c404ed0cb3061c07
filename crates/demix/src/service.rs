//! Separation service - coordinates decoding, engine lifetime and stem output
//!
//! The `SeparationService` is the main entry point for separating files.
//! It handles:
//! - Output directory checks (before any inference)
//! - Engine Init/Destroy around a batch of files
//! - Stage-level progress reporting
//! - Writing stem files and reporting what was produced

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use demix_core::{
    ChunkProgress, InferenceEngine, PipelineOptions, ProgressCallback, Result, Separator,
};

use crate::config::SeparationConfig;
use crate::decode::decode_track;
use crate::engine::open_engine;
use crate::export::WavStemWriter;

/// Progress stage during separation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeparationStage {
    /// Reading and resampling the input file
    Decoding,
    /// Loading the model into the engine
    LoadingModel,
    /// Running chunks through the engine
    Separating,
    /// Writing stem files
    Writing,
    /// Finished
    Complete,
}

/// Combined progress info
#[derive(Debug, Clone)]
pub struct SeparationProgress {
    /// Current stage
    pub stage: SeparationStage,
    /// Progress within current stage (0.0 to 1.0)
    pub progress: f32,
    /// Human-readable status message
    pub message: String,
    /// Chunk detail while separating
    pub chunk: Option<ChunkProgress>,
}

impl SeparationProgress {
    fn new(stage: SeparationStage, progress: f32, message: impl Into<String>) -> Self {
        Self {
            stage,
            progress,
            message: message.into(),
            chunk: None,
        }
    }
}

/// Callback for overall separation progress (uses Arc for cloneability)
pub type ServiceProgressCallback = Arc<dyn Fn(SeparationProgress) + Send + Sync>;

/// What one input file produced
#[derive(Debug, Clone)]
pub struct SeparationReport {
    pub input: PathBuf,
    /// Stem files in engine output order
    pub stem_paths: Vec<PathBuf>,
    pub frames: usize,
    pub chunks: usize,
    pub decode_time: Duration,
    pub separate_time: Duration,
    pub write_time: Duration,
}

/// Main service for file-to-stems separation
///
/// Example usage:
/// ```ignore
/// let service = SeparationService::new(load_config(&default_config_path()));
/// let reports = service.separate_files(&[PathBuf::from("input.flac")], None)?;
/// ```
pub struct SeparationService {
    config: SeparationConfig,
    writer: WavStemWriter,
}

impl SeparationService {
    pub fn new(mut config: SeparationConfig) -> Self {
        config.validate();
        let writer = WavStemWriter::new(&config.output_dir, config.sample_format);
        Self { config, writer }
    }

    /// Get current configuration
    pub fn config(&self) -> &SeparationConfig {
        &self.config
    }

    /// Separate one file with a freshly loaded engine
    pub fn separate_file(
        &self,
        input: impl AsRef<Path>,
        progress: Option<ServiceProgressCallback>,
    ) -> Result<SeparationReport> {
        let mut reports = self.separate_files(&[input.as_ref().to_path_buf()], progress)?;
        Ok(reports.remove(0))
    }

    /// Separate several files, loading the engine once for all of them
    ///
    /// Stops at the first failing file; stems already written for earlier
    /// files are kept.
    pub fn separate_files(
        &self,
        inputs: &[PathBuf],
        progress: Option<ServiceProgressCallback>,
    ) -> Result<Vec<SeparationReport>> {
        self.writer.prepare()?;

        report(&progress, SeparationStage::LoadingModel, 0.0, "Loading separation model...");
        let engine = open_engine(&self.config)?;

        self.run_batch(engine, inputs, progress)
    }

    /// Separate several files with an already loaded engine
    ///
    /// The engine is dropped (destroyed) when all files are done.
    pub fn separate_files_with<E: InferenceEngine>(
        &self,
        engine: E,
        inputs: &[PathBuf],
        progress: Option<ServiceProgressCallback>,
    ) -> Result<Vec<SeparationReport>> {
        self.writer.prepare()?;
        self.run_batch(engine, inputs, progress)
    }

    fn run_batch<E: InferenceEngine>(
        &self,
        engine: E,
        inputs: &[PathBuf],
        progress: Option<ServiceProgressCallback>,
    ) -> Result<Vec<SeparationReport>> {
        let options = PipelineOptions {
            single_chunk: self.config.single_chunk,
        };
        let mut separator = Separator::new(engine, options)?;

        let reports = inputs
            .iter()
            .map(|input| self.run_one(&mut separator, input, &progress))
            .collect::<Result<Vec<_>>>()?;

        report(&progress, SeparationStage::Complete, 1.0, "Separation complete");
        Ok(reports)
    }

    fn run_one<E: InferenceEngine>(
        &self,
        separator: &mut Separator<E>,
        input: &Path,
        progress: &Option<ServiceProgressCallback>,
    ) -> Result<SeparationReport> {
        log::info!("Separating {:?}", input);

        report(progress, SeparationStage::Decoding, 0.0, format!("Decoding {:?}...", input));
        let started = Instant::now();
        let track = decode_track(input)?;
        let decode_time = started.elapsed();

        report(progress, SeparationStage::Separating, 0.0, "Separating audio into stems...");
        let chunk_progress: Option<ProgressCallback> = progress.clone().map(|cb| {
            Box::new(move |p: &ChunkProgress| {
                cb(SeparationProgress {
                    chunk: Some(*p),
                    ..SeparationProgress::new(
                        SeparationStage::Separating,
                        p.fraction(),
                        format!("Separating... chunk {}/{}", p.chunk_index + 1, p.chunk_count),
                    )
                });
            }) as ProgressCallback
        });

        let started = Instant::now();
        let (stems, run) = separator.separate_with_stats(&track, chunk_progress.as_ref())?;
        let separate_time = started.elapsed();

        report(progress, SeparationStage::Writing, 0.0, "Writing stems...");
        let started = Instant::now();
        let base_name = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("track"));
        let stem_paths = self.writer.write(&stems, &base_name)?;
        let write_time = started.elapsed();

        log::info!(
            "Finished {:?}: {} stems, {} chunks, decode {:.2?}, separate {:.2?}, write {:.2?}",
            input,
            stem_paths.len(),
            run.chunks_processed,
            decode_time,
            separate_time,
            write_time
        );

        Ok(SeparationReport {
            input: input.to_path_buf(),
            stem_paths,
            frames: track.len(),
            chunks: run.chunks_processed,
            decode_time,
            separate_time,
            write_time,
        })
    }
}

fn report(
    progress: &Option<ServiceProgressCallback>,
    stage: SeparationStage,
    fraction: f32,
    message: impl Into<String>,
) {
    if let Some(cb) = progress {
        cb(SeparationProgress::new(stage, fraction, message));
    }
}
