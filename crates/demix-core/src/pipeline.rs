//! Chunked overlap-add separation
//!
//! [`Separator`] drives one [`InferenceEngine`] across a whole track:
//!
//! 1. compute [`NormalizationStats`] once from the full mono mix
//! 2. walk the [`ChunkPlan`], filling the reusable input window with
//!    normalized samples (zero-padded on the final chunk)
//! 3. run the engine into the reusable output window
//! 4. fold the real frames into the [`OverlapAccumulator`]
//! 5. finalize: divide out the crossfade weights and denormalize
//!
//! Chunks run strictly one after another. An engine failure on any chunk
//! aborts the run and no stems are returned, since a partial overlap-add is
//! not a valid reconstruction.

use std::time::{Duration, Instant};

use crate::accumulator::OverlapAccumulator;
use crate::chunking::{Chunk, ChunkPlan};
use crate::engine::{EngineShape, InferenceEngine};
use crate::error::{Result, SeparationError};
use crate::normalize::NormalizationStats;
use crate::types::{SeparatedStems, StemKind, Track, ENGINE_SAMPLE_RATE, NUM_CHANNELS};

/// Options fixed before a run starts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Stop after the first chunk (debug validation of the engine path)
    pub single_chunk: bool,
}

/// Progress snapshot taken after each completed chunk
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkProgress {
    /// Index of the chunk that just finished
    pub chunk_index: usize,
    /// Chunks this run will process
    pub chunk_count: usize,
    /// Track frames covered so far
    pub frames_done: usize,
    /// Track length in frames
    pub total_frames: usize,
    /// Wall time since the first chunk was submitted
    pub elapsed: Duration,
}

impl ChunkProgress {
    /// Completed fraction (0.0 to 1.0)
    pub fn fraction(&self) -> f32 {
        if self.chunk_count == 0 {
            1.0
        } else {
            (self.chunk_index + 1) as f32 / self.chunk_count as f32
        }
    }

    /// Remaining time extrapolated from the average chunk time so far
    pub fn eta(&self) -> Duration {
        let done = (self.chunk_index + 1) as u32;
        let remaining = self.chunk_count.saturating_sub(self.chunk_index + 1) as u32;
        (self.elapsed / done) * remaining
    }
}

/// Progress callback invoked at chunk boundaries
pub type ProgressCallback = Box<dyn Fn(&ChunkProgress) + Send + Sync>;

/// Summary of the chunk schedule for one run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunStats {
    pub chunks_processed: usize,
    pub normalization: NormalizationStats,
    pub elapsed: Duration,
}

/// Overlap-add driver owning one engine and its host-side windows
pub struct Separator<E: InferenceEngine> {
    engine: E,
    shape: EngineShape,
    layout: &'static [StemKind],
    options: PipelineOptions,
    /// Normalized input window, `[channel][frame]`
    input: Vec<f32>,
    /// Engine output window, `[stem][channel][frame]`
    output: Vec<f32>,
}

impl<E: InferenceEngine> Separator<E> {
    /// Wrap a loaded engine
    ///
    /// Fails before any chunk runs if the engine's source count has no stem
    /// labelling.
    pub fn new(engine: E, options: PipelineOptions) -> Result<Self> {
        let shape = engine.shape();
        let layout = StemKind::layout(shape.num_sources)?;

        log::info!(
            "Separator ready: engine={}, chunk_len={}, num_sources={}, single_chunk={}",
            engine.name(),
            shape.chunk_len,
            shape.num_sources,
            options.single_chunk
        );

        Ok(Self {
            engine,
            shape,
            layout,
            options,
            input: vec![0.0; shape.input_len()],
            output: vec![0.0; shape.output_len()],
        })
    }

    pub fn shape(&self) -> EngineShape {
        self.shape
    }

    /// Stem labels in engine output order
    pub fn layout(&self) -> &'static [StemKind] {
        self.layout
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Release the wrapper, handing the engine back
    pub fn into_engine(self) -> E {
        self.engine
    }

    /// Separate a whole track into stems
    pub fn separate(
        &mut self,
        track: &Track,
        progress: Option<&ProgressCallback>,
    ) -> Result<SeparatedStems> {
        self.separate_with_stats(track, progress).map(|(stems, _)| stems)
    }

    /// Separate a whole track, also returning run statistics
    pub fn separate_with_stats(
        &mut self,
        track: &Track,
        progress: Option<&ProgressCallback>,
    ) -> Result<(SeparatedStems, RunStats)> {
        if track.sample_rate() != ENGINE_SAMPLE_RATE {
            return Err(SeparationError::InvalidConfig(format!(
                "track sample rate {} Hz does not match engine rate {} Hz",
                track.sample_rate(),
                ENGINE_SAMPLE_RATE
            )));
        }

        let total_frames = track.len();
        let stats = NormalizationStats::compute(track);
        let plan = ChunkPlan::new(self.shape.chunk_len, total_frames);
        let chunk_count = if self.options.single_chunk {
            plan.chunk_count().min(1)
        } else {
            plan.chunk_count()
        };

        log::info!(
            "Separating {} frames ({:.1}s): {} chunk(s), overlap={}, hop={}, mean={:.6}, std={:.6}",
            total_frames,
            track.duration_secs(),
            chunk_count,
            plan.overlap_frames(),
            plan.hop_len(),
            stats.mean,
            stats.std
        );

        let mut accumulator =
            OverlapAccumulator::new(self.shape.num_sources, self.shape.chunk_len, total_frames);
        let started = Instant::now();

        for chunk in plan.chunks().take(chunk_count) {
            self.fill_input(track, &stats, &chunk);

            self.engine
                .process(&self.input, &mut self.output)
                .map_err(|source| {
                    log::error!("Chunk {} failed: {}", chunk.index, source);
                    SeparationError::Inference {
                        chunk: chunk.index,
                        source,
                    }
                })?;

            accumulator.accumulate(&plan, &chunk, &self.output);

            log::debug!(
                "Chunk {}/{} done: frames [{}, {}), padded={}",
                chunk.index + 1,
                chunk_count,
                chunk.start,
                chunk.end(),
                self.shape.chunk_len - chunk.len
            );

            if let Some(cb) = progress {
                cb(&ChunkProgress {
                    chunk_index: chunk.index,
                    chunk_count,
                    frames_done: chunk.end(),
                    total_frames,
                    elapsed: started.elapsed(),
                });
            }
        }

        let stems = accumulator.finalize(&stats, self.layout);
        let run = RunStats {
            chunks_processed: chunk_count,
            normalization: stats,
            elapsed: started.elapsed(),
        };

        log::info!(
            "Separation complete: {} stems x {} frames in {:.2?}",
            stems.len(),
            total_frames,
            run.elapsed
        );

        Ok((
            SeparatedStems {
                sample_rate: track.sample_rate(),
                stems,
            },
            run,
        ))
    }

    /// Normalize the chunk's frames into the input window, zero-padding the rest
    fn fill_input(&mut self, track: &Track, stats: &NormalizationStats, chunk: &Chunk) {
        let chunk_len = self.shape.chunk_len;
        for ch in 0..NUM_CHANNELS {
            let src = &track.channel(ch)[chunk.start..chunk.end()];
            let dst = &mut self.input[ch * chunk_len..(ch + 1) * chunk_len];
            for (d, &s) in dst.iter_mut().zip(src) {
                *d = stats.normalize(s);
            }
            dst[chunk.len..].fill(0.0);
        }
    }
}
