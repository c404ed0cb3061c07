//! demix-core: chunked overlap-add stem separation
//!
//! Pipeline pieces with no file or runtime I/O:
//!
//! - [`normalize`]: whole-track mean/std of the mono mix
//! - [`chunking`]: window schedule and crossfade weights
//! - [`accumulator`]: weighted overlap-add and finalization
//! - [`engine`]: the contract an inference backend implements
//! - [`pipeline`]: [`Separator`], which drives an engine across a track
//!
//! Decoding, model runtimes and stem files live in the `demix` crate.

pub mod accumulator;
pub mod chunking;
pub mod engine;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod types;

pub use accumulator::OverlapAccumulator;
pub use chunking::{Chunk, ChunkPlan};
pub use engine::{EngineShape, InferenceEngine, INPUT_TENSOR, OUTPUT_TENSOR};
pub use error::{InferenceError, InferenceStage, Result, SeparationError};
pub use normalize::NormalizationStats;
pub use pipeline::{ChunkProgress, PipelineOptions, ProgressCallback, RunStats, Separator};
pub use types::{
    SeparatedStems, StemAudio, StemKind, Track, ENGINE_SAMPLE_RATE, FOUR_STEMS, NUM_CHANNELS,
    SIX_STEMS,
};
