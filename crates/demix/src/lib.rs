//! demix - Stem separation for full-length tracks
//!
//! Decodes an audio file, runs it through a fixed-window separation model in
//! overlapping chunks, and writes one WAV per stem:
//!
//! 1. **Decode**: any Symphonia-supported file to stereo at 44.1 kHz.
//!
//! 2. **Separate**: [`demix_core::Separator`] on an ONNX Runtime or native
//!    bridge engine.
//!
//! 3. **Write**: `{track}_({Stem}).wav` files in the output directory.

pub mod config;
pub mod decode;
pub mod engine;
pub mod export;
pub mod service;

pub use config::{BackendType, ExecutionProvider, SampleFormat, SeparationConfig};
pub use service::{
    SeparationProgress, SeparationReport, SeparationService, SeparationStage,
    ServiceProgressCallback,
};
