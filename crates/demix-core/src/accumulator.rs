//! Overlap-add accumulation of per-chunk stem windows
//!
//! Each engine call returns `num_sources` stereo windows of `chunk_len` frames
//! laid out as `[stem][channel][frame]`. Only the real (non-padding) frames
//! are folded into full-length sums, weighted by the chunk's crossfade. A
//! single weight sum shared by all stems records how much weight landed on
//! each track frame; dividing by it at the end yields the blended waveform.

use crate::chunking::{Chunk, ChunkPlan};
use crate::normalize::NormalizationStats;
use crate::types::{Sample, StemAudio, StemKind, NUM_CHANNELS};

/// Lower bound for the weight divisor at finalization
pub const WEIGHT_FLOOR: f32 = 1e-7;

/// Running weighted sums for every stem of one track
#[derive(Debug)]
pub struct OverlapAccumulator {
    chunk_len: usize,
    /// `[stem][channel]` sums of length `total_frames`
    sums: Vec<[Vec<Sample>; NUM_CHANNELS]>,
    weights: Vec<f32>,
    /// Crossfade of the chunk being folded in
    chunk_weights: Vec<f32>,
}

impl OverlapAccumulator {
    pub fn new(num_sources: usize, chunk_len: usize, total_frames: usize) -> Self {
        let sums = (0..num_sources)
            .map(|_| [vec![0.0; total_frames], vec![0.0; total_frames]])
            .collect();
        Self {
            chunk_len,
            sums,
            weights: vec![0.0; total_frames],
            chunk_weights: vec![0.0; chunk_len],
        }
    }

    pub fn num_sources(&self) -> usize {
        self.sums.len()
    }

    pub fn total_frames(&self) -> usize {
        self.weights.len()
    }

    /// Accumulated weight per track frame
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Fold one engine output window into the sums
    ///
    /// `output` must hold `num_sources * 2 * chunk_len` samples.
    pub fn accumulate(&mut self, plan: &ChunkPlan, chunk: &Chunk, output: &[Sample]) {
        debug_assert_eq!(output.len(), self.sums.len() * NUM_CHANNELS * self.chunk_len);

        let len = chunk.len;
        let range = chunk.start..chunk.end();
        plan.fill_weights(chunk, &mut self.chunk_weights);
        let fade = &self.chunk_weights[..len];

        for (acc, &w) in self.weights[range.clone()].iter_mut().zip(fade) {
            *acc += w;
        }

        for (stem, channels) in self.sums.iter_mut().enumerate() {
            for (ch, sum) in channels.iter_mut().enumerate() {
                let offset = (stem * NUM_CHANNELS + ch) * self.chunk_len;
                let window = &output[offset..offset + len];
                for ((acc, &sample), &w) in sum[range.clone()].iter_mut().zip(window).zip(fade) {
                    *acc += sample * w;
                }
            }
        }
    }

    /// Divide out the weights, undo normalization and label the stems
    ///
    /// `layout` must have one entry per source.
    pub fn finalize(self, stats: &NormalizationStats, layout: &[StemKind]) -> Vec<StemAudio> {
        debug_assert_eq!(layout.len(), self.sums.len());

        let weights = self.weights;
        self.sums
            .into_iter()
            .zip(layout)
            .map(|([mut left, mut right], &kind)| {
                for channel in [&mut left, &mut right] {
                    for (sample, &w) in channel.iter_mut().zip(&weights) {
                        *sample = stats.denormalize(*sample / w.max(WEIGHT_FLOOR));
                    }
                }
                StemAudio { kind, left, right }
            })
            .collect()
    }
}
