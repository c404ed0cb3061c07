//! Whole-track normalization
//!
//! The separation models expect zero-mean, unit-variance input. Statistics are
//! taken once over the mono mix `(L + R) / 2` of the complete track, used to
//! normalize every input window, and used again to undo the scaling on the
//! reconstructed stems. Recomputing them per chunk would give every chunk a
//! different scale and break the overlap-add join.

use crate::types::{Sample, Track};

/// Added to the standard deviation so silent tracks never divide by zero
pub const NORM_EPSILON: f64 = 1e-8;

/// Mean and standard deviation of a track's mono mix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizationStats {
    pub mean: f32,
    pub std: f32,
}

impl NormalizationStats {
    /// Compute population statistics over the full track in one pass
    pub fn compute(track: &Track) -> Self {
        let n = track.len();
        if n == 0 {
            return Self {
                mean: 0.0,
                std: NORM_EPSILON as f32,
            };
        }

        // Shifted sums keep the single pass numerically stable on long tracks
        let shift = mono(track.left()[0], track.right()[0]);
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        for (&l, &r) in track.left().iter().zip(track.right()) {
            let d = mono(l, r) - shift;
            sum += d;
            sum_sq += d * d;
        }

        let n = n as f64;
        let mean_d = sum / n;
        let variance = (sum_sq / n - mean_d * mean_d).max(0.0);

        Self {
            mean: (shift + mean_d) as f32,
            std: (variance.sqrt() + NORM_EPSILON) as f32,
        }
    }

    /// Scale a raw sample into model space
    #[inline]
    pub fn normalize(&self, sample: Sample) -> Sample {
        (sample - self.mean) / self.std
    }

    /// Map a model-space sample back to the track's scale
    #[inline]
    pub fn denormalize(&self, sample: Sample) -> Sample {
        sample * self.std + self.mean
    }
}

#[inline]
fn mono(left: Sample, right: Sample) -> f64 {
    (left as f64 + right as f64) * 0.5
}
