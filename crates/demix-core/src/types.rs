//! Common types for demix
//!
//! Planar stereo audio (the decoded input track and the separated stems) and
//! the stem naming contract shared by every engine.

use crate::error::{Result, SeparationError};

/// Sample rate every separation model is compiled for
pub const ENGINE_SAMPLE_RATE: u32 = 44100;

/// Number of channels the engines consume and produce
pub const NUM_CHANNELS: usize = 2;

/// Audio sample type
pub type Sample = f32;

/// Stem identifiers, in the order the models emit them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum StemKind {
    Drums = 0,
    Bass = 1,
    Other = 2,
    Vocals = 3,
    Guitar = 4,
    Piano = 5,
}

/// Output order of 4-source models
pub const FOUR_STEMS: [StemKind; 4] = [
    StemKind::Drums,
    StemKind::Bass,
    StemKind::Other,
    StemKind::Vocals,
];

/// Output order of 6-source models
pub const SIX_STEMS: [StemKind; 6] = [
    StemKind::Drums,
    StemKind::Bass,
    StemKind::Other,
    StemKind::Vocals,
    StemKind::Guitar,
    StemKind::Piano,
];

impl StemKind {
    /// Get the display name of this stem
    pub fn name(&self) -> &'static str {
        match self {
            StemKind::Drums => "Drums",
            StemKind::Bass => "Bass",
            StemKind::Other => "Other",
            StemKind::Vocals => "Vocals",
            StemKind::Guitar => "Guitar",
            StemKind::Piano => "Piano",
        }
    }

    /// Lowercase label used in file names and logs
    pub fn label(&self) -> &'static str {
        match self {
            StemKind::Drums => "drums",
            StemKind::Bass => "bass",
            StemKind::Other => "other",
            StemKind::Vocals => "vocals",
            StemKind::Guitar => "guitar",
            StemKind::Piano => "piano",
        }
    }

    /// Stem labels for a model emitting `num_sources` stems
    ///
    /// Only 4- and 6-source models are recognised. Anything else would be
    /// mislabelled, so it is rejected.
    pub fn layout(num_sources: usize) -> Result<&'static [StemKind]> {
        match num_sources {
            4 => Ok(&FOUR_STEMS),
            6 => Ok(&SIX_STEMS),
            other => Err(SeparationError::UnsupportedStemCount(other)),
        }
    }
}

/// A decoded input track: two equal-length planar channels at the engine rate
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    left: Vec<Sample>,
    right: Vec<Sample>,
    sample_rate: u32,
}

impl Track {
    /// Create a track from planar channels
    pub fn new(left: Vec<Sample>, right: Vec<Sample>, sample_rate: u32) -> Result<Self> {
        if left.len() != right.len() {
            return Err(SeparationError::Decode(format!(
                "channel length mismatch: left={} right={}",
                left.len(),
                right.len()
            )));
        }
        Ok(Self {
            left,
            right,
            sample_rate,
        })
    }

    /// Create a track from interleaved [L, R, L, R, ...] samples
    pub fn from_interleaved(interleaved: &[Sample], sample_rate: u32) -> Result<Self> {
        if interleaved.len() % NUM_CHANNELS != 0 {
            return Err(SeparationError::Decode(format!(
                "interleaved stereo buffer has odd length {}",
                interleaved.len()
            )));
        }
        let (left, right) = interleaved
            .chunks_exact(NUM_CHANNELS)
            .map(|frame| (frame[0], frame[1]))
            .unzip();
        Self::new(left, right, sample_rate)
    }

    /// Frames per channel
    #[inline]
    pub fn len(&self) -> usize {
        self.left.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn left(&self) -> &[Sample] {
        &self.left
    }

    pub fn right(&self) -> &[Sample] {
        &self.right
    }

    /// Channel by index (0 = left, 1 = right)
    #[inline]
    pub fn channel(&self, index: usize) -> &[Sample] {
        if index == 0 {
            &self.left
        } else {
            &self.right
        }
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }
}

/// One reconstructed stem
#[derive(Debug, Clone, PartialEq)]
pub struct StemAudio {
    pub kind: StemKind,
    pub left: Vec<Sample>,
    pub right: Vec<Sample>,
}

impl StemAudio {
    /// Frames per channel
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Iterate frames as interleaved [L, R, L, R, ...] samples
    pub fn interleaved(&self) -> impl Iterator<Item = Sample> + '_ {
        self.left
            .iter()
            .zip(self.right.iter())
            .flat_map(|(&l, &r)| [l, r])
    }
}

/// All stems produced for one track
#[derive(Debug, Clone, PartialEq)]
pub struct SeparatedStems {
    pub sample_rate: u32,
    pub stems: Vec<StemAudio>,
}

impl SeparatedStems {
    /// Look up a stem by kind
    pub fn get(&self, kind: StemKind) -> Option<&StemAudio> {
        self.stems.iter().find(|stem| stem.kind == kind)
    }

    /// Frames per channel (identical across stems)
    pub fn samples_per_channel(&self) -> usize {
        self.stems.first().map(StemAudio::len).unwrap_or(0)
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.samples_per_channel() as f64 / self.sample_rate as f64
    }

    pub fn len(&self) -> usize {
        self.stems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stem_layouts() {
        let four = StemKind::layout(4).unwrap();
        assert_eq!(four.len(), 4);
        assert_eq!(four[3], StemKind::Vocals);

        let six = StemKind::layout(6).unwrap();
        assert_eq!(six.len(), 6);
        assert_eq!(six[4].label(), "guitar");
        assert_eq!(six[5].name(), "Piano");
    }

    #[test]
    fn test_unknown_stem_count_rejected() {
        for count in [0, 1, 2, 3, 5, 7, 8] {
            match StemKind::layout(count) {
                Err(SeparationError::UnsupportedStemCount(n)) => assert_eq!(n, count),
                other => panic!("expected UnsupportedStemCount for {}, got {:?}", count, other),
            }
        }
    }

    #[test]
    fn test_track_from_interleaved() {
        let track = Track::from_interleaved(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 44100).unwrap();
        assert_eq!(track.len(), 3);
        assert_eq!(track.left(), &[1.0, 3.0, 5.0]);
        assert_eq!(track.right(), &[2.0, 4.0, 6.0]);
        assert_eq!(track.channel(1), track.right());
    }

    #[test]
    fn test_track_rejects_mismatched_channels() {
        let err = Track::new(vec![0.0; 4], vec![0.0; 3], 44100).unwrap_err();
        assert!(matches!(err, SeparationError::Decode(_)));
        assert!(Track::from_interleaved(&[0.0; 5], 44100).is_err());
    }

    #[test]
    fn test_track_duration() {
        let track = Track::new(vec![0.0; 88200], vec![0.0; 88200], 44100).unwrap();
        assert!((track.duration_secs() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_stem_interleaving() {
        let stem = StemAudio {
            kind: StemKind::Bass,
            left: vec![1.0, 3.0],
            right: vec![2.0, 4.0],
        };
        let interleaved: Vec<f32> = stem.interleaved().collect();
        assert_eq!(interleaved, vec![1.0, 2.0, 3.0, 4.0]);
    }
}
