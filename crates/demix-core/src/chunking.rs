//! Fixed-length chunk scheduling with linear crossfades
//!
//! The engines only accept windows of exactly `chunk_len` frames, so a track
//! of `N` frames is walked in overlapping windows:
//!
//! ```text
//! Track:    [==============================================]
//! Chunk 0:  [==========]
//! Chunk 1:          [==========]
//! Chunk 2:                  [==========]
//! Chunk 3:                          [=========.]   (zero-padded)
//!                   ^^
//!                   overlap = floor(0.25 * chunk_len)
//! ```
//!
//! Every window after the first fades in linearly over its leading overlap,
//! and every window that does not reach the end of the track fades out over
//! its trailing overlap. The first window never fades in and the window that
//! reaches `N` never fades out, so the track's outer edges keep full weight.
//!
//! The fade comparisons are strict on both sides (`t < overlap` and
//! `t > chunk_len - overlap`). The fade-out region is therefore one frame
//! shorter than the fade-in region.

/// Fraction of each chunk shared with its neighbour
pub const OVERLAP_RATIO: f64 = 0.25;

/// One window into the track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// 0-based position in the schedule
    pub index: usize,
    /// First track frame covered
    pub start: usize,
    /// Real (non-padding) frames in this window
    pub len: usize,
}

impl Chunk {
    /// One past the last track frame covered
    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Chunk geometry for one track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    chunk_len: usize,
    overlap_frames: usize,
    hop_len: usize,
    total_frames: usize,
}

impl ChunkPlan {
    /// Derive overlap and hop for a track of `total_frames`
    ///
    /// `chunk_len` must be non-zero; engines guarantee this at load time.
    pub fn new(chunk_len: usize, total_frames: usize) -> Self {
        debug_assert!(chunk_len > 0, "chunk length must be positive");
        let overlap_frames = (OVERLAP_RATIO * chunk_len as f64).floor() as usize;
        Self {
            chunk_len,
            overlap_frames,
            hop_len: chunk_len - overlap_frames,
            total_frames,
        }
    }

    pub fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    pub fn overlap_frames(&self) -> usize {
        self.overlap_frames
    }

    pub fn hop_len(&self) -> usize {
        self.hop_len
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    /// Number of windows needed to cover the track
    pub fn chunk_count(&self) -> usize {
        self.total_frames.div_ceil(self.hop_len)
    }

    /// Iterate the windows in processing order
    pub fn chunks(&self) -> Chunks {
        Chunks {
            plan: *self,
            next_start: 0,
            next_index: 0,
        }
    }

    /// Crossfade weight for in-window position `t` of `chunk`
    pub fn fade_weight(&self, chunk: &Chunk, t: usize) -> f32 {
        let mut weight = 1.0f32;

        if chunk.index > 0 && t < self.overlap_frames {
            weight = t as f32 / self.overlap_frames as f32;
        }

        if chunk.end() < self.total_frames && t > self.chunk_len - self.overlap_frames {
            weight = (self.chunk_len - t) as f32 / self.overlap_frames as f32;
        }

        weight
    }

    /// Write the weights of every real frame of `chunk` into `out[..chunk.len]`
    pub fn fill_weights(&self, chunk: &Chunk, out: &mut [f32]) {
        for (t, w) in out[..chunk.len].iter_mut().enumerate() {
            *w = self.fade_weight(chunk, t);
        }
    }
}

/// Iterator over the windows of a [`ChunkPlan`]
#[derive(Debug, Clone)]
pub struct Chunks {
    plan: ChunkPlan,
    next_start: usize,
    next_index: usize,
}

impl Iterator for Chunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.next_start >= self.plan.total_frames {
            return None;
        }

        let start = self.next_start;
        let end = (start + self.plan.chunk_len).min(self.plan.total_frames);
        let chunk = Chunk {
            index: self.next_index,
            start,
            len: end - start,
        };

        self.next_start += self.plan.hop_len;
        self.next_index += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self
            .plan
            .total_frames
            .saturating_sub(self.next_start)
            .div_ceil(self.plan.hop_len);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks {}
