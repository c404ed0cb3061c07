//! Inference engine contract
//!
//! An engine is a loaded, ready-to-run separation model with fixed tensor
//! shapes. Backends implement [`InferenceEngine`]; the pipeline never sees how
//! a backend owns its runtime, model, execution context, buffers or stream.
//!
//! ## Lifecycle
//!
//! | Operation | Rust form                               |
//! |-----------|-----------------------------------------|
//! | Init      | backend constructor returning the value |
//! | Process   | [`InferenceEngine::process`]            |
//! | Destroy   | `Drop`                                  |
//!
//! ## Tensor contract
//!
//! The compiled model exposes exactly two named tensors:
//!
//! ```text
//! input:  [1, 2, chunk_len]               f32, layout [channel][frame]
//! output: [1, num_sources, 2, chunk_len]  f32, layout [stem][channel][frame]
//! ```

use crate::error::{InferenceError, Result, SeparationError};
use crate::types::NUM_CHANNELS;

/// Name of the model's input tensor
pub const INPUT_TENSOR: &str = "input";

/// Name of the model's output tensor
pub const OUTPUT_TENSOR: &str = "output";

/// Static shape discovered from a loaded model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineShape {
    /// Frames per channel in one window
    pub chunk_len: usize,
    /// Stems produced per window
    pub num_sources: usize,
}

impl EngineShape {
    /// Samples in one input window
    pub fn input_len(&self) -> usize {
        NUM_CHANNELS * self.chunk_len
    }

    /// Samples in one output window
    pub fn output_len(&self) -> usize {
        self.num_sources * NUM_CHANNELS * self.chunk_len
    }

    /// Validate declared tensor dimensions against the contract
    ///
    /// Negative dimensions are dynamic axes. A dynamic batch axis is accepted
    /// (the pipeline always submits batch 1). A dynamic time axis is resolved
    /// with `dynamic_chunk_len` when one is given; a dynamic source axis is
    /// always an error since stems cannot be labelled without it.
    pub fn from_declared(
        input: &[i64],
        output: &[i64],
        dynamic_chunk_len: Option<usize>,
    ) -> Result<Self> {
        let contract_err = |detail: String| {
            SeparationError::ModelLoad(format!(
                "tensor contract mismatch ({}): input {:?}, output {:?}",
                detail, input, output
            ))
        };

        if input.len() != 3 {
            return Err(contract_err(format!("input rank {} != 3", input.len())));
        }
        if output.len() != 4 {
            return Err(contract_err(format!("output rank {} != 4", output.len())));
        }
        if !batch_ok(input[0]) || !batch_ok(output[0]) {
            return Err(contract_err(String::from("batch must be 1")));
        }
        if input[1] != NUM_CHANNELS as i64 || output[2] != NUM_CHANNELS as i64 {
            return Err(contract_err(String::from("expected stereo channels")));
        }
        if output[1] <= 0 {
            return Err(contract_err(String::from("source count is not static")));
        }

        let chunk_len = match (input[2], output[3]) {
            (i, o) if i > 0 && o > 0 && i != o => {
                return Err(contract_err(format!("input frames {} != output frames {}", i, o)));
            }
            (i, _) if i > 0 => i as usize,
            (_, o) if o > 0 => o as usize,
            _ => match dynamic_chunk_len {
                Some(len) if len > 0 => {
                    log::warn!(
                        "Model declares a dynamic time axis, using configured chunk length {}",
                        len
                    );
                    len
                }
                _ => return Err(contract_err(String::from("time axis is not static"))),
            },
        };

        Self::new(chunk_len, output[1] as usize)
    }

    /// Build from values reported by a native engine
    pub fn new(chunk_len: usize, num_sources: usize) -> Result<Self> {
        if chunk_len == 0 || num_sources == 0 {
            return Err(SeparationError::ModelLoad(format!(
                "engine reported empty shape: chunk_len={} num_sources={}",
                chunk_len, num_sources
            )));
        }
        Ok(Self {
            chunk_len,
            num_sources,
        })
    }
}

#[inline]
fn batch_ok(dim: i64) -> bool {
    dim == 1 || dim < 0
}

/// A loaded separation model with fixed-size buffers
///
/// `process` copies one normalized input window in, runs the model
/// synchronously and copies all stem windows out. It blocks until the result
/// is in `output`. Implementations allocate their buffers once at load time and
/// reuse them for every call.
pub trait InferenceEngine {
    /// Shape discovered when the model was loaded
    fn shape(&self) -> EngineShape;

    /// Run one window
    ///
    /// `input` holds `shape().input_len()` samples and `output` holds
    /// `shape().output_len()` samples.
    fn process(&mut self, input: &[f32], output: &mut [f32]) -> std::result::Result<(), InferenceError>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
    fn shape(&self) -> EngineShape {
        (**self).shape()
    }

    fn process(&mut self, input: &[f32], output: &mut [f32]) -> std::result::Result<(), InferenceError> {
        (**self).process(input, output)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_contract() {
        let shape = EngineShape::from_declared(&[1, 2, 343_980], &[1, 6, 2, 343_980], None).unwrap();
        assert_eq!(shape.chunk_len, 343_980);
        assert_eq!(shape.num_sources, 6);
        assert_eq!(shape.input_len(), 687_960);
        assert_eq!(shape.output_len(), 6 * 687_960);
    }

    #[test]
    fn test_dynamic_batch_is_accepted() {
        let shape = EngineShape::from_declared(&[-1, 2, 1024], &[-1, 4, 2, 1024], None).unwrap();
        assert_eq!(shape, EngineShape { chunk_len: 1024, num_sources: 4 });
    }

    #[test]
    fn test_dynamic_time_needs_fallback() {
        let input = [-1, 2, -1];
        let output = [-1, 6, 2, -1];
        assert!(EngineShape::from_declared(&input, &output, None).is_err());

        let shape = EngineShape::from_declared(&input, &output, Some(343_980)).unwrap();
        assert_eq!(shape.chunk_len, 343_980);
    }

    #[test]
    fn test_contract_violations() {
        // wrong rank
        assert!(EngineShape::from_declared(&[2, 1024], &[1, 4, 2, 1024], None).is_err());
        // mono
        assert!(EngineShape::from_declared(&[1, 1, 1024], &[1, 4, 1, 1024], None).is_err());
        // frames disagree
        assert!(EngineShape::from_declared(&[1, 2, 1024], &[1, 4, 2, 2048], None).is_err());
        // dynamic sources
        assert!(EngineShape::from_declared(&[1, 2, 1024], &[1, -1, 2, 1024], None).is_err());
        // batch > 1
        assert!(EngineShape::from_declared(&[4, 2, 1024], &[4, 4, 2, 1024], None).is_err());
    }

    #[test]
    fn test_empty_native_shape() {
        assert!(EngineShape::new(0, 4).is_err());
        assert!(EngineShape::new(1024, 0).is_err());
    }
}
