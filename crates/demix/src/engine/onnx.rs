//! ONNX Runtime engine
//!
//! Loads an exported separation model with `ort`, validates its declared
//! tensor shapes, and allocates one input and one output tensor at load time.
//! Both are bound to the model's named tensors once; each `process` call
//! copies the window into the bound input, runs the binding and copies the
//! bound output into the caller's buffer.

use std::path::Path;

use demix_core::{
    EngineShape, InferenceEngine, InferenceError, InferenceStage, Result, SeparationError,
    INPUT_TENSOR, NUM_CHANNELS, OUTPUT_TENSOR,
};
use ort::ep::ExecutionProviderDispatch;
use ort::io_binding::IoBinding;
use ort::memory::Allocator;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;

use crate::config::{ExecutionProvider, SeparationConfig};

/// Separation model running on ONNX Runtime
pub struct OnnxEngine {
    shape: EngineShape,
    /// Host input window `[1, 2, chunk_len]`, bound to the input tensor
    input: Tensor<f32>,
    /// Input and output `[1, num_sources, 2, chunk_len]` bindings
    binding: IoBinding,
    session: Session,
}

impl OnnxEngine {
    /// Load the model named by `config.model_path`
    pub fn load(config: &SeparationConfig) -> Result<Self> {
        let model_path = config.model_path.as_path();
        if !model_path.exists() {
            return Err(SeparationError::ModelNotFound(model_path.to_path_buf()));
        }

        log::info!(
            "Loading ONNX model from {:?} (provider: {})",
            model_path,
            config.execution_provider.display_name()
        );

        let providers = execution_providers(config.execution_provider, config.device_id);
        let session = build_session(model_path, &providers)?;

        let input_dims = session
            .inputs()
            .iter()
            .find(|v| v.name() == INPUT_TENSOR)
            .and_then(|v| v.dtype().tensor_shape().map(|shape| shape.to_vec()))
            .ok_or_else(|| missing_tensor(INPUT_TENSOR))?;
        let output_dims = session
            .outputs()
            .iter()
            .find(|v| v.name() == OUTPUT_TENSOR)
            .and_then(|v| v.dtype().tensor_shape().map(|shape| shape.to_vec()))
            .ok_or_else(|| missing_tensor(OUTPUT_TENSOR))?;
        log::info!(
            "Model tensors: {} {:?}, {} {:?}",
            INPUT_TENSOR,
            input_dims,
            OUTPUT_TENSOR,
            output_dims
        );

        let shape =
            EngineShape::from_declared(&input_dims, &output_dims, Some(config.dynamic_chunk_frames))?;

        let input = map_ort(
            "failed to allocate input tensor",
            Tensor::<f32>::new(
                &Allocator::default(),
                [1_usize, NUM_CHANNELS, shape.chunk_len],
            ),
        )?;
        let output = map_ort(
            "failed to allocate output tensor",
            Tensor::<f32>::new(
                &Allocator::default(),
                [1_usize, shape.num_sources, NUM_CHANNELS, shape.chunk_len],
            ),
        )?;

        let mut binding = map_ort("failed to create IoBinding", session.create_binding())?;
        map_ort(
            "failed to bind input tensor",
            binding.bind_input(INPUT_TENSOR, &input),
        )?;
        map_ort(
            "failed to bind output tensor",
            binding.bind_output(OUTPUT_TENSOR, output),
        )?;

        log::info!(
            "ONNX engine ready: chunk_len={}, num_sources={}",
            shape.chunk_len,
            shape.num_sources
        );

        Ok(Self {
            shape,
            input,
            binding,
            session,
        })
    }
}

impl InferenceEngine for OnnxEngine {
    fn shape(&self) -> EngineShape {
        self.shape
    }

    fn process(&mut self, input: &[f32], output: &mut [f32]) -> std::result::Result<(), InferenceError> {
        if input.len() != self.shape.input_len() {
            return Err(InferenceError::new(
                InferenceStage::TransferIn,
                format!("input window has {} samples, expected {}", input.len(), self.shape.input_len()),
            ));
        }
        {
            let (_, host) = self.input.extract_tensor_mut();
            host.copy_from_slice(input);
        }

        let outputs = self
            .session
            .run_binding(&self.binding)
            .map_err(|e| InferenceError::new(InferenceStage::Execute, e.to_string()))?;

        let value = outputs.get(OUTPUT_TENSOR).ok_or_else(|| {
            InferenceError::new(
                InferenceStage::TransferOut,
                format!("output '{}' was not produced", OUTPUT_TENSOR),
            )
        })?;
        let (_, data) = value
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::new(InferenceStage::TransferOut, e.to_string()))?;

        if data.len() != output.len() {
            return Err(InferenceError::new(
                InferenceStage::TransferOut,
                format!("output has {} samples, expected {}", data.len(), output.len()),
            ));
        }
        output.copy_from_slice(data);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "onnx-runtime"
    }
}

impl Drop for OnnxEngine {
    fn drop(&mut self) {
        log::debug!("Releasing ONNX engine");
    }
}

fn build_session(model_path: &Path, providers: &[ExecutionProviderDispatch]) -> Result<Session> {
    Session::builder()
        .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
        .and_then(|b| b.with_execution_providers(providers))
        .and_then(|b| b.commit_from_file(model_path))
        .map_err(|e| SeparationError::ModelLoad(format!("Failed to load ONNX model: {}", e)))
}

fn missing_tensor(name: &str) -> SeparationError {
    SeparationError::ModelLoad(format!("model has no tensor named '{}'", name))
}

/// Execution providers for the configured device
///
/// GPU providers only register when the matching cargo feature is enabled;
/// ONNX Runtime falls back to its CPU provider otherwise.
fn execution_providers(provider: ExecutionProvider, device_id: i32) -> Vec<ExecutionProviderDispatch> {
    match provider {
        ExecutionProvider::Cpu => Vec::new(),
        ExecutionProvider::Cuda => {
            #[cfg(feature = "cuda")]
            {
                vec![ort::ep::CUDA::default().with_device_id(device_id).build()]
            }
            #[cfg(not(feature = "cuda"))]
            {
                unavailable(provider, device_id)
            }
        }
        ExecutionProvider::TensorRt => {
            #[cfg(feature = "tensorrt")]
            {
                vec![
                    ort::ep::TensorRT::default().with_device_id(device_id).build(),
                    ort::ep::CUDA::default().with_device_id(device_id).build(),
                ]
            }
            #[cfg(not(feature = "tensorrt"))]
            {
                unavailable(provider, device_id)
            }
        }
        ExecutionProvider::DirectMl => {
            #[cfg(feature = "directml")]
            {
                vec![ort::ep::DirectML::default().with_device_id(device_id).build()]
            }
            #[cfg(not(feature = "directml"))]
            {
                unavailable(provider, device_id)
            }
        }
    }
}

#[cfg_attr(
    all(feature = "cuda", feature = "tensorrt", feature = "directml"),
    allow(dead_code)
)]
fn unavailable(provider: ExecutionProvider, device_id: i32) -> Vec<ExecutionProviderDispatch> {
    log::warn!(
        "{} execution provider (device {}) not compiled in, running on CPU",
        provider.display_name(),
        device_id
    );
    Vec::new()
}

fn map_ort<T>(context: &str, result: ort::Result<T>) -> Result<T> {
    result.map_err(|e| SeparationError::ModelLoad(format!("{context}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_missing_model_is_reported() {
        let config = SeparationConfig {
            model_path: PathBuf::from("/nonexistent/htdemucs.onnx"),
            ..Default::default()
        };
        match OnnxEngine::load(&config) {
            Err(SeparationError::ModelNotFound(path)) => {
                assert_eq!(path, PathBuf::from("/nonexistent/htdemucs.onnx"));
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("model should not load"),
        }
    }

    // Minimal protobuf writer for building a test model

    fn varint(buf: &mut Vec<u8>, mut v: u64) {
        while v >= 0x80 {
            buf.push((v as u8) | 0x80);
            v >>= 7;
        }
        buf.push(v as u8);
    }

    fn int_field(buf: &mut Vec<u8>, field: u64, v: i64) {
        varint(buf, field << 3);
        varint(buf, v as u64);
    }

    fn bytes_field(buf: &mut Vec<u8>, field: u64, bytes: &[u8]) {
        varint(buf, (field << 3) | 2);
        varint(buf, bytes.len() as u64);
        buf.extend_from_slice(bytes);
    }

    fn float_tensor_info(name: &str, dims: &[i64]) -> Vec<u8> {
        let mut shape = Vec::new();
        for &d in dims {
            let mut dim = Vec::new();
            int_field(&mut dim, 1, d);
            bytes_field(&mut shape, 1, &dim);
        }
        let mut tensor = Vec::new();
        int_field(&mut tensor, 1, 1); // FLOAT
        bytes_field(&mut tensor, 2, &shape);
        let mut ty = Vec::new();
        bytes_field(&mut ty, 1, &tensor);

        let mut info = Vec::new();
        bytes_field(&mut info, 1, name.as_bytes());
        bytes_field(&mut info, 2, &ty);
        info
    }

    fn int_attribute(name: &str, field: u64, kind: i64, value: i64) -> Vec<u8> {
        let mut attr = Vec::new();
        bytes_field(&mut attr, 1, name.as_bytes());
        int_field(&mut attr, field, value);
        int_field(&mut attr, 20, kind);
        attr
    }

    /// Opset 11 model copying `input [1, 2, L]` into every source of
    /// `output [1, S, 2, L]`
    fn copy_model(chunk_len: i64, num_sources: usize) -> Vec<u8> {
        let mut unsqueeze = Vec::new();
        bytes_field(&mut unsqueeze, 1, INPUT_TENSOR.as_bytes());
        bytes_field(&mut unsqueeze, 2, b"expanded");
        bytes_field(&mut unsqueeze, 4, b"Unsqueeze");
        bytes_field(&mut unsqueeze, 5, &int_attribute("axes", 8, 7, 1));

        let mut concat = Vec::new();
        for _ in 0..num_sources {
            bytes_field(&mut concat, 1, b"expanded");
        }
        bytes_field(&mut concat, 2, OUTPUT_TENSOR.as_bytes());
        bytes_field(&mut concat, 4, b"Concat");
        bytes_field(&mut concat, 5, &int_attribute("axis", 3, 2, 1));

        let mut graph = Vec::new();
        bytes_field(&mut graph, 1, &unsqueeze);
        bytes_field(&mut graph, 1, &concat);
        bytes_field(&mut graph, 2, b"copy");
        bytes_field(&mut graph, 11, &float_tensor_info(INPUT_TENSOR, &[1, 2, chunk_len]));
        bytes_field(
            &mut graph,
            12,
            &float_tensor_info(OUTPUT_TENSOR, &[1, num_sources as i64, 2, chunk_len]),
        );

        let mut opset = Vec::new();
        int_field(&mut opset, 2, 11);

        let mut model = Vec::new();
        int_field(&mut model, 1, 7);
        bytes_field(&mut model, 7, &graph);
        bytes_field(&mut model, 8, &opset);
        model
    }

    #[test]
    fn test_bound_buffers_reused_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("copy.onnx");
        std::fs::write(&model_path, copy_model(8, 4)).unwrap();

        let config = SeparationConfig {
            model_path,
            ..Default::default()
        };
        let mut engine = OnnxEngine::load(&config).unwrap();
        let shape = engine.shape();
        assert_eq!(shape, EngineShape::new(8, 4).unwrap());

        let mut output = vec![0.0; shape.output_len()];
        for round in 0..3 {
            let input: Vec<f32> = (0..shape.input_len())
                .map(|i| (i + 100 * round) as f32)
                .collect();
            engine.process(&input, &mut output).unwrap();
            for stem in output.chunks(shape.input_len()) {
                assert_eq!(stem, &input[..]);
            }
        }
    }

    #[test]
    fn test_wrong_window_rejected_before_run() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("copy.onnx");
        std::fs::write(&model_path, copy_model(8, 4)).unwrap();

        let config = SeparationConfig {
            model_path,
            ..Default::default()
        };
        let mut engine = OnnxEngine::load(&config).unwrap();
        let mut output = vec![0.0; engine.shape().output_len()];
        let err = engine.process(&[0.0; 5], &mut output).unwrap_err();
        assert_eq!(err.stage, InferenceStage::TransferIn);
    }

    #[test]
    fn test_cpu_has_no_extra_providers() {
        assert!(execution_providers(ExecutionProvider::Cpu, 0).is_empty());
    }
}
