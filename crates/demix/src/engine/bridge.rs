//! Native engine bridge
//!
//! Drives a prebuilt accelerator engine through a shared library exposing a
//! three-function C ABI:
//!
//! ```text
//! void* Trt_Init(const char* path, int* chunkLen, int* numSources);  // NULL on failure
//! int   Trt_Process(void* handle, float* input, float* output);      // 0 ok, 1/2/3 stage failure
//! void  Trt_Destroy(void* handle);
//! ```
//!
//! The library owns the runtime, deserialized engine, execution context,
//! device buffers and stream behind the opaque handle. Init reports the
//! window length and source count; Process blocks until the stems are back in
//! host memory.

use std::ffi::{c_char, c_int, c_void, CString};
use std::path::Path;
use std::ptr::NonNull;

use demix_core::{
    EngineShape, InferenceEngine, InferenceError, InferenceStage, Result, SeparationError,
};
use libloading::Library;

type InitFn = unsafe extern "C" fn(*const c_char, *mut c_int, *mut c_int) -> *mut c_void;
type ProcessFn = unsafe extern "C" fn(*mut c_void, *mut f32, *mut f32) -> c_int;
type DestroyFn = unsafe extern "C" fn(*mut c_void);

/// The three entry points of a bridge library
#[derive(Clone, Copy)]
struct BridgeApi {
    init: InitFn,
    process: ProcessFn,
    destroy: DestroyFn,
}

impl BridgeApi {
    fn resolve(lib: &Library) -> Result<Self> {
        // SAFETY: signatures match the bridge ABI documented above.
        unsafe {
            Ok(Self {
                init: *symbol::<InitFn>(lib, b"Trt_Init\0")?,
                process: *symbol::<ProcessFn>(lib, b"Trt_Process\0")?,
                destroy: *symbol::<DestroyFn>(lib, b"Trt_Destroy\0")?,
            })
        }
    }
}

/// Separation engine living inside a native bridge library
pub struct BridgeEngine {
    shape: EngineShape,
    handle: NonNull<c_void>,
    api: BridgeApi,
    /// Keeps the entry points valid; dropped after `destroy` runs
    _library: Library,
}

impl BridgeEngine {
    /// Load `library` and initialize an engine from the artifact at `model_path`
    pub fn load(library: &Path, model_path: &Path) -> Result<Self> {
        if !model_path.exists() {
            return Err(SeparationError::ModelNotFound(model_path.to_path_buf()));
        }

        log::info!("Loading native bridge {:?} with engine {:?}", library, model_path);

        // SAFETY: loading runs the library's initializers; the bridge library
        // is trusted configuration, like the model artifact itself.
        let lib = unsafe { Library::new(library) }.map_err(|e| {
            SeparationError::ModelLoad(format!("Failed to load bridge library {:?}: {}", library, e))
        })?;

        let api = BridgeApi::resolve(&lib)?;
        Self::init(lib, api, model_path)
    }

    /// Run Init through `api`; `lib` must keep the entry points alive
    fn init(lib: Library, api: BridgeApi, model_path: &Path) -> Result<Self> {
        let path = CString::new(model_path.to_string_lossy().as_bytes()).map_err(|_| {
            SeparationError::ModelLoad(format!("model path contains a NUL byte: {:?}", model_path))
        })?;

        let mut chunk_len: c_int = 0;
        let mut num_sources: c_int = 0;
        // SAFETY: `path` outlives the call and both out-pointers are valid.
        let raw = unsafe { (api.init)(path.as_ptr(), &mut chunk_len, &mut num_sources) };
        let handle = NonNull::new(raw).ok_or_else(|| {
            SeparationError::ModelLoad(format!("native engine failed to initialize from {:?}", model_path))
        })?;

        let shape = match EngineShape::new(chunk_len.max(0) as usize, num_sources.max(0) as usize) {
            Ok(shape) => shape,
            Err(e) => {
                // SAFETY: handle came from a successful Init and is destroyed once.
                unsafe { (api.destroy)(handle.as_ptr()) };
                return Err(e);
            }
        };

        log::info!(
            "Native engine ready: chunk_len={}, num_sources={}",
            shape.chunk_len,
            shape.num_sources
        );

        Ok(Self {
            shape,
            handle,
            api,
            _library: lib,
        })
    }
}

unsafe fn symbol<'lib, T>(lib: &'lib Library, name: &[u8]) -> Result<libloading::Symbol<'lib, T>> {
    lib.get::<T>(name).map_err(|e| {
        SeparationError::ModelLoad(format!(
            "bridge library is missing {}: {}",
            String::from_utf8_lossy(&name[..name.len().saturating_sub(1)]),
            e
        ))
    })
}

impl InferenceEngine for BridgeEngine {
    fn shape(&self) -> EngineShape {
        self.shape
    }

    fn process(&mut self, input: &[f32], output: &mut [f32]) -> std::result::Result<(), InferenceError> {
        if input.len() != self.shape.input_len() || output.len() != self.shape.output_len() {
            return Err(InferenceError::new(
                InferenceStage::TransferIn,
                format!(
                    "window sizes {}/{} do not match engine {}/{}",
                    input.len(),
                    output.len(),
                    self.shape.input_len(),
                    self.shape.output_len()
                ),
            ));
        }

        // SAFETY: buffer sizes match the shape reported by Init; the engine
        // only reads from `input`.
        let status = unsafe {
            (self.api.process)(
                self.handle.as_ptr(),
                input.as_ptr().cast_mut(),
                output.as_mut_ptr(),
            )
        };

        match status {
            0 => Ok(()),
            code => Err(InferenceError::from_code(code)),
        }
    }

    fn name(&self) -> &'static str {
        "native-bridge"
    }
}

impl Drop for BridgeEngine {
    fn drop(&mut self) {
        log::debug!("Destroying native engine");
        // SAFETY: handle came from a successful Init and is destroyed once.
        unsafe { (self.api.destroy)(self.handle.as_ptr()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::ffi::CStr;

    const CHUNK_LEN: c_int = 8;
    const SOURCES: c_int = 4;

    // Each test drives the fake library from its own thread
    thread_local! {
        static DESTROY_CALLS: Cell<usize> = const { Cell::new(0) };
        static PROCESS_STATUS: Cell<c_int> = const { Cell::new(0) };
    }

    static HANDLE: u8 = 0;

    /// Init behaves according to the artifact name: `null.plan` fails,
    /// `empty.plan` reports no sources, anything else is 8 frames x 4 stems
    unsafe extern "C" fn fake_init(
        path: *const c_char,
        chunk_len: *mut c_int,
        num_sources: *mut c_int,
    ) -> *mut c_void {
        let path = unsafe { CStr::from_ptr(path) }.to_string_lossy().into_owned();
        if path.ends_with("null.plan") {
            return std::ptr::null_mut();
        }
        unsafe {
            *chunk_len = CHUNK_LEN;
            *num_sources = if path.ends_with("empty.plan") { 0 } else { SOURCES };
        }
        &HANDLE as *const u8 as *mut c_void
    }

    unsafe extern "C" fn fake_process(handle: *mut c_void, input: *mut f32, output: *mut f32) -> c_int {
        assert_eq!(handle as *const u8, &HANDLE as *const u8);
        let status = PROCESS_STATUS.with(Cell::get);
        if status != 0 {
            return status;
        }
        let window = (2 * CHUNK_LEN) as usize;
        let input = unsafe { std::slice::from_raw_parts(input, window) };
        let output = unsafe { std::slice::from_raw_parts_mut(output, window * SOURCES as usize) };
        for (stem, out) in output.chunks_mut(window).enumerate() {
            for (o, &i) in out.iter_mut().zip(input) {
                *o = i * (stem + 1) as f32;
            }
        }
        0
    }

    unsafe extern "C" fn fake_destroy(handle: *mut c_void) {
        assert_eq!(handle as *const u8, &HANDLE as *const u8);
        DESTROY_CALLS.with(|c| c.set(c.get() + 1));
    }

    fn fake_api() -> BridgeApi {
        BridgeApi {
            init: fake_init,
            process: fake_process,
            destroy: fake_destroy,
        }
    }

    #[cfg(unix)]
    fn this_library() -> Library {
        libloading::os::unix::Library::this().into()
    }

    #[cfg(windows)]
    fn this_library() -> Library {
        libloading::os::windows::Library::this().unwrap().into()
    }

    fn open(artifact: &str) -> Result<BridgeEngine> {
        BridgeEngine::init(this_library(), fake_api(), Path::new(artifact))
    }

    fn destroy_calls() -> usize {
        DESTROY_CALLS.with(Cell::get)
    }

    #[test]
    fn test_missing_model_checked_first() {
        let result = BridgeEngine::load(Path::new("libdoes-not-exist.so"), Path::new("/nonexistent/model.plan"));
        assert!(matches!(result, Err(SeparationError::ModelNotFound(_))));
    }

    #[test]
    fn test_missing_library_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("model.plan");
        std::fs::write(&model, b"plan").unwrap();

        let result = BridgeEngine::load(&dir.path().join("libmissing.so"), &model);
        assert!(matches!(result, Err(SeparationError::ModelLoad(_))));
    }

    #[test]
    fn test_failed_init_is_load_error() {
        assert!(matches!(open("null.plan"), Err(SeparationError::ModelLoad(_))));
        assert_eq!(destroy_calls(), 0);
    }

    #[test]
    fn test_empty_shape_destroys_handle_once() {
        assert!(open("empty.plan").is_err());
        assert_eq!(destroy_calls(), 1);
    }

    #[test]
    fn test_init_reports_shape_and_drop_destroys_once() {
        let engine = open("htdemucs.plan").unwrap();
        assert_eq!(engine.shape(), EngineShape::new(8, 4).unwrap());
        assert_eq!(engine.name(), "native-bridge");
        assert_eq!(destroy_calls(), 0);

        drop(engine);
        assert_eq!(destroy_calls(), 1);
    }

    #[test]
    fn test_process_fills_every_stem() {
        let mut engine = open("htdemucs.plan").unwrap();
        let shape = engine.shape();
        let input: Vec<f32> = (0..shape.input_len()).map(|i| i as f32).collect();
        let mut output = vec![0.0; shape.output_len()];

        engine.process(&input, &mut output).unwrap();
        assert_eq!(output[..16], input[..]);
        assert_eq!(output[48 + 3], 4.0 * 3.0);
    }

    #[test]
    fn test_status_codes_map_to_stages() {
        let mut engine = open("htdemucs.plan").unwrap();
        let input = vec![0.0; engine.shape().input_len()];
        let mut output = vec![0.0; engine.shape().output_len()];

        for (code, stage) in [
            (1, InferenceStage::TransferIn),
            (2, InferenceStage::Execute),
            (3, InferenceStage::TransferOut),
            (-1, InferenceStage::Unknown),
        ] {
            PROCESS_STATUS.with(|s| s.set(code));
            let err = engine.process(&input, &mut output).unwrap_err();
            assert_eq!(err.stage, stage);
            assert_eq!(err.code, code);
        }

        // A failed call leaves the engine usable
        PROCESS_STATUS.with(|s| s.set(0));
        assert!(engine.process(&input, &mut output).is_ok());
    }

    #[test]
    fn test_wrong_window_size_never_reaches_library() {
        let mut engine = open("htdemucs.plan").unwrap();
        PROCESS_STATUS.with(|s| s.set(2));
        let mut output = vec![0.0; engine.shape().output_len()];

        let err = engine.process(&[0.0; 3], &mut output).unwrap_err();
        assert_eq!(err.stage, InferenceStage::TransferIn);
    }
}
