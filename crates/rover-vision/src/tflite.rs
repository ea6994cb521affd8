use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use std::{ffi::CString, os::raw::{c_char, c_int, c_void}, ptr};
use tracing::info;

use crate::{nms_filter, postprocess_ultralytics, postprocess_yolov8, Detection, Detector, Frame, VisionConfig};

#[repr(C)]
struct TfLiteModel;
#[repr(C)]
struct TfLiteInterpreterOptions;
#[repr(C)]
struct TfLiteInterpreter;
#[repr(C)]
struct TfLiteTensor;
#[repr(C)]
struct TfLiteDelegate;

#[link(name = "tensorflowlite_c")]
extern "C" {
    fn TfLiteModelCreateFromFile(model_path: *const c_char) -> *mut TfLiteModel;
    fn TfLiteModelDelete(model: *mut TfLiteModel);

    fn TfLiteInterpreterOptionsCreate() -> *mut TfLiteInterpreterOptions;
    fn TfLiteInterpreterOptionsDelete(options: *mut TfLiteInterpreterOptions);
    fn TfLiteInterpreterOptionsSetNumThreads(options: *mut TfLiteInterpreterOptions, num_threads: c_int);
    #[allow(dead_code)]
    fn TfLiteInterpreterOptionsAddDelegate(options: *mut TfLiteInterpreterOptions, delegate: *mut TfLiteDelegate);

    fn TfLiteInterpreterCreate(model: *const TfLiteModel, options: *const TfLiteInterpreterOptions) -> *mut TfLiteInterpreter;
    fn TfLiteInterpreterDelete(interpreter: *mut TfLiteInterpreter);

    fn TfLiteInterpreterAllocateTensors(interpreter: *mut TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterInvoke(interpreter: *mut TfLiteInterpreter) -> c_int;

    fn TfLiteInterpreterGetInputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *mut TfLiteTensor;
    fn TfLiteInterpreterGetOutputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *const TfLiteTensor;

    fn TfLiteTensorData(tensor: *const TfLiteTensor) -> *mut c_void;
    fn TfLiteTensorByteSize(tensor: *const TfLiteTensor) -> usize;

    fn TfLiteTensorNumDims(tensor: *const TfLiteTensor) -> c_int;
    fn TfLiteTensorDim(tensor: *const TfLiteTensor, dim_index: c_int) -> c_int;
}

#[cfg(feature = "vision-coral")]
#[link(name = "edgetpu")]
extern "C" {
    fn edgetpu_create_delegate(device_type: c_int, device_path: *const c_char, options: *const c_char) -> *mut TfLiteDelegate;
    fn edgetpu_free_delegate(delegate: *mut TfLiteDelegate);
}

/// YOLO object detector on the TFLite C API, optionally on a Coral EdgeTPU.
pub struct TfliteDetector {
    cfg: VisionConfig,
    model: *mut TfLiteModel,
    opts: *mut TfLiteInterpreterOptions,
    interp: *mut TfLiteInterpreter,
    #[cfg(feature = "vision-coral")]
    delegate: Option<*mut TfLiteDelegate>,
}

// The interpreter is only ever touched through &mut self.
unsafe impl Send for TfliteDetector {}

impl TfliteDetector {
    pub fn new(cfg: VisionConfig) -> Result<Self> {
        let model_path = if cfg.use_coral { cfg.model_path_edgetpu.clone() } else { cfg.model_path.clone() };
        let cpath = CString::new(model_path.as_str())?;

        #[cfg(not(feature = "vision-coral"))]
        if cfg.use_coral {
            anyhow::bail!("vision.use_coral=true but binary not built with --features vision-coral");
        }

        // Every handle goes into `det` as soon as it exists, so Drop frees
        // whatever was created when a later step fails.
        let mut det = Self {
            cfg,
            model: ptr::null_mut(),
            opts: ptr::null_mut(),
            interp: ptr::null_mut(),
            #[cfg(feature = "vision-coral")]
            delegate: None,
        };

        det.model = unsafe { TfLiteModelCreateFromFile(cpath.as_ptr()) };
        anyhow::ensure!(!det.model.is_null(), "failed to load tflite model: {}", model_path);

        det.opts = unsafe { TfLiteInterpreterOptionsCreate() };
        anyhow::ensure!(!det.opts.is_null(), "failed to create tflite options");
        unsafe { TfLiteInterpreterOptionsSetNumThreads(det.opts, 4); }

        #[cfg(feature = "vision-coral")]
        if det.cfg.use_coral {
            let d = unsafe { edgetpu_create_delegate(0, ptr::null(), ptr::null()) };
            anyhow::ensure!(!d.is_null(), "failed to create EdgeTPU delegate");
            det.delegate = Some(d);
            unsafe { TfLiteInterpreterOptionsAddDelegate(det.opts, d); }
        }

        det.interp = unsafe { TfLiteInterpreterCreate(det.model, det.opts) };
        anyhow::ensure!(!det.interp.is_null(), "failed to create tflite interpreter");

        let rc = unsafe { TfLiteInterpreterAllocateTensors(det.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterAllocateTensors failed");

        info!(
            "vision: loaded TFLite model {} (layout={}, input={})",
            model_path, det.cfg.output_layout, det.cfg.input_type
        );
        Ok(det)
    }

    pub fn inspect(&mut self) -> Result<String> {
        let input = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        anyhow::ensure!(!input.is_null(), "no input tensor");
        let in_dims = tensor_dims(input);
        let in_bytes = unsafe { TfLiteTensorByteSize(input) };

        let out0 = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, 0) };
        anyhow::ensure!(!out0.is_null(), "no output tensor 0");
        let out_dims = tensor_dims(out0);
        let out_bytes = unsafe { TfLiteTensorByteSize(out0) };

        Ok(format!(
            "TFLite inspect:\n- input[0] dims={:?} bytes={}\n- output[0] dims={:?} bytes={}\n",
            in_dims, in_bytes, out_dims, out_bytes
        ))
    }

    fn fill_input(&mut self, frame: &Frame) -> Result<()> {
        let resized = imageops::resize(&frame.image, self.cfg.img_w, self.cfg.img_h, FilterType::Triangle);
        let pixels = resized.as_raw();

        let input = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        anyhow::ensure!(!input.is_null(), "no input tensor");
        let in_bytes = unsafe { TfLiteTensorByteSize(input) };
        let in_ptr = unsafe { TfLiteTensorData(input) };
        anyhow::ensure!(!in_ptr.is_null(), "null input tensor data");

        match self.cfg.input_type.as_str() {
            "u8" => {
                anyhow::ensure!(in_bytes >= pixels.len(), "input tensor too small: {} < {}", in_bytes, pixels.len());
                unsafe { ptr::copy_nonoverlapping(pixels.as_ptr(), in_ptr as *mut u8, pixels.len()); }
            }
            "f32" => {
                let need = pixels.len() * std::mem::size_of::<f32>();
                anyhow::ensure!(in_bytes >= need, "input tensor too small: {} < {}", in_bytes, need);
                let dst = unsafe { std::slice::from_raw_parts_mut(in_ptr as *mut f32, pixels.len()) };
                for (d, p) in dst.iter_mut().zip(pixels) {
                    *d = *p as f32 / 255.0;
                }
            }
            other => anyhow::bail!("unsupported vision.input_type: {}", other),
        }
        Ok(())
    }
}

impl Detector for TfliteDetector {
    fn name(&self) -> &'static str {
        if self.cfg.use_coral { "tflite-edgetpu" } else { "tflite" }
    }

    fn detect(&mut self, frame: &Frame, conf_threshold: f32) -> Result<Vec<Detection>> {
        self.fill_input(frame).context("prepare input tensor")?;

        let rc = unsafe { TfLiteInterpreterInvoke(self.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterInvoke failed");

        let out = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, 0) };
        anyhow::ensure!(!out.is_null(), "no output tensor 0");
        let out_dims = tensor_dims(out);

        let out_ptr = unsafe { TfLiteTensorData(out) as *const f32 };
        anyhow::ensure!(!out_ptr.is_null(), "null output tensor data");
        let out_len = unsafe { TfLiteTensorByteSize(out) } / std::mem::size_of::<f32>();
        let raw = unsafe { std::slice::from_raw_parts(out_ptr, out_len) };

        let nc = self.cfg.num_classes;
        let dets = match (self.cfg.output_layout.as_str(), out_dims.as_slice()) {
            ("yolov8", [1, rows, n]) | ("yolov8", [rows, n]) => {
                anyhow::ensure!(*rows as usize == 4 + nc, "yolov8 rows {} != 4 + {} classes (dims {:?})", rows, nc, out_dims);
                postprocess_yolov8(raw, *n as usize, nc, conf_threshold)
            }
            ("ultralytics", [1, n, stride]) | ("ultralytics", [n, stride]) => {
                anyhow::ensure!(*stride as usize == 5 + nc, "stride {} != 5 + {} classes (dims {:?})", stride, nc, out_dims);
                postprocess_ultralytics(raw, *n as usize, nc, conf_threshold)
            }
            (layout, dims) => anyhow::bail!(
                "output dims {:?} do not fit layout {}. Run `rover vision inspect` to view tensors.",
                dims, layout
            ),
        };

        Ok(nms_filter(dets, self.cfg.nms_iou_threshold, self.cfg.max_detections)
            .iter()
            .map(|d| d.to_pixels(frame.width(), frame.height()))
            .collect())
    }
}

fn tensor_dims(t: *const TfLiteTensor) -> Vec<i32> {
    unsafe {
        let nd = TfLiteTensorNumDims(t);
        (0..nd).map(|i| TfLiteTensorDim(t, i)).collect()
    }
}

impl Drop for TfliteDetector {
    fn drop(&mut self) {
        unsafe {
            if !self.interp.is_null() { TfLiteInterpreterDelete(self.interp); }
            if !self.opts.is_null() { TfLiteInterpreterOptionsDelete(self.opts); }
            if !self.model.is_null() { TfLiteModelDelete(self.model); }
        }
        #[cfg(feature = "vision-coral")]
        unsafe {
            if let Some(d) = self.delegate {
                edgetpu_free_delegate(d);
            }
        }
    }
}
