use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use log::{debug, info};
use opencv::core::{self, Mat, Rect, Scalar, Size, Vector};
use opencv::dnn;
use opencv::imgproc;
use opencv::prelude::*;

use crate::config::ModelOptions;
use crate::error::{Error, Result};
use crate::vector::FeatureVector;

/// CLIP 预处理使用的 RGB 均值与标准差
const CLIP_MEAN: [f64; 3] = [0.48145466, 0.4578275, 0.40821073];
const CLIP_STD: [f64; 3] = [0.26862954, 0.26130258, 0.27577711];

// NOTE: OpenCV 的 Net 不能跨线程共享，这里每个线程按模型路径懒加载一份
thread_local! {
    static NETS: RefCell<HashMap<PathBuf, dnn::Net>> = RefCell::new(HashMap::new());
}

/// 图片嵌入模型，将一张图片映射为一个单位向量
pub trait Embedder: Send + Sync {
    /// 模型名称，同时决定特征文件的文件名
    fn model_name(&self) -> &str;

    /// 推理设备
    fn device(&self) -> &str;

    /// 提取单张 BGR 图片的特征向量，结果已归一化
    fn embed(&self, image: &Mat) -> Result<FeatureVector>;
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        }
    }
}

/// 通过 OpenCV dnn 运行 ONNX 格式的图像编码器（如 CLIP 的视觉部分）
pub struct OnnxEmbedder {
    path: PathBuf,
    name: String,
    device: Device,
    input_size: i32,
}

impl OnnxEmbedder {
    pub fn new(path: impl AsRef<Path>, device: Device, input_size: i32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(Error::ModelInference(format!("模型文件不存在: {}", path.display())));
        }
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "model".to_string());
        info!("使用模型 {}，设备 {}", path.display(), device.as_str());
        Ok(Self { path, name, device, input_size })
    }

    pub fn from_options(opts: &ModelOptions) -> Result<Self> {
        let mut embedder = Self::new(&opts.model, opts.device, opts.input_size)?;
        if let Some(name) = &opts.model_name {
            embedder.name = name.clone();
        }
        Ok(embedder)
    }

    fn load_net(&self) -> Result<dnn::Net> {
        debug!("加载模型: {}", self.path.display());
        let path = self.path.to_string_lossy();
        let mut net = dnn::read_net_from_onnx(&path).map_err(inference_error)?;
        match self.device {
            Device::Cuda => {
                net.set_preferable_backend(dnn::DNN_BACKEND_CUDA)?;
                net.set_preferable_target(dnn::DNN_TARGET_CUDA)?;
            }
            Device::Cpu => {
                net.set_preferable_backend(dnn::DNN_BACKEND_OPENCV)?;
                net.set_preferable_target(dnn::DNN_TARGET_CPU)?;
            }
        }
        Ok(net)
    }

    /// CLIP 预处理：短边缩放、中心裁剪、BGR 转 RGB、按通道标准化
    fn preprocess(&self, image: &Mat) -> Result<Mat> {
        let side = self.input_size;
        let (w, h) = (image.cols(), image.rows());
        if w == 0 || h == 0 {
            return Err(Error::Decode("空图片".to_string()));
        }
        let scale = side as f64 / w.min(h) as f64;
        let size = Size::new(
            ((w as f64 * scale).round() as i32).max(side),
            ((h as f64 * scale).round() as i32).max(side),
        );
        let mut resized = Mat::default();
        imgproc::resize(image, &mut resized, size, 0., 0., imgproc::INTER_CUBIC)?;

        let roi = Rect::new((size.width - side) / 2, (size.height - side) / 2, side, side);
        let cropped = Mat::roi(&resized, roi)?.try_clone()?;

        let mut rgb = Mat::default();
        imgproc::cvt_color_def(&cropped, &mut rgb, imgproc::COLOR_BGR2RGB)?;

        let mut channels = Vector::<Mat>::new();
        core::split(&rgb, &mut channels)?;
        let mut normalized = Vector::<Mat>::new();
        for (i, ch) in channels.iter().enumerate() {
            let mut out = Mat::default();
            let alpha = 1. / (255. * CLIP_STD[i]);
            let beta = -CLIP_MEAN[i] / CLIP_STD[i];
            ch.convert_to(&mut out, core::CV_32F, alpha, beta)?;
            normalized.push(out);
        }
        let mut merged = Mat::default();
        core::merge(&normalized, &mut merged)?;

        Ok(dnn::blob_from_image(
            &merged,
            1.0,
            Size::new(side, side),
            Scalar::default(),
            false,
            false,
            core::CV_32F,
        )?)
    }
}

impl Embedder for OnnxEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn device(&self) -> &str {
        self.device.as_str()
    }

    fn embed(&self, image: &Mat) -> Result<FeatureVector> {
        let blob = self.preprocess(image)?;
        let output = NETS.with(|nets| -> Result<Mat> {
            let mut nets = nets.borrow_mut();
            if !nets.contains_key(&self.path) {
                let net = self.load_net()?;
                nets.insert(self.path.clone(), net);
            }
            let Some(net) = nets.get_mut(&self.path) else {
                return Err(Error::ModelInference("模型未加载".to_string()));
            };
            net.set_input(&blob, "", 1.0, Scalar::default()).map_err(inference_error)?;
            net.forward_single("").map_err(inference_error)
        })?;

        let raw = output.data_typed::<f32>().map_err(inference_error)?.to_vec();
        FeatureVector::normalized(raw)
            .ok_or_else(|| Error::ModelInference("模型输出为空或零向量".to_string()))
    }
}

fn inference_error(e: opencv::Error) -> Error {
    Error::ModelInference(e.to_string())
}
