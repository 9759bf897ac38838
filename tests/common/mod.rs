#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use imclip::embed::Embedder;
use imclip::error::{Error, Result};
use imclip::utils;
use imclip::vector::FeatureVector;
use opencv::core::{self, Mat, Scalar};

/// 以通道均值作为特征的模型替身
///
/// 记录调用次数；`gate` 置位后，第一次调用会阻塞直到 `release` 被置位。
#[derive(Default)]
pub struct CountingEmbedder {
    pub calls: AtomicUsize,
    pub gate: AtomicBool,
    pub started: AtomicBool,
    pub release: AtomicBool,
}

impl Embedder for CountingEmbedder {
    fn model_name(&self) -> &str {
        "counting"
    }

    fn device(&self) -> &str {
        "cpu"
    }

    fn embed(&self, image: &Mat) -> Result<FeatureVector> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.gate.load(Ordering::SeqCst) && !self.started.swap(true, Ordering::SeqCst) {
            while !self.release.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
        }
        let m = core::mean(image, &core::no_array())?;
        FeatureVector::normalized(vec![m.0[0] as f32 + 1., m.0[1] as f32 + 1., m.0[2] as f32 + 1.])
            .ok_or(Error::DegenerateFeature)
    }
}

/// 写入一张纯色 PNG
pub fn write_png(path: &Path, b: f64, g: f64, r: f64) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let img = Mat::new_rows_cols_with_default(32, 48, core::CV_8UC3, Scalar::new(b, g, r, 0.)).unwrap();
    assert!(utils::imwrite(path.to_str().unwrap(), &img).unwrap());
}

/// `n` 张颜色各不相同的图片
pub fn write_corpus(dir: &Path, n: usize) {
    for i in 0..n {
        let t = i as f64 / n.max(1) as f64;
        write_png(&dir.join(format!("img{i:02}.png")), 255. * t, 200. * (1. - t), 30. + 100. * t);
    }
}
