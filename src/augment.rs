use opencv::core::{self, Mat, Size, Vector};
use opencv::imgproc;
use opencv::prelude::*;

use crate::error::Result;

/// 开启增强时生成的图片数量（含原图）
pub const AUGMENTED_COUNT: usize = 6;

const CLAHE_CLIP_LIMIT: f64 = 3.0;
const CLAHE_TILE: i32 = 8;
const BLUR_KERNEL: i32 = 3;
const DARKEN: (f64, f64) = (0.9, 0.);
const BRIGHTEN: (f64, f64) = (1.1, 10.);

/// 由一张 BGR 图片生成固定顺序的增强版本
///
/// 顺序为：原图、Lab 亮度通道 CLAHE、YUV 亮度通道直方图均衡、3x3 高斯模糊、变暗、变亮。
/// 所有版本与原图尺寸、通道数一致。`enabled` 为 false 时只返回原图。
pub fn augment(image: &Mat, enabled: bool) -> Result<Vec<Mat>> {
    let mut images = Vec::with_capacity(AUGMENTED_COUNT);
    images.push(image.try_clone()?);
    if !enabled {
        return Ok(images);
    }
    images.push(local_contrast(image)?);
    images.push(equalize(image)?);
    images.push(denoise(image)?);
    images.push(scale_brightness(image, DARKEN)?);
    images.push(scale_brightness(image, BRIGHTEN)?);
    Ok(images)
}

/// 在 Lab 空间的 L 通道上做自适应直方图均衡
fn local_contrast(image: &Mat) -> Result<Mat> {
    let mut lab = Mat::default();
    imgproc::cvt_color_def(image, &mut lab, imgproc::COLOR_BGR2Lab)?;

    let mut channels = Vector::<Mat>::new();
    core::split(&lab, &mut channels)?;

    let mut clahe = imgproc::create_clahe(CLAHE_CLIP_LIMIT, Size::new(CLAHE_TILE, CLAHE_TILE))?;
    let mut l = Mat::default();
    clahe.apply(&channels.get(0)?, &mut l)?;
    channels.set(0, l)?;

    let mut merged = Mat::default();
    core::merge(&channels, &mut merged)?;
    let mut out = Mat::default();
    imgproc::cvt_color_def(&merged, &mut out, imgproc::COLOR_Lab2BGR)?;
    Ok(out)
}

/// 对 YUV 空间的 Y 通道做全局直方图均衡
fn equalize(image: &Mat) -> Result<Mat> {
    let mut yuv = Mat::default();
    imgproc::cvt_color_def(image, &mut yuv, imgproc::COLOR_BGR2YUV)?;

    let mut channels = Vector::<Mat>::new();
    core::split(&yuv, &mut channels)?;

    let mut y = Mat::default();
    imgproc::equalize_hist(&channels.get(0)?, &mut y)?;
    channels.set(0, y)?;

    let mut merged = Mat::default();
    core::merge(&channels, &mut merged)?;
    let mut out = Mat::default();
    imgproc::cvt_color_def(&merged, &mut out, imgproc::COLOR_YUV2BGR)?;
    Ok(out)
}

fn denoise(image: &Mat) -> Result<Mat> {
    let mut out = Mat::default();
    imgproc::gaussian_blur_def(image, &mut out, Size::new(BLUR_KERNEL, BLUR_KERNEL), 0.)?;
    Ok(out)
}

/// `saturate(|alpha * x + beta|)`
fn scale_brightness(image: &Mat, (alpha, beta): (f64, f64)) -> Result<Mat> {
    let mut out = Mat::default();
    core::convert_scale_abs(image, &mut out, alpha, beta)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use opencv::core::{CV_8UC3, Scalar};

    use super::*;

    fn gradient(rows: i32, cols: i32) -> Mat {
        let mut img = Mat::new_rows_cols_with_default(rows, cols, CV_8UC3, Scalar::all(0.)).unwrap();
        for r in 0..rows {
            for c in 0..cols {
                let px = img.at_2d_mut::<core::Vec3b>(r, c).unwrap();
                *px = core::VecN([(r * 4) as u8, (c * 3) as u8, ((r + c) * 2) as u8]);
            }
        }
        img
    }

    #[test]
    fn test_augment_count_and_shape() {
        let img = gradient(30, 50);
        let images = augment(&img, true).unwrap();
        assert_eq!(images.len(), AUGMENTED_COUNT);
        for im in &images {
            assert_eq!((im.rows(), im.cols(), im.channels()), (30, 50, 3));
            assert_eq!(im.depth(), core::CV_8U);
        }
    }

    #[test]
    fn test_augment_disabled_is_original() {
        let img = gradient(10, 10);
        let images = augment(&img, false).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].data_bytes().unwrap(), img.data_bytes().unwrap());
    }

    #[test]
    fn test_augment_deterministic() {
        let img = gradient(20, 20);
        let a = augment(&img, true).unwrap();
        let b = augment(&img, true).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.data_bytes().unwrap(), y.data_bytes().unwrap());
        }
    }

    #[test]
    fn test_brightness() {
        let img = Mat::new_rows_cols_with_default(2, 2, CV_8UC3, Scalar::all(100.)).unwrap();
        let images = augment(&img, true).unwrap();
        assert_eq!(images[4].at_2d::<core::Vec3b>(0, 0).unwrap().0[0], 90);
        assert_eq!(images[5].at_2d::<core::Vec3b>(0, 0).unwrap().0[0], 120);
    }
}
