use std::fs;
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use indicatif::ProgressStyle;
use opencv::core::{self, Mat, Vector};
use opencv::prelude::*;
use opencv::{imgcodecs, imgproc};

use crate::error::{Error, Result};

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .unwrap()
        .progress_chars("#>-")
}

/// 将图片字节解码为 8 位三通道 BGR 图像
pub fn imdecode(bytes: &[u8]) -> Result<Mat> {
    let buf = Vector::<u8>::from_slice(bytes);
    let img = imgcodecs::imdecode(&buf, imgcodecs::IMREAD_COLOR)
        .map_err(|e| Error::Decode(e.to_string()))?;
    if img.empty() {
        return Err(Error::Decode("不支持的格式或文件已损坏".to_string()));
    }
    to_bgr(img)
}

/// 统一为 8 位 BGR 格式，灰度图和带透明通道的图片会被转换
pub fn to_bgr(img: Mat) -> Result<Mat> {
    let code = match img.channels() {
        3 => return Ok(img),
        1 => imgproc::COLOR_GRAY2BGR,
        4 => imgproc::COLOR_BGRA2BGR,
        n => return Err(Error::Decode(format!("不支持的通道数: {n}"))),
    };
    let mut out = Mat::default();
    imgproc::cvt_color_def(&img, &mut out, code)?;
    Ok(out)
}

pub fn imwrite(filename: &str, img: &impl core::ToInputArray) -> Result<bool> {
    let flags = Vector::<i32>::new();
    Ok(imgcodecs::imwrite(filename, img, &flags)?)
}

/// 根据文件头判断图片格式
pub fn sniff_format(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some("JPEG"),
        [0x89, b'P', b'N', b'G', ..] => Some("PNG"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("WEBP"),
        [b'G', b'I', b'F', b'8', ..] => Some("GIF"),
        [b'B', b'M', ..] => Some("BMP"),
        [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => Some("TIFF"),
        _ => None,
    }
}

/// 文件创建时间，平台不支持时退回到修改时间
pub fn file_created(path: &Path) -> Result<String> {
    let meta = fs::metadata(path)?;
    let time = meta.created().or_else(|_| meta.modified()).unwrap_or(SystemTime::UNIX_EPOCH);
    Ok(format_time(time))
}

pub fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time).format("%Y-%m-%d %H:%M:%S").to_string()
}
