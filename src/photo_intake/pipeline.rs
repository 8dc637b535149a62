//! # 压缩流水线模块
//!
//! ## 设计思路
//!
//! 将“字节 → 图像 → 缩小后的 JPEG 字节”的过程集中管理，并在关键节点增加资源上限控制。
//! 优先做尺寸检查，再进行完整解码，降低恶意输入触发高内存开销的风险。
//!
//! ## 实现思路
//!
//! 1. 猜测格式并读取 header 尺寸
//! 2. 按像素/内存上限快速拒绝
//! 3. 完整解码，并按 EXIF 方向摆正
//! 4. 根据配置自适应降采样
//! 5. 去除透明通道后以 JPEG 重新编码
//!
//! 压缩器本身无状态，参数来自调用方传入的配置快照；输入字节只读不改。

use std::io::Cursor;

use fast_image_resize as fr;
use image::codecs::jpeg::JpegEncoder;
use image::metadata::Orientation;
use image::{
    DynamicImage, GenericImageView, ImageBuffer, ImageDecoder, ImageFormat, ImageReader, Rgb,
    Rgba,
};

use super::config::ResizeFilter;
use super::source::CompressedImage;
use super::{ImageError, IngestConfig};

/// 压缩器抽象。
///
/// 同步接口：CPU 密集，由调用方放到阻塞线程池执行。
pub trait Compressor: Send + Sync + 'static {
    fn compress(&self, raw: &[u8], config: &IngestConfig) -> Result<CompressedImage, ImageError>;
}

/// 默认压缩器：降采样 + JPEG 重新编码。
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegCompressor;

impl Compressor for JpegCompressor {
    fn compress(&self, raw: &[u8], config: &IngestConfig) -> Result<CompressedImage, ImageError> {
        let format = image::guess_format(raw)
            .map_err(|e| ImageError::Compression(format!("不支持的图片格式：{}", e)))?;

        let (header_width, header_height) = inspect_dimensions_from_memory(raw)?;
        validate_pixel_limits(config, header_width, header_height)?;
        validate_decoded_memory_limits(config, header_width, header_height)?;

        let (decoded, orientation) = decode_oriented(raw)?;
        let (raw_width, raw_height) = decoded.dimensions();
        validate_pixel_limits(config, raw_width, raw_height)?;
        validate_decoded_memory_limits(config, raw_width, raw_height)?;

        let (optimized, resized) = maybe_downscale(decoded, config)?;
        let (width, height) = optimized.dimensions();

        // 已是 JPEG 且无需缩放/转向时，重新编码若更大则保留原字节
        let untouched_jpeg =
            format == ImageFormat::Jpeg && !resized && orientation == Orientation::NoTransforms;

        let encoded = encode_jpeg(&optimized, config.jpeg_quality)?;
        let bytes = if untouched_jpeg && encoded.len() >= raw.len() {
            raw.to_vec()
        } else {
            encoded
        };

        log::debug!(
            "🗜️ 压缩完成 - 格式: {:?} 尺寸: {}x{} -> {}x{} 体积: {}KB -> {}KB",
            format,
            raw_width,
            raw_height,
            width,
            height,
            raw.len() / 1024,
            bytes.len() / 1024
        );

        Ok(CompressedImage {
            bytes,
            mime: "image/jpeg",
            width,
            height,
            original_len: raw.len(),
        })
    }
}

/// 仅通过内存中的图片头信息读取宽高。
fn inspect_dimensions_from_memory(bytes: &[u8]) -> Result<(u32, u32), ImageError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ImageError::InvalidFormat(format!("无法识别图片格式：{}", e)))?;

    reader
        .into_dimensions()
        .map_err(|e| ImageError::InvalidFormat(format!("无法读取图片尺寸：{}", e)))
}

/// 完整解码并应用 EXIF 方向。
fn decode_oriented(bytes: &[u8]) -> Result<(DynamicImage, Orientation), ImageError> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ImageError::InvalidFormat(format!("无法识别图片格式：{}", e)))?
        .into_decoder()
        .map_err(|e| ImageError::Compression(format!("图片解码失败：{}", e)))?;

    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut image = DynamicImage::from_decoder(decoder)
        .map_err(|e| ImageError::Compression(format!("图片解码失败：{}", e)))?;
    image.apply_orientation(orientation);

    Ok((image, orientation))
}

/// 校验像素数量是否超过配置上限。
fn validate_pixel_limits(config: &IngestConfig, width: u32, height: u32) -> Result<(), ImageError> {
    let pixels = (width as u64)
        .checked_mul(height as u64)
        .ok_or_else(|| ImageError::ResourceLimit("图片像素数溢出".to_string()))?;

    if pixels > config.max_decoded_pixels {
        return Err(ImageError::ResourceLimit(format!(
            "图片像素过大：{} 像素（限制：{} 像素）",
            pixels, config.max_decoded_pixels
        )));
    }

    Ok(())
}

fn validate_decoded_memory_limits(
    config: &IngestConfig,
    width: u32,
    height: u32,
) -> Result<(), ImageError> {
    let estimated = (width as u64)
        .checked_mul(height as u64)
        .and_then(|pixels| pixels.checked_mul(4))
        .ok_or_else(|| ImageError::ResourceLimit("图片解码内存估算溢出".to_string()))?;

    if estimated > config.max_decoded_bytes {
        return Err(ImageError::ResourceLimit(format!(
            "图片解码预计内存过大：{:.2} MB（限制：{:.2} MB）",
            estimated as f64 / 1024.0 / 1024.0,
            config.max_decoded_bytes as f64 / 1024.0 / 1024.0
        )));
    }

    Ok(())
}

/// 按配置执行自适应降采样，返回（图像，是否缩放）。
fn maybe_downscale(
    image: DynamicImage,
    config: &IngestConfig,
) -> Result<(DynamicImage, bool), ImageError> {
    if !config.adaptive_resize {
        return Ok((image, false));
    }

    let (width, height) = image.dimensions();
    let source_pixels = (width as u64)
        .checked_mul(height as u64)
        .ok_or_else(|| ImageError::ResourceLimit("图片像素数溢出".to_string()))?;

    let over_dimension =
        width > config.target_max_dimension || height > config.target_max_dimension;
    let over_pixels = source_pixels > config.target_pixels;

    if !over_dimension && !over_pixels {
        return Ok((image, false));
    }

    let dimension_scale = (config.target_max_dimension as f64 / width as f64)
        .min(config.target_max_dimension as f64 / height as f64);
    let pixel_scale = (config.target_pixels as f64 / source_pixels as f64).sqrt();

    let scale = dimension_scale.min(pixel_scale).min(1.0);

    if scale <= 0.0 {
        return Err(ImageError::ResourceLimit("缩放比例计算异常".to_string()));
    }

    let target_width = ((width as f64 * scale).floor() as u32).max(1);
    let target_height = ((height as f64 * scale).floor() as u32).max(1);

    log::debug!(
        "🧩 自适应降采样：{}x{} -> {}x{}（filter={:?}）",
        width,
        height,
        target_width,
        target_height,
        config.resize_filter
    );

    match resize_with_fast_image_resize(&image, target_width, target_height, config.resize_filter) {
        Ok(resized) => Ok((resized, true)),
        Err(err) => {
            log::warn!(
                "⚠️ fast_image_resize 降采样失败，回退 image::resize_exact：{}",
                err
            );
            Ok((
                image.resize_exact(
                    target_width,
                    target_height,
                    config.resize_filter.to_image_filter(),
                ),
                true,
            ))
        }
    }
}

fn resize_with_fast_image_resize(
    image: &DynamicImage,
    target_width: u32,
    target_height: u32,
    filter: ResizeFilter,
) -> Result<DynamicImage, ImageError> {
    let src = image.to_rgba8();
    let (src_width, src_height) = src.dimensions();

    let src_image =
        fr::images::Image::from_vec_u8(src_width, src_height, src.into_raw(), fr::PixelType::U8x4)
            .map_err(|e| ImageError::Compression(format!("构建源图像缓冲失败：{}", e)))?;

    let mut dst_image = fr::images::Image::new(target_width, target_height, fr::PixelType::U8x4);

    let mut resizer = fr::Resizer::new();
    let options =
        fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(to_fast_filter(filter)));

    resizer
        .resize(&src_image, &mut dst_image, Some(&options))
        .map_err(|e| ImageError::Compression(format!("fast_image_resize 执行失败：{}", e)))?;

    let rgba = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(
        target_width,
        target_height,
        dst_image.into_vec(),
    )
    .ok_or_else(|| ImageError::Compression("fast_image_resize 输出缓冲长度异常".to_string()))?;

    Ok(DynamicImage::ImageRgba8(rgba))
}

fn to_fast_filter(filter: ResizeFilter) -> fr::FilterType {
    match filter {
        ResizeFilter::Nearest => fr::FilterType::Box,
        ResizeFilter::Triangle => fr::FilterType::Bilinear,
        ResizeFilter::CatmullRom => fr::FilterType::CatmullRom,
        ResizeFilter::Gaussian => fr::FilterType::Mitchell,
        ResizeFilter::Lanczos3 => fr::FilterType::Lanczos3,
    }
}

/// 透明像素压到白底后编码为 JPEG。
fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let rgb = if image.color().has_alpha() {
        let rgba = image.to_rgba8();
        ImageBuffer::from_fn(rgba.width(), rgba.height(), |x, y| {
            let Rgba([r, g, b, a]) = *rgba.get_pixel(x, y);
            let alpha = a as u32;
            let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha)) / 255) as u8;
            Rgb([blend(r), blend(g), blend(b)])
        })
    } else {
        image.to_rgb8()
    };

    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder
        .encode(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| ImageError::Compression(format!("JPEG 编码失败：{}", e)))?;

    Ok(buf)
}
