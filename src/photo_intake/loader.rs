//! # 本地加载与校验模块
//!
//! ## 设计思路
//!
//! 统一处理本地来源（文件路径 / 内存字节 / Base64）的原始字节加载，
//! 并在“尽可能早”的阶段执行输入校验，尽快失败，减少不必要的内存与 CPU 消耗。
//!
//! ## 实现思路
//!
//! - 文件：metadata 体积限制 → 异步读取（`tokio::fs`，读文件是挂起点）。
//! - 内存字节：体积限制。
//! - Base64：先按长度估算解码体积，再解码。
//! - 三者最后都做文件签名校验，非图片直接拒绝。

use std::path::Path;

use base64::{Engine as _, engine::general_purpose};

use super::preview::sniff_image_mime;
use super::source::{LocalSource, RawImageData};
use super::{ImageError, IngestConfig};

/// 按来源加载原始字节。
pub(crate) async fn load_local(
    source: LocalSource,
    config: &IngestConfig,
) -> Result<RawImageData, ImageError> {
    match source {
        LocalSource::Path(path) => load_from_file(&path, config).await,
        LocalSource::Bytes(bytes) => load_from_bytes(bytes, config),
        LocalSource::Base64(data) => load_from_base64(&data, config),
    }
}

/// 从本地路径加载图片原始字节。
pub(crate) async fn load_from_file(
    path: &Path,
    config: &IngestConfig,
) -> Result<RawImageData, ImageError> {
    log::debug!("📁 开始读取本地图片 - 路径: {}", path.display());

    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        ImageError::FileSystem(format!("无法读取文件信息：{}（{}）", path.display(), e))
    })?;

    if !metadata.is_file() {
        return Err(ImageError::FileSystem(format!(
            "不是普通文件：{}",
            path.display()
        )));
    }

    check_size(metadata.len(), config.max_file_size, "文件过大")?;

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ImageError::FileSystem(format!("无法读取图片文件：{}", e)))?;
    check_size(bytes.len() as u64, config.max_file_size, "文件过大")?;
    sniff_image_mime(&bytes)?;

    Ok(RawImageData {
        bytes,
        source_hint: "file",
    })
}

/// 从内存字节加载。
pub(crate) fn load_from_bytes(
    bytes: Vec<u8>,
    config: &IngestConfig,
) -> Result<RawImageData, ImageError> {
    check_size(bytes.len() as u64, config.max_file_size, "文件过大")?;
    sniff_image_mime(&bytes)?;

    Ok(RawImageData {
        bytes,
        source_hint: "memory",
    })
}

/// 从 Base64 字符串加载图片原始字节。
pub(crate) fn load_from_base64(
    data: &str,
    config: &IngestConfig,
) -> Result<RawImageData, ImageError> {
    let bytes = parse_base64_with_limit(data, config.max_file_size)?;

    check_size(bytes.len() as u64, config.max_file_size, "Base64 解码后体积过大")?;
    sniff_image_mime(&bytes)?;

    Ok(RawImageData {
        bytes,
        source_hint: "base64",
    })
}

fn check_size(len: u64, limit: u64, label: &str) -> Result<(), ImageError> {
    if len > limit {
        return Err(ImageError::ResourceLimit(format!(
            "{}：{:.2} MB（限制：{:.2} MB）",
            label,
            len as f64 / 1024.0 / 1024.0,
            limit as f64 / 1024.0 / 1024.0
        )));
    }
    Ok(())
}

fn estimate_base64_decoded_upper_bound_len(base64_data: &str) -> Result<u64, ImageError> {
    let len = base64_data.trim().len() as u64;
    let groups = len
        .checked_add(3)
        .ok_or_else(|| ImageError::ResourceLimit("Base64 输入长度溢出".to_string()))?
        / 4;

    groups
        .checked_mul(3)
        .ok_or_else(|| ImageError::ResourceLimit("Base64 解码体积估算溢出".to_string()))
}

/// 解析 Base64 输入（支持 Data URL / 纯 Base64），解码前先估算体积。
fn parse_base64_with_limit(data: &str, max_file_size: u64) -> Result<Vec<u8>, ImageError> {
    let normalized = data.trim();

    let payload = if normalized.starts_with("data:") {
        if !normalized.starts_with("data:image/") {
            return Err(ImageError::InvalidFormat("Data URL 不是图片类型".to_string()));
        }
        let base64_start = normalized
            .find(";base64,")
            .ok_or_else(|| ImageError::InvalidFormat("缺少 base64 标记".to_string()))?;
        &normalized[base64_start + 8..]
    } else {
        normalized
    };

    let estimated_len = estimate_base64_decoded_upper_bound_len(payload)?;
    check_size(estimated_len, max_file_size, "Base64 预计解码体积过大")?;

    general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| ImageError::InvalidFormat(format!("Base64 解码失败：{}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    const PNG_HEADER: &[u8] = &[0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 0x0d];

    fn unique_temp_dir() -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock error")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("listing-photos-loader-{nanos}"));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn base64_rejects_non_image_payload() {
        let config = IngestConfig::default();
        let encoded = general_purpose::STANDARD.encode(b"hello world");
        let result = load_from_base64(&encoded, &config);
        assert!(matches!(result, Err(ImageError::InvalidFormat(_))));
    }

    #[test]
    fn base64_accepts_data_url_and_plain() {
        let config = IngestConfig::default();
        let encoded = general_purpose::STANDARD.encode(PNG_HEADER);

        let plain = load_from_base64(&encoded, &config).expect("plain base64");
        assert_eq!(plain.bytes, PNG_HEADER);

        let data_url = format!("data:image/png;base64,{}", encoded);
        let from_url = load_from_base64(&data_url, &config).expect("data url");
        assert_eq!(from_url.source_hint, "base64");
        assert_eq!(from_url.bytes, PNG_HEADER);
    }

    #[test]
    fn base64_rejects_non_image_data_url() {
        let config = IngestConfig::default();
        let result = load_from_base64("data:text/plain;base64,aGVsbG8=", &config);
        assert!(matches!(result, Err(ImageError::InvalidFormat(_))));
    }

    #[test]
    fn base64_limit_applies_before_decode() {
        let data = "A".repeat(4096);
        let result = parse_base64_with_limit(&data, 1024);
        assert!(matches!(result, Err(ImageError::ResourceLimit(_))));
    }

    #[test]
    fn bytes_over_limit_are_rejected() {
        let config = IngestConfig {
            max_file_size: 4,
            ..IngestConfig::default()
        };
        let result = load_from_bytes(PNG_HEADER.to_vec(), &config);
        assert!(matches!(result, Err(ImageError::ResourceLimit(_))));
    }

    #[tokio::test]
    async fn file_loading_checks_existence_and_signature() {
        let config = IngestConfig::default();
        let dir = unique_temp_dir();

        let missing = load_from_file(&dir.join("missing.png"), &config).await;
        assert!(matches!(missing, Err(ImageError::FileSystem(_))));

        let text = dir.join("notes.png");
        std::fs::write(&text, b"just some text").expect("write text");
        let not_image = load_from_file(&text, &config).await;
        assert!(matches!(not_image, Err(ImageError::InvalidFormat(_))));

        let png = dir.join("real.png");
        std::fs::write(&png, PNG_HEADER).expect("write png");
        let loaded = load_from_file(&png, &config).await.expect("load png");
        assert_eq!(loaded.source_hint, "file");
        assert_eq!(loaded.bytes, PNG_HEADER);

        let _ = std::fs::remove_dir_all(dir);
    }
}
