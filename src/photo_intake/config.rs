//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有“可调策略”集中到 `IngestConfig`，保证运行时行为可观测、可调整、可测试。
//! 压缩档位（quality / balanced / speed）作为高层语义，映射到底层参数组合。
//!
//! ## 实现思路
//!
//! - `Default` 提供生产可用的平衡配置。
//! - 结构体整体可 `serde` 序列化，字段缺省时回落到默认值，便于配置文件增量演进。
//! - `validate` 集中做取值范围校验，避免非法配置流入流水线。
//! - `CompressionProfile` 负责档位字符串解析、应用与反推。

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use super::ImageError;

/// 降采样滤镜（可序列化的 `FilterType` 映射）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl ResizeFilter {
    pub(crate) fn to_image_filter(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Triangle => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Gaussian => FilterType::Gaussian,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// 预览句柄生成方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewMode {
    /// 内联 `data:` URI，无需释放。
    DataUri,
    /// 注册到 `PreviewRegistry` 的 `blob:` 句柄，随图片项释放。
    ObjectUrl,
}

/// 容量策略选择。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityMode {
    /// 按账户档位决定上限。
    Tier,
    /// 旧行为：按当前数量决定上限，仅用于兼容性对比。
    LegacyCount,
}

/// 图片收集配置。
///
/// 字段覆盖了读取、压缩、预览、容量与远程下载五个阶段。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// 读取/下载原始字节时允许的最大文件体积（字节）。
    pub max_file_size: u64,
    /// 解码后的像素上限（`width * height`）。
    pub max_decoded_pixels: u64,
    /// 解码阶段允许的预计内存上限（按 RGBA 估算，字节）。
    pub max_decoded_bytes: u64,
    /// 是否启用自适应降采样。
    pub adaptive_resize: bool,
    /// 压缩后宽/高单边最大值。
    pub target_max_dimension: u32,
    /// 压缩后目标像素上限。
    pub target_pixels: u64,
    /// 降采样滤镜策略。
    pub resize_filter: ResizeFilter,
    /// JPEG 重新编码质量（1~100）。
    pub jpeg_quality: u8,
    /// 预览句柄生成方式。
    pub preview_mode: PreviewMode,
    /// 容量策略。
    pub capacity_mode: CapacityMode,
    /// 基础档位上限。
    pub base_tier_limit: usize,
    /// 升级档位上限。
    pub elevated_tier_limit: usize,
    /// 网络下载超时时间（秒）。
    pub download_timeout: u64,
    /// 建立连接（TCP/TLS）超时时间（秒）。
    pub connect_timeout: u64,
    /// 下载首包超时时间（毫秒）。
    pub stream_first_byte_timeout_ms: u64,
    /// 下载分块读取超时时间（毫秒）。
    pub stream_chunk_timeout_ms: u64,
    /// 最大重定向次数。
    pub max_redirects: usize,
    /// 是否允许访问内网或本地地址（默认关闭，防 SSRF）。
    pub allow_private_network: bool,
    /// 是否对域名执行 DNS 解析后再做内网 IP 拦截。
    pub resolve_dns_for_url_safety: bool,
    /// 下载缓存条目上限（0 表示关闭缓存）。
    pub fetch_cache_entries: usize,
    /// 下载缓存存活时间（秒）。
    pub fetch_cache_ttl_secs: u64,
    /// 远程搜索每页条数。
    pub search_per_page: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_file_size: 25 * 1024 * 1024,
            max_decoded_pixels: 40_000_000,
            max_decoded_bytes: 160 * 1024 * 1024,
            adaptive_resize: true,
            target_max_dimension: 1600,
            target_pixels: 2_000_000,
            resize_filter: ResizeFilter::Triangle,
            jpeg_quality: 82,
            preview_mode: PreviewMode::DataUri,
            capacity_mode: CapacityMode::Tier,
            base_tier_limit: 2,
            elevated_tier_limit: 5,
            download_timeout: 30,
            connect_timeout: 8,
            stream_first_byte_timeout_ms: 10_000,
            stream_chunk_timeout_ms: 15_000,
            max_redirects: 5,
            allow_private_network: false,
            resolve_dns_for_url_safety: true,
            fetch_cache_entries: 24,
            fetch_cache_ttl_secs: 25,
            search_per_page: 20,
        }
    }
}

impl IngestConfig {
    /// 校验配置取值范围。
    pub fn validate(&self) -> Result<(), ImageError> {
        if self.max_file_size == 0 {
            return Err(ImageError::Config("max_file_size 不能为 0".to_string()));
        }
        if self.max_decoded_bytes < 8 * 1024 * 1024 {
            return Err(ImageError::Config("max_decoded_bytes 不能小于 8MB".to_string()));
        }
        if self.max_decoded_pixels == 0 || self.target_pixels == 0 {
            return Err(ImageError::Config("像素上限不能为 0".to_string()));
        }
        if self.target_max_dimension < 16 {
            return Err(ImageError::Config("target_max_dimension 不能小于 16".to_string()));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ImageError::Config("jpeg_quality 必须在 1~100 之间".to_string()));
        }
        if self.base_tier_limit == 0 {
            return Err(ImageError::Config("base_tier_limit 不能为 0".to_string()));
        }
        if self.base_tier_limit > self.elevated_tier_limit {
            return Err(ImageError::Config(
                "base_tier_limit 不能大于 elevated_tier_limit".to_string(),
            ));
        }
        if !(1..=120).contains(&self.connect_timeout) {
            return Err(ImageError::Config("connect_timeout 必须在 1~120 秒之间".to_string()));
        }
        if !(1..=600).contains(&self.download_timeout) {
            return Err(ImageError::Config("download_timeout 必须在 1~600 秒之间".to_string()));
        }
        if !(500..=120_000).contains(&self.stream_first_byte_timeout_ms) {
            return Err(ImageError::Config(
                "stream_first_byte_timeout_ms 必须在 500~120000 毫秒之间".to_string(),
            ));
        }
        if !(500..=120_000).contains(&self.stream_chunk_timeout_ms) {
            return Err(ImageError::Config(
                "stream_chunk_timeout_ms 必须在 500~120000 毫秒之间".to_string(),
            ));
        }
        if self.max_redirects > 20 {
            return Err(ImageError::Config("max_redirects 不能超过 20".to_string()));
        }
        if !(1..=100).contains(&self.search_per_page) {
            return Err(ImageError::Config("search_per_page 必须在 1~100 之间".to_string()));
        }

        Ok(())
    }

    /// 基于当前参数反推压缩档位。
    pub fn infer_compression_profile(&self) -> CompressionProfile {
        if !self.adaptive_resize || self.target_max_dimension >= 4096 {
            return CompressionProfile::Quality;
        }

        if self.target_pixels <= 1_000_000 || self.target_max_dimension <= 1280 {
            return CompressionProfile::Speed;
        }

        CompressionProfile::Balanced
    }

    /// 应用指定压缩档位到实际参数。
    pub fn apply_compression_profile(&mut self, profile: CompressionProfile) {
        match profile {
            CompressionProfile::Quality => {
                self.adaptive_resize = true;
                self.target_max_dimension = 4096;
                self.target_pixels = 12_000_000;
                self.jpeg_quality = 92;
                self.resize_filter = ResizeFilter::CatmullRom;
            }
            CompressionProfile::Balanced => {
                self.adaptive_resize = true;
                self.target_max_dimension = 1600;
                self.target_pixels = 2_000_000;
                self.jpeg_quality = 82;
                self.resize_filter = ResizeFilter::Triangle;
            }
            CompressionProfile::Speed => {
                self.adaptive_resize = true;
                self.target_max_dimension = 1024;
                self.target_pixels = 800_000;
                self.jpeg_quality = 70;
                self.resize_filter = ResizeFilter::Nearest;
            }
        }
    }
}

/// 压缩档位（面向产品/用户语义）。
///
/// - `Quality`：尽量保真
/// - `Balanced`：体积与清晰度平衡
/// - `Speed`：优先上传体积
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionProfile {
    Quality,
    Balanced,
    Speed,
}

impl CompressionProfile {
    /// 从外部字符串解析档位。
    pub fn parse(profile: &str) -> Result<Self, ImageError> {
        match profile.trim().to_lowercase().as_str() {
            "quality" => Ok(Self::Quality),
            "balanced" => Ok(Self::Balanced),
            "speed" => Ok(Self::Speed),
            other => Err(ImageError::Config(format!(
                "未知压缩档位：{}（可选：quality / balanced / speed）",
                other
            ))),
        }
    }

    /// 将档位输出为稳定字符串，供前端展示与持久化。
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Balanced => "balanced",
            Self::Speed => "speed",
        }
    }
}
