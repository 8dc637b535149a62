//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 使用单一错误枚举承载图片收集链路中的所有错误来源，避免字符串拼接式错误处理。
//! 通过 `thiserror` 保持人类可读错误，同时让调用侧可按分支匹配。
//!
//! ## 错误分级
//!
//! - 批次级：`CapacityExceeded`，整批拒绝，不做任何提交
//! - 单项级：`Compression` / `Fetch` / `Timeout` 等，只丢弃该项，兄弟项不受影响
//! - 调用方错误：`UnknownItem` / `DuplicateItem`，正确的 UI 接线下不应出现

use super::image_set::ImageId;

/// 图片收集统一错误类型。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    #[error("图片数量超出上限：本次 {requested} 张，剩余可用 {available} 张")]
    CapacityExceeded { requested: usize, available: usize },

    #[error("压缩失败：{0}")]
    Compression(String),

    #[error("远程图片获取失败：{0}")]
    Fetch(String),

    #[error("图片不存在：{0}")]
    UnknownItem(ImageId),

    #[error("图片标识重复：{0}")]
    DuplicateItem(ImageId),

    #[error("格式错误：{0}")]
    InvalidFormat(String),

    #[error("文件错误：{0}")]
    FileSystem(String),

    #[error("超时错误：{0}")]
    Timeout(String),

    #[error("资源限制：{0}")]
    ResourceLimit(String),

    #[error("配置错误：{0}")]
    Config(String),
}

impl ImageError {
    /// 稳定错误码，供 UI 层统计与展示。
    pub fn code(&self) -> &'static str {
        match self {
            Self::CapacityExceeded { .. } => "E_CAPACITY",
            Self::Compression(_) => "E_COMPRESSION",
            Self::Fetch(_) => "E_FETCH",
            Self::UnknownItem(_) => "E_UNKNOWN_ITEM",
            Self::DuplicateItem(_) => "E_DUPLICATE_ITEM",
            Self::InvalidFormat(_) => "E_INVALID_FORMAT",
            Self::FileSystem(_) => "E_FILESYSTEM",
            Self::Timeout(_) => "E_TIMEOUT",
            Self::ResourceLimit(_) => "E_RESOURCE_LIMIT",
            Self::Config(_) => "E_CONFIG",
        }
    }

    /// 错误发生的流水线阶段。
    pub fn stage(&self) -> &'static str {
        match self {
            Self::CapacityExceeded { .. } => "capacity",
            Self::Compression(_) | Self::ResourceLimit(_) => "compress",
            Self::Fetch(_) | Self::Timeout(_) => "fetch",
            Self::InvalidFormat(_) | Self::FileSystem(_) => "load",
            Self::UnknownItem(_) | Self::DuplicateItem(_) => "commit",
            Self::Config(_) => "config",
        }
    }

    /// 单项失败是否只影响该项本身（不终止批次）。
    pub fn is_per_item(&self) -> bool {
        !matches!(
            self,
            Self::CapacityExceeded { .. } | Self::Config(_) | Self::UnknownItem(_)
        )
    }

    /// 将解码/缩放阶段的错误统一归入 `Compression`。
    pub(crate) fn into_compression(self) -> Self {
        match self {
            Self::InvalidFormat(msg) | Self::ResourceLimit(msg) => Self::Compression(msg),
            other => other,
        }
    }

    /// 将网络阶段的错误统一归入 `Fetch`（超时保留原分类）。
    pub(crate) fn into_fetch(self) -> Self {
        match self {
            Self::InvalidFormat(msg) | Self::ResourceLimit(msg) | Self::FileSystem(msg) => {
                Self::Fetch(msg)
            }
            other => other,
        }
    }
}

impl From<ImageError> for String {
    fn from(error: ImageError) -> Self {
        error.to_string()
    }
}
