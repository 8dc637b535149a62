//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 定义全局统一的 `AppError` 枚举，UI 边界的函数统一返回 `Result<T, AppError>`，
//! 调用方通过 `Serialize` 获得可直接展示的错误信息。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - 为 `ImageError` / `std::io::Error` 提供 `From` 转换，无需手动 map。
//! - 实现 `Serialize` 将错误序列化为字符串。

use serde::Serialize;

use crate::photo_intake::ImageError;

/// 应用级统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 图片收集流水线错误（容量 / 加载 / 下载 / 压缩 / 提交）
    #[error("{0}")]
    Image(#[from] ImageError),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),

    /// 配置文件解析或序列化失败
    #[error("配置文件错误: {0}")]
    Settings(String),
}

impl AppError {
    /// 容量超限时 UI 需要提示用户重新选择，其余错误直接展示消息即可。
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, Self::Image(ImageError::CapacityExceeded { .. }))
    }
}

/// 将错误序列化为人类可读的字符串。
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
