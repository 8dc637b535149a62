//! # 数据源与中间模型
//!
//! ## 设计思路
//!
//! 将“外部输入类型”和“流水线中间结果”解耦：
//! - `LocalFile` 表示用户一次选择中的单个本地输入
//! - `RawImageData` 表示已加载但未压缩的字节
//! - `CompressedImage` 表示可预览、可上传的压缩结果

use std::path::{Path, PathBuf};

/// 本地输入来源。
#[derive(Debug, Clone)]
pub enum LocalSource {
    /// 本地文件路径。
    Path(PathBuf),
    /// 已在内存中的文件内容（例如拖拽进来的文件）。
    Bytes(Vec<u8>),
    /// Base64（支持 Data URL 与纯 Base64 字符串）。
    Base64(String),
}

/// 一次本地选择中的单个文件。
#[derive(Debug, Clone)]
pub struct LocalFile {
    /// 展示用文件名。
    pub name: String,
    pub source: LocalSource,
}

impl LocalFile {
    /// 以路径创建，文件名取路径最后一段。
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            name,
            source: LocalSource::Path(path.to_path_buf()),
        }
    }

    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            source: LocalSource::Bytes(bytes),
        }
    }

    pub fn from_base64(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: LocalSource::Base64(data.into()),
        }
    }
}

/// 加载阶段输出：原始字节与来源标识。
pub(crate) struct RawImageData {
    /// 原始图片字节。
    pub(crate) bytes: Vec<u8>,
    /// 来源提示（用于日志与诊断）。
    pub(crate) source_hint: &'static str,
}

/// 压缩阶段输出。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedImage {
    /// 压缩后字节。
    pub bytes: Vec<u8>,
    /// 输出 MIME。
    pub mime: &'static str,
    /// 输出宽度（像素）。
    pub width: u32,
    /// 输出高度（像素）。
    pub height: u32,
    /// 原始输入字节数。
    pub original_len: usize,
}
