//! # 预览句柄模块
//!
//! ## 设计思路
//!
//! 预览句柄是由压缩后字节派生出的“可渲染引用”，生命周期与图片项绑定：
//! - `DataUri`：内联 `data:image/...;base64,...`，不占用额外资源
//! - `ObjectUrl`：字节注册到 `PreviewRegistry`，对外只暴露 `blob:` 地址
//!
//! `ObjectUrl` 采用 RAII 租约：句柄被丢弃（图片被移除、会话被丢弃、
//! 处理中的任务被中止）时自动从注册表注销，不会泄漏。

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use base64::{Engine as _, engine::general_purpose};

use super::config::{IngestConfig, PreviewMode};
use super::ImageError;

const OBJECT_URL_PREFIX: &str = "blob:listing-photos/";

/// 已注册的预览数据。
struct PreviewBlob {
    mime: &'static str,
    bytes: Arc<[u8]>,
}

/// `blob:` 预览注册表。
///
/// 渲染层通过 `resolve` 取回字节；测试通过 `live_count` 检查泄漏。
#[derive(Default)]
pub struct PreviewRegistry {
    entries: Mutex<HashMap<u64, PreviewBlob>>,
    next_key: AtomicU64,
}

impl PreviewRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(
        self: &Arc<Self>,
        mime: &'static str,
        bytes: &[u8],
    ) -> Result<ObjectUrlLease, ImageError> {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed) + 1;
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| ImageError::ResourceLimit("预览注册表锁已中毒".to_string()))?;
        entries.insert(
            key,
            PreviewBlob {
                mime,
                bytes: Arc::from(bytes),
            },
        );

        Ok(ObjectUrlLease {
            registry: Arc::clone(self),
            key,
        })
    }

    fn release(&self, key: u64) {
        match self.entries.lock() {
            Ok(mut entries) => {
                if entries.remove(&key).is_some() {
                    log::debug!("🧹 已释放预览句柄 {}{}", OBJECT_URL_PREFIX, key);
                }
            }
            Err(_) => log::warn!("⚠️ 预览注册表锁已中毒，句柄 {} 未能释放", key),
        }
    }

    /// 按 `blob:` 地址取回预览数据（MIME + 字节）。
    pub fn resolve(&self, url: &str) -> Option<(&'static str, Arc<[u8]>)> {
        let key = url.strip_prefix(OBJECT_URL_PREFIX)?.parse::<u64>().ok()?;
        let entries = self.entries.lock().ok()?;
        entries
            .get(&key)
            .map(|blob| (blob.mime, Arc::clone(&blob.bytes)))
    }

    /// 当前仍存活的句柄数量。
    pub fn live_count(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }
}

impl fmt::Debug for PreviewRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviewRegistry")
            .field("live", &self.live_count())
            .finish()
    }
}

/// 注册表租约，`Drop` 时注销。
struct ObjectUrlLease {
    registry: Arc<PreviewRegistry>,
    key: u64,
}

impl Drop for ObjectUrlLease {
    fn drop(&mut self) {
        self.registry.release(self.key);
    }
}

/// 可渲染的预览引用。
///
/// 不实现 `Clone`：句柄只属于一个图片项。
pub struct PreviewHandle {
    uri: String,
    lease: Option<ObjectUrlLease>,
}

impl PreviewHandle {
    pub fn as_str(&self) -> &str {
        &self.uri
    }

    pub fn is_object_url(&self) -> bool {
        self.lease.is_some()
    }
}

impl fmt::Debug for PreviewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown: String = self.uri.chars().take(48).collect();
        f.debug_struct("PreviewHandle")
            .field("uri", &shown)
            .field("object_url", &self.is_object_url())
            .finish()
    }
}

/// 预览编码器（无内部状态，`ObjectUrl` 模式只持有注册表引用）。
#[derive(Clone, Debug)]
pub enum PreviewCodec {
    DataUri,
    ObjectUrl(Arc<PreviewRegistry>),
}

impl PreviewCodec {
    pub fn from_config(config: &IngestConfig, registry: &Arc<PreviewRegistry>) -> Self {
        match config.preview_mode {
            PreviewMode::DataUri => Self::DataUri,
            PreviewMode::ObjectUrl => Self::ObjectUrl(Arc::clone(registry)),
        }
    }

    /// 由压缩后字节生成预览句柄。
    pub fn encode(&self, bytes: &[u8]) -> Result<PreviewHandle, ImageError> {
        let mime = sniff_image_mime(bytes)?;

        match self {
            Self::DataUri => Ok(PreviewHandle {
                uri: format!(
                    "data:{};base64,{}",
                    mime,
                    general_purpose::STANDARD.encode(bytes)
                ),
                lease: None,
            }),
            Self::ObjectUrl(registry) => {
                let lease = registry.register(mime, bytes)?;
                Ok(PreviewHandle {
                    uri: format!("{}{}", OBJECT_URL_PREFIX, lease.key),
                    lease: Some(lease),
                })
            }
        }
    }
}

/// 通过文件签名识别图片 MIME。
pub(crate) fn sniff_image_mime(bytes: &[u8]) -> Result<&'static str, ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::InvalidFormat("图片内容为空".to_string()));
    }

    let kind = infer::get(bytes)
        .ok_or_else(|| ImageError::InvalidFormat("无法识别图片类型".to_string()))?;

    if kind.matcher_type() != infer::MatcherType::Image {
        return Err(ImageError::InvalidFormat(format!(
            "文件签名不是图片类型：{}",
            kind.mime_type()
        )));
    }

    Ok(kind.mime_type())
}
