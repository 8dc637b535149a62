//! # 图片集合模块
//!
//! ## 设计思路
//!
//! `ImageSet` 是一次提交会话中唯一的共享可变状态，只能通过四个操作修改：
//! `insert` / `remove` / `set_primary` / `move_item`。
//!
//! 不变量（每次修改后均成立）：
//! 1. 数量不超过容量策略给出的上限（插入时在提交点重新校验）
//! 2. 非空时主图标识一定指向集合中的某一项
//! 3. 顺序只在显式移除或显式重排时改变，插入总是追加
//! 4. 移除主图时，主图转移给剩余的第一项
//!
//! 主图用“标识”而不是“下标”表示，移除前面的项不会让它悄悄失效。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::capacity::{AccountTier, CapacityPolicy, CapacityStatus};
use super::preview::PreviewHandle;
use super::source::CompressedImage;
use super::ImageError;

/// 图片项的稳定标识，插入时分配，与位置无关。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ImageId(u64);

impl ImageId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "img-{}", self.0)
    }
}

/// 图片来源（仅展示用途，不影响不变量）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageOrigin {
    Local,
    Remote,
}

/// 处理状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Pending,
    Ready,
}

/// 已通过容量检查、尚在处理中的图片。
///
/// 只有 `complete` 之后得到的 `ImageItem` 才能进入集合。
#[derive(Debug, Clone)]
pub struct PendingImage {
    id: ImageId,
    original_name: String,
    origin: ImageOrigin,
}

impl PendingImage {
    pub fn new(id: ImageId, original_name: impl Into<String>, origin: ImageOrigin) -> Self {
        Self {
            id,
            original_name: original_name.into(),
            origin,
        }
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn origin(&self) -> ImageOrigin {
        self.origin
    }

    pub fn state(&self) -> UploadState {
        UploadState::Pending
    }

    /// 压缩与预览都成功后转为就绪项。
    pub fn complete(self, compressed: CompressedImage, preview: PreviewHandle) -> ImageItem {
        ImageItem {
            id: self.id,
            payload: compressed.bytes,
            preview,
            original_name: self.original_name,
            origin: self.origin,
            state: UploadState::Ready,
            mime: compressed.mime,
            width: compressed.width,
            height: compressed.height,
            original_len: compressed.original_len,
            accepted_at: Utc::now(),
        }
    }
}

/// 集合中的图片项（始终为就绪状态）。
#[derive(Debug)]
pub struct ImageItem {
    id: ImageId,
    payload: Vec<u8>,
    preview: PreviewHandle,
    original_name: String,
    origin: ImageOrigin,
    state: UploadState,
    mime: &'static str,
    width: u32,
    height: u32,
    original_len: usize,
    accepted_at: DateTime<Utc>,
}

impl ImageItem {
    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn preview(&self) -> &PreviewHandle {
        &self.preview
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn origin(&self) -> ImageOrigin {
        self.origin
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn mime(&self) -> &'static str {
        self.mime
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn original_len(&self) -> usize {
        self.original_len
    }

    pub fn accepted_at(&self) -> DateTime<Utc> {
        self.accepted_at
    }

    /// 拆出上传所需字段，预览句柄随之释放。
    pub(crate) fn into_upload_parts(self) -> (ImageId, String, &'static str, Vec<u8>) {
        (self.id, self.original_name, self.mime, self.payload)
    }
}

/// 面向 UI 的图片摘要。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageSummary {
    pub id: ImageId,
    pub original_name: String,
    pub origin: ImageOrigin,
    pub state: UploadState,
    pub preview: String,
    pub mime: &'static str,
    pub width: u32,
    pub height: u32,
    pub size_bytes: usize,
    pub original_size_bytes: usize,
    pub accepted_at: String,
    pub is_primary: bool,
}

/// 一次提交会话的有序图片集合。
#[derive(Debug)]
pub struct ImageSet {
    items: Vec<ImageItem>,
    primary: Option<ImageId>,
    policy: CapacityPolicy,
    tier: AccountTier,
}

impl ImageSet {
    pub fn new(policy: CapacityPolicy, tier: AccountTier) -> Self {
        Self {
            items: Vec::new(),
            primary: None,
            policy,
            tier,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[ImageItem] {
        &self.items
    }

    pub fn ids(&self) -> Vec<ImageId> {
        self.items.iter().map(ImageItem::id).collect()
    }

    pub fn get(&self, id: ImageId) -> Option<&ImageItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn position(&self, id: ImageId) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    pub fn primary_id(&self) -> Option<ImageId> {
        self.primary
    }

    pub fn primary_index(&self) -> Option<usize> {
        self.primary.and_then(|id| self.position(id))
    }

    pub fn tier(&self) -> AccountTier {
        self.tier
    }

    pub fn policy(&self) -> CapacityPolicy {
        self.policy
    }

    /// 更新账户档位。降档不会驱逐已有图片，只阻止后续插入。
    pub fn set_tier(&mut self, tier: AccountTier) {
        self.tier = tier;
    }

    pub fn capacity_status(&self) -> CapacityStatus {
        self.policy.status(self.items.len(), self.tier)
    }

    pub fn available(&self) -> usize {
        self.policy.available(self.items.len(), self.tier)
    }

    /// 追加图片。提交点重新校验容量，并发兄弟项先完成时会在这里被拒绝。
    pub fn insert(&mut self, item: ImageItem) -> Result<(), ImageError> {
        if self.items.iter().any(|existing| existing.id == item.id) {
            return Err(ImageError::DuplicateItem(item.id));
        }

        let available = self.available();
        if available == 0 {
            return Err(ImageError::CapacityExceeded {
                requested: 1,
                available,
            });
        }

        if self.primary.is_none() {
            self.primary = Some(item.id);
        }
        self.items.push(item);

        debug_assert!(self.invariants_hold());
        Ok(())
    }

    /// 按标识移除。被移除的是主图时，主图转给剩余第一项。
    pub fn remove(&mut self, id: ImageId) -> Result<ImageItem, ImageError> {
        let index = self.position(id).ok_or(ImageError::UnknownItem(id))?;
        let removed = self.items.remove(index);

        if self.primary == Some(id) {
            self.primary = self.items.first().map(ImageItem::id);
        }

        debug_assert!(self.invariants_hold());
        Ok(removed)
    }

    /// 设置主图，只更新标识，不改变顺序。
    pub fn set_primary(&mut self, id: ImageId) -> Result<(), ImageError> {
        if self.position(id).is_none() {
            return Err(ImageError::UnknownItem(id));
        }
        self.primary = Some(id);
        Ok(())
    }

    /// 显式重排：把图片移动到 `to_index`（超出范围时放到末尾）。
    pub fn move_item(&mut self, id: ImageId, to_index: usize) -> Result<(), ImageError> {
        let from = self.position(id).ok_or(ImageError::UnknownItem(id))?;
        let item = self.items.remove(from);
        let to = to_index.min(self.items.len());
        self.items.insert(to, item);

        debug_assert!(self.invariants_hold());
        Ok(())
    }

    pub fn summaries(&self) -> Vec<ImageSummary> {
        self.items
            .iter()
            .map(|item| ImageSummary {
                id: item.id,
                original_name: item.original_name.clone(),
                origin: item.origin,
                state: item.state,
                preview: item.preview.as_str().to_string(),
                mime: item.mime,
                width: item.width,
                height: item.height,
                size_bytes: item.payload.len(),
                original_size_bytes: item.original_len,
                accepted_at: item.accepted_at.to_rfc3339(),
                is_primary: self.primary == Some(item.id),
            })
            .collect()
    }

    /// 主图有效性：非空时必须指向现有项，空集合时必须未设置。
    pub fn invariants_hold(&self) -> bool {
        let primary_ok = match self.primary {
            Some(id) => self.items.iter().any(|item| item.id == id),
            None => self.items.is_empty(),
        };
        let ready = self
            .items
            .iter()
            .all(|item| item.state == UploadState::Ready);

        primary_ok && ready
    }

    pub(crate) fn into_parts(self) -> (Vec<ImageItem>, Option<ImageId>) {
        (self.items, self.primary)
    }
}
