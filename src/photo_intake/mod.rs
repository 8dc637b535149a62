//! # 图片收集模块（photo_intake）
//!
//! ## 设计思路
//!
//! 该模块把“选择图片 → 加载/下载 → 压缩 → 预览 → 容量检查 → 有序提交”
//! 按职责拆分为多个子模块，避免单文件膨胀与耦合。
//!
//! - `handler`：编排整条处理流水线（会话级入口 `IngestionController`）
//! - `image_set`：有序图片集合 + 主图标识，唯一的共享可变状态
//! - `capacity`：容量策略（按账户等级，保留旧的按数量策略用于兼容对比）
//! - `loader`：本地文件/字节/Base64 加载与早期校验
//! - `pipeline`：解码、像素限制、降采样、JPEG 重新编码
//! - `preview`：data URI / 对象 URL 预览句柄
//! - `remote` / `http_source`：远程图库抽象与 HTTP 实现
//! - `submission`：会话结束时导出提交数据
//! - `config/error/source`：配置、错误、中间数据模型
//!
//! ## 新同事快速上手
//!
//! ```text
//! UI 事件（选文件 / 选远程图 / 删除 / 设主图）
//!    ↓
//! handler.rs（容量检查 + 每项一个任务 + 按完成顺序提交）
//!    ├─ loader.rs / http_source.rs（取原始字节）
//!    ├─ pipeline.rs（压缩，阻塞线程池）
//!    └─ preview.rs（预览句柄）
//!    ↓
//! image_set.rs（insert 处重新校验容量与主图）
//!    ↓
//! submission.rs（finish 导出有序图片 + 主图下标）
//! ```
//!
//! ## 分层职责建议
//!
//! - 容量规则变更优先改 `capacity.rs`
//! - 配置与档位变更优先改 `config.rs`
//! - 批次流程顺序变更优先改 `handler.rs`
//! - 单阶段行为优化分别改 `loader/pipeline/preview/http_source`

mod capacity;
mod config;
mod error;
mod handler;
mod http_source;
mod image_set;
mod loader;
mod pipeline;
mod preview;
mod remote;
mod source;
mod submission;

pub use capacity::{AccountTier, CapacityPolicy, CapacityStatus};
pub use config::{CapacityMode, CompressionProfile, IngestConfig, PreviewMode, ResizeFilter};
pub use error::ImageError;
pub use handler::{DroppedCandidate, IngestReport, IngestionController};
pub use http_source::HttpStockSource;
pub use image_set::{
    ImageId, ImageItem, ImageOrigin, ImageSet, ImageSummary, PendingImage, UploadState,
};
pub use pipeline::{Compressor, JpegCompressor};
pub use preview::{PreviewCodec, PreviewHandle, PreviewRegistry};
pub use remote::{RemoteCandidate, RemoteSource, SearchPage, SearchPager, SearchQuery};
pub use source::{CompressedImage, LocalFile, LocalSource};
pub use submission::{Submission, SubmissionImage};
