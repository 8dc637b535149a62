//! # 商品图片收集：库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │            UI 层（发布页 / 图片选择 / 图库搜索）          │
//! │                                                          │
//! │   选文件 ── 选远程图 ── 删除 ── 设主图 ── 调整顺序        │
//! └───────┬──────────────────────────────────────────────────┘
//!         ↕ Result<T, AppError>
//! ┌───────┼──────────────────────────────────────────────────┐
//! │       ↕            核心 (Rust)                           │
//! │                                                          │
//! │  ┌─ error ────── AppError (统一错误类型)                  │
//! │  │                                                       │
//! │  ├─ settings ─── IngestConfig JSON 读写                   │
//! │  │                                                       │
//! │  └─ photo_intake  图片收集会话                            │
//! │      ├─ handler      批次编排·完成顺序提交               │
//! │      ├─ image_set    有序集合 + 主图标识                 │
//! │      ├─ capacity     容量策略 (账户等级)                 │
//! │      ├─ pipeline     解码·降采样·JPEG                    │
//! │      ├─ preview      data URI / 对象 URL                 │
//! │      └─ http_source  图库搜索·安全下载                   │
//! └───────┼──────────────────────────────────────────────────┘
//!         ↓ Submission（有序图片 + 主图下标）
//!     外部提交步骤
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 统一错误类型 `AppError`，UI 边界的返回类型 |
//! | [`settings`] | 收集配置的加载与保存（缺省回落默认值） |
//! | [`photo_intake`] | 本地/远程图片收集、压缩、预览、容量与主图管理、提交导出 |

pub mod error;
pub mod photo_intake;
pub mod settings;
