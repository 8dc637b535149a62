//! # 核心编排模块
//!
//! ## 设计思路
//!
//! `IngestionController` 负责一次提交会话内的流程编排与配置管理，本身不关心 UI。
//! 处理链路固定为：
//! 1. 读取配置快照
//! 2. 容量检查（本地整批拒绝 / 远程截断）
//! 3. 每个候选项一个任务：加载或下载 → 压缩（阻塞线程池）→ 生成预览
//! 4. 按“完成顺序”逐个提交进 `ImageSet`
//!
//! ## 实现思路
//!
//! - 配置通过 `Arc<RwLock<IngestConfig>>` 支持运行时切档，单个批次内使用同一快照。
//! - 每项任务放入 `JoinSet`，`join_next` 天然给出完成顺序；批次被放弃时
//!   `JoinSet` 析构会中止未完成任务，已生成的预览随任务一起释放。
//! - `ImageSet` 放在 `Mutex` 中，只在提交点短暂加锁，从不跨 `.await` 持有。
//! - 提交点重新校验容量：派发时有空位，不代表完成时还有。
//! - 记录 `acquire/compress/commit/total` 阶段耗时，便于性能诊断。

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;

use serde::Serialize;
use tokio::task::JoinSet;

use super::capacity::{AccountTier, CapacityPolicy, CapacityStatus};
use super::image_set::{ImageId, ImageItem, ImageOrigin, ImageSet, ImageSummary, PendingImage};
use super::loader;
use super::pipeline::{Compressor, JpegCompressor};
use super::preview::{PreviewCodec, PreviewRegistry};
use super::remote::{RemoteCandidate, RemoteSource, SearchPage, SearchPager, SearchQuery};
use super::source::{CompressedImage, LocalFile};
use super::submission::Submission;
use super::{CompressionProfile, ImageError, IngestConfig};

/// 被丢弃的候选项（供 UI 展示“成功 N 张 / 失败 M 张”）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedCandidate {
    pub name: String,
    pub code: &'static str,
    pub stage: &'static str,
    pub message: String,
}

impl DroppedCandidate {
    fn from_error(name: String, error: &ImageError) -> Self {
        Self {
            name,
            code: error.code(),
            stage: error.stage(),
            message: error.to_string(),
        }
    }
}

/// 单个批次的处理结果。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// 按提交顺序排列
    pub accepted: Vec<ImageId>,
    pub dropped: Vec<DroppedCandidate>,
    /// 远程批次因容量不足未处理的数量
    pub truncated: usize,
}

impl IngestReport {
    pub fn accepted_count(&self) -> usize {
        self.accepted.len()
    }

    pub fn dropped_count(&self) -> usize {
        self.dropped.len()
    }
}

struct ProcessedItem {
    item: ImageItem,
    acquire_ms: u128,
    compress_ms: u128,
}

struct ItemOutcome {
    name: String,
    result: Result<ProcessedItem, ImageError>,
}

/// 图片收集控制器。
///
/// 一个实例对应一次提交会话：`finish` 导出提交数据，`discard` 放弃全部内容。
pub struct IngestionController<R: RemoteSource> {
    set: Mutex<ImageSet>,
    config: Arc<RwLock<IngestConfig>>,
    compressor: Arc<dyn Compressor>,
    registry: Arc<PreviewRegistry>,
    source: Arc<R>,
    next_id: AtomicU64,
}

impl<R: RemoteSource> IngestionController<R> {
    /// 使用默认 JPEG 压缩器创建会话。
    ///
    /// # 示例
    /// ```rust,ignore
    /// use listing_photos::photo_intake::{HttpStockSource, IngestConfig, IngestionController};
    ///
    /// let config = IngestConfig::default();
    /// let source = HttpStockSource::new("https://api.unsplash.com/", "access-key", &config)?;
    /// let controller = IngestionController::new(config, source)?;
    /// # Ok::<(), listing_photos::photo_intake::ImageError>(())
    /// ```
    pub fn new(config: IngestConfig, source: R) -> Result<Self, ImageError> {
        Self::with_parts(config, Arc::new(source), Arc::new(JpegCompressor))
    }

    /// 注入自定义图源与压缩器（测试或替换实现时使用）。
    pub fn with_parts(
        config: IngestConfig,
        source: Arc<R>,
        compressor: Arc<dyn Compressor>,
    ) -> Result<Self, ImageError> {
        config.validate()?;
        let policy = CapacityPolicy::from_config(&config);

        Ok(Self {
            set: Mutex::new(ImageSet::new(policy, AccountTier::default())),
            config: Arc::new(RwLock::new(config)),
            compressor,
            registry: PreviewRegistry::new(),
            source,
            next_id: AtomicU64::new(1),
        })
    }

    fn lock_set(&self) -> Result<MutexGuard<'_, ImageSet>, ImageError> {
        self.set
            .lock()
            .map_err(|_| ImageError::ResourceLimit("图片集合锁已中毒".to_string()))
    }

    fn allocate_id(&self) -> ImageId {
        ImageId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// 获取配置快照。
    ///
    /// 作用：保证单个批次使用一致参数。
    pub fn config_snapshot(&self) -> Result<IngestConfig, ImageError> {
        self.config
            .read()
            .map(|cfg| cfg.clone())
            .map_err(|_| ImageError::ResourceLimit("配置读取锁已中毒".to_string()))
    }

    /// 整体替换配置（先校验）。容量策略在会话创建时确定，不随之变化。
    pub fn replace_config(&self, config: IngestConfig) -> Result<(), ImageError> {
        config.validate()?;
        let mut current = self
            .config
            .write()
            .map_err(|_| ImageError::ResourceLimit("配置写入锁已中毒".to_string()))?;
        *current = config;
        Ok(())
    }

    /// 设置压缩档位，只影响之后开始的批次。
    pub fn set_compression_profile(&self, profile: CompressionProfile) -> Result<(), ImageError> {
        let mut config = self
            .config
            .write()
            .map_err(|_| ImageError::ResourceLimit("配置写入锁已中毒".to_string()))?;
        config.apply_compression_profile(profile);

        log::info!(
            "⚙️ 已切换压缩档位：{}（max_dim={}, target_pixels={}, quality={}, filter={:?}）",
            profile.as_str(),
            config.target_max_dimension,
            config.target_pixels,
            config.jpeg_quality,
            config.resize_filter
        );

        Ok(())
    }

    pub fn compression_profile(&self) -> Result<CompressionProfile, ImageError> {
        let config = self
            .config
            .read()
            .map_err(|_| ImageError::ResourceLimit("配置读取锁已中毒".to_string()))?;
        Ok(config.infer_compression_profile())
    }

    /// 更新账户等级（由外部账户服务提供）。降级不会移除已有图片。
    pub fn set_tier(&self, tier: AccountTier) -> Result<CapacityStatus, ImageError> {
        let mut set = self.lock_set()?;
        set.set_tier(tier);
        let status = set.capacity_status();

        log::info!(
            "🎫 账户等级更新：{:?}（{}/{}，剩余 {}）",
            tier,
            status.count,
            status.max,
            status.available
        );

        Ok(status)
    }

    pub fn tier(&self) -> Result<AccountTier, ImageError> {
        Ok(self.lock_set()?.tier())
    }

    pub fn capacity_status(&self) -> Result<CapacityStatus, ImageError> {
        Ok(self.lock_set()?.capacity_status())
    }

    pub fn summaries(&self) -> Result<Vec<ImageSummary>, ImageError> {
        Ok(self.lock_set()?.summaries())
    }

    pub fn len(&self) -> Result<usize, ImageError> {
        Ok(self.lock_set()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, ImageError> {
        Ok(self.lock_set()?.is_empty())
    }

    /// 只读访问集合。闭包内不要做耗时操作。
    pub fn with_set<T>(&self, f: impl FnOnce(&ImageSet) -> T) -> Result<T, ImageError> {
        let set = self.lock_set()?;
        Ok(f(&set))
    }

    /// 对象 URL 模式下供渲染层解析预览。
    pub fn preview_registry(&self) -> &Arc<PreviewRegistry> {
        &self.registry
    }

    pub fn remote_source(&self) -> &R {
        &self.source
    }

    pub fn remove(&self, id: ImageId) -> Result<(), ImageError> {
        let removed = self.lock_set()?.remove(id)?;
        log::debug!("🗑️ 已移除图片 {}（{}）", removed.id(), removed.original_name());
        Ok(())
    }

    pub fn set_primary(&self, id: ImageId) -> Result<(), ImageError> {
        self.lock_set()?.set_primary(id)
    }

    pub fn move_item(&self, id: ImageId, to_index: usize) -> Result<(), ImageError> {
        self.lock_set()?.move_item(id, to_index)
    }

    /// 单页搜索，每页数量取配置中的 `search_per_page`。
    pub async fn search(&self, text: &str, page: u32) -> Result<SearchPage, ImageError> {
        let config = self.config_snapshot()?;
        let mut query = SearchQuery::new(text, config.search_per_page);
        query.page = page.max(1);
        self.source.search(&query).await
    }

    /// 惰性翻页搜索。
    pub fn pager(&self, text: &str) -> Result<SearchPager<'_, R>, ImageError> {
        let config = self.config_snapshot()?;
        Ok(SearchPager::new(
            self.source.as_ref(),
            SearchQuery::new(text, config.search_per_page),
        ))
    }

    /// 本地批次：数量超过剩余容量时整批拒绝，不做任何提交。
    ///
    /// # 示例
    /// ```rust,ignore
    /// use listing_photos::photo_intake::LocalFile;
    ///
    /// # async fn demo<R: listing_photos::photo_intake::RemoteSource>(
    /// #     controller: &listing_photos::photo_intake::IngestionController<R>,
    /// # ) -> Result<(), listing_photos::photo_intake::ImageError> {
    /// let report = controller
    ///     .ingest_local(vec![LocalFile::from_path("/tmp/sofa.jpg")])
    ///     .await?;
    /// println!("accepted={} dropped={}", report.accepted_count(), report.dropped_count());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn ingest_local(&self, files: Vec<LocalFile>) -> Result<IngestReport, ImageError> {
        let config = Arc::new(self.config_snapshot()?);
        let total_start = Instant::now();

        if files.is_empty() {
            return Ok(IngestReport::default());
        }

        let available = self.lock_set()?.available();
        if files.len() > available {
            log::warn!(
                "🚫 本地批次被拒绝 - 选择 {} 张，剩余可用 {} 张",
                files.len(),
                available
            );
            return Err(ImageError::CapacityExceeded {
                requested: files.len(),
                available,
            });
        }

        let codec = PreviewCodec::from_config(&config, &self.registry);
        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();

        for file in files {
            let pending = PendingImage::new(self.allocate_id(), file.name, ImageOrigin::Local);
            let name = pending.original_name().to_string();
            let source = file.source;
            let compressor = Arc::clone(&self.compressor);
            let codec = codec.clone();
            let config = Arc::clone(&config);

            let handle = tasks.spawn(async move {
                let load_config = Arc::clone(&config);
                let acquire = async move {
                    loader::load_local(source, &load_config)
                        .await
                        .map(|raw| {
                            log::debug!("📦 已加载 {} bytes（{}）", raw.bytes.len(), raw.source_hint);
                            raw.bytes
                        })
                        .map_err(ImageError::into_compression)
                };
                process_item(pending, acquire, compressor, codec, config).await
            });
            names.insert(handle.id(), name);
        }

        let report = self
            .commit_in_completion_order(tasks, names, IngestReport::default())
            .await?;
        log_batch("本地", &report, total_start);

        Ok(report)
    }

    /// 远程批次：超过剩余容量的部分直接截断，其余逐项独立下载处理。
    pub async fn ingest_remote(
        &self,
        candidates: Vec<RemoteCandidate>,
    ) -> Result<IngestReport, ImageError> {
        let config = Arc::new(self.config_snapshot()?);
        let total_start = Instant::now();

        let available = self.lock_set()?.available();
        let truncated = candidates.len().saturating_sub(available);
        if truncated > 0 {
            log::warn!(
                "✂️ 远程批次截断 - 选择 {} 张，剩余可用 {} 张，忽略 {} 张",
                candidates.len(),
                available,
                truncated
            );
        }

        let codec = PreviewCodec::from_config(&config, &self.registry);
        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();

        for candidate in candidates.into_iter().take(available) {
            let pending =
                PendingImage::new(self.allocate_id(), candidate.display_name(), ImageOrigin::Remote);
            let name = pending.original_name().to_string();
            let source = Arc::clone(&self.source);
            let compressor = Arc::clone(&self.compressor);
            let codec = codec.clone();
            let config = Arc::clone(&config);

            let handle = tasks.spawn(async move {
                let acquire = async move {
                    source
                        .fetch_bytes(&candidate)
                        .await
                        .map_err(ImageError::into_fetch)
                };
                process_item(pending, acquire, compressor, codec, config).await
            });
            names.insert(handle.id(), name);
        }

        let report = IngestReport {
            truncated,
            ..IngestReport::default()
        };
        let report = self.commit_in_completion_order(tasks, names, report).await?;
        log_batch("远程", &report, total_start);

        Ok(report)
    }

    /// 逐个等待任务完成并提交。提交失败（如被兄弟项抢先占满）只丢弃该项。
    async fn commit_in_completion_order(
        &self,
        mut tasks: JoinSet<ItemOutcome>,
        mut names: HashMap<tokio::task::Id, String>,
        mut report: IngestReport,
    ) -> Result<IngestReport, ImageError> {
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    let name = names.remove(&join_err.id()).unwrap_or_default();
                    let error = ImageError::Compression(format!("处理任务异常结束：{}", join_err));
                    log::error!("❌ {} - {}", name, error);
                    report.dropped.push(DroppedCandidate::from_error(name, &error));
                    continue;
                }
            };

            let processed = match outcome.result {
                Ok(processed) => processed,
                Err(error) => {
                    if error.is_per_item() {
                        log::warn!("⚠️ 丢弃候选项 {} [{}] - {}", outcome.name, error.code(), error);
                    } else {
                        log::error!("❌ 候选项 {} 遇到批次级错误 [{}] - {}", outcome.name, error.code(), error);
                    }
                    report
                        .dropped
                        .push(DroppedCandidate::from_error(outcome.name, &error));
                    continue;
                }
            };

            let id = processed.item.id();
            let commit_start = Instant::now();
            let inserted = self.lock_set()?.insert(processed.item);
            match inserted {
                Ok(()) => {
                    log::debug!(
                        "📥 已提交 {}（{}）- acquire={}ms compress={}ms commit={}ms",
                        id,
                        outcome.name,
                        processed.acquire_ms,
                        processed.compress_ms,
                        commit_start.elapsed().as_millis()
                    );
                    report.accepted.push(id);
                }
                Err(error) => {
                    log::warn!("⚠️ 提交时被拒绝 {} [{}] - {}", outcome.name, error.code(), error);
                    report
                        .dropped
                        .push(DroppedCandidate::from_error(outcome.name, &error));
                }
            }
        }

        Ok(report)
    }

    /// 结束会话，导出有序图片与主图下标。
    pub fn finish(self) -> Result<Submission, ImageError> {
        let set = self
            .set
            .into_inner()
            .map_err(|_| ImageError::ResourceLimit("图片集合锁已中毒".to_string()))?;
        let submission = Submission::from_set(set);

        log::info!(
            "📤 会话结束 - {} 张图片，主图下标 {:?}，共 {} bytes",
            submission.len(),
            submission.primary_index,
            submission.total_bytes()
        );

        Ok(submission)
    }

    /// 放弃会话，释放全部图片与预览。
    pub fn discard(self) {
        let count = self.set.lock().map(|set| set.len()).unwrap_or(0);
        log::info!("🧹 会话已放弃 - 丢弃 {} 张图片", count);
    }
}

/// 单项处理：获取字节 → 压缩 → 预览。任何一步失败只影响本项。
async fn process_item<F>(
    pending: PendingImage,
    acquire: F,
    compressor: Arc<dyn Compressor>,
    codec: PreviewCodec,
    config: Arc<IngestConfig>,
) -> ItemOutcome
where
    F: Future<Output = Result<Vec<u8>, ImageError>> + Send,
{
    let name = pending.original_name().to_string();

    let result = async {
        let acquire_start = Instant::now();
        let raw = acquire.await?;
        let acquire_ms = acquire_start.elapsed().as_millis();

        let compress_start = Instant::now();
        let compressed = compress_blocking(compressor, raw, config).await?;
        let compress_ms = compress_start.elapsed().as_millis();

        let preview = codec
            .encode(&compressed.bytes)
            .map_err(ImageError::into_compression)?;

        Ok::<_, ImageError>(ProcessedItem {
            item: pending.complete(compressed, preview),
            acquire_ms,
            compress_ms,
        })
    }
    .await;

    ItemOutcome { name, result }
}

async fn compress_blocking(
    compressor: Arc<dyn Compressor>,
    raw: Vec<u8>,
    config: Arc<IngestConfig>,
) -> Result<CompressedImage, ImageError> {
    tokio::task::spawn_blocking(move || compressor.compress(&raw, &config))
        .await
        .map_err(|e| ImageError::Compression(format!("压缩任务异常结束：{}", e)))?
        .map_err(ImageError::into_compression)
}

fn log_batch(label: &str, report: &IngestReport, started: Instant) {
    log::info!(
        "✅ {}批次完成 - accepted={} dropped={} truncated={} total={}ms",
        label,
        report.accepted_count(),
        report.dropped_count(),
        report.truncated,
        started.elapsed().as_millis()
    );
}
