use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use listing_photos::photo_intake::{
    AccountTier, CompressedImage, Compressor, ImageError, ImageId, IngestConfig,
    IngestionController, LocalFile, PreviewMode, RemoteCandidate, RemoteSource, SearchPage,
    SearchQuery,
};

const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a];

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 带标记字节的“图片”：签名能通过识别，最后一个字节用来区分候选项。
fn tagged_image(tag: u8) -> Vec<u8> {
    let mut bytes = PNG_SIGNATURE.to_vec();
    bytes.extend_from_slice(&[0, 0, 0, 0x0d, tag]);
    bytes
}

/// 按标记字节决定耗时与成败的压缩器。
#[derive(Default)]
struct ScriptedCompressor {
    delays_ms: HashMap<u8, u64>,
    failing: Vec<u8>,
}

impl Compressor for ScriptedCompressor {
    fn compress(&self, raw: &[u8], _config: &IngestConfig) -> Result<CompressedImage, ImageError> {
        let tag = raw.last().copied().unwrap_or_default();
        if let Some(ms) = self.delays_ms.get(&tag) {
            std::thread::sleep(Duration::from_millis(*ms));
        }
        if self.failing.contains(&tag) {
            return Err(ImageError::Compression(format!("corrupt input {tag}")));
        }

        Ok(CompressedImage {
            bytes: raw.to_vec(),
            mime: "image/png",
            width: 10,
            height: 10,
            original_len: raw.len(),
        })
    }
}

/// 候选项 id 即标记字节；可配置下载耗时与失败。
#[derive(Default)]
struct ScriptedSource {
    delays_ms: HashMap<String, u64>,
    failing: Vec<String>,
    fetches: AtomicUsize,
}

impl RemoteSource for ScriptedSource {
    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, ImageError> {
        let candidates = (1..=query.per_page)
            .map(|n| {
                let id = (query.page * 10 + n).to_string();
                RemoteCandidate::new(id.clone(), format!("https://img.example/{id}.jpg"))
            })
            .collect();
        Ok(SearchPage {
            page: query.page,
            total_pages: 2,
            candidates,
        })
    }

    async fn fetch_bytes(&self, candidate: &RemoteCandidate) -> Result<Vec<u8>, ImageError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(ms) = self.delays_ms.get(&candidate.id) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        if self.failing.contains(&candidate.id) {
            return Err(ImageError::Fetch(format!("HTTP 404 for {}", candidate.id)));
        }
        let tag: u8 = candidate.id.parse().unwrap_or(0);
        Ok(tagged_image(tag))
    }
}

fn controller_with(
    source: ScriptedSource,
    compressor: ScriptedCompressor,
    config: IngestConfig,
) -> (IngestionController<ScriptedSource>, Arc<ScriptedSource>) {
    let source = Arc::new(source);
    let controller =
        IngestionController::with_parts(config, Arc::clone(&source), Arc::new(compressor))
            .expect("controller init");
    (controller, source)
}

fn candidates(ids: &[&str]) -> Vec<RemoteCandidate> {
    ids.iter()
        .map(|id| RemoteCandidate::new(*id, format!("https://img.example/{id}.jpg")))
        .collect()
}

fn committed_ids<R: RemoteSource>(controller: &IngestionController<R>) -> Vec<ImageId> {
    controller.with_set(|set| set.ids()).expect("read set")
}

#[tokio::test]
async fn remote_partial_failure_commits_survivors_in_completion_order() {
    init_logger();
    let source = ScriptedSource {
        delays_ms: HashMap::from([("1".to_string(), 200), ("3".to_string(), 10)]),
        failing: vec!["2".to_string()],
        ..ScriptedSource::default()
    };
    let (controller, _) = controller_with(source, ScriptedCompressor::default(), IngestConfig::default());
    controller.set_tier(AccountTier::Elevated).expect("tier");

    let report = controller
        .ingest_remote(candidates(&["1", "2", "3"]))
        .await
        .expect("remote batch");

    // 派发顺序 1,2,3 → 标识 1,2,3；3 先完成
    assert_eq!(report.accepted, vec![ImageId::new(3), ImageId::new(1)]);
    assert_eq!(report.dropped.len(), 1);
    assert_eq!(report.dropped[0].code, "E_FETCH");
    assert_eq!(report.dropped[0].stage, "fetch");
    assert_eq!(report.truncated, 0);

    assert_eq!(committed_ids(&controller), report.accepted);
    assert_eq!(
        controller.with_set(|set| set.primary_id()).expect("read set"),
        Some(ImageId::new(3))
    );
}

#[tokio::test]
async fn local_batch_commits_in_completion_order() {
    init_logger();
    let compressor = ScriptedCompressor {
        delays_ms: HashMap::from([(1, 250), (2, 10)]),
        ..ScriptedCompressor::default()
    };
    let (controller, _) = controller_with(ScriptedSource::default(), compressor, IngestConfig::default());

    let report = controller
        .ingest_local(vec![
            LocalFile::from_bytes("slow.png", tagged_image(1)),
            LocalFile::from_bytes("fast.png", tagged_image(2)),
        ])
        .await
        .expect("local batch");

    assert_eq!(report.accepted, vec![ImageId::new(2), ImageId::new(1)]);
    let names: Vec<String> = controller
        .summaries()
        .expect("summaries")
        .into_iter()
        .map(|s| s.original_name)
        .collect();
    assert_eq!(names, vec!["fast.png", "slow.png"]);
}

#[tokio::test]
async fn local_batch_over_capacity_is_rejected_without_side_effects() {
    init_logger();
    let (controller, _) = controller_with(
        ScriptedSource::default(),
        ScriptedCompressor::default(),
        IngestConfig::default(),
    );
    controller.set_tier(AccountTier::Elevated).expect("tier");
    controller
        .ingest_local(vec![
            LocalFile::from_bytes("a.png", tagged_image(1)),
            LocalFile::from_bytes("b.png", tagged_image(2)),
            LocalFile::from_bytes("c.png", tagged_image(3)),
        ])
        .await
        .expect("first batch");
    let before = committed_ids(&controller);

    let err = controller
        .ingest_local(vec![
            LocalFile::from_bytes("d.png", tagged_image(4)),
            LocalFile::from_bytes("e.png", tagged_image(5)),
            LocalFile::from_bytes("f.png", tagged_image(6)),
        ])
        .await
        .expect_err("available is 2, batch is 3");

    assert_eq!(
        err,
        ImageError::CapacityExceeded {
            requested: 3,
            available: 2
        }
    );
    assert_eq!(committed_ids(&controller), before);
}

#[tokio::test]
async fn compression_failure_drops_only_that_file() {
    init_logger();
    let compressor = ScriptedCompressor {
        failing: vec![2],
        ..ScriptedCompressor::default()
    };
    let (controller, _) = controller_with(ScriptedSource::default(), compressor, IngestConfig::default());

    let report = controller
        .ingest_local(vec![
            LocalFile::from_bytes("good.png", tagged_image(1)),
            LocalFile::from_bytes("broken.png", tagged_image(2)),
        ])
        .await
        .expect("local batch");

    assert_eq!(report.accepted, vec![ImageId::new(1)]);
    assert_eq!(report.dropped[0].name, "broken.png");
    assert_eq!(report.dropped[0].code, "E_COMPRESSION");
}

#[tokio::test]
async fn remote_batch_is_truncated_to_available() {
    init_logger();
    let (controller, source) = controller_with(
        ScriptedSource::default(),
        ScriptedCompressor::default(),
        IngestConfig::default(),
    );

    let report = controller
        .ingest_remote(candidates(&["1", "2", "3", "4"]))
        .await
        .expect("remote batch");

    assert_eq!(report.truncated, 2);
    assert_eq!(report.accepted_count(), 2);
    assert_eq!(source.fetches.load(Ordering::SeqCst), 2);

    let status = controller.capacity_status().expect("status");
    assert_eq!(status.available, 0);
    assert!(status.show_upsell_hint);

    let full = controller
        .ingest_remote(candidates(&["5"]))
        .await
        .expect("remote batch when full");
    assert_eq!(full.truncated, 1);
    assert!(full.accepted.is_empty());
}

#[tokio::test]
async fn concurrent_batches_recheck_capacity_at_commit() {
    init_logger();
    let source = ScriptedSource {
        delays_ms: HashMap::from([
            ("1".to_string(), 40),
            ("2".to_string(), 60),
            ("3".to_string(), 80),
            ("4".to_string(), 100),
        ]),
        ..ScriptedSource::default()
    };
    let (controller, _) = controller_with(source, ScriptedCompressor::default(), IngestConfig::default());

    // 两个批次派发时都看到 2 个空位
    let (first, second) = tokio::join!(
        controller.ingest_remote(candidates(&["1", "2"])),
        controller.ingest_remote(candidates(&["3", "4"])),
    );
    let first = first.expect("first batch");
    let second = second.expect("second batch");

    let accepted = first.accepted_count() + second.accepted_count();
    let capacity_drops = first
        .dropped
        .iter()
        .chain(second.dropped.iter())
        .filter(|d| d.code == "E_CAPACITY")
        .count();

    assert_eq!(accepted, 2);
    assert_eq!(capacity_drops, 2);
    assert_eq!(controller.len().expect("len"), 2);
    assert!(controller.with_set(|set| set.invariants_hold()).expect("read set"));
}

#[tokio::test]
async fn object_url_previews_follow_item_lifetime() {
    init_logger();
    let config = IngestConfig {
        preview_mode: PreviewMode::ObjectUrl,
        ..IngestConfig::default()
    };
    let (controller, _) = controller_with(ScriptedSource::default(), ScriptedCompressor::default(), config);
    let registry = Arc::clone(controller.preview_registry());

    let report = controller
        .ingest_local(vec![
            LocalFile::from_bytes("a.png", tagged_image(1)),
            LocalFile::from_bytes("b.png", tagged_image(2)),
        ])
        .await
        .expect("local batch");
    assert_eq!(registry.live_count(), 2);

    let summaries = controller.summaries().expect("summaries");
    assert!(summaries.iter().all(|s| s.preview.starts_with("blob:")));

    controller.remove(report.accepted[0]).expect("remove");
    assert_eq!(registry.live_count(), 1);
    assert_eq!(summaries[0].id, report.accepted[0]);
    assert!(registry.resolve(&summaries[0].preview).is_none());
    assert!(registry.resolve(&summaries[1].preview).is_some());

    controller.discard();
    assert_eq!(registry.live_count(), 0);
}

#[tokio::test]
async fn abandoned_batch_leaves_no_items_or_previews() {
    init_logger();
    let source = ScriptedSource {
        delays_ms: HashMap::from([("1".to_string(), 5_000)]),
        ..ScriptedSource::default()
    };
    let config = IngestConfig {
        preview_mode: PreviewMode::ObjectUrl,
        ..IngestConfig::default()
    };
    let (controller, _) = controller_with(source, ScriptedCompressor::default(), config);
    let registry = Arc::clone(controller.preview_registry());

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        controller.ingest_remote(candidates(&["1"])),
    )
    .await;
    assert!(abandoned.is_err());
    assert!(controller.is_empty().expect("len"));
    assert_eq!(registry.live_count(), 0);

    // 会话仍可继续使用
    let report = controller
        .ingest_remote(candidates(&["2"]))
        .await
        .expect("next batch");
    assert_eq!(report.accepted_count(), 1);
}

#[tokio::test]
async fn removing_primary_and_finishing_exports_ordered_submission() {
    init_logger();
    let (controller, _) = controller_with(
        ScriptedSource::default(),
        ScriptedCompressor::default(),
        IngestConfig::default(),
    );
    controller.set_tier(AccountTier::Elevated).expect("tier");

    for (name, tag) in [("a.png", 1), ("b.png", 2), ("c.png", 3)] {
        controller
            .ingest_local(vec![LocalFile::from_bytes(name, tagged_image(tag))])
            .await
            .expect("single file batch");
    }
    let ids = committed_ids(&controller);
    assert_eq!(ids.len(), 3);

    controller.set_primary(ids[1]).expect("primary b");
    controller.set_primary(ids[1]).expect("primary b again");
    assert_eq!(committed_ids(&controller), ids);

    controller.remove(ids[1]).expect("remove b");
    assert_eq!(
        controller.with_set(|set| set.primary_id()).expect("read set"),
        Some(ids[0])
    );

    controller.move_item(ids[2], 0).expect("move c first");
    assert_eq!(
        controller.set_primary(ids[1]),
        Err(ImageError::UnknownItem(ids[1]))
    );

    let submission = controller.finish().expect("finish");
    let names: Vec<&str> = submission.images.iter().map(|i| i.file_name.as_str()).collect();
    assert_eq!(names, vec!["c.png", "a.png"]);
    assert_eq!(submission.primary_index, Some(1));
}

#[tokio::test]
async fn tier_downgrade_keeps_items_but_blocks_new_ones() {
    init_logger();
    let (controller, _) = controller_with(
        ScriptedSource::default(),
        ScriptedCompressor::default(),
        IngestConfig::default(),
    );
    controller.set_tier(AccountTier::Elevated).expect("tier");
    controller
        .ingest_remote(candidates(&["1", "2", "3"]))
        .await
        .expect("remote batch");

    let status = controller.set_tier(AccountTier::Base).expect("downgrade");
    assert_eq!(status.count, 3);
    assert_eq!(status.available, 0);

    let err = controller
        .ingest_local(vec![LocalFile::from_bytes("x.png", tagged_image(9))])
        .await
        .expect_err("no room after downgrade");
    assert!(matches!(err, ImageError::CapacityExceeded { available: 0, .. }));
    assert_eq!(controller.len().expect("len"), 3);
}

#[tokio::test]
async fn pager_walks_search_results_lazily() {
    init_logger();
    let (controller, _) = controller_with(
        ScriptedSource::default(),
        ScriptedCompressor::default(),
        IngestConfig {
            search_per_page: 3,
            ..IngestConfig::default()
        },
    );

    let mut pager = controller.pager("sofa").expect("pager");
    let mut pages = 0;
    let mut seen = Vec::new();
    while let Some(page) = pager.next_page().await.expect("search") {
        pages += 1;
        seen.extend(page.candidates.into_iter().map(|c| c.id));
    }

    assert_eq!(pages, 2);
    assert_eq!(seen, vec!["11", "12", "13", "21", "22", "23"]);

    let single = controller.search("sofa", 2).await.expect("single page");
    assert_eq!(single.page, 2);
    assert!(!single.has_more());
}
