//! # 远程图源抽象
//!
//! ## 设计思路
//!
//! 第三方图库只依赖两个能力：`search`（分页、每次有限条）与 `fetch_bytes`
//! （按候选项单独下载，可单独失败）。核心流程只面向该 trait，
//! 测试可以用假实现替代网络。
//!
//! 返回 `impl Future + Send`，便于控制器把每个候选项放到独立任务中并发执行。

use std::future::Future;

use serde::{Deserialize, Serialize};

use super::ImageError;

/// 远程候选图片（元数据 + 下载地址）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCandidate {
    pub id: String,
    pub fetch_url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub thumb_url: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl RemoteCandidate {
    pub fn new(id: impl Into<String>, fetch_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fetch_url: fetch_url.into(),
            description: None,
            author: None,
            thumb_url: None,
            width: None,
            height: None,
        }
    }

    /// 展示名：优先描述，其次标识。
    pub fn display_name(&self) -> String {
        match self.description.as_deref().map(str::trim) {
            Some(desc) if !desc.is_empty() => desc.to_string(),
            _ => format!("remote-{}", self.id),
        }
    }
}

/// 搜索请求。页码从 1 开始。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub page: u32,
    pub per_page: u32,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, per_page: u32) -> Self {
        Self {
            text: text.into(),
            page: 1,
            per_page,
        }
    }
}

/// 单页搜索结果。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchPage {
    pub page: u32,
    pub total_pages: u32,
    pub candidates: Vec<RemoteCandidate>,
}

impl SearchPage {
    pub fn has_more(&self) -> bool {
        self.page < self.total_pages
    }
}

/// 远程图源能力。
pub trait RemoteSource: Send + Sync + 'static {
    fn search(
        &self,
        query: &SearchQuery,
    ) -> impl Future<Output = Result<SearchPage, ImageError>> + Send;

    fn fetch_bytes(
        &self,
        candidate: &RemoteCandidate,
    ) -> impl Future<Output = Result<Vec<u8>, ImageError>> + Send;
}

/// 惰性翻页器：每次 `next_page` 才发起一次搜索，最后一页之后返回 `None`。
pub struct SearchPager<'a, R: RemoteSource> {
    source: &'a R,
    query: SearchQuery,
    exhausted: bool,
}

impl<'a, R: RemoteSource> SearchPager<'a, R> {
    pub fn new(source: &'a R, query: SearchQuery) -> Self {
        let exhausted = query.text.trim().is_empty();
        Self {
            source,
            query,
            exhausted,
        }
    }

    pub async fn next_page(&mut self) -> Result<Option<SearchPage>, ImageError> {
        if self.exhausted {
            return Ok(None);
        }

        let page = self.source.search(&self.query).await?;
        if !page.has_more() || page.candidates.is_empty() {
            self.exhausted = true;
        } else {
            self.query.page = self.query.page.saturating_add(1);
        }

        Ok(Some(page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ThreePages {
        calls: AtomicU32,
    }

    impl RemoteSource for ThreePages {
        async fn search(&self, query: &SearchQuery) -> Result<SearchPage, ImageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SearchPage {
                page: query.page,
                total_pages: 3,
                candidates: vec![RemoteCandidate::new(
                    format!("p{}", query.page),
                    format!("https://img.example/{}.jpg", query.page),
                )],
            })
        }

        async fn fetch_bytes(&self, _candidate: &RemoteCandidate) -> Result<Vec<u8>, ImageError> {
            Err(ImageError::Fetch("not used".into()))
        }
    }

    #[tokio::test]
    async fn pager_is_lazy_and_finite() {
        let source = ThreePages {
            calls: AtomicU32::new(0),
        };
        let mut pager = SearchPager::new(&source, SearchQuery::new("sofa", 10));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);

        let mut seen = Vec::new();
        while let Some(page) = pager.next_page().await.expect("search") {
            seen.push(page.candidates[0].id.clone());
        }

        assert_eq!(seen, vec!["p1", "p2", "p3"]);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert!(pager.next_page().await.expect("after end").is_none());
    }

    #[tokio::test]
    async fn blank_query_yields_nothing() {
        let source = ThreePages {
            calls: AtomicU32::new(0),
        };
        let mut pager = SearchPager::new(&source, SearchQuery::new("   ", 10));
        assert!(pager.next_page().await.expect("blank").is_none());
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let mut candidate = RemoteCandidate::new("abc", "https://img.example/abc.jpg");
        assert_eq!(candidate.display_name(), "remote-abc");
        candidate.description = Some("  Red bicycle ".into());
        assert_eq!(candidate.display_name(), "Red bicycle");
    }
}
