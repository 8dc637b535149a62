//! # HTTP 图库实现
//!
//! ## 设计思路
//!
//! `HttpStockSource` 对接 Unsplash 风格的 JSON 接口：
//! - 搜索：`GET {api_base}/search/photos?query=&page=&per_page=`，`Authorization: Client-ID <key>`
//! - 下载：按候选项的 `fetch_url` 拉取原始字节
//!
//! 下载地址来自第三方返回内容，因此按不可信输入处理：
//! 协议 + 主机安全（含 DNS 解析后的内网拦截）→ 手动跟随重定向并逐跳校验 →
//! 流式读取（首包/分块超时 + 体积上限）→ 文件签名探测。
//!
//! ## 实现思路
//!
//! - 可重试的状态码/网络错误按指数退避 + 抖动重试。
//! - 下载结果进入带 TTL 的 LRU 缓存，同一批次或相邻批次重复选择时不再请求网络。
//! - 日志中的 URL 一律去掉 query/fragment。

use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use lru::LruCache;
use reqwest::Url;
use serde::Deserialize;
use tokio::net::lookup_host;

use super::remote::{RemoteCandidate, RemoteSource, SearchPage, SearchQuery};
use super::{ImageError, IngestConfig};

const STREAM_SIGNATURE_PROBE_BYTES: usize = 4096;
const NETWORK_RETRY_MAX_ATTEMPTS: u8 = 3;
const NETWORK_RETRY_BASE_DELAY_MS: u64 = 180;
const BUFFER_INITIAL_CAPACITY: usize = 16 * 1024;
const USER_AGENT: &str = concat!("listing-photos/", env!("CARGO_PKG_VERSION"));

struct CachedDownload {
    created_at: Instant,
    bytes: Vec<u8>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    total_pages: u32,
    #[serde(default)]
    results: Vec<PhotoRecord>,
}

#[derive(Deserialize)]
struct PhotoRecord {
    id: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    alt_description: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    urls: PhotoUrls,
    #[serde(default)]
    user: Option<PhotoUser>,
}

#[derive(Deserialize)]
struct PhotoUrls {
    #[serde(default)]
    regular: Option<String>,
    #[serde(default)]
    full: Option<String>,
    #[serde(default)]
    small: Option<String>,
    #[serde(default)]
    thumb: Option<String>,
}

#[derive(Deserialize)]
struct PhotoUser {
    #[serde(default)]
    name: Option<String>,
}

impl PhotoRecord {
    fn into_candidate(self) -> Option<RemoteCandidate> {
        let fetch_url = self
            .urls
            .regular
            .or(self.urls.full)
            .or_else(|| self.urls.small.clone())?;

        Some(RemoteCandidate {
            id: self.id,
            fetch_url,
            description: self.description.or(self.alt_description),
            author: self.user.and_then(|u| u.name),
            thumb_url: self.urls.thumb.or(self.urls.small),
            width: self.width,
            height: self.height,
        })
    }
}

/// 基于 HTTP 的远程图库。
pub struct HttpStockSource {
    api_base: Url,
    access_key: String,
    config: IngestConfig,
    client: reqwest::Client,
    download_cache: Option<Mutex<LruCache<String, CachedDownload>>>,
}

impl HttpStockSource {
    /// 创建图库客户端。`config` 中的网络参数在创建时固定。
    pub fn new(
        api_base: &str,
        access_key: impl Into<String>,
        config: &IngestConfig,
    ) -> Result<Self, ImageError> {
        let mut api_base = Url::parse(api_base)
            .map_err(|e| ImageError::Config(format!("图库接口地址无效：{}", e)))?;
        if !api_base.path().ends_with('/') {
            let path = format!("{}/", api_base.path());
            api_base.set_path(&path);
        }

        let download_cache = NonZeroUsize::new(config.fetch_cache_entries)
            .map(|cap| Mutex::new(LruCache::new(cap)));

        Ok(Self {
            api_base,
            access_key: access_key.into(),
            config: config.clone(),
            client: Self::build_base_http_client(config)?,
            download_cache,
        })
    }

    async fn search_photos(&self, query: &SearchQuery) -> Result<SearchPage, ImageError> {
        let text = query.text.trim();
        let page = query.page.max(1);
        if text.is_empty() {
            return Ok(SearchPage {
                page,
                total_pages: 0,
                candidates: Vec::new(),
            });
        }

        let mut url = self
            .api_base
            .join("search/photos")
            .map_err(|e| ImageError::Config(format!("搜索地址无效：{}", e)))?;
        url.query_pairs_mut()
            .append_pair("query", text)
            .append_pair("page", &page.to_string())
            .append_pair("per_page", &query.per_page.clamp(1, 100).to_string());

        log::debug!("🔎 图库搜索 - query={} page={}", text, page);

        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Client-ID {}", self.access_key),
            )
            .header("Accept-Version", "v1")
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e, url.as_str()))?;

        if !response.status().is_success() {
            return Err(ImageError::Fetch(format!(
                "搜索请求失败：HTTP {}: {}",
                response.status().as_u16(),
                Self::status_message(response.status().as_u16())
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ImageError::Fetch(format!("读取搜索结果失败：{}", e)))?;
        let parsed: SearchResponse = serde_json::from_slice(&body)
            .map_err(|e| ImageError::Fetch(format!("搜索结果解析失败：{}", e)))?;

        let candidates: Vec<RemoteCandidate> = parsed
            .results
            .into_iter()
            .filter_map(PhotoRecord::into_candidate)
            .collect();

        Ok(SearchPage {
            page,
            total_pages: parsed.total_pages,
            candidates,
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        if let Some(cached) = self.get_cached_download(url) {
            log::debug!("♻️ 命中下载缓存 - URL: {}", Self::redact_url_for_log(url));
            return Ok(cached);
        }

        log::debug!("🌐 开始下载图片 - URL: {}", Self::redact_url_for_log(url));
        Self::validate_url_safety(url, &self.config).await?;
        let bytes = self.download_with_validation(url).await?;
        self.store_download_cache(url, &bytes);

        Ok(bytes)
    }

    /// 手动跟随重定向的流式下载，每一跳都重新做安全校验。
    async fn download_with_validation(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        let mut current_url = Url::parse(url)
            .map_err(|e| ImageError::InvalidFormat(format!("URL 格式错误：{}", e)))?;

        for redirect_count in 0..=self.config.max_redirects {
            let clients = self.build_request_clients_for_url(&current_url).await?;
            let response = self.send_with_retry(&clients, &current_url).await?;

            if response.status().is_redirection() {
                if redirect_count >= self.config.max_redirects {
                    return Err(ImageError::Fetch(format!(
                        "重定向次数超过限制（{}）",
                        self.config.max_redirects
                    )));
                }

                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .ok_or_else(|| ImageError::Fetch("重定向响应缺少 Location 头".to_string()))?;
                let location_str = location
                    .to_str()
                    .map_err(|e| ImageError::InvalidFormat(format!("重定向地址无效：{}", e)))?;
                let next_url = current_url
                    .join(location_str)
                    .map_err(|e| ImageError::InvalidFormat(format!("重定向 URL 解析失败：{}", e)))?;

                Self::validate_url_safety(next_url.as_str(), &self.config).await?;

                log::debug!("↪️ 跳转到: {}", Self::redact_url_for_log(next_url.as_str()));
                current_url = next_url;
                continue;
            }

            if !response.status().is_success() {
                return Err(ImageError::Fetch(format!(
                    "HTTP {}: {}",
                    response.status().as_u16(),
                    Self::status_message(response.status().as_u16())
                )));
            }

            if let Some(ct) = response.headers().get(reqwest::header::CONTENT_TYPE) {
                if let Ok(ct_str) = ct.to_str() {
                    if !Self::is_image_content_type(ct_str) {
                        return Err(ImageError::InvalidFormat(format!("不是图片类型：{}", ct_str)));
                    }
                }
            }

            let total_len = response
                .headers()
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|cl| cl.to_str().ok())
                .and_then(|cl| cl.parse::<u64>().ok());

            if let Some(size) = total_len {
                if size > self.config.max_file_size {
                    return Err(ImageError::ResourceLimit(format!(
                        "文件过大：{:.2} MB（限制：{:.2} MB）",
                        size as f64 / 1024.0 / 1024.0,
                        self.config.max_file_size as f64 / 1024.0 / 1024.0
                    )));
                }
            }

            return self.read_body(response, total_len).await;
        }

        Err(ImageError::Fetch("下载流程异常结束".to_string()))
    }

    async fn read_body(
        &self,
        mut response: reqwest::Response,
        total_len: Option<u64>,
    ) -> Result<Vec<u8>, ImageError> {
        let initial_capacity = total_len
            .map(|len| len.min(self.config.max_file_size).min(usize::MAX as u64) as usize)
            .filter(|len| *len > 0)
            .unwrap_or(BUFFER_INITIAL_CAPACITY);
        let mut buffer = Vec::with_capacity(initial_capacity);
        let mut total: u64 = 0;
        let mut signature_validated = false;
        let mut received_first_chunk = false;

        loop {
            let read_timeout = if received_first_chunk {
                Duration::from_millis(self.config.stream_chunk_timeout_ms)
            } else {
                Duration::from_millis(self.config.stream_first_byte_timeout_ms)
            };

            let next_chunk_result = tokio::time::timeout(read_timeout, response.chunk())
                .await
                .map_err(|_| {
                    if received_first_chunk {
                        ImageError::Timeout("下载数据流读取超时".to_string())
                    } else {
                        ImageError::Timeout("下载首包超时".to_string())
                    }
                })?;

            let Some(chunk) =
                next_chunk_result.map_err(|e| ImageError::Fetch(format!("下载失败：{}", e)))?
            else {
                break;
            };

            received_first_chunk = true;
            total = total.saturating_add(chunk.len() as u64);
            if total > self.config.max_file_size {
                return Err(ImageError::ResourceLimit("下载后文件超过大小限制".to_string()));
            }
            buffer.extend_from_slice(&chunk);

            if !signature_validated {
                signature_validated =
                    Self::validate_stream_signature_probe(&buffer, STREAM_SIGNATURE_PROBE_BYTES)?;
            }
        }

        if !signature_validated {
            super::preview::sniff_image_mime(&buffer)?;
        }

        log::debug!("✅ 下载完成 - {} bytes", total);
        Ok(buffer)
    }

    async fn send_with_retry(
        &self,
        clients: &[reqwest::Client],
        url: &Url,
    ) -> Result<reqwest::Response, ImageError> {
        let mut attempt: u8 = 1;
        loop {
            let client_idx = (attempt.saturating_sub(1) as usize) % clients.len();
            let send_result = clients[client_idx]
                .get(url.clone())
                .header(reqwest::header::USER_AGENT, USER_AGENT)
                .header(
                    reqwest::header::ACCEPT,
                    "image/avif,image/webp,image/apng,image/*,*/*;q=0.8",
                )
                .send()
                .await;

            match send_result {
                Ok(resp) => {
                    if attempt < NETWORK_RETRY_MAX_ATTEMPTS
                        && Self::is_retryable_http_status(resp.status())
                    {
                        let delay_ms = Self::compute_retry_delay_with_jitter(
                            attempt,
                            Self::retry_after_hint_ms(resp.headers()),
                        );
                        log::warn!(
                            "⚠️ HTTP {}（第 {}/{} 次，可重试）；{}ms 后重试",
                            resp.status().as_u16(),
                            attempt,
                            NETWORK_RETRY_MAX_ATTEMPTS,
                            delay_ms
                        );
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        attempt = attempt.saturating_add(1);
                        continue;
                    }

                    return Ok(resp);
                }
                Err(err) => {
                    if attempt >= NETWORK_RETRY_MAX_ATTEMPTS
                        || !Self::is_retryable_network_error(&err)
                    {
                        return Err(self.map_reqwest_error(err, url.as_str()));
                    }

                    let delay_ms = Self::compute_retry_delay_with_jitter(attempt, None);
                    log::warn!(
                        "⚠️ 网络请求失败（第 {}/{} 次，可重试）：{}；{}ms 后重试",
                        attempt,
                        NETWORK_RETRY_MAX_ATTEMPTS,
                        Self::sanitize_error_message_with_redacted_url(&err.to_string(), url.as_str()),
                        delay_ms
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    /// 需要 DNS 校验时，为每个公网解析结果构建一个绑定地址的客户端，避免校验后被重新解析到内网。
    async fn build_request_clients_for_url(
        &self,
        url: &Url,
    ) -> Result<Vec<reqwest::Client>, ImageError> {
        if self.config.allow_private_network || !self.config.resolve_dns_for_url_safety {
            return Ok(vec![self.client.clone()]);
        }

        let host = match url.host_str() {
            Some(host) => host,
            None => return Ok(vec![self.client.clone()]),
        };

        let bare_host = host.trim_start_matches('[').trim_end_matches(']');
        if bare_host.parse::<IpAddr>().is_ok() {
            return Ok(vec![self.client.clone()]);
        }

        let port = url
            .port_or_known_default()
            .ok_or_else(|| ImageError::InvalidFormat("URL 缺少端口信息".to_string()))?;

        let pinned = Self::resolve_public_socket_addrs(host, port).await?;
        if pinned.is_empty() {
            return Err(ImageError::InvalidFormat("URL 未解析到有效公网地址".to_string()));
        }

        let mut clients = Vec::with_capacity(pinned.len());
        for addr in pinned {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(self.config.download_timeout))
                .connect_timeout(Duration::from_secs(self.config.connect_timeout))
                .redirect(reqwest::redirect::Policy::none())
                .resolve(host, addr)
                .build()
                .map_err(|e| ImageError::Fetch(format!("无法创建 DNS 绑定客户端：{}", e)))?;
            clients.push(client);
        }

        Ok(clients)
    }

    fn build_base_http_client(config: &IngestConfig) -> Result<reqwest::Client, ImageError> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(config.download_timeout))
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ImageError::Config(format!("无法创建 HTTP 客户端：{}", e)))
    }

    async fn resolve_public_socket_addrs(
        host: &str,
        port: u16,
    ) -> Result<Vec<SocketAddr>, ImageError> {
        let addrs = lookup_host((host, port))
            .await
            .map_err(|e| ImageError::Fetch(format!("URL 主机解析失败：{}", e)))?;

        let mut result = Vec::new();
        for addr in addrs {
            if Self::is_private_or_local_ip(addr.ip()) {
                return Err(ImageError::InvalidFormat(format!(
                    "URL 解析结果命中内网地址：{}",
                    addr.ip()
                )));
            }
            result.push(addr);
        }

        Ok(result)
    }

    /// 校验 URL 安全性。默认阻止本地/内网目标，防止 SSRF。
    async fn validate_url_safety(url: &str, config: &IngestConfig) -> Result<(), ImageError> {
        let parsed = Url::parse(url)
            .map_err(|e| ImageError::InvalidFormat(format!("URL 格式错误：{}", e)))?;

        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ImageError::InvalidFormat("仅支持 HTTP/HTTPS".to_string()));
        }

        if config.allow_private_network {
            return Ok(());
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| ImageError::InvalidFormat("URL 缺少主机地址".to_string()))?;

        if Self::is_local_hostname(host) {
            return Err(ImageError::InvalidFormat(format!(
                "禁止访问本地网络地址：{}",
                host
            )));
        }

        let bare_host = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare_host.parse::<IpAddr>() {
            if Self::is_private_or_local_ip(ip) {
                return Err(ImageError::InvalidFormat(format!("禁止访问内网 IP：{}", ip)));
            }
            return Ok(());
        }

        if config.resolve_dns_for_url_safety {
            let port = parsed
                .port_or_known_default()
                .ok_or_else(|| ImageError::InvalidFormat("URL 缺少端口信息".to_string()))?;

            if Self::resolve_public_socket_addrs(host, port).await?.is_empty() {
                return Err(ImageError::InvalidFormat("URL 未解析到有效地址".to_string()));
            }
        }

        Ok(())
    }

    fn is_local_hostname(host: &str) -> bool {
        host.eq_ignore_ascii_case("localhost")
            || host.eq_ignore_ascii_case("localhost.")
            || host.ends_with(".local")
    }

    /// 判断 IP 是否属于本地/内网/链路本地等受限范围。
    fn is_private_or_local_ip(ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => {
                if v4.is_private()
                    || v4.is_loopback()
                    || v4.is_link_local()
                    || v4.is_broadcast()
                    || v4.is_documentation()
                    || v4.is_unspecified()
                    || v4.is_multicast()
                {
                    return true;
                }

                let octets = v4.octets();
                octets[0] == 0 || (octets[0] == 100 && (octets[1] & 0b1100_0000) == 0b0100_0000)
            }
            IpAddr::V6(v6) => {
                if let Some(v4) = v6.to_ipv4_mapped() {
                    return Self::is_private_or_local_ip(IpAddr::V4(v4));
                }

                v6.is_loopback()
                    || v6.is_unspecified()
                    || v6.is_unique_local()
                    || v6.is_unicast_link_local()
                    || v6.is_multicast()
            }
        }
    }

    fn get_cached_download(&self, url: &str) -> Option<Vec<u8>> {
        let cache = self.download_cache.as_ref()?;
        let mut cache = cache.lock().ok()?;
        let ttl = Duration::from_secs(self.config.fetch_cache_ttl_secs);

        let expired = cache.peek(url).is_some_and(|item| item.created_at.elapsed() > ttl);
        if expired {
            cache.pop(url);
            return None;
        }

        cache.get(url).map(|item| item.bytes.clone())
    }

    fn store_download_cache(&self, url: &str, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let Some(cache) = self.download_cache.as_ref() else {
            return;
        };
        let Ok(mut cache) = cache.lock() else {
            return;
        };

        cache.put(
            url.to_string(),
            CachedDownload {
                created_at: Instant::now(),
                bytes: bytes.to_vec(),
            },
        );
    }

    fn retry_after_hint_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
        let value = headers.get(reqwest::header::RETRY_AFTER)?;
        let secs = value.to_str().ok()?.trim().parse::<u64>().ok()?;
        Some(secs.saturating_mul(1000).min(5_000))
    }

    fn compute_retry_delay_with_jitter(attempt: u8, server_hint_ms: Option<u64>) -> u64 {
        let exp = NETWORK_RETRY_BASE_DELAY_MS
            .saturating_mul(1_u64 << (attempt.saturating_sub(1) as u32));
        let base = server_hint_ms.unwrap_or(exp);
        let jitter_bound = (base / 2).max(1);
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        base.saturating_add(seed % (jitter_bound + 1))
    }

    fn is_retryable_http_status(status: reqwest::StatusCode) -> bool {
        status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
    }

    fn is_retryable_network_error(error: &reqwest::Error) -> bool {
        if error.is_timeout() || error.is_connect() {
            return true;
        }

        let msg = error.to_string().to_lowercase();
        msg.contains("connection reset")
            || msg.contains("connection closed before message completed")
            || msg.contains("tls handshake")
    }

    fn is_image_content_type(content_type: &str) -> bool {
        content_type
            .split(';')
            .next()
            .map(|base| {
                let base = base.trim().to_ascii_lowercase();
                base.starts_with("image/") || base == "application/octet-stream"
            })
            .unwrap_or(false)
    }

    fn redact_url_for_log(url: &str) -> String {
        let Ok(parsed) = Url::parse(url) else {
            return "<invalid-url>".to_string();
        };

        let host = parsed.host_str().unwrap_or("<unknown-host>");
        let port = parsed.port().map(|p| format!(":{}", p)).unwrap_or_default();
        format!("{}://{}{}{}", parsed.scheme(), host, port, parsed.path())
    }

    fn sanitize_error_message_with_redacted_url(error_msg: &str, url: &str) -> String {
        error_msg.replace(url, &Self::redact_url_for_log(url))
    }

    fn map_reqwest_error(&self, e: reqwest::Error, url: &str) -> ImageError {
        let err_msg = Self::sanitize_error_message_with_redacted_url(&e.to_string(), url);

        if e.is_timeout() {
            ImageError::Timeout(format!("请求超时（{}秒）", self.config.download_timeout))
        } else if e.is_connect() {
            ImageError::Fetch(format!("无法连接：{}", err_msg))
        } else {
            ImageError::Fetch(format!("请求失败：{}", err_msg))
        }
    }

    fn status_message(code: u16) -> &'static str {
        match code {
            401 => "图库密钥无效",
            403 => "访问被拒绝",
            404 => "未找到",
            429 => "请求过于频繁",
            500..=599 => "服务器错误",
            _ => "请求失败",
        }
    }

    /// 流式下载阶段的签名探测：
    /// - `Ok(true)`：已识别为图片
    /// - `Ok(false)`：字节不足以判断，继续下载
    /// - `Err(...)`：已识别为非图片，或达到探测上限仍无法识别
    fn validate_stream_signature_probe(bytes: &[u8], probe_limit: usize) -> Result<bool, ImageError> {
        if bytes.is_empty() {
            return Ok(false);
        }

        if let Some(kind) = infer::get(bytes) {
            if kind.matcher_type() != infer::MatcherType::Image {
                return Err(ImageError::InvalidFormat(format!(
                    "下载内容不是图片类型：{}",
                    kind.mime_type()
                )));
            }
            return Ok(true);
        }

        if bytes.len() >= probe_limit {
            return Err(ImageError::InvalidFormat(format!(
                "下载前 {} 字节内无法识别图片类型",
                probe_limit
            )));
        }

        Ok(false)
    }
}

impl RemoteSource for HttpStockSource {
    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, ImageError> {
        self.search_photos(query).await
    }

    async fn fetch_bytes(&self, candidate: &RemoteCandidate) -> Result<Vec<u8>, ImageError> {
        self.download(&candidate.fetch_url)
            .await
            .map_err(ImageError::into_fetch)
    }
}
