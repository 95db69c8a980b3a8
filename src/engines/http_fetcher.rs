// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::COOKIE;
use reqwest::Client;
use scraper::Html;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::engines::proxy_manager::ProxyChoice;
use crate::engines::traits::{ExtractError, FetchedPage};
use crate::utils::robots::{RobotsChecker, RobotsCheckerTrait};

/// 人机校验拦截页特征，出现即视为被拦截
static CHALLENGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(cf-challenge|cf_chl_|challenge-platform|px-captcha|are you a robot|unusual traffic|verify you are (?:a )?human|checking your browser)",
    )
    .expect("valid challenge regex")
});

/// 验证码组件，普通页面的表单里也常见，只在页面几乎没有其他内容时算作拦截
static CAPTCHA_WIDGET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(g-recaptcha|h-captcha|hcaptcha)").expect("valid captcha regex"));

/// 可见文本少于该字符数的验证码页视为拦截页
const CHALLENGE_MAX_TEXT: usize = 200;

const DIRECT_KEY: &str = "direct";

/// HTTP抓取配置
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub user_agent: String,
    pub request_timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (compatible; leadrs/0.1)".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// 将HTTP状态码映射为抽取错误，成功状态返回None
pub fn classify_status(status: u16, url: &str) -> Option<ExtractError> {
    match status {
        200..=399 => None,
        401 | 403 | 407 | 429 => Some(ExtractError::Blocked(format!("HTTP {} from {}", status, url))),
        408 => Some(ExtractError::Timeout(format!("HTTP 408 from {}", url))),
        400..=499 => Some(ExtractError::NotFound(format!("HTTP {} from {}", status, url))),
        _ => Some(ExtractError::Timeout(format!("HTTP {} from {}", status, url))),
    }
}

/// 页面是否为验证码/人机校验页
///
/// 带验证码组件的普通页面（如联系表单）不算
pub fn looks_like_captcha(body: &str) -> bool {
    if CHALLENGE_RE.is_match(body) {
        return true;
    }
    CAPTCHA_WIDGET_RE.is_match(body) && visible_text_len(body) < CHALLENGE_MAX_TEXT
}

/// 页面可见文本的字符数，不含脚本和样式
fn visible_text_len(body: &str) -> usize {
    let document = Html::parse_document(body);
    document
        .tree
        .root()
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let hidden = node
                .parent()
                .and_then(|p| p.value().as_element().map(|e| e.name()))
                .is_some_and(|name| matches!(name, "script" | "style" | "noscript"));
            (!hidden).then(|| text.split_whitespace().map(str::len).sum::<usize>())
        })
        .sum()
}

fn classify_transport(e: &reqwest::Error, url: &str) -> ExtractError {
    if e.is_timeout() {
        ExtractError::Timeout(format!("request to {} timed out", url))
    } else if e.is_decode() || e.is_body() {
        ExtractError::ParseError(format!("undecodable body from {}: {}", url, e))
    } else {
        ExtractError::Timeout(format!("request to {} failed: {}", url, e))
    }
}

/// 共享的HTTP抓取器
///
/// 按代理地址缓存 reqwest 客户端，统一处理状态码映射、验证码识别和 robots.txt 检查
pub struct HttpFetcher {
    config: FetcherConfig,
    clients: DashMap<String, Client>,
    robots: Arc<dyn RobotsCheckerTrait>,
}

impl HttpFetcher {
    pub fn new(config: FetcherConfig) -> Self {
        let robots_client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self::with_robots(config, Arc::new(RobotsChecker::new(robots_client, 256)))
    }

    pub fn with_robots(config: FetcherConfig, robots: Arc<dyn RobotsCheckerTrait>) -> Self {
        Self {
            config,
            clients: DashMap::new(),
            robots,
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.config.user_agent
    }

    fn client_for(&self, proxy: &ProxyChoice) -> Result<Client, ExtractError> {
        let key = proxy.address().unwrap_or(DIRECT_KEY).to_string();
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .user_agent(self.config.user_agent.clone())
            .timeout(self.config.request_timeout)
            .cookie_store(true);

        if let Some(address) = proxy.address() {
            let proxy = reqwest::Proxy::all(address)
                .map_err(|e| ExtractError::Timeout(format!("invalid proxy {}: {}", address, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| ExtractError::Timeout(format!("failed to build HTTP client: {}", e)))?;
        self.clients.insert(key, client.clone());
        Ok(client)
    }

    /// 获取单个页面
    ///
    /// # 参数
    ///
    /// * `url` - 页面地址
    /// * `proxy` - 使用的代理
    /// * `cookie` - 可选的会话Cookie
    ///
    /// # 返回值
    ///
    /// * `Ok(FetchedPage)` - 成功状态码的页面
    /// * `Err(ExtractError)` - 按状态码或传输错误分类后的错误
    pub async fn get(
        &self,
        url: &str,
        proxy: &ProxyChoice,
        cookie: Option<&str>,
    ) -> Result<FetchedPage, ExtractError> {
        let client = self.client_for(proxy)?;
        let mut request = client.get(url);
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }

        let response = request.send().await.map_err(|e| {
            debug!(url = url, error = %e, "HTTP request failed");
            classify_transport(&e, url)
        })?;

        let status = response.status().as_u16();
        if let Some(err) = classify_status(status, url) {
            debug!(url = url, status = status, "HTTP status mapped to extract error");
            return Err(err);
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(&e, url))?;

        if looks_like_captcha(&body) {
            warn!(url = url, "Captcha page detected");
            return Err(ExtractError::Blocked(format!("captcha challenge at {}", url)));
        }

        Ok(FetchedPage {
            url: url.to_string(),
            status,
            body,
        })
    }

    /// 检查 robots.txt 是否允许抓取，检查本身失败时按允许处理
    pub async fn check_robots(&self, url: &str) -> Result<(), ExtractError> {
        match self.robots.is_allowed(url, &self.config.user_agent).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ExtractError::NotFound(format!("disallowed by robots.txt: {}", url))),
            Err(e) => {
                debug!(url = url, error = %e, "robots.txt check failed, allowing");
                Ok(())
            }
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(FetcherConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(FetcherConfig {
            user_agent: "leadrs-test".to_string(),
            request_timeout: Duration::from_millis(500),
        })
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(200, "u"), None);
        assert_eq!(classify_status(301, "u"), None);
        assert!(matches!(classify_status(403, "u"), Some(ExtractError::Blocked(_))));
        assert!(matches!(classify_status(429, "u"), Some(ExtractError::Blocked(_))));
        assert!(matches!(classify_status(404, "u"), Some(ExtractError::NotFound(_))));
        assert!(matches!(classify_status(410, "u"), Some(ExtractError::NotFound(_))));
        assert!(matches!(classify_status(408, "u"), Some(ExtractError::Timeout(_))));
        assert!(matches!(classify_status(503, "u"), Some(ExtractError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_get_maps_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>hello</html>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/forbidden"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fetcher = fetcher();
        let page = fetcher
            .get(&format!("{}/ok", server.uri()), &ProxyChoice::Direct, None)
            .await
            .unwrap();
        assert_eq!(page.status, 200);
        assert!(page.body.contains("hello"));

        let err = fetcher
            .get(&format!("{}/forbidden", server.uri()), &ProxyChoice::Direct, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Blocked(_)));

        let err = fetcher
            .get(&format!("{}/down", server.uri()), &ProxyChoice::Direct, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Timeout(_)));

        let err = fetcher
            .get(&format!("{}/missing", server.uri()), &ProxyChoice::Direct, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_captcha_page_is_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<div class=\"g-recaptcha\">Are you a robot?</div>"),
            )
            .mount(&server)
            .await;

        let err = fetcher()
            .get(&server.uri(), &ProxyChoice::Direct, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Blocked(_)));
    }

    #[test]
    fn test_captcha_widget_alone_is_not_a_challenge() {
        let filler = "We build industrial widgets for factories across Texas. ".repeat(8);
        let contact_form = format!(
            "<html><body><h1>Acme Widgets</h1><p>{}</p>\
             <form><input name=\"email\"><div class=\"g-recaptcha\" data-sitekey=\"x\"></div></form>\
             <script src=\"https://www.google.com/recaptcha/api.js\"></script></body></html>",
            filler
        );
        assert!(!looks_like_captcha(&contact_form));

        // 只有组件没有内容的页面
        let bare = r#"<html><body><div class="h-captcha" data-sitekey="x"></div></body></html>"#;
        assert!(looks_like_captcha(bare));

        let interstitial = r#"<html><body><div id="cf-challenge-running">Checking your browser before accessing</div></body></html>"#;
        assert!(looks_like_captcha(interstitial));
    }

    #[tokio::test]
    async fn test_default_user_agent_is_neutral() {
        let config = FetcherConfig::default();
        assert!(!config.user_agent.contains("http"));

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("user-agent", config.user_agent.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>ok</p>"))
            .expect(1)
            .mount(&server)
            .await;

        let page = HttpFetcher::new(config)
            .get(&server.uri(), &ProxyChoice::Direct, None)
            .await
            .unwrap();
        assert!(page.body.contains("ok"));
    }

    #[tokio::test]
    async fn test_page_with_recaptcha_form_is_fetched() {
        let server = MockServer::start().await;
        let body = format!(
            "<html><body><p>{}</p><form><div class=\"g-recaptcha\"></div></form></body></html>",
            "Contact Acme Widgets about bulk orders and custom fabrication. ".repeat(5)
        );
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let page = fetcher()
            .get(&server.uri(), &ProxyChoice::Direct, None)
            .await
            .unwrap();
        assert!(page.body.contains("g-recaptcha"));
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let err = fetcher()
            .get(&server.uri(), &ProxyChoice::Direct, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_session_cookie_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("cookie", "li_at=secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let page = fetcher()
            .get(&server.uri(), &ProxyChoice::Direct, Some("li_at=secret"))
            .await
            .unwrap();
        assert_eq!(page.body, "ok");
    }

    #[tokio::test]
    async fn test_robots_disallow_maps_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private"),
            )
            .mount(&server)
            .await;

        let fetcher = fetcher();
        assert!(fetcher.check_robots(&format!("{}/public", server.uri())).await.is_ok());
        let err = fetcher
            .check_robots(&format!("{}/private/team", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::NotFound(_)));
    }
}
