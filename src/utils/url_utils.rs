// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use url::{ParseError, Url};

/// 将可能为相对路径的URL转换为绝对路径URL
pub fn resolve_url(base_url: &Url, path: &str) -> Result<Url, ParseError> {
    base_url.join(path)
}

/// 规范化域名
///
/// 接受完整URL或裸域名，返回小写、去除 `www.` 前缀、端口和末尾点号的主机名。
///
/// # 参数
///
/// * `input` - URL或域名
///
/// # 返回值
///
/// 规范化后的域名；无法识别主机时返回None
pub fn normalize_domain(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let url = Url::parse(&candidate).ok()?;
    let host = url.host_str()?.trim_end_matches('.').to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

    if host.is_empty() || !host.contains('.') {
        return None;
    }
    Some(host)
}

/// 从邮箱地址中取出域名部分
pub fn email_domain(email: &str) -> Option<String> {
    let (_, domain) = email.rsplit_once('@')?;
    normalize_domain(domain)
}

/// 生成限流键
///
/// 以规范化主机名作为每个目标站点的限流键，无法解析时退回原始字符串。
pub fn rate_limit_key(url: &str) -> String {
    normalize_domain(url)
        .or_else(|| {
            Url::parse(url)
                .ok()
                .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        })
        .unwrap_or_else(|| url.trim().to_lowercase())
}

/// 判断两个URL是否属于同一主机
pub fn same_host(a: &Url, b: &Url) -> bool {
    match (a.host_str(), b.host_str()) {
        (Some(x), Some(y)) => {
            x.trim_start_matches("www.").eq_ignore_ascii_case(y.trim_start_matches("www."))
        }
        _ => false,
    }
}
