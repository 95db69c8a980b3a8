// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::engines::traits::ExtractError;
use crate::utils::url_utils::resolve_url;

pub(crate) static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("valid email regex")
});

pub(crate) static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+\d{1,3}[\s.-]?)?\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}\b").expect("valid phone regex")
});

pub(crate) static HIRING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:we'?re hiring|now hiring|open positions?|job openings?|join our team)\b")
        .expect("valid hiring regex")
});

/// 解析CSS选择器，用于静态选择器常量
pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {:?}: {}", css, e))
}

static TITLE: Lazy<Selector> = Lazy::new(|| selector("title"));
static META: Lazy<Selector> = Lazy::new(|| selector("meta"));
static ANCHOR: Lazy<Selector> = Lazy::new(|| selector("a[href]"));

/// 元素的可见文本，空白已折叠
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// 在元素内按选择器取第一个非空文本
pub(crate) fn first_text(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .map(element_text)
        .find(|t| !t.is_empty())
}

/// 在元素内按选择器取第一个属性值
pub(crate) fn first_attr(element: ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    element
        .select(selector)
        .filter_map(|e| e.value().attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// 读取 `<meta property|name=key content=...>`
pub(crate) fn meta_content(document: &Html, key: &str) -> Option<String> {
    document
        .select(&META)
        .find(|m| {
            let v = m.value();
            v.attr("property").or_else(|| v.attr("name")) == Some(key)
        })
        .and_then(|m| m.value().attr("content"))
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

/// 页面标题，去掉 " | 站点名" 之类的后缀
pub(crate) fn page_title(document: &Html) -> Option<String> {
    let title = document.select(&TITLE).map(element_text).next()?;
    let head = title
        .split(" | ")
        .next()
        .and_then(|t| t.split(" - ").next())
        .unwrap_or(&title)
        .trim()
        .to_string();
    (!head.is_empty()).then_some(head)
}

/// 页面中所有链接，已解析为绝对地址
pub(crate) fn links(document: &Html, base: &Url) -> Vec<(Url, String)> {
    document
        .select(&ANCHOR)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let url = resolve_url(base, href.trim()).ok()?;
            Some((url, element_text(a)))
        })
        .collect()
}

/// 页面可见文本
pub(crate) fn document_text(document: &Html) -> String {
    element_text(document.root_element())
}

pub(crate) fn parse_base(url: &str) -> Result<Url, ExtractError> {
    Url::parse(url).map_err(|e| ExtractError::ParseError(format!("invalid page url {}: {}", url, e)))
}
