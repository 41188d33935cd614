//! MacCMS v10 style collection API client.
//!
//! Listing: `{api}?ac=list&pg=N[&h=H]`. Detail: `{api}?ac=detail&ids=a,b`.
//! Both answer `{"code":1,"page":..,"pagecount":..,"list":[..],"class":[..]}`.

use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone};
use serde_json::Value;
use tracing::debug;
use vodsync_core::types::{RawRecord, ResponseFormat, Source};

use crate::FetchError;
use crate::api::{CatalogApi, ListPage};
use crate::catalog::RemoteCategory;

const DATE_TIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y/%m/%d %H:%M:%S"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

pub struct MacCmsClient {
    client: reqwest::Client,
}

impl MacCmsClient {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(format!("build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        debug!(url = %url, "catalog request");

        let resp = self.client.get(url).send().await.map_err(map_reqwest)?;
        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status().as_u16()));
        }
        resp.text().await.map_err(map_reqwest)
    }
}

fn map_reqwest(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(e.to_string())
    }
}

fn separator(api_url: &str) -> char {
    if api_url.contains('?') { '&' } else { '?' }
}

pub fn list_url(api_url: &str, page: u32, window_hours: Option<u32>) -> String {
    let mut url = format!("{api_url}{}ac=list&pg={page}", separator(api_url));
    if let Some(hours) = window_hours {
        url.push_str(&format!("&h={hours}"));
    }
    url
}

pub fn detail_url(api_url: &str, remote_ids: &[String]) -> String {
    format!(
        "{api_url}{}ac=detail&ids={}",
        separator(api_url),
        remote_ids.join(",")
    )
}

#[async_trait::async_trait]
impl CatalogApi for MacCmsClient {
    fn name(&self) -> &str {
        "maccms"
    }

    fn supports(&self, format: ResponseFormat) -> bool {
        format == ResponseFormat::Json
    }

    async fn list_page(
        &self,
        source: &Source,
        page: u32,
        window_hours: Option<u32>,
    ) -> Result<ListPage, FetchError> {
        let body = self
            .get_text(&list_url(&source.api_url, page, window_hours))
            .await?;
        parse_page(&body, page)
    }

    async fn detail(
        &self,
        source: &Source,
        remote_ids: &[String],
    ) -> Result<ListPage, FetchError> {
        if remote_ids.is_empty() {
            return Ok(ListPage::default());
        }
        let body = self
            .get_text(&detail_url(&source.api_url, remote_ids))
            .await?;
        parse_page(&body, 1)
    }
}

/// Decode a response body. A body that is not JSON or whose `code` is not 1
/// is a parse error for the whole page; individual items without an id or
/// name are dropped and counted in `rejected`.
pub fn parse_page(body: &str, page: u32) -> Result<ListPage, FetchError> {
    let data: Value =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(format!("parse JSON: {e}")))?;
    parse_payload(&data, page)
}

pub fn parse_payload(data: &Value, page: u32) -> Result<ListPage, FetchError> {
    match value_i64(&data["code"]) {
        Some(1) => {}
        code => {
            let msg = data["msg"].as_str().unwrap_or("");
            return Err(FetchError::Parse(format!(
                "source answered code {} {msg}",
                code.map(|c| c.to_string()).unwrap_or_else(|| "none".into())
            )));
        }
    }

    let mut items = Vec::new();
    let mut rejected = 0;
    for item in data["list"].as_array().map(Vec::as_slice).unwrap_or_default() {
        match parse_record(item) {
            Some(record) => items.push(record),
            None => rejected += 1,
        }
    }

    let classes = data["class"]
        .as_array()
        .map(|cs| {
            cs.iter()
                .filter_map(|c| {
                    Some(RemoteCategory {
                        remote_type_id: value_string(&c["type_id"])?,
                        name: value_string(&c["type_name"]).unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ListPage {
        page: value_i64(&data["page"])
            .and_then(|p| u32::try_from(p).ok())
            .unwrap_or(page),
        page_count: value_i64(&data["pagecount"]).and_then(|p| u32::try_from(p).ok()),
        items,
        classes,
        rejected,
    })
}

/// Decode one item. `None` when it has no remote id or no name.
pub fn parse_record(v: &Value) -> Option<RawRecord> {
    let remote_id = value_string(&v["vod_id"])?;
    let name = value_string(&v["vod_name"])?;

    let text = |key: &str| value_string(&v[key]).unwrap_or_default();
    let blurb = value_string(&v["vod_blurb"])
        .or_else(|| value_string(&v["vod_content"]))
        .unwrap_or_default();

    Some(RawRecord {
        remote_id,
        name,
        name_en: text("vod_en"),
        remote_type_id: text("type_id"),
        remote_type_name: text("type_name"),
        play_from: text("vod_play_from"),
        play_url: text("vod_play_url"),
        year: text("vod_year"),
        pic: text("vod_pic"),
        remarks: text("vod_remarks"),
        actor: text("vod_actor"),
        director: text("vod_director"),
        blurb,
        area: text("vod_area"),
        lang: text("vod_lang"),
        class: text("vod_class"),
        time: parse_time(&v["vod_time"]),
        hits: value_i64(&v["vod_hits"]).unwrap_or(0),
    })
}

/// Parse a `vod_time` value: unix seconds (number or digit string) or one of
/// the date formats sources use, read as local time.
pub fn parse_time(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => parse_time_str(s.trim()),
        _ => None,
    }
}

fn parse_time_str(s: &str) -> Option<i64> {
    if s.is_empty() {
        return None;
    }
    if let Ok(ts) = s.parse::<i64>() {
        return Some(ts);
    }

    let naive = DATE_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
}

/// Strings are trimmed; numbers are accepted for id-like fields.
fn value_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn urls_pick_the_right_separator() {
        assert_eq!(
            list_url("http://a/api.php/provide/vod/", 2, None),
            "http://a/api.php/provide/vod/?ac=list&pg=2"
        );
        assert_eq!(
            list_url("http://a/api.php?mod=vod", 1, Some(24)),
            "http://a/api.php?mod=vod&ac=list&pg=1&h=24"
        );
        assert_eq!(
            detail_url("http://a/api.php", &["1".into(), "22".into()]),
            "http://a/api.php?ac=detail&ids=1,22"
        );
    }

    #[test]
    fn parse_listing_page() {
        let data = json!({
            "code": 1,
            "msg": "数据列表",
            "page": "2",
            "pagecount": 40,
            "list": [
                {
                    "vod_id": 1001,
                    "vod_name": "功夫",
                    "type_id": 6,
                    "type_name": "动作片",
                    "vod_time": "2024-03-01 10:00:00",
                    "vod_remarks": "HD",
                    "vod_play_from": "wj",
                    "vod_play_url": "正片$http://a/1.m3u8",
                    "vod_content": "斧头帮",
                    "vod_hits": "12"
                },
                { "vod_id": 1002, "vod_name": "" },
                { "vod_name": "no id" }
            ],
            "class": [
                { "type_id": 6, "type_name": "动作片" },
                { "type_id": "13", "type_name": "国产剧" }
            ]
        });

        let page = parse_payload(&data, 2).unwrap();
        assert_eq!(page.page, 2);
        assert_eq!(page.page_count, Some(40));
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.rejected, 2);
        assert_eq!(page.classes.len(), 2);
        assert_eq!(page.classes[1].remote_type_id, "13");

        let item = &page.items[0];
        assert_eq!(item.remote_id, "1001");
        assert_eq!(item.remote_type_id, "6");
        assert_eq!(item.blurb, "斧头帮");
        assert_eq!(item.hits, 12);
        assert!(item.time.is_some());
        assert!(item.has_play_data());
    }

    #[test]
    fn non_success_code_is_a_parse_error() {
        let err = parse_payload(&json!({ "code": 0, "msg": "closed" }), 1).unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
        assert!(matches!(parse_page("<html>", 1), Err(FetchError::Parse(_))));
    }

    #[test]
    fn time_formats() {
        assert_eq!(parse_time(&json!(1_700_000_000)), Some(1_700_000_000));
        assert_eq!(parse_time(&json!("1700000000")), Some(1_700_000_000));

        let day = parse_time(&json!("2024-03-01")).unwrap();
        assert_eq!(parse_time(&json!("2024/03/01")), Some(day));
        assert_eq!(parse_time(&json!("2024-03-01 00:00:00")), Some(day));
        assert_eq!(parse_time(&json!("2024-03-01 01:30")), Some(day + 5400));
        assert_eq!(parse_time(&json!("yesterday")), None);
        assert_eq!(parse_time(&Value::Null), None);
    }
}
