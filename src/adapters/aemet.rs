//! AEMET OpenData 客戶端。
//!
//! 每個端點先回一份小的 metadata，其中 `datos` 欄位指向真正的資料，
//! 資料本身是 Latin-1 編碼的 JSON。

use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value as JsonValue};
use std::time::Duration;

use crate::adapters::http::{build_client, fetch_bytes};
use crate::config::Settings;
use crate::utils::error::{EtlError, Result};
use crate::utils::ine::decode_latin1;

pub type JsonRecord = Map<String, JsonValue>;

pub const STATIONS_PATH: &str = "/valores/climatologicos/inventarioestaciones/todasestaciones";

pub fn daily_path(start: NaiveDate, end: NaiveDate) -> String {
    format!(
        "/valores/climatologicos/diarios/datos/fechaini/{}T00:00:00UTC/fechafin/{}T23:59:59UTC/todasestaciones",
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d")
    )
}

pub struct AemetClient {
    client: Client,
    base_url: String,
    api_token: String,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl AemetClient {
    pub fn new(client: Client, base_url: &str, api_token: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
            max_retries: 5,
            retry_base_delay: Duration::from_secs(1),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let token = settings.require_aemet_token()?;
        let client = build_client(settings)?;
        Ok(Self::new(client, &settings.sources.aemet_base_url, token)
            .with_retries(settings.aemet.max_retries, settings.retry_base_delay()))
    }

    pub fn with_retries(mut self, max_retries: u32, retry_base_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_base_delay = retry_base_delay;
        self
    }

    /// 第一段請求。429/500 以 `base * 2^(attempt+1)` 退避，其他 HTTP 錯誤
    /// 與連線錯誤以 `base * 2^attempt` 退避，最多 `max_retries` 次
    async fn request_metadata(&self, path: &str) -> Result<JsonValue> {
        let url = format!("{}{}", self.base_url, path);

        let mut attempt = 0;
        loop {
            let last_attempt = attempt + 1 >= self.max_retries;
            let sent = self
                .client
                .get(&url)
                .query(&[("api_key", self.api_token.as_str())])
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await;

            if let Ok(response) = &sent {
                let status = response.status();
                let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
                    || status == StatusCode::INTERNAL_SERVER_ERROR;
                if rate_limited && !last_attempt {
                    let delay = self.retry_base_delay * 2u32.pow(attempt + 1);
                    tracing::warn!(
                        "AEMET answered {}, retry {}/{} in {:?}",
                        status,
                        attempt + 1,
                        self.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
            }

            match sent.and_then(|response| response.error_for_status()) {
                Ok(response) => return Ok(response.json().await?),
                Err(e) if !last_attempt => {
                    let delay = self.retry_base_delay * 2u32.pow(attempt);
                    tracing::warn!("AEMET request failed ({}), retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// 兩段式請求；沒有 `datos` 欄位時回傳 None
    pub async fn fetch_datos(&self, path: &str) -> Result<Option<Vec<JsonRecord>>> {
        let metadata = self.request_metadata(path).await?;

        let Some(data_url) = metadata.get("datos").and_then(JsonValue::as_str) else {
            tracing::debug!(
                "AEMET returned no data for {}: {}",
                path,
                metadata
                    .get("descripcion")
                    .and_then(JsonValue::as_str)
                    .unwrap_or("no description")
            );
            return Ok(None);
        };

        let bytes = fetch_bytes(&self.client, data_url).await?;
        let payload: JsonValue = serde_json::from_str(&decode_latin1(&bytes))?;
        records_from_json(payload).map(Some)
    }

    pub async fn fetch_stations(&self) -> Result<Vec<JsonRecord>> {
        self.fetch_datos(STATIONS_PATH).await?.ok_or_else(|| {
            EtlError::processing("AEMET station inventory response has no 'datos' URL")
        })
    }

    pub async fn fetch_daily(&self, start: NaiveDate, end: NaiveDate) -> Result<Option<Vec<JsonRecord>>> {
        self.fetch_datos(&daily_path(start, end)).await
    }
}

pub fn records_from_json(payload: JsonValue) -> Result<Vec<JsonRecord>> {
    match payload {
        JsonValue::Array(items) => items
            .into_iter()
            .map(|item| match item {
                JsonValue::Object(obj) => Ok(obj),
                other => Err(EtlError::processing(format!(
                    "expected JSON object in AEMET payload, got {}",
                    other
                ))),
            })
            .collect(),
        other => Err(EtlError::processing(format!(
            "expected JSON array in AEMET payload, got {}",
            other
        ))),
    }
}

/// 取欄位的文字值；數字轉成字串，null/空字串視為缺值
pub fn field_text(record: &JsonRecord, key: &str) -> Option<String> {
    match record.get(key)? {
        JsonValue::String(s) if s.trim().is_empty() => None,
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Null => None,
        other => Some(other.to_string()),
    }
}

/// `DDMMSS[NSEW]` → 十進位度數
pub fn dms_to_decimal(coord: &str) -> Option<f64> {
    let coord = coord.trim();
    if coord.len() < 7 || !coord.is_ascii() {
        return None;
    }
    let (digits, hemisphere) = coord.split_at(coord.len() - 1);
    let degrees: u32 = digits.get(..2)?.parse().ok()?;
    let minutes: u32 = digits.get(2..4)?.parse().ok()?;
    let seconds: u32 = digits.get(4..)?.parse().ok()?;

    let decimal = degrees as f64 + minutes as f64 / 60.0 + seconds as f64 / 3600.0;
    match hemisphere {
        "S" | "W" => Some(-decimal),
        _ => Some(decimal),
    }
}
