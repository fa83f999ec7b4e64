//! INE (Instituto Nacional de Estadística) CSV 工具。
//!
//! `csv_bdsc` 匯出檔以 `;` 分隔，期間格式為 `YYYYMmm`，
//! 數字採西班牙格式（`.` 為千分位、`,` 為小數點）。

use chrono::NaiveDate;
use reqwest::Client;

use crate::adapters::http::fetch_bytes;
use crate::utils::error::{EtlError, Result};

/// 解析後的 CSV：表頭 + 字串資料列（每列寬度與表頭一致）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| {
            EtlError::processing(format!(
                "expected column '{}' not found (columns: {})",
                name,
                self.headers.join(", ")
            ))
        })
    }

    /// 加一個常數欄位在最後面
    pub fn with_constant_column(mut self, name: &str, value: &str) -> Self {
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.push(value.to_string());
        }
        self
    }
}

/// UTF-8 優先，失敗時退回 Latin-1
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => decode_latin1(bytes),
    }
}

pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// 下載並解析一張 INE CSV 表
pub async fn fetch_csv(client: &Client, url: &str) -> Result<CsvTable> {
    let bytes = fetch_bytes(client, url).await?;
    parse_csv(&decode_text(&bytes))
}

/// 過長的列截斷、過短的列補空字串
pub fn parse_csv(text: &str) -> Result<CsvTable> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(EtlError::processing("CSV has no header row"));
    }

    let width = headers.len();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        let mut row: Vec<String> = record.iter().take(width).map(|c| c.trim().to_string()).collect();
        row.resize(width, String::new());
        rows.push(row);
    }

    Ok(CsvTable { headers, rows })
}

/// `2024M08` → 2024-08-01
pub fn parse_period(period: &str) -> Result<NaiveDate> {
    let invalid = || EtlError::processing(format!("invalid INE period '{}'", period));

    let (year, month) = period.trim().split_once('M').ok_or_else(invalid)?;
    let year: i32 = year.parse().map_err(|_| invalid())?;
    let month: u32 = month.parse().map_err(|_| invalid())?;
    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)
}

/// INE 用來表示缺值的符號
pub fn is_missing(cell: &str) -> bool {
    matches!(cell.trim(), "" | "." | ".." | "-")
}

/// 非嚴格：無法解析時回傳 None
pub fn parse_plain_float(cell: &str) -> Option<f64> {
    if is_missing(cell) {
        return None;
    }
    cell.trim().parse().ok()
}

/// `1.234` → 1234；缺值為 None，其餘無法解析視為錯誤
pub fn parse_thousands_int(cell: &str) -> Result<Option<i64>> {
    if is_missing(cell) {
        return Ok(None);
    }
    let digits = cell.trim().replace('.', "");
    digits
        .parse()
        .map(Some)
        .map_err(|_| EtlError::processing(format!("invalid integer value '{}'", cell)))
}

/// `1.234,5` → 1234.5；缺值為 None，其餘無法解析視為錯誤
pub fn parse_spanish_float(cell: &str) -> Result<Option<f64>> {
    if is_missing(cell) {
        return Ok(None);
    }
    let normalized = cell.trim().replace('.', "").replace(',', ".");
    normalized
        .parse()
        .map(Some)
        .map_err(|_| EtlError::processing(format!("invalid decimal value '{}'", cell)))
}
