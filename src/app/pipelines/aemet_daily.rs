use chrono::{Days, NaiveDate};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use crate::adapters::aemet::{field_text, records_from_json, AemetClient, JsonRecord};
use crate::app::pipelines::aemet_stations::parse_altitude;
use crate::app::pipelines::write_table;
use crate::config::toml_config::AEMET_MAX_BATCH_DAYS;
use crate::config::Settings;
use crate::core::{ColumnType, Field, Pipeline, Schema, Storage, Table, Value};
use crate::utils::error::{EtlError, Result};

pub const RAW_DIR: &str = "datos_meteorologicos_estaciones_aemet/data/raw";
pub const OUTPUT_PATH: &str =
    "datos_meteorologicos_estaciones_aemet/data/datos_meteorologicos_estaciones_aemet.parquet";

/// AEMET 原樣保留為文字的量測欄位
pub const MEASUREMENT_FIELDS: [&str; 20] = [
    "tmed",
    "prec",
    "tmin",
    "horatmin",
    "tmax",
    "horatmax",
    "dir",
    "velmedia",
    "racha",
    "horaracha",
    "sol",
    "presMax",
    "horaPresMax",
    "presMin",
    "horaPresMin",
    "hrMedia",
    "hrMax",
    "horaHrMax",
    "hrMin",
    "horaHrMin",
];

pub fn weather_schema() -> Schema {
    let mut fields = vec![
        Field::required("fecha", ColumnType::Date),
        Field::required("indicativo", ColumnType::Utf8),
        Field::nullable("nombre", ColumnType::Utf8),
        Field::nullable("provincia", ColumnType::Utf8),
        Field::nullable("altitud", ColumnType::Int32),
    ];
    fields.extend(
        MEASUREMENT_FIELDS
            .iter()
            .map(|name| Field::nullable(name, ColumnType::Utf8)),
    );
    Schema::new(fields)
}

pub fn raw_day_path(day: NaiveDate) -> String {
    format!("{}/{}.json", RAW_DIR, day.format("%Y-%m-%d"))
}

/// 把 `[start, end)` 切成最多 `batch_days` 天的區間（兩端皆含）
pub fn plan_batches(start: NaiveDate, end: NaiveDate, batch_days: u32) -> Vec<(NaiveDate, NaiveDate)> {
    let span = u64::from(batch_days.clamp(1, AEMET_MAX_BATCH_DAYS) - 1);
    let Some(last_day) = end.checked_sub_days(Days::new(1)) else {
        return Vec::new();
    };

    let mut batches = Vec::new();
    let mut current = start;
    while current < end {
        let batch_end = current
            .checked_add_days(Days::new(span))
            .map_or(last_day, |d| d.min(last_day));
        batches.push((current, batch_end));
        match batch_end.checked_add_days(Days::new(1)) {
            Some(next) => current = next,
            None => break,
        }
    }
    batches
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub batches_planned: usize,
    pub batches_requested: usize,
    pub batches_failed: usize,
    pub days_saved: usize,
}

/// 依 `fecha` 分組寫成每日一檔，已存在的檔案不覆蓋
pub async fn save_daily_files<S: Storage>(storage: &S, records: Vec<JsonRecord>) -> Result<usize> {
    let mut by_day: BTreeMap<NaiveDate, Vec<JsonRecord>> = BTreeMap::new();
    for record in records {
        let Some(fecha) = field_text(&record, "fecha") else {
            continue;
        };
        match NaiveDate::parse_from_str(&fecha, "%Y-%m-%d") {
            Ok(day) => by_day.entry(day).or_default().push(record),
            Err(_) => tracing::warn!("Ignoring record with invalid fecha '{}'", fecha),
        }
    }

    let mut saved = 0;
    for (day, records) in by_day {
        let path = raw_day_path(day);
        if storage.exists(&path).await? {
            continue;
        }
        let json = serde_json::to_vec_pretty(&records)?;
        storage.write_file(&path, &json).await?;
        saved += 1;
    }
    Ok(saved)
}

pub fn transform_weather(records: &[JsonRecord]) -> Result<Table> {
    let mut table = Table::new("datos_meteorologicos_estaciones_aemet", weather_schema());
    let mut skipped = 0usize;

    for record in records {
        let fecha = field_text(record, "fecha")
            .ok_or_else(|| EtlError::processing("AEMET record without 'fecha'"))?;
        let fecha = NaiveDate::parse_from_str(&fecha, "%Y-%m-%d")
            .map_err(|_| EtlError::processing(format!("invalid AEMET fecha '{}'", fecha)))?;

        let Some(indicativo) = field_text(record, "indicativo") else {
            skipped += 1;
            continue;
        };

        let mut row = vec![
            Value::Date(fecha),
            Value::Text(indicativo),
            Value::from_opt_text(field_text(record, "nombre")),
            Value::from_opt_text(field_text(record, "provincia")),
            parse_altitude(record),
        ];
        row.extend(
            MEASUREMENT_FIELDS
                .iter()
                .map(|name| Value::from_opt_text(field_text(record, name))),
        );
        table.push(row);
    }

    if skipped > 0 {
        tracing::warn!("Skipped {} daily records without 'indicativo'", skipped);
    }

    table.sort_by(&["fecha", "indicativo"])?;
    Ok(table)
}

fn log_summary(table: &Table) {
    let dates: Vec<NaiveDate> = table
        .column("fecha")
        .map(|col| col.filter_map(Value::as_date).collect())
        .unwrap_or_default();
    let stations: HashSet<&str> = table
        .column("indicativo")
        .map(|col| col.filter_map(Value::as_str).collect())
        .unwrap_or_default();

    match (dates.iter().min(), dates.iter().max()) {
        (Some(first), Some(last)) => tracing::info!(
            "   {} records | {} to {} | {} stations",
            table.len(),
            first,
            last,
            stations.len()
        ),
        _ => tracing::info!("   0 records"),
    }
}

/// AEMET 每日氣象資料：先增量下載到 raw/，再整批轉成 Parquet
pub struct AemetDailyPipeline<S: Storage> {
    storage: S,
    client: Option<AemetClient>,
    start_date: NaiveDate,
    end_date: NaiveDate,
    batch_days: u32,
    batch_delay: Duration,
}

impl<S: Storage> AemetDailyPipeline<S> {
    /// `client` 為 None 時只處理已下載的 raw 檔案
    pub fn new(storage: S, client: Option<AemetClient>, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            storage,
            client,
            start_date,
            end_date,
            batch_days: AEMET_MAX_BATCH_DAYS,
            batch_delay: Duration::from_millis(1500),
        }
    }

    pub fn from_settings(storage: S, settings: &Settings, download: bool) -> Result<Self> {
        let client = if download {
            Some(AemetClient::from_settings(settings)?)
        } else {
            None
        };
        Ok(Self::new(
            storage,
            client,
            settings.aemet.start_date,
            settings.aemet_end_date(),
        )
        .with_batching(settings.aemet.batch_days, settings.batch_delay()))
    }

    pub fn with_batching(mut self, batch_days: u32, batch_delay: Duration) -> Self {
        self.batch_days = batch_days;
        self.batch_delay = batch_delay;
        self
    }

    async fn batch_is_complete(&self, start: NaiveDate, end: NaiveDate) -> Result<bool> {
        for day in start.iter_days().take_while(|d| *d <= end) {
            if !self.storage.exists(&raw_day_path(day)).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// 只下載 raw/ 中缺少的日期；單一批次下載或寫檔失敗不會中斷整體
    pub async fn download_missing(&self) -> Result<DownloadSummary> {
        let Some(client) = &self.client else {
            return Ok(DownloadSummary::default());
        };

        let batches = plan_batches(self.start_date, self.end_date, self.batch_days);
        let mut summary = DownloadSummary {
            batches_planned: batches.len(),
            ..Default::default()
        };

        for (start, end) in batches {
            if self.batch_is_complete(start, end).await? {
                continue;
            }

            tracing::info!("Downloading: {} to {}", start, end);
            summary.batches_requested += 1;

            let outcome = match client.fetch_daily(start, end).await {
                Ok(Some(records)) => save_daily_files(&self.storage, records).await.map(Some),
                Ok(None) => Ok(None),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(Some(saved)) => {
                    if saved > 0 {
                        tracing::info!("  Saved {} days", saved);
                    }
                    summary.days_saved += saved;
                }
                Ok(None) => tracing::debug!("  No data for {} to {}", start, end),
                Err(e) => {
                    tracing::warn!("  Error downloading {} to {}: {}", start, end, e);
                    summary.batches_failed += 1;
                }
            }

            if !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
        }

        tracing::info!("✅ Downloaded {} days total", summary.days_saved);
        Ok(summary)
    }

    pub async fn read_raw_cache(&self) -> Result<Vec<JsonRecord>> {
        let files = self.storage.list_files(RAW_DIR, "json").await?;
        tracing::info!("Reading {} raw data files...", files.len());

        let mut records = Vec::new();
        for (i, file) in files.iter().enumerate() {
            if i > 0 && i % 1000 == 0 {
                tracing::info!("  Processing file {}/{}...", i, files.len());
            }
            let bytes = self.storage.read_file(file).await?;
            let payload: serde_json::Value = serde_json::from_slice(&bytes)?;
            records.extend(records_from_json(payload)?);
        }

        tracing::info!("Loaded {} records from {} files", records.len(), files.len());
        Ok(records)
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for AemetDailyPipeline<S> {
    type Raw = Vec<JsonRecord>;

    fn name(&self) -> &str {
        "aemet-daily"
    }

    async fn extract(&self) -> Result<Vec<JsonRecord>> {
        self.download_missing().await?;
        self.read_raw_cache().await
    }

    async fn transform(&self, raw: Vec<JsonRecord>) -> Result<Table> {
        transform_weather(&raw)
    }

    async fn load(&self, table: Table) -> Result<String> {
        let path = write_table(&self.storage, OUTPUT_PATH, &table).await?;
        log_summary(&table);
        Ok(path)
    }
}
