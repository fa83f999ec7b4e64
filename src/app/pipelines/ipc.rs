use reqwest::Client;

use crate::adapters::http::build_client;
use crate::app::pipelines::write_table;
use crate::config::Settings;
use crate::core::{ColumnType, Field, Pipeline, Schema, Storage, Table, Value};
use crate::utils::error::Result;
use crate::utils::ine::{fetch_csv, parse_period, parse_plain_float, CsvTable};

pub const IPC_TABLE_ID: u32 = 50904;
pub const OUTPUT_PATH: &str = "ipc/data/ipc.parquet";

const INDEX_DATA_TYPE: &str = "Índice";

pub fn ipc_schema() -> Schema {
    Schema::new(vec![
        Field::nullable("clase", ColumnType::Utf8),
        Field::required("fecha", ColumnType::Date),
        Field::nullable("value", ColumnType::Float64),
    ])
}

/// 消費者物價指數 (IPC)，只保留「Índice」的資料列
pub struct IpcPipeline<S: Storage> {
    storage: S,
    client: Client,
    ine_base_url: String,
}

impl<S: Storage> IpcPipeline<S> {
    pub fn new(storage: S, client: Client, ine_base_url: &str) -> Self {
        Self {
            storage,
            client,
            ine_base_url: ine_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_settings(storage: S, settings: &Settings) -> Result<Self> {
        Ok(Self::new(
            storage,
            build_client(settings)?,
            &settings.sources.ine_base_url,
        ))
    }

    pub fn source_url(&self) -> String {
        format!("{}/csv_bdsc/{}.csv", self.ine_base_url, IPC_TABLE_ID)
    }
}

pub fn transform_ipc(raw: &CsvTable) -> Result<Table> {
    let clase_idx = raw.require_column("Clases")?;
    let tipo_idx = raw.require_column("Tipo de dato")?;
    let periodo_idx = raw.require_column("Periodo")?;
    let total_idx = raw.require_column("Total")?;

    let mut table = Table::new("ipc", ipc_schema());
    for row in raw.rows.iter().filter(|row| row[tipo_idx] == INDEX_DATA_TYPE) {
        let clase = &row[clase_idx];
        table.push(vec![
            if clase.is_empty() {
                Value::Null
            } else {
                Value::text(clase.as_str())
            },
            Value::Date(parse_period(&row[periodo_idx])?),
            Value::from_opt_float(parse_plain_float(&row[total_idx])),
        ]);
    }

    table.sort_by(&["clase", "fecha"])?;
    Ok(table)
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for IpcPipeline<S> {
    type Raw = CsvTable;

    fn name(&self) -> &str {
        "ipc"
    }

    async fn extract(&self) -> Result<CsvTable> {
        let url = self.source_url();
        tracing::info!("📡 Downloading IPC table from {}", url);
        let csv = fetch_csv(&self.client, &url).await?;
        tracing::info!("Extracted {} CSV rows", csv.rows.len());
        Ok(csv)
    }

    async fn transform(&self, raw: CsvTable) -> Result<Table> {
        transform_ipc(&raw)
    }

    async fn load(&self, table: Table) -> Result<String> {
        write_table(&self.storage, OUTPUT_PATH, &table).await
    }
}
