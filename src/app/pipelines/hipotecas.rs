use reqwest::Client;
use std::collections::HashSet;

use crate::adapters::http::build_client;
use crate::app::pipelines::write_table;
use crate::config::Settings;
use crate::core::{ColumnType, Field, Pipeline, Row, Schema, Storage, Table, Value};
use crate::utils::error::{EtlError, Result};
use crate::utils::ine::{fetch_csv, parse_period, parse_spanish_float, parse_thousands_int, CsvTable};

pub const OUTPUT_PATH: &str = "hipotecas/data/hipotecas.parquet";

const TABLE_COLUMN: &str = "Tabla";
const VARIABLE_SEPARATOR: &str = " - ";
const NATIONAL_PROVINCE: &str = "Total Nacional";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IneTable {
    pub id: u32,
    pub name: &'static str,
}

pub const PROVINCIAL_TABLES: [IneTable; 7] = [
    IneTable {
        id: 3200,
        name: "Hipotecas constituidas sobre el total de fincas por naturaleza de la finca",
    },
    IneTable {
        id: 3202,
        name: "Hipotecas constituidas sobre el total de fincas por entidad que concede el préstamo",
    },
    IneTable {
        id: 3203,
        name: "Hipotecas constituidas sobre fincas rústicas por entidad que concede el préstamo",
    },
    IneTable {
        id: 3204,
        name: "Hipotecas constituidas sobre fincas urbanas por entidad que concede el préstamo",
    },
    IneTable {
        id: 3205,
        name: "Hipotecas con cambios registrales sobre el total de fincas por naturaleza de la finca",
    },
    IneTable {
        id: 3206,
        name: "Hipotecas con cambios registrales sobre el total de fincas por tipo de cambio",
    },
    IneTable {
        id: 3209,
        name: "Hipotecas canceladas registralmente sobre el total de fincas por naturaleza de la finca y entidad prestamista",
    },
];

pub const NATIONAL_TABLES: [IneTable; 3] = [
    IneTable {
        id: 24456,
        name: "Porcentaje de hipotecas constituidas según tipo de interés",
    },
    IneTable {
        id: 24457,
        name: "Tipo de interés medio al inicio de las hipotecas constituidas",
    },
    IneTable {
        id: 24458,
        name: "Plazo medio de las hipotecas constituidas",
    },
];

pub fn hipotecas_schema() -> Schema {
    Schema::new(vec![
        Field::required("fecha", ColumnType::Date),
        Field::nullable("provincia", ColumnType::Utf8),
        Field::nullable("variable", ColumnType::Utf8),
        Field::nullable("valor", ColumnType::Float64),
    ])
}

/// 下載後的原始表格，每張都已附上 `Tabla` 欄位
#[derive(Debug, Clone)]
pub struct HipotecasRaw {
    pub provincial: Vec<CsvTable>,
    pub national: Vec<CsvTable>,
}

pub struct HipotecasPipeline<S: Storage> {
    storage: S,
    client: Client,
    ine_base_url: String,
}

impl<S: Storage> HipotecasPipeline<S> {
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

    pub fn table_url(&self, id: u32) -> String {
        format!("{}/es/csv_bdsc/{}.csv", self.ine_base_url, id)
    }

    async fn fetch_tables(&self, tables: &[IneTable]) -> Result<Vec<CsvTable>> {
        let mut result = Vec::with_capacity(tables.len());
        for table in tables {
            let url = self.table_url(table.id);
            tracing::info!("📡 Downloading INE table {} from {}", table.id, url);
            let csv = fetch_csv(&self.client, &url)
                .await?
                .with_constant_column(TABLE_COLUMN, table.name);
            tracing::debug!("Table {}: {} rows", table.id, csv.rows.len());
            result.push(csv);
        }
        Ok(result)
    }
}

fn optional_text(cell: &str) -> Value {
    if cell.is_empty() {
        Value::Null
    } else {
        Value::text(cell)
    }
}

/// 用分隔符串接多個欄位；任一欄位為空則結果為 null
fn join_cells(row: &[String], indices: &[usize]) -> Option<String> {
    if indices.iter().any(|&i| row[i].is_empty()) {
        return None;
    }
    Some(
        indices
            .iter()
            .map(|&i| row[i].as_str())
            .collect::<Vec<_>>()
            .join(VARIABLE_SEPARATOR),
    )
}

fn extra_columns(table: &CsvTable, common: &HashSet<&str>) -> Vec<usize> {
    table
        .headers
        .iter()
        .enumerate()
        .filter(|(_, h)| !common.contains(h.as_str()))
        .map(|(i, _)| i)
        .collect()
}

/// 省級資料：共同欄位以外的欄位組成 variable，前面再加上表名
pub fn provincial_rows(tables: &[CsvTable]) -> Result<Vec<Row>> {
    let Some((first, rest)) = tables.split_first() else {
        return Ok(Vec::new());
    };

    let common: HashSet<&str> = first
        .headers
        .iter()
        .map(String::as_str)
        .filter(|h| rest.iter().all(|t| t.column_index(h).is_some()))
        .collect();

    for required in ["Periodo", "Total", "Provincias", TABLE_COLUMN] {
        if !common.contains(required) {
            return Err(EtlError::processing(format!(
                "column '{}' is not shared by every provincial mortgage table",
                required
            )));
        }
    }

    let mut rows = Vec::new();
    for table in tables {
        let periodo = table.require_column("Periodo")?;
        let total = table.require_column("Total")?;
        let provincia = table.require_column("Provincias")?;
        let tabla = table.require_column(TABLE_COLUMN)?;
        let extras = extra_columns(table, &common);

        for row in &table.rows {
            let variable = if extras.is_empty() {
                Some(row[tabla].clone())
            } else {
                join_cells(row, &extras)
                    .map(|v| format!("{}{}{}", row[tabla], VARIABLE_SEPARATOR, v))
            };

            rows.push(vec![
                Value::Date(parse_period(&row[periodo])?),
                optional_text(&row[provincia]),
                Value::from_opt_text(variable),
                Value::from_opt_float(parse_thousands_int(&row[total])?.map(|v| v as f64)),
            ]);
        }
    }
    Ok(rows)
}

/// 全國指標：除了 Periodo / Total 以外的欄位（含 Tabla）組成 variable
pub fn national_rows(tables: &[CsvTable]) -> Result<Vec<Row>> {
    let common: HashSet<&str> = ["Periodo", "Total"].into_iter().collect();

    let mut rows = Vec::new();
    for table in tables {
        let periodo = table.require_column("Periodo")?;
        let total = table.require_column("Total")?;
        let extras = extra_columns(table, &common);

        for row in &table.rows {
            rows.push(vec![
                Value::Date(parse_period(&row[periodo])?),
                Value::text(NATIONAL_PROVINCE),
                Value::from_opt_text(join_cells(row, &extras)),
                Value::from_opt_float(parse_spanish_float(&row[total])?),
            ]);
        }
    }
    Ok(rows)
}

pub fn transform_hipotecas(raw: &HipotecasRaw) -> Result<Table> {
    let mut rows = national_rows(&raw.national)?;
    rows.extend(provincial_rows(&raw.provincial)?);

    let mut table = Table::with_rows("hipotecas", hipotecas_schema(), rows);
    table.sort_by(&["fecha", "provincia", "variable"])?;
    Ok(table)
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for HipotecasPipeline<S> {
    type Raw = HipotecasRaw;

    fn name(&self) -> &str {
        "hipotecas"
    }

    async fn extract(&self) -> Result<HipotecasRaw> {
        let national = self.fetch_tables(&NATIONAL_TABLES).await?;
        let provincial = self.fetch_tables(&PROVINCIAL_TABLES).await?;
        Ok(HipotecasRaw {
            provincial,
            national,
        })
    }

    async fn transform(&self, raw: HipotecasRaw) -> Result<Table> {
        transform_hipotecas(&raw)
    }

    async fn load(&self, table: Table) -> Result<String> {
        write_table(&self.storage, OUTPUT_PATH, &table).await
    }
}
