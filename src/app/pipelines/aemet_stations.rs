use crate::adapters::aemet::{dms_to_decimal, field_text, AemetClient, JsonRecord};
use crate::app::pipelines::write_table;
use crate::config::Settings;
use crate::core::{ColumnType, Field, Pipeline, Schema, Storage, Table, Value};
use crate::utils::error::Result;

pub const OUTPUT_PATH: &str = "datos_meteorologicos_estaciones_aemet/data/estaciones.parquet";

pub fn stations_schema() -> Schema {
    Schema::new(vec![
        Field::required("indicativo", ColumnType::Utf8),
        Field::nullable("nombre", ColumnType::Utf8),
        Field::nullable("provincia", ColumnType::Utf8),
        Field::nullable("altitud", ColumnType::Int32),
        Field::nullable("latitud", ColumnType::Float64),
        Field::nullable("longitud", ColumnType::Float64),
        Field::nullable("indsinop", ColumnType::Utf8),
    ])
}

/// `altitud` 轉成 Int32，失敗時為 null
pub(crate) fn parse_altitude(record: &JsonRecord) -> Value {
    Value::from_opt_int(
        field_text(record, "altitud")
            .and_then(|a| a.trim().parse::<i32>().ok())
            .map(i64::from),
    )
}

pub fn transform_stations(records: &[JsonRecord]) -> Result<Table> {
    let mut table = Table::new("estaciones", stations_schema());
    let mut skipped = 0usize;

    for record in records {
        let Some(indicativo) = field_text(record, "indicativo") else {
            skipped += 1;
            continue;
        };

        let coordinate = |key: &str| {
            Value::from_opt_float(field_text(record, key).as_deref().and_then(dms_to_decimal))
        };

        table.push(vec![
            Value::Text(indicativo),
            Value::from_opt_text(field_text(record, "nombre")),
            Value::from_opt_text(field_text(record, "provincia")),
            parse_altitude(record),
            coordinate("latitud"),
            coordinate("longitud"),
            Value::from_opt_text(field_text(record, "indsinop")),
        ]);
    }

    if skipped > 0 {
        tracing::warn!("Skipped {} stations without 'indicativo'", skipped);
    }

    table.sort_by(&["indicativo"])?;
    Ok(table)
}

/// AEMET 氣象站清單
pub struct AemetStationsPipeline<S: Storage> {
    storage: S,
    client: AemetClient,
}

impl<S: Storage> AemetStationsPipeline<S> {
    pub fn new(storage: S, client: AemetClient) -> Self {
        Self { storage, client }
    }

    pub fn from_settings(storage: S, settings: &Settings) -> Result<Self> {
        Ok(Self::new(storage, AemetClient::from_settings(settings)?))
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for AemetStationsPipeline<S> {
    type Raw = Vec<JsonRecord>;

    fn name(&self) -> &str {
        "aemet-stations"
    }

    async fn extract(&self) -> Result<Vec<JsonRecord>> {
        tracing::info!("📡 Downloading AEMET station inventory");
        let stations = self.client.fetch_stations().await?;
        tracing::info!("Extracted {} stations", stations.len());
        Ok(stations)
    }

    async fn transform(&self, raw: Vec<JsonRecord>) -> Result<Table> {
        transform_stations(&raw)
    }

    async fn load(&self, table: Table) -> Result<String> {
        write_table(&self.storage, OUTPUT_PATH, &table).await
    }
}
