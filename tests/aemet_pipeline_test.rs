use chrono::NaiveDate;
use datania::adapters::aemet::{daily_path, AemetClient, STATIONS_PATH};
use datania::app::pipelines::{aemet_daily, aemet_stations};
use datania::{AemetDailyPipeline, AemetStationsPipeline, EtlEngine, EtlError, LocalStorage, Storage};
use httpmock::prelude::*;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::RowAccessor;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const TOKEN: &str = "test-token";

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// AEMET 的資料端點回傳 Latin-1 編碼
fn latin1(text: &str) -> Vec<u8> {
    text.chars().map(|c| c as u8).collect()
}

fn client(server: &MockServer) -> AemetClient {
    AemetClient::new(reqwest::Client::new(), &server.base_url(), TOKEN.to_string())
        .with_retries(2, Duration::ZERO)
}

fn read_parquet(path: &Path) -> SerializedFileReader<std::fs::File> {
    SerializedFileReader::new(std::fs::File::open(path).unwrap()).unwrap()
}

fn write_raw_day(dir: &Path, day: NaiveDate, body: &str) {
    let path = dir.join(aemet_daily::raw_day_path(day));
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

/// 可以查詢但寫入一律失敗的儲存
struct ReadOnlyStorage;

impl Storage for ReadOnlyStorage {
    async fn read_file(&self, path: &str) -> datania::Result<Vec<u8>> {
        Err(std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string()).into())
    }

    async fn write_file(&self, path: &str, _data: &[u8]) -> datania::Result<()> {
        Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, path.to_string()).into())
    }

    async fn exists(&self, _path: &str) -> datania::Result<bool> {
        Ok(false)
    }

    async fn list_files(&self, _dir: &str, _extension: &str) -> datania::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

async fn serve_daily<'a>(
    server: &'a MockServer,
    start: NaiveDate,
    end: NaiveDate,
    payload: &str,
) -> (httpmock::Mock<'a>, httpmock::Mock<'a>) {
    let data_url = server.url("/sh/daily");
    let metadata = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(daily_path(start, end))
                .query_param("api_key", TOKEN);
            then.status(200).json_body(serde_json::json!({
                "descripcion": "exito",
                "estado": 200,
                "datos": data_url,
            }));
        })
        .await;
    let data = server
        .mock_async(|when, then| {
            when.method(GET).path("/sh/daily");
            then.status(200).body(latin1(payload));
        })
        .await;
    (metadata, data)
}

#[tokio::test]
async fn test_stations_pipeline_follows_datos_url_and_decodes_latin1() {
    let temp_dir = TempDir::new().unwrap();
    let server = MockServer::start_async().await;

    let data_url = server.url("/sh/stations");
    let metadata = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(STATIONS_PATH)
                .query_param("api_key", TOKEN);
            then.status(200).json_body(serde_json::json!({
                "descripcion": "exito",
                "estado": 200,
                "datos": data_url,
            }));
        })
        .await;
    let data = server
        .mock_async(|when, then| {
            when.method(GET).path("/sh/stations");
            then.status(200).body(latin1(
                r#"[
                  {"latitud": "421019N", "provincia": "PONTEVEDRA", "altitud": "305",
                   "indicativo": "1701X", "nombre": "A CAÑIZA", "indsinop": "",
                   "longitud": "081600W"},
                  {"latitud": "402441N", "provincia": "MADRID", "altitud": "667",
                   "indicativo": "3195", "nombre": "MADRID, RETIRO", "indsinop": "08222",
                   "longitud": "034041W"}
                ]"#,
            ));
        })
        .await;

    let storage = LocalStorage::new(temp_dir.path());
    let pipeline = AemetStationsPipeline::new(storage, client(&server));
    let output = EtlEngine::new(pipeline).run().await.unwrap();

    metadata.assert_async().await;
    data.assert_async().await;
    assert_eq!(output, aemet_stations::OUTPUT_PATH);

    let reader = read_parquet(&temp_dir.path().join(aemet_stations::OUTPUT_PATH));
    assert_eq!(reader.metadata().file_metadata().num_rows(), 2);

    let rows: Vec<_> = reader
        .get_row_iter(None)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(rows[0].get_string(0).unwrap(), "1701X");
    assert_eq!(rows[0].get_string(1).unwrap(), "A CAÑIZA");
    assert_eq!(rows[0].get_int(3).unwrap(), 305);
    assert!(rows[0].get_double(5).unwrap() < -8.0);
    assert_eq!(rows[1].get_string(0).unwrap(), "3195");
}

#[tokio::test]
async fn test_stations_pipeline_fails_without_datos_url() {
    let temp_dir = TempDir::new().unwrap();
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(STATIONS_PATH);
            then.status(200).json_body(serde_json::json!({
                "descripcion": "No hay datos",
                "estado": 404,
            }));
        })
        .await;

    let storage = LocalStorage::new(temp_dir.path());
    let pipeline = AemetStationsPipeline::new(storage, client(&server));

    assert!(EtlEngine::new(pipeline).run().await.is_err());
    assert!(!temp_dir.path().join(aemet_stations::OUTPUT_PATH).exists());
}

#[tokio::test]
async fn test_daily_pipeline_downloads_and_builds_parquet() {
    let temp_dir = TempDir::new().unwrap();
    let server = MockServer::start_async().await;
    let (metadata, data) = serve_daily(
        &server,
        date(2024, 1, 1),
        date(2024, 1, 3),
        r#"[
          {"fecha": "2024-01-02", "indicativo": "3195", "nombre": "MADRID, RETIRO",
           "provincia": "MADRID", "altitud": "667", "tmed": "6,4", "prec": "0,0"},
          {"fecha": "2024-01-01", "indicativo": "3195", "nombre": "MADRID, RETIRO",
           "provincia": "MADRID", "altitud": "667", "tmed": "5,1", "prec": "Ip"},
          {"fecha": "2024-01-01", "indicativo": "1701X", "nombre": "A CAÑIZA",
           "provincia": "PONTEVEDRA", "altitud": "305", "tmed": "9,0"}
        ]"#,
    )
    .await;

    let storage = LocalStorage::new(temp_dir.path());
    let pipeline = AemetDailyPipeline::new(
        storage,
        Some(client(&server)),
        date(2024, 1, 1),
        date(2024, 1, 4),
    )
    .with_batching(15, Duration::ZERO);
    let output = EtlEngine::new(pipeline).run().await.unwrap();

    metadata.assert_async().await;
    data.assert_async().await;
    assert_eq!(output, aemet_daily::OUTPUT_PATH);

    for day in [date(2024, 1, 1), date(2024, 1, 2)] {
        assert!(temp_dir.path().join(aemet_daily::raw_day_path(day)).exists());
    }
    assert!(!temp_dir
        .path()
        .join(aemet_daily::raw_day_path(date(2024, 1, 3)))
        .exists());

    let reader = read_parquet(&temp_dir.path().join(aemet_daily::OUTPUT_PATH));
    assert_eq!(reader.metadata().file_metadata().num_rows(), 3);

    let rows: Vec<_> = reader
        .get_row_iter(None)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    // fecha, indicativo 排序
    assert_eq!(rows[0].get_string(1).unwrap(), "1701X");
    assert_eq!(rows[0].get_string(2).unwrap(), "A CAÑIZA");
    assert_eq!(rows[1].get_string(1).unwrap(), "3195");
    assert_eq!(rows[2].get_string(1).unwrap(), "3195");
}

#[tokio::test]
async fn test_daily_download_never_overwrites_existing_days() {
    let temp_dir = TempDir::new().unwrap();
    let existing = r#"[{"fecha": "2024-01-01", "indicativo": "OLD"}]"#;
    write_raw_day(temp_dir.path(), date(2024, 1, 1), existing);

    let server = MockServer::start_async().await;
    let (metadata, _data) = serve_daily(
        &server,
        date(2024, 1, 1),
        date(2024, 1, 2),
        r#"[
          {"fecha": "2024-01-01", "indicativo": "NEW"},
          {"fecha": "2024-01-02", "indicativo": "NEW"}
        ]"#,
    )
    .await;

    let storage = LocalStorage::new(temp_dir.path());
    let pipeline = AemetDailyPipeline::new(
        storage,
        Some(client(&server)),
        date(2024, 1, 1),
        date(2024, 1, 3),
    )
    .with_batching(15, Duration::ZERO);
    let summary = pipeline.download_missing().await.unwrap();

    assert_eq!(metadata.hits_async().await, 1);
    assert_eq!(summary.batches_requested, 1);
    assert_eq!(summary.days_saved, 1);

    let kept = std::fs::read_to_string(
        temp_dir
            .path()
            .join(aemet_daily::raw_day_path(date(2024, 1, 1))),
    )
    .unwrap();
    assert_eq!(kept, existing);
}

#[tokio::test]
async fn test_daily_download_skips_complete_batches() {
    let temp_dir = TempDir::new().unwrap();
    for day in 1..=3 {
        write_raw_day(
            temp_dir.path(),
            date(2024, 1, day),
            &format!(r#"[{{"fecha": "2024-01-0{}", "indicativo": "3195"}}]"#, day),
        );
    }

    let server = MockServer::start_async().await;
    let (metadata, data) =
        serve_daily(&server, date(2024, 1, 1), date(2024, 1, 3), "[]").await;

    let storage = LocalStorage::new(temp_dir.path());
    let pipeline = AemetDailyPipeline::new(
        storage,
        Some(client(&server)),
        date(2024, 1, 1),
        date(2024, 1, 4),
    )
    .with_batching(15, Duration::ZERO);
    let summary = pipeline.download_missing().await.unwrap();

    assert_eq!(summary.batches_planned, 1);
    assert_eq!(summary.batches_requested, 0);
    assert_eq!(metadata.hits_async().await, 0);
    assert_eq!(data.hits_async().await, 0);
}

#[tokio::test]
async fn test_daily_download_tolerates_rate_limited_batches() {
    let temp_dir = TempDir::new().unwrap();
    let server = MockServer::start_async().await;
    let rate_limited = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(daily_path(date(2024, 1, 1), date(2024, 1, 2)));
            then.status(429);
        })
        .await;

    let storage = LocalStorage::new(temp_dir.path());
    let pipeline = AemetDailyPipeline::new(
        storage,
        Some(client(&server)),
        date(2024, 1, 1),
        date(2024, 1, 3),
    )
    .with_batching(15, Duration::ZERO);
    let summary = pipeline.download_missing().await.unwrap();

    assert_eq!(rate_limited.hits_async().await, 2);
    assert_eq!(summary.batches_requested, 1);
    assert_eq!(summary.batches_failed, 1);
    assert_eq!(summary.days_saved, 0);
}

#[tokio::test]
async fn test_daily_pipeline_processes_cache_without_client() {
    let temp_dir = TempDir::new().unwrap();
    write_raw_day(
        temp_dir.path(),
        date(2024, 1, 2),
        r#"[{"fecha": "2024-01-02", "indicativo": "3195", "altitud": "667", "tmed": "6,4"}]"#,
    );
    write_raw_day(
        temp_dir.path(),
        date(2024, 1, 1),
        r#"[{"fecha": "2024-01-01", "indicativo": "3195", "altitud": "667", "tmed": "5,1"}]"#,
    );

    let storage = LocalStorage::new(temp_dir.path());
    let pipeline = AemetDailyPipeline::new(storage, None, date(2024, 1, 1), date(2024, 1, 3));
    EtlEngine::new(pipeline).run().await.unwrap();

    let reader = read_parquet(&temp_dir.path().join(aemet_daily::OUTPUT_PATH));
    let rows: Vec<_> = reader
        .get_row_iter(None)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(rows.len(), 2);

    let tmed = 5 + aemet_daily::MEASUREMENT_FIELDS
        .iter()
        .position(|f| *f == "tmed")
        .unwrap();
    assert_eq!(rows[0].get_string(tmed).unwrap(), "5,1");
    assert_eq!(rows[1].get_string(tmed).unwrap(), "6,4");
}

/// 第一次回 `status`，之後換成正常回應，確認會重試並取得資料
async fn assert_metadata_recovers_after(status: u16) {
    let server = MockServer::start_async().await;
    let (start, end) = (date(2024, 1, 1), date(2024, 1, 1));
    let failing = server
        .mock_async(|when, then| {
            when.method(GET).path(daily_path(start, end));
            then.status(status);
        })
        .await;

    let client = AemetClient::new(reqwest::Client::new(), &server.base_url(), TOKEN.to_string())
        .with_retries(3, Duration::from_millis(200));

    let swap = async {
        while failing.hits_async().await == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        failing.delete_async().await;
        serve_daily(
            &server,
            start,
            end,
            r#"[{"fecha": "2024-01-01", "indicativo": "3195"}]"#,
        )
        .await
    };
    let (result, (metadata, data)) = tokio::join!(client.fetch_daily(start, end), swap);

    let records = result.unwrap().expect("datos URL present");
    assert_eq!(records.len(), 1);
    metadata.assert_async().await;
    data.assert_async().await;
}

#[tokio::test]
async fn test_metadata_request_recovers_after_rate_limit() {
    assert_metadata_recovers_after(429).await;
}

#[tokio::test]
async fn test_metadata_request_recovers_after_internal_error() {
    assert_metadata_recovers_after(500).await;
}

#[tokio::test]
async fn test_metadata_request_recovers_after_unavailable() {
    assert_metadata_recovers_after(503).await;
}

#[tokio::test]
async fn test_metadata_request_retries_http_errors_until_exhausted() {
    let server = MockServer::start_async().await;
    let (start, end) = (date(2024, 1, 1), date(2024, 1, 15));
    let unavailable = server
        .mock_async(|when, then| {
            when.method(GET).path(daily_path(start, end));
            then.status(503);
        })
        .await;

    let client = AemetClient::new(reqwest::Client::new(), &server.base_url(), TOKEN.to_string())
        .with_retries(5, Duration::ZERO);
    let result = client.fetch_daily(start, end).await;

    assert_eq!(unavailable.hits_async().await, 5);
    assert!(matches!(result, Err(EtlError::ApiError(_))));
}

#[tokio::test]
async fn test_metadata_request_retries_transport_errors() {
    let server = MockServer::start_async().await;
    let (start, end) = (date(2024, 1, 1), date(2024, 1, 15));
    let slow = server
        .mock_async(|when, then| {
            when.method(GET).path(daily_path(start, end));
            then.status(200).delay(Duration::from_secs(2));
        })
        .await;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let client = AemetClient::new(http, &server.base_url(), TOKEN.to_string())
        .with_retries(3, Duration::ZERO);
    let result = client.fetch_daily(start, end).await;

    assert_eq!(slow.hits_async().await, 3);
    match result {
        Err(EtlError::ApiError(e)) => assert!(e.is_timeout()),
        other => panic!("expected a timeout, got {:?}", other.map(|r| r.map(|v| v.len()))),
    }
}

#[tokio::test]
async fn test_daily_download_counts_failed_writes_as_failed_batches() {
    let server = MockServer::start_async().await;
    let payload = r#"[
      {"fecha": "2024-01-01", "indicativo": "3195"},
      {"fecha": "2024-01-02", "indicativo": "3195"}
    ]"#;
    let (first, _) = serve_daily(&server, date(2024, 1, 1), date(2024, 1, 1), payload).await;
    let (second, _) = serve_daily(&server, date(2024, 1, 2), date(2024, 1, 2), payload).await;

    let pipeline = AemetDailyPipeline::new(
        ReadOnlyStorage,
        Some(client(&server)),
        date(2024, 1, 1),
        date(2024, 1, 3),
    )
    .with_batching(1, Duration::ZERO);
    let summary = pipeline.download_missing().await.unwrap();

    first.assert_async().await;
    second.assert_async().await;
    assert_eq!(summary.batches_requested, 2);
    assert_eq!(summary.batches_failed, 2);
    assert_eq!(summary.days_saved, 0);
}

#[tokio::test]
async fn test_raw_cache_keeps_source_field_order() {
    let temp_dir = TempDir::new().unwrap();
    let server = MockServer::start_async().await;
    serve_daily(
        &server,
        date(2024, 1, 1),
        date(2024, 1, 1),
        r#"[{"indicativo": "3195", "fecha": "2024-01-01", "tmed": "5,1", "altitud": "667"}]"#,
    )
    .await;

    let pipeline = AemetDailyPipeline::new(
        LocalStorage::new(temp_dir.path()),
        Some(client(&server)),
        date(2024, 1, 1),
        date(2024, 1, 2),
    )
    .with_batching(15, Duration::ZERO);
    pipeline.download_missing().await.unwrap();

    let raw = std::fs::read_to_string(
        temp_dir
            .path()
            .join(aemet_daily::raw_day_path(date(2024, 1, 1))),
    )
    .unwrap();
    let positions: Vec<usize> = ["\"indicativo\"", "\"fecha\"", "\"tmed\"", "\"altitud\""]
        .iter()
        .map(|key| raw.find(key).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{}", raw);
}
