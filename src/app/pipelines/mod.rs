pub mod aemet_daily;
pub mod aemet_stations;
pub mod hipotecas;
pub mod ipc;

pub use aemet_daily::AemetDailyPipeline;
pub use aemet_stations::AemetStationsPipeline;
pub use hipotecas::HipotecasPipeline;
pub use ipc::IpcPipeline;

use crate::adapters::parquet_sink::encode_table;
use crate::core::{Storage, Table};
use crate::utils::error::Result;

/// 編碼成 Parquet 後整個覆蓋輸出檔
pub(crate) async fn write_table<S: Storage>(storage: &S, path: &str, table: &Table) -> Result<String> {
    let bytes = encode_table(table)?;
    tracing::debug!(
        "Writing {} ({} rows, {} bytes) to {}",
        table.name,
        table.len(),
        bytes.len(),
        path
    );
    storage.write_file(path, &bytes).await?;
    Ok(path.to_string())
}
