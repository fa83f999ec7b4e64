use reqwest::Client;

use crate::config::Settings;
use crate::utils::error::Result;

pub fn build_client(settings: &Settings) -> Result<Client> {
    let client = Client::builder()
        .timeout(settings.http_timeout())
        .user_agent(concat!("datania/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// GET 並回傳 body；非 2xx 視為錯誤
pub async fn fetch_bytes(client: &Client, url: &str) -> Result<Vec<u8>> {
    tracing::debug!("GET {}", url);
    let response = client.get(url).send().await?.error_for_status()?;
    tracing::debug!("Response status: {}", response.status());
    Ok(response.bytes().await?.to_vec())
}
