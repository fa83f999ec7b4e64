use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_positive_number, validate_range,
    validate_required_field, validate_url, Validate,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const AEMET_TOKEN_ENV: &str = "AEMET_API_TOKEN";

/// AEMET 一次最多只接受 15 天的區間
pub const AEMET_MAX_BATCH_DAYS: u32 = 15;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub datasets_dir: String,
    pub sources: SourcesConfig,
    pub http: HttpConfig,
    pub aemet: AemetConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourcesConfig {
    pub ine_base_url: String,
    pub aemet_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AemetConfig {
    pub api_token: Option<String>,
    pub start_date: NaiveDate,
    /// 未設定時為今天
    pub end_date: Option<NaiveDate>,
    pub batch_days: u32,
    pub batch_delay_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            datasets_dir: "datasets".to_string(),
            sources: SourcesConfig::default(),
            http: HttpConfig::default(),
            aemet: AemetConfig::default(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            ine_base_url: "https://www.ine.es/jaxiT3/files/t".to_string(),
            aemet_base_url: "https://opendata.aemet.es/opendata/api".to_string(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_seconds: 30 }
    }
}

impl Default for AemetConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            start_date: NaiveDate::from_ymd_opt(1920, 1, 1).unwrap_or_default(),
            end_date: None,
            batch_days: AEMET_MAX_BATCH_DAYS,
            batch_delay_ms: 1500,
            max_retries: 5,
            retry_base_delay_ms: 1000,
        }
    }
}

impl Settings {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = substitute_env_vars(content)?;

        toml::from_str(&processed).map_err(|e| EtlError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 有給檔案就讀檔，否則全部用預設值
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_seconds)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.aemet.batch_delay_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.aemet.retry_base_delay_ms)
    }

    /// 環境變數優先；沒被替換掉的 `${...}` 視為未設定
    pub fn aemet_token(&self) -> Option<String> {
        if let Ok(token) = std::env::var(AEMET_TOKEN_ENV) {
            if !token.trim().is_empty() {
                return Some(token);
            }
        }
        self.aemet
            .api_token
            .as_ref()
            .filter(|t| !t.trim().is_empty() && !t.starts_with("${"))
            .cloned()
    }

    pub fn require_aemet_token(&self) -> Result<String> {
        validate_required_field(AEMET_TOKEN_ENV, &self.aemet_token()).cloned()
    }

    pub fn aemet_end_date(&self) -> NaiveDate {
        self.aemet
            .end_date
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }
}

/// 替換環境變數 (例如 ${AEMET_API_TOKEN})，未設定的保持原樣
fn substitute_env_vars(content: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| EtlError::ConfigError {
        message: format!("invalid substitution pattern: {}", e),
    })?;

    let result = re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
    });

    Ok(result.to_string())
}

impl Validate for Settings {
    fn validate(&self) -> Result<()> {
        validate_path("datasets_dir", &self.datasets_dir)?;
        validate_url("sources.ine_base_url", &self.sources.ine_base_url)?;
        validate_url("sources.aemet_base_url", &self.sources.aemet_base_url)?;
        validate_positive_number("http.timeout_seconds", self.http.timeout_seconds as usize, 1)?;
        validate_positive_number("aemet.max_retries", self.aemet.max_retries as usize, 1)?;
        validate_range("aemet.batch_days", self.aemet.batch_days, 1, AEMET_MAX_BATCH_DAYS)?;

        if let Some(token) = &self.aemet.api_token {
            validate_non_empty_string("aemet.api_token", token)?;
        }

        if let Some(end) = self.aemet.end_date {
            if end < self.aemet.start_date {
                return Err(EtlError::InvalidConfigValueError {
                    field: "aemet.end_date".to_string(),
                    value: end.to_string(),
                    reason: format!("must not be before aemet.start_date ({})", self.aemet.start_date),
                });
            }
        }

        Ok(())
    }
}
