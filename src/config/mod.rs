pub mod toml_config;

pub use toml_config::Settings;

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "datania")]
#[command(about = "Open Spanish datasets (INE, AEMET) as Parquet")]
pub struct CliConfig {
    /// Root directory for generated datasets (overrides the config file)
    #[arg(long, global = true)]
    pub datasets_dir: Option<String>,

    /// Optional TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Log CPU and memory usage after each phase")]
    pub monitor: bool,

    #[arg(long, global = true, help = "Emit logs as JSON")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Consumer price index (INE table 50904)
    Ipc,
    /// Mortgage statistics, national and per province
    Hipotecas,
    /// AEMET weather station inventory
    AemetStations,
    /// AEMET daily climatology: incremental download + Parquet build
    AemetDaily {
        /// Only rebuild the Parquet file from the raw cache
        #[arg(long)]
        skip_download: bool,

        /// Only refresh the raw cache
        #[arg(long, conflicts_with = "skip_download")]
        skip_process: bool,
    },
}

#[cfg(feature = "cli")]
impl CliConfig {
    /// 讀設定檔再套用命令列覆蓋
    pub fn settings(&self) -> crate::utils::error::Result<Settings> {
        let mut settings = Settings::load(self.config.as_deref())?;
        if let Some(dir) = &self.datasets_dir {
            settings.datasets_dir = dir.clone();
        }
        Ok(settings)
    }
}
