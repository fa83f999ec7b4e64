pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{CliConfig, Command};

pub use adapters::LocalStorage;
pub use app::pipelines::{AemetDailyPipeline, AemetStationsPipeline, HipotecasPipeline, IpcPipeline};
pub use config::Settings;
pub use core::{etl::EtlEngine, Pipeline, Storage, Table};
pub use utils::error::{EtlError, Result};
