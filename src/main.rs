use clap::Parser;
use datania::utils::error::ErrorSeverity;
use datania::utils::{logger, validation::Validate};
use datania::{
    AemetDailyPipeline, AemetStationsPipeline, CliConfig, Command, EtlEngine, EtlError,
    HipotecasPipeline, IpcPipeline, LocalStorage, Pipeline, Settings,
};

async fn run_pipeline<P: Pipeline>(pipeline: P, monitor: bool) -> datania::Result<String> {
    EtlEngine::new_with_monitoring(pipeline, monitor).run().await
}

async fn dispatch(cli: &CliConfig, settings: &Settings) -> datania::Result<String> {
    let storage = LocalStorage::new(&settings.datasets_dir);

    match &cli.command {
        Command::Ipc => run_pipeline(IpcPipeline::from_settings(storage, settings)?, cli.monitor).await,
        Command::Hipotecas => {
            run_pipeline(HipotecasPipeline::from_settings(storage, settings)?, cli.monitor).await
        }
        Command::AemetStations => {
            run_pipeline(AemetStationsPipeline::from_settings(storage, settings)?, cli.monitor).await
        }
        Command::AemetDaily {
            skip_download,
            skip_process,
        } => {
            let pipeline = AemetDailyPipeline::from_settings(storage, settings, !skip_download)?;
            if *skip_process {
                let summary = pipeline.download_missing().await?;
                tracing::debug!("Download summary: {:?}", summary);
                Ok(datania::app::pipelines::aemet_daily::RAW_DIR.to_string())
            } else {
                run_pipeline(pipeline, cli.monitor).await
            }
        }
    }
}

fn report_failure(e: &EtlError) -> i32 {
    // 記錄詳細錯誤信息
    tracing::error!(
        "❌ Pipeline failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 {}", e.recovery_suggestion());

    match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    if cli.json_logs {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }
    tracing::debug!("CLI config: {:?}", cli);

    let settings = match cli.settings().and_then(|s| s.validate().map(|_| s)) {
        Ok(settings) => settings,
        Err(e) => std::process::exit(report_failure(&e)),
    };

    if cli.monitor {
        tracing::info!("🔍 System monitoring enabled");
    }

    match dispatch(&cli, &settings).await {
        Ok(output_path) => {
            let full_path = LocalStorage::new(&settings.datasets_dir).full_path(&output_path);
            println!("✅ {} written", full_path.display());
        }
        Err(e) => {
            let exit_code = report_failure(&e);
            if exit_code > 0 {
                std::process::exit(exit_code);
            }
        }
    }

    Ok(())
}
