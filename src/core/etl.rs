use crate::core::Pipeline;
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;

pub struct EtlEngine<P: Pipeline> {
    pipeline: P,
    monitor: SystemMonitor,
}

impl<P: Pipeline> EtlEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self::new_with_monitoring(pipeline, false)
    }

    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    /// 跑完 extract → transform → load，回傳輸出檔路徑
    pub async fn run(&self) -> Result<String> {
        let name = self.pipeline.name().to_string();
        tracing::info!("🚀 Starting pipeline {}", name);
        if self.monitor.is_enabled() {
            tracing::debug!("🔍 Resource monitoring active for {}", name);
        }

        tracing::info!("📥 Extracting {}...", name);
        let raw = self.pipeline.extract().await?;
        self.monitor.log_phase(&name, "extract");

        tracing::info!("🔄 Transforming {}...", name);
        let table = self.pipeline.transform(raw).await?;
        tracing::info!("Transformed {} records into {}", table.len(), table.name);
        self.monitor.log_phase(&name, "transform");

        tracing::info!("💾 Loading {}...", name);
        let output_path = self.pipeline.load(table).await?;
        self.monitor.log_phase(&name, "load");

        tracing::info!("✅ {} written to {}", name, output_path);
        self.monitor.log_final(&name);

        Ok(output_path)
    }
}
