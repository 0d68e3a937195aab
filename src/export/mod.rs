use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{error, info};

pub mod csv_exporter;
pub mod json_exporter;

use crate::config::ExportConfig;
use crate::error::{FlowError, FlowResult};
use crate::extract::ExtractionResult;

/// Export manager for extraction sessions
pub struct ExportManager {
    config: ExportConfig,
}

/// Export format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
    Jsonl,
}

impl std::str::FromStr for ExportFormat {
    type Err = FlowError;

    fn from_str(s: &str) -> FlowResult<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "jsonl" | "ndjson" => Ok(ExportFormat::Jsonl),
            _ => Err(FlowError::UnsupportedFormat { format: s.to_string() }),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportFormat::Csv => write!(f, "csv"),
            ExportFormat::Json => write!(f, "json"),
            ExportFormat::Jsonl => write!(f, "jsonl"),
        }
    }
}

/// Export statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportStats {
    pub format: ExportFormat,
    pub file_path: String,
    pub record_count: usize,
    pub file_size_bytes: u64,
    pub export_duration_ms: u64,
}

impl ExportManager {
    pub fn new(config: &ExportConfig) -> Self {
        Self { config: config.clone() }
    }

    /// Format configured as the default
    pub fn default_format(&self) -> FlowResult<ExportFormat> {
        self.config.default_format.parse()
    }

    /// Write results to `output_path`, creating parent directories
    pub async fn export(
        &self,
        results: &[ExtractionResult],
        output_path: &Path,
        format: ExportFormat,
    ) -> FlowResult<ExportStats> {
        info!("Exporting {} results to {} as {}", results.len(), output_path.display(), format);
        let start_time = std::time::Instant::now();

        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| FlowError::FileSystem {
                path: format!("{}: {}", parent.display(), e),
            })?;
        }

        let written = match format {
            ExportFormat::Csv => csv_exporter::export_csv(results, output_path).await,
            ExportFormat::Json => json_exporter::export_json(results, output_path, self.config.pretty_json).await,
            ExportFormat::Jsonl => json_exporter::export_jsonl(results, output_path).await,
        };
        let file_size_bytes = written.map_err(|e| {
            error!("Failed to export to {}: {}", output_path.display(), e);
            e
        })?;

        let stats = ExportStats {
            format,
            file_path: output_path.display().to_string(),
            record_count: results.len(),
            file_size_bytes,
            export_duration_ms: start_time.elapsed().as_millis() as u64,
        };

        info!(
            "Export completed: {} results in {}ms, file size: {} bytes",
            stats.record_count, stats.export_duration_ms, stats.file_size_bytes
        );

        Ok(stats)
    }

    /// Render results in memory
    pub fn render(&self, results: &[ExtractionResult], format: ExportFormat) -> FlowResult<String> {
        match format {
            ExportFormat::Csv => csv_exporter::results_to_csv(results),
            ExportFormat::Json => json_exporter::results_to_json(results, self.config.pretty_json),
            ExportFormat::Jsonl => json_exporter::results_to_jsonl(results),
        }
    }

    /// Generate default filename under the configured output directory
    pub fn default_output_path(&self, schema_id: &str, format: ExportFormat) -> std::path::PathBuf {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        self.config
            .output_directory
            .join(format!("{}_{}.{}", schema_id, timestamp, format))
    }
}

async fn file_size(path: &Path) -> FlowResult<u64> {
    Ok(tokio::fs::metadata(path).await?.len())
}
