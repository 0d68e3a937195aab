use std::path::Path;
use tracing::{debug, info};

use crate::error::{FlowError, FlowResult};
use crate::extract::ExtractionResult;

/// Results as a JSON array
pub fn results_to_json(results: &[ExtractionResult], pretty: bool) -> FlowResult<String> {
    let rendered = if pretty {
        serde_json::to_string_pretty(results)
    } else {
        serde_json::to_string(results)
    };
    rendered.map_err(|e| FlowError::export(e.to_string()))
}

/// Results as JSON Lines, one result per line
pub fn results_to_jsonl(results: &[ExtractionResult]) -> FlowResult<String> {
    let mut output = String::new();

    for result in results {
        let line = serde_json::to_string(result).map_err(|e| FlowError::export(e.to_string()))?;
        output.push_str(&line);
        output.push('\n');
    }

    Ok(output)
}

/// Export results to a JSON file, returning the file size
pub async fn export_json(results: &[ExtractionResult], output_path: &Path, pretty: bool) -> FlowResult<u64> {
    debug!("Exporting {} results to JSON: {}", results.len(), output_path.display());

    tokio::fs::write(output_path, results_to_json(results, pretty)?).await?;
    let file_size = super::file_size(output_path).await?;

    info!("JSON export completed: {} results, {} bytes", results.len(), file_size);
    Ok(file_size)
}

/// Export results to a JSONL file, returning the file size
pub async fn export_jsonl(results: &[ExtractionResult], output_path: &Path) -> FlowResult<u64> {
    debug!("Exporting {} results to JSONL: {}", results.len(), output_path.display());

    tokio::fs::write(output_path, results_to_jsonl(results)?).await?;
    let file_size = super::file_size(output_path).await?;

    info!("JSONL export completed: {} results, {} bytes", results.len(), file_size);
    Ok(file_size)
}
