use csv::{Terminator, WriterBuilder};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use crate::error::{FlowError, FlowResult};
use crate::extract::ExtractionResult;

/// Flat CSV of the results' `data`.
///
/// The header is the key set of the first result; later results contribute
/// only those columns.
pub fn results_to_csv(results: &[ExtractionResult]) -> FlowResult<String> {
    let columns: Vec<&String> = match results.first() {
        Some(first) => first.data.keys().collect(),
        None => return Ok(String::new()),
    };

    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer.write_record(&columns)?;
    for result in results {
        let record: Vec<String> = columns
            .iter()
            .map(|column| cell(result.data.get(column.as_str())))
            .collect();
        writer.write_record(&record)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| FlowError::export(format!("Failed to flush CSV: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| FlowError::export(e.to_string()))
}

/// Strings are written raw, null and missing become empty, anything else is JSON
fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Export results to a CSV file, returning the file size
pub async fn export_csv(results: &[ExtractionResult], output_path: &Path) -> FlowResult<u64> {
    debug!("Exporting {} results to CSV: {}", results.len(), output_path.display());

    let content = results_to_csv(results)?;
    tokio::fs::write(output_path, content).await?;

    super::file_size(output_path).await
}
