use serde_json::{Map, Value};
use std::io::Read;

/// Read a headered CSV export into raw JSON objects, one per row.
/// Every cell is kept as a string; empty cells are left out so the normalizer
/// treats them as missing fields.
pub fn read_csv_records<R: Read>(reader: R) -> eyre::Result<Vec<Value>> {
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(::csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| eyre::eyre!("Failed to read CSV header: {}", e))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut rows = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = result.map_err(|e| eyre::eyre!("Malformed CSV row {}: {}", line + 1, e))?;
        let mut obj = Map::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            if !cell.is_empty() {
                obj.insert(header.clone(), Value::String(cell.to_string()));
            }
        }
        rows.push(Value::Object(obj));
    }

    tracing::debug!(rows = rows.len(), "Parsed CSV records");
    Ok(rows)
}

/// Open a CSV file and read it with [`read_csv_records`].
pub fn load_csv_records(path: &str) -> eyre::Result<Vec<Value>> {
    let file = std::fs::File::open(path)
        .map_err(|e| eyre::eyre!("Failed to open CSV '{}': {}", path, e))?;
    let rows = read_csv_records(file)?;
    tracing::info!(rows = rows.len(), path, "Loaded CSV records");
    Ok(rows)
}
