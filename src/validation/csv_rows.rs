//! CSV reading and writing for telemetry batches.
//!
//! Rows are kept as [`RawRecord`]s so columns outside the schema survive
//! the trip to the processed and rejected outputs.

use crate::models::RawRecord;

/// Parsed CSV content.
#[derive(Debug, Clone, Default)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawRecord>,
}

/// Parse CSV bytes with a header row.
///
/// Short rows leave their trailing columns absent, which the validator then
/// reports as missing.
pub fn read_csv(bytes: &[u8]) -> Result<CsvTable, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(bytes);

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let mut row = RawRecord::new();
        for (header, value) in headers.iter().zip(record.iter()) {
            row.insert(header.clone(), value);
        }
        rows.push(row);
    }

    Ok(CsvTable { headers, rows })
}

/// Serialize rows under the given header order.
pub fn write_csv<'a>(
    headers: &[String],
    rows: impl IntoIterator<Item = &'a RawRecord>,
) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(row.to_row(headers))?;
    }
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}
