/*!
 * Rendering of aggregation results
 *
 * JSON for every result record, CSV for row-shaped results (category, range,
 * ranking and correlation tables), and the `{"error": ...}` payload that
 * replaces a failed aggregation.
 */

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::{ExportFormat, Result};

/// Trait for implementing result exporters
pub trait ResultExporter {
    /// Write a sequence of result rows
    fn export_rows<T: Serialize>(&self, rows: &[T], writer: &mut dyn Write) -> Result<()>;

    /// Get the export format
    fn format(&self) -> ExportFormat;

    /// Write rows to a file
    fn export_to_path<T: Serialize>(&self, rows: &[T], path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.export_rows(rows, &mut writer)?;
        writer.flush()?;
        Ok(())
    }
}

/// JSON exporter
pub struct JsonExporter {
    /// Whether to pretty-print the JSON
    pub pretty_print: bool,
    /// Whether to export as JSON Lines (one row per line)
    pub json_lines: bool,
}

impl Default for JsonExporter {
    fn default() -> Self {
        Self {
            pretty_print: true,
            json_lines: false,
        }
    }
}

impl JsonExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pretty_print(mut self, pretty: bool) -> Self {
        self.pretty_print = pretty;
        self
    }

    pub fn as_json_lines(mut self) -> Self {
        self.json_lines = true;
        self.pretty_print = false;
        self
    }

    /// Write a single result record
    pub fn export_value<T: Serialize>(&self, value: &T, writer: &mut dyn Write) -> Result<()> {
        if self.pretty_print {
            serde_json::to_writer_pretty(&mut *writer, value)?;
        } else {
            serde_json::to_writer(&mut *writer, value)?;
        }
        writeln!(writer)?;
        Ok(())
    }
}

impl ResultExporter for JsonExporter {
    fn export_rows<T: Serialize>(&self, rows: &[T], writer: &mut dyn Write) -> Result<()> {
        if self.json_lines {
            for row in rows {
                serde_json::to_writer(&mut *writer, row)?;
                writeln!(writer)?;
            }
            Ok(())
        } else {
            self.export_value(&rows, writer)
        }
    }

    fn format(&self) -> ExportFormat {
        ExportFormat::Json
    }
}

/// CSV exporter for flat result rows
pub struct CsvExporter {
    /// Whether to include headers
    pub include_headers: bool,
    /// Field delimiter
    pub delimiter: u8,
}

impl Default for CsvExporter {
    fn default() -> Self {
        Self {
            include_headers: true,
            delimiter: b',',
        }
    }
}

impl CsvExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn without_headers(mut self) -> Self {
        self.include_headers = false;
        self
    }
}

impl ResultExporter for CsvExporter {
    fn export_rows<T: Serialize>(&self, rows: &[T], writer: &mut dyn Write) -> Result<()> {
        let mut csv_writer = csv::WriterBuilder::new()
            .has_headers(self.include_headers)
            .delimiter(self.delimiter)
            .from_writer(writer);
        for row in rows {
            csv_writer.serialize(row)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    fn format(&self) -> ExportFormat {
        ExportFormat::Csv
    }
}

/// JSON payload of an aggregation call: the result, or `{"error": message}`
pub fn response_json<T: Serialize>(result: &Result<T>) -> Result<serde_json::Value> {
    match result {
        Ok(value) => Ok(serde_json::to_value(value)?),
        Err(err) => Ok(serde_json::to_value(err.to_failure())?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::CategoryStats;
    use crate::error::{AnalyticsError, StoreOperation};

    fn rows() -> Vec<CategoryStats> {
        vec![
            CategoryStats::new("Young", 4, 1),
            CategoryStats::new("Adult", 3, 2),
        ]
    }

    #[test]
    fn test_csv_rows() {
        let mut out = Vec::new();
        CsvExporter::new().export_rows(&rows(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "category,total,diabetic,non_diabetic,rate");
        assert_eq!(lines[1], "Young,4,1,3,25.0");
        assert_eq!(lines[2], "Adult,3,2,1,66.7");
    }

    #[test]
    fn test_json_lines() {
        let mut out = Vec::new();
        JsonExporter::new().as_json_lines().export_rows(&rows(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 2);
        let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(first["rate"], 25.0);
    }

    #[test]
    fn test_error_response() {
        let result: Result<Vec<CategoryStats>> =
            Err(AnalyticsError::store(StoreOperation::SetCardinality, "boom"));
        let value = response_json(&result).unwrap();
        assert_eq!(value, serde_json::json!({"error": "Store operation 'SCARD' failed: boom"}));
    }

    #[test]
    fn test_export_to_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("age_groups.json");
        JsonExporter::new().export_to_path(&rows(), &path).unwrap();
        let parsed: Vec<CategoryStats> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, rows());
    }
}
