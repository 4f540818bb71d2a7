//! Cross-job aggregate report.

pub mod aggregator;
pub mod writer;

use std::path::Path;

use crate::config::ReportConfig;

pub use aggregator::{AggregateReport, ReportAggregator, ReportRow, RowStatus, RunSummary};
pub use writer::{CsvReportWriter, JsonReportWriter, ReportWriter, XlsxReportWriter};

/// Writers for the configured report files under `output_directory`.
pub fn writers_from_config(
    config: &ReportConfig,
    output_directory: &Path,
) -> Vec<Box<dyn ReportWriter>> {
    let mut writers: Vec<Box<dyn ReportWriter>> = vec![Box::new(CsvReportWriter::new(
        output_directory.join(&config.csv_filename),
    ))];
    if let Some(json) = &config.json_filename {
        writers.push(Box::new(JsonReportWriter::new(output_directory.join(json))));
    }
    if let Some(xlsx) = &config.xlsx_filename {
        writers.push(Box::new(XlsxReportWriter::new(output_directory.join(xlsx))));
    }
    writers
}
