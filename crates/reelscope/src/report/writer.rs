use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Format, Workbook, XlsxError};

use crate::error::ReportError;

use super::aggregator::AggregateReport;

/// Destination of the aggregate report.
pub trait ReportWriter: Send + Sync {
    fn name(&self) -> &str;

    /// Writes the whole report and returns where it landed.
    fn write(&self, report: &AggregateReport) -> Result<PathBuf, ReportError>;
}

fn io_error(path: &Path) -> impl Fn(std::io::Error) -> ReportError + '_ {
    move |source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Writes through `<dir>/.<name>.tmp` and renames into place, so a reader
/// never sees a half-written report.
fn write_atomically<F>(path: &Path, fill: F) -> Result<PathBuf, ReportError>
where
    F: FnOnce(File) -> Result<File, ReportError>,
{
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(io_error(parent))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "report".to_string());
    let temp_path = parent.join(format!(".{}.tmp", file_name));

    let file = File::create(&temp_path).map_err(io_error(&temp_path))?;
    let result = fill(file).and_then(|file| file.sync_all().map_err(io_error(&temp_path)));
    if let Err(e) = result {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }

    std::fs::rename(&temp_path, path).map_err(io_error(path))?;
    Ok(path.to_path_buf())
}

/// Spreadsheet-friendly CSV, one row per job.
pub struct CsvReportWriter {
    path: PathBuf,
}

impl CsvReportWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReportWriter for CsvReportWriter {
    fn name(&self) -> &str {
        "csv"
    }

    fn write(&self, report: &AggregateReport) -> Result<PathBuf, ReportError> {
        write_atomically(&self.path, |file| {
            let mut writer = csv::Writer::from_writer(file);
            writer.write_record(report.columns())?;
            for row in &report.rows {
                writer.write_record(row.cells(&report.field_columns))?;
            }
            writer
                .into_inner()
                .map_err(|e| ReportError::Io {
                    path: self.path.clone(),
                    source: std::io::Error::new(e.error().kind(), e.error().to_string()),
                })
        })
    }
}

/// The full report, including per-row artifact maps, as pretty JSON.
pub struct JsonReportWriter {
    path: PathBuf,
}

impl JsonReportWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReportWriter for JsonReportWriter {
    fn name(&self) -> &str {
        "json"
    }

    fn write(&self, report: &AggregateReport) -> Result<PathBuf, ReportError> {
        write_atomically(&self.path, |mut file| {
            let json = serde_json::to_vec_pretty(report)?;
            file.write_all(&json).map_err(io_error(&self.path))?;
            Ok(file)
        })
    }
}

const XLSX_SHEET: &str = "Report";

/// Excel workbook with one `Report` sheet. The URL is the first column so
/// the sheet reads naturally when opened by hand.
pub struct XlsxReportWriter {
    path: PathBuf,
}

impl XlsxReportWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn build(&self, report: &AggregateReport) -> Result<Vec<u8>, ReportError> {
        let columns = report.columns();
        let url_index = columns.iter().position(|c| c == "url").unwrap_or(0);
        let order: Vec<usize> = std::iter::once(url_index)
            .chain((0..columns.len()).filter(|&i| i != url_index))
            .collect();

        let mut workbook = Workbook::new();
        {
            let header = Format::new().set_bold();
            let sheet = workbook.add_worksheet();
            sheet.set_name(XLSX_SHEET)?;

            for (col, &source) in order.iter().enumerate() {
                sheet.write_string_with_format(0, to_col(col)?, &columns[source], &header)?;
            }
            for (row_index, row) in report.rows.iter().enumerate() {
                let row_num = to_row(row_index + 1)?;
                let cells = row.cells(&report.field_columns);
                for (col, &source) in order.iter().enumerate() {
                    let col = to_col(col)?;
                    if columns[source] == "attempts" {
                        sheet.write_number(row_num, col, f64::from(row.attempts))?;
                    } else if !cells[source].is_empty() {
                        sheet.write_string(row_num, col, &cells[source])?;
                    }
                }
            }
            sheet.set_freeze_panes(1, 0)?;
        }
        Ok(workbook.save_to_buffer()?)
    }
}

fn to_col(index: usize) -> Result<u16, ReportError> {
    u16::try_from(index).map_err(|_| ReportError::Xlsx(XlsxError::RowColumnLimitError))
}

fn to_row(index: usize) -> Result<u32, ReportError> {
    u32::try_from(index).map_err(|_| ReportError::Xlsx(XlsxError::RowColumnLimitError))
}

impl ReportWriter for XlsxReportWriter {
    fn name(&self) -> &str {
        "xlsx"
    }

    fn write(&self, report: &AggregateReport) -> Result<PathBuf, ReportError> {
        let bytes = self.build(report)?;
        write_atomically(&self.path, |mut file| {
            file.write_all(&bytes).map_err(io_error(&self.path))?;
            Ok(file)
        })
    }
}
