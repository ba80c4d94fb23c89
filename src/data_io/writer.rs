use crate::data_io::Frame;
use crate::extract::DodgyFile;
use crate::model_files::{parse_file_name, FileSearch};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Fill value for gaps in NetCDF output.
pub const FILL_VALUE: f64 = -9999.0;

const TIME_UNITS: &str = "hours since 1970-01-01 00:00:00";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("NetCDF error: {0}")]
    Netcdf(#[from] netcdf::Error),

    #[error("Nothing to write: {0}")]
    Empty(String),
}

/// Output target for retrieval frames.
pub trait FrameWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), WriteError>;

    /// Add a global attribute. Formats without attributes ignore it.
    fn add_global_attribute(&mut self, name: &str, value: &str) -> Result<(), WriteError>;

    fn output_path(&self) -> &Path;
}

/// Writes a frame as CSV: index column, then one column per series, empty
/// cells for gaps.
pub struct CsvFrameWriter {
    path: PathBuf,
}

impl CsvFrameWriter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl FrameWriter for CsvFrameWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), WriteError> {
        let mut writer = csv::Writer::from_path(&self.path)?;

        let mut header = vec![frame.index_name.clone()];
        header.extend(frame.columns.iter().cloned());
        writer.write_record(&header)?;

        for (time, row) in &frame.rows {
            let mut record = vec![time.format(DATETIME_FORMAT).to_string()];
            record.extend(row.iter().map(|v| v.map(|v| v.to_string()).unwrap_or_default()));
            writer.write_record(&record)?;
        }
        writer.flush()?;

        info!("Wrote {} rows to {}", frame.len(), self.path.display());
        Ok(())
    }

    fn add_global_attribute(&mut self, _name: &str, _value: &str) -> Result<(), WriteError> {
        Ok(())
    }

    fn output_path(&self) -> &Path {
        &self.path
    }
}

/// Writes a frame as NetCDF with a `time` dimension and one variable per
/// column.
pub struct NetCDFFrameWriter {
    path: PathBuf,
    attributes: Vec<(String, String)>,
}

impl NetCDFFrameWriter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            attributes: Vec::new(),
        }
    }
}

/// Variable name for a column. Grid number columns get a `grid_` prefix.
pub fn netcdf_name(column: &str) -> String {
    if column.starts_with(|c: char| c.is_ascii_digit()) {
        format!("grid_{}", column)
    } else {
        column.to_string()
    }
}

fn hours_since_epoch(t: &NaiveDateTime) -> f64 {
    t.and_utc().timestamp() as f64 / 3600.0
}

impl FrameWriter for NetCDFFrameWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), WriteError> {
        if frame.is_empty() {
            return Err(WriteError::Empty(self.path.display().to_string()));
        }

        let mut file = netcdf::create(&self.path)?;
        file.add_dimension("time", frame.len())?;

        file.add_attribute("Conventions", "CF-1.6")?;
        file.add_attribute(
            "history",
            format!("Created on {}", chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S")),
        )?;
        for (name, value) in &self.attributes {
            file.add_attribute(name, value.as_str())?;
        }

        {
            let mut time_var = file.add_variable::<f64>("time", &["time"])?;
            time_var.put_attribute("units", TIME_UNITS)?;
            time_var.put_attribute("long_name", frame.index_name.as_str())?;
            let times: Vec<f64> = frame.rows.keys().map(hours_since_epoch).collect();
            time_var.put_values(&times, ..)?;
        }

        for (i, column) in frame.columns.iter().enumerate() {
            let mut var = file.add_variable::<f64>(&netcdf_name(column), &["time"])?;
            var.put_attribute("long_name", column.as_str())?;
            var.put_attribute("_FillValue", FILL_VALUE)?;
            let data: Vec<f64> = frame
                .rows
                .values()
                .map(|row| row[i].unwrap_or(FILL_VALUE))
                .collect();
            var.put_values(&data, ..)?;
        }

        info!(
            "Wrote {} columns over {} times to {}",
            frame.columns.len(),
            frame.len(),
            self.path.display()
        );
        Ok(())
    }

    fn add_global_attribute(&mut self, name: &str, value: &str) -> Result<(), WriteError> {
        self.attributes.push((name.to_string(), value.to_string()));
        Ok(())
    }

    fn output_path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Serialize)]
struct FileRow {
    day: String,
    stash: String,
    exists: bool,
    path: String,
}

/// List found and missing model files, one row per file.
pub fn write_file_search(search: &FileSearch, path: &Path) -> Result<(), WriteError> {
    let mut writer = csv::Writer::from_path(path)?;
    for (key, paths) in &search.files {
        for p in paths {
            writer.serialize(FileRow {
                day: key.to_string(),
                stash: stash_of(p),
                exists: true,
                path: p.display().to_string(),
            })?;
        }
    }
    for p in &search.missing_files {
        let day = parse_file_name(p)
            .map(|n| n.date.format("%Y%j").to_string())
            .unwrap_or_default();
        writer.serialize(FileRow {
            day,
            stash: stash_of(p),
            exists: false,
            path: p.display().to_string(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

fn stash_of(path: &Path) -> String {
    parse_file_name(path).map(|n| n.stash).unwrap_or_default()
}

#[derive(Debug, Serialize)]
struct DodgyRow {
    path: String,
    reason: String,
}

/// Record skipped files next to the output they were left out of.
pub fn write_dodgy_files(files: &[DodgyFile], path: &Path) -> Result<(), WriteError> {
    let mut writer = csv::Writer::from_path(path)?;
    for file in files {
        writer.serialize(DodgyRow {
            path: file.path.display().to_string(),
            reason: file.reason.to_string(),
        })?;
    }
    writer.flush()?;
    Ok(())
}
