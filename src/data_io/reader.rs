use crate::time_utils::{offset_millis, parse_time_units, TimeError};
use chrono::NaiveDateTime;
use ndarray::{ArrayD, IxDyn};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("NetCDF error: {0}")]
    Netcdf(#[from] netcdf::Error),

    #[error("Variable not found: {0}")]
    MissingVariable(String),

    #[error("Attribute {attribute} not found on {variable}")]
    MissingAttribute { variable: String, attribute: String },

    #[error("Shape mismatch for {name}: {len} values do not fit {shape:?}")]
    ShapeMismatch {
        name: String,
        shape: Vec<usize>,
        len: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Time units error: {0}")]
    TimeUnits(#[from] TimeError),

    #[error("File not found: {0}")]
    FileNotFound(String),
}

/// A data field as laid out in the file: `[lat, lon, time]` or
/// `[lat, lon, time, level]`.
#[derive(Debug, Clone)]
pub struct ModelField {
    /// Name the field was found under.
    pub name: String,
    pub data: ArrayD<f32>,
}

impl ModelField {
    pub fn has_levels(&self) -> bool {
        self.data.ndim() == 4
    }

    pub fn time_len(&self) -> usize {
        self.data.shape().get(2).copied().unwrap_or(0)
    }
}

/// In-memory view of one premade model file.
#[derive(Debug, Clone)]
pub struct ModelFile {
    pub path: PathBuf,
    pub level_height: Option<Vec<f64>>,
    /// Units attribute of the `time` coordinate.
    pub time_units: String,
    pub forecast_reference_time: f64,
    /// Hours since the forecast reference time.
    pub forecast_period: Vec<f64>,
    pub field: ModelField,
}

impl ModelFile {
    /// Absolute times of each forecast step.
    pub fn run_times(&self) -> Result<Vec<NaiveDateTime>, ReaderError> {
        let start = parse_time_units(&self.time_units, &[self.forecast_reference_time])?
            .into_iter()
            .next()
            .ok_or_else(|| ReaderError::MissingVariable("forecast_reference_time".to_string()))?;

        let times = self
            .forecast_period
            .iter()
            .map(|hr| offset_millis(start, hr * 3_600_000.0))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(times)
    }
}

/// Source of model files. The NetCDF reader is the real implementation;
/// tests substitute in-memory files.
pub trait ModelReader {
    /// Read a file, taking the first field found from `field_names`.
    fn read(&self, path: &Path, field_names: &[&str]) -> Result<ModelFile, ReaderError>;
}

/// Reads premade site files written by the UM post-processing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetCDFModelReader;

impl NetCDFModelReader {
    pub fn new() -> Self {
        Self
    }
}

impl ModelReader for NetCDFModelReader {
    fn read(&self, path: &Path, field_names: &[&str]) -> Result<ModelFile, ReaderError> {
        if !path.exists() {
            return Err(ReaderError::FileNotFound(path.display().to_string()));
        }

        let file = netcdf::open(path)?;

        let level_height = match file.variable("level_height") {
            Some(var) => Some(var.get_values::<f64, _>(..)?),
            None => None,
        };

        let time_var = file
            .variable("time")
            .ok_or_else(|| ReaderError::MissingVariable("time".to_string()))?;
        let time_units = match time_var.attribute("units").map(|a| a.value()) {
            Some(Ok(netcdf::AttributeValue::Str(units))) => units,
            _ => {
                return Err(ReaderError::MissingAttribute {
                    variable: "time".to_string(),
                    attribute: "units".to_string(),
                })
            }
        };

        let forecast_reference_time = file
            .variable("forecast_reference_time")
            .ok_or_else(|| ReaderError::MissingVariable("forecast_reference_time".to_string()))?
            .get_values::<f64, _>(..)?
            .first()
            .copied()
            .ok_or_else(|| ReaderError::MissingVariable("forecast_reference_time".to_string()))?;

        let forecast_period: Vec<f64> = file
            .variable("forecast_period")
            .ok_or_else(|| ReaderError::MissingVariable("forecast_period".to_string()))?
            .get_values(..)?;

        let (name, var) = field_names
            .iter()
            .find_map(|name| file.variable(name).map(|v| (name.to_string(), v)))
            .ok_or_else(|| ReaderError::MissingVariable(field_names.join(" / ")))?;

        let raw: Vec<f32> = var.get_values(..)?;
        let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
        let len = raw.len();
        let data = ArrayD::from_shape_vec(IxDyn(&shape), raw).map_err(|_| {
            ReaderError::ShapeMismatch {
                name: name.clone(),
                shape: shape.clone(),
                len,
            }
        })?;

        debug!("Read {} {:?} from {}", name, shape, path.display());

        Ok(ModelFile {
            path: path.to_path_buf(),
            level_height,
            time_units,
            forecast_reference_time,
            forecast_period,
            field: ModelField { name, data },
        })
    }
}
