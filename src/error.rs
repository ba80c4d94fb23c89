use crate::alignment::AlignmentError;
use crate::data_io::{ReaderError, WriteError};
use crate::extract::ExtractError;
use crate::landcover::LandCoverError;
use crate::lookup::LookupError;
use crate::model_files::ModelFilesError;
use crate::source_area::SourceAreaError;
use crate::time_utils::TimeError;
use thiserror::Error;

/// Crate level error for whole evaluation runs.
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Time error: {0}")]
    Time(#[from] TimeError),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Model files error: {0}")]
    ModelFiles(#[from] ModelFilesError),

    #[error("Reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("Alignment error: {0}")]
    Alignment(#[from] AlignmentError),

    #[error("Extract error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Source area error: {0}")]
    SourceArea(#[from] SourceAreaError),

    #[error("Land cover error: {0}")]
    LandCover(#[from] LandCoverError),

    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    #[error("Plot error: {0}")]
    Plot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No data: {0}")]
    NoData(String),
}

pub type Result<T> = std::result::Result<T, EvalError>;
