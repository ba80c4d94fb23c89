pub mod alignment;
pub mod config;
pub mod data_io;
pub mod error;
pub mod extract;
pub mod grid;
pub mod landcover;
pub mod lookup;
pub mod model_files;
pub mod plot;
pub mod retrieve;
pub mod source_area;
pub mod time_utils;

pub use error::EvalError;
pub use time_utils::*;
