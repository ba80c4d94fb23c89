//! Source area weighting over the grids a footprint overlaps.
//!
//! Hourly source area rasters are matched against the UKV grid numbers by a
//! separate overlay step, which writes the percentage of each footprint held
//! by each grid to a CSV. Here those percentages pick which model grids to
//! extract and weight them into one series.

use crate::data_io::reader::ModelReader;
use crate::extract::{extract_model_data, ExtractError, ExtractRequest, ModelSeries};
use crate::grid::{sites_for_grid, GridLetter, GridNumber, GridTable};
use crate::lookup::{LookupError, ModelName, Run, Site, Variable};
use crate::model_files::{find_ukv_files, order_model_stashes, FileRequest, ModelFilesError};
use crate::time_utils::{DayKey, DoyDate};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// File name prefix of the hourly footprint rasters.
pub const DEFAULT_SA_NAME_START: &str = "BCT_IMU_15000_";

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum SourceAreaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Model files error: {0}")]
    ModelFiles(#[from] ModelFilesError),

    #[error("Extract error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Cannot read hour from source area file {0}")]
    BadHour(String),

    #[error("Invalid datetime: {0}")]
    BadDatetime(String),
}

/// Hours with a source area raster in `dir` for the given day.
///
/// The hour is the second to last `_` separated field of each `.tif` name.
pub fn retrieve_sa_hours(dir: &Path, date: DoyDate) -> Result<Vec<NaiveDateTime>, SourceAreaError> {
    let midnight = date.midnight();
    let mut hours = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name().to_string_lossy().to_string();
        let Some(stem) = name.strip_suffix(".tif") else {
            continue;
        };
        let fields: Vec<&str> = stem.split('_').collect();
        let hour: i64 = fields
            .len()
            .checked_sub(2)
            .and_then(|i| fields[i].parse().ok())
            .ok_or_else(|| SourceAreaError::BadHour(name.clone()))?;
        hours.push(midnight + Duration::hours(hour));
    }

    hours.sort();
    Ok(hours)
}

/// Raster path for each hour: `<dir><name_start><YYYY>_<DOY>_<HH>_<MM>.tif`.
pub fn find_source_area(times: &[NaiveDateTime], dir: &Path, name_start: &str) -> Vec<PathBuf> {
    times
        .iter()
        .map(|t| dir.join(format!("{}{}.tif", name_start, t.format("%Y_%j_%H_%M"))))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PercentageRow {
    datetime: String,
    grid: u32,
    percentage: f64,
}

/// Per hour, the grids a footprint overlaps and the percentage of the
/// footprint in each.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridPercentages {
    hours: BTreeMap<NaiveDateTime, Vec<(GridNumber, f64)>>,
}

impl GridPercentages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_csv(path: &Path) -> Result<Self, SourceAreaError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    /// Read `datetime,grid,percentage` rows.
    pub fn from_reader(reader: impl Read) -> Result<Self, SourceAreaError> {
        let mut percentages = Self::new();
        let mut csv_reader = csv::Reader::from_reader(reader);
        for row in csv_reader.deserialize() {
            let row: PercentageRow = row?;
            let hour = NaiveDateTime::parse_from_str(row.datetime.trim(), DATETIME_FORMAT)
                .map_err(|_| SourceAreaError::BadDatetime(row.datetime.clone()))?;
            percentages.insert(hour, GridNumber::new(row.grid)?, row.percentage);
        }
        Ok(percentages)
    }

    pub fn insert(&mut self, hour: NaiveDateTime, grid: GridNumber, percentage: f64) {
        self.hours.entry(hour).or_default().push((grid, percentage));
    }

    pub fn hours(&self) -> impl Iterator<Item = &NaiveDateTime> {
        self.hours.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NaiveDateTime, &Vec<(GridNumber, f64)>)> {
        self.hours.iter()
    }

    pub fn grids_at(&self, hour: &NaiveDateTime) -> &[(GridNumber, f64)] {
        self.hours.get(hour).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.hours.is_empty()
    }

    /// Every grid used in any hour.
    pub fn all_grids(&self) -> BTreeSet<GridNumber> {
        self.hours
            .values()
            .flat_map(|grids| grids.iter().map(|(g, _)| *g))
            .collect()
    }

    /// Percentage of each hour's footprint that falls on model grids.
    pub fn percentage_covered_by_model(&self) -> BTreeMap<NaiveDateTime, f64> {
        self.hours
            .iter()
            .map(|(hour, grids)| (*hour, grids.iter().map(|(_, p)| p).sum()))
            .collect()
    }

    /// Keep only the given hours.
    pub fn restrict_to(&self, hours: &[NaiveDateTime]) -> Self {
        Self {
            hours: self
                .hours
                .iter()
                .filter(|(h, _)| hours.contains(h))
                .map(|(h, g)| (*h, g.clone()))
                .collect(),
        }
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), SourceAreaError> {
        let mut writer = csv::Writer::from_path(path)?;
        for (hour, grids) in &self.hours {
            for (grid, percentage) in grids {
                writer.serialize(PercentageRow {
                    datetime: hour.format(DATETIME_FORMAT).to_string(),
                    grid: grid.get(),
                    percentage: *percentage,
                })?;
            }
        }
        writer.flush()?;
        Ok(())
    }
}

/// Where and what to look for when gathering grid files.
#[derive(Debug, Clone)]
pub struct GridSearch {
    pub root: PathBuf,
    pub start: DoyDate,
    pub stop: DoyDate,
    pub run: Run,
    pub variable: Variable,
    pub target_height: Option<f64>,
    pub hours_before_repeat: usize,
}

/// The site, its letter for a grid and its files for one day.
type SiteDay = (Site, GridLetter, Vec<PathBuf>);

/// Runs of consecutive days served by the same site.
fn split_by_site(
    complete: &BTreeMap<DayKey, SiteDay>,
) -> Vec<(Site, GridLetter, BTreeMap<DayKey, Vec<PathBuf>>)> {
    let mut runs: Vec<(Site, GridLetter, BTreeMap<DayKey, Vec<PathBuf>>)> = Vec::new();
    for (key, (site, letter, paths)) in complete {
        match runs.last_mut() {
            Some((run_site, _, files)) if run_site == site => {
                files.insert(*key, paths.clone());
            }
            _ => {
                let mut files = BTreeMap::new();
                files.insert(*key, paths.clone());
                runs.push((*site, *letter, files));
            }
        }
    }
    runs
}

/// Offer a site's files for a day.
///
/// The first site offered keeps the day unless it lacks some of the `needed`
/// stash files and the new site has them all.
fn offer_day(
    complete: &mut BTreeMap<DayKey, SiteDay>,
    key: DayKey,
    offer: SiteDay,
    needed: usize,
) {
    match complete.get(&key) {
        Some((_, _, held)) if held.len() >= needed || offer.2.len() < needed => {}
        _ => {
            complete.insert(key, offer);
        }
    }
}

/// Extract one series per grid used by the footprint.
///
/// A grid is covered by the 3x3 blocks of several sites. Files of every such
/// site are found, the first site in table order with every stash file for a
/// day supplies that day, and each run of days from one site is extracted
/// with that site's letter for the grid.
pub fn determine_which_model_files(
    reader: &dyn ModelReader,
    percentages: &GridPercentages,
    search: &GridSearch,
) -> Result<BTreeMap<GridNumber, ModelSeries>, SourceAreaError> {
    let mut included = BTreeMap::new();

    for grid in percentages.all_grids() {
        let options = sites_for_grid(grid, GridTable::StashCodes);
        info!("Grid number chosen: {} (options {:?})", grid, options);

        let needed = search.variable.stash_codes().len();
        let mut complete: BTreeMap<DayKey, SiteDay> = BTreeMap::new();
        for &(site, letter) in options {
            info!("Finding files for site: {}", site);
            let found = find_ukv_files(&FileRequest {
                root: search.root.clone(),
                start: search.start,
                stop: search.stop,
                site,
                model: ModelName::Ukv,
                run: search.run,
                variable: search.variable,
            })?;
            for (key, paths) in found.files {
                offer_day(&mut complete, key, (site, letter, paths), needed);
            }
        }

        let mut combined: Option<ModelSeries> = None;
        for (site, letter, files) in split_by_site(&complete) {
            let stash_files = order_model_stashes(&files, search.variable)?;
            let request = ExtractRequest {
                variable: search.variable,
                model: ModelName::Ukv,
                site,
                target_height: search.target_height,
                grid_choice: letter,
                hours_before_repeat: search.hours_before_repeat,
            };
            let series = extract_model_data(reader, &stash_files, &request)?;
            match combined.as_mut() {
                Some(all) => all.merge(series),
                None => combined = Some(series),
            }
        }

        match combined {
            Some(series) => {
                included.insert(grid, series);
            }
            None => warn!("No model files for grid {}", grid),
        }
    }

    Ok(included)
}

/// Relative difference above which two sites disagree on a grid value.
const GRID_VALUE_TOLERANCE: f64 = 1e-5;

/// A time where two sites' files hold different values for the same grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridDisagreement {
    pub grid: GridNumber,
    pub reference: (Site, GridLetter),
    pub other: (Site, GridLetter),
    pub time: NaiveDateTime,
    pub reference_value: f64,
    pub value: f64,
}

/// Compare a grid's values across every site block that covers it.
///
/// The first site in table order with files is the reference. Every other
/// site with files is compared with it at the times both hold.
pub fn check_grid_stash_values(
    reader: &dyn ModelReader,
    search: &GridSearch,
    grid: GridNumber,
) -> Result<Vec<GridDisagreement>, SourceAreaError> {
    let mut reference: Option<((Site, GridLetter), BTreeMap<NaiveDateTime, f64>)> = None;
    let mut disagreements = Vec::new();

    for &(site, letter) in sites_for_grid(grid, GridTable::StashCodes) {
        let found = find_ukv_files(&FileRequest {
            root: search.root.clone(),
            start: search.start,
            stop: search.stop,
            site,
            model: ModelName::Ukv,
            run: search.run,
            variable: search.variable,
        })?;
        if found.files.is_empty() {
            continue;
        }

        let stash_files = order_model_stashes(&found.files, search.variable)?;
        let request = ExtractRequest {
            variable: search.variable,
            model: ModelName::Ukv,
            site,
            target_height: search.target_height,
            grid_choice: letter,
            hours_before_repeat: search.hours_before_repeat,
        };
        let (times, values) = extract_model_data(reader, &stash_files, &request)?.flatten();
        let series: BTreeMap<NaiveDateTime, f64> = times.into_iter().zip(values).collect();

        if reference.is_none() {
            info!("Grid {} reference: {} {}", grid, site, letter);
            reference = Some(((site, letter), series));
            continue;
        }
        let Some((first, first_series)) = &reference else {
            continue;
        };

        let mut compared = 0;
        for (time, value) in &series {
            let Some(expected) = first_series.get(time) else {
                continue;
            };
            compared += 1;
            let scale = expected.abs().max(value.abs()).max(f64::MIN_POSITIVE);
            if (expected - value).abs() / scale > GRID_VALUE_TOLERANCE {
                disagreements.push(GridDisagreement {
                    grid,
                    reference: *first,
                    other: (site, letter),
                    time: *time,
                    reference_value: *expected,
                    value: *value,
                });
            }
        }
        info!(
            "Grid {}: compared {} {} with {} {} at {} times",
            grid, site, letter, first.0, first.1, compared
        );
    }

    if reference.is_none() {
        warn!("No model files for grid {}", grid);
    }
    for d in &disagreements {
        warn!(
            "Grid {} at {}: {} {} has {} but {} {} has {}",
            d.grid, d.time, d.other.0, d.other.1, d.value, d.reference.0, d.reference.1,
            d.reference_value
        );
    }
    Ok(disagreements)
}

/// Footprint weighted average of the grid series.
///
/// For each hour, grids are weighted by `percentage / 100`. Hours where any
/// grid in use lacks a value are left out.
pub fn average_model_grids(
    included: &BTreeMap<GridNumber, ModelSeries>,
    percentages: &GridPercentages,
) -> BTreeMap<NaiveDateTime, f64> {
    let lookup: BTreeMap<GridNumber, BTreeMap<NaiveDateTime, f64>> = included
        .iter()
        .map(|(grid, series)| {
            let (times, values) = series.flatten();
            (*grid, times.into_iter().zip(values).collect())
        })
        .collect();

    let mut averaged = BTreeMap::new();
    for (hour, grids) in percentages.iter() {
        let weighted: Option<f64> = grids
            .iter()
            .map(|(grid, percentage)| {
                lookup
                    .get(grid)
                    .and_then(|values| values.get(hour))
                    .map(|v| v * percentage / 100.0)
            })
            .sum();
        match weighted {
            Some(v) if !grids.is_empty() => {
                averaged.insert(*hour, v);
            }
            _ => warn!("Not every grid has a value at {}", hour),
        }
    }
    averaged
}
