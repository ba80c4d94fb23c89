//! Locating premade model files on disk.
//!
//! Files live under `<root>/<year>/London/L2/MetOffice/DAY/<DOY>/` and are
//! named `<prefix><YYYYMMDD><run>_<stash>_<site code>.nc`.

use crate::lookup::{ModelName, Run, Site, Variable};
use crate::time_utils::{doy_range, DayKey, DoyDate, TimeError};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ModelFilesError {
    #[error("Time error: {0}")]
    Time(#[from] TimeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a model file name: {0}")]
    BadFileName(String),

    #[error("No day has every stash file for {variable} ({found} days have some)")]
    StashKeyMismatch { variable: Variable, found: usize },
}

/// What to look for.
#[derive(Debug, Clone)]
pub struct FileRequest {
    pub root: PathBuf,
    pub start: DoyDate,
    pub stop: DoyDate,
    pub site: Site,
    pub model: ModelName,
    pub run: Run,
    pub variable: Variable,
}

/// Result of a search: existing files grouped by day plus everything missing.
#[derive(Debug, Clone, Default)]
pub struct FileSearch {
    pub files: BTreeMap<DayKey, Vec<PathBuf>>,
    pub missing_years: Vec<i32>,
    pub missing_days: Vec<DoyDate>,
    pub missing_files: Vec<PathBuf>,
}

impl FileSearch {
    pub fn file_count(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }
}

/// One map per stash code, in the variable's stash order.
pub type StashFiles = Vec<BTreeMap<DayKey, PathBuf>>;

/// Components of a model file name.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFileName {
    pub model: ModelName,
    pub date: NaiveDate,
    pub run: Run,
    pub stash: String,
    pub site: Site,
}

pub fn model_file_name(
    model: ModelName,
    date: NaiveDate,
    run: Run,
    stash: &str,
    site: Site,
) -> String {
    format!(
        "{}{}{}_{}_{}.nc",
        model.file_prefix(),
        date.format("%Y%m%d"),
        run,
        stash,
        site.file_code()
    )
}

pub fn year_directory(root: &Path, year: i32) -> PathBuf {
    root.join(year.to_string())
        .join("London")
        .join("L2")
        .join("MetOffice")
        .join("DAY")
}

pub fn day_directory(root: &Path, date: DoyDate) -> PathBuf {
    year_directory(root, date.year).join(date.doy_string())
}

/// Split a model file name into its parts.
pub fn parse_file_name(path: &Path) -> Result<ModelFileName, ModelFilesError> {
    let bad = || ModelFilesError::BadFileName(path.display().to_string());

    let name = path.file_name().and_then(|n| n.to_str()).ok_or_else(bad)?;
    let stem = name.strip_suffix(".nc").ok_or_else(bad)?;

    let model = [ModelName::Ukv, ModelName::Lon, ModelName::Mor]
        .into_iter()
        .find(|m| stem.starts_with(m.file_prefix()))
        .ok_or_else(bad)?;
    let rest = &stem[model.file_prefix().len()..];

    let mut parts = rest.splitn(3, '_');
    let date_run = parts.next().ok_or_else(bad)?;
    let stash = parts.next().ok_or_else(bad)?;
    let site_code = parts.next().ok_or_else(bad)?;

    if date_run.len() != 11 || !date_run.is_char_boundary(8) {
        return Err(bad());
    }
    let date = NaiveDate::parse_from_str(&date_run[..8], "%Y%m%d").map_err(|_| bad())?;
    let run: Run = date_run[8..].parse().map_err(|_| bad())?;
    let site = Site::from_file_code(site_code).ok_or_else(bad)?;

    Ok(ModelFileName {
        model,
        date,
        run,
        stash: stash.to_string(),
        site,
    })
}

/// Run date recorded in a model file name.
pub fn parse_file_date(path: &Path) -> Result<NaiveDate, ModelFilesError> {
    Ok(parse_file_name(path)?.date)
}

/// Build the expected file paths for a day range and keep the ones that exist.
pub fn find_ukv_files(request: &FileRequest) -> Result<FileSearch, ModelFilesError> {
    let days_by_year = doy_range(request.start, request.stop)?;
    let mut search = FileSearch::default();

    for (year, wanted) in &days_by_year {
        let year_dir = year_directory(&request.root, *year);
        let available: BTreeSet<String> = match std::fs::read_dir(&year_dir) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .filter_map(|e| e.file_name().to_str().map(str::to_string))
                .collect(),
            Err(e) => {
                warn!("No model directory for {}: {} ({})", year, year_dir.display(), e);
                search.missing_years.push(*year);
                search.missing_days.extend(wanted.iter().copied());
                continue;
            }
        };

        let mut found_days = Vec::new();
        for day in wanted {
            if available.contains(&day.doy_string()) {
                found_days.push(*day);
            } else {
                search.missing_days.push(*day);
            }
        }

        if found_days.len() == wanted.len() {
            info!("All model DOYs found for {}", year);
        } else {
            warn!(
                "{} of {} model DOYs missing for {}",
                wanted.len() - found_days.len(),
                wanted.len(),
                year
            );
        }

        for day in found_days {
            let dir = day_directory(&request.root, day);
            for stash in request.variable.stash_codes() {
                let path = dir.join(model_file_name(
                    request.model,
                    day.to_date(),
                    request.run,
                    stash,
                    request.site,
                ));
                if path.exists() {
                    search
                        .files
                        .entry(DayKey::new(request.model, day))
                        .or_default()
                        .push(path);
                } else {
                    debug!("Missing model file {}", path.display());
                    search.missing_files.push(path);
                }
            }
        }
    }

    if search.missing_files.is_empty() {
        info!(
            "All {} files exist from {} DOYs",
            search.file_count(),
            search.files.len()
        );
    } else {
        warn!(
            "{} out of {} files found",
            search.file_count(),
            search.file_count() + search.missing_files.len()
        );
    }
    if search.files.is_empty() {
        warn!("No files for: {} {}", request.model, request.site);
    }

    Ok(search)
}

/// Split grouped paths into one map per stash code.
///
/// Multi-stash variables only keep days where every stash file exists.
pub fn order_model_stashes(
    files: &BTreeMap<DayKey, Vec<PathBuf>>,
    variable: Variable,
) -> Result<StashFiles, ModelFilesError> {
    let mut ordered: StashFiles = variable
        .stash_codes()
        .iter()
        .map(|stash| {
            files
                .iter()
                .filter_map(|(key, paths)| {
                    paths
                        .iter()
                        .find(|p| {
                            parse_file_name(p)
                                .map(|n| n.stash == *stash)
                                .unwrap_or(false)
                        })
                        .map(|p| (*key, p.clone()))
                })
                .collect()
        })
        .collect();

    if ordered.len() > 1 {
        let found = ordered.iter().map(BTreeMap::len).max().unwrap_or(0);
        let mut common: BTreeSet<DayKey> = ordered[0].keys().copied().collect();
        for map in &ordered[1..] {
            common.retain(|k| map.contains_key(k));
        }
        for map in ordered.iter_mut() {
            let before = map.len();
            map.retain(|k, _| common.contains(k));
            if map.len() != before {
                debug!(
                    "Dropped {} days without every stash file for {}",
                    before - map.len(),
                    variable
                );
            }
        }
        if common.is_empty() && found > 0 {
            return Err(ModelFilesError::StashKeyMismatch { variable, found });
        }
    }

    Ok(ordered)
}
