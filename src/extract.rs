//! Pull a site time series out of premade model files.
//!
//! Each day's file is read, its time axis checked and windowed past spin-up,
//! and the chosen 3x3 cell read at the model level nearest the target
//! height. Files that fail any check are listed as dodgy and skipped.

use crate::alignment::{
    check_consecutive, find_duplicate_times, reconcile_pair, round_run_times, spin_up_offset,
    window, AlignmentError,
};
use crate::data_io::reader::{ModelFile, ModelReader};
use crate::grid::{cell_value, grid_mean, GridLetter};
use crate::lookup::{HeightSource, ModelName, Site, Variable};
use crate::model_files::{parse_file_date, StashFiles};
use crate::time_utils::DayKey;
use chrono::{Duration, NaiveDateTime};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Height used when no observation height is known.
pub const DEFAULT_TARGET_HEIGHT: f64 = 10.0;

/// Number of notional levels given to surface fields.
const SURFACE_LEVELS: usize = 70;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    #[error("{variable} needs {expected} stash file sets, got {found}")]
    StashCount {
        variable: Variable,
        expected: usize,
        found: usize,
    },

    #[error("Wind has its own extraction")]
    WindVariable,

    #[error("{0} is not wind")]
    NotWind(Variable),
}

/// Why a file was skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum DodgyReason {
    Unreadable(String),
    BadFileName,
    MissingHeights,
    BadTimes(String),
    Alignment(AlignmentError),
    LevelMismatch,
    FieldShape,
}

impl fmt::Display for DodgyReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DodgyReason::Unreadable(e) => write!(f, "unreadable: {}", e),
            DodgyReason::BadFileName => write!(f, "run date not in file name"),
            DodgyReason::MissingHeights => write!(f, "no level_height"),
            DodgyReason::BadTimes(e) => write!(f, "time array not as expected: {}", e),
            DodgyReason::Alignment(e) => write!(f, "{}", e),
            DodgyReason::LevelMismatch => write!(f, "level heights differ between stash files"),
            DodgyReason::FieldShape => write!(f, "field does not cover the 3x3 grid"),
        }
    }
}

impl From<AlignmentError> for DodgyReason {
    fn from(e: AlignmentError) -> Self {
        DodgyReason::Alignment(e)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DodgyFile {
    pub path: PathBuf,
    pub reason: DodgyReason,
}

/// What to extract.
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub variable: Variable,
    pub model: ModelName,
    pub site: Site,
    pub target_height: Option<f64>,
    pub grid_choice: GridLetter,
    pub hours_before_repeat: usize,
}

impl ExtractRequest {
    pub fn new(variable: Variable, model: ModelName, site: Site) -> Self {
        Self {
            variable,
            model,
            site,
            target_height: None,
            grid_choice: GridLetter::default(),
            hours_before_repeat: 24,
        }
    }

    pub fn target(&self) -> f64 {
        self.target_height.unwrap_or(DEFAULT_TARGET_HEIGHT)
    }
}

/// Nearest model level and its neighbours, clamped to the valid levels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelChoice {
    pub index: usize,
    pub below: usize,
    pub above: usize,
    pub height: f64,
    pub height_below: f64,
    pub height_above: f64,
}

/// One day of a scalar variable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DaySeries {
    pub times: Vec<NaiveDateTime>,
    pub values: Vec<f64>,
    /// 3x3 mean from the end of spin-up to the end of the file, so it runs
    /// past `times` for 37 hour runs.
    pub mean_3x3: Vec<f64>,
    pub values_below: Vec<f64>,
    pub values_above: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct ModelSeries {
    pub variable: Variable,
    pub model: ModelName,
    pub site: Site,
    pub level: Option<LevelChoice>,
    pub days: BTreeMap<DayKey, DaySeries>,
    pub dodgy_files: Vec<DodgyFile>,
    pub duplicate_times: Vec<NaiveDateTime>,
}

impl ModelSeries {
    fn empty(request: &ExtractRequest) -> Self {
        Self {
            variable: request.variable,
            model: request.model,
            site: request.site,
            level: None,
            days: BTreeMap::new(),
            dodgy_files: Vec::new(),
            duplicate_times: Vec::new(),
        }
    }

    /// All days joined in day order.
    pub fn flatten(&self) -> (Vec<NaiveDateTime>, Vec<f64>) {
        let mut times = Vec::new();
        let mut values = Vec::new();
        for day in self.days.values() {
            times.extend_from_slice(&day.times);
            values.extend_from_slice(&day.values);
        }
        (times, values)
    }

    /// Move every time by `offset`.
    pub fn shift_times(&mut self, offset: Duration) {
        for day in self.days.values_mut() {
            for t in day.times.iter_mut() {
                *t += offset;
            }
        }
    }

    /// Add the days of another extraction. Days already present are kept.
    pub fn merge(&mut self, other: ModelSeries) {
        if self.level.is_none() {
            self.level = other.level;
        }
        for (key, day) in other.days {
            self.days.entry(key).or_insert(day);
        }
        self.dodgy_files.extend(other.dodgy_files);
        self.duplicate_times = find_duplicate_times(self.days.values().map(|d| d.times.as_slice()));
    }
}

/// One day of wind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindDay {
    pub times: Vec<NaiveDateTime>,
    pub speed: Vec<f64>,
    pub direction: Vec<f64>,
    /// Speed and direction of the 3x3 mean components.
    pub speed_3x3: Vec<f64>,
    pub direction_3x3: Vec<f64>,
    pub speed_below: Vec<f64>,
    pub direction_below: Vec<f64>,
    pub speed_above: Vec<f64>,
    pub direction_above: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct WindSeries {
    pub model: ModelName,
    pub site: Site,
    pub level: Option<LevelChoice>,
    pub days: BTreeMap<DayKey, WindDay>,
    pub dodgy_files: Vec<DodgyFile>,
    pub duplicate_times: Vec<NaiveDateTime>,
}

impl WindSeries {
    pub fn flatten_speed(&self) -> (Vec<NaiveDateTime>, Vec<f64>) {
        self.flatten_with(|d| &d.speed)
    }

    pub fn flatten_direction(&self) -> (Vec<NaiveDateTime>, Vec<f64>) {
        self.flatten_with(|d| &d.direction)
    }

    fn flatten_with(&self, pick: impl Fn(&WindDay) -> &Vec<f64>) -> (Vec<NaiveDateTime>, Vec<f64>) {
        let mut times = Vec::new();
        let mut values = Vec::new();
        for day in self.days.values() {
            times.extend_from_slice(&day.times);
            values.extend_from_slice(pick(day));
        }
        (times, values)
    }
}

pub fn find_altitude(site: Site, model: ModelName) -> f64 {
    site.altitude(model)
}

/// Heights of the model levels above sea level for this variable.
pub fn model_heights(file: &ModelFile, variable: Variable, altitude: f64) -> Option<Vec<f64>> {
    match variable.height_source() {
        HeightSource::LevelsAboveAltitude => file
            .level_height
            .as_ref()
            .map(|h| h.iter().map(|z| z + altitude).collect()),
        HeightSource::Levels => file.level_height.clone(),
        HeightSource::Surface => Some(vec![altitude; SURFACE_LEVELS]),
    }
}

/// Closest level to `target`; ties go to the lowest index.
pub fn nearest_level(heights: &[f64], target: f64) -> Option<LevelChoice> {
    let mut best: Option<(usize, f64)> = None;
    for (i, h) in heights.iter().enumerate() {
        let d = (h - target).abs();
        if best.map_or(true, |(_, bd)| d < bd) {
            best = Some((i, d));
        }
    }
    let (index, _) = best?;
    let below = index.saturating_sub(1);
    let above = (index + 1).min(heights.len() - 1);
    Some(LevelChoice {
        index,
        below,
        above,
        height: heights[index],
        height_below: heights[below],
        height_above: heights[above],
    })
}

/// Meteorological wind direction in degrees, the direction the wind blows from.
pub fn wind_direction(u: f64, v: f64) -> f64 {
    let mut dir = u.atan2(v).to_degrees() + 180.0;
    if dir < 0.0 {
        dir += 360.0;
    }
    if dir > 360.0 {
        dir -= 360.0;
    }
    dir
}

pub fn wind_speed(u: f64, v: f64) -> f64 {
    (u * u + v * v).sqrt()
}

/// Relative humidity (%) from temperature (°C), pressure (hPa) and specific
/// humidity (kg/kg).
pub fn relative_humidity_from_q(t_c: f64, p_hpa: f64, q: f64) -> f64 {
    let e = q * p_hpa / (0.622 + 0.378 * q);
    let es = 6.112 * (17.67 * t_c / (t_c + 243.5)).exp();
    100.0 * e / es
}

/// Raw per-stash values for one day before they are combined.
struct DayRaw {
    times: Vec<NaiveDateTime>,
    level: LevelChoice,
    centre: Vec<Vec<f64>>,
    mean: Vec<Vec<f64>>,
    below: Vec<Vec<f64>>,
    above: Vec<Vec<f64>>,
}

/// Checked and windowed time axis of one file.
fn file_window(
    file: &ModelFile,
    hours_before_repeat: usize,
) -> Result<(Vec<NaiveDateTime>, Range<usize>), DodgyReason> {
    let run_times = file
        .run_times()
        .map_err(|e| DodgyReason::BadTimes(e.to_string()))?;
    let run_times = round_run_times(&run_times)?;
    let file_date = parse_file_date(&file.path).map_err(|_| DodgyReason::BadFileName)?;
    let offset = spin_up_offset(run_times[0], file_date)?;
    let range = window(run_times.len(), offset, hours_before_repeat);
    let times = run_times[range.clone()].to_vec();
    check_consecutive(&times)?;
    Ok((times, range))
}

fn column(
    file: &ModelFile,
    letter: GridLetter,
    steps: impl Iterator<Item = usize>,
    level: Option<usize>,
) -> Result<Vec<f64>, DodgyReason> {
    steps
        .map(|t| {
            cell_value(&file.field.data, letter, t, level)
                .map(f64::from)
                .ok_or(DodgyReason::FieldShape)
        })
        .collect()
}

fn read_day(
    reader: &dyn ModelReader,
    paths: &[&Path],
    request: &ExtractRequest,
) -> Result<DayRaw, DodgyFile> {
    let dodgy = |path: &Path, reason: DodgyReason| DodgyFile {
        path: path.to_path_buf(),
        reason,
    };
    let altitude = find_altitude(request.site, request.model);
    let field_names = request.variable.field_names();

    let mut files = Vec::with_capacity(paths.len());
    for (&path, names) in paths.iter().zip(field_names.iter()) {
        let file = reader
            .read(path, names)
            .map_err(|e| dodgy(path, DodgyReason::Unreadable(e.to_string())))?;
        files.push(file);
    }

    let first = &files[0];
    let heights = model_heights(first, request.variable, altitude)
        .ok_or_else(|| dodgy(&first.path, DodgyReason::MissingHeights))?;
    for other in &files[1..] {
        if let (Some(a), Some(b)) = (&first.level_height, &other.level_height) {
            if a != b {
                return Err(dodgy(&other.path, DodgyReason::LevelMismatch));
            }
        }
    }
    let level = nearest_level(&heights, request.target())
        .ok_or_else(|| dodgy(&first.path, DodgyReason::MissingHeights))?;

    let mut windows = Vec::with_capacity(files.len());
    for file in &files {
        let w = file_window(file, request.hours_before_repeat)
            .map_err(|reason| dodgy(&file.path, reason))?;
        windows.push(w);
    }

    let mut len = windows[0].0.len();
    for (file, (times, _)) in files.iter().zip(&windows).skip(1) {
        len = len.min(
            reconcile_pair(&windows[0].0, times)
                .map_err(|e| dodgy(&file.path, DodgyReason::Alignment(e)))?,
        );
    }
    let times = windows[0].0[..len].to_vec();

    let mut raw = DayRaw {
        times,
        level,
        centre: Vec::new(),
        mean: Vec::new(),
        below: Vec::new(),
        above: Vec::new(),
    };
    for (file, (_, range)) in files.iter().zip(&windows) {
        let levels = file.field.has_levels();
        let pick = |k: usize| levels.then_some(k);
        let steps = || range.start..range.start + len;
        let letter = request.grid_choice;

        let centre = column(file, letter, steps(), pick(level.index));
        let below = column(file, letter, steps(), pick(level.below));
        let above = column(file, letter, steps(), pick(level.above));
        let mean: Option<Vec<f64>> = (range.start..file.field.time_len())
            .map(|t| grid_mean(&file.field.data, t, pick(level.index)).map(f64::from))
            .collect();

        match (centre, below, above, mean) {
            (Ok(c), Ok(b), Ok(a), Some(m)) => {
                raw.centre.push(c);
                raw.below.push(b);
                raw.above.push(a);
                raw.mean.push(m);
            }
            _ => return Err(dodgy(&file.path, DodgyReason::FieldShape)),
        }
    }

    Ok(raw)
}

/// Combine the per-stash raw values at one step into the variable's value.
fn combine(variable: Variable, raw: &[f64]) -> f64 {
    match variable {
        Variable::Kup => raw[0] - raw[1],
        Variable::RH_q => relative_humidity_from_q(
            Variable::Tair.convert(raw[0]),
            Variable::Press.convert(raw[1]),
            raw[2],
        ),
        _ => variable.convert(raw[0]),
    }
}

fn combine_columns(variable: Variable, columns: &[Vec<f64>]) -> Vec<f64> {
    let len = columns.iter().map(Vec::len).min().unwrap_or(0);
    (0..len)
        .map(|i| {
            let step: Vec<f64> = columns.iter().map(|c| c[i]).collect();
            combine(variable, &step)
        })
        .collect()
}

fn check_stash_count(variable: Variable, files: &StashFiles) -> Result<(), ExtractError> {
    let expected = variable.stash_codes().len();
    if files.len() != expected {
        return Err(ExtractError::StashCount {
            variable,
            expected,
            found: files.len(),
        });
    }
    Ok(())
}

/// Paths of every stash file for each day present in all maps.
fn day_paths(files: &StashFiles) -> Vec<(DayKey, Vec<&Path>)> {
    let Some(first) = files.first() else {
        return Vec::new();
    };
    first
        .keys()
        .filter_map(|key| {
            let paths: Option<Vec<&Path>> =
                files.iter().map(|m| m.get(key).map(PathBuf::as_path)).collect();
            paths.map(|p| (*key, p))
        })
        .collect()
}

fn report(dodgy: &[DodgyFile], duplicates: &[NaiveDateTime]) {
    info!("Number of dodgy model files: {}", dodgy.len());
    for file in dodgy {
        warn!("Dodgy file {}: {}", file.path.display(), file.reason);
    }
    if duplicates.is_empty() {
        info!("No duplicate times");
    } else {
        warn!("{} duplicate times: {:?}", duplicates.len(), duplicates);
    }
}

/// Extract a scalar variable for every day in `files`.
pub fn extract_model_data(
    reader: &dyn ModelReader,
    files: &StashFiles,
    request: &ExtractRequest,
) -> Result<ModelSeries, ExtractError> {
    if request.variable == Variable::Wind {
        return Err(ExtractError::WindVariable);
    }
    check_stash_count(request.variable, files)?;

    info!("Sorting model: {} {} {}", request.model, request.variable, request.site);
    let mut series = ModelSeries::empty(request);

    for (key, paths) in day_paths(files) {
        let raw = match read_day(reader, &paths, request) {
            Ok(raw) => raw,
            Err(dodgy) => {
                series.dodgy_files.push(dodgy);
                continue;
            }
        };
        if raw.times.is_empty() {
            warn!("There was a time list which has length 0: {}", key);
            continue;
        }
        if series.level.is_none() {
            series.level = Some(raw.level);
        }

        let variable = request.variable;
        series.days.insert(
            key,
            DaySeries {
                times: raw.times,
                values: combine_columns(variable, &raw.centre),
                mean_3x3: combine_columns(variable, &raw.mean),
                values_below: combine_columns(variable, &raw.below),
                values_above: combine_columns(variable, &raw.above),
            },
        );
    }

    series.duplicate_times =
        find_duplicate_times(series.days.values().map(|d| d.times.as_slice()));
    report(&series.dodgy_files, &series.duplicate_times);
    Ok(series)
}

fn speed_and_direction(u: &[f64], v: &[f64]) -> (Vec<f64>, Vec<f64>) {
    u.iter()
        .zip(v)
        .map(|(&u, &v)| (wind_speed(u, v), wind_direction(u, v)))
        .unzip()
}

/// Extract wind speed and direction from the u and v files.
pub fn extract_model_data_wind(
    reader: &dyn ModelReader,
    files: &StashFiles,
    request: &ExtractRequest,
) -> Result<WindSeries, ExtractError> {
    if request.variable != Variable::Wind {
        return Err(ExtractError::NotWind(request.variable));
    }
    check_stash_count(request.variable, files)?;

    info!("Sorting model wind: {} {}", request.model, request.site);
    let mut series = WindSeries {
        model: request.model,
        site: request.site,
        level: None,
        days: BTreeMap::new(),
        dodgy_files: Vec::new(),
        duplicate_times: Vec::new(),
    };

    for (key, paths) in day_paths(files) {
        let raw = match read_day(reader, &paths, request) {
            Ok(raw) => raw,
            Err(dodgy) => {
                series.dodgy_files.push(dodgy);
                continue;
            }
        };
        if raw.times.is_empty() {
            warn!("There was a time list which has length 0: {}", key);
            continue;
        }
        if series.level.is_none() {
            series.level = Some(raw.level);
        }

        let (speed, direction) = speed_and_direction(&raw.centre[0], &raw.centre[1]);
        let (speed_3x3, direction_3x3) = speed_and_direction(&raw.mean[0], &raw.mean[1]);
        let (speed_below, direction_below) = speed_and_direction(&raw.below[0], &raw.below[1]);
        let (speed_above, direction_above) = speed_and_direction(&raw.above[0], &raw.above[1]);

        series.days.insert(
            key,
            WindDay {
                times: raw.times,
                speed,
                direction,
                speed_3x3,
                direction_3x3,
                speed_below,
                direction_below,
                speed_above,
                direction_above,
            },
        );
    }

    series.duplicate_times =
        find_duplicate_times(series.days.values().map(|d| d.times.as_slice()));
    report(&series.dodgy_files, &series.duplicate_times);
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_level_clamps() {
        let heights = [5.0, 15.0, 40.0, 100.0];
        let lowest = nearest_level(&heights, 0.0).unwrap();
        assert_eq!((lowest.index, lowest.below, lowest.above), (0, 0, 1));
        let top = nearest_level(&heights, 500.0).unwrap();
        assert_eq!((top.index, top.below, top.above), (3, 2, 3));
        let mid = nearest_level(&heights, 38.0).unwrap();
        assert_eq!(mid.height, 40.0);
        assert_eq!(mid.height_below, 15.0);
        assert!(nearest_level(&[], 10.0).is_none());
    }

    #[test]
    fn test_surface_levels_pick_first() {
        let heights = vec![25.5; SURFACE_LEVELS];
        let level = nearest_level(&heights, 10.0).unwrap();
        assert_eq!(level.index, 0);
        assert_eq!(level.height, 25.5);
    }

    #[test]
    fn test_wind_direction() {
        // wind from the south blows northward
        assert!((wind_direction(0.0, 1.0) - 180.0).abs() < 1e-9);
        // wind from the west blows eastward
        assert!((wind_direction(1.0, 0.0) - 270.0).abs() < 1e-9);
        assert!((wind_direction(0.0, -1.0) - 360.0).abs() < 1e-9);
        assert!((wind_direction(-1.0, 0.0) - 90.0).abs() < 1e-9);
        assert!((wind_speed(3.0, 4.0) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_relative_humidity_from_q() {
        // saturated air at 20 C and 1000 hPa holds about 14.7 g/kg
        let rh = relative_humidity_from_q(20.0, 1000.0, 0.01469);
        assert!((rh - 100.0).abs() < 1.0, "rh = {}", rh);
        assert!(relative_humidity_from_q(20.0, 1000.0, 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_combine() {
        assert!((combine(Variable::Tair, &[273.15]) - 0.0).abs() < 1e-9);
        assert_eq!(combine(Variable::Kup, &[500.0, 420.0]), 80.0);
    }
}
