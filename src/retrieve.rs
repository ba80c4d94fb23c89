//! Full UKV retrieval for one evaluation run.

use crate::config::Config;
use crate::data_io::{Frame, ModelReader};
use crate::error::{EvalError, Result};
use crate::extract::{
    extract_model_data, extract_model_data_wind, DodgyFile, ExtractRequest, ModelSeries,
    WindSeries,
};
use crate::grid::{grid_for_site, GridLetter, GridTable};
use crate::lookup::{LookupError, Site, Variable};
use crate::model_files::{find_ukv_files, order_model_stashes, FileRequest, StashFiles};
use crate::source_area::{
    average_model_grids, determine_which_model_files, find_source_area, retrieve_sa_hours,
    GridPercentages, GridSearch,
};
use crate::time_utils::{model_doy_range, DoyDate};
use chrono::{Duration, NaiveDateTime};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Target height for the boundary layer heat flux.
pub const BL_H_TARGET_HEIGHT: f64 = 70.0;

/// Model shortwave is a 15 minute average labelled at its start.
pub const KDOWN_SHIFT_MINUTES: i64 = 15;

pub const WEIGHTED_AVERAGE: &str = "WAverage";
pub const WEIGHTED_AVERAGE_ALL_GRIDS: &str = "WAverage_all_grids";

/// Output folder and instrument family for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSetup {
    pub save_folder: PathBuf,
    pub instrument: &'static str,
}

/// Create `<plots>/<start>_<stop>_<variable>_<site>_<path>/`.
pub fn setup_run(config: &Config) -> Result<RunSetup> {
    let save_folder = config.plots_root.join(format!(
        "{}_{}_{}_{}_{}",
        config.start, config.stop, config.variable, config.site, config.path_id
    ));
    std::fs::create_dir_all(&save_folder)?;
    info!("Saving to {}", save_folder.display());

    Ok(RunSetup {
        save_folder,
        instrument: config.instrument.family(),
    })
}

/// Roughness length options for a site, in metres.
pub fn ukv_z0_zd(site: Site) -> std::result::Result<BTreeMap<&'static str, f64>, LookupError> {
    let (z0, zd) = site.obs_roughness().ok_or(LookupError::NoRoughness(site))?;
    Ok(BTreeMap::from([
        ("z0_1_tile", 1.0),
        ("z0_MORUSES", 0.8),
        ("z0_obs", z0),
        ("zd_obs", zd),
        ("z0_zd_obs", z0 + zd),
    ]))
}

/// Everything retrieved from the model for one run.
#[derive(Debug, Clone)]
pub struct UkvRetrieval {
    pub variable: Variable,
    pub site: Site,
    /// Per grid series keyed by grid number, or `<site>_<letter>` for cells
    /// off the numbered grid.
    pub grids: BTreeMap<String, ModelSeries>,
    pub weighted_average: Option<BTreeMap<NaiveDateTime, f64>>,
    pub weighted_average_all_grids: Option<BTreeMap<NaiveDateTime, f64>>,
    pub percentage_covered: Option<BTreeMap<NaiveDateTime, f64>>,
    /// Boundary layer heat flux, keyed `BL_H_<grid>`.
    pub bl_h: Option<(String, ModelSeries)>,
    /// Height of the level the boundary layer flux was taken from.
    pub bl_h_z: Option<f64>,
    pub wind: Option<WindSeries>,
}

impl UkvRetrieval {
    fn new(variable: Variable, site: Site) -> Self {
        Self {
            variable,
            site,
            grids: BTreeMap::new(),
            weighted_average: None,
            weighted_average_all_grids: None,
            percentage_covered: None,
            bl_h: None,
            bl_h_z: None,
            wind: None,
        }
    }

    /// One column per series, outer joined on time.
    pub fn to_frame(&self) -> Frame {
        let mut frame = Frame::new("datetime");
        for (key, series) in &self.grids {
            let (times, values) = series.flatten();
            frame.add_series(key, &times, &values);
        }
        if let Some(average) = &self.weighted_average {
            frame.add_column(WEIGHTED_AVERAGE, average);
        }
        if let Some(average) = &self.weighted_average_all_grids {
            frame.add_column(WEIGHTED_AVERAGE_ALL_GRIDS, average);
        }
        if let Some((key, series)) = &self.bl_h {
            let (times, values) = series.flatten();
            frame.add_series(key, &times, &values);
        }
        if let Some(wind) = &self.wind {
            let (times, speed) = wind.flatten_speed();
            frame.add_series("wind_speed", &times, &speed);
            let (times, direction) = wind.flatten_direction();
            frame.add_series("wind_direction", &times, &direction);
        }
        frame
    }

    pub fn dodgy_files(&self) -> Vec<DodgyFile> {
        let mut files: Vec<DodgyFile> = self
            .grids
            .values()
            .flat_map(|s| s.dodgy_files.iter().cloned())
            .collect();
        if let Some((_, series)) = &self.bl_h {
            files.extend(series.dodgy_files.iter().cloned());
        }
        if let Some(wind) = &self.wind {
            files.extend(wind.dodgy_files.iter().cloned());
        }
        files
    }
}

/// Column key for a site's cell.
pub fn grid_key(site: Site, letter: GridLetter) -> String {
    match grid_for_site(site, letter, GridTable::StashCodes) {
        Some(n) => n.to_string(),
        None => format!("{}_{}", site, letter),
    }
}

/// Model day range for the run's observation days.
fn model_range(config: &Config) -> (DoyDate, DoyDate) {
    model_doy_range(config.start, config.stop, config.run)
}

fn site_request(
    config: &Config,
    variable: Variable,
    letter: GridLetter,
    target_height: Option<f64>,
) -> ExtractRequest {
    ExtractRequest {
        variable,
        model: config.model,
        site: config.site,
        target_height,
        grid_choice: letter,
        hours_before_repeat: config.hours_before_repeat,
    }
}

fn site_files(config: &Config, variable: Variable) -> Result<StashFiles> {
    let (start, stop) = model_range(config);
    let search = find_ukv_files(&FileRequest {
        root: config.model_root.clone(),
        start,
        stop,
        site: config.site,
        model: config.model,
        run: config.run,
        variable,
    })?;
    Ok(order_model_stashes(&search.files, variable)?)
}

/// Find, order and extract one variable at the configured site.
pub fn extract_site_series(
    reader: &dyn ModelReader,
    config: &Config,
    variable: Variable,
    letter: GridLetter,
    target_height: Option<f64>,
) -> Result<ModelSeries> {
    let files = site_files(config, variable)?;
    let request = site_request(config, variable, letter, target_height);
    Ok(extract_model_data(reader, &files, &request)?)
}

/// Find, order and extract wind at the configured site.
pub fn extract_site_wind(reader: &dyn ModelReader, config: &Config) -> Result<WindSeries> {
    let files = site_files(config, Variable::Wind)?;
    let request = site_request(config, Variable::Wind, config.grid_choice, config.target_height);
    Ok(extract_model_data_wind(reader, &files, &request)?)
}

fn shift_keys(values: BTreeMap<NaiveDateTime, f64>, offset: Duration) -> BTreeMap<NaiveDateTime, f64> {
    values.into_iter().map(|(t, v)| (t + offset, v)).collect()
}

/// Percentages restricted to hours that have a source area raster.
fn percentages_with_rasters(config: &Config, path: &Path) -> Result<GridPercentages> {
    let percentages = GridPercentages::from_csv(path)?;

    let hours: Vec<NaiveDateTime> = if config.start == config.stop {
        retrieve_sa_hours(&config.sa_root, config.start)?
    } else {
        let wanted: Vec<NaiveDateTime> = percentages.hours().copied().collect();
        let rasters = find_source_area(&wanted, &config.sa_root, &config.sa_name_start);
        wanted
            .into_iter()
            .zip(rasters)
            .filter(|(_, raster)| raster.exists())
            .map(|(hour, _)| hour)
            .collect()
    };

    let kept = percentages.restrict_to(&hours);
    let dropped = percentages.hours().count() - kept.hours().count();
    if dropped > 0 {
        warn!("{} hours in {} have no source area raster", dropped, path.display());
    }
    if kept.is_empty() {
        return Err(EvalError::NoData(format!(
            "no source area hours in {}",
            path.display()
        )));
    }
    Ok(kept)
}

/// Where to look for grid files over the configured model days.
pub fn grid_search(config: &Config) -> GridSearch {
    let (start, stop) = model_range(config);
    GridSearch {
        root: config.model_root.clone(),
        start,
        stop,
        run: config.run,
        variable: config.variable,
        target_height: config.target_height,
        hours_before_repeat: config.hours_before_repeat,
    }
}

/// Per grid series and their weighted average for one percentages file.
fn source_area_grids(
    reader: &dyn ModelReader,
    config: &Config,
    percentages: &GridPercentages,
) -> Result<(BTreeMap<String, ModelSeries>, BTreeMap<NaiveDateTime, f64>)> {
    let included = determine_which_model_files(reader, percentages, &grid_search(config))?;
    let average = average_model_grids(&included, percentages);
    let grids = included
        .into_iter()
        .map(|(grid, series)| (grid.to_string(), series))
        .collect();
    Ok((grids, average))
}

/// Retrieve the configured variable from the UKV.
pub fn retrieve_ukv(reader: &dyn ModelReader, config: &Config) -> Result<UkvRetrieval> {
    let mut retrieval = UkvRetrieval::new(config.variable, config.site);
    info!(
        "Retrieving {} {} for {} from {} to {}",
        config.model, config.variable, config.site, config.start, config.stop
    );

    match config.variable {
        Variable::H | Variable::Kdown if config.sa_analysis => {
            let path = config
                .percentages_csv
                .as_deref()
                .ok_or_else(|| EvalError::Config("source area analysis needs percentages".into()))?;
            let percentages = percentages_with_rasters(config, path)?;
            let (grids, average) = source_area_grids(reader, config, &percentages)?;
            retrieval.grids = grids;
            retrieval.weighted_average = Some(average);
            retrieval.percentage_covered = Some(percentages.percentage_covered_by_model());

            if config.variable == Variable::Kdown {
                if let Some(all_path) = &config.all_grids_percentages_csv {
                    let all = percentages_with_rasters(config, all_path)?;
                    let (_, average_all) = source_area_grids(reader, config, &all)?;
                    retrieval.weighted_average_all_grids = Some(average_all);
                }
            }
        }
        Variable::Wind => {
            retrieval.wind = Some(extract_site_wind(reader, config)?);
        }
        Variable::BL_H => {}
        variable => {
            let series = extract_site_series(
                reader,
                config,
                variable,
                config.grid_choice,
                config.target_height,
            )?;
            retrieval
                .grids
                .insert(grid_key(config.site, config.grid_choice), series);
        }
    }

    if matches!(config.variable, Variable::H | Variable::BL_H) {
        let series = extract_site_series(
            reader,
            config,
            Variable::BL_H,
            GridLetter::E,
            Some(BL_H_TARGET_HEIGHT),
        )?;
        retrieval.bl_h_z = series.level.map(|l| l.height);
        retrieval.bl_h = Some((format!("BL_H_{}", grid_key(config.site, GridLetter::E)), series));
    }

    if config.variable == Variable::Kdown {
        let offset = Duration::minutes(KDOWN_SHIFT_MINUTES);
        for series in retrieval.grids.values_mut() {
            series.shift_times(offset);
        }
        retrieval.weighted_average = retrieval.weighted_average.map(|a| shift_keys(a, offset));
        retrieval.weighted_average_all_grids = retrieval
            .weighted_average_all_grids
            .map(|a| shift_keys(a, offset));
    }

    if retrieval.grids.is_empty() && retrieval.bl_h.is_none() && retrieval.wind.is_none() {
        warn!("Nothing retrieved for {} at {}", config.variable, config.site);
    }
    Ok(retrieval)
}
