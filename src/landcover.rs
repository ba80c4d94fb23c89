//! UKV 10-tile land cover fractions per grid and their source area weighting.

use crate::data_io::{CsvFrameWriter, Frame, FrameWriter, WriteError};
use crate::grid::{sites_for_grid, GridLetter, GridNumber, GridTable};
use crate::lookup::{LookupError, Site};
use crate::source_area::GridPercentages;
use crate::time_utils::DoyDate;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const GRID_NUM_COLUMN: &str = "GRID_NUM";
pub const GRID_COLUMN: &str = "GRID";
pub const ALL_GRIDS_FILE: &str = "all_grids_10T.csv";

/// Relative tolerance on the weighted fractions summing to one.
const SUM_TOLERANCE: f64 = 0.01;

/// Relative tolerance when comparing the same grid between site files.
const MATCH_TOLERANCE: f64 = 1e-5;

#[derive(Error, Debug)]
pub enum LandCoverError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    #[error("Column {column} not found in {source_name}")]
    MissingColumn { source_name: String, column: String },

    #[error("Bad value {value:?} in column {column}")]
    BadValue { column: String, value: String },

    #[error("Grid {0} has no land cover row")]
    MissingGrid(GridNumber),

    #[error("Grid {letter} not found in {site} land cover file")]
    MissingLetter { site: Site, letter: GridLetter },

    #[error("Weighted land cover fractions at {hour} sum to {total}, not 1")]
    WeightsDoNotSum { hour: NaiveDateTime, total: f64 },

    #[error("Tile columns differ from {0}")]
    TileMismatch(String),

    #[error("Grid {grid}: {site} {letter} fractions differ from {first_site} {first_letter}")]
    Mismatch {
        grid: GridNumber,
        site: Site,
        letter: GridLetter,
        first_site: Site,
        first_letter: GridLetter,
    },
}

/// Tile names and keyed rows of fractions from a land cover CSV.
fn read_keyed_rows<K: Ord>(
    reader: impl Read,
    source_name: &str,
    key_column: &str,
    parse_key: impl Fn(&str) -> Result<K, LandCoverError>,
) -> Result<(Vec<String>, BTreeMap<K, Vec<f64>>), LandCoverError> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let headers = csv_reader.headers()?.clone();

    let key_index = headers
        .iter()
        .position(|h| h == key_column)
        .ok_or_else(|| LandCoverError::MissingColumn {
            source_name: source_name.to_string(),
            column: key_column.to_string(),
        })?;
    // an unnamed leading column is a saved row index
    let tile_indices: Vec<usize> = (0..headers.len())
        .filter(|&i| i != key_index && !headers[i].trim().is_empty())
        .collect();
    let tiles: Vec<String> = tile_indices.iter().map(|&i| headers[i].to_string()).collect();

    let mut rows = BTreeMap::new();
    for record in csv_reader.records() {
        let record = record?;
        let key = parse_key(record.get(key_index).unwrap_or_default())?;
        let fractions = tile_indices
            .iter()
            .map(|&i| {
                let raw = record.get(i).unwrap_or_default();
                raw.trim().parse::<f64>().map_err(|_| LandCoverError::BadValue {
                    column: headers[i].to_string(),
                    value: raw.to_string(),
                })
            })
            .collect::<Result<Vec<f64>, _>>()?;
        rows.insert(key, fractions);
    }

    Ok((tiles, rows))
}

/// Land cover fractions for each grid number (`all_grids_10T.csv`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LandCoverTable {
    pub tiles: Vec<String>,
    rows: BTreeMap<GridNumber, Vec<f64>>,
}

impl LandCoverTable {
    pub fn new(tiles: Vec<String>) -> Self {
        Self {
            tiles,
            rows: BTreeMap::new(),
        }
    }

    pub fn from_csv(path: &Path) -> Result<Self, LandCoverError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, &path.display().to_string())
    }

    pub fn from_reader(reader: impl Read, source_name: &str) -> Result<Self, LandCoverError> {
        let (tiles, rows) = read_keyed_rows(reader, source_name, GRID_NUM_COLUMN, |s| {
            Ok(s.parse::<GridNumber>()?)
        })?;
        Ok(Self { tiles, rows })
    }

    pub fn insert(&mut self, grid: GridNumber, fractions: Vec<f64>) {
        self.rows.insert(grid, fractions);
    }

    pub fn fractions(&self, grid: GridNumber) -> Option<&[f64]> {
        self.rows.get(&grid).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), LandCoverError> {
        let mut writer = csv::Writer::from_path(path)?;
        let mut header = vec![GRID_NUM_COLUMN.to_string()];
        header.extend(self.tiles.iter().cloned());
        writer.write_record(&header)?;
        for (grid, fractions) in &self.rows {
            let mut record = vec![grid.to_string()];
            record.extend(fractions.iter().map(f64::to_string));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Fractions of the 3x3 grids around one site (`<SITE>_10T.csv`).
#[derive(Debug, Clone, PartialEq)]
pub struct SiteLandCover {
    pub site: Site,
    pub tiles: Vec<String>,
    rows: BTreeMap<GridLetter, Vec<f64>>,
}

impl SiteLandCover {
    pub fn from_csv(path: &Path, site: Site) -> Result<Self, LandCoverError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, &path.display().to_string(), site)
    }

    pub fn from_reader(reader: impl Read, source_name: &str, site: Site) -> Result<Self, LandCoverError> {
        let (tiles, rows) = read_keyed_rows(reader, source_name, GRID_COLUMN, |s| {
            Ok(s.trim().parse::<GridLetter>()?)
        })?;
        Ok(Self { site, tiles, rows })
    }

    pub fn fractions(&self, letter: GridLetter) -> Result<&[f64], LandCoverError> {
        self.rows
            .get(&letter)
            .map(Vec::as_slice)
            .ok_or(LandCoverError::MissingLetter {
                site: self.site,
                letter,
            })
    }
}

pub fn site_lc_file(dir: &Path, site: Site) -> PathBuf {
    dir.join(format!("{}_10T.csv", site))
}

/// Per hour land cover of a source area.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedLandCover {
    pub tiles: Vec<String>,
    pub rows: BTreeMap<NaiveDateTime, Vec<f64>>,
}

impl WeightedLandCover {
    pub fn to_frame(&self) -> Frame {
        let mut frame = Frame::new("datetime");
        for (i, tile) in self.tiles.iter().enumerate() {
            frame.add_column(tile, self.rows.iter().map(|(t, row)| (t, &row[i])));
        }
        frame
    }

    /// Save as `weighted_lc_ukv_<DOY>.csv` in `dir`.
    pub fn write_csv(&self, dir: &Path, start: DoyDate) -> Result<PathBuf, LandCoverError> {
        let path = dir.join(format!("weighted_lc_ukv_{}.csv", start));
        CsvFrameWriter::new(&path).write_frame(&self.to_frame())?;
        info!("csv file saved to: {}", path.display());
        Ok(path)
    }
}

/// Weight each grid's fractions by its share of the source area.
///
/// Every hour's weighted fractions must sum to one within 1%.
pub fn weight_lc_fractions(
    percentages: &GridPercentages,
    table: &LandCoverTable,
) -> Result<WeightedLandCover, LandCoverError> {
    let mut rows = BTreeMap::new();

    for (hour, grids) in percentages.iter() {
        let mut weighted = vec![0.0; table.tiles.len()];
        for (grid, percentage) in grids {
            let fractions = table
                .fractions(*grid)
                .ok_or(LandCoverError::MissingGrid(*grid))?;
            for (w, f) in weighted.iter_mut().zip(fractions) {
                *w += f * percentage / 100.0;
            }
        }

        let total: f64 = weighted.iter().sum();
        if (total - 1.0).abs() > SUM_TOLERANCE {
            return Err(LandCoverError::WeightsDoNotSum { hour: *hour, total });
        }
        debug!("Weighted land cover at {} sums to {}", hour, total);
        rows.insert(*hour, weighted);
    }

    Ok(WeightedLandCover {
        tiles: table.tiles.clone(),
        rows,
    })
}

/// Site files read so far, keyed by site.
struct SiteFiles<'a> {
    dir: &'a Path,
    loaded: BTreeMap<Site, SiteLandCover>,
}

impl<'a> SiteFiles<'a> {
    fn new(dir: &'a Path) -> Self {
        Self {
            dir,
            loaded: BTreeMap::new(),
        }
    }

    fn get(&mut self, site: Site) -> Result<&SiteLandCover, LandCoverError> {
        if !self.loaded.contains_key(&site) {
            let lc = SiteLandCover::from_csv(&site_lc_file(self.dir, site), site)?;
            self.loaded.insert(site, lc);
        }
        self.loaded
            .get(&site)
            .ok_or_else(|| LandCoverError::TileMismatch(site.to_string()))
    }
}

/// Compile `all_grids_10T.csv` in `dir` from the per-site files, taking each
/// grid from the first site listed for it.
pub fn create_grid_lc_csv(dir: &Path) -> Result<PathBuf, LandCoverError> {
    let mut sites = SiteFiles::new(dir);
    let mut table: Option<LandCoverTable> = None;

    for grid in GridNumber::all() {
        let Some(&(site, letter)) = sites_for_grid(grid, GridTable::LandCover).first() else {
            continue;
        };
        let site_lc = sites.get(site)?;
        let fractions = site_lc.fractions(letter)?.to_vec();

        let table = table.get_or_insert_with(|| LandCoverTable::new(site_lc.tiles.clone()));
        if table.tiles != site_lc.tiles {
            return Err(LandCoverError::TileMismatch(
                site_lc_file(dir, site).display().to_string(),
            ));
        }
        debug!("Grid {} from {} {}", grid, site, letter);
        table.insert(grid, fractions);
    }

    let path = dir.join(ALL_GRIDS_FILE);
    table.unwrap_or_default().write_csv(&path)?;
    info!("Land cover for all grids saved to {}", path.display());
    Ok(path)
}

fn fractions_match(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| (x - y).abs() <= MATCH_TOLERANCE * y.abs().max(f64::EPSILON))
}

/// Check every site/letter listed for the same grid holds the same fractions.
pub fn check_landcover_csvs(dir: &Path) -> Result<(), LandCoverError> {
    let mut sites = SiteFiles::new(dir);

    for grid in GridNumber::all() {
        let options = sites_for_grid(grid, GridTable::LandCover);
        let Some(&(first_site, first_letter)) = options.first() else {
            continue;
        };
        let first = sites.get(first_site)?.fractions(first_letter)?.to_vec();

        for &(site, letter) in &options[1..] {
            let other = sites.get(site)?.fractions(letter)?;
            if !fractions_match(other, &first) {
                return Err(LandCoverError::Mismatch {
                    grid,
                    site,
                    letter,
                    first_site,
                    first_letter,
                });
            }
        }
        debug!("Grid {}: {} entries agree", grid, options.len());
    }

    info!("All land cover files agree");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn hour(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2016, 5, 5)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn table() -> LandCoverTable {
        let data = "GRID_NUM,urban,grass,water\n13,0.5,0.5,0.0\n14,0.2,0.3,0.5\n";
        LandCoverTable::from_reader(data.as_bytes(), "test").unwrap()
    }

    #[test]
    fn test_read_table() {
        let t = table();
        assert_eq!(t.tiles, vec!["urban", "grass", "water"]);
        assert_eq!(t.len(), 2);
        assert_eq!(
            t.fractions(GridNumber::new(14).unwrap()).unwrap(),
            &[0.2, 0.3, 0.5]
        );
    }

    #[test]
    fn test_read_table_with_index_column() {
        let data = ",GRID,urban,grass\n0,A,0.1,0.9\n1,E,0.6,0.4\n";
        let lc = SiteLandCover::from_reader(data.as_bytes(), "test", Site::IMU).unwrap();
        assert_eq!(lc.tiles, vec!["urban", "grass"]);
        assert_eq!(lc.fractions(GridLetter::E).unwrap(), &[0.6, 0.4]);
        assert!(matches!(
            lc.fractions(GridLetter::I),
            Err(LandCoverError::MissingLetter { .. })
        ));
    }

    #[test]
    fn test_missing_key_column() {
        let data = "urban,grass\n0.1,0.9\n";
        assert!(matches!(
            LandCoverTable::from_reader(data.as_bytes(), "test"),
            Err(LandCoverError::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_weight_lc_fractions() {
        let g13 = GridNumber::new(13).unwrap();
        let g14 = GridNumber::new(14).unwrap();
        let mut p = GridPercentages::new();
        p.insert(hour(12), g13, 50.0);
        p.insert(hour(12), g14, 50.0);
        p.insert(hour(13), g13, 100.0);

        let weighted = weight_lc_fractions(&p, &table()).unwrap();
        assert_eq!(weighted.rows.len(), 2);
        let noon = &weighted.rows[&hour(12)];
        assert!((noon[0] - 0.35).abs() < 1e-12);
        assert!((noon[2] - 0.25).abs() < 1e-12);
        assert_eq!(weighted.rows[&hour(13)], vec![0.5, 0.5, 0.0]);

        let frame = weighted.to_frame();
        assert_eq!(frame.columns, vec!["urban", "grass", "water"]);
        assert_eq!(frame.len(), 2);
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut p = GridPercentages::new();
        p.insert(hour(12), GridNumber::new(13).unwrap(), 80.0);
        assert!(matches!(
            weight_lc_fractions(&p, &table()),
            Err(LandCoverError::WeightsDoNotSum { .. })
        ));

        let mut missing = GridPercentages::new();
        missing.insert(hour(12), GridNumber::new(20).unwrap(), 100.0);
        assert!(matches!(
            weight_lc_fractions(&missing, &table()),
            Err(LandCoverError::MissingGrid(_))
        ));
    }

    #[test]
    fn test_fractions_match() {
        assert!(fractions_match(&[0.5, 0.25], &[0.5, 0.250001]));
        assert!(!fractions_match(&[0.5, 0.25], &[0.5, 0.26]));
        assert!(!fractions_match(&[0.5], &[0.5, 0.0]));
        assert!(fractions_match(&[0.0], &[0.0]));
    }
}
