use model_eval_tools::grid::{grid_for_site, sites_for_grid, GridLetter, GridNumber, GridTable};
use model_eval_tools::landcover::{
    check_landcover_csvs, create_grid_lc_csv, site_lc_file, weight_lc_fractions,
    LandCoverError, LandCoverTable,
};
use model_eval_tools::lookup::Site;
use model_eval_tools::source_area::GridPercentages;
use model_eval_tools::DoyDate;
use std::path::Path;
use tempfile::TempDir;

/// Urban fraction used for a grid in every site file.
fn urban(grid: Option<GridNumber>) -> f64 {
    grid.map_or(0.5, |n| n.get() as f64 / 100.0)
}

/// One `<SITE>_10T.csv` per site, consistent across overlapping blocks.
fn write_site_files(dir: &Path, broken: Option<(Site, GridLetter)>) {
    for site in Site::ALL {
        let mut text = String::from(",GRID,urban,grass\n");
        for (i, letter) in GridLetter::ALL.into_iter().enumerate() {
            let mut u = urban(grid_for_site(site, letter, GridTable::LandCover));
            if broken == Some((site, letter)) {
                u += 0.1;
            }
            text.push_str(&format!("{},{},{},{}\n", i, letter, u, 1.0 - u));
        }
        std::fs::write(site_lc_file(dir, site), text).unwrap();
    }
}

#[test]
fn test_compile_and_check_all_grids() {
    let tmp = TempDir::new().unwrap();
    write_site_files(tmp.path(), None);

    check_landcover_csvs(tmp.path()).unwrap();
    let path = create_grid_lc_csv(tmp.path()).unwrap();
    assert!(path.ends_with("all_grids_10T.csv"));

    let table = LandCoverTable::from_csv(&path).unwrap();
    assert_eq!(table.tiles, vec!["urban", "grass"]);
    let grid = GridNumber::new(13).unwrap();
    let fractions = table.fractions(grid).unwrap();
    assert!((fractions[0] - 0.13).abs() < 1e-12);
    assert!((fractions[1] - 0.87).abs() < 1e-12);
}

#[test]
fn test_check_finds_disagreeing_site() {
    let tmp = TempDir::new().unwrap();
    let shared = GridNumber::all()
        .find(|&n| sites_for_grid(n, GridTable::LandCover).len() > 1)
        .unwrap();
    let (site, letter) = sites_for_grid(shared, GridTable::LandCover)[1];
    write_site_files(tmp.path(), Some((site, letter)));

    match check_landcover_csvs(tmp.path()) {
        Err(LandCoverError::Mismatch { grid, .. }) => assert_eq!(grid, shared),
        other => panic!("expected a mismatch, got {:?}", other),
    }
}

#[test]
fn test_weight_compiled_land_cover() {
    let tmp = TempDir::new().unwrap();
    write_site_files(tmp.path(), None);
    let path = create_grid_lc_csv(tmp.path()).unwrap();
    let table = LandCoverTable::from_csv(&path).unwrap();

    let percentages = GridPercentages::from_reader(
        "datetime,grid,percentage\n\
         2016-05-06 12:00:00,13,50.0\n\
         2016-05-06 12:00:00,14,50.0\n"
            .as_bytes(),
    )
    .unwrap();
    let weighted = weight_lc_fractions(&percentages, &table).unwrap();
    let row = weighted.rows.values().next().unwrap();
    assert!((row[0] - 0.135).abs() < 1e-12);

    let out = weighted
        .write_csv(tmp.path(), DoyDate::new(2016, 127).unwrap())
        .unwrap();
    let text = std::fs::read_to_string(out).unwrap();
    assert!(text.starts_with("datetime,urban,grass\n2016-05-06 12:00:00,"));
}
