use chrono::{NaiveDate, NaiveDateTime};
use model_eval_tools::data_io::NetCDFModelReader;
use model_eval_tools::extract::{
    extract_model_data, extract_model_data_wind, DodgyReason, ExtractRequest,
};
use model_eval_tools::grid::GridLetter;
use model_eval_tools::lookup::{ModelName, Run, Site, Variable};
use model_eval_tools::model_files::{
    day_directory, find_ukv_files, model_file_name, order_model_stashes, FileRequest,
};
use model_eval_tools::DoyDate;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const STEPS: usize = 37;

/// Hours since 1970 of 21Z on 2016-05-05.
const RUN_2016126: f64 = 406_245.0;

fn hour(day: u32, h: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2016, 5, day)
        .unwrap()
        .and_hms_opt(h, 0, 0)
        .unwrap()
}

fn model_path(root: &Path, doy: u32, stash: &str, site: Site) -> PathBuf {
    let day = DoyDate::new(2016, doy).unwrap();
    let dir = day_directory(root, day);
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(model_file_name(ModelName::Ukv, day.to_date(), Run::Z21, stash, site))
}

/// Write a premade site file with a 3x3 field over `STEPS` hourly steps.
fn write_model_file(
    path: &Path,
    field: &str,
    reference: f64,
    levels: Option<&[f64]>,
    value: impl Fn(usize, usize, usize, usize) -> f32,
) {
    let periods: Vec<f64> = (0..STEPS).map(|t| t as f64).collect();
    write_model_file_with_periods(path, field, reference, &periods, levels, value);
}

fn write_model_file_with_periods(
    path: &Path,
    field: &str,
    reference: f64,
    periods: &[f64],
    levels: Option<&[f64]>,
    value: impl Fn(usize, usize, usize, usize) -> f32,
) {
    assert_eq!(periods.len(), STEPS);
    let mut file = netcdf::create(path).unwrap();
    file.add_dimension("grid_latitude", 3).unwrap();
    file.add_dimension("grid_longitude", 3).unwrap();
    file.add_dimension("time", STEPS).unwrap();
    file.add_dimension("reference", 1).unwrap();

    {
        let mut time = file.add_variable::<f64>("time", &["time"]).unwrap();
        time.put_attribute("units", "hours since 1970-01-01 00:00:00")
            .unwrap();
        let times: Vec<f64> = periods.iter().map(|p| reference + p).collect();
        time.put_values(&times, ..).unwrap();
    }
    {
        let mut var = file
            .add_variable::<f64>("forecast_reference_time", &["reference"])
            .unwrap();
        var.put_values(&[reference], ..).unwrap();
    }
    {
        let mut var = file.add_variable::<f64>("forecast_period", &["time"]).unwrap();
        var.put_values(periods, ..).unwrap();
    }

    let mut data = Vec::new();
    match levels {
        Some(heights) => {
            file.add_dimension("model_level_number", heights.len())
                .unwrap();
            {
                let mut var = file
                    .add_variable::<f64>("level_height", &["model_level_number"])
                    .unwrap();
                var.put_values(heights, ..).unwrap();
            }
            for lat in 0..3 {
                for lon in 0..3 {
                    for t in 0..STEPS {
                        for k in 0..heights.len() {
                            data.push(value(lat, lon, t, k));
                        }
                    }
                }
            }
            let mut var = file
                .add_variable::<f32>(
                    field,
                    &["grid_latitude", "grid_longitude", "time", "model_level_number"],
                )
                .unwrap();
            var.put_values(&data, ..).unwrap();
        }
        None => {
            for lat in 0..3 {
                for lon in 0..3 {
                    for t in 0..STEPS {
                        data.push(value(lat, lon, t, 0));
                    }
                }
            }
            let mut var = file
                .add_variable::<f32>(field, &["grid_latitude", "grid_longitude", "time"])
                .unwrap();
            var.put_values(&data, ..).unwrap();
        }
    }
}

fn request(root: &Path, variable: Variable) -> FileRequest {
    FileRequest {
        root: root.to_path_buf(),
        start: DoyDate::new(2016, 126).unwrap(),
        stop: DoyDate::new(2016, 127).unwrap(),
        site: Site::IMU,
        model: ModelName::Ukv,
        run: Run::Z21,
        variable,
    }
}

#[test]
fn test_find_order_and_extract_air_temperature() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let levels = [5.0, 20.0, 50.0];
    // centre cell reads 10 °C per level plus the step index
    let kelvin = |lat: usize, lon: usize, t: usize, k: usize| {
        let offset = if (lat, lon) == (1, 1) { 0.0 } else { 50.0 };
        273.15 + 10.0 * k as f32 + t as f32 + offset
    };
    write_model_file(
        &model_path(root, 126, "m01s16i004", Site::IMU),
        "air_temperature",
        RUN_2016126,
        Some(&levels),
        kelvin,
    );
    // 18Z start is not a known run start
    write_model_file(
        &model_path(root, 127, "m01s16i004", Site::IMU),
        "air_temperature",
        RUN_2016126 + 21.0,
        Some(&levels),
        kelvin,
    );

    let search = find_ukv_files(&request(root, Variable::Tair)).unwrap();
    assert_eq!(search.files.len(), 2);
    assert!(search.missing_days.is_empty());

    let ordered = order_model_stashes(&search.files, Variable::Tair).unwrap();
    assert_eq!(ordered.len(), 1);

    let extract = ExtractRequest {
        target_height: Some(50.0),
        grid_choice: GridLetter::E,
        ..ExtractRequest::new(Variable::Tair, ModelName::Ukv, Site::IMU)
    };
    let series = extract_model_data(&NetCDFModelReader::new(), &ordered, &extract).unwrap();

    assert_eq!(series.days.len(), 1);
    assert_eq!(series.dodgy_files.len(), 1);
    assert!(series.duplicate_times.is_empty());

    let level = series.level.unwrap();
    assert_eq!((level.index, level.below, level.above), (1, 0, 2));

    let (times, values) = series.flatten();
    assert_eq!(times.len(), 24);
    assert_eq!(times[0], hour(6, 0));
    assert_eq!(times[23], hour(6, 23));
    // spin-up drops the first three steps
    assert!((values[0] - 13.0).abs() < 1e-3);
    assert!((values[23] - 36.0).abs() < 1e-3);

    let day = series.days.values().next().unwrap();
    assert!((day.values_below[0] - 3.0).abs() < 1e-3);
    assert!((day.values_above[0] - 23.0).abs() < 1e-3);
    // the grid mean runs to the end of the file
    assert_eq!(day.mean_3x3.len(), STEPS - 3);
}

#[test]
fn test_extract_wind() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let levels = [5.0, 20.0];
    write_model_file(
        &model_path(root, 126, "m01s00i002", Site::IMU),
        "eastward_wind",
        RUN_2016126,
        Some(&levels),
        |_, _, _, _| 3.0,
    );
    write_model_file(
        &model_path(root, 126, "m01s00i003", Site::IMU),
        "northward_wind",
        RUN_2016126,
        Some(&levels),
        |_, _, _, _| 4.0,
    );

    let search = find_ukv_files(&request(root, Variable::Wind)).unwrap();
    let ordered = order_model_stashes(&search.files, Variable::Wind).unwrap();
    assert_eq!(ordered.len(), 2);

    let extract = ExtractRequest::new(Variable::Wind, ModelName::Ukv, Site::IMU);
    let wind = extract_model_data_wind(&NetCDFModelReader::new(), &ordered, &extract).unwrap();

    let (times, speed) = wind.flatten_speed();
    assert_eq!(times.len(), 24);
    assert!(speed.iter().all(|s| (s - 5.0).abs() < 1e-6));
    let (_, direction) = wind.flatten_direction();
    assert!((direction[0] - 216.8699).abs() < 1e-3);
    assert!(wind.dodgy_files.is_empty());
}

#[test]
fn test_multi_stash_days_need_every_file() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let levels = [5.0, 20.0];
    write_model_file(
        &model_path(root, 126, "m01s00i002", Site::IMU),
        "eastward_wind",
        RUN_2016126,
        Some(&levels),
        |_, _, _, _| 1.0,
    );
    write_model_file(
        &model_path(root, 127, "m01s00i003", Site::IMU),
        "northward_wind",
        RUN_2016126 + 24.0,
        Some(&levels),
        |_, _, _, _| 1.0,
    );

    let search = find_ukv_files(&request(root, Variable::Wind)).unwrap();
    assert_eq!(search.missing_files.len(), 2);
    assert!(order_model_stashes(&search.files, Variable::Wind).is_err());
}

#[test]
fn test_huge_forecast_period_marks_file_dodgy() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write_model_file(
        &model_path(root, 126, "m01s03i217", Site::IMU),
        "surface_upward_sensible_heat_flux",
        RUN_2016126,
        None,
        |_, _, t, _| t as f32,
    );
    let mut periods: Vec<f64> = (0..STEPS).map(|t| t as f64).collect();
    periods[1] = 9.9e36;
    let corrupt = model_path(root, 127, "m01s03i217", Site::IMU);
    write_model_file_with_periods(
        &corrupt,
        "surface_upward_sensible_heat_flux",
        RUN_2016126 + 24.0,
        &periods,
        None,
        |_, _, t, _| t as f32,
    );

    let search = find_ukv_files(&request(root, Variable::H)).unwrap();
    let ordered = order_model_stashes(&search.files, Variable::H).unwrap();
    let extract = ExtractRequest::new(Variable::H, ModelName::Ukv, Site::IMU);
    let series = extract_model_data(&NetCDFModelReader::new(), &ordered, &extract).unwrap();

    assert_eq!(series.days.len(), 1);
    let (times, values) = series.flatten();
    assert_eq!(times[0], hour(6, 0));
    assert_eq!(values[0], 3.0);

    assert_eq!(series.dodgy_files.len(), 1);
    assert_eq!(series.dodgy_files[0].path, corrupt);
    assert!(matches!(series.dodgy_files[0].reason, DodgyReason::BadTimes(_)));
}
