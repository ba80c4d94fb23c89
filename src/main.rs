use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use model_eval_tools::{
    config::{with_run_args, Config, OutputFormat},
    data_io::{
        write_dodgy_files, write_file_search, CsvFrameWriter, Frame, FrameWriter,
        NetCDFFrameWriter, NetCDFModelReader,
    },
    error::{EvalError, Result},
    extract::ModelSeries,
    grid::GridNumber,
    landcover::{check_landcover_csvs, create_grid_lc_csv, weight_lc_fractions, LandCoverTable},
    lookup::Variable,
    model_files::{find_ukv_files, order_model_stashes, FileRequest},
    plot::{plot_model_series, plot_retrieval, plot_wind_series, PlotMeta},
    retrieve::{
        extract_site_series, extract_site_wind, grid_key, grid_search, retrieve_ukv, setup_run,
        ukv_z0_zd, RunSetup,
    },
    source_area::{check_grid_stash_values, GridPercentages},
    time_utils::{model_doy_range, DoyDate},
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() {
    let matches = build_cli().get_matches();
    let verbose = matches.get_flag("verbose");
    init_logger(verbose);

    match matches.subcommand() {
        Some(("find", sub_matches)) => {
            if let Err(e) = run_find(sub_matches, verbose) {
                eprintln!("Find error: {}", e);
                std::process::exit(1);
            }
        }
        Some(("extract", sub_matches)) => {
            if let Err(e) = run_extract(sub_matches, verbose) {
                eprintln!("Extract error: {}", e);
                std::process::exit(1);
            }
        }
        Some(("retrieve", sub_matches)) => {
            if let Err(e) = run_retrieve(sub_matches, verbose) {
                eprintln!("Retrieve error: {}", e);
                std::process::exit(1);
            }
        }
        Some(("weight-lc", sub_matches)) => {
            if let Err(e) = run_weight_lc(sub_matches) {
                eprintln!("Land cover weighting error: {}", e);
                std::process::exit(1);
            }
        }
        Some(("compile-lc", sub_matches)) => {
            if let Err(e) = run_compile_lc(sub_matches) {
                eprintln!("Land cover compile error: {}", e);
                std::process::exit(1);
            }
        }
        Some(("check-lc", sub_matches)) => {
            if let Err(e) = run_check_lc(sub_matches) {
                eprintln!("Land cover check error: {}", e);
                std::process::exit(1);
            }
        }
        Some(("check-grid", sub_matches)) => {
            if let Err(e) = run_check_grid(sub_matches, verbose) {
                eprintln!("Grid check error: {}", e);
                std::process::exit(1);
            }
        }
        _ => {
            eprintln!("Please specify a subcommand. Use --help for more information.");
            std::process::exit(1);
        }
    }
}

fn init_logger(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("model_eval_tools=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .compact(),
        )
        .init();
}

fn load_config(matches: &ArgMatches, verbose: bool) -> Result<Config> {
    Config::from_matches(matches, verbose).map_err(EvalError::Config)
}

fn required_path(matches: &ArgMatches, name: &str) -> Result<PathBuf> {
    matches
        .get_one::<PathBuf>(name)
        .cloned()
        .ok_or_else(|| EvalError::Config(format!("Missing argument: {}", name)))
}

fn plot_meta(config: &Config, setup: &RunSetup) -> PlotMeta {
    PlotMeta {
        site: config.site,
        start: config.start,
        stop: config.stop,
        save_folder: setup.save_folder.clone(),
    }
}

/// Write a frame next to the plots in the configured format.
fn save_frame(frame: &Frame, config: &Config, folder: &Path, stem: &str) -> Result<PathBuf> {
    let mut writer: Box<dyn FrameWriter> = match config.output_format {
        OutputFormat::Csv => Box::new(CsvFrameWriter::new(folder.join(format!("{}.csv", stem)))),
        OutputFormat::NetCDF => {
            Box::new(NetCDFFrameWriter::new(folder.join(format!("{}.nc", stem))))
        }
    };
    writer.add_global_attribute("site", config.site.name())?;
    writer.add_global_attribute("variable", config.variable.name())?;
    writer.add_global_attribute("model", config.model.name())?;
    writer.add_global_attribute("run", config.run.as_str())?;
    writer.write_frame(frame)?;
    Ok(writer.output_path().to_path_buf())
}

fn series_frame(series: &ModelSeries, key: &str) -> Frame {
    let mut frame = Frame::new("datetime");
    let (times, values) = series.flatten();
    frame.add_series(key, &times, &values);

    let mut below = Vec::new();
    let mut above = Vec::new();
    for day in series.days.values() {
        below.extend_from_slice(&day.values_below);
        above.extend_from_slice(&day.values_above);
    }
    frame.add_series(&format!("{}_below", key), &times, &below);
    frame.add_series(&format!("{}_above", key), &times, &above);
    frame
}

fn run_find(matches: &ArgMatches, verbose: bool) -> Result<()> {
    let config = load_config(matches, verbose)?;
    let (start, stop) = model_doy_range(config.start, config.stop, config.run);

    let search = find_ukv_files(&FileRequest {
        root: config.model_root.clone(),
        start,
        stop,
        site: config.site,
        model: config.model,
        run: config.run,
        variable: config.variable,
    })?;
    let ordered = order_model_stashes(&search.files, config.variable)?;

    info!(
        "{} days with files, {} missing days, {} missing files",
        search.files.len(),
        search.missing_days.len(),
        search.missing_files.len()
    );
    for (stash, files) in config.variable.stash_codes().iter().zip(&ordered) {
        info!("{}: {} usable days", stash, files.len());
    }

    if let Some(output) = matches.get_one::<PathBuf>("output") {
        write_file_search(&search, output)?;
        info!("File list saved to {}", output.display());
    }
    Ok(())
}

fn run_extract(matches: &ArgMatches, verbose: bool) -> Result<()> {
    let config = load_config(matches, verbose)?;
    let setup = setup_run(&config)?;
    let meta = plot_meta(&config, &setup);
    let reader = NetCDFModelReader::new();

    let stem = format!(
        "{}_{}_{}_{}_{}",
        config.variable, config.model, config.site, config.start, config.stop
    );

    if config.variable == Variable::Wind {
        let wind = extract_site_wind(&reader, &config)?;
        let mut frame = Frame::new("datetime");
        let (times, speed) = wind.flatten_speed();
        frame.add_series("wind_speed", &times, &speed);
        let (times, direction) = wind.flatten_direction();
        frame.add_series("wind_direction", &times, &direction);

        save_frame(&frame, &config, &setup.save_folder, &stem)?;
        write_dodgy_files(&wind.dodgy_files, &setup.save_folder.join("dodgy_files.csv"))?;
        if wind.days.is_empty() {
            warn!("No wind data to plot");
        } else {
            plot_wind_series(&wind, &meta)?;
        }
        return Ok(());
    }

    let series = extract_site_series(
        &reader,
        &config,
        config.variable,
        config.grid_choice,
        config.target_height,
    )?;
    if let Some(level) = series.level {
        info!(
            "Model level {} at {:.1} m (below {:.1} m, above {:.1} m)",
            level.index, level.height, level.height_below, level.height_above
        );
    }

    let key = grid_key(config.site, config.grid_choice);
    save_frame(&series_frame(&series, &key), &config, &setup.save_folder, &stem)?;
    write_dodgy_files(&series.dodgy_files, &setup.save_folder.join("dodgy_files.csv"))?;
    if series.days.is_empty() {
        warn!("No {} data to plot", config.variable);
    } else {
        plot_model_series(&series, &meta)?;
    }
    Ok(())
}

fn run_retrieve(matches: &ArgMatches, verbose: bool) -> Result<()> {
    let config = load_config(matches, verbose)?;
    let setup = setup_run(&config)?;
    let meta = plot_meta(&config, &setup);
    info!("Instrument: {}", setup.instrument);

    match ukv_z0_zd(config.site) {
        Ok(z0_zd) => info!("Roughness options for {}: {:?}", config.site, z0_zd),
        Err(e) => warn!("{}", e),
    }

    let reader = NetCDFModelReader::new();
    let retrieval = retrieve_ukv(&reader, &config)?;
    if let Some(z) = retrieval.bl_h_z {
        info!("BL_H level height: {:.1} m", z);
    }
    if let Some(covered) = &retrieval.percentage_covered {
        for (hour, percentage) in covered {
            debug!("{}: {:.1}% of the source area on model grids", hour, percentage);
        }
    }

    let frame = retrieval.to_frame();
    let stem = format!(
        "UKV_{}_{}_{}_{}",
        config.variable, config.site, config.start, config.stop
    );
    let saved = save_frame(&frame, &config, &setup.save_folder, &stem)?;
    info!("Retrieval saved to {}", saved.display());

    write_dodgy_files(
        &retrieval.dodgy_files(),
        &setup.save_folder.join("dodgy_files.csv"),
    )?;

    if frame.is_empty() {
        warn!("Nothing to plot");
    } else {
        plot_retrieval(&retrieval, config.model, &meta)?;
    }
    Ok(())
}

fn run_weight_lc(matches: &ArgMatches) -> Result<()> {
    let percentages = GridPercentages::from_csv(&required_path(matches, "percentages")?)?;
    let table = LandCoverTable::from_csv(&required_path(matches, "landcover")?)?;
    let start: DoyDate = matches
        .get_one::<String>("start")
        .ok_or_else(|| EvalError::Config("Missing argument: start".to_string()))?
        .parse()?;
    let output_dir = required_path(matches, "output-dir")?;
    std::fs::create_dir_all(&output_dir)?;

    let weighted = weight_lc_fractions(&percentages, &table)?;
    weighted.write_csv(&output_dir, start)?;
    Ok(())
}

fn run_compile_lc(matches: &ArgMatches) -> Result<()> {
    let dir = required_path(matches, "landcover-dir")?;
    let path = create_grid_lc_csv(&dir)?;
    info!("Compiled {}", path.display());
    Ok(())
}

fn run_check_lc(matches: &ArgMatches) -> Result<()> {
    let dir = required_path(matches, "landcover-dir")?;
    check_landcover_csvs(&dir)?;
    Ok(())
}

fn run_check_grid(matches: &ArgMatches, verbose: bool) -> Result<()> {
    let config = load_config(matches, verbose)?;
    let number = matches
        .get_one::<u32>("grid-number")
        .copied()
        .ok_or_else(|| EvalError::Config("Missing argument: grid-number".to_string()))?;
    let grid = GridNumber::new(number)?;

    let reader = NetCDFModelReader::new();
    let disagreements = check_grid_stash_values(&reader, &grid_search(&config), grid)?;
    if !disagreements.is_empty() {
        return Err(EvalError::NoData(format!(
            "{} times where sites disagree on grid {}",
            disagreements.len(),
            grid
        )));
    }
    info!("Every site agrees on grid {}", grid);
    Ok(())
}

fn landcover_dir_arg() -> Arg {
    Arg::new("landcover-dir")
        .short('d')
        .long("landcover-dir")
        .value_name("DIR")
        .help("Directory of <SITE>_10T.csv land cover files")
        .required(true)
        .value_parser(value_parser!(PathBuf))
}

fn build_cli() -> Command {
    Command::new("model_eval_tools")
        .version("0.1.0")
        .about("Retrieve, align and plot UKV model output for London observation sites")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            with_run_args(
                Command::new("find").about("List found and missing model files for a day range"),
            )
            .arg(
                Arg::new("output")
                    .long("output")
                    .value_name("CSV")
                    .help("Save the file list to a CSV")
                    .value_parser(value_parser!(PathBuf)),
            ),
        )
        .subcommand(with_run_args(
            Command::new("extract").about("Extract one variable at one site and grid, then plot it"),
        ))
        .subcommand(with_run_args(
            Command::new("retrieve").about("Full UKV retrieval for a variable, saved and plotted"),
        ))
        .subcommand(
            Command::new("weight-lc")
                .about("Weight grid land cover fractions by the source area")
                .arg(
                    Arg::new("percentages")
                        .long("percentages")
                        .value_name("CSV")
                        .help("Grid percentages of the source area (datetime,grid,percentage)")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("landcover")
                        .long("landcover")
                        .value_name("CSV")
                        .help("Land cover fractions for every grid (all_grids_10T.csv)")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("start")
                        .short('s')
                        .long("start")
                        .value_name("YYYYDOY")
                        .help("Day used in the output file name")
                        .required(true),
                )
                .arg(
                    Arg::new("output-dir")
                        .short('o')
                        .long("output-dir")
                        .value_name("DIR")
                        .help("Directory for the weighted land cover CSV")
                        .default_value(".")
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("compile-lc")
                .about("Compile all_grids_10T.csv from the per-site land cover files")
                .arg(landcover_dir_arg()),
        )
        .subcommand(
            Command::new("check-lc")
                .about("Check overlapping grids hold the same land cover in every site file")
                .arg(landcover_dir_arg()),
        )
        .subcommand(
            with_run_args(
                Command::new("check-grid")
                    .about("Check every site's files hold the same values for one model grid"),
            )
            .arg(
                Arg::new("grid-number")
                    .long("grid-number")
                    .value_name("N")
                    .help("Model grid number, 1 to 42")
                    .required(true)
                    .value_parser(value_parser!(u32)),
            ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_weight_lc_args() {
        let matches = build_cli()
            .try_get_matches_from([
                "model_eval_tools",
                "weight-lc",
                "--percentages",
                "p.csv",
                "--landcover",
                "all_grids_10T.csv",
                "--start",
                "2016126",
            ])
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "weight-lc");
        assert_eq!(required_path(sub, "output-dir").unwrap(), PathBuf::from("."));
    }

    #[test]
    fn test_check_grid_args() {
        let matches = build_cli()
            .try_get_matches_from([
                "model_eval_tools",
                "check-grid",
                "--model-root",
                ".",
                "--start",
                "2016127",
                "--stop",
                "2016127",
                "--variable",
                "kdown",
                "--grid-number",
                "11",
            ])
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "check-grid");
        assert_eq!(sub.get_one::<u32>("grid-number"), Some(&11));
        let config = load_config(sub, false).unwrap();
        assert_eq!(config.variable, Variable::Kdown);
    }
}
