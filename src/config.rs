use crate::grid::GridLetter;
use crate::lookup::{Instrument, ModelName, Run, Site, Variable};
use crate::source_area::DEFAULT_SA_NAME_START;
use crate::time_utils::DoyDate;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

/// Format retrieval frames are saved in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    NetCDF,
}

/// Settings for one evaluation run.
#[derive(Clone, Debug)]
pub struct Config {
    // Input paths
    /// Root of the premade model file tree
    pub model_root: PathBuf,
    /// Directory of hourly source area rasters
    pub sa_root: PathBuf,
    /// File name start of the source area rasters
    pub sa_name_start: String,
    /// Grid percentages for the source area (`datetime,grid,percentage`)
    pub percentages_csv: Option<PathBuf>,
    /// Grid percentages over every grid, for the all-grids kdown variant
    pub all_grids_percentages_csv: Option<PathBuf>,

    // Output
    /// Root of the per-run plot folders
    pub plots_root: PathBuf,
    pub output_format: OutputFormat,

    // What to evaluate
    /// First observation day
    pub start: DoyDate,
    /// Last observation day
    pub stop: DoyDate,
    pub site: Site,
    pub instrument: Instrument,
    /// Scintillometer path identifier used in folder names
    pub path_id: String,
    pub variable: Variable,
    pub model: ModelName,
    pub run: Run,

    // Extraction
    pub hours_before_repeat: usize,
    pub grid_choice: GridLetter,
    /// Height to pick the model level for (m); the variable default if unset
    pub target_height: Option<f64>,
    /// Weight grids by the source area instead of using the site grid
    pub sa_analysis: bool,

    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        let day = DoyDate {
            year: 2016,
            doy: 126,
        };
        Self {
            model_root: PathBuf::from("./data"),
            sa_root: PathBuf::from("./source_areas"),
            sa_name_start: DEFAULT_SA_NAME_START.to_string(),
            percentages_csv: None,
            all_grids_percentages_csv: None,
            plots_root: PathBuf::from("./plots"),
            output_format: OutputFormat::Csv,
            start: day,
            stop: day,
            site: Site::IMU,
            instrument: Instrument::LasMkII28,
            path_id: "12".to_string(),
            variable: Variable::H,
            model: ModelName::Ukv,
            run: Run::Z21,
            hours_before_repeat: 24,
            grid_choice: GridLetter::E,
            target_height: None,
            sa_analysis: false,
            verbose: false,
        }
    }
}

/// Add the shared run arguments to a subcommand.
pub fn with_run_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("model-root")
            .short('m')
            .long("model-root")
            .value_name("DIR")
            .help("Root of the premade model file tree")
            .default_value("./data")
            .value_parser(value_parser!(PathBuf)),
    )
    .arg(
        Arg::new("start")
            .short('s')
            .long("start")
            .value_name("YYYYDOY")
            .help("First observation day, e.g. 2016126")
            .required(true),
    )
    .arg(
        Arg::new("stop")
            .short('e')
            .long("stop")
            .value_name("YYYYDOY")
            .help("Last observation day, e.g. 2016130")
            .required(true),
    )
    .arg(
        Arg::new("site")
            .long("site")
            .value_name("SITE")
            .help("Observation site, e.g. IMU or BCT")
            .default_value("IMU"),
    )
    .arg(
        Arg::new("variable")
            .long("variable")
            .value_name("VARIABLE")
            .help("Variable: Tair, RH, RH_q, Press, wind, kdown, ldown, kup, lstar, H, LE, BL_H, z0")
            .default_value("H"),
    )
    .arg(
        Arg::new("model")
            .long("model")
            .value_name("MODEL")
            .help("Model: ukv, lon or mor")
            .default_value("ukv"),
    )
    .arg(
        Arg::new("run")
            .long("run")
            .value_name("RUN")
            .help("Forecast run: 06Z or 21Z")
            .value_parser(["06Z", "21Z"])
            .default_value("21Z"),
    )
    .arg(
        Arg::new("grid")
            .short('g')
            .long("grid")
            .value_name("LETTER")
            .help("Cell of the 3x3 grid around the site (A-I)")
            .default_value("E"),
    )
    .arg(
        Arg::new("target-height")
            .long("target-height")
            .value_name("METRES")
            .help("Height to choose the model level for")
            .value_parser(value_parser!(f64)),
    )
    .arg(
        Arg::new("hours-before-repeat")
            .long("hours-before-repeat")
            .value_name("HOURS")
            .help("Hours kept from each run after spin-up")
            .default_value("24")
            .value_parser(value_parser!(usize)),
    )
    .arg(
        Arg::new("plots-root")
            .short('o')
            .long("plots-root")
            .value_name("DIR")
            .help("Root directory for plots and CSV output")
            .default_value("./plots")
            .value_parser(value_parser!(PathBuf)),
    )
    .arg(
        Arg::new("output-format")
            .long("output-format")
            .value_name("FORMAT")
            .help("Format for saved series: csv or netcdf")
            .value_parser(["csv", "netcdf"])
            .default_value("csv"),
    )
    .arg(
        Arg::new("instrument")
            .long("instrument")
            .value_name("INSTRUMENT")
            .help("Scintillometer: LASMkII_28, LASMkII_29 or BLS")
            .default_value("LASMkII_28"),
    )
    .arg(
        Arg::new("path-id")
            .long("path-id")
            .value_name("ID")
            .help("Scintillometer path number")
            .default_value("12"),
    )
    .arg(
        Arg::new("sa-analysis")
            .long("sa-analysis")
            .help("Weight model grids by the source area")
            .action(ArgAction::SetTrue),
    )
    .arg(
        Arg::new("sa-root")
            .long("sa-root")
            .value_name("DIR")
            .help("Directory of hourly source area rasters")
            .default_value("./source_areas")
            .value_parser(value_parser!(PathBuf)),
    )
    .arg(
        Arg::new("sa-name-start")
            .long("sa-name-start")
            .value_name("PREFIX")
            .help("File name start of the source area rasters")
            .default_value(DEFAULT_SA_NAME_START),
    )
    .arg(
        Arg::new("percentages")
            .long("percentages")
            .value_name("CSV")
            .help("Grid percentages of the source area (datetime,grid,percentage)")
            .value_parser(value_parser!(PathBuf)),
    )
    .arg(
        Arg::new("all-grids-percentages")
            .long("all-grids-percentages")
            .value_name("CSV")
            .help("Grid percentages over every grid, used for kdown")
            .value_parser(value_parser!(PathBuf)),
    )
}

fn parse_arg<T>(matches: &ArgMatches, name: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = matches
        .get_one::<String>(name)
        .ok_or_else(|| format!("Missing argument: {}", name))?;
    raw.parse()
        .map_err(|e| format!("Invalid {}: {} ({})", name, raw, e))
}

fn path_arg(matches: &ArgMatches, name: &str) -> Result<PathBuf, String> {
    matches
        .get_one::<PathBuf>(name)
        .cloned()
        .ok_or_else(|| format!("Missing argument: {}", name))
}

impl Config {
    /// Build from a subcommand created with [`with_run_args`].
    pub fn from_matches(matches: &ArgMatches, verbose: bool) -> Result<Self, String> {
        let output_format = match matches
            .get_one::<String>("output-format")
            .map(String::as_str)
        {
            Some("netcdf") => OutputFormat::NetCDF,
            _ => OutputFormat::Csv,
        };

        let config = Self {
            model_root: path_arg(matches, "model-root")?,
            sa_root: path_arg(matches, "sa-root")?,
            sa_name_start: parse_arg(matches, "sa-name-start")?,
            percentages_csv: matches.get_one::<PathBuf>("percentages").cloned(),
            all_grids_percentages_csv: matches.get_one::<PathBuf>("all-grids-percentages").cloned(),
            plots_root: path_arg(matches, "plots-root")?,
            output_format,
            start: parse_arg(matches, "start")?,
            stop: parse_arg(matches, "stop")?,
            site: parse_arg(matches, "site")?,
            instrument: parse_arg(matches, "instrument")?,
            path_id: parse_arg(matches, "path-id")?,
            variable: parse_arg(matches, "variable")?,
            model: parse_arg(matches, "model")?,
            run: parse_arg(matches, "run")?,
            hours_before_repeat: matches
                .get_one::<usize>("hours-before-repeat")
                .copied()
                .unwrap_or(24),
            grid_choice: parse_arg(matches, "grid")?,
            target_height: matches.get_one::<f64>("target-height").copied(),
            sa_analysis: matches.get_flag("sa-analysis"),
            verbose,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.start > self.stop {
            return Err(format!(
                "Start day {} is after stop day {}",
                self.start, self.stop
            ));
        }
        if self.hours_before_repeat == 0 {
            return Err("Hours before repeat must be positive".to_string());
        }
        if let Some(h) = self.target_height {
            if !h.is_finite() || h < 0.0 {
                return Err(format!("Target height must be a non-negative number: {}", h));
            }
        }

        if !self.model_root.is_dir() {
            return Err(format!(
                "Model root is not a directory: {}",
                self.model_root.display()
            ));
        }

        if self.sa_analysis {
            if !matches!(self.variable, Variable::H | Variable::Kdown) {
                return Err(format!(
                    "Source area analysis is only available for H and kdown, not {}",
                    self.variable
                ));
            }
            match &self.percentages_csv {
                Some(path) if path.is_file() => {}
                Some(path) => {
                    return Err(format!(
                        "Percentages file does not exist: {}",
                        path.display()
                    ))
                }
                None => return Err("Source area analysis needs --percentages".to_string()),
            }
            if !self.sa_root.is_dir() {
                return Err(format!(
                    "Source area directory does not exist: {}",
                    self.sa_root.display()
                ));
            }
        }

        Ok(())
    }
}
