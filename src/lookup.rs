//! Static site, model and variable tables.
//!
//! Roughness values were calculated in UMEP with the MacDonald (1998) method
//! over a 500 m source area. Surface altitudes come from stash m01s00i033.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LookupError {
    #[error("Unknown site: {0}")]
    UnknownSite(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Unknown run: {0} (expected 06Z or 21Z)")]
    UnknownRun(String),

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("Grid choice {0} is not an option (expected A-I)")]
    UnknownGridLetter(String),

    #[error("Grid number {0} is outside 1-42")]
    UnknownGridNumber(u32),

    #[error("No observed roughness for site {0}")]
    NoRoughness(Site),
}

/// Observation sites, including the two non-LUMO sites with premade model files.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Site {
    BCT,
    BFCL,
    BGH,
    BTT,
    IML,
    IMU,
    KSSW,
    MR,
    NK,
    RGS,
    SWT,
    Heathrow,
    Reading,
}

impl Site {
    pub const ALL: [Site; 13] = [
        Site::BCT,
        Site::BFCL,
        Site::BGH,
        Site::BTT,
        Site::IML,
        Site::IMU,
        Site::KSSW,
        Site::MR,
        Site::NK,
        Site::RGS,
        Site::SWT,
        Site::Heathrow,
        Site::Reading,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Site::BCT => "BCT",
            Site::BFCL => "BFCL",
            Site::BGH => "BGH",
            Site::BTT => "BTT",
            Site::IML => "IML",
            Site::IMU => "IMU",
            Site::KSSW => "KSSW",
            Site::MR => "MR",
            Site::NK => "NK",
            Site::RGS => "RGS",
            Site::SWT => "SWT",
            Site::Heathrow => "Heathrow",
            Site::Reading => "Reading",
        }
    }

    /// Site code used in premade model file names.
    pub fn file_code(&self) -> &'static str {
        match self {
            Site::BCT => "LON_BCT",
            Site::BFCL => "LON_BFCL",
            Site::BGH => "LON_BGH",
            Site::BTT => "LON_BTT",
            Site::IML => "LON_IML",
            Site::IMU => "LON_IMU",
            Site::KSSW => "LON_KSSW",
            Site::MR => "LON_MR",
            Site::NK => "LON_NK",
            Site::RGS => "LON_RGS",
            Site::SWT => "LON_SWT",
            Site::Heathrow => "Heathrow",
            Site::Reading => "Reading",
        }
    }

    pub fn from_file_code(code: &str) -> Option<Site> {
        Site::ALL.into_iter().find(|s| s.file_code() == code)
    }

    /// Observed `(z0, zd)` in metres.
    pub fn obs_roughness(&self) -> Option<(f64, f64)> {
        match self {
            Site::BCT => Some((1.664, 16.874)),
            Site::BFCL => Some((1.368, 16.376)),
            Site::BGH => Some((1.436, 18.966)),
            Site::BTT => Some((1.147, 13.759)),
            Site::IML => Some((0.862, 9.386)),
            Site::IMU => Some((0.887, 9.367)),
            Site::KSSW => Some((1.811, 13.238)),
            Site::MR => Some((1.208, 9.783)),
            Site::NK => Some((1.001, 5.321)),
            Site::RGS => Some((2.084, 8.821)),
            Site::SWT => Some((1.073, 5.584)),
            Site::Heathrow | Site::Reading => None,
        }
    }

    /// Surface altitude of the model grid cell over the site.
    pub fn altitude(&self, model: ModelName) -> f64 {
        match model {
            ModelName::Ukv => self.ukv_altitude(),
            ModelName::Lon | ModelName::Mor => self.lon_altitude(),
        }
    }

    fn ukv_altitude(&self) -> f64 {
        match self {
            Site::Heathrow => 26.084702,
            Site::BCT => 25.500525,
            Site::BFCL => 25.500525,
            Site::BGH => 17.123268,
            Site::BTT => 43.288658,
            Site::IML => 29.193649,
            Site::IMU => 29.193649,
            Site::KSSW => 26.755775,
            Site::MR => 43.288658,
            Site::NK => 28.70874,
            Site::RGS => 19.805748,
            Site::SWT => 3.0381837,
            Site::Reading => 43.790215,
        }
    }

    fn lon_altitude(&self) -> f64 {
        match self {
            Site::Heathrow => 22.805416107177734,
            Site::BCT => 28.072063446044922,
            Site::BFCL => 29.131160736083984,
            Site::BGH => 29.131160736083984,
            Site::BTT => 35.290924072265625,
            Site::IML => 24.953636169433594,
            Site::IMU => 24.953636169433594,
            Site::KSSW => 17.655845642089844,
            Site::MR => 35.698440551757813,
            Site::NK => 25.287059783935547,
            Site::RGS => 26.907081604003906,
            Site::SWT => 6.5159897804260254,
            Site::Reading => 62.51922607421875,
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Site {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Site::ALL
            .into_iter()
            .find(|site| site.name().eq_ignore_ascii_case(s) || site.file_code() == s)
            .ok_or_else(|| LookupError::UnknownSite(s.to_string()))
    }
}

/// Models with premade site files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModelName {
    Ukv,
    Lon,
    Mor,
}

impl ModelName {
    pub fn name(&self) -> &'static str {
        match self {
            ModelName::Ukv => "ukv",
            ModelName::Lon => "lon",
            ModelName::Mor => "mor",
        }
    }

    pub fn file_prefix(&self) -> &'static str {
        match self {
            ModelName::Ukv => "MOUKV_FC",
            ModelName::Lon => "MOLON_FC",
            ModelName::Mor => "MOMOR_FC",
        }
    }

    /// RGB line colour for plots.
    pub fn colour(&self) -> (u8, u8, u8) {
        match self {
            ModelName::Ukv => (0, 0, 255),
            ModelName::Lon => (255, 0, 0),
            ModelName::Mor => (128, 0, 128),
        }
    }

    pub fn z0_index(&self) -> usize {
        match self {
            ModelName::Ukv => 0,
            ModelName::Lon | ModelName::Mor => 1,
        }
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelName {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ukv" => Ok(ModelName::Ukv),
            "lon" => Ok(ModelName::Lon),
            "mor" => Ok(ModelName::Mor),
            _ => Err(LookupError::UnknownModel(s.to_string())),
        }
    }
}

/// Forecast run start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Run {
    Z06,
    Z21,
}

impl Run {
    pub fn as_str(&self) -> &'static str {
        match self {
            Run::Z06 => "06Z",
            Run::Z21 => "21Z",
        }
    }
}

impl fmt::Display for Run {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Run {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "06Z" => Ok(Run::Z06),
            "21Z" => Ok(Run::Z21),
            _ => Err(LookupError::UnknownRun(s.to_string())),
        }
    }
}

/// Scintillometer instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instrument {
    LasMkII28,
    LasMkII29,
    Bls,
}

impl Instrument {
    /// Instrument family as it appears in observation file names.
    pub fn family(&self) -> &'static str {
        match self {
            Instrument::LasMkII28 | Instrument::LasMkII29 => "LASMkII_Fast",
            Instrument::Bls => "BLS",
        }
    }
}

impl FromStr for Instrument {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LASMkII_28" => Ok(Instrument::LasMkII28),
            "LASMkII_29" => Ok(Instrument::LasMkII29),
            "BLS" => Ok(Instrument::Bls),
            _ => Err(LookupError::UnknownInstrument(s.to_string())),
        }
    }
}

/// Whether a variable lives on model levels or at the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelKind {
    Levels,
    Surface,
}

/// How model level heights are built for a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeightSource {
    /// `level_height` plus the site's model altitude.
    LevelsAboveAltitude,
    /// `level_height` as stored.
    Levels,
    /// 70 notional levels, all at the site's model altitude.
    Surface,
}

/// Plot and statistics metadata for a variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariableInfo {
    /// Axis labels; wind has speed then direction.
    pub labels: &'static [&'static str],
    pub kind: LevelKind,
    pub unit: &'static str,
    /// Hit rate thresholds, `[harsh, kind]`.
    pub hit_rate: [f64; 2],
    pub histogram_bin: f64,
    pub ensemble_ylim: Option<[f64; 2]>,
}

/// Model variables that can be located by stash code.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Variable {
    Tair,
    RH,
    RH_q,
    Press,
    Wind,
    Kdown,
    Ldown,
    Kup,
    Lstar,
    H,
    LE,
    BL_H,
    Z0,
}

impl Variable {
    pub const ALL: [Variable; 13] = [
        Variable::Tair,
        Variable::RH,
        Variable::RH_q,
        Variable::Press,
        Variable::Wind,
        Variable::Kdown,
        Variable::Ldown,
        Variable::Kup,
        Variable::Lstar,
        Variable::H,
        Variable::LE,
        Variable::BL_H,
        Variable::Z0,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Variable::Tair => "Tair",
            Variable::RH => "RH",
            Variable::RH_q => "RH_q",
            Variable::Press => "Press",
            Variable::Wind => "wind",
            Variable::Kdown => "kdown",
            Variable::Ldown => "ldown",
            Variable::Kup => "kup",
            Variable::Lstar => "lstar",
            Variable::H => "H",
            Variable::LE => "LE",
            Variable::BL_H => "BL_H",
            Variable::Z0 => "z0",
        }
    }

    /// Stash codes in the order the extraction expects them:
    /// wind is u then v, kup is down then net, RH_q is T, P then q.
    pub fn stash_codes(&self) -> &'static [&'static str] {
        match self {
            Variable::Tair => &["m01s16i004"],
            Variable::RH => &["m01s09i229"],
            Variable::Press => &["m01s00i408"],
            Variable::Wind => &["m01s00i002", "m01s00i003"],
            Variable::Kdown => &["m01s01i235"],
            Variable::Ldown => &["m01s02i207"],
            Variable::Kup => &["m01s01i235", "m01s01i201"],
            Variable::Lstar => &["m01s02i201"],
            Variable::RH_q => &["m01s16i004", "m01s00i408", "m01s00i010"],
            Variable::H => &["m01s03i217"],
            Variable::LE => &["m01s03i234"],
            Variable::BL_H => &["m01s03i216"],
            Variable::Z0 => &["m01s03i026"],
        }
    }

    /// NetCDF field names for each stash file, first match wins.
    pub fn field_names(&self) -> &'static [&'static [&'static str]] {
        match self {
            Variable::Tair => &[&["air_temperature"]],
            Variable::RH => &[&["relative_humidity"]],
            Variable::Press => &[&["air_pressure"]],
            Variable::Wind => &[&["eastward_wind"], &["northward_wind"]],
            Variable::Kdown => &[&["surface_downwelling_shortwave_flux_in_air"]],
            Variable::Ldown => &[&["surface_downwelling_longwave_flux_in_air"]],
            Variable::Kup => &[
                &["surface_downwelling_shortwave_flux_in_air"],
                &["surface_net_downward_shortwave_flux"],
            ],
            Variable::Lstar => &[&["surface_net_longwave_flux_in_air"]],
            Variable::RH_q => &[&["air_temperature"], &["air_pressure"], &["specific_humidity"]],
            Variable::H => &[&[
                "surface_upward_sensible_heat_flux",
                "surface_sensible_heat_flux",
            ]],
            Variable::LE => &[&[
                "surface_upward_latent_heat_flux",
                "surface_latent_heat_flux",
            ]],
            Variable::BL_H => &[&["boundary_layer_heat_fluxes"]],
            Variable::Z0 => &[&["surface_roughness_length"]],
        }
    }

    pub fn is_multi_stash(&self) -> bool {
        self.stash_codes().len() > 1
    }

    pub fn height_source(&self) -> HeightSource {
        match self {
            Variable::Tair | Variable::RH | Variable::RH_q | Variable::Press | Variable::Wind => {
                HeightSource::LevelsAboveAltitude
            }
            Variable::BL_H => HeightSource::Levels,
            Variable::Kdown
            | Variable::Ldown
            | Variable::Kup
            | Variable::Lstar
            | Variable::H
            | Variable::LE
            | Variable::Z0 => HeightSource::Surface,
        }
    }

    /// Unit conversion applied to raw file values.
    pub fn convert(&self, raw: f64) -> f64 {
        match self {
            Variable::Tair => raw - 273.15,
            Variable::Press => raw / 100.0,
            _ => raw,
        }
    }

    pub fn info(&self) -> VariableInfo {
        const WM2: &str = "W m$^{-2}$";
        match self {
            Variable::Tair => VariableInfo {
                labels: &["Air Temperature (°C)"],
                kind: LevelKind::Levels,
                unit: "°C",
                hit_rate: [0.5, 1.0],
                histogram_bin: 0.5,
                ensemble_ylim: Some([0.0, 25.0]),
            },
            Variable::RH => VariableInfo {
                labels: &["Relative Humidity (%)"],
                kind: LevelKind::Levels,
                unit: "%",
                hit_rate: [1.0, 5.0],
                histogram_bin: 2.0,
                ensemble_ylim: None,
            },
            Variable::RH_q => VariableInfo {
                labels: &["Relative Humidity (%)"],
                kind: LevelKind::Levels,
                unit: "%",
                hit_rate: [1.0, 5.0],
                histogram_bin: 2.0,
                ensemble_ylim: Some([0.0, 100.0]),
            },
            Variable::Press => VariableInfo {
                labels: &["Pressure (hPa)"],
                kind: LevelKind::Levels,
                unit: "hPa",
                hit_rate: [1.0, 2.25],
                histogram_bin: 2.0,
                ensemble_ylim: None,
            },
            Variable::Wind => VariableInfo {
                labels: &["Wind Speed (m s-1)", "Wind Direction (°)"],
                kind: LevelKind::Levels,
                unit: "m s-1",
                hit_rate: [0.5, 1.0],
                histogram_bin: 2.0,
                ensemble_ylim: None,
            },
            Variable::Kdown => VariableInfo {
                labels: &["Incoming Shortwave Radiation (W m-2)"],
                kind: LevelKind::Surface,
                unit: WM2,
                hit_rate: [0.5, 1.0],
                histogram_bin: 10.0,
                ensemble_ylim: Some([0.0, 400.0]),
            },
            Variable::Ldown => VariableInfo {
                labels: &["Incoming Longwave Radiation (W m-2)"],
                kind: LevelKind::Surface,
                unit: WM2,
                hit_rate: [0.5, 1.0],
                histogram_bin: 2.0,
                ensemble_ylim: None,
            },
            Variable::Kup => VariableInfo {
                labels: &["Outgoing Shortwave Radiation (W m-2)"],
                kind: LevelKind::Surface,
                unit: WM2,
                hit_rate: [0.5, 1.0],
                histogram_bin: 2.0,
                ensemble_ylim: None,
            },
            Variable::Lstar => VariableInfo {
                labels: &["Net Longwave Radiation (W m-2)"],
                kind: LevelKind::Surface,
                unit: WM2,
                hit_rate: [0.5, 1.0],
                histogram_bin: 2.0,
                ensemble_ylim: None,
            },
            Variable::H => VariableInfo {
                labels: &["Sensible Heat Flux (W m-2)"],
                kind: LevelKind::Surface,
                unit: WM2,
                hit_rate: [25.0, 80.0],
                histogram_bin: 10.0,
                ensemble_ylim: Some([-50.0, 300.0]),
            },
            Variable::LE => VariableInfo {
                labels: &["Latent Heat Flux (W m-2)"],
                kind: LevelKind::Surface,
                unit: WM2,
                hit_rate: [5.0, 20.0],
                histogram_bin: 10.0,
                ensemble_ylim: Some([-10.0, 50.0]),
            },
            Variable::BL_H => VariableInfo {
                labels: &["BL Heat Flux (W m-2)"],
                kind: LevelKind::Levels,
                unit: WM2,
                hit_rate: [25.0, 80.0],
                histogram_bin: 10.0,
                ensemble_ylim: Some([-50.0, 300.0]),
            },
            Variable::Z0 => VariableInfo {
                labels: &["Roughness Length (m)"],
                kind: LevelKind::Surface,
                unit: "m",
                hit_rate: [0.1, 0.5],
                histogram_bin: 0.1,
                ensemble_ylim: None,
            },
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Variable {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Variable::ALL
            .into_iter()
            .find(|v| v.name() == s)
            .ok_or_else(|| LookupError::UnknownVariable(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_round_trip() {
        for site in Site::ALL {
            assert_eq!(site.name().parse::<Site>().unwrap(), site);
            assert_eq!(Site::from_file_code(site.file_code()), Some(site));
        }
        assert!("XYZ".parse::<Site>().is_err());
    }

    #[test]
    fn test_altitude_by_model() {
        assert_eq!(Site::SWT.altitude(ModelName::Ukv), 3.0381837);
        assert_eq!(Site::SWT.altitude(ModelName::Mor), Site::SWT.altitude(ModelName::Lon));
    }

    #[test]
    fn test_variable_names_parse() {
        for v in Variable::ALL {
            assert_eq!(v.name().parse::<Variable>().unwrap(), v);
            assert_eq!(v.stash_codes().len(), v.field_names().len());
        }
    }

    #[test]
    fn test_stash_order() {
        assert_eq!(Variable::Wind.stash_codes(), &["m01s00i002", "m01s00i003"]);
        assert!(Variable::Kup.is_multi_stash());
        assert!(!Variable::H.is_multi_stash());
    }

    #[test]
    fn test_unit_conversion() {
        assert!((Variable::Tair.convert(293.15) - 20.0).abs() < 1e-9);
        assert_eq!(Variable::Press.convert(101325.0), 1013.25);
        assert_eq!(Variable::H.convert(42.0), 42.0);
    }

    #[test]
    fn test_instrument_family() {
        assert_eq!("LASMkII_28".parse::<Instrument>().unwrap().family(), "LASMkII_Fast");
        assert_eq!("BLS".parse::<Instrument>().unwrap().family(), "BLS");
        assert!("scintec".parse::<Instrument>().is_err());
    }
}
