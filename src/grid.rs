//! 3x3 sub-grid selection around a site and the grid number adjacency tables.

use crate::lookup::{LookupError, Site};
use ndarray::ArrayD;
use std::fmt;
use std::str::FromStr;

/// Position in the 3x3 block of model cells written around a site.
///
/// ```text
/// A B C
/// D E F
/// G H I
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum GridLetter {
    A,
    B,
    C,
    D,
    #[default]
    E,
    F,
    G,
    H,
    I,
}

impl GridLetter {
    pub const ALL: [GridLetter; 9] = [
        GridLetter::A,
        GridLetter::B,
        GridLetter::C,
        GridLetter::D,
        GridLetter::E,
        GridLetter::F,
        GridLetter::G,
        GridLetter::H,
        GridLetter::I,
    ];

    /// `(lat, lon)` indices into the file's first two dimensions.
    pub fn indices(&self) -> (usize, usize) {
        match self {
            GridLetter::A => (2, 0),
            GridLetter::B => (2, 1),
            GridLetter::C => (2, 2),
            GridLetter::D => (1, 0),
            GridLetter::E => (1, 1),
            GridLetter::F => (1, 2),
            GridLetter::G => (0, 0),
            GridLetter::H => (0, 1),
            GridLetter::I => (0, 2),
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            GridLetter::A => 'A',
            GridLetter::B => 'B',
            GridLetter::C => 'C',
            GridLetter::D => 'D',
            GridLetter::E => 'E',
            GridLetter::F => 'F',
            GridLetter::G => 'G',
            GridLetter::H => 'H',
            GridLetter::I => 'I',
        }
    }
}

impl fmt::Display for GridLetter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl FromStr for GridLetter {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GridLetter::ALL
            .into_iter()
            .find(|g| s.len() == 1 && s.eq_ignore_ascii_case(&g.as_char().to_string()))
            .ok_or_else(|| LookupError::UnknownGridLetter(s.to_string()))
    }
}

/// Numbered UKV cell covering the London observation network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GridNumber(u32);

impl GridNumber {
    pub const MAX: u32 = 42;

    pub fn new(n: u32) -> Result<Self, LookupError> {
        if (1..=Self::MAX).contains(&n) {
            Ok(Self(n))
        } else {
            Err(LookupError::UnknownGridNumber(n))
        }
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = GridNumber> {
        (1..=Self::MAX).map(GridNumber)
    }
}

impl fmt::Display for GridNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GridNumber {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n: u32 = s
            .trim()
            .parse()
            .map_err(|_| LookupError::UnknownGridNumber(0))?;
        Self::new(n)
    }
}

/// Which adjacency table to consult.
///
/// The land cover fractions were produced on a grid where the KSSW block
/// sits one column over from where the stash files place it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridTable {
    StashCodes,
    LandCover,
}

/// Every `(site, letter)` whose 3x3 block includes grid `n`, in table order.
pub fn sites_for_grid(n: GridNumber, table: GridTable) -> &'static [(Site, GridLetter)] {
    let index = (n.get() - 1) as usize;
    match table {
        GridTable::StashCodes => tables::STASH_CODES[index],
        GridTable::LandCover => tables::LAND_COVER[index],
    }
}

/// The grid number a site's letter lands on.
pub fn grid_for_site(site: Site, letter: GridLetter, table: GridTable) -> Option<GridNumber> {
    GridNumber::all().find(|&n| sites_for_grid(n, table).contains(&(site, letter)))
}

/// Value of one cell at a time index, and level index for level fields.
pub fn cell_value(
    field: &ArrayD<f32>,
    letter: GridLetter,
    time: usize,
    level: Option<usize>,
) -> Option<f32> {
    let (lat, lon) = letter.indices();
    match level {
        Some(k) => field.get(&[lat, lon, time, k][..]).copied(),
        None => field.get(&[lat, lon, time][..]).copied(),
    }
}

/// Mean over all nine cells at a time index, and level index for level fields.
pub fn grid_mean(field: &ArrayD<f32>, time: usize, level: Option<usize>) -> Option<f32> {
    let mut sum = 0.0f32;
    for letter in GridLetter::ALL {
        sum += cell_value(field, letter, time, level)?;
    }
    Some(sum / 9.0)
}

mod tables {
    use super::GridLetter::{self, *};
    use crate::lookup::Site::{self, *};

    type Entries = &'static [(Site, GridLetter)];

    pub(super) const STASH_CODES: [Entries; 42] = [
        &[(MR, A), (BTT, A)],
        &[(MR, B), (BTT, B)],
        &[(MR, C), (BTT, C), (IMU, A), (IML, A)],
        &[(IMU, B), (IML, B), (BFCL, A), (BCT, A)],
        &[(IMU, C), (IML, C), (BFCL, B), (BCT, B)],
        &[(BFCL, C), (BCT, C)],
        &[(NK, A)],
        &[(NK, B)],
        &[(NK, C)],
        &[(MR, D), (BTT, D)],
        &[(MR, E), (BTT, E), (KSSW, A)],
        &[(MR, F), (BTT, F), (IMU, D), (IML, D), (KSSW, B)],
        &[(IMU, E), (IML, E), (BFCL, D), (BCT, D), (BGH, A), (KSSW, C)],
        &[(IMU, F), (IML, F), (BFCL, E), (BCT, E), (BGH, B)],
        &[(BFCL, F), (BCT, F), (BGH, C)],
        &[(NK, D)],
        &[(NK, E)],
        &[(RGS, A), (NK, F)],
        &[(MR, G), (BTT, G), (RGS, B)],
        &[(MR, H), (BTT, H), (RGS, C), (KSSW, D)],
        &[(MR, I), (BTT, I), (IMU, G), (IML, G), (KSSW, E)],
        &[(IMU, H), (IML, H), (BFCL, G), (BCT, G), (BGH, D), (KSSW, F)],
        &[(IMU, I), (IML, I), (BFCL, H), (BCT, H), (BGH, E)],
        &[(BFCL, I), (BCT, I), (BGH, F)],
        &[(NK, G)],
        &[(NK, H)],
        &[(RGS, D), (NK, I)],
        &[(RGS, E)],
        &[(RGS, F), (KSSW, G)],
        &[(KSSW, H)],
        &[(BGH, G), (KSSW, I), (SWT, A)],
        &[(BGH, H), (SWT, B)],
        &[(BGH, I), (SWT, C)],
        &[(RGS, G)],
        &[(RGS, H)],
        &[(RGS, I)],
        &[(SWT, D)],
        &[(SWT, E)],
        &[(SWT, F)],
        &[(SWT, G)],
        &[(SWT, H)],
        &[(SWT, I)],
    ];

    pub(super) const LAND_COVER: [Entries; 42] = [
        &[(MR, A), (BTT, A)],
        &[(MR, B), (BTT, B)],
        &[(MR, C), (BTT, C), (IMU, A), (IML, A)],
        &[(IMU, B), (IML, B), (BFCL, A), (BCT, A)],
        &[(IMU, C), (IML, C), (BFCL, B), (BCT, B)],
        &[(BFCL, C), (BCT, C)],
        &[(NK, A)],
        &[(NK, B)],
        &[(NK, C)],
        &[(MR, D), (BTT, D)],
        &[(MR, E), (BTT, E)],
        &[(MR, F), (BTT, F), (IMU, D), (IML, D), (KSSW, A)],
        &[(IMU, E), (IML, E), (BFCL, D), (BCT, D), (BGH, A), (KSSW, B)],
        &[(IMU, F), (IML, F), (BFCL, E), (BCT, E), (BGH, B), (KSSW, C)],
        &[(BFCL, F), (BCT, F), (BGH, C)],
        &[(NK, D)],
        &[(NK, E)],
        &[(RGS, A), (NK, F)],
        &[(MR, G), (BTT, G), (RGS, B)],
        &[(MR, H), (BTT, H), (RGS, C)],
        &[(MR, I), (BTT, I), (IMU, G), (IML, G), (KSSW, D)],
        &[(IMU, H), (IML, H), (BFCL, G), (BCT, G), (BGH, D), (KSSW, E)],
        &[(IMU, I), (IML, I), (BFCL, H), (BCT, H), (BGH, E), (KSSW, F)],
        &[(BFCL, I), (BCT, I), (BGH, F)],
        &[(NK, G)],
        &[(NK, H)],
        &[(RGS, D), (NK, I)],
        &[(RGS, E)],
        &[(RGS, F)],
        &[(KSSW, G)],
        &[(BGH, G), (SWT, A), (KSSW, H)],
        &[(BGH, H), (SWT, B), (KSSW, I)],
        &[(BGH, I), (SWT, C)],
        &[(RGS, G)],
        &[(RGS, H)],
        &[(RGS, I)],
        &[(SWT, D)],
        &[(SWT, E)],
        &[(SWT, F)],
        &[(SWT, G)],
        &[(SWT, H)],
        &[(SWT, I)],
    ];
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_letter_indices() {
        assert_eq!(GridLetter::default(), GridLetter::E);
        assert_eq!(GridLetter::A.indices(), (2, 0));
        assert_eq!(GridLetter::I.indices(), (0, 2));
        assert_eq!("c".parse::<GridLetter>().unwrap(), GridLetter::C);
        assert!("J".parse::<GridLetter>().is_err());
        assert!("AB".parse::<GridLetter>().is_err());
    }

    #[test]
    fn test_grid_number_bounds() {
        assert!(GridNumber::new(0).is_err());
        assert!(GridNumber::new(43).is_err());
        assert_eq!(GridNumber::all().count(), 42);
    }

    #[test]
    fn test_every_site_letter_appears_once() {
        for table in [GridTable::StashCodes, GridTable::LandCover] {
            for site in Site::ALL.into_iter().take(11) {
                for letter in GridLetter::ALL {
                    let hits = GridNumber::all()
                        .filter(|&n| sites_for_grid(n, table).contains(&(site, letter)))
                        .count();
                    assert_eq!(hits, 1, "{} {} in {:?}", site, letter, table);
                }
            }
        }
    }

    #[test]
    fn test_kssw_shift_between_tables() {
        assert_eq!(
            grid_for_site(Site::KSSW, GridLetter::A, GridTable::StashCodes),
            Some(GridNumber(11))
        );
        assert_eq!(
            grid_for_site(Site::KSSW, GridLetter::A, GridTable::LandCover),
            Some(GridNumber(12))
        );
        assert_eq!(
            grid_for_site(Site::IMU, GridLetter::E, GridTable::StashCodes),
            Some(GridNumber(13))
        );
    }

    #[test]
    fn test_grid_mean_and_cell() {
        let mut field = ArrayD::<f32>::zeros(IxDyn(&[3, 3, 2]));
        for lat in 0..3 {
            for lon in 0..3 {
                field[[lat, lon, 1].as_slice()] = (lat * 3 + lon) as f32;
            }
        }
        assert_eq!(cell_value(&field, GridLetter::A, 1, None), Some(6.0));
        assert_eq!(grid_mean(&field, 1, None), Some(4.0));
        assert_eq!(grid_mean(&field, 0, None), Some(0.0));
        assert_eq!(grid_mean(&field, 2, None), None);
    }
}
