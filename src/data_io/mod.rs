pub mod reader;
pub mod writer;

pub use reader::*;
pub use writer::*;

use chrono::NaiveDateTime;
use std::collections::BTreeMap;

/// Time indexed table of named columns, the shape every retrieval is saved in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    /// Header of the index column.
    pub index_name: String,
    pub columns: Vec<String>,
    /// One value per column for each time; gaps are `None`.
    pub rows: BTreeMap<NaiveDateTime, Vec<Option<f64>>>,
}

impl Frame {
    pub fn new(index_name: &str) -> Self {
        Self {
            index_name: index_name.to_string(),
            ..Default::default()
        }
    }

    /// Add a column, outer joining on time.
    ///
    /// Adding a column name that already exists replaces its values.
    pub fn add_column<'a, I>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = (&'a NaiveDateTime, &'a f64)>,
    {
        let index = match self.columns.iter().position(|c| c == name) {
            Some(i) => {
                for row in self.rows.values_mut() {
                    row[i] = None;
                }
                i
            }
            None => {
                self.columns.push(name.to_string());
                for row in self.rows.values_mut() {
                    row.push(None);
                }
                self.columns.len() - 1
            }
        };

        let width = self.columns.len();
        for (time, value) in values {
            let row = self.rows.entry(*time).or_insert_with(|| vec![None; width]);
            row[index] = Some(*value);
        }
    }

    /// Add a column from parallel time and value lists.
    pub fn add_series(&mut self, name: &str, times: &[NaiveDateTime], values: &[f64]) {
        self.add_column(name, times.iter().zip(values));
    }

    pub fn column(&self, name: &str) -> Option<BTreeMap<NaiveDateTime, f64>> {
        let i = self.columns.iter().position(|c| c == name)?;
        Some(
            self.rows
                .iter()
                .filter_map(|(t, row)| row[i].map(|v| (*t, v)))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
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

    #[test]
    fn test_frame_outer_join() {
        let mut frame = Frame::new("datetime");
        frame.add_series("13", &[hour(1), hour(2)], &[1.0, 2.0]);
        frame.add_series("14", &[hour(2), hour(3)], &[20.0, 30.0]);

        assert_eq!(frame.len(), 3);
        assert_eq!(frame.rows[&hour(1)], vec![Some(1.0), None]);
        assert_eq!(frame.rows[&hour(3)], vec![None, Some(30.0)]);
        assert_eq!(frame.column("14").unwrap().len(), 2);
        assert!(frame.column("15").is_none());

        frame.add_series("13", &[hour(3)], &[3.0]);
        assert_eq!(frame.columns.len(), 2);
        assert_eq!(frame.rows[&hour(1)], vec![None, None]);
        assert_eq!(frame.rows[&hour(3)], vec![Some(3.0), Some(30.0)]);
    }
}
