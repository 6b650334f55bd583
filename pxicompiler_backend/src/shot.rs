//! The compiled description of one shot, as read by the board workers.
//!
//! A [`Shot`] maps device names to [`BoardShot`]s. A worker only ever reads its own entry: the clock
//! terminal, the sample rate, the physical channels to open and, if the board is used in this shot,
//! its output table. Shots are stored as JSON.

use indexmap::IndexMap;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::device::TaskType;
use crate::error::CompileError;

/// Output samples of one board.
///
/// - `Analog`: shape `(ticks, channels)`, column order as in [`BoardShot::channels`].
/// - `Digital`: one packed word per tick, bit `port * 8 + line` holds that line's state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum OutputTable {
    Analog(Array2<f64>),
    Digital(Array1<u32>),
}

impl OutputTable {
    pub fn task_type(&self) -> TaskType {
        match self {
            OutputTable::Analog(_) => TaskType::AO,
            OutputTable::Digital(_) => TaskType::DO,
        }
    }

    /// Number of sample ticks.
    pub fn len(&self) -> usize {
        match self {
            OutputTable::Analog(arr) => arr.nrows(),
            OutputTable::Digital(arr) => arr.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardShot {
    pub clock_terminal: String,
    pub sample_rate: f64,
    /// Comma-separated physical channels of the buffered task.
    pub channels: String,
    pub table: Option<OutputTable>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Shot {
    devices: IndexMap<String, BoardShot>,
}

impl Shot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, board: BoardShot) {
        self.devices.insert(name.to_string(), board);
    }

    pub fn device(&self, name: &str) -> Option<&BoardShot> {
        self.devices.get(name)
    }

    pub fn devices(&self) -> &IndexMap<String, BoardShot> {
        &self.devices
    }

    pub fn to_json(&self) -> Result<String, CompileError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self, CompileError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CompileError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CompileError> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn table_lengths() {
        let analog = OutputTable::Analog(array![[0.0, 1.0], [2.0, 3.0], [4.0, 5.0]]);
        assert_eq!(analog.len(), 3);
        assert_eq!(analog.task_type(), TaskType::AO);
        let digital = OutputTable::Digital(array![1, 2]);
        assert_eq!(digital.len(), 2);
        assert!(!digital.is_empty());
    }

    #[test]
    fn shot_file_survives_disk() {
        let mut shot = Shot::new();
        shot.insert(
            "do_board",
            BoardShot {
                clock_terminal: "/PXI1Slot6/PFI0".to_string(),
                sample_rate: 5e6,
                channels: "PXI1Slot6/port0/line0:7".to_string(),
                table: Some(OutputTable::Digital(array![0, 0xff, 1])),
            },
        );
        shot.insert(
            "ao_board",
            BoardShot {
                clock_terminal: "/PXI1Slot3/PFI0".to_string(),
                sample_rate: 1e6,
                channels: "PXI1Slot3/ao0, PXI1Slot3/ao1".to_string(),
                table: None,
            },
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.json");
        shot.save(&path).unwrap();
        let loaded = Shot::load(&path).unwrap();
        assert_eq!(loaded, shot);
        assert!(loaded.device("ao_board").unwrap().table.is_none());
    }

    #[test]
    fn malformed_shot_is_an_error() {
        assert!(matches!(Shot::from_json("{\"devices\": 3}"), Err(CompileError::Serde(_))));
    }
}
