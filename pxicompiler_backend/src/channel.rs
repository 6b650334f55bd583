//! Channel naming on PXI output boards.
//!
//! Channels are addressed three ways:
//! - the short name used by the experiment description and the front panel (`ao3`, `port1/line4`),
//! - the physical name handed to DAQmx, prefixed with the MAX name (`PXI1Slot3/ao3`),
//! - physical channel lists, comma separated and possibly with ranges (`PXI1Slot6/port0/line0:7`).
//!
//! Digital lines are numbered `port * lines_per_port + line`; that index is also the bit position
//! inside a packed digital sample.

use regex::Regex;

use crate::device::TaskType;
use crate::error::CompileError;

/// Lines per port on every supported digital board.
pub const LINES_PER_PORT: usize = 8;

pub fn ao_name(id: usize) -> String {
    format!("ao{}", id)
}

pub fn do_line_name(port: usize, line: usize) -> String {
    format!("port{}/line{}", port, line)
}

/// Parses `port<p>/line<l>` into `(p, l)`.
pub fn extract_port_line_numbers(chan: &str) -> Result<(usize, usize), CompileError> {
    let malformed = || CompileError::MalformedChannel(chan.to_string());
    let (port_part, line_part) = chan.split_once('/').ok_or_else(malformed)?;
    let port = port_part
        .strip_prefix("port")
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(malformed)?;
    let line = line_part
        .strip_prefix("line")
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(malformed)?;
    Ok((port, line))
}

/// Global line index used for ordering and for bit positions in packed samples.
pub fn line_sort_key(chan: &str) -> Result<usize, CompileError> {
    let (port, line) = extract_port_line_numbers(chan)?;
    Ok(port * LINES_PER_PORT + line)
}

pub fn join_channel_list<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    names.into_iter().collect::<Vec<_>>().join(", ")
}

/// Strips the MAX-name prefix: `PXI1Slot3/ao0` -> `ao0`.
pub fn short_channel_name(physical: &str) -> &str {
    physical.split_once('/').map_or(physical, |(_dev, rest)| rest)
}

/// Expands a physical channel list into individual channels.
///
/// `"Dev1/port0/line0:2, Dev1/ao4"` becomes
/// `["Dev1/port0/line0", "Dev1/port0/line1", "Dev1/port0/line2", "Dev1/ao4"]`.
pub fn expand_physical_channels(list: &str) -> Result<Vec<String>, CompileError> {
    let re = Regex::new(r"^(?P<prefix>.*?(?:ao|line))(?P<start>\d+)(?::(?P<end>\d+))?$")
        .map_err(|_| CompileError::MalformedChannel(list.to_string()))?;
    let mut expanded = Vec::new();
    for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let caps = re
            .captures(item)
            .ok_or_else(|| CompileError::MalformedChannel(item.to_string()))?;
        let prefix = &caps["prefix"];
        let start: usize = caps["start"]
            .parse()
            .map_err(|_| CompileError::MalformedChannel(item.to_string()))?;
        let end: usize = match caps.name("end") {
            Some(end) => end
                .as_str()
                .parse()
                .map_err(|_| CompileError::MalformedChannel(item.to_string()))?,
            None => start,
        };
        if end < start {
            return Err(CompileError::MalformedChannel(item.to_string()));
        }
        expanded.extend((start..=end).map(|i| format!("{}{}", prefix, i)));
    }
    Ok(expanded)
}

/// A channel in use on a [`crate::Device`].
#[derive(Clone, Debug, PartialEq)]
pub struct Channel {
    task_type: TaskType,
    name: String,
    physical_name: String,
    index: usize,
}

impl Channel {
    pub fn new(task_type: TaskType, name: &str, connection: &str) -> Result<Self, CompileError> {
        let index = match task_type {
            TaskType::AO => name
                .strip_prefix("ao")
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or_else(|| CompileError::MalformedChannel(name.to_string()))?,
            TaskType::DO => line_sort_key(name)?,
        };
        Ok(Self {
            task_type,
            name: name.to_string(),
            physical_name: format!("{}/{}", connection, name),
            index,
        })
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn physical_name(&self) -> &str {
        &self.physical_name
    }
    /// AO number for analog channels, global line index for digital ones.
    pub fn index(&self) -> usize {
        self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_line_parsing() {
        assert_eq!(extract_port_line_numbers("port2/line5").unwrap(), (2, 5));
        assert!(extract_port_line_numbers("port2").is_err());
        assert!(extract_port_line_numbers("portX/line1").is_err());
        assert_eq!(line_sort_key("port3/line7").unwrap(), 31);
    }

    #[test]
    fn expands_ranges_and_lists() {
        let chans = expand_physical_channels("Dev1/port0/line0:2, Dev1/ao4").unwrap();
        assert_eq!(
            chans,
            vec!["Dev1/port0/line0", "Dev1/port0/line1", "Dev1/port0/line2", "Dev1/ao4"]
        );
        assert!(expand_physical_channels("Dev1/port0/line3:1").is_err());
        assert!(expand_physical_channels("Dev1/ctr0").is_err());
    }

    #[test]
    fn short_names() {
        assert_eq!(short_channel_name("PXI1Slot3/ao0"), "ao0");
        assert_eq!(short_channel_name("PXI1Slot6/port1/line2"), "port1/line2");
        assert_eq!(short_channel_name("ao0"), "ao0");
    }

    #[test]
    fn channel_index() {
        let chan = Channel::new(TaskType::DO, "port1/line2", "PXI1Slot6").unwrap();
        assert_eq!(chan.index(), 10);
        assert_eq!(chan.physical_name(), "PXI1Slot6/port1/line2");
    }
}
