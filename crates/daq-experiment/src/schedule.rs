//! Temperature schedules for sweep runs.
//!
//! A schedule is an ordered queue of setpoints (kelvin). The orchestrator
//! consumes it front to back; nothing is ever re-inserted.
//!
//! Schedules are stored as plain text files in a schedule directory, one
//! setpoint per line:
//!
//! ```text
//! # cool-down ramp
//! 300
//! 280
//! 260.5
//! ```

use daq_core::{AppResult, DaqError};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// FIFO queue of setpoints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemperatureSchedule {
    setpoints: VecDeque<f64>,
}

impl TemperatureSchedule {
    /// Build a schedule from setpoints in visiting order.
    pub fn new(setpoints: impl IntoIterator<Item = f64>) -> Self {
        Self {
            setpoints: setpoints.into_iter().collect(),
        }
    }

    /// Empty schedule.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse schedule text: one positive kelvin value per line, blank lines and
    /// `#` comments ignored.
    pub fn parse(text: &str) -> AppResult<Self> {
        let mut setpoints = VecDeque::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let value: f64 = line.parse().map_err(|_| {
                DaqError::InvalidSchedule(format!("line {}: '{}' is not a number", line_no + 1, line))
            })?;
            if !(value.is_finite() && value > 0.0) {
                return Err(DaqError::InvalidSchedule(format!(
                    "line {}: setpoint {} K is not a positive temperature",
                    line_no + 1,
                    line
                )));
            }
            setpoints.push_back(value);
        }
        Ok(Self { setpoints })
    }

    /// Next setpoint without consuming it.
    #[must_use]
    pub fn peek(&self) -> Option<f64> {
        self.setpoints.front().copied()
    }

    /// Consume the next setpoint.
    pub fn pop(&mut self) -> Option<f64> {
        self.setpoints.pop_front()
    }

    /// Number of setpoints left.
    #[must_use]
    pub fn len(&self) -> usize {
        self.setpoints.len()
    }

    /// Whether no setpoints are left.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.setpoints.is_empty()
    }

    /// Remaining setpoints in visiting order.
    #[must_use]
    pub fn remaining(&self) -> Vec<f64> {
        self.setpoints.iter().copied().collect()
    }
}

/// Directory of named schedule files.
#[derive(Debug, Clone)]
pub struct ScheduleLibrary {
    directory: PathBuf,
}

impl ScheduleLibrary {
    /// Library rooted at `directory`. The directory does not have to exist.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Directory the library reads from.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Names of the available schedules, sorted.
    ///
    /// A missing directory yields an empty list.
    pub fn available(&self) -> AppResult<Vec<String>> {
        if !self.directory.is_dir() {
            warn!(directory = %self.directory.display(), "Schedule directory does not exist");
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.directory)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    if !name.starts_with('.') {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Load the schedule called `name`.
    ///
    /// # Errors
    /// - `DaqError::ScheduleNotFound` if no such file exists (or the name
    ///   tries to leave the schedule directory)
    /// - `DaqError::InvalidSchedule` if the file does not parse
    pub fn load(&self, name: &str) -> AppResult<TemperatureSchedule> {
        let is_plain_name = !name.is_empty()
            && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name);
        if !is_plain_name {
            return Err(DaqError::ScheduleNotFound(name.to_string()));
        }

        let path = self.directory.join(name);
        if !path.is_file() {
            return Err(DaqError::ScheduleNotFound(name.to_string()));
        }

        let schedule = TemperatureSchedule::parse(&std::fs::read_to_string(&path)?)?;
        debug!(schedule = name, setpoints = schedule.len(), "Loaded temperature schedule");
        Ok(schedule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fifo_order() {
        let mut schedule = TemperatureSchedule::new([280.0, 300.0, 320.0]);
        assert_eq!(schedule.peek(), Some(280.0));
        assert_eq!(schedule.pop(), Some(280.0));
        assert_eq!(schedule.pop(), Some(300.0));
        assert_eq!(schedule.remaining(), vec![320.0]);
        assert_eq!(schedule.pop(), Some(320.0));
        assert_eq!(schedule.pop(), None);
        assert!(schedule.is_empty());
    }

    #[test]
    fn test_parse_with_comments() {
        let schedule = TemperatureSchedule::parse("# ramp\n300\n\n  280 # hold\n260.5\n").unwrap();
        assert_eq!(schedule.remaining(), vec![300.0, 280.0, 260.5]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = TemperatureSchedule::parse("300\nwarm\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert!(TemperatureSchedule::parse("inf\n").is_err());
    }

    #[test]
    fn test_parse_rejects_non_positive_setpoints() {
        let err = TemperatureSchedule::parse("280\n-5\n").unwrap_err();
        assert!(matches!(err, DaqError::InvalidSchedule(_)));
        assert!(err.to_string().contains("line 2"));
        assert!(TemperatureSchedule::parse("0\n").is_err());
        assert_eq!(
            TemperatureSchedule::parse("0.5\n").unwrap().remaining(),
            vec![0.5]
        );
    }

    #[test]
    fn test_library_lists_and_loads() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("ramp"), "280\n300\n").unwrap();
        std::fs::write(dir.path().join("cooldown"), "300\n4\n").unwrap();
        std::fs::create_dir(dir.path().join("archive")).unwrap();

        let library = ScheduleLibrary::new(dir.path());
        assert_eq!(library.available().unwrap(), vec!["cooldown", "ramp"]);
        assert_eq!(library.load("ramp").unwrap().remaining(), vec![280.0, 300.0]);
    }

    #[test]
    fn test_library_rejects_unknown_and_escaping_names() {
        let dir = tempdir().unwrap();
        let library = ScheduleLibrary::new(dir.path());
        assert!(matches!(library.load("nope"), Err(DaqError::ScheduleNotFound(_))));
        assert!(matches!(
            library.load("../etc/passwd"),
            Err(DaqError::ScheduleNotFound(_))
        ));
        assert!(matches!(library.load(""), Err(DaqError::ScheduleNotFound(_))));
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempdir().unwrap();
        let library = ScheduleLibrary::new(dir.path().join("missing"));
        assert!(library.available().unwrap().is_empty());
    }
}
