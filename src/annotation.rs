//! Cursor stamps and `TS1 - TS2` annotation lines.
//!
//! A stamp is written either as an absolute datetime
//! (`2021-03-02T09:33:56.250`) or as `chunkIndex_sampleIndex` (`3_1500`).
//! Both describe the same cursor and can be converted into each other
//! through the controller.

use chrono::{DateTime, FixedOffset};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Result, SyncError};
use crate::navigation::Cursor;
use crate::timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampEncoding {
    DateTime,
    ChunkSample,
}

impl FromStr for StampEncoding {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "datetime" | "time" => Ok(StampEncoding::DateTime),
            "chunk" | "index" | "chunk_sample" => Ok(StampEncoding::ChunkSample),
            other => Err(SyncError::InvalidConfig(format!("unknown stamp encoding '{}'", other))),
        }
    }
}

/// One end of an annotation interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stamp {
    Time(DateTime<FixedOffset>),
    Index { chunk_index: usize, sample_index: u64 },
}

impl Stamp {
    pub fn from_cursor(cursor: &Cursor, encoding: StampEncoding) -> Self {
        match encoding {
            StampEncoding::DateTime => Stamp::Time(cursor.absolute_time),
            StampEncoding::ChunkSample => Stamp::Index {
                chunk_index: cursor.chunk_index,
                sample_index: cursor.sample_index,
            },
        }
    }

    /// Parse either encoding. Datetimes without offset use `tz`.
    pub fn parse(value: &str, tz: FixedOffset) -> Result<Self> {
        let value = value.trim();
        if let Some((chunk, sample)) = value.split_once('_') {
            if let (Ok(chunk_index), Ok(sample_index)) = (chunk.parse(), sample.parse()) {
                return Ok(Stamp::Index {
                    chunk_index,
                    sample_index,
                });
            }
        }
        timestamp::parse_datetime(value, tz).map(Stamp::Time)
    }

    fn sort_key(&self) -> (i64, i64) {
        match self {
            Stamp::Time(t) => (t.timestamp(), t.timestamp_subsec_micros() as i64),
            Stamp::Index {
                chunk_index,
                sample_index,
            } => (*chunk_index as i64, *sample_index as i64),
        }
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stamp::Time(t) => f.write_str(&timestamp::format_datetime(*t)),
            Stamp::Index {
                chunk_index,
                sample_index,
            } => write!(f, "{}_{}", chunk_index, sample_index),
        }
    }
}

/// Both encodings of one cursor.
pub fn stamps(cursor: &Cursor) -> (String, String) {
    (
        Stamp::from_cursor(cursor, StampEncoding::DateTime).to_string(),
        Stamp::from_cursor(cursor, StampEncoding::ChunkSample).to_string(),
    )
}

/// An annotated interval, always ordered `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub start: Stamp,
    pub end: Stamp,
}

impl Interval {
    /// Build an interval; ends given in reverse order are swapped.
    /// Both ends must use the same encoding.
    pub fn new(a: Stamp, b: Stamp) -> Result<Self> {
        if std::mem::discriminant(&a) != std::mem::discriminant(&b) {
            return Err(SyncError::InvalidConfig(format!(
                "interval mixes stamp encodings: {} - {}",
                a, b
            )));
        }
        if b.sort_key() < a.sort_key() {
            Ok(Self { start: b, end: a })
        } else {
            Ok(Self { start: a, end: b })
        }
    }

    pub fn from_cursors(a: &Cursor, b: &Cursor, encoding: StampEncoding) -> Result<Self> {
        Self::new(Stamp::from_cursor(a, encoding), Stamp::from_cursor(b, encoding))
    }

    /// Parse a `TS1 - TS2` line.
    pub fn parse_line(line: &str, tz: FixedOffset) -> Result<Self> {
        let (a, b) = line
            .split_once(" - ")
            .ok_or_else(|| SyncError::InvalidConfig(format!("not an interval line: '{}'", line.trim())))?;
        Self::new(Stamp::parse(a, tz)?, Stamp::parse(b, tz)?)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.start, self.end)
    }
}

/// Append one interval line to an annotation file, creating it if needed.
pub fn append_interval(path: &Path, interval: &Interval) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| SyncError::io(path, e))?;
    writeln!(file, "{}", interval).map_err(|e| SyncError::io(path, e))
}

/// Read every interval of an annotation file. Blank lines are skipped.
pub fn read_intervals(path: &Path, tz: FixedOffset) -> Result<Vec<Interval>> {
    let content = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| Interval::parse_line(line, tz))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::utc_offset;

    fn cursor(chunk_index: usize, sample_index: u64, t: &str) -> Cursor {
        Cursor {
            absolute_time: timestamp::parse_datetime(t, utc_offset()).unwrap(),
            chunk_index,
            sample_index,
        }
    }

    #[test]
    fn both_encodings_of_a_cursor() {
        let c = cursor(3, 1500, "2021-03-02T09:33:56.250");
        let (time, index) = stamps(&c);
        assert_eq!(time, "2021-03-02T09:33:56.250");
        assert_eq!(index, "3_1500");
    }

    #[test]
    fn reversed_interval_is_swapped() {
        let a = cursor(1, 20, "2021-03-02T10:00:00");
        let b = cursor(0, 700, "2021-03-02T09:59:00");
        let interval = Interval::from_cursors(&a, &b, StampEncoding::ChunkSample).unwrap();
        assert_eq!(interval.to_string(), "0_700 - 1_20");
        let interval = Interval::from_cursors(&a, &b, StampEncoding::DateTime).unwrap();
        assert_eq!(
            interval.to_string(),
            "2021-03-02T09:59:00.000 - 2021-03-02T10:00:00.000"
        );
    }

    #[test]
    fn parses_lines_back() {
        let tz = utc_offset();
        let line = "2021-03-02T09:59:00.500 - 2021-03-02T10:00:00.000";
        let interval = Interval::parse_line(line, tz).unwrap();
        assert_eq!(interval.to_string(), line);

        let interval = Interval::parse_line("2_10 - 2_4", tz).unwrap();
        assert_eq!(interval.to_string(), "2_4 - 2_10");

        assert!(Interval::parse_line("2_10", tz).is_err());
        assert!(Interval::parse_line("2_10 - 2021-03-02T10:00:00", tz).is_err());
    }

    #[test]
    fn appends_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.txt");
        let tz = utc_offset();
        append_interval(&path, &Interval::parse_line("0_1 - 0_5", tz).unwrap()).unwrap();
        append_interval(&path, &Interval::parse_line("1_0 - 1_9", tz).unwrap()).unwrap();
        let read = read_intervals(&path, tz).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[1].to_string(), "1_0 - 1_9");
    }
}
