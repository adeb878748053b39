use ndarray::Array2;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::{ModalityReader, ProbeInfo, ReaderKind, SampleRate, TimedSamples, WindowData, check_window};
use crate::error::{Result, SyncError};

/// Delimited text signal: one row per sample.
///
/// Regular vectors read one column (`key`, default 0). Timestamped files carry
/// milliseconds since file start in column 0; `TimestampedMatrix` reads one
/// value column (`key`, default 1), `MultiColumnTimestamped` all of them.
pub struct TextSignalReader {
    path: PathBuf,
    kind: ReaderKind,
    column: Option<usize>,
    reader: BufReader<File>,
    probe: Option<ProbeInfo>,
    rows: Option<ParsedRows>,
}

struct ParsedRows {
    times: Vec<f64>,
    values: Array2<f64>,
}

impl TextSignalReader {
    pub fn open(path: &Path, kind: ReaderKind, key: Option<&str>) -> Result<Self> {
        let column = match key {
            Some(k) => Some(k.trim().parse::<usize>().map_err(|_| {
                SyncError::InvalidConfig(format!("text column key '{}' is not a column index", k))
            })?),
            None => None,
        };
        if kind.is_irregular() && column == Some(0) {
            return Err(SyncError::InvalidConfig(
                "column 0 holds timestamps in timestamped text files".to_string(),
            ));
        }

        let file = File::open(path).map_err(|e| SyncError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            kind,
            column,
            reader: BufReader::new(file),
            probe: None,
            rows: None,
        })
    }

    fn rewind(&mut self) -> Result<()> {
        self.reader
            .seek(SeekFrom::Start(0))
            .map(|_| ())
            .map_err(|e| SyncError::io(&self.path, e))
    }

    /// Iterate numeric rows of the file, skipping blank, comment and header lines.
    fn for_each_row(&mut self, mut f: impl FnMut(&[f64]) -> Result<()>) -> Result<()> {
        self.rewind()?;
        let mut line = String::new();
        let mut fields = Vec::new();
        let mut seen_data = false;
        let mut line_no = 0usize;
        loop {
            line.clear();
            let n = self
                .reader
                .read_line(&mut line)
                .map_err(|e| SyncError::io(&self.path, e))?;
            if n == 0 {
                break;
            }
            line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            fields.clear();
            let mut numeric = true;
            for token in trimmed
                .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
                .filter(|t| !t.is_empty())
            {
                match token.parse::<f64>() {
                    Ok(v) => fields.push(v),
                    Err(_) => {
                        numeric = false;
                        break;
                    }
                }
            }
            if !numeric {
                if seen_data {
                    return Err(SyncError::decode(
                        &self.path,
                        format!("non-numeric value on line {}", line_no),
                    ));
                }
                // header
                continue;
            }
            seen_data = true;
            f(&fields)?;
        }
        Ok(())
    }

    fn value_columns(&self, width: usize) -> Result<std::ops::Range<usize>> {
        let range = match (self.kind, self.column) {
            (ReaderKind::MultiColumnTimestamped, _) => 1..width,
            (_, Some(c)) => c..c + 1,
            (ReaderKind::TimestampedMatrix, None) => 1..2,
            (_, None) => 0..1,
        };
        if range.is_empty() || range.end > width {
            return Err(SyncError::decode(
                &self.path,
                format!("rows have {} columns, need columns {:?}", width, range),
            ));
        }
        Ok(range)
    }

    fn rows(&mut self) -> Result<&ParsedRows> {
        if self.rows.is_none() {
            let irregular = self.kind.is_irregular();
            let mut times = Vec::new();
            let mut flat = Vec::new();
            let mut columns: Option<std::ops::Range<usize>> = None;
            let mut width = 0usize;

            let mut parsed = Vec::new();
            self.for_each_row(|row| {
                parsed.push(row.to_vec());
                Ok(())
            })?;

            for row in &parsed {
                let range = match &columns {
                    Some(r) => r.clone(),
                    None => {
                        let r = self.value_columns(row.len())?;
                        width = r.len();
                        columns = Some(r.clone());
                        r
                    }
                };
                if row.len() < range.end {
                    return Err(SyncError::decode(&self.path, "ragged rows"));
                }
                if irregular {
                    times.push(row[0] / 1000.0);
                }
                flat.extend_from_slice(&row[range]);
            }

            let rows = flat.len().checked_div(width).unwrap_or(0);
            let values = Array2::from_shape_vec((rows, width.max(1)), flat)
                .map_err(|e| SyncError::decode(&self.path, e))?;
            self.rows = Some(ParsedRows { times, values });
        }
        self.rows
            .as_ref()
            .ok_or_else(|| SyncError::decode(&self.path, "rows not loaded"))
    }
}

impl ModalityReader for TextSignalReader {
    fn path(&self) -> &Path {
        &self.path
    }

    fn probe(&mut self) -> Result<ProbeInfo> {
        if let Some(info) = &self.probe {
            return Ok(info.clone());
        }

        let mut count = 0u64;
        let mut width = 0usize;
        let mut last_time = None;
        self.for_each_row(|row| {
            if count == 0 {
                width = row.len();
            }
            count += 1;
            last_time = row.first().copied();
            Ok(())
        })?;

        let channels = if count == 0 { 1 } else { self.value_columns(width)?.len() };
        let info = if self.kind.is_irregular() {
            ProbeInfo {
                sample_count: count,
                rate: SampleRate::Irregular,
                channels,
                duration_hint: Some(last_time.map(|t| t / 1000.0).unwrap_or(0.0)),
            }
        } else {
            ProbeInfo {
                sample_count: count,
                rate: SampleRate::Unknown,
                channels,
                duration_hint: None,
            }
        };
        self.probe = Some(info.clone());
        Ok(info)
    }

    fn read_window(&mut self, start: u64, length: u64) -> Result<WindowData> {
        let path = self.path.clone();
        let rows = self.rows()?;
        check_window(&path, start, length, rows.values.nrows() as u64)?;
        let (s, e) = (start as usize, (start + length) as usize);
        Ok(WindowData::Signal(rows.values.slice(ndarray::s![s..e, ..]).to_owned()))
    }

    fn read_window_by_time(&mut self, start: f64, end: f64) -> Result<TimedSamples> {
        if !self.kind.is_irregular() {
            return Err(SyncError::unsupported(
                &self.path,
                "regular text vectors carry no time column",
            ));
        }
        let rows = self.rows()?;
        let first = rows.times.partition_point(|t| *t < start);
        let last = rows.times.partition_point(|t| *t < end);
        if last <= first {
            return Ok(TimedSamples::empty(rows.values.ncols()));
        }
        Ok(TimedSamples {
            times: rows.times[first..last].to_vec(),
            values: rows.values.slice(ndarray::s![first..last, ..]).to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn regular_vector_reads_selected_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "a.txt", "a b\n1 10\n2 20\n3 30\n4 40\n");

        let mut reader = TextSignalReader::open(&path, ReaderKind::RegularVector, Some("1")).unwrap();
        let info = reader.probe().unwrap();
        assert_eq!(info.sample_count, 4);
        assert_eq!(info.rate, SampleRate::Unknown);

        let WindowData::Signal(values) = reader.read_window(1, 2).unwrap() else {
            panic!("expected signal");
        };
        assert_eq!(values.column(0).to_vec(), vec![20.0, 30.0]);

        let err = reader.read_window(3, 2).unwrap_err();
        assert!(matches!(err, SyncError::OutOfRange { sample_count: 4, .. }));
    }

    #[test]
    fn timestamped_matrix_reads_by_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "b.csv", "0,1.5\n400,2.5\n1000,3.5\n2500,4.5\n");

        let mut reader = TextSignalReader::open(&path, ReaderKind::TimestampedMatrix, None).unwrap();
        let info = reader.probe().unwrap();
        assert_eq!(info.rate, SampleRate::Irregular);
        assert_eq!(info.duration_hint, Some(2.5));

        let window = reader.read_window_by_time(0.4, 2.5).unwrap();
        assert_eq!(window.times, vec![0.4, 1.0]);
        assert_eq!(window.values.column(0).to_vec(), vec![2.5, 3.5]);

        assert!(reader.read_window_by_time(3.0, 4.0).unwrap().is_empty());
    }

    #[test]
    fn multi_column_keeps_every_value_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "c.txt", "0 1 2 3\n10 4 5 6\n");

        let mut reader = TextSignalReader::open(&path, ReaderKind::MultiColumnTimestamped, None).unwrap();
        assert_eq!(reader.probe().unwrap().channels, 3);
        let window = reader.read_window_by_time(0.0, 1.0).unwrap();
        assert_eq!(window.values.shape(), &[2, 3]);
    }
}
