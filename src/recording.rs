use std::fs::File;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, Terminator, WriterBuilder};
use thiserror::Error;

use crate::types::RawSample;

pub const TIMESTAMP_COLUMN: &str = "timestamp";

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("CSV error in {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("I/O error in {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path:?} has no valid header (expected 'timestamp,...')")]
    InvalidHeader { path: PathBuf },

    #[error("{path:?} row {row}: expected {expected} columns, got {found}")]
    ColumnCount {
        path: PathBuf,
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("{path:?} row {row}, column '{column}': invalid value '{value}'")]
    InvalidValue {
        path: PathBuf,
        row: usize,
        column: String,
        value: String,
    },
}

/// Conjunto de columnas de una grabación: define la cabecera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSet {
    /// emg1..emgN
    Raw(usize),
    /// rms1..rmsN
    Rms(usize),
    /// ca1..caK (componentes PCA/ICA)
    Components(usize),
}

impl ColumnSet {
    pub fn prefix(&self) -> &'static str {
        match self {
            ColumnSet::Raw(_) => "emg",
            ColumnSet::Rms(_) => "rms",
            ColumnSet::Components(_) => "ca",
        }
    }

    pub fn width(&self) -> usize {
        match *self {
            ColumnSet::Raw(n) | ColumnSet::Rms(n) | ColumnSet::Components(n) => n,
        }
    }

    pub fn header(&self) -> Vec<String> {
        let mut header = Vec::with_capacity(self.width() + 1);
        header.push(TIMESTAMP_COLUMN.to_string());
        header.extend((1..=self.width()).map(|i| format!("{}{}", self.prefix(), i)));
        header
    }

    /// Deduce el conjunto de columnas a partir de una cabecera leída.
    fn detect(columns: &[String]) -> Option<Self> {
        let n = columns.len();
        let all_with = |prefix: &str| {
            columns
                .iter()
                .enumerate()
                .all(|(i, c)| c == &format!("{}{}", prefix, i + 1))
        };
        if all_with("emg") {
            Some(ColumnSet::Raw(n))
        } else if all_with("rms") {
            Some(ColumnSet::Rms(n))
        } else if all_with("ca") {
            Some(ColumnSet::Components(n))
        } else {
            None
        }
    }
}

/// Lector fila a fila de una grabación `timestamp,<canales...>`.
pub struct RecordingReader {
    path: PathBuf,
    reader: csv::Reader<File>,
    columns: Vec<String>,
    column_set: Option<ColumnSet>,
    record: StringRecord,
    row: usize,
}

impl RecordingReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RecordingError> {
        let path = path.as_ref().to_path_buf();
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&path)
            .map_err(|source| RecordingError::Csv {
                path: path.clone(),
                source,
            })?;

        let headers = reader
            .headers()
            .map_err(|source| RecordingError::Csv {
                path: path.clone(),
                source,
            })?
            .clone();

        if headers.len() < 2 || &headers[0] != TIMESTAMP_COLUMN {
            return Err(RecordingError::InvalidHeader { path });
        }

        let columns: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();
        let column_set = ColumnSet::detect(&columns);

        Ok(Self {
            path,
            reader,
            columns,
            column_set,
            record: StringRecord::new(),
            row: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Número de canales (columnas sin contar el timestamp)
    pub fn channels(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// `None` si la cabecera no sigue ninguna convención conocida
    pub fn column_set(&self) -> Option<ColumnSet> {
        self.column_set
    }

    /// Lee la siguiente fila. `Ok(None)` al final del archivo.
    pub fn read_row(&mut self) -> Result<Option<(f64, Vec<f64>)>, RecordingError> {
        let has_row = self
            .reader
            .read_record(&mut self.record)
            .map_err(|source| RecordingError::Csv {
                path: self.path.clone(),
                source,
            })?;
        if !has_row {
            return Ok(None);
        }
        self.row += 1;

        let expected = self.columns.len() + 1;
        if self.record.len() != expected {
            return Err(RecordingError::ColumnCount {
                path: self.path.clone(),
                row: self.row,
                expected,
                found: self.record.len(),
            });
        }

        let timestamp = self.parse_field(0, TIMESTAMP_COLUMN)?;
        let mut values = Vec::with_capacity(self.columns.len());
        for i in 0..self.columns.len() {
            values.push(self.parse_field(i + 1, &self.columns[i])?);
        }

        Ok(Some((timestamp, values)))
    }

    fn parse_field(&self, idx: usize, column: &str) -> Result<f64, RecordingError> {
        let raw = &self.record[idx];
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| RecordingError::InvalidValue {
                path: self.path.clone(),
                row: self.row,
                column: column.to_string(),
                value: raw.to_string(),
            })
    }
}

/// Carga una grabación completa en memoria (flujo de ajuste offline).
pub fn load_recording(path: impl AsRef<Path>) -> Result<Vec<RawSample>, RecordingError> {
    let mut reader = RecordingReader::open(path)?;
    let mut samples = Vec::new();
    let mut index = 0u64;
    while let Some((timestamp, channels)) = reader.read_row()? {
        samples.push(RawSample::new(index, timestamp, channels));
        index += 1;
    }
    Ok(samples)
}

/// Escritor de grabaciones. Cada fila: timestamp + valores.
pub struct RecordingWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
    width: usize,
    rows: u64,
}

impl RecordingWriter {
    pub fn create(path: impl AsRef<Path>, columns: ColumnSet) -> Result<Self, RecordingError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| RecordingError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut writer = WriterBuilder::new()
            .terminator(Terminator::Any(b'\n'))
            .from_path(&path)
            .map_err(|source| RecordingError::Csv {
                path: path.clone(),
                source,
            })?;

        writer
            .write_record(columns.header())
            .map_err(|source| RecordingError::Csv {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            writer,
            width: columns.width(),
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn write_row(&mut self, timestamp: f64, values: &[f64]) -> Result<(), RecordingError> {
        if values.len() != self.width {
            return Err(RecordingError::ColumnCount {
                path: self.path.clone(),
                row: self.rows as usize + 1,
                expected: self.width + 1,
                found: values.len() + 1,
            });
        }

        let mut record = Vec::with_capacity(values.len() + 1);
        record.push(timestamp.to_string());
        record.extend(values.iter().map(|v| v.to_string()));

        self.writer
            .write_record(&record)
            .map_err(|source| RecordingError::Csv {
                path: self.path.clone(),
                source,
            })?;
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), RecordingError> {
        self.writer.flush().map_err(|source| RecordingError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(
            ColumnSet::Raw(3).header(),
            vec!["timestamp", "emg1", "emg2", "emg3"]
        );
        assert_eq!(ColumnSet::Components(2).header(), vec!["timestamp", "ca1", "ca2"]);
    }

    #[test]
    fn test_read_raw_recording() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "rec.csv",
            "timestamp,emg1,emg2\n0.005,1,-2\n0.010,3,4\n",
        );

        let samples = load_recording(&path).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].channels, vec![1.0, -2.0]);
        assert_eq!(samples[1].index, 1);
        assert_eq!(samples[1].timestamp, 0.010);

        let reader = RecordingReader::open(&path).unwrap();
        assert_eq!(reader.column_set(), Some(ColumnSet::Raw(2)));
    }

    #[test]
    fn test_rejects_missing_timestamp_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "bad.csv", "emg1,emg2\n1,2\n");
        assert!(matches!(
            RecordingReader::open(&path),
            Err(RecordingError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "bad.csv", "timestamp,emg1\n0,abc\n");
        let err = load_recording(&path).unwrap_err();
        assert!(matches!(err, RecordingError::InvalidValue { row: 1, .. }));
    }

    #[test]
    fn test_writer_roundtrip_formatting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/rec.csv");
        let mut writer = RecordingWriter::create(&path, ColumnSet::Raw(2)).unwrap();
        writer.write_row(1.0, &[0.0, -12.0]).unwrap();
        writer.write_row(1.005, &[0.25, 3.0]).unwrap();
        writer.flush().unwrap();
        drop(writer);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "timestamp,emg1,emg2\n1,0,-12\n1.005,0.25,3\n");
    }

    #[test]
    fn test_writer_rejects_wrong_width() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            RecordingWriter::create(dir.path().join("w.csv"), ColumnSet::Components(2)).unwrap();
        assert!(writer.write_row(0.0, &[1.0]).is_err());
    }
}
