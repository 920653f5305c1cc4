use std::path::{Path, PathBuf};

use crate::consumer::{Consumer, ConsumerError};
use crate::recording::{ColumnSet, RecordingWriter};
use crate::types::{FeatureVector, GestureEvent, RawSample};

/// Graba lo que sale del pipeline: componentes si hay proyector, si no la
/// muestra (cruda o suavizada). El archivo se crea con la primera muestra.
pub struct RecordingConsumer {
    path: PathBuf,
    smoothed: bool,
    writer: Option<RecordingWriter>,
}

impl RecordingConsumer {
    /// `smoothed` elige la cabecera `rms` en lugar de `emg`
    pub fn new(path: impl AsRef<Path>, smoothed: bool) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            smoothed,
            writer: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> u64 {
        self.writer.as_ref().map(RecordingWriter::rows).unwrap_or(0)
    }

    fn column_set(&self, sample: &RawSample, features: Option<&FeatureVector>) -> ColumnSet {
        match features {
            Some(f) => ColumnSet::Components(f.len()),
            None if self.smoothed => ColumnSet::Rms(sample.len()),
            None => ColumnSet::Raw(sample.len()),
        }
    }
}

impl Consumer for RecordingConsumer {
    fn name(&self) -> &str {
        "recorder"
    }

    fn on_sample(
        &mut self,
        sample: &RawSample,
        features: Option<&FeatureVector>,
        _event: Option<&GestureEvent>,
    ) -> Result<(), ConsumerError> {
        if self.writer.is_none() {
            let columns = self.column_set(sample, features);
            let writer = RecordingWriter::create(&self.path, columns)?;
            tracing::info!(path = %self.path.display(), ?columns, "grabando");
            self.writer = Some(writer);
        }

        if let Some(writer) = self.writer.as_mut() {
            let values = match features {
                Some(f) => f.as_slice(),
                None => sample.channels.as_slice(),
            };
            writer.write_row(sample.timestamp, values)?;
        }
        Ok(())
    }

    fn on_fault(&mut self, cause: &str) {
        tracing::warn!(path = %self.path.display(), cause, "grabación interrumpida");
    }

    fn finish(&mut self) -> Result<(), ConsumerError> {
        match self.writer.as_mut() {
            Some(writer) => {
                writer.flush()?;
                tracing::info!(path = %self.path.display(), rows = writer.rows(), "grabación cerrada");
            }
            None => tracing::debug!(path = %self.path.display(), "grabación vacía, sin archivo"),
        }
        Ok(())
    }
}
