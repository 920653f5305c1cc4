//! Flujo de ajuste offline: grabaciones etiquetadas -> proyector -> SVM.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::classifier::Classifier;
use crate::error::FitError;
use crate::projector::{ProjectionKind, Projector, ProjectorParams};
use crate::recording::{ColumnSet, RecordingError, RecordingReader};
use crate::smoothing::Smoother;
use crate::svm::SvmParams;
use crate::types::{FeatureVector, GestureLabel, RawSample};

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error(transparent)]
    Recording(#[from] RecordingError),

    #[error(transparent)]
    Fit(#[from] FitError),
}

/// Una grabación cargada en memoria
#[derive(Debug, Clone)]
pub struct Recording {
    pub name: String,
    pub columns: Option<ColumnSet>,
    pub samples: Vec<RawSample>,
}

impl Recording {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RecordingError> {
        let path = path.as_ref();
        let mut reader = RecordingReader::open(path)?;
        let columns = reader.column_set();
        let mut samples = Vec::new();
        let mut index = 0u64;
        while let Some((timestamp, channels)) = reader.read_row()? {
            samples.push(RawSample::new(index, timestamp, channels));
            index += 1;
        }
        tracing::debug!(path = %path.display(), samples = samples.len(), "grabación cargada");
        Ok(Self {
            name: path.display().to_string(),
            columns,
            samples,
        })
    }

    /// Ya suavizada o ya proyectada: no se vuelve a aplicar RMS
    fn is_processed(&self) -> bool {
        matches!(self.columns, Some(ColumnSet::Rms(_)) | Some(ColumnSet::Components(_)))
    }

    /// Filas listas para ajustar: RMS con ventana nueva por grabación
    pub fn rows(&self, rms_window: Option<usize>) -> Vec<Vec<f64>> {
        match rms_window {
            Some(window) if !self.is_processed() => Smoother::smooth_all(true, window, &self.samples)
                .into_iter()
                .map(|s| s.channels)
                .collect(),
            _ => self.samples.iter().map(|s| s.channels.clone()).collect(),
        }
    }
}

/// Etiqueta -> grabaciones. Sólo existe durante el ajuste.
#[derive(Debug, Clone, Default)]
pub struct TrainingSet {
    recordings: BTreeMap<GestureLabel, Vec<Recording>>,
}

impl TrainingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, label: GestureLabel, recording: Recording) {
        self.recordings.entry(label).or_default().push(recording);
    }

    pub fn from_paths(paths: &[(GestureLabel, PathBuf)]) -> Result<Self, RecordingError> {
        let mut set = Self::new();
        for (label, path) in paths {
            set.add(*label, Recording::load(path)?);
        }
        Ok(set)
    }

    pub fn labels(&self) -> Vec<GestureLabel> {
        self.recordings.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (GestureLabel, &Recording)> {
        self.recordings
            .iter()
            .flat_map(|(label, recs)| recs.iter().map(move |r| (*label, r)))
    }

    pub fn names(&self) -> Vec<String> {
        self.iter().map(|(_, r)| r.name.clone()).collect()
    }

    pub fn sample_count(&self) -> usize {
        self.iter().map(|(_, r)| r.samples.len()).sum()
    }
}

/// `LABEL=ruta` o sólo `ruta` (etiqueta deducida del nombre del archivo)
pub fn parse_labeled_path(arg: &str) -> Result<(GestureLabel, PathBuf), String> {
    if let Some((label, path)) = arg.split_once('=') {
        let label = label.parse::<GestureLabel>().map_err(|e| e.to_string())?;
        return Ok((label, PathBuf::from(path)));
    }
    let path = PathBuf::from(arg);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    GestureLabel::from_recording_name(&name)
        .map(|label| (label, path))
        .ok_or_else(|| format!("cannot infer gesture label from '{}', use LABEL={}", arg, arg))
}

/// Ajusta un proyector sobre la concatenación de varias grabaciones
pub fn fit_projector(
    recordings: &[Recording],
    kind: ProjectionKind,
    params: &ProjectorParams,
    rms_window: Option<usize>,
) -> Result<Projector, TrainingError> {
    let mut data = Vec::new();
    for recording in recordings {
        if recording.samples.is_empty() {
            return Err(FitError::EmptyRecording {
                name: recording.name.clone(),
            }
            .into());
        }
        data.extend(recording.rows(rms_window));
    }

    let projector = Projector::fit(&data, kind, params)?;
    tracing::info!(
        kind = kind.as_str(),
        samples = data.len(),
        components = projector.output_dim(),
        "proyector ajustado"
    );
    Ok(projector)
}

pub fn fit_projector_from_paths(
    paths: &[PathBuf],
    kind: ProjectionKind,
    params: &ProjectorParams,
    rms_window: Option<usize>,
) -> Result<Projector, TrainingError> {
    let recordings = paths
        .iter()
        .map(Recording::load)
        .collect::<Result<Vec<_>, _>>()?;
    fit_projector(&recordings, kind, params, rms_window)
}

/// Vectores de características y etiquetas de todo el conjunto
pub fn feature_table(
    set: &TrainingSet,
    projector: Option<&Projector>,
    rms_window: Option<usize>,
) -> Result<(Vec<FeatureVector>, Vec<GestureLabel>), TrainingError> {
    let mut features = Vec::new();
    let mut labels = Vec::new();

    for (label, recording) in set.iter() {
        let already_projected = matches!(recording.columns, Some(ColumnSet::Components(_)));
        let rows = recording.rows(rms_window);
        if rows.is_empty() {
            return Err(FitError::EmptyRecording {
                name: recording.name.clone(),
            }
            .into());
        }

        for row in rows {
            let vector = match projector {
                Some(p) if !already_projected => p.transform(&row).map_err(|e| {
                    FitError::InconsistentDimensions {
                        expected: e.expected,
                        found: e.found,
                    }
                })?,
                _ => FeatureVector(row),
            };
            features.push(vector);
            labels.push(label);
        }
    }
    Ok((features, labels))
}

pub fn fit_classifier(
    set: &TrainingSet,
    projector: Option<&Projector>,
    rms_window: Option<usize>,
    params: &SvmParams,
) -> Result<Classifier, TrainingError> {
    let (features, labels) = feature_table(set, projector, rms_window)?;
    let classifier = Classifier::fit(&features, &labels, params)?;
    tracing::info!(
        samples = features.len(),
        labels = classifier.labels().len(),
        accuracy = training_accuracy(&classifier, &features, &labels),
        "clasificador ajustado"
    );
    Ok(classifier)
}

/// Fracción de aciertos sobre los propios datos de entrenamiento
pub fn training_accuracy(classifier: &Classifier, features: &[FeatureVector], labels: &[GestureLabel]) -> f64 {
    if features.is_empty() {
        return 0.0;
    }
    let correct = features
        .iter()
        .zip(labels)
        .filter(|(f, l)| classifier.predict(f).map(|p| p == **l).unwrap_or(false))
        .count();
    correct as f64 / features.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(name: &str, columns: Option<ColumnSet>, rows: Vec<Vec<f64>>) -> Recording {
        Recording {
            name: name.to_string(),
            columns,
            samples: rows
                .into_iter()
                .enumerate()
                .map(|(i, c)| RawSample::new(i as u64, i as f64 * 0.005, c))
                .collect(),
        }
    }

    #[test]
    fn test_parse_labeled_path() {
        assert_eq!(
            parse_labeled_path("flexion=rec/a.csv").unwrap(),
            (GestureLabel::Flexion, PathBuf::from("rec/a.csv"))
        );
        assert_eq!(
            parse_labeled_path("rec/extension_1.csv").unwrap().0,
            GestureLabel::Extension
        );
        assert!(parse_labeled_path("rec/session.csv").is_err());
        assert!(parse_labeled_path("wave=rec/a.csv").is_err());
    }

    #[test]
    fn test_rows_smooth_only_raw_recordings() {
        let raw = recording("raw", Some(ColumnSet::Raw(1)), vec![vec![3.0], vec![-3.0]]);
        assert_eq!(raw.rows(Some(4)), vec![vec![3.0], vec![3.0]]);
        assert_eq!(raw.rows(None), vec![vec![3.0], vec![-3.0]]);

        let rms = recording("rms", Some(ColumnSet::Rms(1)), vec![vec![3.0], vec![-3.0]]);
        assert_eq!(rms.rows(Some(4)), vec![vec![3.0], vec![-3.0]]);
    }

    #[test]
    fn test_empty_recording_is_rejected() {
        let mut set = TrainingSet::new();
        set.add(GestureLabel::Idle, recording("a", None, vec![vec![1.0]]));
        set.add(GestureLabel::Flexion, recording("empty", None, vec![]));
        let err = fit_classifier(&set, None, None, &SvmParams::default()).unwrap_err();
        assert!(matches!(
            err,
            TrainingError::Fit(FitError::EmptyRecording { ref name }) if name == "empty"
        ));
    }

    #[test]
    fn test_component_recordings_skip_projection() {
        let projector = Projector::from_parts(
            ProjectionKind::Pca,
            vec![0.0, 0.0, 0.0],
            vec![vec![1.0, 0.0, 0.0]],
            vec![1.0],
            1.0,
        )
        .unwrap();
        let mut set = TrainingSet::new();
        set.add(
            GestureLabel::Idle,
            recording("ca", Some(ColumnSet::Components(1)), vec![vec![0.5]]),
        );
        set.add(
            GestureLabel::Flexion,
            recording("raw", Some(ColumnSet::Raw(3)), vec![vec![2.0, 9.0, 9.0]]),
        );

        let (features, labels) = feature_table(&set, Some(&projector), None).unwrap();
        assert_eq!(features, vec![FeatureVector(vec![0.5]), FeatureVector(vec![2.0])]);
        assert_eq!(labels, vec![GestureLabel::Idle, GestureLabel::Flexion]);
    }
}
