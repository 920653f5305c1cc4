//! Clasificador SVM multiclase (uno contra el resto) sobre vectores de
//! componentes, más el antirrebote que convierte la etiqueta instantánea
//! en eventos de gesto confirmados.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{DimensionMismatch, FitError};
use crate::svm::{BinarySvm, Kernel, SvmParams};
use crate::types::{FeatureVector, GestureEvent, GestureLabel, DEFAULT_DEBOUNCE_THRESHOLD};

/// Una máquina binaria: `label` contra todas las demás
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelMachine {
    pub label: GestureLabel,
    pub svm: BinarySvm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classifier {
    kernel: Kernel,
    input_dim: usize,
    machines: Vec<LabelMachine>,
}

impl Classifier {
    /// Ajusta una SVM por etiqueta presente en `labels`.
    pub fn fit(
        features: &[FeatureVector],
        labels: &[GestureLabel],
        params: &SvmParams,
    ) -> Result<Self, FitError> {
        if features.len() != labels.len() {
            return Err(FitError::LabelCount {
                labels: labels.len(),
                samples: features.len(),
            });
        }

        let classes: BTreeSet<GestureLabel> = labels.iter().copied().collect();
        if classes.len() < 2 {
            return Err(FitError::NotEnoughClasses {
                found: classes.len(),
            });
        }

        let input_dim = features[0].len();
        if let Some(bad) = features.iter().find(|f| f.len() != input_dim) {
            return Err(FitError::InconsistentDimensions {
                expected: input_dim,
                found: bad.len(),
            });
        }
        if input_dim == 0 {
            return Err(FitError::InconsistentDimensions {
                expected: 1,
                found: 0,
            });
        }

        let x: Vec<Vec<f64>> = features.iter().map(|f| f.0.clone()).collect();
        let kernel = params.resolve_kernel(&x);

        let machines = classes
            .into_iter()
            .map(|label| {
                let y: Vec<f64> = labels
                    .iter()
                    .map(|l| if *l == label { 1.0 } else { -1.0 })
                    .collect();
                let svm = BinarySvm::train(&x, &y, &kernel, params);
                tracing::debug!(
                    label = label.as_str(),
                    support_vectors = svm.support_vectors.len(),
                    "SVM ajustada"
                );
                LabelMachine { label, svm }
            })
            .collect();

        Ok(Self {
            kernel,
            input_dim,
            machines,
        })
    }

    pub fn from_parts(
        kernel: Kernel,
        input_dim: usize,
        machines: Vec<LabelMachine>,
    ) -> Result<Self, String> {
        let classifier = Self {
            kernel,
            input_dim,
            machines,
        };
        classifier.validate()?;
        Ok(classifier)
    }

    /// Comprueba la coherencia de un clasificador deserializado
    pub fn validate(&self) -> Result<(), String> {
        if self.input_dim == 0 {
            return Err("classifier input dimension is zero".to_string());
        }
        if self.machines.len() < 2 {
            return Err(format!(
                "classifier needs at least two labels, has {}",
                self.machines.len()
            ));
        }
        let distinct: BTreeSet<GestureLabel> = self.machines.iter().map(|m| m.label).collect();
        if distinct.len() != self.machines.len() {
            return Err("duplicate label in classifier".to_string());
        }
        if let Kernel::Rbf { gamma } = self.kernel {
            if !(gamma.is_finite() && gamma > 0.0) {
                return Err(format!("invalid RBF gamma {}", gamma));
            }
        }
        for machine in &self.machines {
            machine
                .svm
                .validate(self.input_dim)
                .map_err(|e| format!("{}: {}", machine.label, e))?;
        }
        Ok(())
    }

    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn labels(&self) -> Vec<GestureLabel> {
        self.machines.iter().map(|m| m.label).collect()
    }

    pub fn machines(&self) -> &[LabelMachine] {
        &self.machines
    }

    fn check_dim(&self, features: &FeatureVector) -> Result<(), DimensionMismatch> {
        if features.len() != self.input_dim {
            return Err(DimensionMismatch {
                stage: "classifier",
                expected: self.input_dim,
                found: features.len(),
            });
        }
        Ok(())
    }

    /// Valor de decisión de cada máquina
    pub fn decision_values(
        &self,
        features: &FeatureVector,
    ) -> Result<Vec<(GestureLabel, f64)>, DimensionMismatch> {
        self.check_dim(features)?;
        Ok(self
            .machines
            .iter()
            .map(|m| (m.label, m.svm.decision(&self.kernel, features.as_slice())))
            .collect())
    }

    /// Etiqueta con el mayor valor de decisión. Empates: la primera en orden.
    pub fn predict(&self, features: &FeatureVector) -> Result<GestureLabel, DimensionMismatch> {
        let values = self.decision_values(features)?;
        let mut best = values[0];
        for &(label, value) in &values[1..] {
            if value > best.1 {
                best = (label, value);
            }
        }
        Ok(best.0)
    }
}

/// Estado observable del antirrebote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    /// Estable en reposo, sin candidato
    Idle,
    /// Estable en un gesto, sin candidato
    ConfirmedGesture,
    /// Hay un candidato acumulando confirmaciones
    PendingCandidate,
}

impl DebounceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DebounceState::Idle => "Idle",
            DebounceState::ConfirmedGesture => "ConfirmedGesture",
            DebounceState::PendingCandidate => "PendingCandidate",
        }
    }
}

/// Antirrebote: una etiqueta distinta de la estable sólo se acepta tras
/// `threshold` predicciones consecutivas iguales. La vuelta a reposo
/// necesita la misma confirmación.
#[derive(Debug, Clone)]
pub struct Debouncer {
    threshold: usize,
    stable: GestureLabel,
    candidate: Option<(GestureLabel, usize)>,
}

impl Debouncer {
    /// Umbral 0 se trata como 1
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            stable: GestureLabel::Idle,
            candidate: None,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn stable_label(&self) -> GestureLabel {
        self.stable
    }

    pub fn candidate(&self) -> Option<(GestureLabel, usize)> {
        self.candidate
    }

    pub fn state(&self) -> DebounceState {
        match (self.candidate, self.stable) {
            (Some(_), _) => DebounceState::PendingCandidate,
            (None, GestureLabel::Idle) => DebounceState::Idle,
            (None, _) => DebounceState::ConfirmedGesture,
        }
    }

    /// Procesa una predicción. Devuelve un evento sólo al promover un
    /// candidato a etiqueta estable.
    pub fn update(&mut self, label: GestureLabel, index: u64, timestamp: f64) -> Option<GestureEvent> {
        if label == self.stable {
            self.candidate = None;
            return None;
        }

        let count = match self.candidate {
            Some((candidate, count)) if candidate == label => count + 1,
            _ => 1,
        };

        if count >= self.threshold {
            self.stable = label;
            self.candidate = None;
            return Some(GestureEvent {
                label,
                index,
                timestamp,
            });
        }

        self.candidate = Some((label, count));
        None
    }

    pub fn reset(&mut self) {
        self.stable = GestureLabel::Idle;
        self.candidate = None;
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_THRESHOLD)
    }
}

/// Clasificador + antirrebote: la etapa final del pipeline
pub struct DebouncedClassifier {
    classifier: Classifier,
    debouncer: Debouncer,
}

impl DebouncedClassifier {
    pub fn new(classifier: Classifier, threshold: usize) -> Self {
        Self {
            classifier,
            debouncer: Debouncer::new(threshold),
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn debouncer(&self) -> &Debouncer {
        &self.debouncer
    }

    /// Clasifica y pasa por el antirrebote. Devuelve la etiqueta cruda y,
    /// si procede, el evento confirmado.
    pub fn update(
        &mut self,
        features: &FeatureVector,
        index: u64,
        timestamp: f64,
    ) -> Result<(GestureLabel, Option<GestureEvent>), DimensionMismatch> {
        let label = self.classifier.predict(features)?;
        let event = self.debouncer.update(label, index, timestamp);
        Ok((label, event))
    }

    /// Sustituye el modelo; el antirrebote empieza de cero
    pub fn replace(&mut self, classifier: Classifier) {
        self.classifier = classifier;
        self.debouncer.reset();
    }

    pub fn reset(&mut self) {
        self.debouncer.reset();
    }
}
