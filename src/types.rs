use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Constantes del sistema
pub const NUM_CHANNELS: usize = 8; // emg1..emg8 del Myo
pub const SAMPLING_RATE: f64 = 200.0; // Hz, modo EMG raw
pub const RMS_WINDOW_SIZE: usize = 50; // ~250 ms a 200 Hz
pub const DEFAULT_COMPONENTS: usize = 2;
pub const DEFAULT_DEBOUNCE_THRESHOLD: usize = 5;

/// Una muestra multicanal con su índice monotónico y timestamp (segundos).
///
/// Se usa tanto para la muestra cruda como para la suavizada (RMS): misma
/// forma, mismo índice, mismo timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub index: u64,
    pub timestamp: f64,
    pub channels: Vec<f64>,
}

impl RawSample {
    pub fn new(index: u64, timestamp: f64, channels: Vec<f64>) -> Self {
        Self {
            index,
            timestamp,
            channels,
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Valor absoluto máximo entre todos los canales
    pub fn max_abs(&self) -> f64 {
        self.channels.iter().fold(0.0f64, |acc, v| acc.max(v.abs()))
    }
}

/// Vector de características: k componentes PCA/ICA
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub Vec<f64>);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<f64>> for FeatureVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

/// Gestos reconocidos
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GestureLabel {
    Idle,
    Extension,
    Flexion,
}

impl GestureLabel {
    pub const ALL: [GestureLabel; 3] = [
        GestureLabel::Idle,
        GestureLabel::Extension,
        GestureLabel::Flexion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GestureLabel::Idle => "idle",
            GestureLabel::Extension => "extension",
            GestureLabel::Flexion => "flexion",
        }
    }

    /// Intenta deducir la etiqueta a partir de un nombre de grabación,
    /// p.ej. `extension_03.csv` o `rec-flexion.csv`.
    pub fn from_recording_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|label| lower.contains(label.as_str()))
    }
}

impl fmt::Display for GestureLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("gesto desconocido '{0}'")]
pub struct UnknownLabel(pub String);

impl FromStr for GestureLabel {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "idle" | "rest" => Ok(GestureLabel::Idle),
            "extension" => Ok(GestureLabel::Extension),
            "flexion" => Ok(GestureLabel::Flexion),
            other => Err(UnknownLabel(other.to_string())),
        }
    }
}

/// Transición de gesto confirmada por el debounce
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureEvent {
    pub label: GestureLabel,
    /// Índice de la muestra en la que se confirmó
    pub index: u64,
    pub timestamp: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_parsing() {
        assert_eq!("Extension".parse::<GestureLabel>(), Ok(GestureLabel::Extension));
        assert_eq!(" flexion ".parse::<GestureLabel>(), Ok(GestureLabel::Flexion));
        assert_eq!("rest".parse::<GestureLabel>(), Ok(GestureLabel::Idle));
        let err = "wave".parse::<GestureLabel>().unwrap_err();
        assert_eq!(err.to_string(), "gesto desconocido 'wave'");
    }

    #[test]
    fn test_label_from_recording_name() {
        assert_eq!(
            GestureLabel::from_recording_name("recordings/Extension_02.csv"),
            Some(GestureLabel::Extension)
        );
        assert_eq!(GestureLabel::from_recording_name("session.csv"), None);
    }

    #[test]
    fn test_label_serde_lowercase() {
        let json = serde_json::to_string(&GestureLabel::Flexion).unwrap();
        assert_eq!(json, "\"flexion\"");
    }

    #[test]
    fn test_max_abs() {
        let sample = RawSample::new(0, 0.0, vec![1.0, -7.0, 3.0]);
        assert_eq!(sample.max_abs(), 7.0);
    }
}
