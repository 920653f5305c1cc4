use thiserror::Error;

use crate::consumer::ConsumerError;
use crate::model_store::LoadError;
use crate::source::SourceError;
use crate::training::TrainingError;

/// Error de ajuste offline (PCA/ICA/SVM). Nunca se persiste un modelo parcial.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("insufficient samples: {samples} samples for {components} components")]
    InsufficientSamples { samples: usize, components: usize },

    #[error("cannot extract {components} components from {dims}-dimensional data")]
    TooManyComponents { components: usize, dims: usize },

    #[error("rank-deficient data: rank {rank} < {components} requested components")]
    RankDeficient { rank: usize, components: usize },

    #[error("inconsistent dimensions: expected {expected}, got {found}")]
    InconsistentDimensions { expected: usize, found: usize },

    #[error("need at least two distinct gesture labels, found {found}")]
    NotEnoughClasses { found: usize },

    #[error("recording '{name}' yields no feature vectors")]
    EmptyRecording { name: String },

    #[error("labels and samples differ in length ({labels} labels, {samples} samples)")]
    LabelCount { labels: usize, samples: usize },
}

/// El número de canales de una muestra no coincide con lo que espera la etapa.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("dimension mismatch in {stage}: expected {expected}, got {found}")]
pub struct DimensionMismatch {
    pub stage: &'static str,
    pub expected: usize,
    pub found: usize,
}

/// Fallo terminal del pipeline (lo que ve el usuario)
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("source failure: {0}")]
    Source(#[from] SourceError),

    #[error("model load failure: {0}")]
    Load(#[from] LoadError),

    #[error("model fit failure: {0}")]
    Fit(#[from] FitError),

    #[error("training failure: {0}")]
    Training(#[from] TrainingError),

    #[error(transparent)]
    Dimension(#[from] DimensionMismatch),

    #[error("consumer '{name}' failed: {source}")]
    Consumer {
        name: String,
        #[source]
        source: ConsumerError,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}
