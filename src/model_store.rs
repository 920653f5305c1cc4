//! Artefactos de modelo versionados (JSON).
//!
//! Un artefacto lleva cabecera (`format_version`, `kind`), fecha de ajuste,
//! eco de la configuración de entrenamiento y el bloque de parámetros. Al
//! cargar se valida en orden: JSON, versión, tipo, parámetros.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classifier::Classifier;
use crate::projector::{ProjectionKind, Projector};
use crate::svm::SvmParams;

/// Versión de formato que escribe y acepta este binario
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Pca,
    Ica,
    Svm,
}

impl ModelKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ModelKind::Pca => "pca",
            ModelKind::Ica => "ica",
            ModelKind::Svm => "svm",
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl From<ProjectionKind> for ModelKind {
    fn from(kind: ProjectionKind) -> Self {
        match kind {
            ProjectionKind::Pca => ModelKind::Pca,
            ProjectionKind::Ica => ModelKind::Ica,
        }
    }
}

/// Eco de la configuración con la que se ajustó el modelo
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub components: Option<usize>,
    /// `None`: ajustado sin suavizado RMS
    pub rms_window: Option<usize>,
    pub seed: Option<u64>,
    pub recordings: Vec<String>,
    pub samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub svm: Option<SvmParams>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact<P> {
    pub format_version: u32,
    pub kind: ModelKind,
    pub fitted_at: String,
    pub training: TrainingConfig,
    pub params: P,
}

/// Cabecera mínima, lo primero que se valida al cargar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ArtifactHeader {
    pub format_version: u32,
    pub kind: ModelKind,
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("cannot read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed model artifact: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("unsupported format version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("expected a {expected} model, found '{found}'")]
    KindMismatch { expected: &'static str, found: ModelKind },

    #[error("invalid model parameters: {0}")]
    InvalidParameters(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cannot write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot serialize model: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("artifact {0:?} already exists")]
    AlreadyExists(PathBuf),
}

/// Un modelo persistible
pub trait Model: Serialize + DeserializeOwned {
    /// Nombre para mensajes de error ("projector", "classifier")
    const NAME: &'static str;

    fn model_kind(&self) -> ModelKind;

    fn accepts(kind: ModelKind) -> bool;

    /// Validación de forma y valores tras deserializar
    fn check(&self, kind: ModelKind) -> Result<(), String>;
}

impl Model for Projector {
    const NAME: &'static str = "projector";

    fn model_kind(&self) -> ModelKind {
        self.kind().into()
    }

    fn accepts(kind: ModelKind) -> bool {
        matches!(kind, ModelKind::Pca | ModelKind::Ica)
    }

    fn check(&self, kind: ModelKind) -> Result<(), String> {
        if self.model_kind() != kind {
            return Err(format!(
                "header says '{}' but parameters are '{}'",
                kind,
                self.model_kind()
            ));
        }
        self.validate()
    }
}

impl Model for Classifier {
    const NAME: &'static str = "classifier";

    fn model_kind(&self) -> ModelKind {
        ModelKind::Svm
    }

    fn accepts(kind: ModelKind) -> bool {
        kind == ModelKind::Svm
    }

    fn check(&self, _kind: ModelKind) -> Result<(), String> {
        self.validate()
    }
}

/// `<%Y%m%d-%H%M%S>_model.<kind>`
pub fn artifact_filename(kind: ModelKind, fitted_at: &DateTime<Local>) -> String {
    format!("{}_model.{}", fitted_at.format("%Y%m%d-%H%M%S"), kind.extension())
}

/// Crea `path` (nunca sobrescribe) y escribe en él. Si la escritura falla
/// se borra el archivo a medias.
fn write_new(
    path: &Path,
    write: impl FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
) -> Result<(), StoreError> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|source| {
            if source.kind() == std::io::ErrorKind::AlreadyExists {
                StoreError::AlreadyExists(path.to_path_buf())
            } else {
                StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

    let mut writer = BufWriter::new(file);
    let written = write(&mut writer).and_then(|_| writer.flush());
    drop(writer);
    if let Err(source) = written {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "no se pudo borrar el artefacto incompleto");
        }
        return Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

/// Guarda un modelo en `dir`. Nunca sobrescribe un artefacto existente.
pub fn save<M: Model>(
    model: &M,
    training: &TrainingConfig,
    dir: impl AsRef<Path>,
    fitted_at: DateTime<Local>,
) -> Result<PathBuf, StoreError> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let kind = model.model_kind();
    let path = dir.join(artifact_filename(kind, &fitted_at));
    let artifact = ModelArtifact {
        format_version: FORMAT_VERSION,
        kind,
        fitted_at: fitted_at.to_rfc3339(),
        training: training.clone(),
        params: model,
    };
    let json = serde_json::to_string_pretty(&artifact)?;

    write_new(&path, |writer| {
        writer.write_all(json.as_bytes())?;
        writer.write_all(b"\n")
    })?;

    tracing::info!(path = %path.display(), kind = %kind, "modelo guardado");
    Ok(path)
}

/// Lee sólo la cabecera de un artefacto
pub fn read_header(path: impl AsRef<Path>) -> Result<ArtifactHeader, LoadError> {
    let value = read_json(path.as_ref())?;
    serde_json::from_value(value).map_err(LoadError::Malformed)
}

pub fn load<M: Model>(path: impl AsRef<Path>) -> Result<M, LoadError> {
    load_with_training(path).map(|(model, _)| model)
}

/// Carga un modelo junto con el eco de su configuración de entrenamiento
pub fn load_with_training<M: Model>(path: impl AsRef<Path>) -> Result<(M, TrainingConfig), LoadError> {
    let path = path.as_ref();
    let value = read_json(path)?;

    let header: ArtifactHeader = serde_json::from_value(value.clone()).map_err(LoadError::Malformed)?;
    if header.format_version > FORMAT_VERSION {
        return Err(LoadError::UnsupportedVersion {
            found: header.format_version,
            supported: FORMAT_VERSION,
        });
    }
    if !M::accepts(header.kind) {
        return Err(LoadError::KindMismatch {
            expected: M::NAME,
            found: header.kind,
        });
    }

    let artifact: ModelArtifact<M> =
        serde_json::from_value(value).map_err(|e| LoadError::InvalidParameters(e.to_string()))?;
    artifact
        .params
        .check(header.kind)
        .map_err(LoadError::InvalidParameters)?;

    tracing::info!(
        path = %path.display(),
        kind = %header.kind,
        fitted_at = %artifact.fitted_at,
        "modelo cargado"
    );
    Ok((artifact.params, artifact.training))
}

fn read_json(path: &Path) -> Result<serde_json::Value, LoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(LoadError::Malformed)
}
