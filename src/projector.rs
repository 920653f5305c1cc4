//! Proyección PCA / ICA de las muestras EMG a k componentes.
//!
//! El ajuste es offline: se concatenan las grabaciones de entrenamiento en una
//! matriz `n x d`, se centra por la media y se obtiene la descomposición de la
//! covarianza. PCA se queda con los k autovectores principales. ICA blanquea
//! con esos mismos k autovectores y luego estima la matriz de separación con
//! FastICA (deflación, no linealidad `tanh`).
//!
//! En ICA el orden y el signo de las componentes dependen de la semilla; con
//! la misma semilla y los mismos datos el resultado es idéntico.

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{DimensionMismatch, FitError};
use crate::types::{FeatureVector, DEFAULT_COMPONENTS};

/// Autovalores por debajo de `RANK_TOLERANCE * max` cuentan como nulos
const RANK_TOLERANCE: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionKind {
    Pca,
    Ica,
}

impl ProjectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectionKind::Pca => "pca",
            ProjectionKind::Ica => "ica",
        }
    }
}

/// Parámetros de ajuste
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectorParams {
    /// Componentes a conservar (default: 2)
    pub components: usize,
    /// Semilla del vector inicial de FastICA
    pub seed: u64,
    /// Iteraciones máximas por componente ICA
    pub max_iterations: usize,
    /// Tolerancia de convergencia ICA
    pub tolerance: f64,
}

impl Default for ProjectorParams {
    fn default() -> Self {
        Self {
            components: DEFAULT_COMPONENTS,
            seed: 0,
            max_iterations: 200,
            tolerance: 1e-4,
        }
    }
}

/// Transformación ajustada: `y = components · (x - mean)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projector {
    kind: ProjectionKind,
    mean: Vec<f64>,
    /// Matriz k x d, una fila por componente
    components: Vec<Vec<f64>>,
    /// Varianza (autovalor) de cada componente retenida
    explained_variance: Vec<f64>,
    /// Suma de todos los autovalores de la covarianza
    total_variance: f64,
}

impl Projector {
    /// Ajusta el proyector sobre `data` (una fila por muestra).
    pub fn fit(
        data: &[Vec<f64>],
        kind: ProjectionKind,
        params: &ProjectorParams,
    ) -> Result<Self, FitError> {
        let k = params.components;
        let n = data.len();
        let d = data.first().map(Vec::len).unwrap_or(0);

        if k == 0 || (d > 0 && k > d) {
            return Err(FitError::TooManyComponents {
                components: k,
                dims: d,
            });
        }
        if n < k || n == 0 {
            return Err(FitError::InsufficientSamples {
                samples: n,
                components: k,
            });
        }
        if d == 0 {
            return Err(FitError::TooManyComponents {
                components: k,
                dims: d,
            });
        }
        if let Some(row) = data.iter().find(|row| row.len() != d) {
            return Err(FitError::InconsistentDimensions {
                expected: d,
                found: row.len(),
            });
        }

        let mut mean = vec![0.0; d];
        for row in data {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        for m in mean.iter_mut() {
            *m /= n as f64;
        }

        let centered = DMatrix::from_fn(n, d, |i, j| data[i][j] - mean[j]);
        let dof = (n.saturating_sub(1)).max(1) as f64;
        let covariance = (centered.transpose() * &centered) / dof;

        let eigen = SymmetricEigen::new(covariance);
        let mut order: Vec<usize> = (0..d).collect();
        order.sort_by(|&a, &b| {
            eigen.eigenvalues[b]
                .partial_cmp(&eigen.eigenvalues[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let largest = eigen.eigenvalues[order[0]].max(0.0);
        let rank = if largest > 0.0 {
            order
                .iter()
                .filter(|&&i| eigen.eigenvalues[i] > RANK_TOLERANCE * largest)
                .count()
        } else {
            0
        };
        if rank < k {
            return Err(FitError::RankDeficient {
                rank,
                components: k,
            });
        }

        let total_variance: f64 = eigen.eigenvalues.iter().map(|v| v.max(0.0)).sum();
        let explained_variance: Vec<f64> = order.iter().take(k).map(|&i| eigen.eigenvalues[i]).collect();

        let components: Vec<Vec<f64>> = match kind {
            ProjectionKind::Pca => order
                .iter()
                .take(k)
                .map(|&i| {
                    let mut axis: Vec<f64> = eigen.eigenvectors.column(i).iter().copied().collect();
                    canonical_sign(&mut axis);
                    axis
                })
                .collect(),
            ProjectionKind::Ica => {
                // Blanqueo: fila r = e_r^T / sqrt(lambda_r)
                let whitening = DMatrix::from_fn(k, d, |r, c| {
                    let i = order[r];
                    eigen.eigenvectors[(c, i)] / eigen.eigenvalues[i].sqrt()
                });
                let whitened = &whitening * centered.transpose();
                let unmixing = fast_ica(&whitened, params);
                let full = unmixing * whitening;
                (0..k)
                    .map(|r| full.row(r).iter().copied().collect())
                    .collect()
            }
        };

        tracing::debug!(
            kind = kind.as_str(),
            samples = n,
            dims = d,
            components = k,
            rank,
            "proyector ajustado"
        );

        Ok(Self {
            kind,
            mean,
            components,
            explained_variance,
            total_variance,
        })
    }

    /// Reconstruye un proyector desde sus partes, validando forma y valores.
    pub fn from_parts(
        kind: ProjectionKind,
        mean: Vec<f64>,
        components: Vec<Vec<f64>>,
        explained_variance: Vec<f64>,
        total_variance: f64,
    ) -> Result<Self, String> {
        let projector = Self {
            kind,
            mean,
            components,
            explained_variance,
            total_variance,
        };
        projector.validate()?;
        Ok(projector)
    }

    /// Comprueba dimensiones y que no haya NaN/inf
    pub fn validate(&self) -> Result<(), String> {
        let d = self.mean.len();
        if d == 0 {
            return Err("empty mean vector".to_string());
        }
        if self.components.is_empty() {
            return Err("no components".to_string());
        }
        if self.components.len() > d {
            return Err(format!(
                "{} components for {}-dimensional input",
                self.components.len(),
                d
            ));
        }
        if let Some((r, row)) = self.components.iter().enumerate().find(|(_, row)| row.len() != d) {
            return Err(format!("component {} has {} entries, expected {}", r, row.len(), d));
        }
        if !self.explained_variance.is_empty() && self.explained_variance.len() != self.components.len() {
            return Err(format!(
                "{} explained variances for {} components",
                self.explained_variance.len(),
                self.components.len()
            ));
        }
        let finite = self.mean.iter().chain(self.components.iter().flatten()).all(|v| v.is_finite());
        if !finite {
            return Err("non-finite parameter".to_string());
        }
        Ok(())
    }

    pub fn kind(&self) -> ProjectionKind {
        self.kind
    }

    /// Dimensión de entrada (canales)
    pub fn input_dim(&self) -> usize {
        self.mean.len()
    }

    /// Número de componentes k
    pub fn output_dim(&self) -> usize {
        self.components.len()
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn components(&self) -> &[Vec<f64>] {
        &self.components
    }

    pub fn explained_variance(&self) -> &[f64] {
        &self.explained_variance
    }

    pub fn total_variance(&self) -> f64 {
        self.total_variance
    }

    /// Fracción de la varianza total explicada por cada componente
    pub fn explained_variance_ratio(&self) -> Vec<f64> {
        if self.total_variance <= 0.0 {
            return vec![0.0; self.explained_variance.len()];
        }
        self.explained_variance
            .iter()
            .map(|v| v / self.total_variance)
            .collect()
    }

    pub fn transform(&self, sample: &[f64]) -> Result<FeatureVector, DimensionMismatch> {
        if sample.len() != self.mean.len() {
            return Err(DimensionMismatch {
                stage: "projector",
                expected: self.mean.len(),
                found: sample.len(),
            });
        }

        let values = self
            .components
            .iter()
            .map(|axis| {
                axis.iter()
                    .zip(sample.iter().zip(&self.mean))
                    .map(|(a, (x, m))| a * (x - m))
                    .sum()
            })
            .collect::<Vec<f64>>();

        Ok(FeatureVector(values))
    }

    /// Proyección inversa al espacio de canales.
    ///
    /// PCA usa la traspuesta (componentes ortonormales); ICA la pseudo-inversa
    /// de la matriz de separación.
    pub fn inverse_transform(&self, features: &FeatureVector) -> Result<Vec<f64>, DimensionMismatch> {
        let k = self.components.len();
        if features.len() != k {
            return Err(DimensionMismatch {
                stage: "projector inverse",
                expected: k,
                found: features.len(),
            });
        }

        let d = self.mean.len();
        let y = DVector::from_column_slice(features.as_slice());
        let matrix = DMatrix::from_fn(k, d, |r, c| self.components[r][c]);
        let back = match self.kind {
            ProjectionKind::Pca => matrix.transpose(),
            // pseudo_inverse sólo falla con epsilon negativo
            ProjectionKind::Ica => match matrix.clone().pseudo_inverse(1e-12) {
                Ok(pinv) => pinv,
                Err(_) => matrix.transpose(),
            },
        };
        let x = back * y;

        Ok(x.iter().zip(&self.mean).map(|(v, m)| v + m).collect())
    }
}

/// Fija el signo para que la entrada de mayor magnitud sea positiva
fn canonical_sign(axis: &mut [f64]) {
    let pivot = axis
        .iter()
        .copied()
        .fold(0.0f64, |best, v| if v.abs() > best.abs() { v } else { best });
    if pivot < 0.0 {
        for v in axis.iter_mut() {
            *v = -*v;
        }
    }
}

/// FastICA por deflación sobre datos blanqueados `z` (k x n).
/// Devuelve la matriz de separación W (k x k), una fila por componente.
fn fast_ica(z: &DMatrix<f64>, params: &ProjectorParams) -> DMatrix<f64> {
    let k = z.nrows();
    let n = z.ncols() as f64;
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut found: Vec<DVector<f64>> = Vec::with_capacity(k);

    for p in 0..k {
        let mut w = DVector::from_fn(k, |_, _| rng.gen_range(-1.0..1.0));
        decorrelate(&mut w, &found);
        normalize(&mut w);

        let mut converged = false;
        for _ in 0..params.max_iterations.max(1) {
            // w+ = E{z g(w^T z)} - E{g'(w^T z)} w, con g = tanh
            let projected = z.transpose() * &w;
            let g = projected.map(f64::tanh);
            let g_prime_mean = g.iter().map(|v| 1.0 - v * v).sum::<f64>() / n;

            let mut next = (z * &g) / n - &w * g_prime_mean;
            decorrelate(&mut next, &found);
            normalize(&mut next);

            let limit = (next.dot(&w).abs() - 1.0).abs();
            w = next;
            if limit < params.tolerance {
                converged = true;
                break;
            }
        }

        if !converged {
            tracing::warn!(component = p, "FastICA no convergió; se usa la última estimación");
        }
        found.push(w);
    }

    DMatrix::from_fn(k, k, |r, c| found[r][c])
}

/// Gram-Schmidt contra las componentes ya encontradas
fn decorrelate(w: &mut DVector<f64>, found: &[DVector<f64>]) {
    for prev in found {
        let dot = w.dot(prev);
        *w -= prev * dot;
    }
}

fn normalize(w: &mut DVector<f64>) {
    let norm = w.norm();
    if norm > 1e-15 {
        *w /= norm;
    }
}
