//! SVM binaria entrenada con SMO (Platt) y caché de errores.
//!
//! `f(x) = sum_i coef_i K(sv_i, x) + bias`, con `coef_i = alpha_i * y_i`.
//! Sólo se guardan los vectores con `alpha_i > 0`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Alphas por debajo de esto no cuentan como vectores soporte
const ALPHA_EPSILON: f64 = 1e-8;
/// Cambio mínimo de alpha para considerar que un paso avanzó
const STEP_EPSILON: f64 = 1e-5;
/// Intentos aleatorios cuando falla la heurística de segunda elección
const RANDOM_PARTNER_TRIES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Kernel {
    Linear,
    Rbf { gamma: f64 },
}

impl Kernel {
    pub fn eval(&self, a: &[f64], b: &[f64]) -> f64 {
        match *self {
            Kernel::Linear => a.iter().zip(b).map(|(x, y)| x * y).sum(),
            Kernel::Rbf { gamma } => {
                let dist2: f64 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
                (-gamma * dist2).exp()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelChoice {
    Linear,
    Rbf,
}

/// Parámetros de entrenamiento SVM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvmParams {
    pub kernel: KernelChoice,
    /// `None`: gamma = 1 / (k * var(X))
    pub gamma: Option<f64>,
    /// Penalización C
    pub c: f64,
    /// Tolerancia KKT
    pub tolerance: f64,
    /// Pasadas completas sin cambios antes de parar
    pub max_passes: usize,
    /// Tope de pasadas totales
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self {
            kernel: KernelChoice::Rbf,
            gamma: None,
            c: 1.0,
            tolerance: 1e-3,
            max_passes: 10,
            max_iterations: 1000,
            seed: 0,
        }
    }
}

impl SvmParams {
    /// Resuelve el kernel concreto para unos datos de entrenamiento
    pub fn resolve_kernel(&self, data: &[Vec<f64>]) -> Kernel {
        match self.kernel {
            KernelChoice::Linear => Kernel::Linear,
            KernelChoice::Rbf => Kernel::Rbf {
                gamma: self.gamma.unwrap_or_else(|| scale_gamma(data)),
            },
        }
    }
}

/// gamma = 1 / (n_features * var(X)), 1.0 si la varianza es nula
pub fn scale_gamma(data: &[Vec<f64>]) -> f64 {
    let features = data.first().map(Vec::len).unwrap_or(0);
    let count = data.iter().map(Vec::len).sum::<usize>();
    if features == 0 || count == 0 {
        return 1.0;
    }
    let mean = data.iter().flatten().sum::<f64>() / count as f64;
    let var = data.iter().flatten().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    if var > 0.0 {
        1.0 / (features as f64 * var)
    } else {
        1.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinarySvm {
    pub support_vectors: Vec<Vec<f64>>,
    pub coefficients: Vec<f64>,
    pub bias: f64,
}

impl BinarySvm {
    /// Entrena con etiquetas `y` en {-1, +1}
    pub fn train(x: &[Vec<f64>], y: &[f64], kernel: &Kernel, params: &SvmParams) -> Self {
        let mut smo = Smo::new(x, y, kernel, params);
        smo.solve();
        smo.into_model()
    }

    pub fn decision(&self, kernel: &Kernel, x: &[f64]) -> f64 {
        self.support_vectors
            .iter()
            .zip(&self.coefficients)
            .map(|(sv, coef)| coef * kernel.eval(sv, x))
            .sum::<f64>()
            + self.bias
    }

    pub fn validate(&self, dims: usize) -> Result<(), String> {
        if self.support_vectors.len() != self.coefficients.len() {
            return Err(format!(
                "{} support vectors for {} coefficients",
                self.support_vectors.len(),
                self.coefficients.len()
            ));
        }
        if let Some(sv) = self.support_vectors.iter().find(|sv| sv.len() != dims) {
            return Err(format!("support vector of length {}, expected {}", sv.len(), dims));
        }
        let finite = self
            .support_vectors
            .iter()
            .flatten()
            .chain(&self.coefficients)
            .all(|v| v.is_finite())
            && self.bias.is_finite();
        if !finite {
            return Err("non-finite SVM parameter".to_string());
        }
        Ok(())
    }
}

struct Smo<'a> {
    x: &'a [Vec<f64>],
    y: &'a [f64],
    kernel: &'a Kernel,
    params: &'a SvmParams,
    alpha: Vec<f64>,
    bias: f64,
    /// E_k = f(x_k) - y_k
    errors: Vec<f64>,
    rng: StdRng,
}

impl<'a> Smo<'a> {
    fn new(x: &'a [Vec<f64>], y: &'a [f64], kernel: &'a Kernel, params: &'a SvmParams) -> Self {
        Self {
            x,
            y,
            kernel,
            params,
            alpha: vec![0.0; x.len()],
            bias: 0.0,
            errors: y.iter().map(|v| -v).collect(),
            rng: StdRng::seed_from_u64(params.seed),
        }
    }

    fn solve(&mut self) {
        let n = self.x.len();
        if n < 2 {
            return;
        }

        let mut passes = 0;
        let mut iterations = 0;
        while passes < self.params.max_passes && iterations < self.params.max_iterations {
            let mut changed = 0usize;
            for i in 0..n {
                if self.violates_kkt(i) && self.examine(i) {
                    changed += 1;
                }
            }
            iterations += 1;
            if changed == 0 {
                passes += 1;
            } else {
                passes = 0;
            }
        }

        tracing::trace!(iterations, samples = n, "SMO terminado");
    }

    fn violates_kkt(&self, i: usize) -> bool {
        let r = self.y[i] * self.errors[i];
        let tol = self.params.tolerance;
        (r < -tol && self.alpha[i] < self.params.c) || (r > tol && self.alpha[i] > 0.0)
    }

    /// Busca pareja para `i`: primero max |E_i - E_j|, luego al azar
    fn examine(&mut self, i: usize) -> bool {
        let n = self.x.len();
        let e_i = self.errors[i];
        let best = (0..n)
            .filter(|&j| j != i)
            .max_by(|&a, &b| {
                let da = (e_i - self.errors[a]).abs();
                let db = (e_i - self.errors[b]).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            });
        if let Some(j) = best {
            if self.take_step(i, j) {
                return true;
            }
        }

        for _ in 0..RANDOM_PARTNER_TRIES.min(n) {
            let j = self.rng.gen_range(0..n);
            if j != i && self.take_step(i, j) {
                return true;
            }
        }
        false
    }

    fn take_step(&mut self, i: usize, j: usize) -> bool {
        let c = self.params.c;
        let (y_i, y_j) = (self.y[i], self.y[j]);
        let (a_i, a_j) = (self.alpha[i], self.alpha[j]);
        let (e_i, e_j) = (self.errors[i], self.errors[j]);

        let (low, high) = if y_i != y_j {
            ((a_j - a_i).max(0.0), (c + a_j - a_i).min(c))
        } else {
            ((a_i + a_j - c).max(0.0), (a_i + a_j).min(c))
        };
        if high - low < 1e-12 {
            return false;
        }

        let k_ii = self.kernel.eval(&self.x[i], &self.x[i]);
        let k_jj = self.kernel.eval(&self.x[j], &self.x[j]);
        let k_ij = self.kernel.eval(&self.x[i], &self.x[j]);
        let eta = 2.0 * k_ij - k_ii - k_jj;
        if eta >= 0.0 {
            return false;
        }

        let new_a_j = (a_j - y_j * (e_i - e_j) / eta).clamp(low, high);
        if (new_a_j - a_j).abs() < STEP_EPSILON * (new_a_j + a_j + STEP_EPSILON) {
            return false;
        }
        let new_a_i = a_i + y_i * y_j * (a_j - new_a_j);

        let d_i = y_i * (new_a_i - a_i);
        let d_j = y_j * (new_a_j - a_j);
        let b1 = self.bias - e_i - d_i * k_ii - d_j * k_ij;
        let b2 = self.bias - e_j - d_i * k_ij - d_j * k_jj;
        let new_bias = if new_a_i > 0.0 && new_a_i < c {
            b1
        } else if new_a_j > 0.0 && new_a_j < c {
            b2
        } else {
            (b1 + b2) / 2.0
        };
        let d_bias = new_bias - self.bias;

        for k in 0..self.x.len() {
            let delta = d_i * self.kernel.eval(&self.x[i], &self.x[k])
                + d_j * self.kernel.eval(&self.x[j], &self.x[k])
                + d_bias;
            self.errors[k] += delta;
        }

        self.alpha[i] = new_a_i;
        self.alpha[j] = new_a_j;
        self.bias = new_bias;
        true
    }

    fn into_model(self) -> BinarySvm {
        let mut support_vectors = Vec::new();
        let mut coefficients = Vec::new();
        for (k, &a) in self.alpha.iter().enumerate() {
            if a > ALPHA_EPSILON {
                support_vectors.push(self.x[k].clone());
                coefficients.push(a * self.y[k]);
            }
        }
        BinarySvm {
            support_vectors,
            coefficients,
            bias: self.bias,
        }
    }
}
