use std::collections::VecDeque;

use crate::types::{RawSample, RMS_WINDOW_SIZE};

/// Buffer circular de las últimas N muestras para el RMS deslizante
pub struct RmsWindow {
    buffer: VecDeque<Vec<f64>>,
    capacity: usize,
}

impl RmsWindow {
    /// Crea una ventana de `capacity` muestras (mínimo 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Añade una muestra y devuelve el RMS por canal sobre el contenido actual.
    /// Mientras se llena, el RMS se calcula sobre la ventana parcial.
    pub fn push(&mut self, channels: &[f64]) -> Vec<f64> {
        self.buffer.push_back(channels.to_vec());
        if self.buffer.len() > self.capacity {
            self.buffer.pop_front();
        }
        self.rms()
    }

    /// RMS por canal. Se recalcula sobre el buffer completo en cada llamada
    /// para que la salida dependa sólo del contenido.
    pub fn rms(&self) -> Vec<f64> {
        let channels = self.buffer.back().map(Vec::len).unwrap_or(0);
        if self.buffer.is_empty() {
            return vec![0.0; channels];
        }

        let n = self.buffer.len() as f64;
        (0..channels)
            .map(|ch| {
                let total: f64 = self
                    .buffer
                    .iter()
                    .map(|frame| {
                        let x = frame.get(ch).copied().unwrap_or(0.0);
                        x * x
                    })
                    .sum();
                (total / n).sqrt()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for RmsWindow {
    fn default() -> Self {
        Self::new(RMS_WINDOW_SIZE)
    }
}

/// Etapa de suavizado del pipeline: paso directo o RMS deslizante.
pub struct Smoother {
    window: Option<RmsWindow>,
}

impl Smoother {
    pub fn passthrough() -> Self {
        Self { window: None }
    }

    pub fn rms(window: usize) -> Self {
        Self {
            window: Some(RmsWindow::new(window)),
        }
    }

    pub fn new(enabled: bool, window: usize) -> Self {
        if enabled {
            Self::rms(window)
        } else {
            Self::passthrough()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.window.is_some()
    }

    /// Tamaño de ventana si el RMS está activo
    pub fn window_size(&self) -> Option<usize> {
        self.window.as_ref().map(RmsWindow::capacity)
    }

    pub fn window_len(&self) -> usize {
        self.window.as_ref().map(RmsWindow::len).unwrap_or(0)
    }

    pub fn push(&mut self, sample: &RawSample) -> RawSample {
        match self.window.as_mut() {
            None => sample.clone(),
            Some(window) => RawSample::new(sample.index, sample.timestamp, window.push(&sample.channels)),
        }
    }

    /// Olvida el contenido de la ventana (cambio de modelo)
    pub fn reset(&mut self) {
        if let Some(window) = self.window.as_mut() {
            window.clear();
        }
    }

    /// Suaviza una grabación completa con una ventana nueva
    pub fn smooth_all(enabled: bool, window: usize, samples: &[RawSample]) -> Vec<RawSample> {
        let mut smoother = Self::new(enabled, window);
        samples.iter().map(|s| smoother.push(s)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(index: u64, channels: Vec<f64>) -> RawSample {
        RawSample::new(index, index as f64 / 200.0, channels)
    }

    #[test]
    fn test_constant_input_converges_to_value() {
        let mut smoother = Smoother::rms(50);
        let v = -37.0;
        let mut last = Vec::new();
        for i in 0..120 {
            last = smoother.push(&sample(i, vec![v; 8])).channels;
        }
        for ch in last {
            assert!((ch - v.abs()).abs() < 1e-12);
        }
    }

    #[test]
    fn test_window_never_exceeds_capacity() {
        let mut window = RmsWindow::new(10);
        for i in 0..35 {
            window.push(&[i as f64, 1.0]);
            assert!(window.len() <= 10);
        }
        assert!(window.is_full());
    }

    #[test]
    fn test_emits_during_fill_up() {
        let mut smoother = Smoother::rms(4);
        let out = smoother.push(&sample(0, vec![3.0, 4.0]));
        assert_eq!(out.channels, vec![3.0, 4.0]);
        assert_eq!(out.index, 0);

        // Ventana parcial [3, 0] -> sqrt(9/2)
        let out = smoother.push(&sample(1, vec![0.0, 0.0]));
        assert!((out.channels[0] - (4.5f64).sqrt()).abs() < 1e-12);
        assert_eq!(smoother.window_len(), 2);
    }

    #[test]
    fn test_sliding_window_evicts_oldest() {
        let mut window = RmsWindow::new(2);
        window.push(&[10.0]);
        window.push(&[0.0]);
        let out = window.push(&[0.0]);
        assert_eq!(out, vec![0.0]);
    }

    #[test]
    fn test_passthrough_is_identity() {
        let mut smoother = Smoother::passthrough();
        let input = sample(7, vec![1.0, -2.0, 3.5]);
        assert_eq!(smoother.push(&input), input);
        assert!(!smoother.is_enabled());
    }

    #[test]
    fn test_deterministic_output() {
        let inputs: Vec<RawSample> = (0..60)
            .map(|i| sample(i, vec![(i as f64 * 0.37).sin() * 90.0, (i % 7) as f64]))
            .collect();
        let a = Smoother::smooth_all(true, 16, &inputs);
        let b = Smoother::smooth_all(true, 16, &inputs);
        assert_eq!(a, b);
    }

    #[test]
    fn test_reset_clears_window() {
        let mut smoother = Smoother::rms(8);
        smoother.push(&sample(0, vec![5.0]));
        smoother.push(&sample(1, vec![5.0]));
        smoother.reset();
        assert_eq!(smoother.window_len(), 0);
        let out = smoother.push(&sample(2, vec![2.0]));
        assert_eq!(out.channels, vec![2.0]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let window = RmsWindow::new(0);
        assert_eq!(window.capacity(), 1);
    }
}
