use std::collections::BTreeMap;

use crate::consumer::{Consumer, ConsumerError};
use crate::types::{FeatureVector, GestureEvent, GestureLabel, RawSample};

/// Escala de la barra de nivel (|i8| máximo del Myo)
const LEVEL_FULL_SCALE: f64 = 128.0;
const BAR_WIDTH: usize = 10;

/// Monitor de consola: imprime los eventos confirmados y, opcionalmente,
/// una barra de nivel por canal cada `every` muestras.
pub struct ConsoleMonitor {
    every: usize,
    seen: u64,
    peak: f64,
    events: BTreeMap<GestureLabel, u64>,
}

impl ConsoleMonitor {
    /// `every = 0`: sólo eventos
    pub fn new(every: usize) -> Self {
        Self {
            every,
            seen: 0,
            peak: 0.0,
            events: BTreeMap::new(),
        }
    }

    pub fn event_counts(&self) -> &BTreeMap<GestureLabel, u64> {
        &self.events
    }

    /// Mayor |valor| visto en cualquier canal
    pub fn peak(&self) -> f64 {
        self.peak
    }
}

fn label_icon(label: GestureLabel) -> &'static str {
    match label {
        GestureLabel::Idle => "✋",
        GestureLabel::Extension => "👉",
        GestureLabel::Flexion => "👈",
    }
}

/// Barras de nivel, una por canal
pub fn level_bars(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| {
            let filled = ((v.abs() / LEVEL_FULL_SCALE).min(1.0) * BAR_WIDTH as f64).round() as usize;
            format!("{}{}", "█".repeat(filled), "·".repeat(BAR_WIDTH - filled))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl Consumer for ConsoleMonitor {
    fn name(&self) -> &str {
        "monitor"
    }

    fn on_sample(
        &mut self,
        sample: &RawSample,
        features: Option<&FeatureVector>,
        event: Option<&GestureEvent>,
    ) -> Result<(), ConsumerError> {
        self.seen += 1;
        self.peak = self.peak.max(sample.max_abs());

        if let Some(event) = event {
            *self.events.entry(event.label).or_insert(0) += 1;
            println!(
                "{} {:<10} #{:<8} t={:.3}",
                label_icon(event.label),
                event.label,
                event.index,
                event.timestamp
            );
        }

        if self.every > 0 && self.seen % self.every as u64 == 0 {
            match features {
                Some(f) => println!("📈 {} | {:?}", level_bars(&sample.channels), f.as_slice()),
                None => println!("📈 {}", level_bars(&sample.channels)),
            }
        }
        Ok(())
    }

    fn on_fault(&mut self, cause: &str) {
        eprintln!("❌ Pipeline detenido: {}", cause);
    }

    fn finish(&mut self) -> Result<(), ConsumerError> {
        println!("\n📊 {} muestras, pico {:.1}", self.seen, self.peak);
        for (label, count) in &self.events {
            println!("  {} {:<10} {}", label_icon(*label), label, count);
        }
        Ok(())
    }
}
