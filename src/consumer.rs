//! Consumidores del pipeline y envoltorio para ejecutarlos en su propio hilo.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender, TrySendError};
use thiserror::Error;

use crate::recording::RecordingError;
use crate::types::{FeatureVector, GestureEvent, RawSample};

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error(transparent)]
    Recording(#[from] RecordingError),

    #[error("HID output: {0}")]
    Hid(String),

    #[error("worker '{0}' disconnected")]
    Disconnected(String),

    #[error("worker '{0}' panicked")]
    Panicked(String),
}

/// Receptor de muestras procesadas. Recibe sólo referencias compartidas.
pub trait Consumer: Send {
    fn name(&self) -> &str;

    fn on_sample(
        &mut self,
        sample: &RawSample,
        features: Option<&FeatureVector>,
        event: Option<&GestureEvent>,
    ) -> Result<(), ConsumerError>;

    /// Aviso de fallo terminal antes de `finish`
    fn on_fault(&mut self, _cause: &str) {}

    /// Se llama una vez en cualquier salida del pipeline
    fn finish(&mut self) -> Result<(), ConsumerError> {
        Ok(())
    }
}

enum Message {
    Sample(RawSample, Option<FeatureVector>, Option<GestureEvent>),
    Fault(String),
}

/// Ejecuta un consumidor en un hilo propio detrás de una cola acotada.
///
/// Con la cola llena se descartan muestras sin evento; las que llevan
/// evento se entregan siempre (envío bloqueante). En modo sin pérdidas
/// todas bloquean.
pub struct Detached {
    name: String,
    tx: Option<Sender<Message>>,
    handle: Option<JoinHandle<Result<(), ConsumerError>>>,
    dropped: u64,
    lossless: bool,
}

impl Detached {
    pub fn spawn<C: Consumer + 'static>(consumer: C, capacity: usize) -> Self {
        Self::spawn_with(consumer, capacity, false)
    }

    /// Para consumidores que no admiten huecos, como la grabación
    pub fn spawn_lossless<C: Consumer + 'static>(consumer: C, capacity: usize) -> Self {
        Self::spawn_with(consumer, capacity, true)
    }

    fn spawn_with<C: Consumer + 'static>(mut consumer: C, capacity: usize, lossless: bool) -> Self {
        let name = consumer.name().to_string();
        let (tx, rx) = bounded::<Message>(capacity.max(1));

        let handle = thread::spawn(move || {
            let mut run = || -> Result<(), ConsumerError> {
                for message in rx.iter() {
                    match message {
                        Message::Sample(sample, features, event) => {
                            consumer.on_sample(&sample, features.as_ref(), event.as_ref())?
                        }
                        Message::Fault(cause) => consumer.on_fault(&cause),
                    }
                }
                Ok(())
            };
            let result = run();
            let finished = consumer.finish();
            result.and(finished)
        });

        Self {
            name,
            tx: Some(tx),
            handle: Some(handle),
            dropped: 0,
            lossless,
        }
    }

    /// Muestras descartadas por cola llena
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Espera al hilo y devuelve su resultado
    fn join(&mut self) -> Result<(), ConsumerError> {
        self.tx = None;
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(ConsumerError::Panicked(self.name.clone()))),
            None => Err(ConsumerError::Disconnected(self.name.clone())),
        }
    }
}

impl Consumer for Detached {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_sample(
        &mut self,
        sample: &RawSample,
        features: Option<&FeatureVector>,
        event: Option<&GestureEvent>,
    ) -> Result<(), ConsumerError> {
        let tx = match self.tx.as_ref() {
            Some(tx) => tx,
            None => return Err(ConsumerError::Disconnected(self.name.clone())),
        };
        let message = Message::Sample(sample.clone(), features.cloned(), event.copied());

        let delivered = if self.lossless || event.is_some() {
            tx.send(message).is_ok()
        } else {
            match tx.try_send(message) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    self.dropped += 1;
                    if self.dropped == 1 || self.dropped % 200 == 0 {
                        tracing::warn!(consumer = %self.name, dropped = self.dropped, "consumidor lento, descartando muestras");
                    }
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        };

        if delivered {
            Ok(())
        } else {
            // El hilo terminó: su error es la causa real
            match self.join() {
                Ok(()) => Err(ConsumerError::Disconnected(self.name.clone())),
                Err(e) => Err(e),
            }
        }
    }

    fn on_fault(&mut self, cause: &str) {
        if let Some(tx) = self.tx.as_ref() {
            let _ = tx.send(Message::Fault(cause.to_string()));
        }
    }

    fn finish(&mut self) -> Result<(), ConsumerError> {
        if self.handle.is_none() {
            return Ok(());
        }
        self.join()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::GestureLabel;
    use crossbeam_channel::{unbounded, Receiver};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Consumidor de prueba que anota todo lo que recibe
    #[derive(Clone, Default)]
    pub(crate) struct Capture {
        pub samples: Arc<Mutex<Vec<(u64, Option<GestureLabel>)>>>,
        pub faults: Arc<Mutex<Vec<String>>>,
        pub finished: Arc<Mutex<usize>>,
        pub fail_at: Option<u64>,
    }

    impl Consumer for Capture {
        fn name(&self) -> &str {
            "capture"
        }

        fn on_sample(
            &mut self,
            sample: &RawSample,
            _features: Option<&FeatureVector>,
            event: Option<&GestureEvent>,
        ) -> Result<(), ConsumerError> {
            if self.fail_at == Some(sample.index) {
                return Err(ConsumerError::Hid("capture failure".into()));
            }
            self.samples
                .lock()
                .unwrap()
                .push((sample.index, event.map(|e| e.label)));
            Ok(())
        }

        fn on_fault(&mut self, cause: &str) {
            self.faults.lock().unwrap().push(cause.to_string());
        }

        fn finish(&mut self) -> Result<(), ConsumerError> {
            *self.finished.lock().unwrap() += 1;
            Ok(())
        }
    }

    /// Bloquea en la primera muestra hasta que se abra la compuerta
    struct Gated {
        capture: Capture,
        gate: Receiver<()>,
        opened: bool,
    }

    impl Consumer for Gated {
        fn name(&self) -> &str {
            "gated"
        }

        fn on_sample(
            &mut self,
            sample: &RawSample,
            features: Option<&FeatureVector>,
            event: Option<&GestureEvent>,
        ) -> Result<(), ConsumerError> {
            if !self.opened {
                let _ = self.gate.recv();
                self.opened = true;
            }
            self.capture.on_sample(sample, features, event)
        }

        fn finish(&mut self) -> Result<(), ConsumerError> {
            self.capture.finish()
        }
    }

    fn sample(index: u64) -> RawSample {
        RawSample::new(index, index as f64, vec![0.0])
    }

    #[test]
    fn test_detached_delivers_in_order() {
        let capture = Capture::default();
        let mut detached = Detached::spawn(capture.clone(), 64);
        for i in 0..10 {
            detached.on_sample(&sample(i), None, None).unwrap();
        }
        detached.finish().unwrap();

        let seen: Vec<u64> = capture.samples.lock().unwrap().iter().map(|(i, _)| *i).collect();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert_eq!(*capture.finished.lock().unwrap(), 1);
    }

    #[test]
    fn test_full_queue_drops_plain_samples_but_keeps_events() {
        let capture = Capture::default();
        let (gate_tx, gate_rx) = unbounded();
        let gated = Gated {
            capture: capture.clone(),
            gate: gate_rx,
            opened: false,
        };
        let mut detached = Detached::spawn(gated, 1);

        for i in 0..4 {
            detached.on_sample(&sample(i), None, None).unwrap();
        }

        let opener = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            let _ = gate_tx.send(());
        });

        let event = GestureEvent {
            label: GestureLabel::Extension,
            index: 4,
            timestamp: 4.0,
        };
        detached.on_sample(&sample(4), None, Some(&event)).unwrap();
        opener.join().unwrap();
        let dropped = detached.dropped();
        detached.finish().unwrap();

        let seen = capture.samples.lock().unwrap().clone();
        assert!(dropped >= 2);
        assert_eq!(seen.len() as u64 + dropped, 5);
        assert_eq!(seen.last(), Some(&(4, Some(GestureLabel::Extension))));
    }

    #[test]
    fn test_lossless_blocks_instead_of_dropping() {
        let capture = Capture::default();
        let (gate_tx, gate_rx) = unbounded();
        let gated = Gated {
            capture: capture.clone(),
            gate: gate_rx,
            opened: false,
        };
        let mut detached = Detached::spawn_lossless(gated, 1);

        let opener = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            let _ = gate_tx.send(());
        });
        for i in 0..5 {
            detached.on_sample(&sample(i), None, None).unwrap();
        }
        opener.join().unwrap();
        assert_eq!(detached.dropped(), 0);
        detached.finish().unwrap();

        let seen: Vec<u64> = capture.samples.lock().unwrap().iter().map(|(i, _)| *i).collect();
        assert_eq!(seen, (0..5).collect::<Vec<_>>());
    }

    #[test]
    fn test_worker_error_surfaces() {
        let capture = Capture {
            fail_at: Some(0),
            ..Capture::default()
        };
        let mut detached = Detached::spawn(capture.clone(), 4);
        let _ = detached.on_sample(&sample(0), None, None);
        // El error llega en el siguiente envío o en finish
        let mut result = Ok(());
        for i in 1..50 {
            result = detached.on_sample(&sample(i), None, None);
            if result.is_err() {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        let outcome = result.and_then(|_| detached.finish());
        assert!(matches!(outcome, Err(ConsumerError::Hid(_))));
        assert_eq!(*capture.finished.lock().unwrap(), 1);
    }
}
