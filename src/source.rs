//! Fuente de muestras unificada: en vivo (hilo de transporte + canal
//! acotado) o reproducción de una grabación.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use thiserror::Error;

use crate::recording::{RecordingError, RecordingReader};
use crate::types::{RawSample, SAMPLING_RATE};

/// Capacidad por defecto de la cola transporte -> pipeline (~1 s a 200 Hz)
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("device disconnected")]
    Disconnected,

    #[error("malformed packet ({len} bytes)")]
    Malformed { len: usize },

    #[error("characteristic {0} not found")]
    CharacteristicNotFound(String),

    #[error("bus error: {0}")]
    Bus(String),
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Recording(#[from] RecordingError),
}

/// Órdenes al dispositivo (sin respuesta)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Apagado profundo
    Sleep,
    /// Desactiva el auto-apagado
    NeverSleep,
    /// Vibración corta
    Vibrate,
}

/// Extremo de escritura que recibe un transporte.
///
/// Si la cola está llena la muestra se descarta y se cuenta: la lectura del
/// dispositivo nunca se bloquea.
#[derive(Clone)]
pub struct SampleSink {
    tx: Sender<Result<Vec<f64>, TransportError>>,
    dropped: Arc<AtomicU64>,
}

impl SampleSink {
    pub fn new(tx: Sender<Result<Vec<f64>, TransportError>>) -> Self {
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// `Err(Disconnected)` si el pipeline ya no escucha
    pub fn push(&self, channels: Vec<f64>) -> Result<(), TransportError> {
        match self.tx.try_send(Ok(channels)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if total == 1 || total % 200 == 0 {
                    tracing::warn!(dropped = total, "cola llena, descartando muestras");
                }
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(TransportError::Disconnected),
        }
    }

    /// Entrega un error terminal al pipeline
    pub fn fail(&self, error: TransportError) {
        let _ = self.tx.send(Err(error));
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Transporte físico del dispositivo. `run` se ejecuta en su propio hilo
/// hasta desconexión o error.
pub trait Transport: Send + 'static {
    fn name(&self) -> String;

    /// Canales por muestra
    fn channels(&self) -> usize;

    fn run(self, samples: SampleSink, commands: Receiver<DeviceCommand>) -> Result<(), TransportError>;
}

pub struct LiveSource {
    name: String,
    channels: usize,
    samples: Receiver<Result<Vec<f64>, TransportError>>,
    commands: Sender<DeviceCommand>,
    dropped: Arc<AtomicU64>,
    next_index: u64,
}

impl LiveSource {
    /// Lanza el hilo del transporte
    pub fn spawn<T: Transport>(transport: T, queue_capacity: usize) -> Self {
        let (tx, rx) = bounded(queue_capacity.max(1));
        let (cmd_tx, cmd_rx) = unbounded();
        let sink = SampleSink::new(tx);
        let dropped = sink.dropped.clone();
        let name = transport.name();
        let channels = transport.channels();

        let thread_name = name.clone();
        thread::spawn(move || {
            if let Err(e) = transport.run(sink.clone(), cmd_rx) {
                tracing::error!(transport = %thread_name, error = %e, "transporte terminado con error");
                sink.fail(e);
            } else {
                tracing::info!(transport = %thread_name, "transporte terminado");
            }
        });

        tracing::info!(transport = %name, channels, "fuente en vivo abierta");
        Self {
            name,
            channels,
            samples: rx,
            commands: cmd_tx,
            dropped,
            next_index: 0,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn next_sample(&mut self) -> Result<Option<RawSample>, SourceError> {
        let channels = match self.samples.recv() {
            Ok(Ok(channels)) => channels,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(TransportError::Disconnected.into()),
        };
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let sample = RawSample::new(self.next_index, timestamp, channels);
        self.next_index += 1;
        Ok(Some(sample))
    }

    fn send_command(&self, command: DeviceCommand) {
        if self.commands.send(command).is_err() {
            tracing::debug!(?command, "transporte cerrado, orden descartada");
        }
    }
}

pub struct ReplaySource {
    reader: RecordingReader,
    paced: bool,
    rate: f64,
    /// Instante e índice de referencia del ritmo
    anchor: Option<(Instant, u64)>,
    next_index: u64,
}

impl ReplaySource {
    pub fn open(path: impl AsRef<Path>, paced: bool, rate: f64) -> Result<Self, SourceError> {
        let reader = RecordingReader::open(path)?;
        let rate = if rate > 0.0 && rate.is_finite() {
            rate
        } else {
            SAMPLING_RATE
        };
        tracing::info!(
            path = %reader.path().display(),
            channels = reader.channels(),
            paced,
            rate,
            "reproducción abierta"
        );
        Ok(Self {
            reader,
            paced,
            rate,
            anchor: None,
            next_index: 0,
        })
    }

    fn next_sample(&mut self) -> Result<Option<RawSample>, SourceError> {
        if self.paced {
            let next_index = self.next_index;
            let (start, first) = *self.anchor.get_or_insert_with(|| (Instant::now(), next_index));
            let target = start + Duration::from_secs_f64((next_index - first) as f64 / self.rate);
            let now = Instant::now();
            if target > now {
                thread::sleep(target - now);
            }
        }

        match self.reader.read_row()? {
            Some((timestamp, channels)) => {
                let sample = RawSample::new(self.next_index, timestamp, channels);
                self.next_index += 1;
                Ok(Some(sample))
            }
            None => {
                tracing::info!(samples = self.next_index, "fin de la grabación");
                Ok(None)
            }
        }
    }

    /// Tras una pausa el ritmo se vuelve a anclar en la siguiente muestra
    fn resume(&mut self) {
        self.anchor = None;
    }
}

pub enum SampleSource {
    Live(LiveSource),
    Replay(ReplaySource),
}

impl SampleSource {
    pub fn live<T: Transport>(transport: T, queue_capacity: usize) -> Self {
        SampleSource::Live(LiveSource::spawn(transport, queue_capacity))
    }

    pub fn replay(path: impl AsRef<Path>, paced: bool, rate: f64) -> Result<Self, SourceError> {
        Ok(SampleSource::Replay(ReplaySource::open(path, paced, rate)?))
    }

    /// Siguiente muestra. `Ok(None)` = fin del flujo (sólo en reproducción).
    pub fn next_sample(&mut self) -> Result<Option<RawSample>, SourceError> {
        match self {
            SampleSource::Live(live) => live.next_sample(),
            SampleSource::Replay(replay) => replay.next_sample(),
        }
    }

    /// Reanuda tras una pausa sin soltar de golpe las muestras atrasadas
    pub fn resume(&mut self) {
        match self {
            SampleSource::Live(_) => {}
            SampleSource::Replay(replay) => replay.resume(),
        }
    }

    pub fn send_command(&self, command: DeviceCommand) {
        match self {
            SampleSource::Live(live) => live.send_command(command),
            SampleSource::Replay(_) => {
                tracing::debug!(?command, "reproducción: orden de dispositivo ignorada")
            }
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            SampleSource::Live(live) => live.channels,
            SampleSource::Replay(replay) => replay.reader.channels(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            SampleSource::Live(live) => format!("live ({})", live.name),
            SampleSource::Replay(replay) => format!("replay ({})", replay.reader.path().display()),
        }
    }

    /// Muestras descartadas por cola llena
    pub fn dropped(&self) -> u64 {
        match self {
            SampleSource::Live(live) => live.dropped(),
            SampleSource::Replay(_) => 0,
        }
    }
}
