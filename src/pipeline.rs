//! Orquestador: fuente -> suavizado -> proyección -> clasificación ->
//! consumidores, una muestra cada vez.

use std::path::PathBuf;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::classifier::{Classifier, DebouncedClassifier};
use crate::consumer::Consumer;
use crate::control::ControlCommand;
use crate::error::{DimensionMismatch, PipelineError};
use crate::model_store::{self, TrainingConfig};
use crate::projector::{ProjectionKind, Projector, ProjectorParams};
use crate::smoothing::Smoother;
use crate::source::{SampleSource, DEFAULT_QUEUE_CAPACITY};
use crate::training;
use crate::types::{
    FeatureVector, GestureEvent, GestureLabel, RawSample, DEFAULT_DEBOUNCE_THRESHOLD,
    RMS_WINDOW_SIZE, SAMPLING_RATE,
};

/// Espera máxima en pausa antes de volver a mirar el canal de control
const PAUSE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Live,
    Replay { path: PathBuf, paced: bool },
    /// Reproducción sin ritmo, pensada para grabar la salida
    Convert { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitSpec {
    pub kind: ProjectionKind,
    pub recordings: Vec<PathBuf>,
    pub params: ProjectorParams,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectorSpec {
    None,
    Model(PathBuf),
    /// Ajuste al arrancar sobre estas grabaciones
    Fit(FitSpec),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DebounceConfig {
    /// Predicciones consecutivas para confirmar un cambio (0 se trata como 1)
    pub threshold: usize,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_DEBOUNCE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub smoothing: bool,
    pub rms_window: usize,
    pub projector: ProjectorSpec,
    pub classifier: Option<PathBuf>,
    pub mode: Mode,
    pub debounce: DebounceConfig,
    /// Capacidad de la cola del transporte en vivo
    pub queue_capacity: usize,
    /// Ritmo de reproducción (Hz)
    pub sample_rate: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            smoothing: false,
            rms_window: RMS_WINDOW_SIZE,
            projector: ProjectorSpec::None,
            classifier: None,
            mode: Mode::Live,
            debounce: DebounceConfig::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            sample_rate: SAMPLING_RATE,
        }
    }
}

impl PipelineConfig {
    /// Ventana RMS efectiva, `None` si no hay suavizado
    pub fn effective_rms_window(&self) -> Option<usize> {
        self.smoothing.then_some(self.rms_window)
    }
}

/// Resultado de procesar una muestra
#[derive(Debug, Clone, PartialEq)]
pub struct Processed {
    /// Muestra tras el suavizado
    pub sample: RawSample,
    pub features: Option<FeatureVector>,
    pub label: Option<GestureLabel>,
    pub event: Option<GestureEvent>,
}

/// Etapas numéricas. Como mucho un proyector y un clasificador activos.
pub struct Stages {
    smoother: Smoother,
    projector: Option<Projector>,
    classifier: Option<DebouncedClassifier>,
    threshold: usize,
}

fn check_models(projector: Option<&Projector>, classifier: Option<&Classifier>) -> Result<(), PipelineError> {
    match (projector, classifier) {
        (None, Some(_)) => Err(PipelineError::Config(
            "a classifier requires a projector".to_string(),
        )),
        (Some(p), Some(c)) if p.output_dim() != c.input_dim() => Err(DimensionMismatch {
            stage: "classifier",
            expected: c.input_dim(),
            found: p.output_dim(),
        }
        .into()),
        _ => Ok(()),
    }
}

impl Stages {
    pub fn new(
        smoother: Smoother,
        projector: Option<Projector>,
        classifier: Option<Classifier>,
        threshold: usize,
    ) -> Result<Self, PipelineError> {
        check_models(projector.as_ref(), classifier.as_ref())?;
        Ok(Self {
            smoother,
            projector,
            classifier: classifier.map(|c| DebouncedClassifier::new(c, threshold)),
            threshold,
        })
    }

    pub fn projector(&self) -> Option<&Projector> {
        self.projector.as_ref()
    }

    pub fn classifier(&self) -> Option<&DebouncedClassifier> {
        self.classifier.as_ref()
    }

    pub fn smoother(&self) -> &Smoother {
        &self.smoother
    }

    /// Comprueba que la fuente encaja con el proyector
    pub fn check_channels(&self, channels: usize) -> Result<(), DimensionMismatch> {
        match &self.projector {
            Some(p) if p.input_dim() != channels => Err(DimensionMismatch {
                stage: "projector",
                expected: p.input_dim(),
                found: channels,
            }),
            _ => Ok(()),
        }
    }

    pub fn process(&mut self, raw: &RawSample) -> Result<Processed, PipelineError> {
        let sample = self.smoother.push(raw);

        let features = match &self.projector {
            Some(p) => Some(p.transform(&sample.channels)?),
            None => None,
        };

        let (label, event) = match (&mut self.classifier, &features) {
            (Some(c), Some(f)) => {
                let (label, event) = c.update(f, sample.index, sample.timestamp)?;
                (Some(label), event)
            }
            _ => (None, None),
        };

        Ok(Processed {
            sample,
            features,
            label,
            event,
        })
    }

    /// Sustituye modelos (los `None` se conservan). Si la combinación no es
    /// válida o cambia el número de componentes no cambia nada. Tras el
    /// cambio, ventana y antirrebote a cero.
    pub fn swap(&mut self, projector: Option<Projector>, classifier: Option<Classifier>) -> Result<(), PipelineError> {
        let next_projector = projector.as_ref().or(self.projector.as_ref());
        let next_classifier = classifier
            .as_ref()
            .or_else(|| self.classifier.as_ref().map(DebouncedClassifier::classifier));
        check_models(next_projector, next_classifier)?;
        // El ancho de entrada lo fija la fuente y el de salida los consumidores
        match (&projector, &self.projector) {
            (Some(new), Some(old)) if new.input_dim() != old.input_dim() => {
                return Err(DimensionMismatch {
                    stage: "projector",
                    expected: old.input_dim(),
                    found: new.input_dim(),
                }
                .into());
            }
            (Some(new), Some(old)) if new.output_dim() != old.output_dim() => {
                return Err(DimensionMismatch {
                    stage: "projector output",
                    expected: old.output_dim(),
                    found: new.output_dim(),
                }
                .into());
            }
            (Some(_), None) => {
                return Err(PipelineError::Config(
                    "cannot swap in a projector when none is active".to_string(),
                ));
            }
            _ => {}
        }

        if let Some(p) = projector {
            self.projector = Some(p);
        }
        match (classifier, self.classifier.as_mut()) {
            (Some(c), Some(current)) => current.replace(c),
            (Some(c), None) => self.classifier = Some(DebouncedClassifier::new(c, self.threshold)),
            (None, Some(current)) => current.reset(),
            (None, None) => {}
        }
        self.smoother.reset();
        tracing::info!("modelos sustituidos");
        Ok(())
    }
}

/// Resultado de un paso
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Processed(Processed),
    EndOfStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub samples: u64,
    pub events: u64,
    /// Muestras descartadas por la fuente en vivo
    pub dropped: u64,
    pub reason: StopReason,
}

pub struct Pipeline {
    source: SampleSource,
    stages: Stages,
    consumers: Vec<Box<dyn Consumer>>,
    paused: bool,
    samples: u64,
    events: u64,
}

/// Avisa si el modelo se ajustó con otro suavizado que el configurado
fn warn_smoothing_mismatch(config: &PipelineConfig, training: &TrainingConfig, path: &std::path::Path) {
    let configured = config.effective_rms_window();
    if training.rms_window != configured {
        tracing::warn!(
            model = %path.display(),
            fitted_with = ?training.rms_window,
            configured = ?configured,
            "el modelo se ajustó con otro suavizado RMS"
        );
    }
}

/// Carga o ajusta los modelos de la configuración. No toca la fuente.
pub fn build_stages(config: &PipelineConfig) -> Result<Stages, PipelineError> {
    let projector = match &config.projector {
        ProjectorSpec::None => None,
        ProjectorSpec::Model(path) => {
            let (projector, training) = model_store::load_with_training::<Projector>(path)?;
            warn_smoothing_mismatch(config, &training, path);
            Some(projector)
        }
        ProjectorSpec::Fit(fit) => Some(training::fit_projector_from_paths(
            &fit.recordings,
            fit.kind,
            &fit.params,
            config.effective_rms_window(),
        )?),
    };

    let classifier = match &config.classifier {
        Some(path) => {
            let (classifier, training) = model_store::load_with_training::<Classifier>(path)?;
            warn_smoothing_mismatch(config, &training, path);
            Some(classifier)
        }
        None => None,
    };

    Stages::new(
        Smoother::new(config.smoothing, config.rms_window),
        projector,
        classifier,
        config.debounce.threshold,
    )
}

impl Pipeline {
    /// Construye desde la configuración. Los modelos se cargan antes de abrir
    /// la fuente; en modo `Live` la fuente la aporta quien llama.
    pub fn from_config(config: &PipelineConfig, live: Option<SampleSource>) -> Result<Self, PipelineError> {
        let stages = build_stages(config)?;
        let source = match (&config.mode, live) {
            (Mode::Live, Some(source)) => source,
            (Mode::Live, None) => {
                return Err(PipelineError::Config("live mode needs a device transport".to_string()))
            }
            (Mode::Replay { path, paced }, _) => SampleSource::replay(path, *paced, config.sample_rate)?,
            (Mode::Convert { path }, _) => SampleSource::replay(path, false, config.sample_rate)?,
        };
        Self::with_stages(source, stages)
    }

    pub fn with_stages(source: SampleSource, stages: Stages) -> Result<Self, PipelineError> {
        stages.check_channels(source.channels())?;
        tracing::info!(source = %source.describe(), "pipeline listo");
        Ok(Self {
            source,
            stages,
            consumers: Vec::new(),
            paused: false,
            samples: 0,
            events: 0,
        })
    }

    /// Los consumidores se invocan en orden de registro
    pub fn register(&mut self, consumer: Box<dyn Consumer>) {
        tracing::debug!(consumer = consumer.name(), "consumidor registrado");
        self.consumers.push(consumer);
    }

    pub fn stages(&self) -> &Stages {
        &self.stages
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn step(&mut self) -> Result<Step, PipelineError> {
        let raw = match self.source.next_sample()? {
            Some(raw) => raw,
            None => return Ok(Step::EndOfStream),
        };

        let processed = self.stages.process(&raw)?;
        self.samples += 1;
        if processed.event.is_some() {
            self.events += 1;
        }

        for consumer in self.consumers.iter_mut() {
            consumer
                .on_sample(
                    &processed.sample,
                    processed.features.as_ref(),
                    processed.event.as_ref(),
                )
                .map_err(|source| PipelineError::Consumer {
                    name: consumer.name().to_string(),
                    source,
                })?;
        }
        Ok(Step::Processed(processed))
    }

    /// Aplica una orden; `true` si hay que salir
    fn apply(&mut self, command: ControlCommand) -> bool {
        match command {
            ControlCommand::Quit => return true,
            ControlCommand::Pause => self.set_paused(true),
            ControlCommand::Resume => self.set_paused(false),
            ControlCommand::TogglePause => self.set_paused(!self.paused),
            ControlCommand::Device(command) => {
                tracing::debug!(?command, "orden de dispositivo");
                self.source.send_command(command);
            }
            ControlCommand::SwapModels {
                projector,
                classifier,
            } => {
                if let Err(e) = self.stages.swap(projector, classifier) {
                    tracing::warn!(error = %e, "cambio de modelo rechazado");
                }
            }
        }
        false
    }

    fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            tracing::info!(paused, "pausa");
            if !paused {
                self.source.resume();
            }
        }
        self.paused = paused;
    }

    fn summary(&self, reason: StopReason) -> RunSummary {
        RunSummary {
            samples: self.samples,
            events: self.events,
            dropped: self.source.dropped(),
            reason,
        }
    }

    fn run_loop(&mut self, control: &Receiver<ControlCommand>) -> Result<RunSummary, PipelineError> {
        loop {
            loop {
                match control.try_recv() {
                    Ok(command) => {
                        if self.apply(command) {
                            return Ok(self.summary(StopReason::Quit));
                        }
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }

            if self.paused {
                match control.recv_timeout(PAUSE_POLL) {
                    Ok(command) => {
                        if self.apply(command) {
                            return Ok(self.summary(StopReason::Quit));
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        tracing::warn!("canal de control cerrado en pausa, reanudando");
                        self.set_paused(false);
                    }
                }
                continue;
            }

            if let Step::EndOfStream = self.step()? {
                return Ok(self.summary(StopReason::EndOfStream));
            }
        }
    }

    /// Bucle principal. En cualquier salida se llama a `finish` de todos los
    /// consumidores; ante un fallo reciben antes `on_fault`.
    pub fn run(&mut self, control: &Receiver<ControlCommand>) -> Result<RunSummary, PipelineError> {
        let outcome = self.run_loop(control);

        if let Err(e) = &outcome {
            let cause = e.to_string();
            tracing::error!(error = %cause, "pipeline detenido por fallo");
            for consumer in self.consumers.iter_mut() {
                consumer.on_fault(&cause);
            }
        }

        let mut finish_error = None;
        for consumer in self.consumers.iter_mut() {
            if let Err(source) = consumer.finish() {
                tracing::error!(consumer = consumer.name(), error = %source, "finish fallido");
                if finish_error.is_none() {
                    finish_error = Some(PipelineError::Consumer {
                        name: consumer.name().to_string(),
                        source,
                    });
                }
            }
        }

        let summary = outcome?;
        if let Some(e) = finish_error {
            return Err(e);
        }
        tracing::info!(
            samples = summary.samples,
            events = summary.events,
            dropped = summary.dropped,
            reason = ?summary.reason,
            "pipeline terminado"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::tests::Capture;
    use crate::source::tests::ScriptedTransport;
    use crate::source::TransportError;
    use crate::svm::SvmParams;
    use crossbeam_channel::unbounded;

    fn identity_projector(dims: usize) -> Projector {
        let components = (0..dims)
            .map(|r| (0..dims).map(|c| if r == c { 1.0 } else { 0.0 }).collect())
            .collect();
        Projector::from_parts(ProjectionKind::Pca, vec![0.0; dims], components, vec![1.0; dims], dims as f64)
            .unwrap()
    }

    fn two_class_classifier() -> Classifier {
        let features: Vec<FeatureVector> = (0..20)
            .map(|i| {
                let x = if i % 2 == 0 { -5.0 } else { 5.0 };
                FeatureVector(vec![x + (i as f64) * 0.01, 0.0])
            })
            .collect();
        let labels: Vec<GestureLabel> = (0..20)
            .map(|i| if i % 2 == 0 { GestureLabel::Idle } else { GestureLabel::Extension })
            .collect();
        Classifier::fit(&features, &labels, &SvmParams::default()).unwrap()
    }

    fn live(items: Vec<Result<Vec<f64>, TransportError>>, channels: usize) -> SampleSource {
        SampleSource::live(ScriptedTransport { items, channels }, 16)
    }

    #[test]
    fn test_classifier_requires_projector() {
        let err = Stages::new(Smoother::passthrough(), None, Some(two_class_classifier()), 5);
        assert!(matches!(err, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_component_count_must_match_classifier() {
        let err = Stages::new(
            Smoother::passthrough(),
            Some(identity_projector(3)),
            Some(two_class_classifier()),
            5,
        );
        assert!(matches!(
            err,
            Err(PipelineError::Dimension(DimensionMismatch { stage: "classifier", expected: 2, found: 3 }))
        ));
    }

    #[test]
    fn test_source_channels_checked() {
        let stages = Stages::new(Smoother::passthrough(), Some(identity_projector(2)), None, 5).unwrap();
        let result = Pipeline::with_stages(live(vec![], 8), stages);
        assert!(matches!(
            result,
            Err(PipelineError::Dimension(DimensionMismatch { stage: "projector", .. }))
        ));
    }

    #[test]
    fn test_step_emits_debounced_event() {
        let stages = Stages::new(
            Smoother::passthrough(),
            Some(identity_projector(2)),
            Some(two_class_classifier()),
            3,
        )
        .unwrap();
        let items = (0..6).map(|_| Ok(vec![5.0, 0.0])).collect();
        let mut pipeline = Pipeline::with_stages(live(items, 2), stages).unwrap();

        let mut events = Vec::new();
        for _ in 0..6 {
            if let Step::Processed(p) = pipeline.step().unwrap() {
                assert_eq!(p.label, Some(GestureLabel::Extension));
                events.extend(p.event);
            }
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].index, 2);
    }

    #[test]
    fn test_run_quit_finishes_consumers() {
        let stages = Stages::new(Smoother::passthrough(), None, None, 5).unwrap();
        let items = (0..4).map(|i| Ok(vec![i as f64])).collect();
        let mut pipeline = Pipeline::with_stages(live(items, 1), stages).unwrap();
        let capture = Capture::default();
        pipeline.register(Box::new(capture.clone()));

        let (tx, rx) = unbounded();
        tx.send(ControlCommand::Quit).unwrap();
        let summary = pipeline.run(&rx).unwrap();
        assert_eq!(summary.reason, StopReason::Quit);
        assert_eq!(summary.samples, 0);
        assert_eq!(*capture.finished.lock().unwrap(), 1);
    }

    #[test]
    fn test_transport_fault_notifies_and_finishes() {
        let stages = Stages::new(Smoother::passthrough(), None, None, 5).unwrap();
        let items = vec![Ok(vec![1.0]), Ok(vec![2.0]), Err(TransportError::Malformed { len: 3 })];
        let mut pipeline = Pipeline::with_stages(live(items, 1), stages).unwrap();
        let capture = Capture::default();
        pipeline.register(Box::new(capture.clone()));

        let (_tx, rx) = unbounded();
        let err = pipeline.run(&rx).unwrap_err();
        assert!(matches!(err, PipelineError::Source(_)));
        assert_eq!(capture.samples.lock().unwrap().len(), 2);
        assert_eq!(capture.faults.lock().unwrap().len(), 1);
        assert_eq!(*capture.finished.lock().unwrap(), 1);
    }

    #[test]
    fn test_consumer_failure_is_fatal() {
        let stages = Stages::new(Smoother::passthrough(), None, None, 5).unwrap();
        let items = (0..5).map(|i| Ok(vec![i as f64])).collect();
        let mut pipeline = Pipeline::with_stages(live(items, 1), stages).unwrap();
        let good = Capture::default();
        let bad = Capture {
            fail_at: Some(1),
            ..Capture::default()
        };
        pipeline.register(Box::new(bad.clone()));
        pipeline.register(Box::new(good.clone()));

        let (_tx, rx) = unbounded();
        let err = pipeline.run(&rx).unwrap_err();
        assert!(matches!(err, PipelineError::Consumer { ref name, .. } if name == "capture"));
        // El segundo consumidor no vio la muestra 1
        assert_eq!(good.samples.lock().unwrap().len(), 1);
        assert_eq!(*good.finished.lock().unwrap(), 1);
        assert_eq!(*bad.finished.lock().unwrap(), 1);
    }

    #[test]
    fn test_pause_keeps_source_untouched() {
        let stages = Stages::new(Smoother::rms(4), None, None, 5).unwrap();
        let items = (0..3).map(|_| Ok(vec![2.0])).collect();
        let mut pipeline = Pipeline::with_stages(live(items, 1), stages).unwrap();
        pipeline.step().unwrap();

        assert!(!pipeline.apply(ControlCommand::Pause));
        assert!(pipeline.is_paused());
        assert!(!pipeline.apply(ControlCommand::TogglePause));
        assert!(!pipeline.is_paused());
        // La ventana RMS sobrevive a la pausa
        assert_eq!(pipeline.stages().smoother().window_len(), 1);
    }

    #[test]
    fn test_paused_run_exits_on_quit() {
        let stages = Stages::new(Smoother::passthrough(), None, None, 5).unwrap();
        let items = (0..100).map(|_| Ok(vec![0.0])).collect();
        let mut pipeline = Pipeline::with_stages(live(items, 1), stages).unwrap();

        let (tx, rx) = unbounded();
        tx.send(ControlCommand::Pause).unwrap();
        let quitter = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(120));
            tx.send(ControlCommand::Quit).unwrap();
        });
        let summary = pipeline.run(&rx).unwrap();
        quitter.join().unwrap();
        assert_eq!(summary.reason, StopReason::Quit);
        assert_eq!(summary.samples, 0);
    }

    #[test]
    fn test_swap_resets_window_and_debounce() {
        let mut stages = Stages::new(
            Smoother::rms(8),
            Some(identity_projector(2)),
            Some(two_class_classifier()),
            3,
        )
        .unwrap();
        for i in 0..2 {
            stages.process(&RawSample::new(i, 0.0, vec![5.0, 0.0])).unwrap();
        }
        assert_eq!(stages.smoother().window_len(), 2);

        stages.swap(Some(identity_projector(2)), None).unwrap();
        assert_eq!(stages.smoother().window_len(), 0);
        let debouncer = stages.classifier().unwrap().debouncer();
        assert_eq!(debouncer.candidate(), None);
        assert_eq!(debouncer.stable_label(), GestureLabel::Idle);

        // Combinación inválida: no cambia nada
        assert!(stages.swap(Some(identity_projector(3)), None).is_err());
        assert_eq!(stages.projector().unwrap().output_dim(), 2);
    }

    fn write_replay(dir: &std::path::Path, rows: usize) -> PathBuf {
        use std::io::Write;
        let path = dir.join("rec.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "timestamp,emg1,emg2").unwrap();
        for i in 0..rows {
            writeln!(file, "{},{},{}", i as f64 * 0.01, i, 1).unwrap();
        }
        path
    }

    #[test]
    fn test_swap_keeps_recording_width() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_replay(dir.path(), 6);
        let output = dir.path().join("out.csv");

        let stages = Stages::new(Smoother::passthrough(), Some(identity_projector(2)), None, 5).unwrap();
        let source = SampleSource::replay(&input, false, 100.0).unwrap();
        let mut pipeline = Pipeline::with_stages(source, stages).unwrap();
        pipeline.register(Box::new(crate::recorder::RecordingConsumer::new(&output, false)));
        pipeline.step().unwrap();

        // Un proyector de una sola componente rompería la grabación en curso
        let narrow = Projector::from_parts(
            ProjectionKind::Pca,
            vec![0.0, 0.0],
            vec![vec![1.0, 0.0]],
            vec![1.0],
            2.0,
        )
        .unwrap();
        assert!(!pipeline.apply(ControlCommand::SwapModels {
            projector: Some(narrow),
            classifier: None,
        }));
        assert_eq!(pipeline.stages().projector().unwrap().output_dim(), 2);

        // Mismo ancho: se acepta y la grabación sigue
        assert!(!pipeline.apply(ControlCommand::SwapModels {
            projector: Some(identity_projector(2)),
            classifier: None,
        }));

        let (_tx, rx) = unbounded();
        let summary = pipeline.run(&rx).unwrap();
        assert_eq!(summary.reason, StopReason::EndOfStream);
        let rows = crate::recording::load_recording(&output).unwrap();
        assert_eq!(rows.len(), 6);
        assert!(rows.iter().all(|r| r.len() == 2));
    }

    #[test]
    fn test_swap_cannot_add_projector() {
        let mut stages = Stages::new(Smoother::passthrough(), None, None, 5).unwrap();
        assert!(matches!(
            stages.swap(Some(identity_projector(2)), None),
            Err(PipelineError::Config(_))
        ));
        assert!(stages.projector().is_none());
    }

    #[test]
    fn test_resume_keeps_replay_pace() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_replay(dir.path(), 21);
        let stages = Stages::new(Smoother::passthrough(), None, None, 5).unwrap();
        let source = SampleSource::replay(&input, true, 100.0).unwrap();
        let mut pipeline = Pipeline::with_stages(source, stages).unwrap();
        pipeline.step().unwrap();

        pipeline.apply(ControlCommand::Pause);
        std::thread::sleep(Duration::from_millis(300));
        pipeline.apply(ControlCommand::Resume);

        let start = std::time::Instant::now();
        for _ in 0..20 {
            assert!(matches!(pipeline.step().unwrap(), Step::Processed(_)));
        }
        // Sin reanclar saldrían todas de golpe
        assert!(start.elapsed() >= Duration::from_millis(180));
        assert!(matches!(pipeline.step().unwrap(), Step::EndOfStream));
    }

    #[test]
    fn test_live_mode_needs_source() {
        let config = PipelineConfig::default();
        assert!(matches!(
            Pipeline::from_config(&config, None),
            Err(PipelineError::Config(_))
        ));
    }
}
