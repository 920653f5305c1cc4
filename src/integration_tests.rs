//! Pruebas de extremo a extremo: grabaciones sintéticas -> ajuste ->
//! artefactos -> pipeline en reproducción.

use std::path::{Path, PathBuf};

use crossbeam_channel::unbounded;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::classifier::Classifier;
use crate::consumer::tests::Capture;
use crate::error::PipelineError;
use crate::model_store::{self, LoadError, ModelKind, TrainingConfig};
use crate::pipeline::{DebounceConfig, Mode, Pipeline, PipelineConfig, ProjectorSpec, StopReason};
use crate::projector::{ProjectionKind, Projector, ProjectorParams};
use crate::recorder::RecordingConsumer;
use crate::recording::{ColumnSet, RecordingWriter};
use crate::source::SourceError;
use crate::svm::SvmParams;
use crate::training::{self, TrainingSet};
use crate::types::{GestureLabel, NUM_CHANNELS};

/// Canales 0-3 activos en extensión, 4-7 en flexión
fn synthetic_emg(label: GestureLabel, samples: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..samples)
        .map(|_| {
            (0..NUM_CHANNELS)
                .map(|ch| {
                    let active = match label {
                        GestureLabel::Extension => ch < 4,
                        GestureLabel::Flexion => ch >= 4,
                        GestureLabel::Idle => false,
                    };
                    let level = if active { 80.0 } else { 10.0 };
                    level + rng.gen_range(-10.0..10.0)
                })
                .collect()
        })
        .collect()
}

fn write_raw(path: &Path, rows: &[Vec<f64>]) {
    let mut writer = RecordingWriter::create(path, ColumnSet::Raw(NUM_CHANNELS)).unwrap();
    for (i, row) in rows.iter().enumerate() {
        writer.write_row(i as f64 * 0.005, row).unwrap();
    }
    writer.flush().unwrap();
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    extension: PathBuf,
    flexion: PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let extension = root.join("extension_1.csv");
    let flexion = root.join("flexion_1.csv");
    write_raw(&extension, &synthetic_emg(GestureLabel::Extension, 100, 1));
    write_raw(&flexion, &synthetic_emg(GestureLabel::Flexion, 100, 2));
    Fixture {
        _dir: dir,
        root,
        extension,
        flexion,
    }
}

/// Ajusta PCA(k=2) + SVM y los guarda; devuelve las rutas de los artefactos
fn fit_and_save(fx: &Fixture, rms_window: Option<usize>) -> (PathBuf, PathBuf) {
    let set = TrainingSet::from_paths(&[
        (GestureLabel::Extension, fx.extension.clone()),
        (GestureLabel::Flexion, fx.flexion.clone()),
    ])
    .unwrap();
    let recordings: Vec<_> = set.iter().map(|(_, r)| r.clone()).collect();
    let projector = training::fit_projector(
        &recordings,
        ProjectionKind::Pca,
        &ProjectorParams::default(),
        rms_window,
    )
    .unwrap();
    let classifier =
        training::fit_classifier(&set, Some(&projector), rms_window, &SvmParams::default()).unwrap();

    let echo = TrainingConfig {
        components: Some(2),
        rms_window,
        recordings: set.names(),
        samples: set.sample_count(),
        ..TrainingConfig::default()
    };
    let out = fx.root.join("training");
    let now = chrono::Local::now();
    let pca = model_store::save(&projector, &echo, &out, now).unwrap();
    let svm = model_store::save(&classifier, &echo, &out, now).unwrap();
    (pca, svm)
}

#[test]
fn test_zero_recording_converts_to_identical_rows() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("zeros.csv");
    write_raw(&input, &vec![vec![0.0; NUM_CHANNELS]; 40]);
    let output = dir.path().join("recordings/raw/zeros.csv");

    let config = PipelineConfig {
        mode: Mode::Convert { path: input.clone() },
        ..PipelineConfig::default()
    };
    let mut pipeline = Pipeline::from_config(&config, None).unwrap();
    pipeline.register(Box::new(RecordingConsumer::new(&output, false)));
    let (_tx, rx) = unbounded();
    let summary = pipeline.run(&rx).unwrap();

    assert_eq!(summary.reason, StopReason::EndOfStream);
    assert_eq!(summary.samples, 40);
    assert_eq!(
        std::fs::read_to_string(&output).unwrap(),
        std::fs::read_to_string(&input).unwrap()
    );
}

#[test]
fn test_pca_svm_training_accuracy() {
    let fx = fixture();
    let set = TrainingSet::from_paths(&[
        (GestureLabel::Extension, fx.extension.clone()),
        (GestureLabel::Flexion, fx.flexion.clone()),
    ])
    .unwrap();
    let recordings: Vec<_> = set.iter().map(|(_, r)| r.clone()).collect();
    let projector =
        training::fit_projector(&recordings, ProjectionKind::Pca, &ProjectorParams::default(), None)
            .unwrap();
    assert_eq!(projector.output_dim(), 2);

    let (features, labels) = training::feature_table(&set, Some(&projector), None).unwrap();
    assert_eq!(features.len(), 200);
    let classifier = Classifier::fit(&features, &labels, &SvmParams::default()).unwrap();
    let accuracy = training::training_accuracy(&classifier, &features, &labels);
    assert!(accuracy >= 0.9, "training accuracy {}", accuracy);
}

#[test]
fn test_replay_with_saved_models_emits_one_event() {
    let fx = fixture();
    let (pca, svm) = fit_and_save(&fx, Some(10));

    let config = PipelineConfig {
        smoothing: true,
        rms_window: 10,
        projector: ProjectorSpec::Model(pca),
        classifier: Some(svm),
        mode: Mode::Replay {
            path: fx.extension.clone(),
            paced: false,
        },
        debounce: DebounceConfig { threshold: 5 },
        ..PipelineConfig::default()
    };
    let mut pipeline = Pipeline::from_config(&config, None).unwrap();
    let capture = Capture::default();
    pipeline.register(Box::new(capture.clone()));
    let recorded = fx.root.join("recordings/pca/extension_1.csv");
    pipeline.register(Box::new(RecordingConsumer::new(&recorded, true)));

    let (_tx, rx) = unbounded();
    let summary = pipeline.run(&rx).unwrap();
    assert_eq!(summary.samples, 100);
    assert_eq!(summary.events, 1);

    let events: Vec<_> = capture
        .samples
        .lock()
        .unwrap()
        .iter()
        .filter_map(|(index, label)| label.map(|l| (*index, l)))
        .collect();
    assert_eq!(events, vec![(4, GestureLabel::Extension)]);

    let text = std::fs::read_to_string(&recorded).unwrap();
    assert!(text.starts_with("timestamp,ca1,ca2\n"));
    assert_eq!(text.lines().count(), 101);
}

#[test]
fn test_reloaded_models_match_fitted() {
    let fx = fixture();
    let (pca, svm) = fit_and_save(&fx, None);

    let projector: Projector = model_store::load(&pca).unwrap();
    let classifier: Classifier = model_store::load(&svm).unwrap();
    let refit = {
        let set = TrainingSet::from_paths(&[
            (GestureLabel::Extension, fx.extension.clone()),
            (GestureLabel::Flexion, fx.flexion.clone()),
        ])
        .unwrap();
        let recordings: Vec<_> = set.iter().map(|(_, r)| r.clone()).collect();
        training::fit_projector(&recordings, ProjectionKind::Pca, &ProjectorParams::default(), None)
            .unwrap()
    };
    assert_eq!(projector, refit);

    for row in synthetic_emg(GestureLabel::Flexion, 5, 9) {
        let features = projector.transform(&row).unwrap();
        assert_eq!(features, refit.transform(&row).unwrap());
        assert_eq!(classifier.predict(&features).unwrap(), GestureLabel::Flexion);
    }
}

#[test]
fn test_classifier_artifact_rejected_as_projector() {
    let fx = fixture();
    let (pca, svm) = fit_and_save(&fx, None);

    let config = PipelineConfig {
        projector: ProjectorSpec::Model(svm),
        mode: Mode::Convert {
            path: fx.extension.clone(),
        },
        ..PipelineConfig::default()
    };
    assert!(matches!(
        Pipeline::from_config(&config, None),
        Err(PipelineError::Load(LoadError::KindMismatch {
            found: ModelKind::Svm,
            ..
        }))
    ));

    assert!(matches!(
        model_store::load::<Classifier>(&pca),
        Err(LoadError::KindMismatch { found: ModelKind::Pca, .. })
    ));
}

#[test]
fn test_fault_still_flushes_recording() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("broken.csv");
    std::fs::write(&input, "timestamp,emg1,emg2\n0,1,2\n0.005,3,4\n0.01,x,6\n0.015,7,8\n").unwrap();
    let output = dir.path().join("out.csv");

    let config = PipelineConfig {
        mode: Mode::Convert { path: input },
        ..PipelineConfig::default()
    };
    let mut pipeline = Pipeline::from_config(&config, None).unwrap();
    pipeline.register(Box::new(RecordingConsumer::new(&output, false)));
    let (_tx, rx) = unbounded();
    let err = pipeline.run(&rx).unwrap_err();

    assert!(matches!(err, PipelineError::Source(SourceError::Recording(_))));
    assert_eq!(
        std::fs::read_to_string(&output).unwrap(),
        "timestamp,emg1,emg2\n0,1,2\n0.005,3,4\n"
    );
}
