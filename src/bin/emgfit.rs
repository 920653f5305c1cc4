use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};

use emgproc::classifier::Classifier;
use emgproc::logging;
use emgproc::model_store::{self, TrainingConfig};
use emgproc::projector::{ProjectionKind, Projector, ProjectorParams};
use emgproc::svm::{KernelChoice, SvmParams};
use emgproc::training::{self, parse_labeled_path, Recording, TrainingSet};
use emgproc::types::GestureLabel;

const USAGE: &str = "Uso: emgfit (--pca REC... | --ica REC... | --svm [LABEL=]REC...)
              [-c K] [--rms N] [--projector MODEL] [--kernel rbf|linear] [--gamma G]
              [-C C] [--seed S] [--out DIR] [--verbose]";

enum Target {
    Projection(ProjectionKind, Vec<PathBuf>),
    Svm(Vec<(GestureLabel, PathBuf)>),
}

struct FitOptions {
    target: Target,
    projector_params: ProjectorParams,
    svm_params: SvmParams,
    rms_window: Option<usize>,
    projector: Option<PathBuf>,
    out: PathBuf,
    verbose: bool,
}

fn value(flag: &str, next: Option<String>) -> Result<String> {
    next.ok_or_else(|| anyhow!("{} necesita un valor", flag))
}

fn number<T: std::str::FromStr>(flag: &str, next: Option<String>) -> Result<T> {
    let raw = value(flag, next)?;
    raw.parse()
        .map_err(|_| anyhow!("valor inválido para {}: '{}'", flag, raw))
}

fn parse_args() -> Result<FitOptions> {
    let mut target: Option<Target> = None;
    let mut projector_params = ProjectorParams::default();
    let mut svm_params = SvmParams::default();
    let mut rms_window = None;
    let mut projector = None;
    let mut out = PathBuf::from("training");
    let mut verbose = false;

    let mut args = env::args().skip(1).peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--pca" | "--ica" | "--svm" => {
                let mut files = Vec::new();
                while let Some(next) = args.peek() {
                    if next.starts_with('-') {
                        break;
                    }
                    files.extend(args.next());
                }
                if files.is_empty() {
                    bail!("{} necesita al menos una grabación", arg);
                }
                if target.is_some() {
                    bail!("sólo un modelo por ejecución\n{}", USAGE);
                }
                target = Some(match arg.as_str() {
                    "--pca" => Target::Projection(ProjectionKind::Pca, files.into_iter().map(PathBuf::from).collect()),
                    "--ica" => Target::Projection(ProjectionKind::Ica, files.into_iter().map(PathBuf::from).collect()),
                    _ => Target::Svm(
                        files
                            .iter()
                            .map(|f| parse_labeled_path(f).map_err(|e| anyhow!(e)))
                            .collect::<Result<Vec<_>>>()?,
                    ),
                });
            }
            "-c" | "--components" => projector_params.components = number(&arg, args.next())?,
            "--rms" => rms_window = Some(number(&arg, args.next())?),
            "--projector" => projector = Some(PathBuf::from(value(&arg, args.next())?)),
            "--kernel" => {
                svm_params.kernel = match value(&arg, args.next())?.as_str() {
                    "rbf" => KernelChoice::Rbf,
                    "linear" => KernelChoice::Linear,
                    other => bail!("kernel desconocido '{}' (rbf | linear)", other),
                }
            }
            "--gamma" => svm_params.gamma = Some(number(&arg, args.next())?),
            "-C" => svm_params.c = number(&arg, args.next())?,
            "--seed" => {
                let seed: u64 = number(&arg, args.next())?;
                projector_params.seed = seed;
                svm_params.seed = seed;
            }
            "--out" => out = PathBuf::from(value(&arg, args.next())?),
            "-v" | "--verbose" => verbose = true,
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            other => bail!("argumento inesperado '{}'\n{}", other, USAGE),
        }
    }

    let target = target.ok_or_else(|| anyhow!(USAGE))?;
    Ok(FitOptions {
        target,
        projector_params,
        svm_params,
        rms_window,
        projector,
        out,
        verbose,
    })
}

fn fit_projection(opts: &FitOptions, kind: ProjectionKind, paths: &[PathBuf]) -> Result<()> {
    println!("📐 Ajustando {} sobre {} grabaciones", kind.as_str().to_uppercase(), paths.len());
    let recordings = paths
        .iter()
        .map(|p| Recording::load(p).with_context(|| format!("no se pudo leer {}", p.display())))
        .collect::<Result<Vec<_>>>()?;

    let projector =
        training::fit_projector(&recordings, kind, &opts.projector_params, opts.rms_window)?;

    if kind == ProjectionKind::Pca {
        let mut cumulative = 0.0;
        println!("\nVarianza explicada:");
        for (i, ratio) in projector.explained_variance_ratio().iter().enumerate() {
            cumulative += ratio;
            println!("  ca{}  {:>6.2}%  (acumulada {:>6.2}%)", i + 1, ratio * 100.0, cumulative * 100.0);
        }
    }

    let echo = TrainingConfig {
        components: Some(projector.output_dim()),
        rms_window: opts.rms_window,
        seed: (kind == ProjectionKind::Ica).then_some(opts.projector_params.seed),
        recordings: recordings.iter().map(|r| r.name.clone()).collect(),
        samples: recordings.iter().map(|r| r.samples.len()).sum(),
        svm: None,
    };
    let path = model_store::save(&projector, &echo, &opts.out, chrono::Local::now())?;
    println!("\n✅ Modelo guardado en {}", path.display());
    Ok(())
}

fn fit_svm(opts: &FitOptions, labeled: &[(GestureLabel, PathBuf)]) -> Result<()> {
    let set = TrainingSet::from_paths(labeled).context("no se pudieron leer las grabaciones")?;

    let (projector, fitted_rms) = match &opts.projector {
        Some(path) => {
            let (projector, echo): (Projector, _) = model_store::load_with_training(path)
                .with_context(|| format!("no se pudo cargar {}", path.display()))?;
            println!("✅ Proyector {} ({} componentes)", projector.kind().as_str(), projector.output_dim());
            (Some(projector), echo.rms_window)
        }
        None => (None, None),
    };
    // Sin --rms se usa el suavizado con el que se ajustó el proyector
    let rms_window = opts.rms_window.or(fitted_rms);

    println!(
        "🧠 Ajustando SVM ({:?}) sobre {} muestras de {} gestos",
        opts.svm_params.kernel,
        set.sample_count(),
        set.labels().len()
    );
    let (features, labels) = training::feature_table(&set, projector.as_ref(), rms_window)?;
    let classifier = Classifier::fit(&features, &labels, &opts.svm_params)?;
    let accuracy = training::training_accuracy(&classifier, &features, &labels);
    println!("🎯 Precisión de entrenamiento: {:.1}%", accuracy * 100.0);

    let echo = TrainingConfig {
        components: Some(classifier.input_dim()),
        rms_window,
        seed: Some(opts.svm_params.seed),
        recordings: set.names(),
        samples: set.sample_count(),
        svm: Some(opts.svm_params.clone()),
    };
    let path = model_store::save(&classifier, &echo, &opts.out, chrono::Local::now())?;
    println!("✅ Modelo guardado en {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    let opts = parse_args()?;
    logging::init(opts.verbose);

    match &opts.target {
        Target::Projection(kind, paths) => fit_projection(&opts, *kind, paths),
        Target::Svm(labeled) => fit_svm(&opts, labeled),
    }
}
