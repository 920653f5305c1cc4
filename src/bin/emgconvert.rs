use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::unbounded;

use emgproc::logging;
use emgproc::model_store::{self, ModelKind};
use emgproc::pipeline::Pipeline;
use emgproc::pipeline::Stages;
use emgproc::projector::{ProjectionKind, Projector, ProjectorParams};
use emgproc::recorder::RecordingConsumer;
use emgproc::smoothing::Smoother;
use emgproc::source::SampleSource;
use emgproc::training;
use emgproc::types::SAMPLING_RATE;

const USAGE: &str = "Uso: emgconvert RECORDING... [MODEL | --pca REC... | --ica REC...]
                  [-c K] [--seed S] [--rms N] [--out-dir DIR] [--verbose]";

enum ProjectorSource {
    None,
    Model(PathBuf),
    Fit(ProjectionKind, Vec<PathBuf>),
}

struct ConvertOptions {
    recordings: Vec<PathBuf>,
    projector: ProjectorSource,
    params: ProjectorParams,
    rms_window: Option<usize>,
    out_dir: PathBuf,
    verbose: bool,
}

fn number<T: std::str::FromStr>(flag: &str, next: Option<String>) -> Result<T> {
    let raw = next.ok_or_else(|| anyhow!("{} necesita un valor", flag))?;
    raw.parse()
        .map_err(|_| anyhow!("valor inválido para {}: '{}'", flag, raw))
}

fn parse_args() -> Result<ConvertOptions> {
    let mut recordings = Vec::new();
    let mut projector = ProjectorSource::None;
    let mut params = ProjectorParams::default();
    let mut rms_window = None;
    let mut out_dir = PathBuf::from("recordings");
    let mut verbose = false;

    let mut args = env::args().skip(1).peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--pca" | "--ica" => {
                let kind = if arg == "--pca" {
                    ProjectionKind::Pca
                } else {
                    ProjectionKind::Ica
                };
                let mut fit_on = Vec::new();
                while let Some(next) = args.peek() {
                    if next.starts_with('-') {
                        break;
                    }
                    fit_on.extend(args.next().map(PathBuf::from));
                }
                if fit_on.is_empty() {
                    bail!("{} necesita al menos una grabación", arg);
                }
                projector = ProjectorSource::Fit(kind, fit_on);
            }
            "-c" | "--components" => params.components = number(&arg, args.next())?,
            "--seed" => params.seed = number(&arg, args.next())?,
            "--rms" => rms_window = Some(number(&arg, args.next())?),
            "--out-dir" => {
                out_dir = PathBuf::from(args.next().ok_or_else(|| anyhow!("--out-dir necesita un valor"))?)
            }
            "-v" | "--verbose" => verbose = true,
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            other if other.starts_with('-') => bail!("opción desconocida '{}'\n{}", other, USAGE),
            // Los artefactos se reconocen por su cabecera, no por la extensión
            other => match model_store::read_header(other) {
                Ok(header) if matches!(header.kind, ModelKind::Pca | ModelKind::Ica) => {
                    projector = ProjectorSource::Model(PathBuf::from(other))
                }
                Ok(header) => bail!("{} es un modelo {}, se necesita pca o ica", other, header.kind),
                Err(_) => recordings.push(PathBuf::from(other)),
            },
        }
    }

    if recordings.is_empty() {
        bail!(USAGE);
    }
    Ok(ConvertOptions {
        recordings,
        projector,
        params,
        rms_window,
        out_dir,
        verbose,
    })
}

/// `recordings/<tipo>/<nombre>`
fn output_path(out_dir: &Path, kind: &str, input: &Path) -> Result<PathBuf> {
    let name = input
        .file_name()
        .ok_or_else(|| anyhow!("ruta sin nombre de archivo: {}", input.display()))?;
    Ok(out_dir.join(kind).join(name))
}

fn main() -> Result<()> {
    let opts = parse_args()?;
    logging::init(opts.verbose);

    let (projector, mut rms_window): (Option<Projector>, Option<usize>) = match &opts.projector {
        ProjectorSource::None => (None, opts.rms_window),
        ProjectorSource::Model(path) => {
            let (projector, echo) = model_store::load_with_training::<Projector>(path)
                .with_context(|| format!("no se pudo cargar {}", path.display()))?;
            (Some(projector), echo.rms_window)
        }
        ProjectorSource::Fit(kind, paths) => {
            println!("📐 Ajustando {} sobre {} grabaciones", kind.as_str().to_uppercase(), paths.len());
            let projector =
                training::fit_projector_from_paths(paths, *kind, &opts.params, opts.rms_window)?;
            (Some(projector), opts.rms_window)
        }
    };
    // --rms explícito manda sobre lo guardado en el modelo
    if opts.rms_window.is_some() {
        rms_window = opts.rms_window;
    }

    let kind = match (&projector, rms_window) {
        (Some(p), _) => p.kind().as_str(),
        (None, Some(_)) => "rms",
        (None, None) => "raw",
    };

    for input in &opts.recordings {
        let output = output_path(&opts.out_dir, kind, input)?;
        let stages = Stages::new(
            Smoother::new(rms_window.is_some(), rms_window.unwrap_or(0)),
            projector.clone(),
            None,
            0,
        )?;
        let source = SampleSource::replay(input, false, SAMPLING_RATE)
            .with_context(|| format!("no se pudo abrir {}", input.display()))?;
        let mut pipeline = Pipeline::with_stages(source, stages)?;
        pipeline.register(Box::new(RecordingConsumer::new(&output, rms_window.is_some())));

        let (_tx, rx) = unbounded();
        let summary = pipeline
            .run(&rx)
            .with_context(|| format!("fallo convirtiendo {}", input.display()))?;
        println!("✅ {} → {} ({} muestras)", input.display(), output.display(), summary.samples);
    }
    Ok(())
}
