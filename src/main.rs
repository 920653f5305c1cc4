// emgproc - Procesado EMG en tiempo real (Myo, 8 canales @ 200 Hz)
//
// Fuente en vivo (BLE vía BlueZ) o reproducción de una grabación CSV, con
// suavizado RMS opcional, proyección PCA/ICA y clasificación SVM con
// antirrebote. Los eventos se muestran por consola y opcionalmente se graban
// o se convierten en pulsaciones de teclado.
//
// Ejemplos:
//     ./target/release/emgproc D4:AA:1B:2C:3D:4E --smooth --projector training/x_model.pca \
//         --classifier training/x_model.svm --game --keyboard
//     ./target/release/emgproc --replay recordings/extension_1.csv --smooth --pca recordings/*.csv
//     ./target/release/emgproc D4:AA:1B:2C:3D:4E --sleep
//
// Para leer el teclado global:
//     sg input -c './target/release/emgproc ... --keyboard'

use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::unbounded;

use emgproc::consumer::Detached;
use emgproc::control::spawn_keyboard_control;
use emgproc::hid::GameKeys;
use emgproc::monitor::ConsoleMonitor;
use emgproc::myo::MyoTransport;
use emgproc::pipeline::{
    DebounceConfig, FitSpec, Mode, Pipeline, PipelineConfig, ProjectorSpec, StopReason,
};
use emgproc::projector::{ProjectionKind, ProjectorParams};
use emgproc::recorder::RecordingConsumer;
use emgproc::source::SampleSource;
use emgproc::logging;

/// Cola de los consumidores en hilo propio
const DETACHED_QUEUE: usize = 1024;

const USAGE: &str = "Uso: emgproc [MAC | --replay FILE [--no-pace]] [--smooth] [--rms-window N]
               [--projector MODEL | --pca REC... | --ica REC...] [-c K] [--seed S]
               [--classifier MODEL] [--threshold N] [--record FILE] [--game]
               [--keyboard] [--monitor N] [--rate HZ] [--queue N] [--sleep] [--verbose]";

struct Options {
    mac: Option<String>,
    config: PipelineConfig,
    record: Option<PathBuf>,
    game: bool,
    keyboard: bool,
    monitor_every: usize,
    sleep: bool,
    verbose: bool,
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T> {
    let value = value.ok_or_else(|| anyhow!("{} necesita un valor", flag))?;
    value
        .parse()
        .map_err(|_| anyhow!("valor inválido para {}: '{}'", flag, value))
}

fn parse_args() -> Result<Options> {
    let mut config = PipelineConfig::default();
    let mut mac = None;
    let mut replay: Option<PathBuf> = None;
    let mut paced = true;
    let mut fit: Option<(ProjectionKind, Vec<PathBuf>)> = None;
    let mut params = ProjectorParams::default();
    let mut opts = Options {
        mac: None,
        config: PipelineConfig::default(),
        record: None,
        game: false,
        keyboard: false,
        monitor_every: 0,
        sleep: false,
        verbose: false,
    };

    let mut args = env::args().skip(1).peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--replay" => replay = Some(PathBuf::from(args.next().ok_or_else(|| anyhow!(USAGE))?)),
            "--no-pace" => paced = false,
            "--smooth" => config.smoothing = true,
            "--rms-window" => config.rms_window = parse_number(&arg, args.next())?,
            "--projector" => {
                let path = args.next().ok_or_else(|| anyhow!("--projector necesita un archivo"))?;
                config.projector = ProjectorSpec::Model(PathBuf::from(path));
            }
            "--pca" | "--ica" => {
                let kind = if arg == "--pca" {
                    ProjectionKind::Pca
                } else {
                    ProjectionKind::Ica
                };
                let mut recordings = Vec::new();
                while let Some(next) = args.peek() {
                    if next.starts_with('-') {
                        break;
                    }
                    recordings.extend(args.next().map(PathBuf::from));
                }
                if recordings.is_empty() {
                    bail!("{} necesita al menos una grabación", arg);
                }
                fit = Some((kind, recordings));
            }
            "-c" | "--components" => params.components = parse_number(&arg, args.next())?,
            "--seed" => params.seed = parse_number(&arg, args.next())?,
            "--classifier" => {
                let path = args.next().ok_or_else(|| anyhow!("--classifier necesita un archivo"))?;
                config.classifier = Some(PathBuf::from(path));
            }
            "--threshold" => {
                config.debounce = DebounceConfig {
                    threshold: parse_number(&arg, args.next())?,
                }
            }
            "--record" => {
                let path = args.next().ok_or_else(|| anyhow!("--record necesita un archivo"))?;
                opts.record = Some(PathBuf::from(path));
            }
            "--game" => opts.game = true,
            "--keyboard" => opts.keyboard = true,
            "--monitor" => opts.monitor_every = parse_number(&arg, args.next())?,
            "--rate" => config.sample_rate = parse_number(&arg, args.next())?,
            "--queue" => config.queue_capacity = parse_number(&arg, args.next())?,
            "--sleep" => opts.sleep = true,
            "-v" | "--verbose" => opts.verbose = true,
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            other if other.starts_with('-') => bail!("opción desconocida '{}'\n{}", other, USAGE),
            other => {
                if mac.is_some() {
                    bail!(USAGE);
                }
                mac = Some(other.to_string());
            }
        }
    }

    if let Some((kind, recordings)) = fit {
        if matches!(config.projector, ProjectorSpec::Model(_)) {
            bail!("--projector y --pca/--ica son excluyentes");
        }
        config.projector = ProjectorSpec::Fit(FitSpec {
            kind,
            recordings,
            params,
        });
    }

    config.mode = match (replay, &mac) {
        (Some(path), None) => Mode::Replay { path, paced },
        (None, Some(_)) => Mode::Live,
        (Some(_), Some(_)) => bail!("MAC y --replay son excluyentes"),
        (None, None) => bail!(USAGE),
    };

    opts.mac = mac;
    opts.config = config;
    Ok(opts)
}

fn main() -> Result<()> {
    let opts = parse_args()?;
    logging::init(opts.verbose);
    println!("🎯 emgproc - EMG en tiempo real\n");

    if opts.sleep {
        let mac = opts.mac.as_deref().ok_or_else(|| anyhow!("--sleep necesita la MAC del Myo"))?;
        MyoTransport::new(mac)
            .deep_sleep()
            .with_context(|| format!("no se pudo dormir el Myo {}", mac))?;
        println!("😴 Myo {} en reposo profundo", mac);
        return Ok(());
    }

    let live = match (&opts.config.mode, &opts.mac) {
        (Mode::Live, Some(mac)) => {
            println!("🔧 Modo: BLE en vivo");
            println!("🎯 Objetivo BLE: {}\n", mac);
            Some(SampleSource::live(MyoTransport::new(mac.as_str()), opts.config.queue_capacity))
        }
        _ => {
            println!("🔧 Modo: reproducción\n");
            None
        }
    };
    let is_live = live.is_some();

    let mut pipeline = Pipeline::from_config(&opts.config, live).context("no se pudo iniciar el pipeline")?;
    if let Some(projector) = pipeline.stages().projector() {
        println!(
            "✅ Proyector {} ({} -> {} componentes)",
            projector.kind().as_str(),
            projector.input_dim(),
            projector.output_dim()
        );
    }
    if let Some(classifier) = pipeline.stages().classifier() {
        println!(
            "✅ Clasificador SVM ({} gestos, umbral {})",
            classifier.classifier().labels().len(),
            classifier.debouncer().threshold()
        );
    }

    pipeline.register(Box::new(ConsoleMonitor::new(opts.monitor_every)));

    if let Some(path) = &opts.record {
        let recorder = RecordingConsumer::new(path, opts.config.smoothing);
        if is_live {
            pipeline.register(Box::new(Detached::spawn_lossless(recorder, DETACHED_QUEUE)));
        } else {
            pipeline.register(Box::new(recorder));
        }
        println!("💾 Grabando en {}", path.display());
    }

    if opts.game {
        let keys = GameKeys::new().context("no se pudo crear el teclado virtual")?;
        pipeline.register(Box::new(Detached::spawn(keys, DETACHED_QUEUE)));
        println!("🎮 Teclas de juego: extensión → derecha, flexión → izquierda");
    }

    let (ctrl_tx, ctrl_rx) = unbounded();
    if opts.keyboard {
        let path = spawn_keyboard_control(None, ctrl_tx.clone()).context("no se pudo abrir el teclado")?;
        println!("⌨️  Teclado {}: q salir, p pausa, s dormir Myo", path.display());
    }

    println!("🎧 Procesando...\n");
    let summary = pipeline.run(&ctrl_rx)?;
    drop(ctrl_tx);

    match summary.reason {
        StopReason::Quit => println!("\n👋 Saliendo..."),
        StopReason::EndOfStream => println!("\n🏁 Fin de la grabación"),
    }
    if summary.dropped > 0 {
        println!("⚠️  {} muestras descartadas por cola llena", summary.dropped);
    }
    Ok(())
}
