//! Órdenes de control del pipeline y escucha de teclado global (evdev).

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::Sender;
use evdev::{Device, InputEventKind, Key};

use crate::classifier::Classifier;
use crate::projector::Projector;
use crate::source::DeviceCommand;

/// Se aplican entre pasos, nunca a mitad de una muestra
#[derive(Debug)]
pub enum ControlCommand {
    Pause,
    Resume,
    TogglePause,
    Quit,
    Device(DeviceCommand),
    /// Sustituye los modelos indicados; reinicia ventana y antirrebote
    SwapModels {
        projector: Option<Projector>,
        classifier: Option<Classifier>,
    },
}

/// Traducción tecla -> orden: q salir, p pausa, s dormir el dispositivo
pub fn command_for_key(key: Key) -> Option<ControlCommand> {
    match key {
        Key::KEY_Q => Some(ControlCommand::Quit),
        Key::KEY_P => Some(ControlCommand::TogglePause),
        Key::KEY_S => Some(ControlCommand::Device(DeviceCommand::Sleep)),
        Key::KEY_V => Some(ControlCommand::Device(DeviceCommand::Vibrate)),
        _ => None,
    }
}

/// Busca el primer teclado en /dev/input
pub fn find_keyboard() -> std::io::Result<Option<(PathBuf, Device)>> {
    for entry in fs::read_dir("/dev/input")?.flatten() {
        let path = entry.path();
        let is_event = path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with("event"))
            .unwrap_or(false);
        if !is_event {
            continue;
        }
        if let Ok(device) = Device::open(&path) {
            let is_keyboard = device
                .name()
                .map(|n| {
                    let n = n.to_lowercase();
                    n.contains("keyboard") || n.contains("at translated")
                })
                .unwrap_or(false);
            if is_keyboard {
                return Ok(Some((path, device)));
            }
        }
    }
    Ok(None)
}

/// Lanza el hilo de teclado. Termina tras enviar `Quit` o si el pipeline
/// deja de escuchar.
pub fn spawn_keyboard_control(device: Option<&Path>, tx: Sender<ControlCommand>) -> std::io::Result<PathBuf> {
    let (path, mut device) = match device {
        Some(path) => (path.to_path_buf(), Device::open(path)?),
        None => find_keyboard()?.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no keyboard found in /dev/input")
        })?,
    };
    tracing::info!(path = %path.display(), name = device.name().unwrap_or("?"), "teclado de control");

    thread::spawn(move || loop {
        let events = match device.fetch_events() {
            Ok(events) => events.collect::<Vec<_>>(),
            Err(e) => {
                tracing::warn!(error = %e, "lectura de teclado fallida");
                return;
            }
        };
        for ev in events {
            if let InputEventKind::Key(key) = ev.kind() {
                if ev.value() != 1 {
                    continue;
                }
                if let Some(command) = command_for_key(key) {
                    let quit = matches!(command, ControlCommand::Quit);
                    if tx.send(command).is_err() || quit {
                        return;
                    }
                }
            }
        }
    });

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_bindings() {
        assert!(matches!(command_for_key(Key::KEY_Q), Some(ControlCommand::Quit)));
        assert!(matches!(command_for_key(Key::KEY_P), Some(ControlCommand::TogglePause)));
        assert!(matches!(
            command_for_key(Key::KEY_S),
            Some(ControlCommand::Device(DeviceCommand::Sleep))
        ));
        assert!(command_for_key(Key::KEY_A).is_none());
    }
}
