use std::time::Duration;

use uinput::device::Device;
use uinput::event::keyboard;

use crate::consumer::{Consumer, ConsumerError};
use crate::types::{FeatureVector, GestureEvent, GestureLabel, RawSample};

/// Tecla de juego asociada a cada gesto confirmado
pub fn key_for(label: GestureLabel) -> Option<keyboard::Key> {
    match label {
        GestureLabel::Extension => Some(keyboard::Key::Right),
        GestureLabel::Flexion => Some(keyboard::Key::Left),
        GestureLabel::Idle => None,
    }
}

/// Teclado virtual (uinput) que pulsa flechas con cada gesto
pub struct GameKeys {
    dev: Device,
    taps: u64,
}

impl GameKeys {
    pub fn new() -> Result<Self, ConsumerError> {
        let dev = uinput::default()
            .and_then(|b| b.name("emgproc-game"))
            .and_then(|b| b.event(uinput::event::Keyboard::All))
            .and_then(|b| b.create())
            .map_err(|e| ConsumerError::Hid(e.to_string()))?;
        tracing::info!("teclado virtual creado (/dev/uinput)");
        Ok(Self { dev, taps: 0 })
    }

    fn key_tap(&mut self, key: keyboard::Key) -> Result<(), uinput::Error> {
        self.dev.press(&keyboard::Keyboard::Key(key))?;
        self.dev.synchronize()?;
        std::thread::sleep(Duration::from_millis(10));
        self.dev.release(&keyboard::Keyboard::Key(key))?;
        self.dev.synchronize()
    }

    pub fn taps(&self) -> u64 {
        self.taps
    }
}

impl Consumer for GameKeys {
    fn name(&self) -> &str {
        "game"
    }

    fn on_sample(
        &mut self,
        _sample: &RawSample,
        _features: Option<&FeatureVector>,
        event: Option<&GestureEvent>,
    ) -> Result<(), ConsumerError> {
        let key = match event.and_then(|e| key_for(e.label)) {
            Some(key) => key,
            None => return Ok(()),
        };
        self.key_tap(key).map_err(|e| ConsumerError::Hid(e.to_string()))?;
        self.taps += 1;
        tracing::debug!(?key, "tecla enviada");
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ConsumerError> {
        tracing::info!(taps = self.taps, "teclado virtual cerrado");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_mapping() {
        assert!(matches!(key_for(GestureLabel::Extension), Some(keyboard::Key::Right)));
        assert!(matches!(key_for(GestureLabel::Flexion), Some(keyboard::Key::Left)));
        assert!(key_for(GestureLabel::Idle).is_none());
    }
}
