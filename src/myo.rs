//! Transporte BLE del brazalete Myo vía BlueZ (D-Bus).
//!
//! Flujo: encender adaptador, conectar por MAC, localizar características
//! GATT por UUID, poner el modo EMG crudo y suscribirse a las cuatro
//! características EMG. Cada notificación trae dos muestras de 8 canales.
//! El nivel de batería se refleja en los LEDs (rojo por debajo del 5%).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::Receiver;
use dbus::arg::{PropMap, RefArg, Variant};
use dbus::blocking::stdintf::org_freedesktop_dbus::ObjectManager;
use dbus::blocking::Connection;

use crate::source::{DeviceCommand, SampleSink, Transport, TransportError};
use crate::types::NUM_CHANNELS;

const BLUEZ: &str = "org.bluez";
const GATT_CHARACTERISTIC: &str = "org.bluez.GattCharacteristic1";

const COMMAND_CHAR: u16 = 0x0401;
const EMG_CHARS: [u16; 4] = [0x0105, 0x0205, 0x0305, 0x0405];
/// Característica estándar Battery Level
const BATTERY_LEVEL_UUID: &str = "00002a19-0000-1000-8000-00805f9b34fb";
pub const LOW_BATTERY_PERCENT: u8 = 5;

/// Bytes por notificación EMG: 2 muestras x 8 canales i8
pub const EMG_PACKET_LEN: usize = 2 * NUM_CHANNELS;

// Códigos de comando del protocolo Myo
const CMD_SET_MODE: u8 = 0x01;
const CMD_VIBRATE: u8 = 0x03;
const CMD_DEEP_SLEEP: u8 = 0x04;
const CMD_SET_LEDS: u8 = 0x06;
const CMD_SET_SLEEP_MODE: u8 = 0x09;

const EMG_MODE_RAW: u8 = 0x03;
const IMU_MODE_NONE: u8 = 0x00;
const CLASSIFIER_MODE_DISABLED: u8 = 0x00;
const SLEEP_MODE_NEVER: u8 = 0x01;
const VIBRATION_SHORT: u8 = 0x01;

const LED_RED: [u8; 3] = [255, 0, 0];
const LED_PURPLE: [u8; 3] = [128, 128, 255];

impl From<dbus::Error> for TransportError {
    fn from(e: dbus::Error) -> Self {
        TransportError::Bus(e.to_string())
    }
}

/// UUID completo a partir del identificador corto del servicio Myo
pub fn myo_uuid(short: u16) -> String {
    format!("d506{:04x}-a904-deb9-4748-2c7f4a124842", short)
}

/// Comando `set_mode`: EMG crudo, sin IMU, sin clasificador interno
pub fn set_mode_packet() -> Vec<u8> {
    vec![CMD_SET_MODE, 3, EMG_MODE_RAW, IMU_MODE_NONE, CLASSIFIER_MODE_DISABLED]
}

pub fn command_packet(command: DeviceCommand) -> Vec<u8> {
    match command {
        DeviceCommand::Sleep => vec![CMD_DEEP_SLEEP, 0],
        DeviceCommand::NeverSleep => vec![CMD_SET_SLEEP_MODE, 1, SLEEP_MODE_NEVER],
        DeviceCommand::Vibrate => vec![CMD_VIBRATE, 1, VIBRATION_SHORT],
    }
}

/// Comando `set_leds`: color del logo y de la barra
pub fn leds_packet(logo: [u8; 3], bar: [u8; 3]) -> Vec<u8> {
    let mut packet = vec![CMD_SET_LEDS, 6];
    packet.extend_from_slice(&logo);
    packet.extend_from_slice(&bar);
    packet
}

/// LEDs según batería: rojo si queda poca, morado si no
pub fn battery_leds_packet(level: u8) -> Vec<u8> {
    let color = if level < LOW_BATTERY_PERCENT {
        LED_RED
    } else {
        LED_PURPLE
    };
    leds_packet(color, color)
}

/// Decodifica una notificación EMG en dos muestras de 8 canales
pub fn decode_emg_packet(value: &[u8]) -> Result<Vec<Vec<f64>>, TransportError> {
    if value.len() != EMG_PACKET_LEN {
        return Err(TransportError::Malformed { len: value.len() });
    }
    Ok(value
        .chunks_exact(NUM_CHANNELS)
        .map(|chunk| chunk.iter().map(|&b| b as i8 as f64).collect())
        .collect())
}

struct MyoCharacteristics {
    command: String,
    emg: Vec<String>,
    battery: Option<String>,
}

pub struct MyoTransport {
    mac: String,
    adapter: String,
}

impl MyoTransport {
    pub fn new(mac: impl Into<String>) -> Self {
        Self {
            mac: mac.into(),
            adapter: "hci0".to_string(),
        }
    }

    pub fn with_adapter(mut self, adapter: impl Into<String>) -> Self {
        self.adapter = adapter.into();
        self
    }

    fn adapter_path(&self) -> String {
        format!("/org/bluez/{}", self.adapter)
    }

    fn device_path(&self) -> String {
        format!("{}/dev_{}", self.adapter_path(), self.mac.replace(':', "_"))
    }

    fn connect(&self, conn: &Connection) -> Result<(), TransportError> {
        let adapter = conn.with_proxy(BLUEZ, self.adapter_path(), Duration::from_secs(5));
        let _: () = adapter.method_call(
            "org.freedesktop.DBus.Properties",
            "Set",
            ("org.bluez.Adapter1", "Powered", Variant(true)),
        )?;
        tracing::debug!(adapter = %self.adapter, "adaptador encendido");

        let stop: Result<(), dbus::Error> = adapter.method_call("org.bluez.Adapter1", "StopDiscovery", ());
        if let Err(e) = stop {
            if !e.to_string().contains("No discovery started") {
                tracing::warn!(error = %e, "no se pudo detener el descubrimiento");
            }
        }

        let device = conn.with_proxy(BLUEZ, self.device_path(), Duration::from_secs(10));
        if let Err(e) = device.method_call::<(), _, _, _>("org.bluez.Device1", "Connect", ()) {
            tracing::warn!(mac = %self.mac, error = %e, "conexión fallida, reintentando en 3 s");
            std::thread::sleep(Duration::from_secs(3));
            device.method_call::<(), _, _, _>("org.bluez.Device1", "Connect", ())?;
        }
        tracing::info!(mac = %self.mac, "Myo conectado");
        // Resolución de servicios GATT
        std::thread::sleep(Duration::from_secs(2));
        Ok(())
    }

    fn find_characteristics(&self, conn: &Connection) -> Result<MyoCharacteristics, TransportError> {
        let root = conn.with_proxy(BLUEZ, "/", Duration::from_secs(5));
        let objects = root.get_managed_objects()?;
        let device_prefix = format!("{}/", self.device_path());

        let lookup = |uuid: &str| -> Option<String> {
            objects
                .iter()
                .filter(|(path, _)| path.starts_with(&device_prefix))
                .find(|(_, interfaces)| {
                    interfaces
                        .get(GATT_CHARACTERISTIC)
                        .and_then(|props| props.get("UUID"))
                        .and_then(|v| v.0.as_str())
                        .map(|s| s.eq_ignore_ascii_case(uuid))
                        .unwrap_or(false)
                })
                .map(|(path, _)| path.to_string())
        };
        let find = |short: u16| -> Result<String, TransportError> {
            let uuid = myo_uuid(short);
            lookup(&uuid).ok_or(TransportError::CharacteristicNotFound(uuid))
        };

        let command = find(COMMAND_CHAR)?;
        let emg = EMG_CHARS.iter().map(|&c| find(c)).collect::<Result<Vec<_>, _>>()?;
        let battery = lookup(BATTERY_LEVEL_UUID);
        if battery.is_none() {
            tracing::warn!(mac = %self.mac, "sin característica de batería");
        }
        Ok(MyoCharacteristics { command, emg, battery })
    }

    /// Conecta, manda el Myo a dormir y termina (`--sleep`)
    pub fn deep_sleep(&self) -> Result<(), TransportError> {
        let conn = Connection::new_system()?;
        self.connect(&conn)?;
        let chars = self.find_characteristics(&conn)?;
        write_value(&conn, &chars.command, command_packet(DeviceCommand::Sleep))?;
        tracing::info!(mac = %self.mac, "Myo en reposo profundo");
        Ok(())
    }
}

fn write_value(conn: &Connection, path: &str, bytes: Vec<u8>) -> Result<(), TransportError> {
    let proxy = conn.with_proxy(BLUEZ, path, Duration::from_secs(5));
    let options = PropMap::new();
    proxy.method_call::<(), _, _, _>(GATT_CHARACTERISTIC, "WriteValue", (bytes, options))?;
    Ok(())
}

impl Transport for MyoTransport {
    fn name(&self) -> String {
        format!("myo {}", self.mac)
    }

    fn channels(&self) -> usize {
        NUM_CHANNELS
    }

    fn run(self, samples: SampleSink, commands: Receiver<DeviceCommand>) -> Result<(), TransportError> {
        let conn = Connection::new_system()?;
        self.connect(&conn)?;

        let chars = self.find_characteristics(&conn)?;
        write_value(&conn, &chars.command, set_mode_packet())?;
        write_value(&conn, &chars.command, command_packet(DeviceCommand::NeverSleep))?;

        for path in &chars.emg {
            let proxy = conn.with_proxy(BLUEZ, path.as_str(), Duration::from_secs(5));
            proxy.method_call::<(), _, _, _>(GATT_CHARACTERISTIC, "StartNotify", ())?;
        }
        tracing::info!(characteristics = chars.emg.len(), "notificaciones EMG activas");

        if let Some(path) = &chars.battery {
            let proxy = conn.with_proxy(BLUEZ, path.as_str(), Duration::from_secs(5));
            if let Err(e) = proxy.method_call::<(), _, _, _>(GATT_CHARACTERISTIC, "StartNotify", ()) {
                tracing::warn!(error = %e, "no se pudo suscribir a la batería");
            }
        }

        use dbus::blocking::stdintf::org_freedesktop_dbus::PropertiesPropertiesChanged as PC;
        use dbus::message::SignalArgs;

        // Primer fallo observado dentro del callback; `Ok(())` = el pipeline cerró
        let outcome: Arc<Mutex<Option<Result<(), TransportError>>>> = Arc::new(Mutex::new(None));
        // Último nivel de batería pendiente de reflejar en los LEDs
        let battery: Arc<Mutex<Option<u8>>> = Arc::new(Mutex::new(None));
        let emg_paths: HashSet<String> = chars.emg.iter().cloned().collect();
        let battery_path = chars.battery.clone();
        let device_path = self.device_path();

        let cb_outcome = outcome.clone();
        let cb_battery = battery.clone();
        conn.add_match(PC::match_rule(None, None), move |pc: PC, _, msg| {
            let path = match msg.path() {
                Some(p) => p.to_string(),
                None => return true,
            };

            let finish = |result: Result<(), TransportError>| {
                if let Ok(mut slot) = cb_outcome.lock() {
                    slot.get_or_insert(result);
                }
            };

            if path == device_path {
                let connected = pc
                    .changed_properties
                    .get("Connected")
                    .and_then(|v| v.0.as_u64());
                if connected == Some(0) {
                    finish(Err(TransportError::Disconnected));
                }
                return true;
            }

            let is_battery = battery_path.as_deref() == Some(path.as_str());
            if !is_battery && !emg_paths.contains(&path) {
                return true;
            }

            if let Some(value_var) = pc.changed_properties.get("Value") {
                let value: Vec<u8> = match value_var.0.as_iter() {
                    Some(iter) => iter.filter_map(|item| item.as_u64().map(|b| b as u8)).collect(),
                    None => return true,
                };
                if is_battery {
                    if let (Some(&level), Ok(mut slot)) = (value.first(), cb_battery.lock()) {
                        *slot = Some(level);
                    }
                    return true;
                }
                match decode_emg_packet(&value) {
                    Ok(pair) => {
                        for channels in pair {
                            if samples.push(channels).is_err() {
                                finish(Ok(()));
                                break;
                            }
                        }
                    }
                    Err(e) => finish(Err(e)),
                }
            }
            true
        })?;

        loop {
            conn.process(Duration::from_millis(100))?;

            let done = outcome.lock().ok().and_then(|mut slot| slot.take());
            if let Some(result) = done {
                return result;
            }

            let level = battery.lock().ok().and_then(|mut slot| slot.take());
            if let Some(level) = level {
                tracing::info!(level, "batería del Myo");
                write_value(&conn, &chars.command, battery_leds_packet(level))?;
            }

            for command in commands.try_iter() {
                tracing::debug!(?command, "orden al Myo");
                write_value(&conn, &chars.command, command_packet(command))?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_two_samples() {
        let mut packet = vec![0u8; EMG_PACKET_LEN];
        packet[0] = 5;
        packet[7] = 0xFF; // -1
        packet[8] = 0x80; // -128
        packet[15] = 127;

        let samples = decode_emg_packet(&packet).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].len(), NUM_CHANNELS);
        assert_eq!(samples[0][0], 5.0);
        assert_eq!(samples[0][7], -1.0);
        assert_eq!(samples[1][0], -128.0);
        assert_eq!(samples[1][7], 127.0);
    }

    #[test]
    fn test_decode_rejects_bad_length() {
        assert!(matches!(
            decode_emg_packet(&[0u8; 15]),
            Err(TransportError::Malformed { len: 15 })
        ));
        assert!(decode_emg_packet(&[]).is_err());
    }

    #[test]
    fn test_uuid_and_commands() {
        assert_eq!(myo_uuid(0x0401), "d5060401-a904-deb9-4748-2c7f4a124842");
        assert_eq!(set_mode_packet(), vec![0x01, 3, 0x03, 0x00, 0x00]);
        assert_eq!(command_packet(DeviceCommand::Sleep), vec![0x04, 0]);
        assert_eq!(command_packet(DeviceCommand::NeverSleep), vec![0x09, 1, 1]);
        assert_eq!(command_packet(DeviceCommand::Vibrate), vec![0x03, 1, 1]);
    }

    #[test]
    fn test_battery_leds() {
        assert_eq!(
            leds_packet([1, 2, 3], [4, 5, 6]),
            vec![0x06, 6, 1, 2, 3, 4, 5, 6]
        );
        assert_eq!(battery_leds_packet(4), vec![0x06, 6, 255, 0, 0, 255, 0, 0]);
        assert_eq!(battery_leds_packet(LOW_BATTERY_PERCENT), vec![0x06, 6, 128, 128, 255, 128, 128, 255]);
        assert_eq!(battery_leds_packet(100), battery_leds_packet(50));
    }
}
