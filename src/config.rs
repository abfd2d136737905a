//! JSON configuration files: meter, object list and communication.
//!
//! Loading is tolerant: every field has a default, so missing or unknown
//! fields never reject a file.

use std::fs;
use std::path::Path;
use std::time::Duration;

use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::association::Authentication;
use crate::client::{
    DEFAULT_ASSOCIATION_TIMEOUT, DEFAULT_LINK_TIMEOUT, DEFAULT_MODEM_SETTLE, DEFAULT_MODEM_TIMEOUT,
    DEFAULT_READ_TIMEOUT, ModemSettings, RetryPolicy, Timeouts,
};
use crate::hdlc::LinkState;
use crate::transport::TransportParams;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

// ============================================================================
// Meter
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    pub id: String,
    pub cosem: CosemConfig,
    pub hdlc: HdlcConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthLevel {
    None,
    #[default]
    Low,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CosemConfig {
    pub auth: AuthLevel,
    /// Low level security password.
    pub lls: String,
}

impl CosemConfig {
    pub fn authentication(&self) -> Authentication {
        match self.auth {
            AuthLevel::None => Authentication::None,
            AuthLevel::Low => Authentication::Low { password: self.lls.as_bytes().to_vec() },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HdlcConfig {
    pub phy_addr: u16,
    pub logical_device: u16,
    pub address_size: u8,
    pub client: u8,
}

impl Default for HdlcConfig {
    fn default() -> Self {
        Self { phy_addr: 17, logical_device: 1, address_size: 4, client: 1 }
    }
}

impl HdlcConfig {
    pub fn link_state(&self) -> LinkState {
        LinkState::new(self.client, self.logical_device, self.phy_addr, self.address_size)
    }
}

// ============================================================================
// Objects
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectDescriptor {
    pub name: String,
    /// Dotted six-component OBIS code, e.g. `1.0.1.8.0.255`.
    pub logical_name: String,
    pub class_id: u16,
    pub attribute_id: i8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectList {
    pub objects: Vec<ObjectDescriptor>,
}

// ============================================================================
// Communication
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Modem,
    #[default]
    Serial,
    Tcp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    pub phone: String,
    pub init: String,
    pub settle_secs: u64,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self { phone: String::new(), init: "ATZ".to_string(), settle_secs: DEFAULT_MODEM_SETTLE.as_secs() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baudrate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self { port: "/dev/ttyUSB0".to_string(), baudrate: 9600 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 4059 }
    }
}

/// Timeouts in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub modem: u64,
    pub link: u64,
    pub association: u64,
    pub read: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            modem: DEFAULT_MODEM_TIMEOUT.as_secs(),
            link: DEFAULT_LINK_TIMEOUT.as_secs(),
            association: DEFAULT_ASSOCIATION_TIMEOUT.as_secs(),
            read: DEFAULT_READ_TIMEOUT.as_secs(),
        }
    }
}

impl From<TimeoutConfig> for Timeouts {
    fn from(config: TimeoutConfig) -> Self {
        Self {
            modem: Duration::from_secs(config.modem),
            link: Duration::from_secs(config.link),
            association: Duration::from_secs(config.association),
            read: Duration::from_secs(config.read),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommConfig {
    pub device: Device,
    pub modem: ModemConfig,
    pub serial: SerialConfig,
    pub tcp: TcpConfig,
    pub retries: u32,
    pub scan_address: bool,
    pub timeouts: TimeoutConfig,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            device: Device::default(),
            modem: ModemConfig::default(),
            serial: SerialConfig::default(),
            tcp: TcpConfig::default(),
            retries: 3,
            scan_address: false,
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl CommConfig {
    /// A modem sits on the serial port; TCP connects directly.
    pub fn transport_params(&self) -> TransportParams {
        match self.device {
            Device::Modem | Device::Serial => TransportParams::Serial {
                port: self.serial.port.clone(),
                baudrate: self.serial.baudrate,
            },
            Device::Tcp => TransportParams::Tcp { host: self.tcp.host.clone(), port: self.tcp.port },
        }
    }

    pub fn modem_settings(&self) -> Option<ModemSettings> {
        (self.device == Device::Modem).then(|| ModemSettings {
            init: self.modem.init.clone(),
            phone: self.modem.phone.clone(),
            settle: Duration::from_secs(self.modem.settle_secs),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy { retries: self.retries, scan_address: self.scan_address }
    }
}

// ============================================================================
// Loading
// ============================================================================

pub fn load<T, P>(path: P) -> Result<T, ConfigError>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
    serde_json::from_str(&text)
        .map_err(|source| ConfigError::Json { path: path.display().to_string(), source })
}

/// Loads `path`, falling back to the defaults when it cannot be read.
pub fn load_or_default<T, P>(path: P) -> T
where
    T: DeserializeOwned + Default,
    P: AsRef<Path>,
{
    match load(&path) {
        Ok(config) => {
            info!("Loaded {}", path.as_ref().display());
            config
        }
        Err(err) => {
            warn!("{}; using defaults", err);
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_meter_file() {
        let file = write_file(
            r#"{ "id": "12345",
                 "cosem": { "auth": "low", "lls": "ABCDEFGH" },
                 "hdlc": { "phy_addr": 18, "logical_device": 1, "address_size": 2, "client": 16 } }"#,
        );
        let meter: MeterConfig = load(file.path()).unwrap();

        assert_eq!(meter.id, "12345");
        assert_eq!(meter.cosem.authentication(), Authentication::Low { password: b"ABCDEFGH".to_vec() });
        let link = meter.hdlc.link_state();
        assert_eq!((link.phy_address, link.addr_len, link.client_address), (18, 2, 16));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let file = write_file(r#"{ "id": "7", "hdlc": { "client": 16 }, "extra": true }"#);
        let meter: MeterConfig = load(file.path()).unwrap();

        assert_eq!(meter.hdlc, HdlcConfig { client: 16, ..HdlcConfig::default() });
        assert_eq!(meter.cosem.auth, AuthLevel::Low);
    }

    #[test]
    fn test_objects_file() {
        let file = write_file(
            r#"{ "objects": [
                { "name": "energy", "logical_name": "1.0.1.8.0.255", "class_id": 3, "attribute_id": 2 },
                { "name": "profile", "logical_name": "1.0.99.1.0.255", "class_id": 7, "attribute_id": 2 } ] }"#,
        );
        let list: ObjectList = load(file.path()).unwrap();

        assert_eq!(list.objects.len(), 2);
        assert_eq!(list.objects[1].name, "profile");
        assert_eq!(list.objects[1].class_id, 7);
    }

    #[test]
    fn test_comm_file_modem() {
        let file = write_file(
            r#"{ "device": "modem",
                 "modem": { "phone": "0123456789", "init": "AT&F" },
                 "serial": { "port": "/dev/ttyS1", "baudrate": 19200 },
                 "retries": 1, "scan_address": true,
                 "timeouts": { "link": 3 } }"#,
        );
        let comm: CommConfig = load(file.path()).unwrap();

        assert_eq!(
            comm.transport_params(),
            TransportParams::Serial { port: "/dev/ttyS1".to_string(), baudrate: 19200 }
        );
        let modem = comm.modem_settings().unwrap();
        assert_eq!(modem.phone, "0123456789");
        assert_eq!(modem.settle, Duration::from_secs(2));
        assert_eq!(comm.retry_policy(), RetryPolicy { retries: 1, scan_address: true });

        let timeouts = Timeouts::from(comm.timeouts);
        assert_eq!(timeouts.link, Duration::from_secs(3));
        assert_eq!(timeouts.modem, Duration::from_secs(70));
    }

    #[test]
    fn test_comm_file_tcp() {
        let file = write_file(r#"{ "device": "tcp", "tcp": { "host": "10.0.0.5" } }"#);
        let comm: CommConfig = load(file.path()).unwrap();

        assert_eq!(comm.transport_params(), TransportParams::Tcp { host: "10.0.0.5".to_string(), port: 4059 });
        assert!(comm.modem_settings().is_none());
    }

    #[test]
    fn test_load_errors_fall_back() {
        let file = write_file("{ not json");
        assert!(matches!(load::<CommConfig, _>(file.path()), Err(ConfigError::Json { .. })));
        assert_eq!(load_or_default::<CommConfig, _>(file.path()), CommConfig::default());

        let missing = file.path().with_extension("missing");
        assert!(matches!(load::<MeterConfig, _>(&missing), Err(ConfigError::Io { .. })));
        assert_eq!(load_or_default::<MeterConfig, _>(&missing).id, "");
    }
}
