//! Daemon configuration: YAML file plus the on-disk identity seed.
//!
//! Every section has serde defaults so a minimal config file runs; the
//! identity key is auto-generated under the XDG config directory when the
//! `mesh` section does not carry one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/meshrelay/config.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("identity key is not valid base64: {0}")]
    IdentityEncoding(#[from] base64::DecodeError),

    #[error("identity key must decode to 32 bytes, got {0}")]
    IdentityLength(usize),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub repeater: RepeaterSection,
    pub radio: RadioSection,
    pub hardware: Option<HardwareSection>,
    pub delays: DelaysSection,
    pub duty_cycle: DutyCycleSection,
    pub mesh: MeshSection,
    pub mqtt: MqttSection,
    pub letsmesh: LetsmeshSection,
    pub http: HttpSection,
    pub web: WebSection,
    pub storage_dir: PathBuf,
    pub logging: LoggingSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repeater: RepeaterSection::default(),
            radio: RadioSection::default(),
            hardware: None,
            delays: DelaysSection::default(),
            duty_cycle: DutyCycleSection::default(),
            mesh: MeshSection::default(),
            mqtt: MqttSection::default(),
            letsmesh: LetsmeshSection::default(),
            http: HttpSection::default(),
            web: WebSection::default(),
            storage_dir: PathBuf::from("/var/lib/meshrelay"),
            logging: LoggingSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepeaterSection {
    pub node_name: String,
    pub mode: String,
    pub cache_ttl: u64,
    pub use_score_for_tx: bool,
    pub score_threshold: f64,
    pub send_advert_interval_hours: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub allow_discovery: bool,
}

impl Default for RepeaterSection {
    fn default() -> Self {
        Self {
            node_name: "Repeater".to_string(),
            mode: "forward".to_string(),
            cache_ttl: 60,
            use_score_for_tx: false,
            score_threshold: 0.3,
            send_advert_interval_hours: 10.0,
            latitude: 0.0,
            longitude: 0.0,
            allow_discovery: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioSection {
    pub driver: String,
    pub frequency: u64,
    pub bandwidth: u32,
    pub spreading_factor: u8,
    pub coding_rate: u8,
    pub preamble_length: u16,
    pub sync_word: u16,
    pub tx_power: i8,
    pub cad: CadSection,
}

impl Default for RadioSection {
    fn default() -> Self {
        Self {
            driver: "sim".to_string(),
            frequency: 869_525_000,
            bandwidth: 250_000,
            spreading_factor: 11,
            coding_rate: 5,
            preamble_length: 17,
            sync_word: 0x12,
            tx_power: 14,
            cad: CadSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CadSection {
    pub peak_threshold: u8,
    pub min_threshold: u8,
}

impl Default for CadSection {
    fn default() -> Self {
        Self {
            peak_threshold: 23,
            min_threshold: 11,
        }
    }
}

/// SPI bus and GPIO pinout for a hardware transceiver. The sim driver
/// ignores it; a hardware backend requires it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareSection {
    pub bus_id: Option<u8>,
    pub cs_id: Option<u8>,
    pub cs_pin: Option<u8>,
    pub reset_pin: Option<u8>,
    pub busy_pin: Option<u8>,
    pub irq_pin: Option<u8>,
    pub txen_pin: Option<u8>,
    pub rxen_pin: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelaysSection {
    pub tx_delay_factor: f64,
    pub direct_tx_delay_factor: f64,
}

impl Default for DelaysSection {
    fn default() -> Self {
        Self {
            tx_delay_factor: 1.0,
            direct_tx_delay_factor: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DutyCycleSection {
    pub max_airtime_per_minute: f64,
    pub enforcement_enabled: bool,
}

impl Default for DutyCycleSection {
    fn default() -> Self {
        Self {
            max_airtime_per_minute: 3600.0,
            enforcement_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshSection {
    pub identity_key: Option<String>,
    pub global_flood_allow: bool,
}

impl Default for MeshSection {
    fn default() -> Self {
        Self {
            identity_key: None,
            global_flood_allow: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSection {
    pub enabled: bool,
    pub broker: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub base_topic: String,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            enabled: false,
            broker: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            base_topic: "meshcore/repeater".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LetsmeshSection {
    pub enabled: bool,
    pub iata_code: String,
    pub broker_index: usize,
    pub status_interval: u64,
    pub email: Option<String>,
    pub owner: Option<String>,
    pub disallowed_packet_types: Vec<u8>,
    pub model: String,
}

impl Default for LetsmeshSection {
    fn default() -> Self {
        Self {
            enabled: false,
            iata_code: "test".to_string(),
            broker_index: 0,
            status_interval: 60,
            email: None,
            owner: None,
            disallowed_packet_types: Vec::new(),
            model: "MeshRelay".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub host: String,
    pub port: u16,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub cors_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub format: Option<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            format: None,
        }
    }
}

impl Config {
    pub fn from_yaml(input: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(input)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let contents = fs::read_to_string(path)?;
        let config = Self::from_yaml(&contents)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let rendered = serde_yaml::to_string(self)?;
        fs::write(path, rendered)?;
        log::info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Resolve the 32-byte identity seed: the `mesh.identity_key` value when
    /// present, otherwise a key loaded from (or generated under) the XDG
    /// config directory.
    pub fn identity_seed(&self) -> Result<[u8; 32], ConfigError> {
        if let Some(encoded) = &self.mesh.identity_key {
            let decoded = BASE64.decode(encoded.trim())?;
            let len = decoded.len();
            return decoded
                .try_into()
                .map_err(|_| ConfigError::IdentityLength(len));
        }
        load_or_create_identity_key(None)
    }
}

/// Load the base64 identity seed from disk, generating (mode 0600) when
/// absent. `path` defaults to `$XDG_CONFIG_HOME/meshrelay/identity.key`.
pub fn load_or_create_identity_key(path: Option<&Path>) -> Result<[u8; 32], ConfigError> {
    let key_path = match path {
        Some(path) => path.to_path_buf(),
        None => default_identity_path(),
    };

    match fs::read(&key_path) {
        Ok(encoded) => {
            let decoded = BASE64.decode(String::from_utf8_lossy(&encoded).trim())?;
            let len = decoded.len();
            let key: [u8; 32] = decoded
                .try_into()
                .map_err(|_| ConfigError::IdentityLength(len))?;
            log::info!("Loaded existing identity key from {}", key_path.display());
            return Ok(key);
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    let mut key = [0u8; 32];
    rand::Rng::fill(&mut rand::thread_rng(), &mut key[..]);
    write_identity_key(&key_path, &key)?;
    log::info!("Generated and stored new identity key at {}", key_path.display());
    Ok(key)
}

fn default_identity_path() -> PathBuf {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("meshrelay").join("identity.key")
}

fn write_identity_key(path: &Path, key: &[u8; 32]) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp_path = path.with_extension("key.tmp");
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(BASE64.encode(key).as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_yaml_gets_defaults() {
        let config = Config::from_yaml("repeater:\n  node_name: ridge\n").expect("parse");
        assert_eq!(config.repeater.node_name, "ridge");
        assert_eq!(config.repeater.mode, "forward");
        assert_eq!(config.repeater.cache_ttl, 60);
        assert_eq!(config.duty_cycle.max_airtime_per_minute, 3600.0);
        assert!(config.duty_cycle.enforcement_enabled);
        assert!(config.mesh.global_flood_allow);
        assert_eq!(config.http.port, 8000);
        assert_eq!(config.radio.cad.peak_threshold, 23);
    }

    #[test]
    fn identity_key_from_config_must_be_32_bytes() {
        let mut config = Config::default();
        config.mesh.identity_key = Some(BASE64.encode([7u8; 32]));
        assert_eq!(config.identity_seed().expect("seed"), [7u8; 32]);

        config.mesh.identity_key = Some(BASE64.encode([7u8; 16]));
        assert!(matches!(
            config.identity_seed(),
            Err(ConfigError::IdentityLength(16))
        ));
    }

    #[test]
    fn identity_key_file_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("identity.key");

        let generated = load_or_create_identity_key(Some(&path)).expect("generate");
        let loaded = load_or_create_identity_key(Some(&path)).expect("load");
        assert_eq!(generated, loaded);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).expect("metadata").permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn missing_config_file_is_reported() {
        let err = Config::from_path(Path::new("/nonexistent/meshrelay.yaml"))
            .expect_err("missing file");
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn save_then_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        let mut config = Config::default();
        config.repeater.node_name = "saved".to_string();
        config.mesh.global_flood_allow = false;
        config.save(&path).expect("save");

        let loaded = Config::from_path(&path).expect("reload");
        assert_eq!(loaded.repeater.node_name, "saved");
        assert!(!loaded.mesh.global_flood_allow);
    }
}
