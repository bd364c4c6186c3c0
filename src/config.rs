//! Client configuration
//!
//! Read from TOML. Every field has a default, so a partial file (or none at
//! all) is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::protocol::{CompressionType, SampleType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Sample rate requested from the server on start
    pub sample_rate: i32,
    pub sample_type: SampleType,
    pub compression: CompressionType,
    /// Lossy codec aggressiveness, sent as SET_EFFT_LOSS_RATE
    pub loss_factor: f64,
    pub rx_prebuffer_msec: u32,
    pub tx_prebuffer_msec: u32,
    pub protocol_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Pre-shared key for the challenge-response handshake
    pub hmac_key: Option<String>,
    /// Added to the noise figure when refilling dropped FFT bins
    pub noise_multiplier_db: f32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            sample_rate: 768_000,
            sample_type: SampleType::I16,
            compression: CompressionType::None,
            loss_factor: 8.0,
            rx_prebuffer_msec: DEFAULT_RX_PREBUFFER_MS,
            tx_prebuffer_msec: DEFAULT_TX_PREBUFFER_MS,
            protocol_timeout_ms: PROTOCOL_TIMEOUT_MS,
            connect_timeout_ms: CONNECT_TIMEOUT_MS,
            hmac_key: None,
            noise_multiplier_db: 0.0,
        }
    }
}

impl ClientConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// `client.toml` in the platform config directory
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "iq-remote", "iq-remote-client")
            .map(|dirs| dirs.config_dir().join("client.toml"))
    }

    /// Load from the default path, falling back to defaults when absent
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("host is empty".into()));
        }
        if self.port == 0 {
            return Err(Error::Config("port must be non-zero".into()));
        }
        if self.sample_rate <= 0 {
            return Err(Error::Config(format!("invalid sample rate {}", self.sample_rate)));
        }
        if self.protocol_timeout_ms == 0 {
            return Err(Error::Config("protocol timeout must be non-zero".into()));
        }
        Ok(())
    }

    pub fn hmac_key_bytes(&self) -> Option<&[u8]> {
        self.hmac_key.as_deref().map(str::as_bytes)
    }

    pub fn protocol_timeout(&self) -> Duration {
        Duration::from_millis(self.protocol_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = ClientConfig::from_toml(
            r#"
            host = "sdr.local"
            compression = "lossy"
            sample_type = "f32"
            hmac_key = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(config.host, "sdr.local");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.compression, CompressionType::Lossy);
        assert_eq!(config.sample_type, SampleType::F32);
        assert_eq!(config.hmac_key_bytes(), Some(&b"secret"[..]));
        assert_eq!(config.protocol_timeout(), Duration::from_millis(PROTOCOL_TIMEOUT_MS));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = ClientConfig::default();
        config.rx_prebuffer_msec = 250;
        config.noise_multiplier_db = -3.0;
        let text = config.to_toml().unwrap();
        assert_eq!(ClientConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            ClientConfig::from_toml("port = 0"),
            Err(Error::Config(_))
        ));
        assert!(ClientConfig::from_toml("sample_rate = -1").is_err());
        assert!(ClientConfig::from_toml("compression = \"brotli\"").is_err());
    }
}
