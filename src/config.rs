use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use vdtap::device::EngineConfig;
use vdtap::device::hardware::{PRODUCT_ID, VENDOR_ID};
use vdtap::structs::palette::PaletteKind;

/// Settings read from the optional `--config` file. Command line flags take
/// precedence over everything here.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub device: DeviceConfig,
    pub transfers: TransferConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            vendor_id: VENDOR_ID,
            product_id: PRODUCT_ID,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransferConfig {
    pub sample_transfers: usize,
    pub packets_per_transfer: usize,
    pub packet_size: usize,
    pub status_transfers: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            sample_transfers: engine.sample_transfers,
            packets_per_transfer: engine.packets_per_transfer,
            packet_size: engine.packet_size,
            status_transfers: engine.status_transfers,
        }
    }
}

impl TransferConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            sample_transfers: self.sample_transfers,
            packets_per_transfer: self.packets_per_transfer,
            packet_size: self.packet_size,
            status_transfers: self.status_transfers,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Palette name for RGB? replies: rgb-insert, rgb, grayscale or insert.
    pub palette: String,
    pub cropped: bool,
    /// Delay between attempts to open a missing board. Zero disables
    /// reconnecting.
    pub reconnect_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 1234)),
            palette: PaletteKind::RgbInsert.name().to_string(),
            cropped: true,
            reconnect_interval_ms: 1000,
        }
    }
}

impl ServerConfig {
    pub fn palette(&self) -> Result<PaletteKind> {
        self.palette.parse().map_err(anyhow::Error::msg)
    }

    pub fn reconnect_interval(&self) -> Option<Duration> {
        (self.reconnect_interval_ms > 0).then(|| Duration::from_millis(self.reconnect_interval_ms))
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_yaml(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;

        log::debug!("Loaded config from {}: {config:?}", path.display());
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(text)?;
        config.server.palette()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() -> Result<()> {
        assert_eq!(Config::from_yaml("{}")?, Config::default());
        Ok(())
    }

    #[test]
    fn partial_overrides() -> Result<()> {
        let config = Config::from_yaml(
            "transfers:\n  sample_transfers: 64\nserver:\n  listen: \"0.0.0.0:4000\"\n  palette: grayscale\n",
        )?;

        assert_eq!(config.transfers.sample_transfers, 64);
        assert_eq!(config.transfers.packet_size, 2048);
        assert_eq!(config.server.listen.port(), 4000);
        assert_eq!(config.server.palette()?, PaletteKind::Grayscale);
        assert!(config.server.cropped);
        assert_eq!(config.device.vendor_id, 0x04b4);

        let engine = config.transfers.engine_config();
        assert_eq!(engine.sample_transfers, 64);
        assert_eq!(engine.sample_transfer_len(), 16 * 2048);
        Ok(())
    }

    #[test]
    fn unknown_fields_and_palettes_are_rejected() {
        assert!(Config::from_yaml("device:\n  serial: 1\n").is_err());
        assert!(Config::from_yaml("server:\n  palette: sepia\n").is_err());
    }

    #[test]
    fn zero_interval_disables_reconnect() -> Result<()> {
        let config = Config::from_yaml("server:\n  reconnect_interval_ms: 0\n")?;
        assert_eq!(config.server.reconnect_interval(), None);
        assert_eq!(
            ServerConfig::default().reconnect_interval(),
            Some(Duration::from_millis(1000))
        );
        Ok(())
    }
}
