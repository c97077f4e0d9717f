use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use stockyard_core::EngineConfig;
use stockyard_core::device::HttpDeviceTransport;
use url::Url;

use crate::error::ConfigGuardRailError;

/// Everything a Stockyard process reads at startup.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StockyardConfig {
    /// Engine tuning: processor cadence, device timings, occupancy thresholds,
    /// task policy, grid size and event fan-out.
    pub engine: EngineConfig,
    /// How to reach the controller.
    pub device: DeviceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Real controller reached over HTTP.
    Http,
    /// In-process simulator.
    #[default]
    Simulated,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub transport: TransportKind,
    /// Controller root, e.g. `http://192.168.4.1/`. Required for `http`.
    pub base_url: Option<Url>,
    /// Duration of one physical action in the simulator.
    pub simulated_step_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Simulated,
            base_url: None,
            simulated_step_ms: 250,
        }
    }
}

impl DeviceConfig {
    pub fn simulated_step(&self) -> Duration {
        Duration::from_millis(self.simulated_step_ms)
    }

    /// HTTP link to the configured controller, or `None` when the simulator
    /// is selected.
    pub fn http_transport(
        &self,
        command_timeout: Duration,
    ) -> anyhow::Result<Option<HttpDeviceTransport>> {
        if self.transport != TransportKind::Http {
            return Ok(None);
        }
        let base_url = self
            .base_url
            .as_ref()
            .ok_or(ConfigGuardRailError::MissingBaseUrl)?;
        let transport = HttpDeviceTransport::new(base_url, command_timeout)
            .with_context(|| format!("cannot build http transport for {base_url}"))?;
        tracing::debug!(endpoint = %transport.endpoint(), "using http device transport");
        Ok(Some(transport))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl StockyardConfig {
    /// Reject values that would stall or misroute the engine.
    pub fn validate(&self) -> Result<(), ConfigGuardRailError> {
        let grid = self.engine.grid;
        if grid.rows == 0 || grid.cols == 0 {
            return Err(ConfigGuardRailError::EmptyGrid {
                rows: grid.rows,
                cols: grid.cols,
            });
        }

        let occupancy = &self.engine.occupancy;
        let processor = &self.engine.processor;
        let device = &self.engine.device;
        let positive: [(&'static str, u64); 8] = [
            ("engine.occupancy.confirm_threshold", u64::from(occupancy.confirm_threshold)),
            ("engine.occupancy.clear_threshold", u64::from(occupancy.clear_threshold)),
            ("engine.processor.poll_interval_ms", processor.poll_interval_ms),
            ("engine.processor.idle_interval_ms", processor.idle_interval_ms),
            ("engine.device.command_timeout_ms", device.command_timeout_ms),
            ("engine.device.poll_interval_ms", device.poll_interval_ms),
            ("engine.device.ready_timeout_ms", device.ready_timeout_ms),
            ("engine.events.channel_capacity", self.engine.events.channel_capacity as u64),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigGuardRailError::ZeroValue { field });
        }

        if self.device.transport == TransportKind::Http {
            let url = self
                .device
                .base_url
                .as_ref()
                .ok_or(ConfigGuardRailError::MissingBaseUrl)?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigGuardRailError::UnsupportedScheme {
                    scheme: url.scheme().to_string(),
                });
            }
        }
        Ok(())
    }
}
