//! Service configuration
//!
//! One file (YAML, TOML or JSON by extension) with `INSPSRV_` environment
//! overrides merged on top, e.g. `INSPSRV_PLC__HOST=10.0.0.5`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use fins_comlink::{Address, LinkConfig, ReconnectPolicy};

use crate::camera::TriggerMode;
use crate::error::{InspectionError, Result};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "INSPSRV_";

// ============================================================================
// Top level
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub plc: PlcConfig,
    #[serde(default)]
    pub inspection: InspectionConfig,
    #[serde(default)]
    pub statistics: StatisticsConfig,
    #[serde(default)]
    pub images: ImageConfig,
}

impl AppConfig {
    /// Load from file, then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| InspectionError::config("Config file must have an extension"))?;

        let figment = match extension {
            "json" => Figment::new().merge(Json::file(path)),
            "toml" => Figment::new().merge(Toml::file(path)),
            "yaml" | "yml" => Figment::new().merge(Yaml::file(path)),
            _ => {
                return Err(InspectionError::config(format!(
                    "Unsupported config format: {}",
                    extension
                )))
            },
        };

        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        figment
            .extract()
            .map_err(|e| InspectionError::config(format!("Failed to parse config: {}", e)))
    }

    /// Check everything that would otherwise fail at runtime
    pub fn validate(&self) -> Result<()> {
        if self.service.name.trim().is_empty() {
            return Err(InspectionError::config("Service name cannot be empty"));
        }

        self.plc.validate()?;
        self.inspection.validate()?;

        if self.statistics.save_interval_ms == 0 {
            return Err(InspectionError::config(
                "statistics.save_interval_ms must be greater than 0",
            ));
        }

        Ok(())
    }

    pub fn station_ids(&self) -> Vec<u32> {
        self.inspection.stations.iter().map(|s| s.id).collect()
    }
}

// ============================================================================
// Service
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log root; `INSPECTION_LOG_DIR` takes precedence
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_service_name() -> String {
    "inspsrv".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_dir: None,
        }
    }
}

// ============================================================================
// PLC
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlcConfig {
    #[serde(default = "default_plc_name")]
    pub name: String,
    #[serde(default = "default_plc_host")]
    pub host: String,
    #[serde(default = "default_plc_port")]
    pub port: u16,
    /// 0 lets the PLC assign the client node
    #[serde(default)]
    pub client_node: u8,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Word read by the heartbeat; empty disables it
    #[serde(default = "default_heartbeat_address")]
    pub heartbeat_address: String,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default)]
    pub reconnect_jitter: bool,
}

fn default_plc_name() -> String {
    "plc".to_string()
}

fn default_plc_host() -> String {
    "192.168.250.1".to_string()
}

fn default_plc_port() -> u16 {
    fins_comlink::constants::DEFAULT_PORT
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_request_timeout_ms() -> u64 {
    2000
}

fn default_heartbeat_interval_ms() -> u64 {
    1000
}

fn default_heartbeat_address() -> String {
    "D0".to_string()
}

fn default_reconnect_interval_ms() -> u64 {
    5000
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            name: default_plc_name(),
            host: default_plc_host(),
            port: default_plc_port(),
            client_node: 0,
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_address: default_heartbeat_address(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            reconnect_jitter: false,
        }
    }
}

impl PlcConfig {
    fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(InspectionError::config("plc.host cannot be empty"));
        }
        if self.connect_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(InspectionError::config("PLC timeouts must be greater than 0"));
        }
        if self.reconnect_interval_ms == 0 {
            return Err(InspectionError::config(
                "plc.reconnect_interval_ms must be greater than 0",
            ));
        }
        self.heartbeat()?;
        Ok(())
    }

    fn heartbeat(&self) -> Result<Option<Address>> {
        if self.heartbeat_address.trim().is_empty() || self.heartbeat_interval_ms == 0 {
            return Ok(None);
        }
        Ok(Some(Address::parse(&self.heartbeat_address)?.word()))
    }

    pub fn link_config(&self) -> Result<LinkConfig> {
        Ok(LinkConfig {
            name: self.name.clone(),
            host: self.host.clone(),
            port: self.port,
            client_node: self.client_node,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            heartbeat_address: self.heartbeat()?,
        })
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            interval: Duration::from_millis(self.reconnect_interval_ms),
            jitter: self.reconnect_jitter,
        }
    }
}

// ============================================================================
// Inspection
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionConfig {
    /// Trigger poll period per station
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,
    /// Consecutive NG/Error results before an alarm
    #[serde(default = "default_alarm_threshold")]
    pub alarm_threshold: u32,
    #[serde(default = "default_stations")]
    pub stations: Vec<StationConfig>,
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_capture_timeout_ms() -> u64 {
    5000
}

fn default_alarm_threshold() -> u32 {
    3
}

fn default_stations() -> Vec<StationConfig> {
    vec![StationConfig::numbered(1), StationConfig::numbered(2)]
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            capture_timeout_ms: default_capture_timeout_ms(),
            alarm_threshold: default_alarm_threshold(),
            stations: default_stations(),
        }
    }
}

impl InspectionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 || self.capture_timeout_ms == 0 {
            return Err(InspectionError::config(
                "poll_interval_ms and capture_timeout_ms must be greater than 0",
            ));
        }
        if self.alarm_threshold == 0 {
            return Err(InspectionError::config("alarm_threshold must be greater than 0"));
        }
        if self.stations.is_empty() {
            return Err(InspectionError::config("At least one station must be configured"));
        }

        let mut ids = HashSet::new();
        for station in &self.stations {
            if station.id == 0 {
                return Err(InspectionError::config("Station id 0 is reserved"));
            }
            if !ids.insert(station.id) {
                return Err(InspectionError::config(format!(
                    "Duplicate station ID: {}",
                    station.id
                )));
            }
            station.validate()?;
        }
        Ok(())
    }
}

/// One physical inspection station
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    pub camera_id: String,
    #[serde(default)]
    pub trigger_mode: TriggerMode,
    pub model_path: PathBuf,
    /// PLC bit polled for a part-ready edge, e.g. `W0.00`
    pub trigger_address: String,
    /// Float register receiving `ok_value` / `ng_value`
    pub result_address: String,
    /// Float register receiving the measured angle
    pub angle_address: String,
    #[serde(default = "default_ok_value")]
    pub ok_value: f32,
    #[serde(default)]
    pub ng_value: f32,
    /// Write `false` back to the trigger bit once handled
    #[serde(default)]
    pub clear_trigger: bool,
}

fn default_ok_value() -> f32 {
    1.0
}

impl StationConfig {
    /// Default layout for station `n`: trigger `W0.0{n-1}`, registers from `D4400`
    pub fn numbered(n: u32) -> Self {
        let base = 4400 + (n - 1) * 10;
        Self {
            id: n,
            name: format!("Station {}", n),
            camera_id: format!("cam{}", n),
            trigger_mode: TriggerMode::Software,
            model_path: PathBuf::from(format!("models/station{}.model", n)),
            trigger_address: format!("W0.{:02}", n - 1),
            result_address: format!("D{}", base),
            angle_address: format!("D{}", base + 2),
            ok_value: default_ok_value(),
            ng_value: 0.0,
            clear_trigger: false,
        }
    }

    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("Station {}", self.id)
        } else {
            self.name.clone()
        }
    }

    fn validate(&self) -> Result<()> {
        let trigger = Address::parse(&self.trigger_address)?;
        if trigger.bit.is_none() {
            return Err(InspectionError::config(format!(
                "Station {}: trigger address '{}' needs a bit suffix",
                self.id, self.trigger_address
            )));
        }
        Address::parse(&self.result_address)?;
        Address::parse(&self.angle_address)?;
        if self.camera_id.trim().is_empty() {
            return Err(InspectionError::config(format!(
                "Station {}: camera_id cannot be empty",
                self.id
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Statistics and images
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsConfig {
    #[serde(default = "default_statistics_file")]
    pub file: PathBuf,
    #[serde(default = "default_save_interval_ms")]
    pub save_interval_ms: u64,
}

fn default_statistics_file() -> PathBuf {
    PathBuf::from("data/statistics.json")
}

fn default_save_interval_ms() -> u64 {
    60_000
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            file: default_statistics_file(),
            save_interval_ms: default_save_interval_ms(),
        }
    }
}

impl StatisticsConfig {
    pub fn save_interval(&self) -> Duration {
        Duration::from_millis(self.save_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_image_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub save_ok: bool,
    #[serde(default = "default_true")]
    pub save_ng: bool,
}

fn default_image_dir() -> PathBuf {
    PathBuf::from("images")
}

fn default_true() -> bool {
    true
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            dir: default_image_dir(),
            save_ok: false,
            save_ng: true,
        }
    }
}
