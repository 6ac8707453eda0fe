use crate::catalog::{validate_model_name, RESERVED_NAMES};
use crate::error::{ModelgateError, Result};
use crate::io::atomic_write;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "modelgate.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ModelsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Directory of per-model unit config files (`PORT="..."` lines).
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub inline: Vec<InlineModel>,
    /// Host the model processes listen on.
    #[serde(default = "default_model_host")]
    pub default_host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineModel {
    pub name: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub host: Option<String>,
}

fn default_model_host() -> String {
    "localhost".to_string()
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            inline: Vec::new(),
            default_host: default_model_host(),
        }
    }
}

// ---------------------------------------------------------------------------
// SupervisorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SupervisorConfig {
    /// Drive systemd template units on this host.
    Systemctl {
        #[serde(default = "default_unit_template")]
        unit_template: String,
        #[serde(default = "default_true")]
        sudo: bool,
    },
    /// Delegate to another modelgate instance over HTTP.
    Remote { url: String },
    /// In-memory supervisor for local dry runs.
    Memory,
}

fn default_unit_template() -> String {
    "model@{name}".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::Systemctl {
            unit_template: default_unit_template(),
            sudo: true,
        }
    }
}

// ---------------------------------------------------------------------------
// ActivityConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityConfig {
    #[serde(default = "default_active_within")]
    pub active_within_minutes: u32,
    #[serde(default = "default_idle_after")]
    pub idle_after_minutes: u32,
    /// How often the activity summary is written to the log.
    #[serde(default = "default_summary_interval")]
    pub summary_interval_minutes: u32,
    /// Persist last-activity timestamps across restarts.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

fn default_active_within() -> u32 {
    10
}

fn default_idle_after() -> u32 {
    30
}

fn default_summary_interval() -> u32 {
    10
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            active_within_minutes: default_active_within(),
            idle_after_minutes: default_idle_after(),
            summary_interval_minutes: default_summary_interval(),
            db_path: None,
        }
    }
}

impl ActivityConfig {
    pub fn active_within(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.active_within_minutes))
    }

    pub fn idle_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.idle_after_minutes))
    }
}

// ---------------------------------------------------------------------------
// ReaperConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_reaper_interval")]
    pub interval_secs: u64,
    /// Endpoints to call on every tick while no model matching the pattern
    /// is active.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notify: Vec<IdleNotifyRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdleNotifyRule {
    /// Regex matched against model names.
    pub pattern: String,
    /// URL that receives a GET.
    pub endpoint: String,
}

impl IdleNotifyRule {
    pub fn matcher(&self) -> Result<regex::Regex> {
        regex::Regex::new(&self.pattern).map_err(|e| {
            ModelgateError::Config(format!("invalid notify pattern '{}': {e}", self.pattern))
        })
    }
}

fn default_reaper_interval() -> u64 {
    600
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_reaper_interval(),
            notify: Vec::new(),
        }
    }
}

impl ReaperConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }
}

// ---------------------------------------------------------------------------
// GateConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
    /// Status returned once a cold model is ready. Must be one the proxy's
    /// `proxy_next_upstream` treats as retryable, and must differ from the
    /// 504 used for start timeouts.
    #[serde(default = "default_retry_status")]
    pub retry_status: u16,
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_ready_timeout() -> u64 {
    60
}

fn default_retry_status() -> u16 {
    503
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            ready_timeout_secs: default_ready_timeout(),
            retry_status: default_retry_status(),
        }
    }
}

impl GateConfig {
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ready_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ready_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// RoutingConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_routing_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    /// Base URL the proxy and the activity monitor use to reach this service.
    #[serde(default = "default_gate_url")]
    pub gate_url: String,
    #[serde(default)]
    pub nginx_conf_path: Option<PathBuf>,
    #[serde(default)]
    pub rules_path: Option<PathBuf>,
    #[serde(default)]
    pub configmap: Option<ConfigMapTarget>,
    #[serde(default)]
    pub webui: Option<WebUiTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMapTarget {
    #[serde(default = "default_configmap_name")]
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebUiTarget {
    pub url: String,
    /// Hostname Open WebUI uses to reach the proxy.
    pub router_host: String,
}

fn default_routing_interval() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5
}

fn default_gate_url() -> String {
    "http://localhost:5003".to_string()
}

fn default_configmap_name() -> String {
    "nginx-config-map".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_routing_interval(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
            gate_url: default_gate_url(),
            nginx_conf_path: None,
            rules_path: None,
            configmap: None,
            webui: None,
        }
    }
}

impl RoutingConfig {
    pub fn has_sink(&self) -> bool {
        self.nginx_conf_path.is_some()
            || self.rules_path.is_some()
            || self.configmap.is_some()
            || self.webui.is_some()
    }
}

// ---------------------------------------------------------------------------
// AccessLogConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogConfig {
    pub path: PathBuf,
    #[serde(default = "default_debounce")]
    pub debounce_secs: u64,
    /// Cold-start a model when the proxy logs a 502 for it.
    #[serde(default = "default_true")]
    pub start_on_502: bool,
}

fn default_debounce() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub activity: ActivityConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub access_log: Option<AccessLogConfig>,
}

fn default_listen() -> String {
    "0.0.0.0:5003".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            models: ModelsConfig::default(),
            supervisor: SupervisorConfig::default(),
            activity: ActivityConfig::default(),
            reaper: ReaperConfig::default(),
            gate: GateConfig::default(),
            routing: RoutingConfig::default(),
            access_log: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ModelgateError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    /// Load `path` when given, otherwise fall back to built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        atomic_write(path, data.as_bytes())
    }

    /// Check the configuration for mistakes. Errors make `serve` refuse to
    /// start; warnings are logged.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.models.dir.is_none() && self.models.inline.is_empty() {
            warnings.push(ConfigWarning::warning(
                "no models configured: set models.dir or models.inline",
            ));
        }
        for m in &self.models.inline {
            if validate_model_name(&m.name).is_err() {
                warnings.push(ConfigWarning::error(format!(
                    "invalid model name '{}'",
                    m.name
                )));
            } else if RESERVED_NAMES.contains(&m.name.as_str()) {
                warnings.push(ConfigWarning::error(format!(
                    "model name '{}' is reserved",
                    m.name
                )));
            }
        }

        if self.activity.idle_after_minutes <= self.activity.active_within_minutes {
            warnings.push(ConfigWarning::warning(format!(
                "idle threshold ({}m) is not above the active window ({}m)",
                self.activity.idle_after_minutes, self.activity.active_within_minutes
            )));
        }

        if self.gate.poll_interval_ms == 0 {
            warnings.push(ConfigWarning::error("gate.poll_interval_ms must be > 0"));
        }
        if self.gate.ready_timeout().as_millis() < u128::from(self.gate.poll_interval_ms) {
            warnings.push(ConfigWarning::warning(
                "gate.ready_timeout_secs is shorter than one poll interval",
            ));
        }
        if !(500..=599).contains(&self.gate.retry_status) || self.gate.retry_status == 504 {
            warnings.push(ConfigWarning::error(format!(
                "gate.retry_status {} must be a 5xx other than 504",
                self.gate.retry_status
            )));
        }

        if self.reaper.enabled && self.reaper.interval_secs == 0 {
            warnings.push(ConfigWarning::error("reaper.interval_secs must be > 0"));
        }
        for rule in &self.reaper.notify {
            if let Err(e) = rule.matcher() {
                warnings.push(ConfigWarning::error(e.to_string()));
            }
            if !rule.endpoint.starts_with("http://") && !rule.endpoint.starts_with("https://") {
                warnings.push(ConfigWarning::error(format!(
                    "reaper.notify endpoint '{}' must be an http(s) URL",
                    rule.endpoint
                )));
            }
        }

        if self.routing.enabled && self.routing.interval_secs == 0 {
            warnings.push(ConfigWarning::error("routing.interval_secs must be > 0"));
        }
        if self.routing.enabled && !self.routing.has_sink() {
            warnings.push(ConfigWarning::warning(
                "routing is enabled but no sink (nginx_conf_path, rules_path, configmap, webui) is set",
            ));
        }

        if let SupervisorConfig::Systemctl { unit_template, .. } = &self.supervisor {
            if !unit_template.contains("{name}") {
                warnings.push(ConfigWarning::error(
                    "supervisor.unit_template must contain {name}",
                ));
            }
        }

        warnings
    }
}
