use std::path::Path;
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::controller::{Gains, OutputLimits};
use crate::error::{BoosterError, Result};
use crate::occupancy::OccupancyWeights;
use crate::sampling::Normal;
use crate::simulator::{CallProfile, MAX_STAGE_SECS};

pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

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

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
}

impl EndpointConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn base_url(&self) -> String {
        with_scheme(&self.address())
    }
}

/// Prefix `http://` onto addresses given without a scheme.
pub fn with_scheme(address: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

fn default_api() -> EndpointConfig {
    EndpointConfig::new("127.0.0.1", 8005)
}

fn default_dispatcher() -> EndpointConfig {
    EndpointConfig::new("127.0.0.1", 8090)
}

fn default_lead_buffer() -> EndpointConfig {
    EndpointConfig::new("127.0.0.1", 7005)
}

// ---------------------------------------------------------------------------
// OriginationConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginationConfig {
    #[serde(default = "default_origination_addresses")]
    pub addresses: Vec<String>,
    /// How long a stopping pacing loop waits for in-flight origination
    /// tasks. Zero detaches them.
    #[serde(default)]
    pub drain_timeout_secs: u64,
}

fn default_origination_addresses() -> Vec<String> {
    vec!["127.0.0.1:8200".to_string(), "127.0.0.1:8201".to_string()]
}

impl Default for OriginationConfig {
    fn default() -> Self {
        Self {
            addresses: default_origination_addresses(),
            drain_timeout_secs: 0,
        }
    }
}

impl OriginationConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// HttpConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_slow_request_ms")]
    pub slow_request_ms: u64,
    /// Pause before the second attempt; doubles for each one after.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_attempts() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_slow_request_ms() -> u64 {
    1000
}

fn default_retry_backoff_ms() -> u64 {
    200
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            timeout_secs: default_timeout_secs(),
            slow_request_ms: default_slow_request_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn slow_request(&self) -> Duration {
        Duration::from_millis(self.slow_request_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

// ---------------------------------------------------------------------------
// PacingConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacingConfig {
    #[serde(default = "default_update_time_secs")]
    pub update_time_secs: u64,
    #[serde(default = "default_wanted_ratio")]
    pub wanted_ratio: f64,
    #[serde(default = "default_gains")]
    pub gains: Gains,
    #[serde(default = "default_limits")]
    pub limits: OutputLimits,
    /// Add the overflow count delta since the last tick to the feedback.
    #[serde(default)]
    pub include_overflow: bool,
    /// Zero the integral whenever the skill goes inactive.
    #[serde(default)]
    pub reset_when_inactive: bool,
    #[serde(default)]
    pub occupancy: OccupancyWeights,
}

fn default_update_time_secs() -> u64 {
    5
}

fn default_wanted_ratio() -> f64 {
    0.9
}

fn default_gains() -> Gains {
    Gains::new(5.0, 0.01, 0.1)
}

fn default_limits() -> OutputLimits {
    OutputLimits::new(0.0, 200.0)
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            update_time_secs: default_update_time_secs(),
            wanted_ratio: default_wanted_ratio(),
            gains: default_gains(),
            limits: default_limits(),
            include_overflow: false,
            reset_when_inactive: false,
            occupancy: OccupancyWeights::default(),
        }
    }
}

impl PacingConfig {
    pub fn update_time(&self) -> Duration {
        Duration::from_secs(self.update_time_secs)
    }
}

// ---------------------------------------------------------------------------
// ManagerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Poll interval while at least one skill is tracked.
    #[serde(default = "default_busy_poll_secs")]
    pub busy_poll_secs: u64,
    /// Poll interval while nothing is tracked yet.
    #[serde(default = "default_idle_poll_secs")]
    pub idle_poll_secs: u64,
    #[serde(default = "default_alive_report_secs")]
    pub alive_report_secs: u64,
}

fn default_busy_poll_secs() -> u64 {
    5
}

fn default_idle_poll_secs() -> u64 {
    1
}

fn default_alive_report_secs() -> u64 {
    60
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            busy_poll_secs: default_busy_poll_secs(),
            idle_poll_secs: default_idle_poll_secs(),
            alive_report_secs: default_alive_report_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// ChartConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartConfig {
    #[serde(default = "default_chart_path")]
    pub path: String,
    #[serde(default = "default_max_rows")]
    pub max_rows: u32,
}

fn default_chart_path() -> String {
    "chart_database.db".to_string()
}

fn default_max_rows() -> u32 {
    9999
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            path: default_chart_path(),
            max_rows: default_max_rows(),
        }
    }
}

// ---------------------------------------------------------------------------
// DemoConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoConfig {
    #[serde(default = "default_demo_skills")]
    pub skills: u32,
    #[serde(default = "default_first_skill_id")]
    pub first_skill_id: u32,
    #[serde(default = "default_demo_operators")]
    pub operators: u32,
    #[serde(default = "default_rest_secs")]
    pub rest_secs: u64,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_demo_update_time_secs")]
    pub update_time_secs: u64,
    #[serde(default = "default_demo_wanted_ratio")]
    pub wanted_ratio: f64,
    #[serde(default = "default_demo_gains")]
    pub gains: Gains,
    #[serde(default = "default_demo_limits")]
    pub limits: OutputLimits,
    #[serde(default)]
    pub profile: CallProfile,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

fn default_demo_skills() -> u32 {
    1
}

fn default_first_skill_id() -> u32 {
    123456
}

fn default_demo_operators() -> u32 {
    20
}

fn default_rest_secs() -> u64 {
    20
}

fn default_demo_update_time_secs() -> u64 {
    10
}

fn default_demo_wanted_ratio() -> f64 {
    0.91
}

fn default_demo_gains() -> Gains {
    Gains::new(4.0, 1.0, 1.0)
}

fn default_demo_limits() -> OutputLimits {
    OutputLimits::new(0.0, 10.0)
}

fn default_sweep_interval_ms() -> u64 {
    100
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            skills: default_demo_skills(),
            first_skill_id: default_first_skill_id(),
            operators: default_demo_operators(),
            rest_secs: default_rest_secs(),
            seed: None,
            update_time_secs: default_demo_update_time_secs(),
            wanted_ratio: default_demo_wanted_ratio(),
            gains: default_demo_gains(),
            limits: default_demo_limits(),
            profile: CallProfile::default(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl DemoConfig {
    pub fn rest(&self) -> TimeDelta {
        const MAX_REST_SECS: u64 = i64::MAX as u64 / 1000;
        TimeDelta::seconds(self.rest_secs.min(MAX_REST_SECS) as i64)
    }

    pub fn update_time(&self) -> Duration {
        Duration::from_secs(self.update_time_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_app")]
    pub app: String,
    #[serde(default = "default_api")]
    pub api: EndpointConfig,
    #[serde(default = "default_dispatcher")]
    pub dispatcher: EndpointConfig,
    #[serde(default = "default_lead_buffer")]
    pub lead_buffer: EndpointConfig,
    #[serde(default)]
    pub origination: OriginationConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub chart: ChartConfig,
    #[serde(default = "default_mock_requests")]
    pub mock_requests: bool,
    #[serde(default)]
    pub demo: DemoConfig,
}

fn default_app() -> String {
    "booster".to_string()
}

fn default_mock_requests() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app: default_app(),
            api: default_api(),
            dispatcher: default_dispatcher(),
            lead_buffer: default_lead_buffer(),
            origination: OriginationConfig::default(),
            http: HttpConfig::default(),
            pacing: PacingConfig::default(),
            manager: ManagerConfig::default(),
            chart: ChartConfig::default(),
            mock_requests: default_mock_requests(),
            demo: DemoConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BoosterError::ConfigNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(BoosterError::ConfigNotFound(missing)) => {
                tracing::warn!(path = %missing, "config file not found, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        check_loop(
            &mut warnings,
            "pacing",
            self.pacing.update_time_secs,
            self.pacing.wanted_ratio,
            &self.pacing.gains,
            &self.pacing.limits,
        );
        check_loop(
            &mut warnings,
            "demo",
            self.demo.update_time_secs,
            self.demo.wanted_ratio,
            &self.demo.gains,
            &self.demo.limits,
        );

        if self.http.attempts == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "http.attempts is 0, no request would ever be sent".to_string(),
            });
        }

        if !self.mock_requests && self.origination.addresses.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "origination.addresses is empty and mock_requests is off".to_string(),
            });
        }

        if self.chart.max_rows == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "chart.max_rows is 0, chart queries will return nothing".to_string(),
            });
        }

        if self.manager.busy_poll_secs == 0 || self.manager.idle_poll_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "manager poll interval of 0 polls the dispatcher in a tight loop"
                    .to_string(),
            });
        }

        check_profile(&mut warnings, &self.demo.profile);

        if self.demo.operators == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "demo.operators is 0, simulated calls can only overflow".to_string(),
            });
        }

        warnings
    }
}

fn check_profile(warnings: &mut Vec<ConfigWarning>, profile: &CallProfile) {
    let durations = [
        ("ring", &profile.ring),
        ("ivr", &profile.ivr),
        ("redirect", &profile.redirect),
        ("talk", &profile.talk),
    ];
    for (name, dist) in durations {
        if !is_sane(dist) || dist.mean > MAX_STAGE_SECS || dist.std_dev > MAX_STAGE_SECS {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "demo.profile.{name} must be finite, non-negative and at most \
                     {MAX_STAGE_SECS} seconds (mean={}, std_dev={})",
                    dist.mean, dist.std_dev
                ),
            });
        }
    }

    let ratios = [
        ("answer_ratio", &profile.answer_ratio),
        ("redirect_ratio", &profile.redirect_ratio),
    ];
    for (name, dist) in ratios {
        if !is_sane(dist) || dist.mean > 1.0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "demo.profile.{name} mean={} must be within [0, 1]",
                    dist.mean
                ),
            });
        }
    }
}

fn is_sane(dist: &Normal) -> bool {
    [dist.mean, dist.std_dev, dist.floor]
        .iter()
        .all(|v| v.is_finite() && *v >= 0.0)
}

fn check_loop(
    warnings: &mut Vec<ConfigWarning>,
    section: &str,
    update_time_secs: u64,
    wanted_ratio: f64,
    gains: &Gains,
    limits: &OutputLimits,
) {
    if update_time_secs == 0 {
        warnings.push(ConfigWarning {
            level: WarnLevel::Error,
            message: format!("{section}.update_time_secs must be greater than 0"),
        });
    }
    if !(wanted_ratio > 0.0 && wanted_ratio <= 1.0) {
        warnings.push(ConfigWarning {
            level: WarnLevel::Error,
            message: format!("{section}.wanted_ratio={wanted_ratio} is outside (0, 1]"),
        });
    }
    if limits.min > limits.max {
        warnings.push(ConfigWarning {
            level: WarnLevel::Error,
            message: format!(
                "{section}.limits min={} is greater than max={}",
                limits.min, limits.max
            ),
        });
    }
    if gains.kp < 0.0 || gains.ki < 0.0 || gains.kd < 0.0 {
        warnings.push(ConfigWarning {
            level: WarnLevel::Warning,
            message: format!(
                "{section}.gains has a negative term (kp={}, ki={}, kd={})",
                gains.kp, gains.ki, gains.kd
            ),
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
