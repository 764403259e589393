// Algorithm configuration, versioned catalog and process settings
//
// An `AlgorithmConfig` is immutable once loaded and is passed explicitly into
// every pipeline stage. Replay binds a historical version from the catalog
// without touching the live one.

use crate::error::ConfigError;
use crate::model::{checked_hours, AnomalyType, SignalBasis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Cost detector parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub enabled: bool,
    /// |z| at or above this is anomalous
    pub z_threshold: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            z_threshold: 2.0,
        }
    }
}

/// Quality detector parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub enabled: bool,
    pub z_threshold: f64,
    /// Observed values below this baseline percentile are anomalous
    pub low_percentile: u8,
    /// Added to confidence when the percentile trigger fires
    pub below_percentile_boost: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            z_threshold: 2.0,
            low_percentile: 5,
            below_percentile_boost: 0.1,
        }
    }
}

/// Latency detector parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyConfig {
    pub enabled: bool,
    /// Upper-tail z threshold
    pub z_threshold: f64,
    /// Observed values above `p{high_percentile} * p99_multiplier` are anomalous
    pub high_percentile: u8,
    pub p99_multiplier: f64,
    /// Added to confidence when the percentile trigger fires
    pub exceeds_percentile_boost: f64,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            z_threshold: 2.0,
            high_percentile: 99,
            p99_multiplier: 1.0,
            exceeds_percentile_boost: 0.15,
        }
    }
}

/// Policy detector parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub enabled: bool,
    /// Fixed confidence of every policy mismatch
    pub confidence: f64,
    /// Deviation score of an expected pass that was observed as a failure
    pub unexpected_failure_weight: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence: 0.9,
            unexpected_failure_weight: 1.5,
        }
    }
}

/// Which detector a metric feeds and which signal it uses
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricBinding {
    pub anomaly_type: AnomalyType,
    #[serde(default)]
    pub basis: SignalBasis,
}

impl MetricBinding {
    pub fn new(anomaly_type: AnomalyType) -> Self {
        Self {
            anomaly_type,
            basis: SignalBasis::Actual,
        }
    }

    /// Numeric bindings need a baseline; policy bindings do not
    pub fn needs_baseline(&self) -> bool {
        self.anomaly_type != AnomalyType::Policy
    }
}

/// Per-type weights applied by the trust aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeWeights {
    pub cost: f64,
    pub quality: f64,
    pub latency: f64,
    pub policy: f64,
}

impl TypeWeights {
    pub fn weight(&self, anomaly_type: AnomalyType) -> f64 {
        match anomaly_type {
            AnomalyType::Cost => self.cost,
            AnomalyType::Quality => self.quality,
            AnomalyType::Latency => self.latency,
            AnomalyType::Policy => self.policy,
        }
    }
}

impl Default for TypeWeights {
    fn default() -> Self {
        Self {
            cost: 1.0,
            quality: 1.0,
            latency: 1.0,
            policy: 1.5,
        }
    }
}

/// Trust signal aggregation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Age (from window end) at which an anomaly counts half
    pub half_life_hours: f64,
    /// Weighted mass at which the composite score reaches 0.5
    pub saturation: f64,
    pub weights: TypeWeights,
    /// Composite scores at or below this are `High` trust
    pub high_max: f64,
    /// Composite scores at or below this (and above `high_max`) are `Medium`
    pub medium_max: f64,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            half_life_hours: 6.0,
            saturation: 5.0,
            weights: TypeWeights::default(),
            high_max: 0.1,
            medium_max: 0.5,
        }
    }
}

fn default_bindings() -> BTreeMap<String, MetricBinding> {
    [
        ("estimated_cost_usd", AnomalyType::Cost),
        ("quality_score", AnomalyType::Quality),
        ("latency_ms", AnomalyType::Latency),
        ("policy_outcome", AnomalyType::Policy),
    ]
    .into_iter()
    .map(|(name, t)| (name.to_string(), MetricBinding::new(t)))
    .collect()
}

/// One immutable, versioned parameter set for the whole detection pipeline
///
/// # Example
/// ```
/// use driftwatch::config::AlgorithmConfig;
///
/// let config = AlgorithmConfig::default();
/// assert_eq!(config.cost.z_threshold, 2.0);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgorithmConfig {
    /// Stamped on every baseline and emitted record
    pub algorithm_version: String,

    /// Candidates below this confidence are discarded before persistence
    pub min_confidence: f64,

    /// Baselines with fewer samples are reported as insufficient
    pub min_samples: usize,

    /// Percentiles computed for every baseline (0..=100)
    pub percentiles: Vec<u8>,

    /// Length of the history window preceding each evaluation window
    pub baseline_lookback_hours: i64,

    /// Width of the epoch-aligned buckets used to pair predictions with actuals
    pub correlation_bucket_secs: i64,

    /// Magnitude bound for z-scores, including the zero-variance case
    pub deviation_cap: f64,

    /// Sample count at which the sample-size half of confidence saturates
    pub full_confidence_samples: usize,

    /// |z| at which the deviation half of confidence saturates
    pub saturation_z: f64,

    pub cost: CostConfig,
    pub quality: QualityConfig,
    pub latency: LatencyConfig,
    pub policy: PolicyConfig,

    /// Metric name to detector binding
    pub metrics: BTreeMap<String, MetricBinding>,

    pub trust: TrustConfig,
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        Self {
            algorithm_version: "1.0.0".to_string(),
            min_confidence: 0.5,
            min_samples: 10,
            percentiles: vec![5, 50, 90, 95, 99],
            baseline_lookback_hours: 168,
            correlation_bucket_secs: 3600,
            deviation_cap: 1000.0,
            full_confidence_samples: 100,
            saturation_z: 5.0,
            cost: CostConfig::default(),
            quality: QualityConfig::default(),
            latency: LatencyConfig::default(),
            policy: PolicyConfig::default(),
            metrics: default_bindings(),
            trust: TrustConfig::default(),
        }
    }
}

impl AlgorithmConfig {
    /// Fewer, higher-confidence anomalies
    pub fn strict() -> Self {
        let mut config = Self {
            algorithm_version: "1.0.0-strict".to_string(),
            min_confidence: 0.8,
            min_samples: 30,
            ..Self::default()
        };
        config.cost.z_threshold = 3.0;
        config.quality.z_threshold = 3.0;
        config.latency.z_threshold = 3.0;
        config.latency.p99_multiplier = 1.2;
        config
    }

    /// More anomalies at lower confidence
    pub fn permissive() -> Self {
        let mut config = Self {
            algorithm_version: "1.0.0-permissive".to_string(),
            min_confidence: 0.3,
            min_samples: 5,
            ..Self::default()
        };
        config.cost.z_threshold = 1.5;
        config.quality.z_threshold = 1.5;
        config.latency.z_threshold = 1.5;
        config
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.algorithm_version = version.into();
        self
    }

    pub fn binding(&self, metric_name: &str) -> Option<&MetricBinding> {
        self.metrics.get(metric_name)
    }

    pub fn is_enabled(&self, anomaly_type: AnomalyType) -> bool {
        match anomaly_type {
            AnomalyType::Cost => self.cost.enabled,
            AnomalyType::Quality => self.quality.enabled,
            AnomalyType::Latency => self.latency.enabled,
            AnomalyType::Policy => self.policy.enabled,
        }
    }

    fn invalid(&self, reason: String) -> ConfigError {
        ConfigError::Invalid {
            version: self.algorithm_version.clone(),
            reason,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.algorithm_version.trim().is_empty() {
            return Err(self.invalid("algorithm_version must not be empty".to_string()));
        }

        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(self.invalid(format!(
                "min_confidence must be in [0, 1], got {}",
                self.min_confidence
            )));
        }

        if self.min_samples < 2 {
            return Err(self.invalid(format!(
                "min_samples must be >= 2, got {}",
                self.min_samples
            )));
        }

        if let Some(p) = self.percentiles.iter().find(|p| **p > 100) {
            return Err(self.invalid(format!("percentile {} is outside 0..=100", p)));
        }

        if self.baseline_lookback_hours <= 0 || checked_hours(self.baseline_lookback_hours).is_err() {
            return Err(self.invalid(format!(
                "baseline_lookback_hours must be positive and representable, got {}",
                self.baseline_lookback_hours
            )));
        }

        if self.correlation_bucket_secs <= 0
            || chrono::Duration::try_seconds(self.correlation_bucket_secs).is_none()
        {
            return Err(self.invalid(format!(
                "correlation_bucket_secs must be positive and representable, got {}",
                self.correlation_bucket_secs
            )));
        }

        if !(self.deviation_cap.is_finite() && self.deviation_cap > 0.0) {
            return Err(self.invalid(format!(
                "deviation_cap must be finite and positive, got {}",
                self.deviation_cap
            )));
        }

        if self.full_confidence_samples == 0 {
            return Err(self.invalid("full_confidence_samples must be positive".to_string()));
        }

        if !(self.saturation_z.is_finite() && self.saturation_z > 0.0) {
            return Err(self.invalid(format!(
                "saturation_z must be finite and positive, got {}",
                self.saturation_z
            )));
        }

        for (name, z) in [
            ("cost", self.cost.z_threshold),
            ("quality", self.quality.z_threshold),
            ("latency", self.latency.z_threshold),
        ] {
            if !(z.is_finite() && z > 0.0) {
                return Err(self.invalid(format!(
                    "{}.z_threshold must be finite and positive, got {}",
                    name, z
                )));
            }
        }

        if self.quality.enabled && !self.percentiles.contains(&self.quality.low_percentile) {
            return Err(self.invalid(format!(
                "quality.low_percentile {} is not in percentiles {:?}",
                self.quality.low_percentile, self.percentiles
            )));
        }

        if self.latency.enabled && !self.percentiles.contains(&self.latency.high_percentile) {
            return Err(self.invalid(format!(
                "latency.high_percentile {} is not in percentiles {:?}",
                self.latency.high_percentile, self.percentiles
            )));
        }

        if !(self.latency.p99_multiplier.is_finite() && self.latency.p99_multiplier > 0.0) {
            return Err(self.invalid(format!(
                "latency.p99_multiplier must be finite and positive, got {}",
                self.latency.p99_multiplier
            )));
        }

        for (name, boost) in [
            ("quality.below_percentile_boost", self.quality.below_percentile_boost),
            ("latency.exceeds_percentile_boost", self.latency.exceeds_percentile_boost),
        ] {
            if !(0.0..=1.0).contains(&boost) {
                return Err(self.invalid(format!("{} must be in [0, 1], got {}", name, boost)));
            }
        }

        if !(0.0..=1.0).contains(&self.policy.confidence) {
            return Err(self.invalid(format!(
                "policy.confidence must be in [0, 1], got {}",
                self.policy.confidence
            )));
        }

        if !(self.policy.unexpected_failure_weight.is_finite()
            && self.policy.unexpected_failure_weight > 0.0)
        {
            return Err(self.invalid(format!(
                "policy.unexpected_failure_weight must be finite and positive, got {}",
                self.policy.unexpected_failure_weight
            )));
        }

        let trust = &self.trust;
        if !(trust.half_life_hours.is_finite() && trust.half_life_hours > 0.0) {
            return Err(self.invalid(format!(
                "trust.half_life_hours must be finite and positive, got {}",
                trust.half_life_hours
            )));
        }
        if !(trust.saturation.is_finite() && trust.saturation > 0.0) {
            return Err(self.invalid(format!(
                "trust.saturation must be finite and positive, got {}",
                trust.saturation
            )));
        }
        for t in AnomalyType::ALL {
            let w = trust.weights.weight(t);
            if !(w.is_finite() && w >= 0.0) {
                return Err(self.invalid(format!(
                    "trust weight for {} must be finite and non-negative, got {}",
                    t, w
                )));
            }
        }
        if !(0.0 <= trust.high_max && trust.high_max <= trust.medium_max && trust.medium_max <= 1.0)
        {
            return Err(self.invalid(format!(
                "trust thresholds must satisfy 0 <= high_max ({}) <= medium_max ({}) <= 1",
                trust.high_max, trust.medium_max
            )));
        }

        Ok(())
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    active: Option<String>,
    #[serde(default)]
    algorithm: Vec<AlgorithmConfig>,
}

/// Every known algorithm version, plus which one is live
#[derive(Debug, Clone)]
pub struct AlgorithmCatalog {
    versions: BTreeMap<String, Arc<AlgorithmConfig>>,
    active: String,
}

impl AlgorithmCatalog {
    /// Build a catalog; `active` defaults to the last config given
    pub fn new(configs: Vec<AlgorithmConfig>, active: Option<String>) -> Result<Self, ConfigError> {
        let fallback = configs
            .last()
            .map(|c| c.algorithm_version.clone())
            .ok_or(ConfigError::EmptyCatalog)?;

        let mut versions = BTreeMap::new();
        for config in configs {
            config.validate()?;
            let version = config.algorithm_version.clone();
            if versions.insert(version.clone(), Arc::new(config)).is_some() {
                return Err(ConfigError::DuplicateVersion(version));
            }
        }

        let active = active.unwrap_or(fallback);
        if !versions.contains_key(&active) {
            return Err(ConfigError::UnknownVersion(active));
        }

        Ok(Self { versions, active })
    }

    pub fn single(config: AlgorithmConfig) -> Result<Self, ConfigError> {
        Self::new(vec![config], None)
    }

    /// Load a catalog from `[[algorithm]]` tables
    ///
    /// # Example TOML
    /// ```toml
    /// active = "1.1.0"
    ///
    /// [[algorithm]]
    /// algorithm_version = "1.0.0"
    ///
    /// [[algorithm]]
    /// algorithm_version = "1.1.0"
    /// min_confidence = 0.6
    /// [algorithm.latency]
    /// p99_multiplier = 1.2
    /// ```
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse(content, Path::new("<inline>"))
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let file: CatalogFile = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(file.algorithm, file.active)
    }

    /// The live algorithm version
    pub fn active(&self) -> Arc<AlgorithmConfig> {
        // `new` guarantees the active key is present
        self.versions
            .get(&self.active)
            .cloned()
            .unwrap_or_else(|| Arc::new(AlgorithmConfig::default()))
    }

    pub fn active_version(&self) -> &str {
        &self.active
    }

    pub fn get(&self, version: &str) -> Result<Arc<AlgorithmConfig>, ConfigError> {
        self.versions
            .get(version)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownVersion(version.to_string()))
    }

    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.versions.keys().map(String::as_str)
    }
}

impl Default for AlgorithmCatalog {
    fn default() -> Self {
        let config = AlgorithmConfig::default();
        let active = config.algorithm_version.clone();
        let mut versions = BTreeMap::new();
        versions.insert(active.clone(), Arc::new(config));
        Self { versions, active }
    }
}

/// Process-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory of the durable anomaly store
    pub store_path: PathBuf,
    /// Directory holding `predicted.jsonl` and `actual.jsonl`
    pub input_dir: PathBuf,
    /// Algorithm catalog; built-in defaults when absent
    pub catalog_path: Option<PathBuf>,
    /// Trust window used when none is given
    pub trust_window_hours: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("driftwatch-store"),
            input_dir: PathBuf::from("driftwatch-input"),
            catalog_path: None,
            trust_window_hours: 24,
        }
    }
}

impl Settings {
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if settings.trust_window_hours <= 0 || checked_hours(settings.trust_window_hours).is_err() {
            return Err(ConfigError::Invalid {
                version: "settings".to_string(),
                reason: format!(
                    "trust_window_hours must be positive, got {}",
                    settings.trust_window_hours
                ),
            });
        }
        Ok(settings)
    }

    pub fn load_catalog(&self) -> Result<AlgorithmCatalog, ConfigError> {
        match &self.catalog_path {
            Some(path) => AlgorithmCatalog::from_toml(path),
            None => Ok(AlgorithmCatalog::default()),
        }
    }
}
