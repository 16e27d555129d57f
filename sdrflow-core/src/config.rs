//! Engine configuration (JSON file + environment overrides).

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    buffering::{pool::MAX_BUFFER_LEN, DEFAULT_RING_CAPACITY},
    error::{Result, SdrflowError},
    metrics::AdmissionLimits,
    scheduler::Priority,
    worker::PoolConfig,
};

/// Idle sleep of the drain loop when the ring holds less than one frame.
const DEFAULT_DRAIN_IDLE_MS: u64 = 2;

/// Configuration for `SpectrumEngine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct EngineConfig {
    /// Ring slots `N` (usable capacity `N - 1`). Default: 2^20.
    pub ring_capacity: usize,
    /// `f32` values drained per frame. Default: 2048 (1024 interleaved IQ pairs).
    pub frame_len: usize,
    /// Capture sample rate in Hz. Default: 2 048 000.
    pub sample_rate: u32,
    /// Tuner centre frequency in Hz, stamped on every frame.
    pub center_frequency_hz: f64,
    /// Priority of live frames on the FFT pool.
    pub frame_priority: Priority,
    #[serde(deserialize_with = "fft_pool_config")]
    pub fft_pool: PoolConfig,
    #[serde(deserialize_with = "dsp_pool_config")]
    pub dsp_pool: PoolConfig,
    /// Backpressure thresholds consulted before each frame is submitted.
    pub admission: AdmissionLimits,
    /// Sleep when the ring is short of a frame. `None` → env / built-in default.
    pub drain_idle_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ring_capacity: DEFAULT_RING_CAPACITY,
            frame_len: 2_048,
            sample_rate: 2_048_000,
            center_frequency_hz: 100.0e6,
            frame_priority: Priority::HIGH,
            fft_pool: PoolConfig::fft(),
            dsp_pool: PoolConfig::dsp(),
            admission: AdmissionLimits::default(),
            drain_idle_ms: None,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file. A missing file yields defaults.
    ///
    /// # Errors
    /// `SdrflowError::Io` / `SdrflowError::ConfigParse` for unreadable or
    /// malformed files, `SdrflowError::InvalidConfig` if validation fails.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = match fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str::<EngineConfig>(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no config file, using defaults");
                EngineConfig::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Clamp values into ranges the pipeline can run with.
    pub fn normalize(&mut self) {
        self.ring_capacity = self.ring_capacity.clamp(2, 1 << 28);
        self.frame_len = self.frame_len.clamp(1, MAX_BUFFER_LEN);
        self.sample_rate = self.sample_rate.max(1);
        if !self.center_frequency_hz.is_finite() {
            warn!("non-finite centre frequency in config, resetting to 0 Hz");
            self.center_frequency_hz = 0.0;
        }
        self.admission.max_queue_depth = self.admission.max_queue_depth.max(1);
        self.drain_idle_ms = self.drain_idle_ms.map(|ms| ms.clamp(1, 20));
        if self.fft_pool.name.trim().is_empty() {
            self.fft_pool.name = PoolConfig::fft().name;
        }
        if self.dsp_pool.name.trim().is_empty() {
            self.dsp_pool.name = PoolConfig::dsp().name;
        }
    }

    /// Reject configurations that can never produce a frame.
    pub fn validate(&self) -> Result<()> {
        if self.ring_capacity < 2 {
            return Err(SdrflowError::InvalidConfig(format!(
                "ringCapacity {} leaves no usable slot",
                self.ring_capacity
            )));
        }
        if self.frame_len == 0 || self.frame_len > self.ring_capacity - 1 {
            return Err(SdrflowError::InvalidConfig(format!(
                "frameLen {} must be between 1 and ringCapacity - 1 ({})",
                self.frame_len,
                self.ring_capacity - 1
            )));
        }
        Ok(())
    }

    /// Effective drain-loop idle sleep: config, then `SDRFLOW_DRAIN_IDLE_MS`, then default.
    pub fn drain_idle_ms(&self) -> u64 {
        self.drain_idle_ms.unwrap_or_else(env_drain_idle_ms)
    }
}

/// Fields of a `PoolConfig` object; whatever is absent comes from the pool's own preset.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolOverrides {
    name: Option<String>,
    workers: Option<usize>,
}

impl PoolOverrides {
    fn apply(self, mut base: PoolConfig) -> PoolConfig {
        if let Some(name) = self.name {
            base.name = name;
        }
        if let Some(workers) = self.workers {
            base.workers = workers;
        }
        base
    }
}

fn fft_pool_config<'de, D>(deserializer: D) -> std::result::Result<PoolConfig, D::Error>
where
    D: serde::Deserializer<'de>,
{
    PoolOverrides::deserialize(deserializer).map(|o| o.apply(PoolConfig::fft()))
}

fn dsp_pool_config<'de, D>(deserializer: D) -> std::result::Result<PoolConfig, D::Error>
where
    D: serde::Deserializer<'de>,
{
    PoolOverrides::deserialize(deserializer).map(|o| o.apply(PoolConfig::dsp()))
}

fn env_drain_idle_ms() -> u64 {
    static DRAIN_IDLE_MS: OnceLock<u64> = OnceLock::new();
    *DRAIN_IDLE_MS.get_or_init(|| {
        std::env::var("SDRFLOW_DRAIN_IDLE_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v.clamp(1, 20))
            .unwrap_or(DEFAULT_DRAIN_IDLE_MS)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(tag: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("sdrflow-{tag}-{}-{nanos}.json", std::process::id()))
    }

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.fft_pool.name, "fft");
        assert_eq!(config.dsp_pool.name, "dsp");
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{ "frameLen": 512, "fftPool": { "workers": 2 }, "admission": { "maxQueueDepth": 8 } }"#,
        )
        .expect("parse");
        assert_eq!(config.frame_len, 512);
        assert_eq!(config.fft_pool.workers, 2);
        assert_eq!(config.fft_pool.name, "fft");
        assert_eq!(config.dsp_pool, PoolConfig::dsp());
        assert_eq!(config.admission.max_queue_depth, 8);
        assert_eq!(config.ring_capacity, DEFAULT_RING_CAPACITY);
        assert_eq!(config.frame_priority, Priority::HIGH);
    }

    #[test]
    fn partial_pool_objects_keep_their_own_preset() {
        let mut config: EngineConfig = serde_json::from_str(
            r#"{ "fftPool": { "workers": 3 }, "dspPool": { "name": "scan" } }"#,
        )
        .expect("parse");
        config.normalize();
        assert_eq!(config.fft_pool, PoolConfig::fft().with_workers(3));
        assert_eq!(config.dsp_pool.name, "scan");
        assert_eq!(config.dsp_pool.workers, 0);

        let empty: EngineConfig =
            serde_json::from_str(r#"{ "fftPool": {}, "dspPool": {} }"#).expect("parse");
        assert_eq!(empty.fft_pool.name, "fft");
        assert_eq!(empty.dsp_pool.name, "dsp");
    }

    #[test]
    fn normalize_clamps_out_of_range_values() {
        let mut config = EngineConfig {
            ring_capacity: 0,
            frame_len: 0,
            drain_idle_ms: Some(500),
            center_frequency_hz: f64::NAN,
            ..EngineConfig::default()
        };
        config.fft_pool.name = "  ".into();
        config.normalize();
        assert_eq!(config.ring_capacity, 2);
        assert_eq!(config.frame_len, 1);
        assert_eq!(config.drain_idle_ms, Some(20));
        assert_eq!(config.center_frequency_hz, 0.0);
        assert_eq!(config.fft_pool.name, "fft");
        config.validate().expect("smallest ring still holds one sample");
    }

    #[test]
    fn frame_larger_than_ring_is_rejected() {
        let config = EngineConfig {
            ring_capacity: 1024,
            frame_len: 1024,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(SdrflowError::InvalidConfig(_))));
    }

    #[test]
    fn load_reads_file_and_missing_file_gives_defaults() {
        let missing = temp_path("missing");
        assert_eq!(EngineConfig::load(&missing).expect("defaults"), EngineConfig::default());

        let path = temp_path("load");
        fs::write(&path, r#"{ "ringCapacity": 8192, "frameLen": 256, "framePriority": 7 }"#)
            .expect("write config");
        let config = EngineConfig::load(&path).expect("load");
        let _ = fs::remove_file(&path);
        assert_eq!(config.ring_capacity, 8192);
        assert_eq!(config.frame_len, 256);
        assert_eq!(config.frame_priority, Priority(7));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let path = temp_path("bad");
        fs::write(&path, "{ not json").expect("write config");
        let result = EngineConfig::load(&path);
        let _ = fs::remove_file(&path);
        assert!(matches!(result, Err(SdrflowError::ConfigParse(_))));
    }
}
