//! Engine Configuration
//!
//! Every component takes its own config struct; [`EngineConfig`] bundles them
//! so the whole engine can be loaded from one YAML file. Missing fields fall
//! back to defaults. Durations accept `"30s"`, `"5m"`, `"1h"`, `"7d"`, combined
//! forms like `"1h30m"`, or a bare number of seconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::batch::{BatchConfig, SplitterConfig};
use crate::cache::{CacheConfig, CleanupConfig};
use crate::error::{Error, Result};
use crate::monitoring::MonitorConfig;

/// Top-level configuration for [`crate::OptimizationEngine`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tiered cache
    pub cache: CacheConfig,
    /// Asynchronous batch processor
    pub batch: BatchConfig,
    /// Synchronous priority splitter
    pub splitter: SplitterConfig,
    /// Performance monitor and resource sampler
    pub monitor: MonitorConfig,
    /// Auto-cleanup scheduler
    pub cleanup: CleanupConfig,
}

impl EngineConfig {
    /// Parse from a YAML string
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.batch.validate()?;
        self.splitter.validate()?;
        self.monitor.validate()?;
        self.cleanup.validate()?;
        Ok(())
    }
}

/// Parse a duration string like `"30s"`, `"5m"`, `"1h30m"` or `"7d"`.
///
/// A trailing bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::DurationParse("empty duration string".to_string()));
    }

    let mut total_millis: u64 = 0;
    let mut num_buf = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            num_buf.push(c);
            continue;
        }

        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        num_buf.clear();

        let multiplier = match c {
            'm' | 'M' if chars.peek() == Some(&'s') => {
                chars.next();
                1
            }
            'd' | 'D' => 86_400_000,
            'h' | 'H' => 3_600_000,
            'm' | 'M' => 60_000,
            's' | 'S' => 1_000,
            _ => {
                return Err(Error::DurationParse(format!(
                    "unknown duration unit: {}",
                    c
                )))
            }
        };

        total_millis += num * multiplier;
    }

    if !num_buf.is_empty() {
        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        total_millis += num * 1_000;
    }

    Ok(Duration::from_millis(total_millis))
}

/// Serde adapter for `Duration` fields written as human strings or seconds
pub(crate) mod duration_serde {
    use super::parse_duration;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Float(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        if d.subsec_millis() == 0 {
            s.serialize_str(&format!("{}s", d.as_secs()))
        } else {
            s.serialize_str(&format!("{}ms", d.as_millis()))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Secs(n) => Ok(Duration::from_secs(n)),
            Raw::Float(f) if f >= 0.0 => Ok(Duration::from_secs_f64(f)),
            Raw::Float(f) => Err(serde::de::Error::custom(format!(
                "negative duration: {}",
                f
            ))),
            Raw::Text(t) => parse_duration(&t).map_err(serde::de::Error::custom),
        }
    }

    /// Same adapter for `Option<Duration>`
    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => super::serialize(d, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
            #[derive(Deserialize)]
            struct Inner(#[serde(with = "super")] Duration);
            Ok(Option::<Inner>::deserialize(d)?.map(|Inner(d)| d))
        }
    }
}
