//! Per-instance time-to-live settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Time-to-live settings for one cache instance.
///
/// Serialized with millisecond fields; missing fields take their defaults.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use demand_cache::CacheConfig;
///
/// let config = CacheConfig::from_json(r#"{ "success_ttl_ms": 60000 }"#).unwrap();
/// assert_eq!(config.success_ttl, Duration::from_secs(60));
/// assert_eq!(config.error_ttl, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a successful body stays fresh.
    #[serde(rename = "success_ttl_ms", with = "millis")]
    pub success_ttl: Duration,
    /// How long a failure suppresses refetching.
    #[serde(rename = "error_ttl_ms", with = "millis")]
    pub error_ttl: Duration,
    /// Dog-pile window: how long an in-flight fetch suppresses duplicates.
    #[serde(rename = "fetch_ttl_ms", with = "millis")]
    pub fetch_ttl: Duration,
}

impl CacheConfig {
    pub const DEFAULT_SUCCESS_TTL: Duration = Duration::from_secs(30);
    pub const DEFAULT_ERROR_TTL: Duration = Duration::from_secs(5);
    pub const DEFAULT_FETCH_TTL: Duration = Duration::from_secs(5);

    /// Parses and validates a JSON configuration document.
    pub fn from_json(raw: &str) -> Result<Self, CacheError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets how long a successful body stays fresh.
    #[must_use]
    pub fn success_ttl(mut self, ttl: Duration) -> Self {
        self.success_ttl = ttl;
        self
    }

    /// Sets how long a failure suppresses refetching.
    #[must_use]
    pub fn error_ttl(mut self, ttl: Duration) -> Self {
        self.error_ttl = ttl;
        self
    }

    /// Sets the dog-pile window.
    #[must_use]
    pub fn fetch_ttl(mut self, ttl: Duration) -> Self {
        self.fetch_ttl = ttl;
        self
    }

    /// Rejects zero durations.
    pub fn validate(&self) -> Result<(), CacheError> {
        for (field, ttl) in [
            ("success_ttl", self.success_ttl),
            ("error_ttl", self.error_ttl),
            ("fetch_ttl", self.fetch_ttl),
        ] {
            if ttl.is_zero() {
                return Err(CacheError::InvalidTtl { field });
            }
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            success_ttl: Self::DEFAULT_SUCCESS_TTL,
            error_ttl: Self::DEFAULT_ERROR_TTL,
            fetch_ttl: Self::DEFAULT_FETCH_TTL,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ttl: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
