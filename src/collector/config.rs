/**
 * ============================================================================
 * COLLECTOR CONFIGURATION MODULE
 * ============================================================================
 *
 * PURPOSE: Settings schema, parsing, validation, and persistence
 *
 * STORAGE: Settings stored as a JSON blob in the key-value store
 * SLOT: "clay-settings"
 *
 * FUNCTIONALITY:
 * - Define the settings schema with defaults
 * - Accept the settings form's field names and loosely typed values
 * - Normalize and validate the endpoint and bundle size
 * - Save the blob back (used when the resend flag is cleared)
 *
 * The controller treats loaded settings as an immutable snapshot until the
 * surrounding application signals a change.
 *
 * ============================================================================
 */

use crate::collector::store::KeyValueStore;
use crate::collector::types::CollectorError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Store slot holding the settings blob
pub const SETTINGS_KEY: &str = "clay-settings";

/// Bundle size used when the setting is absent or unparsable
pub const DEFAULT_BUNDLE_MAX: usize = 1;

/// Message shown on the device when the endpoint is missing
pub const NOT_CONFIGURED_MESSAGE: &str = "Not configured";

/**
 * Upload settings snapshot
 * Produced by the settings form; all delivery behavior is read from here
 */
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    // Collector URL receiving the POSTed bundles
    #[serde(alias = "cfgEndpoint", default)]
    pub endpoint: String,

    // Sent as `Authorization: Token token=<auth_token>`
    #[serde(alias = "cfgAuthToken", default)]
    pub auth_token: String,

    // Maximum records per request
    #[serde(
        alias = "cfgBundleMax",
        default = "default_bundle_max",
        deserialize_with = "deserialize_count"
    )]
    pub bundle_max: usize,

    // Reserved, no behavior
    #[serde(alias = "cfgAutoClose", default, deserialize_with = "deserialize_flag")]
    pub auto_close: bool,

    // Operator request to wipe local delivery state
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub resend: bool,

    // Reserved, no behavior (minutes between wakeups)
    #[serde(alias = "cfgWakeupTime", default, deserialize_with = "deserialize_minutes")]
    pub wakeup_time: Option<u32>,

    // Optional per-request timeout; none means a request may stay in flight indefinitely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_seconds: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            auth_token: String::new(),
            bundle_max: DEFAULT_BUNDLE_MAX,
            auto_close: false,
            resend: false,
            wakeup_time: None,
            request_timeout_seconds: None,
        }
    }
}

impl Settings {
    /**
     * Normalize loosely entered values
     * - bundle_max clamped to at least 1
     * - endpoint trimmed, `http://` prepended when no scheme is given
     */
    pub fn normalized(mut self) -> Self {
        self.bundle_max = self.bundle_max.max(1);

        let endpoint = self.endpoint.trim();
        self.endpoint = if endpoint.is_empty() || endpoint.contains("://") {
            endpoint.to_string()
        } else {
            log::warn!("Endpoint {:?} has no scheme, assuming http://", endpoint);
            format!("http://{}", endpoint)
        };

        self
    }

    /**
     * Validate settings
     * Returns Err(CollectorError::Configuration) if the endpoint is unusable
     */
    pub fn validate(&self) -> Result<(), CollectorError> {
        if self.endpoint.trim().is_empty() {
            return Err(CollectorError::configuration("endpoint is not set"));
        }
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(CollectorError::configuration(
                "endpoint must start with http:// or https://",
            ));
        }
        if self.bundle_max < 1 {
            return Err(CollectorError::configuration("bundle_max must be at least 1"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_seconds
            .filter(|seconds| *seconds > 0)
            .map(Duration::from_secs)
    }
}

fn default_bundle_max() -> usize {
    DEFAULT_BUNDLE_MAX
}

/// Integer from a number or numeric string; anything else falls back to the default
fn lenient_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn deserialize_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match lenient_integer(&value) {
        Some(n) if n >= 1 => n as usize,
        Some(_) => 1,
        None => {
            if !value.is_null() {
                log::warn!("Ignoring unparsable bundle size {}", value);
            }
            DEFAULT_BUNDLE_MAX
        }
    })
}

fn deserialize_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match &value {
        Value::Bool(b) => *b,
        Value::String(s) if s.eq_ignore_ascii_case("true") => true,
        _ => lenient_integer(&value).is_some_and(|n| n > 0),
    })
}

fn deserialize_minutes<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<u32>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(lenient_integer(&value)
        .filter(|n| *n > 0)
        .and_then(|n| u32::try_from(n).ok()))
}

/**
 * Parse a settings blob
 */
pub fn parse_settings(json_str: &str) -> Result<Settings, CollectorError> {
    let settings: Settings = serde_json::from_str(json_str)
        .map_err(|e| CollectorError::configuration(format!("Failed to parse settings: {}", e)))?;
    let settings = settings.normalized();
    settings.validate()?;
    Ok(settings)
}

/**
 * Load settings from the store
 * Missing blob, unparsable blob, and missing endpoint are all configuration errors
 */
pub fn load_settings(store: &dyn KeyValueStore) -> Result<Settings, CollectorError> {
    let json_str = store.get(SETTINGS_KEY).ok_or_else(|| {
        log::info!("No settings stored yet");
        CollectorError::configuration(NOT_CONFIGURED_MESSAGE)
    })?;

    let settings = parse_settings(&json_str)?;
    log::info!(
        "Loaded settings (endpoint: {}, bundle_max: {}, resend: {})",
        settings.endpoint,
        settings.bundle_max,
        settings.resend
    );
    Ok(settings)
}

/**
 * Save settings to the store
 */
pub fn save_settings(store: &dyn KeyValueStore, settings: &Settings) -> Result<(), String> {
    let json_str = serde_json::to_string(settings)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;
    store.set(SETTINGS_KEY, &json_str)?;
    log::info!("Saved settings");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::store::MemoryStore;

    #[test]
    fn test_default_settings_not_configured() {
        let settings = Settings::default();
        assert_eq!(settings.bundle_max, 1);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_parse_form_field_names() {
        let settings = parse_settings(
            r#"{
                "cfgEndpoint": "https://collector.example/v1/health_records/batch_create",
                "cfgAuthToken": "secret",
                "cfgBundleMax": "50",
                "cfgAutoClose": 1,
                "resend": false,
                "cfgWakeupTime": "0"
            }"#,
        )
        .unwrap();

        assert_eq!(
            settings.endpoint,
            "https://collector.example/v1/health_records/batch_create"
        );
        assert_eq!(settings.auth_token, "secret");
        assert_eq!(settings.bundle_max, 50);
        assert!(settings.auto_close);
        assert!(!settings.resend);
        assert!(settings.wakeup_time.is_none());
    }

    #[test]
    fn test_bundle_max_clamped_and_defaulted() {
        let settings = parse_settings(r#"{"endpoint":"http://a","bundle_max":0}"#).unwrap();
        assert_eq!(settings.bundle_max, 1);

        let settings = parse_settings(r#"{"endpoint":"http://a","bundle_max":"-4"}"#).unwrap();
        assert_eq!(settings.bundle_max, 1);

        let settings = parse_settings(r#"{"endpoint":"http://a","bundle_max":"lots"}"#).unwrap();
        assert_eq!(settings.bundle_max, DEFAULT_BUNDLE_MAX);

        let settings = parse_settings(r#"{"endpoint":"http://a"}"#).unwrap();
        assert_eq!(settings.bundle_max, DEFAULT_BUNDLE_MAX);
    }

    #[test]
    fn test_endpoint_without_scheme_gets_http() {
        let settings =
            parse_settings(r#"{"endpoint":" 10.0.0.25/v1/health_records/batch_create "}"#).unwrap();
        assert_eq!(settings.endpoint, "http://10.0.0.25/v1/health_records/batch_create");
    }

    #[test]
    fn test_missing_endpoint_is_configuration_error() {
        let err = parse_settings(r#"{"auth_token":"x"}"#).unwrap_err();
        assert!(matches!(err, CollectorError::Configuration { .. }));

        let err = parse_settings("{not json").unwrap_err();
        assert!(err.message().starts_with("Failed to parse settings"));

        let err = parse_settings(r#"{"endpoint":"ftp://host/x"}"#).unwrap_err();
        assert!(matches!(err, CollectorError::Configuration { .. }));
    }

    #[test]
    fn test_resend_flag_variants() {
        for (raw, expected) in [("true", true), ("\"1\"", true), ("\"true\"", true), ("0", false), ("null", false)] {
            let json = format!(r#"{{"endpoint":"http://a","resend":{}}}"#, raw);
            assert_eq!(parse_settings(&json).unwrap().resend, expected, "resend={}", raw);
        }
    }

    #[test]
    fn test_load_and_save_round_trip() {
        let store = MemoryStore::new();
        assert!(load_settings(&store).is_err());

        let settings = Settings {
            endpoint: "http://collector.local/batch".to_string(),
            auth_token: "t".to_string(),
            bundle_max: 5,
            resend: true,
            request_timeout_seconds: Some(30),
            ..Settings::default()
        };
        save_settings(&store, &settings).unwrap();

        let loaded = load_settings(&store).unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.request_timeout(), Some(Duration::from_secs(30)));
    }
}
