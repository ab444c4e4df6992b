use std::env;
use std::str::FromStr;
use std::time::Duration;

use fusion_contracts::relay::RelayTransportKind;
use fusion_contracts::FusionError;

pub const DEFAULT_UPLOAD_BASE: &str = "https://api.imgbb.com";
pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_FUSION_TIMEOUT: Duration = Duration::from_secs(120);
/// The host rejects uploads above 32 MiB; base64 inflates by a third.
pub const DEFAULT_MAX_BODY_BYTES: usize = 44 * 1024 * 1024;

/// Settings for the image host relay. Read once at startup and shared
/// read-only by every request.
#[derive(Clone)]
pub struct RelayConfig {
    pub api_key: String,
    pub upload_base: String,
    pub transport: RelayTransportKind,
    pub timeout: Duration,
    pub max_retries: usize,
    pub retry_backoff: Duration,
    pub max_body_bytes: usize,
}

impl RelayConfig {
    pub fn new(api_key: impl Into<String>) -> Result<Self, FusionError> {
        let api_key = api_key.into().trim().to_string();
        if api_key.is_empty() {
            return Err(FusionError::Configuration("RELAY_API_KEY not set".to_string()));
        }
        Ok(Self {
            api_key,
            upload_base: DEFAULT_UPLOAD_BASE.to_string(),
            transport: RelayTransportKind::default(),
            timeout: DEFAULT_RELAY_TIMEOUT,
            max_retries: 0,
            retry_backoff: Duration::from_secs(1),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        })
    }

    pub fn from_env() -> Result<Self, FusionError> {
        Self::from_lookup(non_empty_env)
    }

    /// Builds the config from any key lookup. Fails fast when the credential
    /// is absent or a value does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, FusionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("RELAY_API_KEY")
            .or_else(|| lookup("IMGBB_API_KEY"))
            .unwrap_or_default();
        let mut config = Self::new(api_key)?;
        if let Some(base) = lookup("RELAY_UPLOAD_BASE") {
            config.upload_base = normalize_base(&base);
        }
        if let Some(kind) = lookup("RELAY_TRANSPORT") {
            config.transport = kind.parse()?;
        }
        if let Some(secs) = parse_var::<f64>(&lookup, "RELAY_TIMEOUT_SECS")? {
            config.timeout = positive_duration("RELAY_TIMEOUT_SECS", secs)?;
        }
        if let Some(retries) = parse_var::<usize>(&lookup, "RELAY_MAX_RETRIES")? {
            config.max_retries = retries.min(5);
        }
        if let Some(secs) = parse_var::<f64>(&lookup, "RELAY_RETRY_BACKOFF_SECS")? {
            config.retry_backoff = Duration::from_secs_f64(secs.clamp(0.0, 30.0));
        }
        if let Some(bytes) = parse_var::<usize>(&lookup, "RELAY_MAX_BODY_BYTES")? {
            config.max_body_bytes = bytes;
        }
        Ok(config)
    }

    pub fn upload_endpoint(&self) -> String {
        format!("{}/1/upload", self.upload_base)
    }
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("api_key", &"<redacted>")
            .field("upload_base", &self.upload_base)
            .field("transport", &self.transport)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff", &self.retry_backoff)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

/// Where fusion requests go.
#[derive(Clone)]
pub struct FusionConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl FusionConfig {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, FusionError> {
        let endpoint = normalize_base(&endpoint.into());
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(FusionError::Configuration(format!(
                "FUSION_ENDPOINT must be an http(s) URL, got '{endpoint}'"
            )));
        }
        Ok(Self {
            endpoint,
            api_key: None,
            timeout: DEFAULT_FUSION_TIMEOUT,
        })
    }

    pub fn from_env() -> Result<Self, FusionError> {
        Self::from_lookup(non_empty_env)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, FusionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(endpoint) = lookup("FUSION_ENDPOINT") else {
            return Err(FusionError::Configuration("FUSION_ENDPOINT not set".to_string()));
        };
        let mut config = Self::new(endpoint)?;
        config.api_key = lookup("FUSION_API_KEY");
        if let Some(secs) = parse_var::<f64>(&lookup, "FUSION_TIMEOUT_SECS")? {
            config.timeout = positive_duration("FUSION_TIMEOUT_SECS", secs)?;
        }
        Ok(config)
    }
}

impl std::fmt::Debug for FusionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FusionConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn normalize_base(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, FusionError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| FusionError::Configuration(format!("{key} has invalid value '{raw}'")))
}

fn positive_duration(key: &str, secs: f64) -> Result<Duration, FusionError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(FusionError::Configuration(format!(
            "{key} must be a positive number of seconds"
        )));
    }
    Ok(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn relay_config_requires_credential() {
        let err = RelayConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(
            matches!(err, FusionError::Configuration(ref text) if text.contains("RELAY_API_KEY"))
        );
        assert!(RelayConfig::new("   ").is_err());
    }

    #[test]
    fn relay_config_reads_overrides() -> anyhow::Result<()> {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("IMGBB_API_KEY", "k-1"),
            ("RELAY_UPLOAD_BASE", "http://127.0.0.1:9000/"),
            ("RELAY_TRANSPORT", "urlencoded"),
            ("RELAY_TIMEOUT_SECS", "2.5"),
            ("RELAY_MAX_RETRIES", "40"),
        ]))?;
        assert_eq!(config.api_key, "k-1");
        assert_eq!(config.upload_endpoint(), "http://127.0.0.1:9000/1/upload");
        assert_eq!(config.transport, RelayTransportKind::UrlEncoded);
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.max_retries, 5);
        assert!(!format!("{config:?}").contains("k-1"));
        Ok(())
    }

    #[test]
    fn relay_config_defaults() -> anyhow::Result<()> {
        let config = RelayConfig::from_lookup(lookup_from(&[("RELAY_API_KEY", "k")]))?;
        assert_eq!(config.upload_endpoint(), "https://api.imgbb.com/1/upload");
        assert_eq!(config.transport, RelayTransportKind::Multipart);
        assert_eq!(config.timeout, DEFAULT_RELAY_TIMEOUT);
        assert_eq!(config.max_retries, 0);
        Ok(())
    }

    #[test]
    fn relay_config_rejects_bad_numbers() {
        let err = RelayConfig::from_lookup(lookup_from(&[
            ("RELAY_API_KEY", "k"),
            ("RELAY_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("RELAY_TIMEOUT_SECS"));

        let err = RelayConfig::from_lookup(lookup_from(&[
            ("RELAY_API_KEY", "k"),
            ("RELAY_TIMEOUT_SECS", "0"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("positive"));
    }

    #[test]
    fn fusion_config_requires_http_endpoint() -> anyhow::Result<()> {
        assert!(FusionConfig::from_lookup(lookup_from(&[])).is_err());
        assert!(FusionConfig::new("ftp://x").is_err());

        let config = FusionConfig::from_lookup(lookup_from(&[
            ("FUSION_ENDPOINT", "https://fusion.example/v1/fuse/"),
            ("FUSION_API_KEY", "secret"),
        ]))?;
        assert_eq!(config.endpoint, "https://fusion.example/v1/fuse");
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert!(!format!("{config:?}").contains("secret"));
        Ok(())
    }
}
