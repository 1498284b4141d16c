use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::poller::PollPolicy;

pub const DEFAULT_INTERVAL_SECONDS: u64 = 30;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 60;

const MAX_INTERVAL_SECONDS: u64 = 3600;
const MAX_ATTEMPTS_LIMIT: u32 = 1000;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GateConfig {
    pub vsphere: VsphereConfig,
    #[serde(default)]
    pub poll: PollConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct VsphereConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub insecure: bool,
    /// Datacenter to search; the endpoint's only datacenter when unset.
    #[serde(default)]
    pub datacenter: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl fmt::Debug for VsphereConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VsphereConfig")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("insecure", &self.insecure)
            .field("datacenter", &self.datacenter)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_seconds: DEFAULT_INTERVAL_SECONDS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECONDS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECONDS
}

/// SDK endpoint of a vSphere server, credentials included in the URL.
#[derive(Clone)]
pub struct Endpoint {
    pub url: Url,
    pub insecure: bool,
    pub request_timeout: Duration,
}

impl Endpoint {
    /// The URL with the password masked, safe for logs.
    pub fn redacted(&self) -> String {
        let mut url = self.url.clone();
        if url.password().is_some() {
            let _ = url.set_password(Some("xxxxx"));
        }
        url.to_string()
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.redacted())
            .field("insecure", &self.insecure)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Configuration that passed validation, ready to drive a run.
#[derive(Clone, Debug)]
pub struct ValidatedConfig {
    pub endpoint: Endpoint,
    pub datacenter: Option<String>,
    pub policy: PollPolicy,
}

impl GateConfig {
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&s).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Expands `$VAR` references, then checks every field, reporting all
    /// problems at once.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let mut errs = Vec::new();
        let v = &self.vsphere;

        let host = interpolate("host", &v.host, &mut errs);
        let username = interpolate("username", &v.username, &mut errs);
        let password = interpolate("password", &v.password, &mut errs);
        let datacenter = v
            .datacenter
            .as_deref()
            .map(|dc| interpolate("datacenter", dc, &mut errs))
            .filter(|dc| !dc.is_empty());

        for (key, value) in [("host", &host), ("username", &username), ("password", &password)] {
            if value.is_empty() {
                errs.push(format!("{key} must be set"));
            }
        }

        let url = if host.is_empty() {
            None
        } else {
            match sdk_url(&host, &username, &password) {
                Ok(url) => Some(url),
                Err(e) => {
                    errs.push(format!("invalid vSphere sdk endpoint: {e}"));
                    None
                }
            }
        };

        if v.request_timeout_seconds == 0 {
            errs.push("request_timeout_seconds must be greater than 0".to_string());
        }
        let p = &self.poll;
        if !(1..=MAX_INTERVAL_SECONDS).contains(&p.interval_seconds) {
            errs.push(format!(
                "poll.interval_seconds must be between 1 and {MAX_INTERVAL_SECONDS}"
            ));
        }
        if p.max_attempts > MAX_ATTEMPTS_LIMIT {
            errs.push(format!("poll.max_attempts must be at most {MAX_ATTEMPTS_LIMIT}"));
        }

        match url {
            Some(url) if errs.is_empty() => Ok(ValidatedConfig {
                endpoint: Endpoint {
                    url,
                    insecure: v.insecure,
                    request_timeout: Duration::from_secs(v.request_timeout_seconds),
                },
                datacenter,
                policy: PollPolicy {
                    interval: Duration::from_secs(p.interval_seconds),
                    max_attempts: p.max_attempts,
                },
            }),
            _ => Err(ConfigError::Invalid(errs)),
        }
    }
}

fn interpolate(key: &str, raw: &str, errs: &mut Vec<String>) -> String {
    match shellexpand::env(raw) {
        Ok(s) => s.into_owned(),
        Err(e) => {
            errs.push(format!("{key}: {e}"));
            String::new()
        }
    }
}

/// `https://<user>:<password>@<host>/sdk`
pub fn sdk_url(host: &str, username: &str, password: &str) -> Result<Url, String> {
    let mut url = Url::parse(&format!("https://{host}/sdk")).map_err(|e| e.to_string())?;
    if url.path() != "/sdk" || url.query().is_some() {
        return Err(format!("host '{host}' must not contain a path or query"));
    }
    url.set_username(username)
        .map_err(|_| "cannot embed username".to_string())?;
    url.set_password(Some(password))
        .map_err(|_| "cannot embed password".to_string())?;
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(host: &str, username: &str, password: &str) -> GateConfig {
        GateConfig {
            vsphere: VsphereConfig {
                host: host.into(),
                username: username.into(),
                password: password.into(),
                insecure: false,
                datacenter: None,
                request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECONDS,
            },
            poll: PollConfig::default(),
        }
    }

    #[test]
    fn builds_sdk_url_with_credentials() {
        let cfg = config("vc.example.com", "admin@vsphere.local", "p@ss:word").validate().unwrap();
        let url = &cfg.endpoint.url;
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("vc.example.com"));
        assert_eq!(url.path(), "/sdk");
        assert_eq!(url.username(), "admin%40vsphere.local");
        assert!(url.password().is_some());
        assert_eq!(cfg.policy, PollPolicy::default());
        assert!(!cfg.endpoint.redacted().contains("word"));
    }

    #[test]
    fn missing_fields_are_reported_together() {
        let err = config("", "", "").validate().unwrap_err();
        let ConfigError::Invalid(errs) = err else {
            panic!("expected Invalid, got {err:?}");
        };
        assert_eq!(
            errs,
            vec![
                "host must be set".to_string(),
                "username must be set".to_string(),
                "password must be set".to_string(),
            ]
        );
    }

    #[test]
    fn rejects_host_with_path_and_bad_poll_values() {
        let mut cfg = config("vc.example.com/extra", "u", "p");
        cfg.poll.interval_seconds = 0;
        cfg.poll.max_attempts = 5000;
        let ConfigError::Invalid(errs) = cfg.validate().unwrap_err() else {
            panic!("expected Invalid");
        };
        assert_eq!(errs.len(), 3, "{errs:?}");
        assert!(errs[0].starts_with("invalid vSphere sdk endpoint"));
    }

    #[test]
    fn expands_environment_variables() {
        std::env::set_var("TOOLSGATE_TEST_PASSWORD", "from-env");
        let cfg = config("vc.example.com", "u", "${TOOLSGATE_TEST_PASSWORD}")
            .validate()
            .unwrap();
        assert_eq!(cfg.endpoint.url.password(), Some("from-env"));

        let err = config("$TOOLSGATE_TEST_UNDEFINED_HOST", "u", "p").validate().unwrap_err();
        assert!(err.to_string().contains("host:"), "{err}");
    }

    #[test]
    fn debug_never_shows_password() {
        let cfg = config("vc.example.com", "u", "hunter2");
        assert!(!format!("{cfg:?}").contains("hunter2"));
        let validated = cfg.validate().unwrap();
        assert!(!format!("{validated:?}").contains("hunter2"));
    }

    #[test]
    fn loads_toml_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gate.toml");
        std::fs::write(
            &path,
            r#"
[vsphere]
host = "vc.example.com"
username = "u"
password = "p"
insecure = true
"#,
        )
        .unwrap();
        let cfg = GateConfig::load_from(&path).unwrap();
        assert!(cfg.vsphere.insecure);
        assert_eq!(cfg.poll.interval_seconds, DEFAULT_INTERVAL_SECONDS);
        assert_eq!(cfg.poll.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(cfg.vsphere.request_timeout_seconds, DEFAULT_REQUEST_TIMEOUT_SECONDS);
    }
}
