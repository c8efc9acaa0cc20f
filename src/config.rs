//! Startup configuration (A1). Parsed strictly from a `key=value`
//! properties file at process start — every key is validated up front, so
//! a malformed value is a startup error rather than a failure deep inside
//! a request (`spec.md` §9's REDESIGN FLAG on the source's late-throwing
//! boolean parsing).

use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::propfile;

#[derive(Debug)]
pub(crate) struct Config {
    pub(crate) tempdir: PathBuf,
    pub(crate) deposits_root: PathBuf,
    pub(crate) base_url: String,
    pub(crate) collection_iri: String,
    pub(crate) git_enabled: bool,
    pub(crate) git_user: String,
    pub(crate) git_email: String,
    pub(crate) queue_capacity: usize,
    pub(crate) log: String,
    pub(crate) http_bind: std::net::SocketAddr,
}

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("could not parse properties file: {0}")]
    Malformed(#[from] propfile::PropertiesParseError),
    #[error("unknown configuration key {0:?}")]
    UnknownKey(String),
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

const KNOWN_KEYS: &[&str] = &[
    "tempdir",
    "deposits-root",
    "base-url",
    "collection.iri",
    "git.enabled",
    "git.user",
    "git.email",
    "queue.capacity",
    "log",
    "http.bind",
];

fn default_log() -> String {
    "deposit_finalizer=info".to_owned()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tempdir: "./deposit-finalizer-temp".into(),
            deposits_root: "./deposit-finalizer-storage".into(),
            base_url: "http://localhost:8080".to_owned(),
            collection_iri: "http://localhost:8080/collection".to_owned(),
            git_enabled: false,
            git_user: "deposit-finalizer".to_owned(),
            git_email: "deposit-finalizer@localhost".to_owned(),
            queue_capacity: 16,
            log: default_log(),
            http_bind: ([127, 0, 0, 1], 8080).into(),
        }
    }
}

impl Config {
    /// Parse a properties file's contents, rejecting unknown keys and
    /// invalid values up front rather than deferring the failure to first
    /// use.
    pub(crate) fn parse(contents: &str) -> Result<Self, ConfigError> {
        let entries = propfile::parse(contents)?;
        let mut map: HashMap<String, String> = HashMap::new();
        for (key, value) in entries {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                return Err(ConfigError::UnknownKey(key));
            }
            map.insert(key, value);
        }

        let mut cfg = Config::default();

        if let Some(v) = map.remove("tempdir") {
            cfg.tempdir = v.into();
        }
        if let Some(v) = map.remove("deposits-root") {
            cfg.deposits_root = v.into();
        }
        if let Some(v) = map.remove("base-url") {
            cfg.base_url = v;
        }
        if let Some(v) = map.remove("collection.iri") {
            cfg.collection_iri = v;
        }
        if let Some(v) = map.remove("git.enabled") {
            cfg.git_enabled = parse_bool("git.enabled", &v)?;
        }
        if let Some(v) = map.remove("git.user") {
            cfg.git_user = v;
        }
        if let Some(v) = map.remove("git.email") {
            cfg.git_email = v;
        }
        if let Some(v) = map.remove("queue.capacity") {
            cfg.queue_capacity = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "queue.capacity",
                value: v.clone(),
                reason: "expected a positive integer".to_owned(),
            })?;
        }
        if let Some(v) = map.remove("log") {
            cfg.log = v;
        }
        if let Some(v) = map.remove("http.bind") {
            cfg.http_bind = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "http.bind",
                value: v.clone(),
                reason: "expected host:port".to_owned(),
            })?;
        }

        Ok(cfg)
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key,
            value: other.to_owned(),
            reason: "expected \"true\" or \"false\"".to_owned(),
        }),
    }
}
