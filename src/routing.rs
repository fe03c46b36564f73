//! Account → webhook destination routing.
//!
//! Two independent tables: the forward table (`{url, secret}` per account,
//! with an optional `"default"` entry) and the archive table
//! (`{url, params, headers}` per account, no default). Forward payloads are
//! always signed, so every forward entry with a URL must carry a secret.

use std::collections::{BTreeMap, HashMap};

use secrecy::SecretString;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ConfigError;

/// Key of the fallback forward destination.
pub const DEFAULT_ROUTE: &str = "default";

/// Where and how to deliver a payload.
#[derive(Debug)]
pub struct WebhookDestination {
    pub url: String,
    /// HMAC key; required on the forward path, unused for archive posts.
    pub secret: Option<SecretString>,
    pub extra_headers: BTreeMap<String, String>,
    pub extra_params: BTreeMap<String, String>,
}

impl WebhookDestination {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            secret: None,
            extra_headers: BTreeMap::new(),
            extra_params: BTreeMap::new(),
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(SecretString::from(secret.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.insert(name.into(), value.into());
        self
    }

    fn is_usable(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDestination {
    url: Option<String>,
    secret: Option<String>,
    headers: HashMap<String, Value>,
    params: HashMap<String, Value>,
}

impl From<RawDestination> for WebhookDestination {
    fn from(raw: RawDestination) -> Self {
        Self {
            url: raw.url.unwrap_or_default(),
            secret: raw.secret.map(SecretString::from),
            extra_headers: stringify_map(raw.headers),
            extra_params: stringify_map(raw.params),
        }
    }
}

/// Header and query values may be given as any JSON scalar.
fn stringify_map(map: HashMap<String, Value>) -> BTreeMap<String, String> {
    map.into_iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(s) => Some((key, s)),
            other => Some((key, other.to_string())),
        })
        .collect()
}

/// Account id → destination mapping.
#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: HashMap<String, WebhookDestination>,
}

impl RoutingTable {
    /// Parse a routing table from its JSON object form.
    pub fn from_json(key: &str, raw: &str) -> Result<Self, ConfigError> {
        let parsed: HashMap<String, RawDestination> =
            serde_json::from_str(raw).map_err(|source| ConfigError::Json {
                key: key.to_string(),
                source,
            })?;
        Ok(Self {
            routes: parsed
                .into_iter()
                .map(|(account, raw)| (account, raw.into()))
                .collect(),
        })
    }

    /// Parse the forward table. An entry with a URL but no secret is
    /// rejected.
    pub fn forward_from_json(key: &str, raw: &str) -> Result<Self, ConfigError> {
        let table = Self::from_json(key, raw)?;
        let mut unsigned: Vec<&str> = table
            .routes
            .iter()
            .filter(|(_, destination)| destination.is_usable() && destination.secret.is_none())
            .map(|(account, _)| account.as_str())
            .collect();
        if !unsigned.is_empty() {
            unsigned.sort_unstable();
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("routes without a secret: {}", unsigned.join(", ")),
            });
        }
        Ok(table)
    }

    pub fn insert(&mut self, account_id: impl Into<String>, destination: WebhookDestination) {
        self.routes.insert(account_id.into(), destination);
    }

    pub fn get(&self, account_id: &str) -> Option<&WebhookDestination> {
        self.routes.get(account_id)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Resolves delivery destinations for an account.
#[derive(Debug, Default)]
pub struct AccountRouter {
    forward: RoutingTable,
    archive: RoutingTable,
}

impl AccountRouter {
    pub fn new(forward: RoutingTable, archive: RoutingTable) -> Self {
        Self { forward, archive }
    }

    /// The account's own forward entry, else `"default"`. An entry without a
    /// URL or secret resolves to nothing; it does not fall through to the
    /// default.
    pub fn resolve_forward(&self, account_id: &str) -> Option<&WebhookDestination> {
        self.forward
            .get(account_id)
            .or_else(|| self.forward.get(DEFAULT_ROUTE))
            .filter(|destination| destination.is_usable() && destination.secret.is_some())
    }

    /// The account's archive entry. There is no default.
    pub fn resolve_archive(&self, account_id: &str) -> Option<&WebhookDestination> {
        self.archive
            .get(account_id)
            .filter(|destination| destination.is_usable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn router(forward: &str, archive: &str) -> AccountRouter {
        AccountRouter::new(
            RoutingTable::from_json("WABA_WEBHOOK_CONFIG", forward).unwrap(),
            RoutingTable::from_json("ARCHIVE_WEBHOOK_CONFIG", archive).unwrap(),
        )
    }

    #[test]
    fn resolves_account_entry() {
        let r = router(
            r#"{"5511": {"url": "https://a.example/hook", "secret": "s1"},
                "default": {"url": "https://d.example/hook", "secret": "s0"}}"#,
            "{}",
        );
        let dest = r.resolve_forward("5511").unwrap();
        assert_eq!(dest.url, "https://a.example/hook");
        assert_eq!(dest.secret.as_ref().unwrap().expose_secret(), "s1");
    }

    #[test]
    fn falls_back_to_default() {
        let r = router(r#"{"default": {"url": "https://d.example/hook", "secret": "s0"}}"#, "{}");
        assert_eq!(r.resolve_forward("9999").unwrap().url, "https://d.example/hook");
    }

    #[test]
    fn no_entry_and_no_default_resolves_nothing() {
        let r = router(r#"{"5511": {"url": "https://a.example/hook", "secret": "s"}}"#, "{}");
        assert!(r.resolve_forward("9999").is_none());
    }

    #[test]
    fn entry_without_url_does_not_fall_back() {
        let r = router(
            r#"{"5511": {"secret": "s1"}, "default": {"url": "https://d.example/hook", "secret": "s0"}}"#,
            "{}",
        );
        assert!(r.resolve_forward("5511").is_none());
    }

    #[test]
    fn forward_table_requires_secrets() {
        let err = RoutingTable::forward_from_json(
            "WABA_WEBHOOK_CONFIG",
            r#"{"5511": {"url": "https://a.example/hook"},
                "default": {"url": "https://d.example/hook", "secret": "s0"}}"#,
        )
        .unwrap_err();
        match err {
            ConfigError::InvalidValue { key, message } => {
                assert_eq!(key, "WABA_WEBHOOK_CONFIG");
                assert!(message.contains("5511"));
                assert!(!message.contains("default"));
            }
            other => panic!("expected invalid value, got {other:?}"),
        }

        // Entries without a URL are unroutable anyway.
        assert!(
            RoutingTable::forward_from_json("WABA_WEBHOOK_CONFIG", r#"{"5511": {}}"#).is_ok()
        );
    }

    #[test]
    fn unsigned_forward_entry_resolves_nothing() {
        let mut forward = RoutingTable::default();
        forward.insert(DEFAULT_ROUTE, WebhookDestination::new("https://d.example/hook"));
        let r = AccountRouter::new(forward, RoutingTable::default());
        assert!(r.resolve_forward("5511").is_none());
    }

    #[test]
    fn archive_has_no_default() {
        let r = router(
            "{}",
            r#"{"default": {"url": "https://arch.example"},
                "5511": {"url": "https://arch.example/5511",
                         "params": {"token": "abc", "page": 2},
                         "headers": {"Authorization": "Bearer t"}}}"#,
        );
        assert!(r.resolve_archive("9999").is_none());
        let dest = r.resolve_archive("5511").unwrap();
        assert_eq!(dest.extra_params.get("token").unwrap(), "abc");
        assert_eq!(dest.extra_params.get("page").unwrap(), "2");
        assert_eq!(dest.extra_headers.get("Authorization").unwrap(), "Bearer t");
        assert!(dest.secret.is_none());
    }

    #[test]
    fn malformed_table_is_rejected() {
        let err = RoutingTable::from_json("WABA_WEBHOOK_CONFIG", "[1, 2").unwrap_err();
        assert!(matches!(err, ConfigError::Json { .. }));
    }

    #[test]
    fn debug_output_hides_secret() {
        let dest = WebhookDestination::new("https://a.example").with_secret("super-secret");
        let rendered = format!("{dest:?}");
        assert!(!rendered.contains("super-secret"));
    }
}
