//! Binding of the task's opaque `providerFields` onto a backend's typed
//! field struct.
//!
//! Unknown keys are dropped. Known keys are type-checked here, so a
//! malformed value fails the call as [`Error::Binding`] before any provider
//! request is made.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::provider::ProviderFields;
use crate::{Error, Result};

pub fn bind<F: ProviderFields>(fields: &Map<String, Value>) -> Result<F> {
    serde_json::from_value(Value::Object(fields.clone()))
        .map_err(|e| Error::Binding(format!("provider fields: {e}")))
}

/// A bound field the backend cannot work without.
pub fn required<'a>(value: &'a Option<String>, key: &str) -> Result<&'a str> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Error::Binding(format!("missing provider field '{key}'"))),
    }
}

/// Hostnames end up in a remote `hostname` invocation.
pub fn validate_hostname(hostname: &str) -> Result<()> {
    let valid = !hostname.is_empty()
        && hostname.len() <= 253
        && !hostname.starts_with('-')
        && !hostname.starts_with('.')
        && hostname
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(Error::Binding(format!("invalid hostname '{hostname}'")))
    }
}

/// SSH users end up as the `user@host` argument of the local `ssh` client.
pub fn validate_username(user: &str) -> Result<()> {
    let mut chars = user.chars();
    let valid = user.len() <= 32
        && chars
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::Binding(format!("invalid ssh user '{user}'")))
    }
}

/// Accepts `123` or `"123"`; dispatchers forward form values as strings.
pub fn lenient_i64<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Str(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Int(n)) => Ok(Some(n)),
        Some(Raw::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Str(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("expected an integer, got '{s}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct SampleFields {
        api_user: Option<String>,
        #[serde(default, deserialize_with = "lenient_i64")]
        network_id: Option<i64>,
    }

    impl ProviderFields for SampleFields {
        fn key_pair(&self) -> Option<&str> {
            None
        }
        fn ssh_key_resource(&self) -> Option<&str> {
            None
        }
    }

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn unknown_keys_are_dropped() {
        let fields: SampleFields = bind(&map(serde_json::json!({
            "api_user": "alice",
            "favourite_colour": "green"
        })))
        .unwrap();
        assert_eq!(fields.api_user.as_deref(), Some("alice"));
        assert_eq!(fields.network_id, None);
    }

    #[test]
    fn known_keys_are_type_checked() {
        let err = bind::<SampleFields>(&map(serde_json::json!({ "api_user": 42 }))).unwrap_err();
        assert!(matches!(err, Error::Binding(_)));

        let err =
            bind::<SampleFields>(&map(serde_json::json!({ "network_id": "abc" }))).unwrap_err();
        assert!(err.to_string().contains("expected an integer"));
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let fields: SampleFields =
            bind(&map(serde_json::json!({ "network_id": "17" }))).unwrap();
        assert_eq!(fields.network_id, Some(17));
        let fields: SampleFields = bind(&map(serde_json::json!({ "network_id": 18 }))).unwrap();
        assert_eq!(fields.network_id, Some(18));
    }

    #[test]
    fn required_names_the_missing_key() {
        let err = required(&None, "api_password").unwrap_err();
        assert_eq!(err.to_string(), "invalid task: missing provider field 'api_password'");
    }

    #[test]
    fn hostnames_are_validated() {
        assert!(validate_hostname("node1.example.com").is_ok());
        assert!(validate_hostname("node-1").is_ok());
        assert!(validate_hostname("").is_err());
        assert!(validate_hostname("-rf").is_err());
        assert!(validate_hostname("node1; reboot").is_err());
        assert!(validate_hostname(&"a".repeat(254)).is_err());
    }

    #[test]
    fn ssh_users_cannot_become_options() {
        assert!(validate_username("root").is_ok());
        assert!(validate_username("ubuntu").is_ok());
        assert!(validate_username("svc_deploy-2").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("-oProxyCommand=touch /tmp/x").is_err());
        assert!(validate_username("root@evil").is_err());
        assert!(validate_username("a b").is_err());
        assert!(validate_username(&"u".repeat(33)).is_err());
    }
}
