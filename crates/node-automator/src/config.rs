use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

/// Upper bound for any configured wait.
const MAX_WAIT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Process-wide automator settings, loaded once at startup and passed
/// explicitly to every automator.
#[derive(Debug, Clone)]
pub struct AutomatorConfig {
    /// Where per-task SSH key material lives.
    pub key_dir: PathBuf,
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
    pub delete_settle: Duration,
    pub sshd_timeout: Duration,
    pub ssh_port: u16,
    pub connectivity_host: String,
    pub data_device: String,
    pub data_mount: String,
}

impl Default for AutomatorConfig {
    fn default() -> Self {
        Self {
            key_dir: PathBuf::from("ssh_keys"),
            ready_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(5),
            delete_settle: Duration::from_secs(30),
            sshd_timeout: Duration::from_secs(300),
            ssh_port: 22,
            connectivity_host: "www.google.com".into(),
            data_device: "/dev/vdb".into(),
            data_mount: "/data".into(),
        }
    }
}

impl AutomatorConfig {
    /// Create from env vars, falling back to defaults:
    ///
    /// - `AUTOMATOR_SSH_KEY_DIR` (default: `"ssh_keys"`)
    /// - `AUTOMATOR_READY_TIMEOUT_SECS` (default: `600`)
    /// - `AUTOMATOR_POLL_INTERVAL_SECS` (default: `5`)
    /// - `AUTOMATOR_DELETE_SETTLE_SECS` (default: `30`)
    /// - `AUTOMATOR_SSHD_TIMEOUT_SECS` (default: `300`)
    /// - `AUTOMATOR_SSH_PORT` (default: `22`)
    /// - `AUTOMATOR_CONNECTIVITY_HOST` (default: `"www.google.com"`)
    /// - `AUTOMATOR_DATA_DEVICE` (default: `"/dev/vdb"`)
    /// - `AUTOMATOR_DATA_MOUNT` (default: `"/data"`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let secs = |name: &str, default: Duration| -> Result<Duration> {
            match lookup(name) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| Error::InvalidConfig(format!("{name} must be a whole number of seconds"))),
                None => Ok(default),
            }
        };

        let ssh_port = match lookup("AUTOMATOR_SSH_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| Error::InvalidConfig("AUTOMATOR_SSH_PORT must be a port number".into()))?,
            None => defaults.ssh_port,
        };

        let config = Self {
            key_dir: lookup("AUTOMATOR_SSH_KEY_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.key_dir),
            ready_timeout: secs("AUTOMATOR_READY_TIMEOUT_SECS", defaults.ready_timeout)?,
            poll_interval: secs("AUTOMATOR_POLL_INTERVAL_SECS", defaults.poll_interval)?,
            delete_settle: secs("AUTOMATOR_DELETE_SETTLE_SECS", defaults.delete_settle)?,
            sshd_timeout: secs("AUTOMATOR_SSHD_TIMEOUT_SECS", defaults.sshd_timeout)?,
            ssh_port,
            connectivity_host: lookup("AUTOMATOR_CONNECTIVITY_HOST")
                .unwrap_or(defaults.connectivity_host),
            data_device: lookup("AUTOMATOR_DATA_DEVICE").unwrap_or(defaults.data_device),
            data_mount: lookup("AUTOMATOR_DATA_MOUNT").unwrap_or(defaults.data_mount),
        };
        config.validate()?;
        Ok(config)
    }

    /// These values are interpolated into remote shell commands.
    fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "AUTOMATOR_POLL_INTERVAL_SECS must be greater than zero".into(),
            ));
        }
        for (name, value) in [
            ("AUTOMATOR_READY_TIMEOUT_SECS", self.ready_timeout),
            ("AUTOMATOR_POLL_INTERVAL_SECS", self.poll_interval),
            ("AUTOMATOR_DELETE_SETTLE_SECS", self.delete_settle),
            ("AUTOMATOR_SSHD_TIMEOUT_SECS", self.sshd_timeout),
        ] {
            if value > MAX_WAIT {
                return Err(Error::InvalidConfig(format!(
                    "{name} must not exceed {}",
                    MAX_WAIT.as_secs()
                )));
            }
        }
        for (name, value) in [
            ("AUTOMATOR_CONNECTIVITY_HOST", &self.connectivity_host),
            ("AUTOMATOR_DATA_DEVICE", &self.data_device),
            ("AUTOMATOR_DATA_MOUNT", &self.data_mount),
        ] {
            let ok = !value.is_empty()
                && value
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '-' | '_'));
            if !ok {
                return Err(Error::InvalidConfig(format!("{name} contains unsupported characters")));
            }
        }
        Ok(())
    }

    /// Absolute path of a key resource inside the key directory.
    pub fn identity_file(&self, resource: &str) -> PathBuf {
        let path = self.key_dir.join(resource);
        std::path::absolute(&path).unwrap_or(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_reference_behaviour() {
        let config = AutomatorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.ready_timeout, Duration::from_secs(600));
        assert_eq!(config.delete_settle, Duration::from_secs(30));
        assert_eq!(config.data_device, "/dev/vdb");
        assert_eq!(config.key_dir, PathBuf::from("ssh_keys"));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = AutomatorConfig::from_lookup(lookup(&[
            ("AUTOMATOR_SSH_KEY_DIR", "/etc/automator/keys"),
            ("AUTOMATOR_READY_TIMEOUT_SECS", "120"),
            ("AUTOMATOR_SSH_PORT", "2222"),
        ]))
        .unwrap();
        assert_eq!(config.key_dir, PathBuf::from("/etc/automator/keys"));
        assert_eq!(config.ready_timeout, Duration::from_secs(120));
        assert_eq!(config.ssh_port, 2222);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            AutomatorConfig::from_lookup(lookup(&[("AUTOMATOR_READY_TIMEOUT_SECS", "soon")])),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            AutomatorConfig::from_lookup(lookup(&[("AUTOMATOR_POLL_INTERVAL_SECS", "0")])),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            AutomatorConfig::from_lookup(lookup(&[("AUTOMATOR_DATA_MOUNT", "/data; rm -rf /")])),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn oversized_waits_are_rejected() {
        let err = AutomatorConfig::from_lookup(lookup(&[(
            "AUTOMATOR_READY_TIMEOUT_SECS",
            "18446744073709551615",
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("AUTOMATOR_READY_TIMEOUT_SECS must not exceed"));

        assert!(
            AutomatorConfig::from_lookup(lookup(&[("AUTOMATOR_SSHD_TIMEOUT_SECS", "604800")]))
                .is_ok()
        );
        assert!(
            AutomatorConfig::from_lookup(lookup(&[("AUTOMATOR_SSHD_TIMEOUT_SECS", "604801")]))
                .is_err()
        );
    }

    #[test]
    fn identity_file_is_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let config = AutomatorConfig {
            key_dir: dir.path().to_path_buf(),
            ..AutomatorConfig::default()
        };
        assert_eq!(config.identity_file("node-key"), dir.path().join("node-key"));

        let relative = AutomatorConfig::default().identity_file("node-key");
        assert!(relative.is_absolute());
        assert!(relative.ends_with("ssh_keys/node-key"));
    }
}
