//! Pluggable node-provisioning automator.
//!
//! Drives a single compute node through its provider lifecycle
//! (create, confirm, delete) and always answers with a [`TaskResult`].

pub mod automator;
pub mod bootstrap;
pub mod config;
pub mod fields;
pub mod hetzner;
pub mod joyent;
pub mod net;
pub mod provider;
pub mod result;
pub mod ssh;
pub mod types;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use automator::{Automator, Lifecycle};
pub use config::AutomatorConfig;
pub use provider::{InstanceApi, ProviderBackend, ProviderFields};
pub use types::{Operation, Task, TaskOutput, TaskResult, TaskStatus};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid task: {0}")]
    Binding(String),

    #[error("provider api error: {0}")]
    ProviderApi(String),

    #[error("server {0} not found")]
    InstanceNotFound(String),

    #[error("server {0} is in ERROR state")]
    InstanceFailed(String),

    #[error("timed out waiting for server to be created: {id} not ready after {waited_secs}s")]
    Timeout { id: String, waited_secs: u64 },

    #[error("no IP address available for bootstrapping")]
    NoUsableAddress,

    #[error("SSH authentication failure for {target}: {detail}")]
    SshAuth { target: String, detail: String },

    #[error("ssh connection to {target} failed: {detail}")]
    Ssh { target: String, detail: String },

    #[error("{description}: command `{command}` failed (exit {exit_status}): {output}")]
    Command {
        description: String,
        command: String,
        exit_status: i32,
        output: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// Short stable label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Binding(_) => "binding",
            Self::ProviderApi(_) => "provider_api",
            Self::InstanceNotFound(_) => "instance_not_found",
            Self::InstanceFailed(_) => "instance_failed",
            Self::Timeout { .. } => "timeout",
            Self::NoUsableAddress => "no_usable_address",
            Self::SshAuth { .. } => "ssh_auth",
            Self::Ssh { .. } => "ssh",
            Self::Command { .. } => "command",
            Self::InvalidConfig(_) => "invalid_config",
            Self::UnknownProvider(_) => "unknown_provider",
            Self::Io(_) => "io",
            Self::Unexpected(_) => "unexpected",
        }
    }

    /// Prefix SSH targets with the provider id so failures name both.
    pub(crate) fn for_instance(self, provider_id: &str) -> Self {
        match self {
            Self::SshAuth { target, detail } => Self::SshAuth {
                target: format!("{provider_id}/{target}"),
                detail,
            },
            Self::Ssh { target, detail } => Self::Ssh {
                target: format!("{provider_id}/{target}"),
                detail,
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Known provider backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    Joyent,
    Hetzner,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Joyent => "joyent",
            Self::Hetzner => "hetzner",
        }
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "joyent" | "triton" => Ok(Self::Joyent),
            "hetzner" => Ok(Self::Hetzner),
            other => Err(Error::UnknownProvider(other.to_string())),
        }
    }
}

/// Build the automator for a provider, wired to the system `ssh` client.
pub fn build_automator(name: ProviderName, config: Arc<AutomatorConfig>) -> Box<dyn Lifecycle> {
    let ssh = Arc::new(ssh::OpenSshConnector::new(&config));
    match name {
        ProviderName::Joyent => Box::new(Automator::new(joyent::JoyentBackend, config, ssh)),
        ProviderName::Hetzner => Box::new(Automator::new(hetzner::HetznerBackend, config, ssh)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_parse() {
        assert_eq!("joyent".parse::<ProviderName>().unwrap(), ProviderName::Joyent);
        assert_eq!("Hetzner".parse::<ProviderName>().unwrap(), ProviderName::Hetzner);
        assert!(matches!(
            "aws".parse::<ProviderName>(),
            Err(Error::UnknownProvider(name)) if name == "aws"
        ));
    }

    #[test]
    fn ssh_errors_name_the_instance() {
        let err = Error::SshAuth {
            target: "root@203.0.113.5".into(),
            detail: "Permission denied".into(),
        }
        .for_instance("srv-123");
        assert_eq!(
            err.to_string(),
            "SSH authentication failure for srv-123/root@203.0.113.5: Permission denied"
        );

        let untouched = Error::NoUsableAddress.for_instance("srv-123");
        assert_eq!(untouched.kind(), "no_usable_address");
    }

    #[test]
    fn timeout_message_is_distinguishable() {
        let err = Error::Timeout {
            id: "srv-1".into(),
            waited_secs: 600,
        };
        assert!(err.to_string().starts_with("timed out waiting for server to be created"));
    }
}
