use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Lifecycle operation requested by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Operation {
    Create,
    Confirm,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Confirm => "confirm",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "confirm" => Ok(Self::Confirm),
            "delete" => Ok(Self::Delete),
            other => Err(Error::Binding(format!("unknown operation: {other}"))),
        }
    }
}

impl TryFrom<String> for Operation {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Operation> for &'static str {
    fn from(op: Operation) -> Self {
        op.as_str()
    }
}

/// SSH user and identity used to reach a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshAuth {
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identityfile: Option<PathBuf>,
}

/// One lifecycle call, as handed over by the dispatcher.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default)]
    pub task_id: Option<String>,
    pub operation: Operation,
    #[serde(default)]
    pub flavor: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    /// Provider-defined keys; opaque outside the provider backend.
    #[serde(default)]
    pub provider_fields: serde_json::Map<String, serde_json::Value>,
    #[serde(default, alias = "ssh-auth")]
    pub ssh_auth: Option<SshAuth>,
    #[serde(default, alias = "sshuser")]
    pub ssh_user: Option<String>,
    #[serde(default, alias = "providerid")]
    pub provider_id: Option<String>,
}

impl Task {
    pub fn new(operation: Operation) -> Self {
        Self {
            task_id: None,
            operation,
            flavor: None,
            image: None,
            hostname: None,
            provider_fields: serde_json::Map::new(),
            ssh_auth: None,
            ssh_user: None,
            provider_id: None,
        }
    }

    pub(crate) fn require<'a>(value: &'a Option<String>, key: &str) -> Result<&'a str> {
        match value.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(Error::Binding(format!("missing required key '{key}'"))),
        }
    }
}

/// Opaque provider-side instance identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Specification for creating an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRequest {
    pub name: String,
    pub flavor: String,
    pub image: String,
    pub key_name: Option<String>,
}

/// Instance as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInstance {
    pub id: InstanceId,
    pub name: String,
    /// Provider-defined state string.
    pub state: String,
    /// Addresses exactly as reported, unparsed.
    pub addresses: Vec<String>,
}

// ── Result envelope ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "u8")]
pub enum TaskStatus {
    Success,
    Failure,
}

impl TaskStatus {
    pub fn code(&self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
        }
    }
}

impl From<TaskStatus> for u8 {
    fn from(status: TaskStatus) -> Self {
        status.code()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IpAddresses {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_v4: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_v4: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_v6: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_v6: Option<String>,
}

impl IpAddresses {
    /// Bind and access are the same address in the single-address case.
    pub fn single(addr: IpAddr) -> Self {
        let s = addr.to_string();
        match addr {
            IpAddr::V4(_) => Self {
                access_v4: Some(s.clone()),
                bind_v4: Some(s),
                ..Self::default()
            },
            IpAddr::V6(_) => Self {
                access_v6: Some(s.clone()),
                bind_v6: Some(s),
                ..Self::default()
            },
        }
    }
}

/// Success fields of a [`TaskResult`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskOutput {
    #[serde(rename = "providerid", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(rename = "ssh-auth", skip_serializing_if = "Option::is_none")]
    pub ssh_auth: Option<SshAuth>,
    #[serde(rename = "ipaddresses", skip_serializing_if = "Option::is_none")]
    pub ip_addresses: Option<IpAddresses>,
}

impl TaskOutput {
    pub fn created(id: InstanceId, ssh_auth: SshAuth) -> Self {
        Self {
            provider_id: Some(id.0),
            ssh_auth: Some(ssh_auth),
            ip_addresses: None,
        }
    }

    pub fn confirmed(addr: IpAddr) -> Self {
        Self {
            ip_addresses: Some(IpAddresses::single(addr)),
            ..Self::default()
        }
    }
}

/// Output envelope. Either the success fields or `stderr` are set, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<TaskOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stderr: Option<String>,
}

impl TaskResult {
    pub fn success(output: TaskOutput) -> Self {
        Self {
            status: TaskStatus::Success,
            result: Some(output),
            stderr: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            "unknown failure".to_string()
        } else {
            message
        };
        Self {
            status: TaskStatus::Failure,
            result: None,
            stderr: Some(message),
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }

    pub fn output(&self) -> Option<&TaskOutput> {
        self.result.as_ref()
    }

    pub fn stderr(&self) -> Option<&str> {
        self.stderr.as_deref()
    }
}
