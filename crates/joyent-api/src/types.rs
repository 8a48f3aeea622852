use serde::{Deserialize, Serialize};

// ── Machine types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CreateMachineRequest {
    pub name: String,
    pub package: String,
    pub image: String,
    /// CloudAPI installs every account key on new machines; the key pair
    /// is recorded as a machine tag.
    #[serde(rename = "tag.ssh_keypair", skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Machine {
    pub id: String,
    pub name: String,
    pub state: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(default, rename = "primaryIp")]
    pub primary_ip: Option<String>,
}

impl Machine {
    /// All addresses reported for the machine, `ips` first, then `primaryIp`
    /// when it is not already listed.
    pub fn addresses(&self) -> Vec<String> {
        let mut out = self.ips.clone();
        if let Some(primary) = &self.primary_ip
            && !out.contains(primary)
        {
            out.push(primary.clone());
        }
        out
    }
}

/// Error body returned by CloudAPI alongside a non-2xx status.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub code: String,
    #[serde(default)]
    pub message: Option<String>,
}
