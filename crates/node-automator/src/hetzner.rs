use std::sync::Arc;

use async_trait::async_trait;
use hcloud::apis::configuration::Configuration;
use hcloud::apis::servers_api;
use hcloud::models;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::AutomatorConfig;
use crate::fields::{lenient_i64, required};
use crate::provider::{InstanceApi, ProviderBackend, ProviderFields};
use crate::types::{InstanceId, InstanceRequest, ServerInstance};
use crate::{Error, ProviderName, Result};

const DEFAULT_LOCATION: &str = "fsn1";

/// Hetzner Cloud backend using the `hcloud` crate.
pub struct HetznerBackend;

/// Fields bound from `providerFields`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HetznerFields {
    pub api_token: Option<String>,
    pub location: Option<String>,
    pub ssh_keypair: Option<String>,
    pub ssh_key_resource: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub network_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub firewall_id: Option<i64>,
}

impl ProviderFields for HetznerFields {
    fn key_pair(&self) -> Option<&str> {
        self.ssh_keypair.as_deref()
    }

    fn ssh_key_resource(&self) -> Option<&str> {
        self.ssh_key_resource.as_deref()
    }
}

impl ProviderBackend for HetznerBackend {
    type Fields = HetznerFields;

    fn name(&self) -> ProviderName {
        ProviderName::Hetzner
    }

    fn connect(&self, fields: &HetznerFields, _config: &AutomatorConfig) -> Result<Arc<dyn InstanceApi>> {
        let token = required(&fields.api_token, "api_token")?;

        let mut config = Configuration::new();
        config.bearer_access_token = Some(token.to_string());

        Ok(Arc::new(HetznerConnection {
            config,
            location: fields
                .location
                .clone()
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| DEFAULT_LOCATION.into()),
            network_id: fields.network_id,
            firewall_id: fields.firewall_id,
        }))
    }
}

pub struct HetznerConnection {
    config: Configuration,
    location: String,
    network_id: Option<i64>,
    firewall_id: Option<i64>,
}

impl HetznerConnection {
    fn state_name(status: &models::server::Status) -> &'static str {
        match status {
            models::server::Status::Running => "running",
            models::server::Status::Initializing => "initializing",
            models::server::Status::Starting => "starting",
            models::server::Status::Stopping => "stopping",
            models::server::Status::Off => "off",
            models::server::Status::Deleting => "deleting",
            _ => "unknown",
        }
    }

    /// Public IPv4 first, then private network addresses.
    fn addresses(server: &models::Server) -> Vec<String> {
        let mut out = Vec::new();
        // Read through the wire form; the generated model nests nullable
        // fields differently across hcloud releases.
        if let Ok(public) = serde_json::to_value(&server.public_net)
            && let Some(ip) = public["ipv4"]["ip"].as_str()
        {
            out.push(ip.to_string());
        }
        out.extend(server.private_net.iter().filter_map(|net| net.ip.clone()));
        out
    }

    fn to_instance(server: &models::Server) -> ServerInstance {
        ServerInstance {
            id: InstanceId(server.id.to_string()),
            name: server.name.clone(),
            state: Self::state_name(&server.status).to_string(),
            addresses: Self::addresses(server),
        }
    }

    fn create_request(&self, req: &InstanceRequest) -> models::CreateServerRequest {
        let firewalls = self.firewall_id.map(|fw_id| {
            vec![models::CreateServerRequestFirewalls {
                firewall: fw_id,
            }]
        });

        models::CreateServerRequest {
            name: req.name.clone(),
            server_type: req.flavor.clone(),
            image: req.image.clone(),
            location: Some(self.location.clone()),
            user_data: None,
            networks: self.network_id.map(|id| vec![id]),
            firewalls,
            ssh_keys: req.key_name.clone().map(|k| vec![k]),
            volumes: None,
            start_after_create: Some(true),
            automount: None,
            datacenter: None,
            labels: None,
            placement_group: None,
            public_net: None,
        }
    }

    fn parse_id(id: &InstanceId) -> Result<i64> {
        id.0.parse::<i64>()
            .map_err(|_| Error::Binding(format!("invalid hetzner server id '{}'", id.0)))
    }

    fn api_error<E: std::fmt::Display>(id: &InstanceId, action: &str, e: E) -> Error {
        let msg = format!("{e}");
        if msg.contains("404") {
            Error::InstanceNotFound(id.0.clone())
        } else {
            Error::ProviderApi(format!("{action}: {msg}"))
        }
    }
}

#[async_trait]
impl InstanceApi for HetznerConnection {
    async fn create_instance(&self, req: &InstanceRequest) -> Result<ServerInstance> {
        let resp = servers_api::create_server(
            &self.config,
            servers_api::CreateServerParams {
                create_server_request: self.create_request(req),
            },
        )
        .await
        .map_err(|e| Error::ProviderApi(format!("create server: {e}")))?;

        let server = resp.server;
        info!(server_id = server.id, "hetzner: server created");
        Ok(Self::to_instance(&server))
    }

    async fn get_instance(&self, id: &InstanceId) -> Result<ServerInstance> {
        let server_id = Self::parse_id(id)?;

        let resp = servers_api::get_server(
            &self.config,
            servers_api::GetServerParams { id: server_id },
        )
        .await
        .map_err(|e| Self::api_error(id, "get server", e))?;

        let server = resp
            .server
            .ok_or_else(|| Error::InstanceNotFound(id.0.clone()))?;
        Ok(Self::to_instance(&server))
    }

    async fn destroy_instance(&self, id: &InstanceId) -> Result<()> {
        let server_id = Self::parse_id(id)?;

        if let Err(e) = servers_api::delete_server(
            &self.config,
            servers_api::DeleteServerParams { id: server_id },
        )
        .await
        {
            let err = Self::api_error(id, "delete server", e);
            if matches!(err, Error::InstanceNotFound(_)) {
                warn!(server_id = %id, "hetzner: server already destroyed");
            }
            return Err(err);
        }

        info!(server_id = %id, "hetzner: server destroyed");
        Ok(())
    }

    fn is_ready(&self, instance: &ServerInstance) -> bool {
        instance.state == "running"
    }
}
