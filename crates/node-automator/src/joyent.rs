use std::sync::Arc;

use async_trait::async_trait;
use joyent_api::{CreateMachineRequest, JoyentClient, Machine};
use serde::Deserialize;
use tracing::info;

use crate::config::AutomatorConfig;
use crate::fields::required;
use crate::provider::{InstanceApi, ProviderBackend, ProviderFields};
use crate::types::{InstanceId, InstanceRequest, ServerInstance};
use crate::{Error, ProviderName, Result};

/// Joyent (Triton) CloudAPI backend.
pub struct JoyentBackend;

/// Fields bound from `providerFields`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JoyentFields {
    pub api_user: Option<String>,
    pub api_password: Option<String>,
    pub ssh_keypair: Option<String>,
    pub ssh_key_resource: Option<String>,
    pub joyent_api_url: Option<String>,
    pub joyent_version: Option<String>,
}

impl ProviderFields for JoyentFields {
    fn key_pair(&self) -> Option<&str> {
        self.ssh_keypair.as_deref()
    }

    fn ssh_key_resource(&self) -> Option<&str> {
        self.ssh_key_resource.as_deref()
    }
}

impl ProviderBackend for JoyentBackend {
    type Fields = JoyentFields;

    fn name(&self) -> ProviderName {
        ProviderName::Joyent
    }

    /// Password auth when `api_password` is set, otherwise key auth with
    /// `ssh_keypair` and the key file resolved from the key directory.
    fn connect(&self, fields: &JoyentFields, config: &AutomatorConfig) -> Result<Arc<dyn InstanceApi>> {
        let user = required(&fields.api_user, "api_user")?;
        let url = required(&fields.joyent_api_url, "joyent_api_url")?;

        let mut client = match (
            present(&fields.api_password),
            present(&fields.ssh_keypair),
            present(&fields.ssh_key_resource),
        ) {
            (Some(password), _, _) => JoyentClient::new(url, user, password),
            (None, Some(key_name), Some(resource)) => {
                JoyentClient::with_key(url, user, key_name, config.identity_file(resource))
            }
            _ => {
                return Err(Error::Binding(
                    "missing provider field 'api_password' (or 'ssh_keypair' with 'ssh_key_resource')"
                        .into(),
                ));
            }
        };
        if let Some(version) = fields.joyent_version.as_deref().filter(|v| !v.is_empty()) {
            client = client.with_version(version);
        }
        Ok(Arc::new(JoyentConnection { client }))
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Authenticated CloudAPI handle.
pub struct JoyentConnection {
    client: JoyentClient,
}

impl JoyentConnection {
    fn to_instance(machine: Machine) -> ServerInstance {
        let addresses = machine.addresses();
        ServerInstance {
            id: InstanceId(machine.id),
            name: machine.name,
            state: machine.state,
            addresses,
        }
    }

    fn api_error(id: &InstanceId, e: joyent_api::Error) -> Error {
        if e.is_not_found() {
            Error::InstanceNotFound(id.0.clone())
        } else {
            Error::ProviderApi(e.to_string())
        }
    }
}

#[async_trait]
impl InstanceApi for JoyentConnection {
    async fn create_instance(&self, req: &InstanceRequest) -> Result<ServerInstance> {
        let machine = self
            .client
            .create_machine(&CreateMachineRequest {
                name: req.name.clone(),
                package: req.flavor.clone(),
                image: req.image.clone(),
                key_name: req.key_name.clone(),
            })
            .await
            .map_err(|e| Error::ProviderApi(e.to_string()))?;

        info!(machine_id = %machine.id, state = %machine.state, "joyent: machine created");
        Ok(Self::to_instance(machine))
    }

    async fn get_instance(&self, id: &InstanceId) -> Result<ServerInstance> {
        let machine = self
            .client
            .get_machine(&id.0)
            .await
            .map_err(|e| Self::api_error(id, e))?;
        Ok(Self::to_instance(machine))
    }

    async fn destroy_instance(&self, id: &InstanceId) -> Result<()> {
        self.client
            .delete_machine(&id.0)
            .await
            .map_err(|e| Self::api_error(id, e))?;
        info!(machine_id = %id, "joyent: machine destroyed");
        Ok(())
    }

    fn is_ready(&self, instance: &ServerInstance) -> bool {
        instance.state == "running"
    }

    fn is_error(&self, instance: &ServerInstance) -> bool {
        instance.state == "failed" || instance.state.eq_ignore_ascii_case("error")
    }
}
