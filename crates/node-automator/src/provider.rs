use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::config::AutomatorConfig;
use crate::types::{InstanceId, InstanceRequest, ServerInstance};
use crate::{ProviderName, Result};

/// Capability set every provider connection offers.
///
/// One connection belongs to one automator and is never driven by two
/// lifecycle calls at once.
#[async_trait]
pub trait InstanceApi: Send + Sync + 'static {
    /// Request a new instance.
    async fn create_instance(&self, req: &InstanceRequest) -> Result<ServerInstance>;

    /// Look up an instance. A missing instance is `Error::InstanceNotFound`.
    async fn get_instance(&self, id: &InstanceId) -> Result<ServerInstance>;

    /// Destroy an instance. A missing instance is `Error::InstanceNotFound`.
    async fn destroy_instance(&self, id: &InstanceId) -> Result<()>;

    /// Addresses reported for the instance, unparsed.
    async fn list_addresses(&self, instance: &ServerInstance) -> Result<Vec<String>> {
        Ok(instance.addresses.clone())
    }

    /// Instance has finished booting and is usable.
    fn is_ready(&self, instance: &ServerInstance) -> bool;

    /// Instance is in a terminal error state.
    fn is_error(&self, instance: &ServerInstance) -> bool {
        instance.state.eq_ignore_ascii_case("error")
    }
}

/// Typed view of a backend's `providerFields`.
pub trait ProviderFields: DeserializeOwned + Clone + PartialEq + Send + Sync + 'static {
    /// Key pair registered with the provider, if any.
    fn key_pair(&self) -> Option<&str>;

    /// File name of the SSH key inside the key directory, if any.
    fn ssh_key_resource(&self) -> Option<&str>;
}

/// One cloud backend: how to bind its fields and open a connection.
pub trait ProviderBackend: Send + Sync + 'static {
    type Fields: ProviderFields;

    fn name(&self) -> ProviderName;

    /// Build an authenticated connection. Called at most once per distinct
    /// set of bound fields by the owning automator.
    fn connect(
        &self,
        fields: &Self::Fields,
        config: &AutomatorConfig,
    ) -> Result<Arc<dyn InstanceApi>>;
}
