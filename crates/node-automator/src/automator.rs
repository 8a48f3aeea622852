//! Lifecycle executor: create, confirm and delete for one provider backend.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::bootstrap::{self, BootstrapPlan};
use crate::config::AutomatorConfig;
use crate::fields::{bind, validate_hostname, validate_username};
use crate::net;
use crate::provider::{InstanceApi, ProviderBackend, ProviderFields};
use crate::result;
use crate::ssh::{SshConnector, SshCredentials};
use crate::types::{
    InstanceId, InstanceRequest, Operation, ServerInstance, SshAuth, Task, TaskOutput, TaskResult,
};
use crate::{Error, ProviderName, Result};

const DEFAULT_SSH_USER: &str = "root";

/// Provider-agnostic entry point used by the worker.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    fn provider(&self) -> ProviderName;

    /// Run whichever operation the task names. Never fails: every outcome is
    /// folded into the returned result.
    async fn run(&self, task: &Task) -> TaskResult;
}

/// Drives nodes of one provider backend.
///
/// Holds at most one provider connection, reused while the bound fields
/// stay the same. Not meant to serve two nodes concurrently; run one
/// automator per in-flight node.
pub struct Automator<B: ProviderBackend> {
    backend: B,
    config: Arc<AutomatorConfig>,
    ssh: Arc<dyn SshConnector>,
    connection: Mutex<Option<(B::Fields, Arc<dyn InstanceApi>)>>,
}

impl<B: ProviderBackend> Automator<B> {
    pub fn new(backend: B, config: Arc<AutomatorConfig>, ssh: Arc<dyn SshConnector>) -> Self {
        Self {
            backend,
            config,
            ssh,
            connection: Mutex::new(None),
        }
    }

    pub async fn create(&self, task: &Task) -> TaskResult {
        result::guarded(self.backend.name(), Operation::Create, self.try_create(task)).await
    }

    pub async fn confirm(&self, task: &Task) -> TaskResult {
        result::guarded(self.backend.name(), Operation::Confirm, self.try_confirm(task)).await
    }

    pub async fn delete(&self, task: &Task) -> TaskResult {
        result::guarded(self.backend.name(), Operation::Delete, self.try_delete(task)).await
    }

    /// Cached connection for these fields, built on first use.
    fn provider_connection(&self, fields: &B::Fields) -> Result<Arc<dyn InstanceApi>> {
        let mut cached = self.connection.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((bound, api)) = cached.as_ref()
            && bound == fields
        {
            return Ok(Arc::clone(api));
        }

        debug!(provider = %self.backend.name(), "opening provider connection");
        let api = self.backend.connect(fields, &self.config)?;
        *cached = Some((fields.clone(), Arc::clone(&api)));
        Ok(api)
    }

    async fn try_create(&self, task: &Task) -> Result<TaskOutput> {
        let flavor = Task::require(&task.flavor, "flavor")?;
        let image = Task::require(&task.image, "image")?;
        let hostname = Task::require(&task.hostname, "hostname")?;
        validate_hostname(hostname)?;
        let user = task
            .ssh_user
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(DEFAULT_SSH_USER);
        validate_username(user)?;

        let fields: B::Fields = bind(&task.provider_fields)?;
        let api = self.provider_connection(&fields)?;

        debug!(hostname, flavor, image, "creating server");
        let server = api
            .create_instance(&InstanceRequest {
                name: hostname.to_string(),
                flavor: flavor.to_string(),
                image: image.to_string(),
                key_name: fields.key_pair().map(str::to_string),
            })
            .await?;

        if server.id.0.trim().is_empty() {
            return Err(Error::ProviderApi(
                "provider returned an empty instance id".into(),
            ));
        }
        info!(provider_id = %server.id, hostname, "server created");

        let ssh_auth = SshAuth {
            user: user.to_string(),
            identityfile: fields
                .ssh_key_resource()
                .map(|resource| self.config.identity_file(resource)),
        };

        Ok(TaskOutput::created(server.id, ssh_auth))
    }

    async fn try_confirm(&self, task: &Task) -> Result<TaskOutput> {
        let provider_id = Task::require(&task.provider_id, "providerId")?;
        let hostname = Task::require(&task.hostname, "hostname")?;
        validate_hostname(hostname)?;
        let auth = task
            .ssh_auth
            .as_ref()
            .ok_or_else(|| Error::Binding("missing required key 'sshAuth'".into()))?;
        validate_username(&auth.user)?;

        let fields: B::Fields = bind(&task.provider_fields)?;
        let identity_file = match (&auth.identityfile, fields.ssh_key_resource()) {
            (Some(path), _) => path.clone(),
            (None, Some(resource)) => self.config.identity_file(resource),
            (None, None) => {
                return Err(Error::Binding(
                    "no SSH identity: set sshAuth.identityfile or the ssh_key_resource field"
                        .into(),
                ));
            }
        };
        let api = self.provider_connection(&fields)?;

        let id = InstanceId(provider_id.to_string());
        debug!(provider_id, "confirming server");
        let server = api.get_instance(&id).await?;

        debug!(provider_id, "waiting for server to come up");
        let server = wait_until_ready(
            api.as_ref(),
            server,
            self.config.ready_timeout,
            self.config.poll_interval,
        )
        .await?;

        let reported = api.list_addresses(&server).await?;
        let addr = net::select_bootstrap_address(&net::parse_addresses(&reported))
            .ok_or(Error::NoUsableAddress)?;
        debug!(provider_id, %addr, "bootstrap address selected");

        let credentials = SshCredentials {
            user: auth.user.clone(),
            identity_file,
        };
        let mut session = self
            .ssh
            .connect(addr, &credentials)
            .await
            .map_err(|e| e.for_instance(provider_id))?;

        let plan = BootstrapPlan::new(&self.config, hostname, &auth.user);
        let outcome = bootstrap::run(session.as_mut(), &plan).await;
        session.close().await;
        outcome.map_err(|e| e.for_instance(provider_id))?;

        info!(provider_id, %addr, "server confirmed");
        Ok(TaskOutput::confirmed(addr))
    }

    async fn try_delete(&self, task: &Task) -> Result<TaskOutput> {
        let provider_id = Task::require(&task.provider_id, "providerId")?;
        let fields: B::Fields = bind(&task.provider_fields)?;
        let api = self.provider_connection(&fields)?;
        let id = InstanceId(provider_id.to_string());

        debug!(provider_id, "deleting server");
        let destroyed = match api.get_instance(&id).await {
            Ok(_) => api.destroy_instance(&id).await,
            Err(e) => Err(e),
        };

        match destroyed {
            Ok(()) => {
                debug!(
                    provider_id,
                    settle_secs = self.config.delete_settle.as_secs(),
                    "waiting for delete to settle"
                );
                sleep(self.config.delete_settle).await;
                info!(provider_id, "server deleted");
            }
            Err(Error::InstanceNotFound(_)) => {
                warn!(provider_id, "could not locate server, skipping delete");
            }
            Err(e) => return Err(e),
        }
        Ok(TaskOutput::default())
    }
}

#[async_trait]
impl<B: ProviderBackend> Lifecycle for Automator<B> {
    fn provider(&self) -> ProviderName {
        self.backend.name()
    }

    async fn run(&self, task: &Task) -> TaskResult {
        match task.operation {
            Operation::Create => self.create(task).await,
            Operation::Confirm => self.confirm(task).await,
            Operation::Delete => self.delete(task).await,
        }
    }
}

/// Poll until the instance is ready, sleeping `interval` between polls.
///
/// An instance in an error state fails immediately. The timeout is only
/// reported once `timeout` has fully elapsed.
pub async fn wait_until_ready(
    api: &dyn InstanceApi,
    mut server: ServerInstance,
    timeout: Duration,
    interval: Duration,
) -> Result<ServerInstance> {
    let started = Instant::now();
    let deadline = started.checked_add(timeout).ok_or_else(|| {
        Error::InvalidConfig(format!("ready timeout of {}s is out of range", timeout.as_secs()))
    })?;
    loop {
        if api.is_error(&server) {
            return Err(Error::InstanceFailed(format!("{} ({})", server.name, server.id)));
        }
        if api.is_ready(&server) {
            return Ok(server);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::Timeout {
                id: server.id.0,
                waited_secs: now.duration_since(started).as_secs(),
            });
        }
        debug!(provider_id = %server.id, state = %server.state, "server not ready yet");
        sleep(interval.min(deadline - now)).await;
        server = api.get_instance(&server.id).await?;
    }
}
