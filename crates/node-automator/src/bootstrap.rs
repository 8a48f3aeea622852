//! Remote bootstrap run over one SSH session during confirm.
//!
//! Steps run in order and stop at the first failure:
//!
//! 1. connectivity / DNS check (`ping` a known external host)
//! 2. set the hostname
//! 3. best-effort secondary disk preparation
//!
//! Step 3 only acts when its probes say the device exists and is not yet
//! mounted at the data path. A failing probe skips the step; a failing
//! format or mount action aborts the bootstrap.

use tracing::{debug, info};

use crate::config::AutomatorConfig;
use crate::ssh::{CommandOutput, SshSession};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapPlan {
    pub hostname: String,
    /// Prefix privileged commands with `sudo`.
    pub sudo: bool,
    pub connectivity_host: String,
    pub data_device: String,
    pub data_mount: String,
}

impl BootstrapPlan {
    pub fn new(config: &AutomatorConfig, hostname: &str, ssh_user: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            sudo: ssh_user != "root",
            connectivity_host: config.connectivity_host.clone(),
            data_device: config.data_device.clone(),
            data_mount: config.data_mount.clone(),
        }
    }

    fn sudo(&self) -> &'static str {
        if self.sudo { "sudo " } else { "" }
    }

    fn device_name(&self) -> &str {
        self.data_device.rsplit('/').next().unwrap_or(&self.data_device)
    }

    pub fn connectivity_command(&self) -> String {
        format!("ping -c1 {}", self.connectivity_host)
    }

    pub fn hostname_command(&self) -> String {
        format!("{}hostname {}", self.sudo(), self.hostname)
    }

    /// Both probes must succeed for the disk to be prepared.
    pub fn probe_commands(&self) -> [String; 2] {
        [
            format!("test -e {} && echo yes", self.data_device),
            format!(
                "if grep \"{}.* {} \" /proc/mounts ; then /bin/false ; fi",
                self.device_name(),
                self.data_mount
            ),
        ]
    }

    pub fn mount_command(&self) -> String {
        let sudo = self.sudo();
        let dev = &self.data_device;
        let mnt = &self.data_mount;
        format!(
            "(! mount | grep -q \"^{dev} \" || {sudo}umount {dev}) && {sudo}/sbin/mkfs.ext4 {dev} && {sudo}mkdir -p {mnt} && {sudo}mount -o _netdev {dev} {mnt}"
        )
    }

    pub fn fstab_command(&self) -> String {
        let sudo = self.sudo();
        let dev = &self.data_device;
        let mnt = &self.data_mount;
        format!(
            "{sudo}sed -i -e 's:/mnt:{mnt}:' /etc/fstab && (grep -q \"^{dev} \" /etc/fstab || echo \"{dev} {mnt} ext4 defaults,_netdev 0 2\" | {sudo}tee -a /etc/fstab >/dev/null)"
        )
    }
}

/// Run the bootstrap sequence on an open session.
pub async fn run(session: &mut dyn SshSession, plan: &BootstrapPlan) -> Result<()> {
    exec_checked(
        session,
        &plan.connectivity_command(),
        "Validating external connectivity and DNS resolution via ping",
    )
    .await?;
    exec_checked(session, &plan.hostname_command(), "Setting hostname").await?;

    if data_device_unprepared(session, plan).await {
        info!(device = %plan.data_device, mount = %plan.data_mount, "preparing data disk");
        exec_checked(
            session,
            &plan.mount_command(),
            &format!("Mounting {} as {}", plan.data_device, plan.data_mount),
        )
        .await?;
        exec_checked(
            session,
            &plan.fstab_command(),
            &format!("Updating /etc/fstab for {}", plan.data_mount),
        )
        .await?;
    } else {
        debug!(device = %plan.data_device, "skipping data disk preparation");
    }
    Ok(())
}

/// Execute a command and return its output, failing on non-zero exit.
async fn exec_checked(
    session: &mut dyn SshSession,
    command: &str,
    description: &str,
) -> Result<CommandOutput> {
    debug!(command, "{description}");
    let output = session.exec(command).await?;
    if !output.success() {
        return Err(Error::Command {
            description: description.to_string(),
            command: command.to_string(),
            exit_status: output.exit_status,
            output: output.combined(),
        });
    }
    Ok(output)
}

/// Any probe failure, including a transport error, reads as "leave the disk alone".
async fn data_device_unprepared(session: &mut dyn SshSession, plan: &BootstrapPlan) -> bool {
    for command in plan.probe_commands() {
        match exec_checked(session, &command, "Probing data disk").await {
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "data disk probe failed");
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Replays scripted exit codes keyed by command prefix; records commands.
    struct ScriptedSession {
        executed: Vec<String>,
        failures: Vec<(&'static str, i32)>,
    }

    impl ScriptedSession {
        fn new(failures: Vec<(&'static str, i32)>) -> Self {
            Self {
                executed: Vec::new(),
                failures,
            }
        }
    }

    #[async_trait]
    impl SshSession for ScriptedSession {
        async fn exec(&mut self, command: &str) -> Result<CommandOutput> {
            self.executed.push(command.to_string());
            let exit_status = self
                .failures
                .iter()
                .find(|(prefix, _)| command.starts_with(prefix))
                .map(|(_, code)| *code)
                .unwrap_or(0);
            Ok(CommandOutput {
                exit_status,
                stdout: String::new(),
                stderr: if exit_status == 0 {
                    String::new()
                } else {
                    format!("{command}: failed")
                },
            })
        }

        async fn close(self: Box<Self>) {}
    }

    fn plan(user: &str) -> BootstrapPlan {
        BootstrapPlan::new(&AutomatorConfig::default(), "node1", user)
    }

    #[test]
    fn sudo_only_for_non_root() {
        assert_eq!(plan("root").hostname_command(), "hostname node1");
        assert_eq!(plan("ubuntu").hostname_command(), "sudo hostname node1");
        assert!(plan("ubuntu").mount_command().contains("sudo /sbin/mkfs.ext4 /dev/vdb"));
        assert!(!plan("root").mount_command().contains("sudo"));
    }

    #[test]
    fn probes_target_configured_device() {
        let [exists, mounted] = plan("root").probe_commands();
        assert_eq!(exists, "test -e /dev/vdb && echo yes");
        assert!(mounted.contains("grep \"vdb.* /data \" /proc/mounts"));
    }

    #[tokio::test]
    async fn full_sequence_prepares_disk() {
        let mut session = ScriptedSession::new(vec![]);
        run(&mut session, &plan("root")).await.unwrap();

        assert_eq!(session.executed.len(), 6);
        assert!(session.executed[0].starts_with("ping -c1"));
        assert_eq!(session.executed[1], "hostname node1");
        assert!(session.executed[4].contains("mkfs.ext4"));
        assert!(session.executed[5].contains("/etc/fstab"));
    }

    #[tokio::test]
    async fn hostname_failure_aborts_before_disk_step() {
        let mut session = ScriptedSession::new(vec![("sudo hostname", 1)]);
        let err = run(&mut session, &plan("ubuntu")).await.unwrap_err();

        match err {
            Error::Command { command, exit_status, output, .. } => {
                assert_eq!(command, "sudo hostname node1");
                assert_eq!(exit_status, 1);
                assert!(output.contains("failed"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(session.executed.len(), 2);
    }

    #[tokio::test]
    async fn connectivity_failure_aborts_first() {
        let mut session = ScriptedSession::new(vec![("ping", 2)]);
        let err = run(&mut session, &plan("root")).await.unwrap_err();
        assert!(matches!(err, Error::Command { exit_status: 2, .. }));
        assert_eq!(session.executed.len(), 1);
    }

    #[tokio::test]
    async fn absent_device_is_skipped() {
        let mut session = ScriptedSession::new(vec![("test -e", 1)]);
        run(&mut session, &plan("root")).await.unwrap();
        assert_eq!(session.executed.len(), 3);
    }

    #[tokio::test]
    async fn already_mounted_device_is_skipped() {
        let mut session = ScriptedSession::new(vec![("if grep", 1)]);
        run(&mut session, &plan("root")).await.unwrap();
        assert_eq!(session.executed.len(), 4);
    }

    #[tokio::test]
    async fn mount_failure_after_detection_aborts() {
        let mut session = ScriptedSession::new(vec![("(! mount", 32)]);
        let err = run(&mut session, &plan("root")).await.unwrap_err();
        assert!(matches!(err, Error::Command { exit_status: 32, .. }));
        assert_eq!(session.executed.len(), 5);
    }
}
