//! SSH boundary.
//!
//! [`OpenSshConnector`] wraps the system `ssh` client. A session owns one
//! ControlMaster socket so every command after the first reuses the same
//! authenticated connection.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, warn};

use crate::config::AutomatorConfig;
use crate::fields::validate_username;
use crate::{Error, Result};

/// ssh reserves this exit status for its own failures.
const SSH_FAILURE_EXIT: i32 = 255;

const SSHD_PROBE_INTERVAL: Duration = Duration::from_secs(2);
const SSHD_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshCredentials {
    pub user: String,
    pub identity_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// stderr followed by stdout, trimmed.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stderr, self.stdout).trim().to_string()
    }
}

#[async_trait]
pub trait SshConnector: Send + Sync + 'static {
    /// Open an authenticated session. Authentication failures are
    /// `Error::SshAuth`.
    async fn connect(&self, host: IpAddr, credentials: &SshCredentials)
    -> Result<Box<dyn SshSession>>;
}

#[async_trait]
pub trait SshSession: Send {
    /// Run one command. A non-zero exit is reported in the output, not as an
    /// error.
    async fn exec(&mut self, command: &str) -> Result<CommandOutput>;

    async fn close(self: Box<Self>);
}

/// Connector backed by the system `ssh` binary.
pub struct OpenSshConnector {
    program: String,
    port: u16,
    sshd_timeout: Duration,
}

impl OpenSshConnector {
    pub fn new(config: &AutomatorConfig) -> Self {
        Self {
            program: "ssh".into(),
            port: config.ssh_port,
            sshd_timeout: config.sshd_timeout,
        }
    }

    /// Wait until the SSH port accepts TCP connections.
    async fn wait_for_sshd(&self, host: IpAddr) -> Result<()> {
        let deadline = Instant::now()
            .checked_add(self.sshd_timeout)
            .ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "sshd timeout of {}s is out of range",
                    self.sshd_timeout.as_secs()
                ))
            })?;
        loop {
            match timeout(SSHD_PROBE_TIMEOUT, TcpStream::connect((host, self.port))).await {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(e)) => debug!(%host, port = self.port, error = %e, "sshd not up yet"),
                Err(_) => debug!(%host, port = self.port, "sshd probe timed out"),
            }
            if Instant::now() >= deadline {
                return Err(Error::Ssh {
                    target: host.to_string(),
                    detail: format!(
                        "port {} not reachable after {}s",
                        self.port,
                        self.sshd_timeout.as_secs()
                    ),
                });
            }
            sleep(SSHD_PROBE_INTERVAL).await;
        }
    }
}

#[async_trait]
impl SshConnector for OpenSshConnector {
    async fn connect(
        &self,
        host: IpAddr,
        credentials: &SshCredentials,
    ) -> Result<Box<dyn SshSession>> {
        validate_username(&credentials.user)?;
        self.wait_for_sshd(host).await?;
        debug!(%host, "sshd is up");

        let control_path =
            std::env::temp_dir().join(format!("automator-{}.sock", uuid::Uuid::new_v4().simple()));
        let session = OpenSshSession {
            program: self.program.clone(),
            target: format!("{}@{}", credentials.user, host),
            args: base_args(self.port, &credentials.identity_file, &control_path),
            control_path,
        };

        // First command establishes the master connection.
        let probe = session.run("true").await?;
        if probe.exit_status == SSH_FAILURE_EXIT {
            let detail = probe.combined();
            let target = session.target.clone();
            Box::new(session).close().await;
            return Err(if is_auth_failure(&detail) {
                Error::SshAuth { target, detail }
            } else {
                Error::Ssh { target, detail }
            });
        }

        Ok(Box::new(session))
    }
}

fn base_args(port: u16, identity_file: &Path, control_path: &Path) -> Vec<String> {
    vec![
        "-p".into(),
        port.to_string(),
        "-i".into(),
        identity_file.display().to_string(),
        "-o".into(),
        "BatchMode=yes".into(),
        "-o".into(),
        "IdentitiesOnly=yes".into(),
        "-o".into(),
        "StrictHostKeyChecking=no".into(),
        "-o".into(),
        "UserKnownHostsFile=/dev/null".into(),
        "-o".into(),
        "LogLevel=ERROR".into(),
        "-o".into(),
        "ConnectTimeout=30".into(),
        "-o".into(),
        "ControlMaster=auto".into(),
        "-o".into(),
        format!("ControlPath={}", control_path.display()),
        "-o".into(),
        "ControlPersist=300".into(),
    ]
}

fn is_auth_failure(detail: &str) -> bool {
    detail.contains("Permission denied")
        || detail.contains("Authentication failed")
        || detail.contains("Too many authentication failures")
}

struct OpenSshSession {
    program: String,
    target: String,
    args: Vec<String>,
    control_path: PathBuf,
}

impl OpenSshSession {
    /// `--` ends option parsing so the target is never read as a flag.
    fn exec_args(&self, command: &str) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend(["--".into(), self.target.clone(), command.into()]);
        args
    }

    fn exit_args(&self) -> Vec<String> {
        vec![
            "-O".into(),
            "exit".into(),
            "-o".into(),
            format!("ControlPath={}", self.control_path.display()),
            "--".into(),
            self.target.clone(),
        ]
    }

    async fn run(&self, command: &str) -> Result<CommandOutput> {
        let output = Command::new(&self.program)
            .args(self.exec_args(command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        Ok(CommandOutput {
            exit_status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[async_trait]
impl SshSession for OpenSshSession {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput> {
        debug!(remote = %self.target, command, "ssh exec");
        let output = self.run(command).await?;
        if output.exit_status == SSH_FAILURE_EXIT {
            return Err(Error::Ssh {
                target: self.target.clone(),
                detail: output.combined(),
            });
        }
        Ok(output)
    }

    async fn close(self: Box<Self>) {
        let result = Command::new(&self.program)
            .args(self.exit_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = result {
            warn!(remote = %self.target, error = %e, "failed to stop ssh control master");
        }
        let _ = tokio::fs::remove_file(&self.control_path).await;
    }
}
