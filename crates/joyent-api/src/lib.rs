//! Typed Rust client for the Joyent (Triton) CloudAPI.
//!
//! Covers the subset needed for driving a single node:
//! machines (create, get, delete).
//!
//! Requests authenticate either with HTTP Basic (account password) or with
//! an HTTP Signature over the `Date` header, made with the account's RSA
//! key (PEM) through the system `openssl`.

mod types;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub use types::*;

pub const DEFAULT_API_VERSION: &str = "~7.0";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("joyent api request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("joyent api {endpoint} returned {status}: {body}")]
    Api {
        endpoint: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("joyent request signing failed: {0}")]
    Signing(String),
}

impl Error {
    /// True when CloudAPI reported the resource as missing: 404, 410 (a
    /// destroyed machine) or a `ResourceNotFound` error code.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Api { status, body, .. } => {
                *status == reqwest::StatusCode::NOT_FOUND
                    || *status == reqwest::StatusCode::GONE
                    || serde_json::from_str::<ApiErrorBody>(body)
                        .map(|b| b.code == "ResourceNotFound")
                        .unwrap_or(false)
            }
            Error::Request(_) | Error::Signing(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone)]
enum Auth {
    Password(String),
    Key { key_id: String, key_file: PathBuf },
}

/// Client for the CloudAPI machines surface of one account.
#[derive(Clone)]
pub struct JoyentClient {
    base_url: String,
    user: String,
    auth: Auth,
    version: String,
    http: reqwest::Client,
}

impl JoyentClient {
    /// Password (HTTP Basic) authentication.
    pub fn new(
        base_url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::with_auth(base_url.into(), user.into(), Auth::Password(password.into()))
    }

    /// Key authentication: `key_name` is the account key registered with
    /// CloudAPI and `key_file` its private half.
    pub fn with_key(
        base_url: impl Into<String>,
        user: impl Into<String>,
        key_name: &str,
        key_file: impl Into<PathBuf>,
    ) -> Self {
        let user: String = user.into();
        let auth = Auth::Key {
            key_id: format!("/{user}/keys/{key_name}"),
            key_file: key_file.into(),
        };
        Self::with_auth(base_url.into(), user, auth)
    }

    fn with_auth(base_url: String, user: String, auth: Auth) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            user,
            auth,
            version: DEFAULT_API_VERSION.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Override the `Api-Version` header sent with every request.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/my{path}", self.base_url)
    }

    async fn request(&self, method: reqwest::Method, path: &str) -> Result<reqwest::RequestBuilder> {
        let builder = self
            .http
            .request(method, self.url(path))
            .header("Api-Version", &self.version)
            .header("Accept", "application/json");

        match &self.auth {
            Auth::Password(password) => Ok(builder.basic_auth(&self.user, Some(password))),
            Auth::Key { key_id, key_file } => {
                let date = http_date(Utc::now());
                let signature = sign_rsa_sha256(key_file, &date).await?;
                Ok(builder
                    .header("Date", &date)
                    .header("Authorization", signature_header(key_id, &signature)))
            }
        }
    }

    async fn check(resp: reqwest::Response, endpoint: &'static str) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api { endpoint, status, body });
        }
        Ok(resp)
    }

    // ── Machines ─────────────────────────────────────────────────────

    pub async fn create_machine(&self, req: &CreateMachineRequest) -> Result<Machine> {
        let resp = self
            .request(reqwest::Method::POST, "/machines")
            .await?
            .json(req)
            .send()
            .await?;

        Self::check(resp, "create machine")
            .await?
            .json()
            .await
            .map_err(Error::from)
    }

    pub async fn get_machine(&self, machine_id: &str) -> Result<Machine> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/machines/{machine_id}"))
            .await?
            .send()
            .await?;

        Self::check(resp, "get machine")
            .await?
            .json()
            .await
            .map_err(Error::from)
    }

    pub async fn delete_machine(&self, machine_id: &str) -> Result<()> {
        let resp = self
            .request(reqwest::Method::DELETE, &format!("/machines/{machine_id}"))
            .await?
            .send()
            .await?;

        Self::check(resp, "delete machine").await?;
        Ok(())
    }
}

fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn signature_header(key_id: &str, signature: &[u8]) -> String {
    format!(
        "Signature keyId=\"{key_id}\",algorithm=\"rsa-sha256\",headers=\"date\",signature=\"{}\"",
        STANDARD.encode(signature)
    )
}

/// PKCS#1 v1.5 SHA-256 signature of `data` with the PEM key at `key_file`.
async fn sign_rsa_sha256(key_file: &Path, data: &str) -> Result<Vec<u8>> {
    let mut child = Command::new("openssl")
        .args(["dgst", "-sha256", "-sign"])
        .arg(key_file)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Signing(format!("failed to run openssl: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(data.as_bytes())
            .await
            .map_err(|e| Error::Signing(format!("failed to write to openssl: {e}")))?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| Error::Signing(format!("openssl did not finish: {e}")))?;
    if !output.status.success() || output.stdout.is_empty() {
        return Err(Error::Signing(format!(
            "openssl could not sign with {}: {}",
            key_file.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output.stdout)
}
