//! Remote command execution on cluster nodes.
//!
//! The transport (SSH, jumpbox hops) lives outside this crate. This module
//! only describes how to reach a host and the capability the healing worker
//! and node restarts need from a transport.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Operating system of a remote host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OsType {
    #[default]
    Linux,
    Windows,
}

/// Credentials used to authenticate against a remote host.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key_path", &self.private_key_path)
            .finish()
    }
}

impl AuthConfig {
    /// Key-based authentication.
    pub fn with_private_key(user: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            user: user.into(),
            password: None,
            private_key_path: Some(path.into()),
        }
    }
}

/// Bastion host that connections to cluster nodes are tunneled through.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JumpBox {
    pub uri: String,
    pub port: u16,
    pub operating_system: OsType,
    pub auth: AuthConfig,
}

/// A cluster node reachable for remote command execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteHost {
    /// Host name; for cluster nodes this is the node name.
    pub uri: String,
    pub port: u16,
    pub operating_system: OsType,
    pub auth: AuthConfig,
    #[serde(default)]
    pub jumpbox: Option<JumpBox>,
}

impl RemoteHost {
    /// Linux host on the default SSH port.
    pub fn new(uri: impl Into<String>, auth: AuthConfig) -> Self {
        Self {
            uri: uri.into(),
            port: DEFAULT_SSH_PORT,
            operating_system: OsType::Linux,
            auth,
            jumpbox: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_operating_system(mut self, os: OsType) -> Self {
        self.operating_system = os;
        self
    }

    pub fn with_jumpbox(mut self, jumpbox: JumpBox) -> Self {
        self.jumpbox = Some(jumpbox);
        self
    }

    /// `uri:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.uri, self.port)
    }
}

/// Runs shell scripts on remote hosts.
pub trait RemoteExecutor: Send + Sync {
    /// Run `script` on `host` and return its combined output.
    ///
    /// A non-zero exit is reported as [`crate::Error::Remote`] carrying the output.
    fn execute(&self, host: &RemoteHost, script: &str) -> impl Future<Output = Result<String>> + Send;
}
