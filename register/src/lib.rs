/*
Copyright 2024 The Kubernetes Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use approval::{approve_and_accept, ApprovalOutcome, CsrState};
pub use kubeconfig::{
    build_spoke_bootstrap_config, HubConnectionInfo, Kubeconfig, SpokeBootstrapConfig,
};
pub use manifests::ManifestBundle;
pub use readiness::wait_until_spoke_visible;
pub use store::{KubeStore, ManifestApplier, ObjectStore, StoreObject};
pub use token::{issue_token, BootstrapIdentity};

pub mod approval;
pub mod config;
pub mod consts;
pub mod crd;
pub mod driver;
pub mod kubeconfig;
pub mod manifests;
pub mod poll;
pub mod readiness;
pub mod spoke;
pub mod store;
pub mod token;

#[cfg(test)]
mod testing;

use poll::PollSettings;

/// Everything a hub-side handshake step needs.
pub struct Context<S> {
    /// Hub object store, also used to apply the bootstrap manifests
    pub store: S,
    /// Manifests injected at startup, looked up by logical name
    pub manifests: Arc<ManifestBundle>,
    pub identity: BootstrapIdentity,
    pub timing: Timing,
    /// Cancels every poll loop started from this context
    pub cancel: CancellationToken,
}

impl<S> Context<S> {
    pub fn new(store: S, manifests: Arc<ManifestBundle>) -> Self {
        Self {
            store,
            manifests,
            identity: BootstrapIdentity::default(),
            timing: Timing::default(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Poll bounds for the two waits of the handshake.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Timing {
    /// Waiting for the bootstrap token secret to be populated
    pub token: PollSettings,
    /// Waiting for the spoke agent to show up on the hub
    pub registration: PollSettings,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            token: PollSettings::new(Duration::from_secs(2), Duration::from_secs(20)),
            registration: PollSettings::new(Duration::from_secs(30), Duration::from_secs(600)),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("kube error: {0}")]
    KubeError(#[source] kube::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    #[error("invalid hub connection info: `{0}`")]
    InvalidHubConfig(String),
    #[error("invalid manifest `{0}`: {1}")]
    InvalidManifest(String, String),
    #[error("manifest `{0}` is not part of the bundle")]
    MissingManifest(String),
    #[error("timed out after {timeout:?} waiting for {what}{}", last_error_suffix(.last_error))]
    DeadlineExceeded {
        what: String,
        timeout: Duration,
        last_error: Option<String>,
    },
    #[error("cancelled while waiting for {0}")]
    Cancelled(String),
    #[error("invalid configuration: `{0}`")]
    InvalidConfigError(String),
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("yaml error: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(error) => format!(" (last error: {error})"),
        None => String::new(),
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespacedName {
    pub name: String,
    pub namespace: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl Display for NamespacedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.namespace.as_str())?;
        f.write_str("/")?;
        f.write_str(self.name.as_str())
    }
}
