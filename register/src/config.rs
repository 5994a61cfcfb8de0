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

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::{
    consts::*,
    manifests::ManifestBundle,
    poll::PollSettings,
    spoke::{AgentImages, SpokeConnection},
    Error, NamespacedName, Result, Timing,
};

/// Registers a spoke cluster with an Open Cluster Management hub.
#[derive(Debug, Parser, Clone)]
#[clap(name = "cluster-register", version)]
pub struct Args {
    /// Name the spoke is registered under on the hub
    #[clap(long, env = "CLUSTER_NAME")]
    pub cluster_name: String,

    /// Hub API server address reachable from the spoke. Defaults to the one
    /// published in kube-public/cluster-info.
    #[clap(long, env = "HUB_API_SERVER")]
    pub hub_api_server: Option<String>,

    /// Kubeconfig of the hub. Defaults to the in-cluster or local config.
    #[clap(long, env = "HUB_KUBECONFIG")]
    pub hub_kubeconfig: Option<PathBuf>,

    /// Kubeconfig file of the spoke
    #[clap(long, env = "SPOKE_KUBECONFIG")]
    pub spoke_kubeconfig: Option<PathBuf>,

    /// Hub secret, as namespace/name, holding the spoke kubeconfig
    #[clap(long, env = "SPOKE_KUBECONFIG_SECRET")]
    pub spoke_kubeconfig_secret: Option<String>,

    /// Spoke API server, used with the client certificate flags
    #[clap(long, env = "SPOKE_API_SERVER")]
    pub spoke_api_server: Option<String>,

    /// Base64 encoded CA certificate of the spoke API server
    #[clap(long, env = "SPOKE_CA_CERT")]
    pub spoke_ca_cert: Option<String>,

    /// Base64 encoded client certificate for the spoke
    #[clap(long, env = "CLIENT_CERT")]
    pub client_cert: Option<String>,

    /// Base64 encoded client key for the spoke
    #[clap(long, env = "CLIENT_KEY")]
    pub client_key: Option<String>,

    /// Directory of manifests replacing the embedded hub bootstrap identity
    #[clap(long, env = "HUB_MANIFESTS")]
    pub hub_manifests: Option<PathBuf>,

    /// Directory of manifests installing the klusterlet operator on the spoke,
    /// applied in file name order
    #[clap(long, env = "SPOKE_MANIFESTS")]
    pub spoke_manifests: Option<PathBuf>,

    #[clap(long, default_value = "2", env = "TOKEN_POLL_INTERVAL_SECONDS")]
    pub token_poll_interval_seconds: u64,

    #[clap(long, default_value = "20", env = "TOKEN_POLL_TIMEOUT_SECONDS")]
    pub token_poll_timeout_seconds: u64,

    #[clap(long, default_value = "30", env = "REGISTRATION_POLL_INTERVAL_SECONDS")]
    pub registration_poll_interval_seconds: u64,

    #[clap(long, default_value = "600", env = "REGISTRATION_POLL_TIMEOUT_SECONDS")]
    pub registration_poll_timeout_seconds: u64,

    #[clap(long, default_value = DEFAULT_REGISTRATION_IMAGE, env = "REGISTRATION_IMAGE")]
    pub registration_image: String,

    #[clap(long, default_value = DEFAULT_WORK_IMAGE, env = "WORK_IMAGE")]
    pub work_image: String,
}

impl Args {
    pub fn timing(&self) -> Result<Timing> {
        Ok(Timing {
            token: poll_settings(
                self.token_poll_interval_seconds,
                self.token_poll_timeout_seconds,
            )?,
            registration: poll_settings(
                self.registration_poll_interval_seconds,
                self.registration_poll_timeout_seconds,
            )?,
        })
    }

    /// Exactly one way of reaching the spoke must be configured.
    pub fn spoke_connection(&self) -> Result<SpokeConnection> {
        let credentials = [
            &self.spoke_api_server,
            &self.spoke_ca_cert,
            &self.client_cert,
            &self.client_key,
        ];
        let any_credential = credentials.iter().any(|c| c.is_some());

        match (
            &self.spoke_kubeconfig,
            &self.spoke_kubeconfig_secret,
            any_credential,
        ) {
            (Some(path), None, false) => Ok(SpokeConnection::Kubeconfig(path.clone())),
            (None, Some(secret), false) => {
                let (namespace, name) = secret
                    .split_once('/')
                    .filter(|(ns, name)| !ns.is_empty() && !name.is_empty())
                    .ok_or_else(|| {
                        Error::InvalidConfigError(format!(
                            "spoke kubeconfig secret must be namespace/name, got {secret}"
                        ))
                    })?;
                Ok(SpokeConnection::HubSecret(NamespacedName::new(namespace, name)))
            }
            (None, None, true) => match (
                &self.spoke_api_server,
                &self.spoke_ca_cert,
                &self.client_cert,
                &self.client_key,
            ) {
                (Some(server), Some(ca_cert), Some(client_cert), Some(client_key)) => {
                    Ok(SpokeConnection::Credentials {
                        server: server.clone(),
                        ca_cert: ca_cert.clone(),
                        client_cert: client_cert.clone(),
                        client_key: client_key.clone(),
                    })
                }
                _ => Err(Error::InvalidConfigError(
                    "--spoke-api-server, --spoke-ca-cert, --client-cert and --client-key must be set together"
                        .to_string(),
                )),
            },
            (None, None, false) => Err(Error::InvalidConfigError(
                "no spoke connection configured".to_string(),
            )),
            _ => Err(Error::InvalidConfigError(
                "only one spoke connection may be configured".to_string(),
            )),
        }
    }

    pub fn hub_bundle(&self) -> Result<ManifestBundle> {
        match &self.hub_manifests {
            Some(dir) => ManifestBundle::from_dir(dir),
            None => ManifestBundle::hub_defaults(),
        }
    }

    pub fn spoke_bundle(&self) -> Result<ManifestBundle> {
        match &self.spoke_manifests {
            Some(dir) => ManifestBundle::from_dir(dir),
            None => ManifestBundle::spoke_defaults(),
        }
    }

    pub fn images(&self) -> AgentImages {
        AgentImages {
            registration: self.registration_image.clone(),
            work: self.work_image.clone(),
        }
    }
}

fn poll_settings(interval: u64, timeout: u64) -> Result<PollSettings> {
    if interval == 0 || timeout < interval {
        return Err(Error::InvalidConfigError(format!(
            "poll interval must be positive and not exceed the timeout (interval {interval}s, timeout {timeout}s)"
        )));
    }
    Ok(PollSettings::new(
        Duration::from_secs(interval),
        Duration::from_secs(timeout),
    ))
}
