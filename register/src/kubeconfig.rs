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

//! Kubeconfig documents exchanged during the handshake.
//!
//! The hub publishes its endpoint in `kube-public/cluster-info`; the spoke
//! agent receives a kubeconfig pointing at that endpoint and authenticating
//! with the bootstrap token.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use serde::{Deserialize, Serialize};
use tracing::*;

use crate::{
    consts::*,
    store::{ManifestApplier, ObjectStore},
    token::issue_token,
    Context, Error, Result,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub clusters: Vec<NamedCluster>,
    #[serde(default)]
    pub contexts: Vec<NamedContext>,
    #[serde(default)]
    pub current_context: String,
    #[serde(default)]
    pub users: Vec<NamedAuthInfo>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedCluster {
    #[serde(default)]
    pub name: String,
    pub cluster: ClusterEndpoint,
}

/// A cluster entry. Fields this tool does not interpret are kept verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterEndpoint {
    pub server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: KubeContext,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KubeContext {
    pub cluster: String,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedAuthInfo {
    pub name: String,
    pub user: AuthInfo,
}

/// Credentials of a kubeconfig user. Certificate data is base64 encoded PEM.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuthInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key_data: Option<String>,
}

/// The kubeconfig handed to the spoke agent for its first contact with the hub.
pub type SpokeBootstrapConfig = Kubeconfig;

impl Kubeconfig {
    /// Points at the hub endpoint `cluster` and authenticates with `token`.
    ///
    /// The endpoint is copied under the name `hub`; only its server is
    /// replaced, and only when `override_server` is given.
    pub fn bootstrap(cluster: &NamedCluster, override_server: Option<&str>, token: &str) -> Self {
        let mut endpoint = cluster.cluster.clone();
        if let Some(server) = override_server {
            endpoint.server = server.to_string();
        }

        Self {
            api_version: "v1".to_string(),
            kind: "Config".to_string(),
            clusters: vec![NamedCluster {
                name: HUB_CLUSTER_NAME.to_string(),
                cluster: endpoint,
            }],
            contexts: vec![NamedContext {
                name: BOOTSTRAP_CONTEXT_NAME.to_string(),
                context: KubeContext {
                    cluster: HUB_CLUSTER_NAME.to_string(),
                    user: BOOTSTRAP_USER_NAME.to_string(),
                    namespace: Some(BOOTSTRAP_CONTEXT_NAMESPACE.to_string()),
                },
            }],
            current_context: BOOTSTRAP_CONTEXT_NAME.to_string(),
            users: vec![NamedAuthInfo {
                name: BOOTSTRAP_USER_NAME.to_string(),
                user: AuthInfo {
                    token: Some(token.to_string()),
                    ..Default::default()
                },
            }],
        }
    }

    /// Access to a cluster through TLS client authentication.
    pub fn client_certificate(
        server: &str,
        ca_cert: &str,
        client_cert: &str,
        client_key: &str,
    ) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "Config".to_string(),
            clusters: vec![NamedCluster {
                name: "spoke".to_string(),
                cluster: ClusterEndpoint {
                    server: server.to_string(),
                    certificate_authority_data: Some(ca_cert.to_string()),
                    extra: BTreeMap::new(),
                },
            }],
            contexts: vec![NamedContext {
                name: "init".to_string(),
                context: KubeContext {
                    cluster: "spoke".to_string(),
                    user: "register-job".to_string(),
                    namespace: Some("default".to_string()),
                },
            }],
            current_context: "init".to_string(),
            users: vec![NamedAuthInfo {
                name: "register-job".to_string(),
                user: AuthInfo {
                    client_certificate_data: Some(client_cert.to_string()),
                    client_key_data: Some(client_key.to_string()),
                    ..Default::default()
                },
            }],
        }
    }

    /// Server of the cluster the current context points at.
    pub fn server(&self) -> Option<&str> {
        let cluster = self
            .contexts
            .iter()
            .find(|ctx| ctx.name == self.current_context)
            .map(|ctx| ctx.context.cluster.as_str())?;
        self.clusters
            .iter()
            .find(|named| named.name == cluster)
            .map(|named| named.cluster.server.as_str())
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// The hub's public connection info, as published in `kube-public/cluster-info`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct HubConnectionInfo {
    // cluster-info carries `contexts: null` and friends, only clusters matter
    #[serde(default)]
    clusters: Option<Vec<NamedCluster>>,
}

impl HubConnectionInfo {
    pub fn from_cluster_info(kubeconfig: &str) -> Result<Self> {
        serde_yaml::from_str(kubeconfig).map_err(|e| Error::InvalidHubConfig(e.to_string()))
    }

    pub fn clusters(&self) -> &[NamedCluster] {
        self.clusters.as_deref().unwrap_or_default()
    }

    /// The single cluster entry. Zero or several entries are ambiguous.
    pub fn single_cluster(&self) -> Result<&NamedCluster> {
        match self.clusters() {
            [cluster] => Ok(cluster),
            clusters => Err(Error::InvariantViolation(format!(
                "expected exactly one cluster in {CLUSTER_INFO_NAMESPACE}/{CLUSTER_INFO_NAME}, found {}",
                clusters.len()
            ))),
        }
    }
}

/// Builds the kubeconfig the spoke agent bootstraps with.
///
/// Reads the hub's public connection info, issues the bootstrap token and
/// points the result at `override_server` when given, or at the server the
/// hub advertises otherwise.
pub async fn build_spoke_bootstrap_config<S>(
    ctx: &Context<S>,
    override_server: Option<&str>,
) -> Result<SpokeBootstrapConfig>
where
    S: ObjectStore + ManifestApplier,
{
    let cluster_info: ConfigMap = ctx
        .store
        .get(Some(CLUSTER_INFO_NAMESPACE), CLUSTER_INFO_NAME)
        .await?
        .ok_or_else(|| {
            Error::NotFound(format!(
                "config map {CLUSTER_INFO_NAMESPACE}/{CLUSTER_INFO_NAME}"
            ))
        })?;
    let kubeconfig = cluster_info
        .data
        .as_ref()
        .and_then(|data| data.get(CLUSTER_INFO_KUBECONFIG_KEY))
        .ok_or_else(|| {
            Error::InvalidHubConfig(format!(
                "{CLUSTER_INFO_NAMESPACE}/{CLUSTER_INFO_NAME} has no `{CLUSTER_INFO_KUBECONFIG_KEY}` key"
            ))
        })?;

    let hub = HubConnectionInfo::from_cluster_info(kubeconfig)?;
    let cluster = hub.single_cluster().map_err(|error| {
        debug!("can not find the hub cluster in cluster-info: {error}");
        error
    })?;

    let token = issue_token(ctx).await?;
    let config = Kubeconfig::bootstrap(cluster, override_server, &token);
    debug!(
        server = config.server().unwrap_or_default(),
        "built spoke bootstrap kubeconfig"
    );
    Ok(config)
}
