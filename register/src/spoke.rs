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

//! Installs the registration agent on the spoke and hands it the bootstrap
//! kubeconfig.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::{
    api::DynamicObject,
    config::{KubeConfigOptions, Kubeconfig as ClientKubeconfig},
    Client, Config,
};
use serde_json::json;
use tracing::*;

use crate::{
    consts::*,
    kubeconfig::{Kubeconfig, SpokeBootstrapConfig},
    manifests::ManifestBundle,
    store::{ManifestApplier, ObjectStore},
    Error, NamespacedName, Result,
};

/// How to reach the spoke's API server.
#[derive(Clone, Debug, PartialEq)]
pub enum SpokeConnection {
    /// A kubeconfig file on disk
    Kubeconfig(PathBuf),
    /// A kubeconfig stored under the `kubeconfig` key of a secret on the hub
    HubSecret(NamespacedName),
    /// TLS client authentication, certificate data base64 encoded PEM
    Credentials {
        server: String,
        ca_cert: String,
        client_cert: String,
        client_key: String,
    },
}

impl SpokeConnection {
    /// Resolves the spoke kubeconfig, reading from `hub` when it is kept there.
    pub async fn kubeconfig<S: ObjectStore>(&self, hub: &S) -> Result<ClientKubeconfig> {
        let kubeconfig = match self {
            Self::Kubeconfig(path) => ClientKubeconfig::read_from(path),
            Self::HubSecret(secret) => {
                let found: Secret = hub
                    .get(Some(secret.namespace.as_str()), &secret.name)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("secret {secret}")))?;
                let data = found
                    .data
                    .and_then(|mut data| data.remove("kubeconfig"))
                    .ok_or_else(|| {
                        Error::InvalidConfigError(format!("secret {secret} has no kubeconfig"))
                    })?;
                let yaml = String::from_utf8(data.0)
                    .map_err(|e| Error::InvalidConfigError(e.to_string()))?;
                ClientKubeconfig::from_yaml(&yaml)
            }
            Self::Credentials {
                server,
                ca_cert,
                client_cert,
                client_key,
            } => {
                let yaml =
                    Kubeconfig::client_certificate(server, ca_cert, client_cert, client_key)
                        .to_yaml()?;
                ClientKubeconfig::from_yaml(&yaml)
            }
        };
        kubeconfig.map_err(|e| Error::InvalidConfigError(format!("spoke kubeconfig: {e}")))
    }

    pub async fn client<S: ObjectStore>(&self, hub: &S) -> Result<Client> {
        let kubeconfig = self.kubeconfig(hub).await?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::InvalidConfigError(format!("spoke kubeconfig: {e}")))?;
        Client::try_from(config).map_err(Error::KubeError)
    }
}

/// Images of the agents the klusterlet operator deploys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentImages {
    pub registration: String,
    pub work: String,
}

impl Default for AgentImages {
    fn default() -> Self {
        Self {
            registration: DEFAULT_REGISTRATION_IMAGE.to_string(),
            work: DEFAULT_WORK_IMAGE.to_string(),
        }
    }
}

/// The cluster being registered, as seen through its own API server.
pub struct SpokeCluster<S> {
    pub name: String,
    pub store: S,
    /// Applied in order before the klusterlet
    pub manifests: Arc<ManifestBundle>,
    /// Bundle entries held back until the bootstrap secret exists
    pub deferred: Vec<String>,
    pub images: AgentImages,
}

impl<S> SpokeCluster<S>
where
    S: ObjectStore + ManifestApplier,
{
    pub fn new(name: impl Into<String>, store: S, manifests: Arc<ManifestBundle>) -> Self {
        Self {
            name: name.into(),
            store,
            manifests,
            deferred: vec![SPOKE_OPERATOR_MANIFEST.to_string()],
            images: AgentImages::default(),
        }
    }

    /// Installs the agent and hands it the bootstrap kubeconfig.
    pub async fn init_spoke_cluster_env(
        &self,
        hub_kubeconfig: &SpokeBootstrapConfig,
    ) -> Result<()> {
        let hub_server = hub_kubeconfig.server().ok_or_else(|| {
            Error::InvalidHubConfig("bootstrap kubeconfig has no current cluster".to_string())
        })?;

        let (deferred, prerequisites): (Vec<_>, Vec<_>) = self
            .manifests
            .iter()
            .partition(|(name, _)| self.is_deferred(name));

        self.apply_manifests(prerequisites).await?;
        self.apply_bootstrap_secret(hub_kubeconfig).await?;
        self.apply_manifests(deferred).await?;

        let klusterlet = self.klusterlet(hub_server)?;
        self.store.apply(&klusterlet).await.map_err(|error| {
            debug!(cluster = %self.name, "failed to apply klusterlet: {error}");
            error
        })?;
        info!(cluster = %self.name, hub = hub_server, "spoke cluster prepared");
        Ok(())
    }

    // `operator#1` is the second document of the `operator` entry
    fn is_deferred(&self, name: &str) -> bool {
        let base = name.split_once('#').map_or(name, |(base, _)| base);
        self.deferred.iter().any(|deferred| deferred == base)
    }

    async fn apply_manifests(&self, manifests: Vec<(&str, &DynamicObject)>) -> Result<()> {
        for (name, manifest) in manifests {
            self.store.apply(manifest).await.map_err(|error| {
                debug!(cluster = %self.name, manifest = name, "failed to prepare spoke: {error}");
                error
            })?;
        }
        Ok(())
    }

    async fn apply_bootstrap_secret(&self, hub_kubeconfig: &SpokeBootstrapConfig) -> Result<()> {
        let data = BTreeMap::from([(
            "kubeconfig".to_string(),
            ByteString(hub_kubeconfig.to_yaml()?.into_bytes()),
        )]);

        let existing: Option<Secret> = self
            .store
            .get(Some(AGENT_NAMESPACE), BOOTSTRAP_HUB_KUBECONFIG_SECRET)
            .await?;
        match existing {
            Some(mut secret) => {
                debug!(cluster = %self.name, "updating bootstrap hub kubeconfig secret");
                secret.data = Some(data);
                self.store.update(&secret).await?;
            }
            None => {
                debug!(cluster = %self.name, "creating bootstrap hub kubeconfig secret");
                let secret = Secret {
                    metadata: ObjectMeta {
                        name: Some(BOOTSTRAP_HUB_KUBECONFIG_SECRET.to_string()),
                        namespace: Some(AGENT_NAMESPACE.to_string()),
                        ..Default::default()
                    },
                    data: Some(data),
                    type_: Some("Opaque".to_string()),
                    ..Default::default()
                };
                self.store.create(&secret).await?;
            }
        }
        Ok(())
    }

    fn klusterlet(&self, hub_server: &str) -> Result<DynamicObject> {
        Ok(serde_json::from_value(json!({
            "apiVersion": KLUSTERLET_API_VERSION,
            "kind": KLUSTERLET_KIND,
            "metadata": { "name": KLUSTERLET_NAME },
            "spec": {
                "clusterName": self.name,
                "namespace": AGENT_NAMESPACE,
                "externalServerURLs": [{ "url": hub_server }],
                "registrationImagePullSpec": self.images.registration,
                "workImagePullSpec": self.images.work,
            },
        }))?)
    }
}

#[cfg(test)]
mod tests {
    use kube::ResourceExt;

    use super::*;
    use crate::kubeconfig::{ClusterEndpoint, NamedCluster};
    use crate::manifests::manifest_gvk;
    use crate::testing::*;

    fn hub_kubeconfig() -> SpokeBootstrapConfig {
        let hub = NamedCluster {
            name: String::new(),
            cluster: ClusterEndpoint {
                server: "https://10.0.0.1:6443".to_string(),
                certificate_authority_data: Some("Y2E=".to_string()),
                extra: BTreeMap::new(),
            },
        };
        Kubeconfig::bootstrap(&hub, Some("https://203.0.113.9:6443"), "abcdef.0123456789")
    }

    fn spoke(store: FakeStore) -> SpokeCluster<FakeStore> {
        SpokeCluster::new(
            "cluster-1",
            store,
            Arc::new(ManifestBundle::spoke_defaults().unwrap()),
        )
    }

    fn applied_kinds(store: &FakeStore) -> Vec<String> {
        store
            .applied()
            .iter()
            .map(|m| format!("{}/{}", manifest_gvk(m).unwrap().kind, m.name_any()))
            .collect()
    }

    #[tokio::test]
    async fn installs_agent_with_the_bootstrap_kubeconfig() {
        let store = FakeStore::new();
        spoke(store.clone())
            .init_spoke_cluster_env(&hub_kubeconfig())
            .await
            .unwrap();

        let applied = store.applied();
        assert_eq!(
            applied_kinds(&store),
            vec![
                "Namespace/open-cluster-management-agent",
                "Namespace/open-cluster-management",
                "ClusterRole/klusterlet",
                "ClusterRoleBinding/klusterlet",
                "CustomResourceDefinition/klusterlets.operator.open-cluster-management.io",
                "ServiceAccount/klusterlet",
                "Deployment/klusterlet",
                "Klusterlet/klusterlet",
            ]
        );

        let klusterlet = &applied[7];
        assert_eq!(klusterlet.data["spec"]["clusterName"], "cluster-1");
        assert_eq!(
            klusterlet.data["spec"]["externalServerURLs"][0]["url"],
            "https://203.0.113.9:6443"
        );
        assert_eq!(
            klusterlet.data["spec"]["namespace"],
            "open-cluster-management-agent"
        );

        assert_eq!(
            store.writes(),
            vec!["create Secret/open-cluster-management-agent/bootstrap-hub-kubeconfig"]
        );
        let secret: Secret = store
            .object(Some(AGENT_NAMESPACE), BOOTSTRAP_HUB_KUBECONFIG_SECRET)
            .unwrap();
        let yaml = String::from_utf8(secret.data.unwrap()["kubeconfig"].0.clone()).unwrap();
        let delivered: Kubeconfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(delivered, hub_kubeconfig());
    }

    #[tokio::test]
    async fn existing_bootstrap_secret_is_updated() {
        let store = FakeStore::new();
        store.insert(Secret {
            metadata: ObjectMeta {
                name: Some(BOOTSTRAP_HUB_KUBECONFIG_SECRET.to_string()),
                namespace: Some(AGENT_NAMESPACE.to_string()),
                ..Default::default()
            },
            ..Default::default()
        });

        spoke(store.clone())
            .init_spoke_cluster_env(&hub_kubeconfig())
            .await
            .unwrap();
        assert_eq!(
            store.writes(),
            vec!["update Secret/open-cluster-management-agent/bootstrap-hub-kubeconfig"]
        );
    }

    #[tokio::test]
    async fn manifest_failure_stops_provisioning() {
        let store = FakeStore::new();
        store.fail_apply_of(OPEN_CLUSTER_MANAGEMENT_NAMESPACE);

        assert!(spoke(store.clone())
            .init_spoke_cluster_env(&hub_kubeconfig())
            .await
            .is_err());
        assert_eq!(store.applied().len(), 1);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn operator_waits_for_the_bootstrap_secret() {
        let store = FakeStore::new();
        store.fail_writes("Secret");

        assert!(matches!(
            spoke(store.clone())
                .init_spoke_cluster_env(&hub_kubeconfig())
                .await,
            Err(Error::KubeError(_))
        ));
        let applied = applied_kinds(&store);
        assert_eq!(applied.len(), 6);
        assert_eq!(applied[5], "ServiceAccount/klusterlet");
    }

    #[tokio::test]
    async fn deferred_entries_match_every_document_of_a_file() {
        let bundle = ManifestBundle::from_documents(&[
            (
                "namespace",
                "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: open-cluster-management-agent\n",
            ),
            (
                "operator",
                "apiVersion: v1\nkind: ServiceAccount\nmetadata:\n  name: klusterlet\n  namespace: open-cluster-management\n---\napiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: klusterlet\n  namespace: open-cluster-management\n",
            ),
        ])
        .unwrap();
        let store = FakeStore::new();
        store.fail_writes("Secret");
        let spoke = SpokeCluster::new("cluster-1", store.clone(), Arc::new(bundle));

        assert!(spoke.init_spoke_cluster_env(&hub_kubeconfig()).await.is_err());
        assert_eq!(
            applied_kinds(&store),
            vec!["Namespace/open-cluster-management-agent"]
        );
    }

    #[tokio::test]
    async fn kubeconfig_can_be_read_from_a_hub_secret() {
        let hub = FakeStore::new();
        hub.insert(Secret {
            metadata: ObjectMeta {
                name: Some("cluster-1-kubeconfig".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "kubeconfig".to_string(),
                ByteString(
                    Kubeconfig::client_certificate("https://spoke:6443", "Y2E=", "Y2VydA==", "a2V5")
                        .to_yaml()
                        .unwrap()
                        .into_bytes(),
                ),
            )])),
            ..Default::default()
        });

        let connection =
            SpokeConnection::HubSecret(NamespacedName::new("default", "cluster-1-kubeconfig"));
        let kubeconfig = connection.kubeconfig(&hub).await.unwrap();
        assert_eq!(kubeconfig.current_context.as_deref(), Some("init"));
        assert_eq!(kubeconfig.clusters.len(), 1);

        let missing = SpokeConnection::HubSecret(NamespacedName::new("default", "absent"));
        assert!(matches!(
            missing.kubeconfig(&hub).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn credentials_become_a_client_certificate_kubeconfig() {
        let connection = SpokeConnection::Credentials {
            server: "https://spoke:6443".to_string(),
            ca_cert: "Y2E=".to_string(),
            client_cert: "Y2VydA==".to_string(),
            client_key: "a2V5".to_string(),
        };
        let kubeconfig = connection.kubeconfig(&FakeStore::new()).await.unwrap();
        assert_eq!(kubeconfig.current_context.as_deref(), Some("init"));
        assert_eq!(kubeconfig.auth_infos.len(), 1);
        assert_eq!(kubeconfig.auth_infos[0].name, "register-job");
    }
}
