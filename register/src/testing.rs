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

//! In-memory stand-ins for the hub and spoke used by unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::certificates::v1::{
    CertificateSigningRequest, CertificateSigningRequestCondition,
    CertificateSigningRequestSpec, CertificateSigningRequestStatus,
};
use k8s_openapi::api::core::v1::{ConfigMap, ObjectReference, Secret, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::{api::DynamicObject, error::ErrorResponse, ResourceExt};

use crate::consts::*;
use crate::crd::{ManagedCluster, ManagedClusterSpec};
use crate::store::{ManifestApplier, ObjectStore, StoreObject};
use crate::{Error, Result};

// (kind, namespace, name); cluster scoped objects use an empty namespace
type ObjectKey = (String, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, serde_json::Value>,
    failing_reads: BTreeMap<String, usize>,
    failing_writes: BTreeSet<String>,
    failing_applies: BTreeSet<String>,
    writes: Vec<String>,
    applied: Vec<DynamicObject>,
}

/// Object store and manifest applier keeping everything in memory.
///
/// Every create, update and approval is recorded so tests can assert on the
/// exact writes a handshake step issued.
#[derive(Clone, Default)]
pub struct FakeStore {
    state: Arc<Mutex<State>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<K: StoreObject>(&self, obj: K) {
        let key = key_of(&obj);
        let value = serde_json::to_value(&obj).unwrap();
        self.state.lock().unwrap().objects.insert(key, value);
    }

    pub fn object<K: StoreObject>(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        let key = (
            K::kind(&()).to_string(),
            namespace.unwrap_or_default().to_string(),
            name.to_string(),
        );
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&key)
            .map(|value| serde_json::from_value(value.clone()).unwrap())
    }

    /// Makes the next `times` gets or lists of `kind` fail with a server error.
    pub fn fail_reads(&self, kind: &str, times: usize) {
        self.state
            .lock()
            .unwrap()
            .failing_reads
            .insert(kind.to_string(), times);
    }

    /// Makes every write to `kind` fail with a server error.
    pub fn fail_writes(&self, kind: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_writes
            .insert(kind.to_string());
    }

    /// Makes applying the manifest with this `metadata.name` fail.
    pub fn fail_apply_of(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_applies
            .insert(name.to_string());
    }

    pub fn writes(&self) -> Vec<String> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn applied(&self) -> Vec<DynamicObject> {
        self.state.lock().unwrap().applied.clone()
    }

    fn read_failure(&self, kind: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.failing_reads.get_mut(kind) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(server_error())
            }
            _ => Ok(()),
        }
    }

    fn write<K: StoreObject>(&self, verb: &str, obj: &K) -> Result<K> {
        let mut state = self.state.lock().unwrap();
        let key = key_of(obj);
        if state.failing_writes.contains(&key.0) {
            return Err(server_error());
        }
        let description = if key.1.is_empty() {
            format!("{verb} {}/{}", key.0, key.2)
        } else {
            format!("{verb} {}/{}/{}", key.0, key.1, key.2)
        };
        state.writes.push(description);
        state.objects.insert(key, serde_json::to_value(obj)?);
        Ok(obj.clone())
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn get<K: StoreObject>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
        self.read_failure(&K::kind(&()))?;
        Ok(self.object(namespace, name))
    }

    async fn list<K: StoreObject>(&self, label_selector: &str) -> Result<Vec<K>> {
        let kind = K::kind(&()).to_string();
        self.read_failure(&kind)?;

        let wanted: Vec<(&str, &str)> = label_selector
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .collect();
        let matching: Vec<serde_json::Value> = {
            let state = self.state.lock().unwrap();
            state
                .objects
                .iter()
                .filter(|((k, _, _), _)| k == &kind)
                .filter(|(_, value)| {
                    wanted.iter().all(|(label, expected)| {
                        value["metadata"]["labels"][*label].as_str() == Some(*expected)
                    })
                })
                .map(|(_, value)| value.clone())
                .collect()
        };
        matching
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(Error::from))
            .collect()
    }

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K> {
        self.write("create", obj)
    }

    async fn update<K: StoreObject>(&self, obj: &K) -> Result<K> {
        self.write("update", obj)
    }

    async fn update_approval(
        &self,
        csr: &CertificateSigningRequest,
    ) -> Result<CertificateSigningRequest> {
        self.write("approve", csr)
    }
}

#[async_trait]
impl ManifestApplier for FakeStore {
    async fn apply(&self, manifest: &DynamicObject) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_applies.contains(&manifest.name_any()) {
            return Err(server_error());
        }
        state.applied.push(manifest.clone());
        Ok(())
    }
}

fn key_of<K: StoreObject>(obj: &K) -> ObjectKey {
    (
        K::kind(&()).to_string(),
        obj.namespace().unwrap_or_default(),
        obj.name_any(),
    )
}

fn server_error() -> Error {
    Error::KubeError(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: "etcdserver: request timed out".to_string(),
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

pub fn csr(name: &str, cluster: &str, conditions: &[&str]) -> CertificateSigningRequest {
    CertificateSigningRequest {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(
                CLUSTER_NAME_LABEL.to_string(),
                cluster.to_string(),
            )])),
            ..Default::default()
        },
        spec: CertificateSigningRequestSpec {
            request: ByteString(b"-----BEGIN CERTIFICATE REQUEST-----".to_vec()),
            signer_name: "kubernetes.io/kube-apiserver-client".to_string(),
            ..Default::default()
        },
        status: Some(CertificateSigningRequestStatus {
            conditions: Some(
                conditions
                    .iter()
                    .map(|type_| CertificateSigningRequestCondition {
                        type_: type_.to_string(),
                        status: "True".to_string(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
    }
}

pub fn managed_cluster(name: &str, accepted: bool) -> ManagedCluster {
    ManagedCluster::new(
        name,
        ManagedClusterSpec {
            hub_accepts_client: accepted,
            lease_duration_seconds: Some(60),
            ..Default::default()
        },
    )
}

pub fn bootstrap_service_account(secrets: &[&str]) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(BOOTSTRAP_SA_NAME.to_string()),
            namespace: Some(OPEN_CLUSTER_MANAGEMENT_NAMESPACE.to_string()),
            ..Default::default()
        },
        secrets: Some(
            secrets
                .iter()
                .map(|name| ObjectReference {
                    name: Some(name.to_string()),
                    ..Default::default()
                })
                .collect(),
        ),
        ..Default::default()
    }
}

pub fn token_secret(name: &str, token: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(OPEN_CLUSTER_MANAGEMENT_NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "token".to_string(),
            ByteString(token.as_bytes().to_vec()),
        )])),
        type_: Some("kubernetes.io/service-account-token".to_string()),
        ..Default::default()
    }
}

pub fn cluster_info(kubeconfig: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(CLUSTER_INFO_NAME.to_string()),
            namespace: Some(CLUSTER_INFO_NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            CLUSTER_INFO_KUBECONFIG_KEY.to_string(),
            kubeconfig.to_string(),
        )])),
        ..Default::default()
    }
}
