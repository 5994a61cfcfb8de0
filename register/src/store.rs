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

//! Seams between the handshake logic and the cluster it talks to.
//!
//! [`ObjectStore`] is a typed get/list/create/update view over named,
//! optionally namespaced objects and [`ManifestApplier`] idempotently applies
//! a resource descriptor. [`KubeStore`] implements both against a live API
//! server; tests use an in-memory fake.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use kube::{
    api::{Api, ApiResource, DynamicObject, ListParams, Patch, PatchParams, PostParams},
    discovery::{self, Scope},
    Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::*;

use crate::{consts::FIELD_MANAGER, manifests::manifest_gvk, Error, Result};

/// Any statically typed Kubernetes object the store can hand back.
pub trait StoreObject:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches a single object. An absent object is `Ok(None)`.
    async fn get<K: StoreObject>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>>;

    /// Lists objects of a kind in all namespaces matching a label selector.
    async fn list<K: StoreObject>(&self, label_selector: &str) -> Result<Vec<K>>;

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K>;

    /// Replaces an object. Conflicts surface as errors, nothing is retried.
    async fn update<K: StoreObject>(&self, obj: &K) -> Result<K>;

    /// Writes the approval subresource of a CSR.
    async fn update_approval(
        &self,
        csr: &CertificateSigningRequest,
    ) -> Result<CertificateSigningRequest>;
}

#[async_trait]
pub trait ManifestApplier: Send + Sync {
    /// Creates the described resource, or updates it if it already exists.
    async fn apply(&self, manifest: &DynamicObject) -> Result<()>;
}

/// [`ObjectStore`] and [`ManifestApplier`] backed by a Kubernetes client.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: StoreObject>(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = ApiResource::erase::<K>(&());
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: StoreObject>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
        match self.api::<K>(namespace).get(name).await {
            Ok(obj) => Ok(Some(from_dynamic(obj)?)),
            Err(error) if is_not_found(&error) => Ok(None),
            Err(error) => Err(Error::KubeError(error)),
        }
    }

    async fn list<K: StoreObject>(&self, label_selector: &str) -> Result<Vec<K>> {
        self.api::<K>(None)
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(Error::KubeError)?
            .items
            .into_iter()
            .map(from_dynamic)
            .collect()
    }

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K> {
        let created = self
            .api::<K>(obj.meta().namespace.as_deref())
            .create(&PostParams::default(), &to_dynamic(obj)?)
            .await
            .map_err(Error::KubeError)?;
        from_dynamic(created)
    }

    async fn update<K: StoreObject>(&self, obj: &K) -> Result<K> {
        let updated = self
            .api::<K>(obj.meta().namespace.as_deref())
            .replace(&obj.name_any(), &PostParams::default(), &to_dynamic(obj)?)
            .await
            .map_err(Error::KubeError)?;
        from_dynamic(updated)
    }

    async fn update_approval(
        &self,
        csr: &CertificateSigningRequest,
    ) -> Result<CertificateSigningRequest> {
        let csr_api: Api<CertificateSigningRequest> = Api::all(self.client.clone());
        csr_api
            .replace_subresource(
                "approval",
                &csr.name_any(),
                &PostParams::default(),
                serde_json::to_vec(csr)?,
            )
            .await
            .map_err(Error::KubeError)
    }
}

#[async_trait]
impl ManifestApplier for KubeStore {
    async fn apply(&self, manifest: &DynamicObject) -> Result<()> {
        let gvk = manifest_gvk(manifest)?;
        let name = manifest.name_any();

        let (resource, capabilities) = discovery::pinned_kind(&self.client, &gvk)
            .await
            .map_err(Error::KubeError)?;
        let api: Api<DynamicObject> = match capabilities.scope {
            Scope::Namespaced => Api::namespaced_with(
                self.client.clone(),
                manifest.namespace().as_deref().unwrap_or("default"),
                &resource,
            ),
            Scope::Cluster => Api::all_with(self.client.clone(), &resource),
        };

        let params = PatchParams::apply(FIELD_MANAGER).force();
        if let Err(error) = api.patch(&name, &params, &Patch::Apply(manifest)).await {
            debug!(kind = %gvk.kind, %name, "failed to apply manifest: {error}");
            return Err(Error::KubeError(error));
        }
        info!(kind = %gvk.kind, %name, "applied manifest");
        Ok(())
    }
}

// Returns true if the provided error is a not found error.
pub fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 404)
}

fn from_dynamic<K: StoreObject>(obj: DynamicObject) -> Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

fn to_dynamic<K: StoreObject>(obj: &K) -> Result<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}
