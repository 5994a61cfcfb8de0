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

//! Read-only bundles of resource descriptors, looked up by logical name.
//!
//! A bundle is built once at startup, either from the defaults embedded in
//! the binary or from a directory of YAML files, and then shared by `Arc`.

use std::path::Path;

use kube::{api::DynamicObject, core::GroupVersionKind, ResourceExt};
use serde::Deserialize;
use tracing::*;

use crate::{consts::*, Error, Result};

const HUB_DEFAULTS: [(&str, &str); 4] = [
    (
        BOOTSTRAP_CLUSTER_ROLE_MANIFEST,
        include_str!("../manifests/hub/bootstrap_cluster_role.yaml"),
    ),
    (
        BOOTSTRAP_CLUSTER_ROLE_BINDING_MANIFEST,
        include_str!("../manifests/hub/bootstrap_sa_cluster_role_binding.yaml"),
    ),
    (
        BOOTSTRAP_SA_MANIFEST,
        include_str!("../manifests/hub/bootstrap_sa.yaml"),
    ),
    (
        BOOTSTRAP_TOKEN_SECRET_MANIFEST,
        include_str!("../manifests/hub/bootstrap_sa_token.yaml"),
    ),
];

const SPOKE_DEFAULTS: [(&str, &str); 7] = [
    (
        SPOKE_AGENT_NAMESPACE_MANIFEST,
        include_str!("../manifests/spoke/namespace_agent.yaml"),
    ),
    (
        SPOKE_NAMESPACE_MANIFEST,
        include_str!("../manifests/spoke/namespace.yaml"),
    ),
    (
        SPOKE_CLUSTER_ROLE_MANIFEST,
        include_str!("../manifests/spoke/cluster_role.yaml"),
    ),
    (
        SPOKE_CLUSTER_ROLE_BINDING_MANIFEST,
        include_str!("../manifests/spoke/cluster_role_binding.yaml"),
    ),
    (
        SPOKE_KLUSTERLET_CRD_MANIFEST,
        include_str!("../manifests/spoke/klusterlets.crd.yaml"),
    ),
    (
        SPOKE_SERVICE_ACCOUNT_MANIFEST,
        include_str!("../manifests/spoke/service_account.yaml"),
    ),
    (
        SPOKE_OPERATOR_MANIFEST,
        include_str!("../manifests/spoke/operator.yaml"),
    ),
];

#[derive(Clone, Debug, Default)]
pub struct ManifestBundle {
    entries: Vec<(String, DynamicObject)>,
}

impl ManifestBundle {
    /// Builds a bundle from `(logical name, yaml)` pairs, keeping their order.
    ///
    /// A YAML string holding several documents contributes one entry per
    /// document, named `<name>#<index>`.
    pub fn from_documents<N, Y>(documents: &[(N, Y)]) -> Result<Self>
    where
        N: AsRef<str>,
        Y: AsRef<str>,
    {
        let mut bundle = Self::default();
        for (name, yaml) in documents {
            bundle.push_documents(name.as_ref(), yaml.as_ref())?;
        }
        Ok(bundle)
    }

    /// The hub side bootstrap identity: cluster role, binding, service account
    /// and its token secret.
    pub fn hub_defaults() -> Result<Self> {
        Self::from_documents(&HUB_DEFAULTS)
    }

    /// The klusterlet operator install: namespaces, RBAC, the `Klusterlet`
    /// CRD, the operator's service account and its deployment.
    pub fn spoke_defaults() -> Result<Self> {
        Self::from_documents(&SPOKE_DEFAULTS)
    }

    /// Loads every `*.yaml`/`*.yml` file of a directory, sorted by file name.
    /// Entries are named after the file stem.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut paths = std::fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        paths.retain(|path| {
            path.is_file()
                && matches!(
                    path.extension().and_then(|ext| ext.to_str()),
                    Some("yaml") | Some("yml")
                )
        });
        paths.sort();

        let mut bundle = Self::default();
        for path in paths {
            let name = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .ok_or_else(|| {
                    Error::InvalidManifest(path.display().to_string(), "bad file name".to_string())
                })?
                .to_string();
            let contents = std::fs::read_to_string(&path)?;
            bundle.push_documents(&name, &contents)?;
        }
        debug!(dir = %dir.display(), manifests = bundle.len(), "loaded manifest bundle");
        Ok(bundle)
    }

    pub fn get(&self, name: &str) -> Result<&DynamicObject> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, manifest)| manifest)
            .ok_or_else(|| Error::MissingManifest(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DynamicObject)> {
        self.entries
            .iter()
            .map(|(name, manifest)| (name.as_str(), manifest))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push_documents(&mut self, name: &str, yaml: &str) -> Result<()> {
        let mut documents = vec![];
        for document in serde_yaml::Deserializer::from_str(yaml) {
            let value = serde_yaml::Value::deserialize(document)
                .map_err(|e| Error::InvalidManifest(name.to_string(), e.to_string()))?;
            // empty documents between separators
            if !value.is_null() {
                documents.push(value);
            }
        }

        let multiple = documents.len() > 1;
        for (index, value) in documents.into_iter().enumerate() {
            let entry = if multiple {
                format!("{name}#{index}")
            } else {
                name.to_string()
            };
            let manifest = parse_manifest(&entry, value)?;
            if self.entries.iter().any(|(existing, _)| existing == &entry) {
                return Err(Error::InvalidManifest(entry, "duplicate name".to_string()));
            }
            self.entries.push((entry, manifest));
        }
        Ok(())
    }
}

fn parse_manifest(name: &str, value: serde_yaml::Value) -> Result<DynamicObject> {
    let manifest: DynamicObject = serde_yaml::from_value(value)
        .map_err(|e| Error::InvalidManifest(name.to_string(), e.to_string()))?;

    let has_type = manifest
        .types
        .as_ref()
        .is_some_and(|t| !t.api_version.is_empty() && !t.kind.is_empty());
    if !has_type {
        return Err(Error::InvalidManifest(
            name.to_string(),
            "missing apiVersion or kind".to_string(),
        ));
    }
    if manifest.metadata.name.as_deref().unwrap_or_default().is_empty() {
        return Err(Error::InvalidManifest(
            name.to_string(),
            "missing metadata.name".to_string(),
        ));
    }
    Ok(manifest)
}

/// Splits a descriptor's `apiVersion` and `kind` into a [`GroupVersionKind`].
pub fn manifest_gvk(manifest: &DynamicObject) -> Result<GroupVersionKind> {
    let types = manifest.types.as_ref().ok_or_else(|| {
        Error::InvalidManifest(manifest.name_any(), "missing apiVersion or kind".to_string())
    })?;
    let (group, version) = types
        .api_version
        .split_once('/')
        .unwrap_or(("", types.api_version.as_str()));
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}
