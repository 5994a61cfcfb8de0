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

use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use tracing::*;

use crate::{
    consts::CLUSTER_NAME_LABEL, crd::ManagedCluster, poll::poll_immediate, store::ObjectStore,
    Context, Error, Result,
};

/// Label selector matching the CSRs a spoke's registration agent submits.
pub fn cluster_csr_selector(cluster_name: &str) -> String {
    format!("{CLUSTER_NAME_LABEL}={cluster_name}")
}

/// Waits until the spoke has both submitted a CSR and created its
/// `ManagedCluster` record on the hub.
pub async fn wait_until_spoke_visible<S: ObjectStore>(
    ctx: &Context<S>,
    cluster_name: &str,
) -> Result<bool> {
    let selector = cluster_csr_selector(cluster_name);
    let selector = selector.as_str();

    poll_immediate(
        ctx.timing.registration,
        &ctx.cancel,
        &format!("registration request of cluster {cluster_name}"),
        move || async move {
            let csrs: Vec<CertificateSigningRequest> = ctx.store.list(selector).await?;
            if csrs.is_empty() {
                debug!(cluster = cluster_name, "no certificate signing request yet");
                return Ok(None);
            }
            let record: Option<ManagedCluster> = ctx.store.get(None, cluster_name).await?;
            if record.is_none() {
                debug!(cluster = cluster_name, "managed cluster not created yet");
                return Ok(None);
            }
            Ok::<_, Error>(Some(true))
        },
    )
    .await
    .map(|visible| {
        info!(cluster = cluster_name, "spoke cluster is visible on the hub");
        visible
    })
}
