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

use k8s_openapi::api::certificates::v1::{
    CertificateSigningRequest, CertificateSigningRequestCondition,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use tracing::*;

use crate::{
    consts::*, crd::ManagedCluster, readiness::cluster_csr_selector, store::ObjectStore, Context,
    Error, Result,
};

/// Where a CSR stands, derived from its condition types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CsrState {
    Pending,
    Approved,
    Denied,
}

pub fn csr_state(csr: &CertificateSigningRequest) -> CsrState {
    let conditions = csr
        .status
        .as_ref()
        .and_then(|status| status.conditions.as_deref())
        .unwrap_or_default();

    // a denial is final even if the request was approved before
    if conditions.iter().any(|c| c.type_ == CSR_DENIED) {
        CsrState::Denied
    } else if conditions.iter().any(|c| c.type_ == CSR_APPROVED) {
        CsrState::Approved
    } else {
        CsrState::Pending
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// At least one CSR is approved and the hub accepts the cluster.
    Accepted,
    /// Every CSR of the cluster was denied. The cluster record is untouched.
    Denied { csrs: Vec<String> },
}

/// Approves the pending CSRs of a cluster and flips its `hubAcceptsClient`.
///
/// Denied requests are never approved. When all of them are denied nothing
/// is written and [`ApprovalOutcome::Denied`] is returned.
pub async fn approve_and_accept<S: ObjectStore>(
    ctx: &Context<S>,
    cluster_name: &str,
) -> Result<ApprovalOutcome> {
    let csrs: Vec<CertificateSigningRequest> = ctx
        .store
        .list(&cluster_csr_selector(cluster_name))
        .await
        .map_err(|error| {
            debug!(cluster = cluster_name, "failed to list certificate signing requests: {error}");
            error
        })?;
    if csrs.is_empty() {
        return Err(Error::NotFound(format!(
            "csr number wrong, expect >=1 actual {}",
            csrs.len()
        )));
    }

    let mut approved = 0;
    let mut denied = vec![];
    for csr in csrs {
        let name = csr.name_any();
        match csr_state(&csr) {
            CsrState::Denied => {
                warn!(cluster = cluster_name, csr = %name, "certificate signing request was denied, skipping");
                denied.push(name);
            }
            CsrState::Approved => {
                debug!(cluster = cluster_name, csr = %name, "certificate signing request already approved");
                approved += 1;
            }
            CsrState::Pending => {
                ctx.store
                    .update_approval(&with_approval(csr))
                    .await
                    .map_err(|error| {
                        debug!(cluster = cluster_name, csr = %name, "failed to approve certificate signing request: {error}");
                        error
                    })?;
                info!(cluster = cluster_name, csr = %name, "approved certificate signing request");
                approved += 1;
            }
        }
    }

    if approved == 0 {
        warn!(cluster = cluster_name, ?denied, "every certificate signing request was denied");
        return Ok(ApprovalOutcome::Denied { csrs: denied });
    }

    let mut record: ManagedCluster = ctx
        .store
        .get(None, cluster_name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("managed cluster {cluster_name}")))?;
    if record.spec.hub_accepts_client {
        debug!(cluster = cluster_name, "managed cluster already accepted");
        return Ok(ApprovalOutcome::Accepted);
    }

    record.spec.hub_accepts_client = true;
    ctx.store.update(&record).await.map_err(|error| {
        debug!(cluster = cluster_name, "failed to accept managed cluster: {error}");
        error
    })?;
    info!(cluster = cluster_name, "hub accepts managed cluster");
    Ok(ApprovalOutcome::Accepted)
}

// Existing conditions are kept, the approval is appended.
fn with_approval(mut csr: CertificateSigningRequest) -> CertificateSigningRequest {
    csr.status
        .get_or_insert_with(Default::default)
        .conditions
        .get_or_insert_with(Vec::new)
        .push(CertificateSigningRequestCondition {
            type_: CSR_APPROVED.to_string(),
            status: "True".to_string(),
            reason: Some(APPROVAL_REASON.to_string()),
            message: Some(format!(
                "This CSR was approved by {APPROVER_NAME} certificate approve."
            )),
            last_update_time: Some(Time(chrono::Utc::now())),
            ..Default::default()
        });
    csr
}
