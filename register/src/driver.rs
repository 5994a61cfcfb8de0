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

use tracing::*;

use crate::{
    approval::{approve_and_accept, ApprovalOutcome},
    kubeconfig::build_spoke_bootstrap_config,
    readiness::wait_until_spoke_visible,
    spoke::SpokeCluster,
    store::{ManifestApplier, ObjectStore},
    Context, Error, Result,
};

#[derive(Clone, Debug, Default)]
pub struct RegisterOptions {
    /// Hub address reachable from the spoke, when cluster-info advertises an
    /// internal one
    pub hub_api_server: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Registration {
    Accepted,
    Denied { csrs: Vec<String> },
}

/// Joins `spoke` to the hub behind `hub`, one step after the other.
pub async fn register_cluster<H, S>(
    hub: &Context<H>,
    spoke: &SpokeCluster<S>,
    options: &RegisterOptions,
) -> Result<Registration>
where
    H: ObjectStore + ManifestApplier,
    S: ObjectStore + ManifestApplier,
{
    let cluster = spoke.name.as_str();

    info!(cluster, "generating the bootstrap kubeconfig for the spoke");
    let hub_kubeconfig = build_spoke_bootstrap_config(hub, options.hub_api_server.as_deref())
        .await
        .map_err(|error| step_failed(cluster, "build bootstrap kubeconfig", error))?;

    info!(cluster, "preparing the spoke cluster environment");
    spoke
        .init_spoke_cluster_env(&hub_kubeconfig)
        .await
        .map_err(|error| step_failed(cluster, "prepare spoke", error))?;

    info!(cluster, "waiting for the spoke registration request");
    wait_until_spoke_visible(hub, cluster)
        .await
        .map_err(|error| step_failed(cluster, "wait for registration request", error))?;

    info!(cluster, "approving the spoke certificate signing requests");
    let outcome = approve_and_accept(hub, cluster)
        .await
        .map_err(|error| step_failed(cluster, "approve spoke", error))?;

    Ok(match outcome {
        ApprovalOutcome::Accepted => {
            info!(cluster, "successfully registered cluster");
            Registration::Accepted
        }
        ApprovalOutcome::Denied { csrs } => {
            warn!(cluster, ?csrs, "registration was denied");
            Registration::Denied { csrs }
        }
    })
}

fn step_failed(cluster: &str, step: &str, error: Error) -> Error {
    error!(cluster, step, "registration failed: {error}");
    error
}
