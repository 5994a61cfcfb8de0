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

use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use tracing::*;

use crate::{
    consts::*,
    poll::poll_immediate,
    store::{ManifestApplier, ObjectStore},
    Context, Error, NamespacedName, Result,
};

/// The hub identity whose token spoke agents bootstrap with.
#[derive(Clone, Debug, PartialEq)]
pub struct BootstrapIdentity {
    pub service_account: NamespacedName,
    /// Logical names, in the manifest bundle, of the service account and
    /// the RBAC it needs. Applied in order.
    pub manifests: Vec<String>,
}

impl Default for BootstrapIdentity {
    fn default() -> Self {
        Self {
            service_account: NamespacedName::new(
                OPEN_CLUSTER_MANAGEMENT_NAMESPACE,
                BOOTSTRAP_SA_NAME,
            ),
            manifests: [
                BOOTSTRAP_CLUSTER_ROLE_MANIFEST,
                BOOTSTRAP_CLUSTER_ROLE_BINDING_MANIFEST,
                BOOTSTRAP_SA_MANIFEST,
                BOOTSTRAP_TOKEN_SECRET_MANIFEST,
            ]
            .iter()
            .map(|name| name.to_string())
            .collect(),
        }
    }
}

/// Makes sure the bootstrap identity exists on the hub and returns its bearer
/// token once the token controller has populated it.
pub async fn issue_token<S>(ctx: &Context<S>) -> Result<String>
where
    S: ObjectStore + ManifestApplier,
{
    let sa = &ctx.identity.service_account;

    // resolve everything up front so a bad bundle fails before any write
    let manifests = ctx
        .identity
        .manifests
        .iter()
        .map(|name| ctx.manifests.get(name))
        .collect::<Result<Vec<_>>>()?;
    for manifest in manifests {
        ctx.store.apply(manifest).await.map_err(|error| {
            debug!(service_account = %sa, "failed to apply bootstrap identity: {error}");
            error
        })?;
    }

    let secret_name = poll_immediate(
        ctx.timing.token,
        &ctx.cancel,
        &format!("token secret reference on service account {sa}"),
        move || async move {
            let account: Option<ServiceAccount> =
                ctx.store.get(Some(sa.namespace.as_str()), &sa.name).await?;
            Ok::<_, Error>(account.and_then(|account| token_secret_name(&account, &sa.name)))
        },
    )
    .await
    .map_err(|error| {
        debug!(service_account = %sa, "{error}");
        error
    })?;
    debug!(service_account = %sa, secret = %secret_name, "found token secret");

    let secret = secret_name.as_str();
    let token = poll_immediate(
        ctx.timing.token,
        &ctx.cancel,
        &format!("token in secret {}/{secret}", sa.namespace),
        move || async move {
            let found: Option<Secret> =
                ctx.store.get(Some(sa.namespace.as_str()), secret).await?;
            Ok::<_, Error>(found.as_ref().map(secret_token).transpose()?.flatten())
        },
    )
    .await
    .map_err(|error| {
        debug!(service_account = %sa, "{error}");
        error
    })?;

    info!(service_account = %sa, "bootstrap token is ready");
    Ok(token)
}

// Returns the first secret referenced by the service account whose name is
// prefixed by the service account name.
fn token_secret_name(account: &ServiceAccount, sa_name: &str) -> Option<String> {
    account
        .secrets
        .as_ref()?
        .iter()
        .filter_map(|reference| reference.name.as_ref())
        .find(|name| name.starts_with(sa_name))
        .cloned()
}

// An absent or empty token is not ready yet. A token that is not UTF-8 is an
// error, so the deadline reports it.
fn secret_token(secret: &Secret) -> Result<Option<String>> {
    let Some(token) = secret.data.as_ref().and_then(|data| data.get("token")) else {
        return Ok(None);
    };
    let token = String::from_utf8(token.0.clone()).map_err(|_| {
        Error::InvalidHubConfig(format!(
            "token in secret {} is not valid UTF-8",
            secret.metadata.name.as_deref().unwrap_or_default()
        ))
    })?;
    Ok(Some(token).filter(|token| !token.is_empty()))
}
