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

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use cluster_register::{
    config::Args,
    driver::{register_cluster, RegisterOptions, Registration},
    spoke::SpokeCluster,
    Context, KubeStore,
};
use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use tracing::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cluster = args.cluster_name.clone();

    match run(args).await {
        Ok(Registration::Accepted) => std::process::exit(0),
        Ok(Registration::Denied { csrs }) => {
            error!(%cluster, ?csrs, "the hub denied the cluster registration");
            std::process::exit(1);
        }
        Err(error) => {
            error!(%cluster, "failed to register cluster: {error:#}");
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> anyhow::Result<Registration> {
    let hub_client = hub_client(args.hub_kubeconfig.as_deref()).await?;
    let hub_store = KubeStore::new(hub_client);

    let mut hub = Context::new(hub_store, Arc::new(args.hub_bundle()?));
    hub.timing = args.timing()?;

    let spoke_client = args
        .spoke_connection()?
        .client(&hub.store)
        .await
        .context("failed to connect to the spoke cluster")?;
    let mut spoke = SpokeCluster::new(
        args.cluster_name.as_str(),
        KubeStore::new(spoke_client),
        Arc::new(args.spoke_bundle()?),
    );
    spoke.images = args.images();

    let cancel = hub.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping registration");
            cancel.cancel();
        }
    });

    let options = RegisterOptions {
        hub_api_server: args.hub_api_server.clone(),
    };
    Ok(register_cluster(&hub, &spoke, &options).await?)
}

async fn hub_client(kubeconfig: Option<&Path>) -> anyhow::Result<Client> {
    let client = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("failed to read hub kubeconfig {}", path.display()))?;
            let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .context("failed to load hub kubeconfig")?;
            Client::try_from(config)?
        }
        None => Client::try_default()
            .await
            .context("failed to create hub client")?,
    };
    Ok(client)
}
