use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, SignalStream};
use tokio_stream::StreamMap;

use corral_core::tree::Tree;

use crate::adapt::{adapt, Adapted};
use crate::config::Config;
use crate::k8s::KubeApi;
use crate::reconcile::{sequence_destroyers, sequence_queriers, Observed};
use crate::secrets::{resolve_secrets, ClusterSecretReader};

/// The application object for when Corral is running as an operator.
pub struct App {
    /// The application's runtime config.
    config: Arc<Config>,
    /// The cluster client every pass reconciles against.
    kube: KubeApi,

    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,
}

impl App {
    /// Create a new instance.
    pub async fn new(config: Arc<Config>) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(10);
        let client = kube::Client::try_default().await.context("error initializing K8s client")?;
        Ok(Self {
            config,
            kube: KubeApi::new(client),
            shutdown_tx,
            shutdown_rx: BroadcastStream::new(shutdown_rx),
        })
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let mut signals = StreamMap::new();
        signals.insert("sigterm", SignalStream::new(signal(SignalKind::terminate()).context("error building signal stream")?));
        signals.insert("sigint", SignalStream::new(signal(SignalKind::interrupt()).context("error building signal stream")?));

        if self.config.destroy {
            return self.destroy_pass().await;
        }

        let mut interval = tokio::time::interval(self.config.reconcile_interval());
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.reconcile_pass().await {
                        tracing::error!(error = ?err, "reconciliation pass failed");
                    }
                }
                Some((_, sig)) = signals.next() => {
                    tracing::debug!(signal = ?sig, "signal received, beginning graceful shutdown");
                    let _ = self.shutdown_tx.send(());
                    break;
                }
                _ = self.shutdown_rx.next() => break,
            }
        }

        tracing::debug!("Corral Operator shutdown complete");
        Ok(())
    }

    /// Read and parse the desired-state document list.
    async fn desired_trees(&self) -> Result<Vec<Tree>> {
        let raw = tokio::fs::read_to_string(&self.config.desired_state_path)
            .await
            .with_context(|| format!("error reading desired state from {}", self.config.desired_state_path))?;
        Ok(Tree::list_from_yaml(&raw)?)
    }

    /// Adapt every document and resolve its credential slots. Document order
    /// is preserved; it is the order the pass reconciles in.
    async fn adapt_all(&self, trees: &[Tree]) -> Result<Vec<Adapted>> {
        let reader = ClusterSecretReader { kube: &self.kube };
        let mut adapted = Vec::with_capacity(trees.len());
        for tree in trees {
            let doc = adapt(tree, &self.config, &self.config.features)?;
            resolve_secrets(&reader, &self.config.namespace, &doc).await?;
            adapted.push(doc);
        }
        Ok(adapted)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn reconcile_pass(&self) -> Result<()> {
        let trees = self.desired_trees().await?;
        let queriers: Vec<_> = self.adapt_all(&trees).await?.into_iter().flat_map(|doc| doc.queriers).collect();

        let mut observed = Observed::default();
        let ensurer = sequence_queriers(false, &queriers, &self.kube, &mut observed).await?;
        ensurer.apply(&self.kube).await?;
        tracing::info!(documents = trees.len(), "reconciliation pass complete");
        Ok(())
    }

    /// Tear down everything the desired state describes, in reverse document
    /// order so that backups go before the database they reference.
    #[tracing::instrument(level = "debug", skip(self))]
    async fn destroy_pass(&self) -> Result<()> {
        let trees = self.desired_trees().await?;
        let destroyers: Vec<_> = self.adapt_all(&trees).await?.into_iter().rev().flat_map(|doc| doc.destroyers).collect();

        sequence_destroyers(destroyers).destroy(&self.kube).await?;
        tracing::info!(documents = trees.len(), "teardown complete");
        Ok(())
    }
}
