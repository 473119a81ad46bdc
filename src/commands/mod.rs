//! Subcommand implementations
//!
//! Every command runs against one [`Runtime`]: the services wired to the
//! cluster, the file storage and the YAML registry named by the config.

pub mod apps;
pub mod build;
pub mod cloud;
pub mod deploy;
pub mod env;
pub mod exec;
pub mod releases;
pub mod render;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use teresa_core::config::TeresaConfig;
use teresa_core::domain::{IdGenerator, User, UuidGenerator};
use teresa_core::error::{ClusterError, TeresaError};
use teresa_core::infrastructure::cluster::kube::GatewayOptions;
use teresa_core::infrastructure::{FileStorage, KubeGateway, YamlRegistry};
use teresa_core::services::exec_service::ExecOutcome;
use teresa_core::services::{
    AppService, BuildService, CloudProvider, CloudService, DeployService, ExecService,
};
use teresa_core::stream::{relay, Completion, LineSink, OpContext, KEEP_ALIVE_MARKER};

/// Services shared by the subcommands
pub struct Runtime {
    pub config: Arc<TeresaConfig>,
    pub user: User,
    pub exec: ExecService,
    pub build: BuildService,
    pub deploy: DeployService,
    pub apps: AppService,
    pub cloud: CloudService,
}

impl Runtime {
    pub async fn connect(config: TeresaConfig, email: &str) -> Result<Self> {
        let config = Arc::new(config);
        let gateway = Arc::new(
            KubeGateway::connect(GatewayOptions::from(config.as_ref()))
                .await
                .context("Failed to connect to the cluster")?,
        );
        let registry = Arc::new(YamlRegistry::load(&config.registry_path)?);
        let storage = Arc::new(FileStorage::new(&config.storage_root));
        let ids: Arc<dyn IdGenerator> = Arc::new(UuidGenerator);

        let exec = ExecService::new(
            gateway.clone(),
            registry.clone(),
            storage.clone(),
            ids,
            config.clone(),
        );
        let build = BuildService::new(
            exec.clone(),
            gateway.clone(),
            registry.clone(),
            storage.clone(),
            config.clone(),
        );
        let deploy = DeployService::new(
            build.clone(),
            exec.clone(),
            gateway.clone(),
            registry.clone(),
            storage.clone(),
            config.clone(),
        );
        let provider = CloudProvider::detect(gateway.as_ref()).await;
        let cloud = CloudService::new(provider, gateway.clone(), registry.clone());
        let apps = AppService::new(gateway, registry);

        info!(
            registry = %config.registry_path.display(),
            storage = %config.storage_root.display(),
            user = %email,
            provider = provider.name(),
            "runtime ready"
        );
        Ok(Self {
            user: user_from_email(email),
            config,
            exec,
            build,
            deploy,
            apps,
            cloud,
        })
    }

    /// Relay a streamed operation to stdout
    pub async fn stream(
        &self,
        ctx: &OpContext,
        lines: mpsc::Receiver<String>,
        done: Completion,
    ) -> Result<(), TeresaError> {
        let mut sink = StdoutSink;
        relay(
            self.config.keep_alive_interval,
            lines,
            done,
            ctx,
            &mut sink,
        )
        .await
    }
}

/// Context canceled by the first Ctrl-C
pub fn interruptible() -> OpContext {
    let (handle, ctx) = OpContext::cancellable();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received, canceling");
            handle.cancel();
        }
    });
    ctx
}

/// Lift a pod outcome into a stream completion
pub fn completion(outcome: ExecOutcome) -> Completion {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let result = match outcome.await {
            Ok(res) => res.map_err(TeresaError::from),
            Err(_) => Err(ClusterError::Internal(anyhow::anyhow!(
                "pod run ended without a result"
            ))
            .into()),
        };
        if tx.send(result).is_err() {
            debug!("nobody waiting for the command outcome");
        }
    });
    rx
}

/// Completion of an operation whose only output is its line stream
pub fn stream_only() -> Completion {
    let (tx, rx) = oneshot::channel();
    if tx.send(Ok(())).is_err() {
        debug!("stream completion dropped early");
    }
    rx
}

fn user_from_email(email: &str) -> User {
    let name = email.split('@').next().unwrap_or(email);
    User::new(name, email)
}

pub fn read_tarball(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read tarball {}", path.display()))
}

/// Prints streamed lines; keep-alive markers only matter to network transports
struct StdoutSink;

#[async_trait]
impl LineSink for StdoutSink {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        if line == KEEP_ALIVE_MARKER {
            return Ok(());
        }
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line).context("Failed to write to stdout")?;
        stdout.flush().context("Failed to flush stdout")
    }
}

pub fn keep_alive_override(config: &mut TeresaConfig, keep_alive: Option<Duration>) {
    if let Some(interval) = keep_alive {
        debug!(interval = %humantime::format_duration(interval), "keep-alive overridden");
        config.keep_alive_interval = interval;
    }
}
