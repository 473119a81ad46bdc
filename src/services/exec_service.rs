//! Exec service - runs one-shot pods to completion
//!
//! Output lines are forwarded while the pod runs; the exit is resolved
//! separately so EOF on the output never reads as success.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::TeresaConfig;
use crate::domain::app::User;
use crate::domain::build::exec_pod_name;
use crate::domain::spec::{PodSpec, RunnerPodBuilder, SLUG_ANNOTATION};
use crate::domain::IdGenerator;
use crate::error::{ExecError, TeresaError};
use crate::infrastructure::cluster::{PodCluster, PodExit, PodRun};
use crate::infrastructure::registry::AppRegistry;
use crate::infrastructure::storage::Storage;
use crate::stream::{OpContext, Progress, PROGRESS_BUFFER};

/// Exit of a pod run as seen by the caller
pub type ExecOutcome = oneshot::Receiver<Result<(), ExecError>>;

/// Lifecycle of a one-shot pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Created,
    Starting,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Canceled,
}

impl RunState {
    /// Terminal state for a resolved run
    pub fn of(result: &Result<(), ExecError>) -> Self {
        match result {
            Ok(()) => Self::Succeeded,
            Err(ExecError::Timeout) => Self::TimedOut,
            Err(ExecError::Canceled | ExecError::DeadlineExceeded) => Self::Canceled,
            Err(_) => Self::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::Canceled
        )
    }
}

/// Map a pod exit to the run result; exit code 0 is the only success
pub fn exit_result(exit: PodExit) -> Result<(), ExecError> {
    match exit {
        PodExit::Code(0) => Ok(()),
        PodExit::Code(code) => Err(ExecError::NonZeroExitCode { code }),
        PodExit::Timeout => Err(ExecError::Timeout),
        PodExit::Failed(reason) => Err(ExecError::PodFailed { reason }),
    }
}

/// Copy `lines` to `progress` until the run resolves.
///
/// A failed run returns at once; a successful one drains the remaining
/// output first.
pub async fn follow(
    mut lines: mpsc::Receiver<String>,
    mut outcome: ExecOutcome,
    progress: &Progress,
) -> Result<(), ExecError> {
    let mut succeeded = false;
    loop {
        tokio::select! {
            biased;
            line = lines.recv() => match line {
                Some(line) => progress.line(line).await,
                None => break,
            },
            res = &mut outcome, if !succeeded => match res {
                Ok(Ok(())) => succeeded = true,
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(lost_outcome()),
            },
        }
    }
    if succeeded {
        return Ok(());
    }
    outcome.await.unwrap_or_else(|_| Err(lost_outcome()))
}

fn lost_outcome() -> ExecError {
    ExecError::PodFailed {
        reason: "pod supervisor stopped".to_string(),
    }
}

#[derive(Clone)]
pub struct ExecService {
    pods: Arc<dyn PodCluster>,
    registry: Arc<dyn AppRegistry>,
    storage: Arc<dyn Storage>,
    ids: Arc<dyn IdGenerator>,
    config: Arc<TeresaConfig>,
}

impl ExecService {
    pub fn new(
        pods: Arc<dyn PodCluster>,
        registry: Arc<dyn AppRegistry>,
        storage: Arc<dyn Storage>,
        ids: Arc<dyn IdGenerator>,
        config: Arc<TeresaConfig>,
    ) -> Self {
        Self {
            pods,
            registry,
            storage,
            ids,
            config,
        }
    }

    pub fn pods(&self) -> Arc<dyn PodCluster> {
        self.pods.clone()
    }

    pub fn next_id(&self) -> String {
        self.ids.next_id()
    }

    /// Start `pod` and return its output lines and its outcome.
    ///
    /// A canceled `ctx` deletes the pod in the background, resolves the
    /// outcome with the context error and closes the pod's log source even
    /// if the delete fails.
    pub async fn run_command_by_spec(
        &self,
        ctx: &OpContext,
        pod: &PodSpec,
    ) -> Result<(mpsc::Receiver<String>, ExecOutcome), ExecError> {
        debug!(pod = %pod.name, state = ?RunState::Created, "starting pod");
        let PodRun { mut output, exit } = self.pods.pod_run(pod).await?;
        debug!(pod = %pod.name, state = ?RunState::Starting, "pod submitted");

        let (line_tx, line_rx) = mpsc::channel(PROGRESS_BUFFER);
        let (done_tx, done_rx) = oneshot::channel();

        let name = pod.name.clone();
        let forward_ctx = ctx.clone();
        tokio::spawn(async move {
            let mut running = false;
            loop {
                let line = tokio::select! {
                    biased;
                    _ = forward_ctx.done() => {
                        debug!(pod = %name, "run canceled, closing pod output");
                        break;
                    }
                    _ = line_tx.closed() => break,
                    line = output.recv() => match line {
                        Some(line) => line,
                        None => break,
                    },
                };
                if !running {
                    debug!(pod = %name, state = ?RunState::Running, "pod output started");
                    running = true;
                }
                let sent = tokio::select! {
                    biased;
                    _ = forward_ctx.done() => false,
                    sent = line_tx.send(line) => sent.is_ok(),
                };
                if !sent {
                    break;
                }
            }
            drop(output);
        });

        let ctx = ctx.clone();
        let pods = self.pods.clone();
        let namespace = pod.namespace.clone();
        let name = pod.name.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                err = ctx.done() => {
                    let (pods, namespace, name) = (pods.clone(), namespace.clone(), name.clone());
                    tokio::spawn(async move {
                        if let Err(e) = pods.delete_pod(&namespace, &name).await {
                            warn!(pod = %name, error = %e, "failed to delete canceled pod");
                        }
                    });
                    Err(err)
                }
                exit = exit => match exit {
                    Ok(exit) => exit_result(exit),
                    Err(_) => Err(lost_outcome()),
                },
            };
            info!(pod = %name, state = ?RunState::of(&result), "pod run finished");
            if done_tx.send(result).is_err() {
                debug!(pod = %name, "nobody waiting for the pod outcome");
            }
        });

        Ok((line_rx, done_rx))
    }

    /// Run `command` against the slug currently deployed for `app_name`
    pub async fn run_command(
        &self,
        ctx: &OpContext,
        user: &User,
        app_name: &str,
        command: Vec<String>,
    ) -> Result<(mpsc::Receiver<String>, ExecOutcome), TeresaError> {
        let app = self.registry.check_perm_and_get(user, app_name).await?;

        let slug = match self
            .pods
            .deploy_annotation(&app.name, &app.name, SLUG_ANNOTATION)
            .await
        {
            Ok(slug) => slug,
            Err(e) if e.is_not_found() => {
                return Err(ExecError::DeployNotFound {
                    app: app.name.clone(),
                }
                .into())
            }
            Err(e) => return Err(ExecError::from(e).into()),
        };

        let storage = self.storage.info();
        let pod = RunnerPodBuilder::new(
            exec_pod_name(&app.name, &self.next_id()),
            &self.config.images.slug_runner,
            &self.config.images.slug_store,
            &app,
            &storage,
        )
        .with_slug(slug)
        .with_args(command)
        .with_limits(&self.config.exec_limits.to_container_limits())
        .build();

        info!(app = %app.name, user = %user.email, pod = %pod.name, "running command");
        Ok(self.run_command_by_spec(ctx, &pod).await?)
    }
}
