//! App views combining the registry with live cluster state

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::domain::app::{AppInfo, AppListItem, User};
use crate::error::TeresaError;
use crate::infrastructure::cluster::{AppCluster, LogOptions};
use crate::infrastructure::registry::AppRegistry;
use crate::stream::{OpContext, PROGRESS_BUFFER};

/// Log line prefixed with the pod it came from
pub fn pod_line(pod: &str, line: &str) -> String {
    format!("[{}] - {}", pod, line)
}

#[derive(Clone)]
pub struct AppService {
    cluster: Arc<dyn AppCluster>,
    registry: Arc<dyn AppRegistry>,
}

impl AppService {
    pub fn new(cluster: Arc<dyn AppCluster>, registry: Arc<dyn AppRegistry>) -> Self {
        Self { cluster, registry }
    }

    /// App details with addresses and the live replica count (0 when never deployed)
    pub async fn info(&self, user: &User, app_name: &str) -> Result<AppInfo, TeresaError> {
        let app = self.registry.check_perm_and_get(user, app_name).await?;
        let addresses = self.cluster.address_list(&app.name).await?;
        let replicas = match self.cluster.deploy_replicas(&app.name, &app.name).await {
            Ok(replicas) => replicas,
            Err(e) if e.is_not_found() => {
                debug!(app = %app.name, "no deployment, reporting zero replicas");
                0
            }
            Err(e) => return Err(e.into()),
        };
        let mut info = AppInfo::new(&app, addresses, replicas);
        match self.cluster.autoscale(&app.name, &app.name).await {
            Ok(live) => info.auto_scale = Some(live),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(app = %app.name, error = %e, "failed to read live autoscale"),
        }
        Ok(info)
    }

    /// Interleaved logs of the running pods of an app.
    ///
    /// A pod whose log cannot be opened is skipped. The stream ends when
    /// every pod log ends, when `ctx` is canceled or when the receiver is
    /// dropped.
    pub async fn logs(
        &self,
        ctx: &OpContext,
        user: &User,
        app_name: &str,
        opts: LogOptions,
    ) -> Result<mpsc::Receiver<String>, TeresaError> {
        let app = self.registry.check_perm_and_get(user, app_name).await?;
        let pods = self.cluster.pod_list(&app.name, &app.name).await?;

        let (tx, rx) = mpsc::channel(PROGRESS_BUFFER);
        let mut following = 0;
        for pod in pods.into_iter().filter(|p| p.is_running()) {
            let mut lines = match self.cluster.pod_logs(&app.name, &pod.name, opts).await {
                Ok(lines) => lines,
                Err(e) => {
                    error!(app = %app.name, pod = %pod.name, error = %e, "failed to open pod logs");
                    continue;
                }
            };
            following += 1;

            let tx = tx.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                loop {
                    let line = tokio::select! {
                        biased;
                        _ = ctx.done() => break,
                        _ = tx.closed() => break,
                        line = lines.recv() => match line {
                            Some(line) => line,
                            None => break,
                        },
                    };
                    if tx.send(pod_line(&pod.name, &line)).await.is_err() {
                        break;
                    }
                }
                debug!(pod = %pod.name, "pod log closed");
            });
        }
        info!(app = %app.name, user = %user.email, pods = following, follow = opts.follow, "streaming logs");
        Ok(rx)
    }

    /// Apps visible to `user`; an unreachable namespace lists without addresses
    pub async fn list(&self, user: &User) -> Result<Vec<AppListItem>, TeresaError> {
        let apps = self.registry.list(user).await?;
        let mut items = Vec::with_capacity(apps.len());
        for app in &apps {
            let addresses = match self.cluster.address_list(&app.name).await {
                Ok(addresses) => addresses,
                Err(e) => {
                    warn!(app = %app.name, error = %e, "failed to read app addresses");
                    Vec::new()
                }
            };
            items.push(AppListItem::new(app, addresses));
        }
        Ok(items)
    }
}
