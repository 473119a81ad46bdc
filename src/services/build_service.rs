//! Build service - turns uploaded tarballs into slugs
//!
//! Deploys build under `deploys/{app}/{id}/`; named builds live under
//! `builds/{app}/{name}/` and can be listed, run and deleted later.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io::{Cursor, SeekFrom};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::TeresaConfig;
use crate::domain::app::{App, User};
use crate::domain::build::{
    build_name_of, build_pod_name, build_prefix, build_run_pod_name, BuildDescriptor,
};
use crate::domain::spec::{
    run_labels, BuildPodBuilder, RunnerPodBuilder, ServicePort, ServiceSpec,
};
use crate::error::{BuildError, ClusterError, ExecError, TeresaError};
use crate::infrastructure::cluster::ServiceCluster;
use crate::infrastructure::registry::AppRegistry;
use crate::infrastructure::storage::{ReadSeek, Storage};
use crate::services::exec_service::{follow, ExecService};
use crate::stream::{Completion, OpContext, Progress};

/// Inputs of a single build
pub struct CreateOptions<'a> {
    pub app: &'a App,
    /// Also names the builder pod, `build-{build_name}`
    pub build_name: String,
    pub slug_in: String,
    pub slug_dest: String,
    pub tarball: &'a mut dyn ReadSeek,
    pub progress: Progress,
}

/// A stored named build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildListItem {
    pub name: String,
    pub last_modified: DateTime<Utc>,
}

/// Collapse build failures: only a timeout or a caller cancellation keeps its identity
fn build_failure(err: ExecError) -> BuildError {
    match err {
        ExecError::Timeout => BuildError::Timeout,
        ExecError::NonZeroExitCode { .. } | ExecError::PodFailed { .. } => BuildError::BuildFailed,
        other => BuildError::Exec(other),
    }
}

fn validate_build_name(name: &str) -> Result<(), BuildError> {
    if name.trim().is_empty() || name.contains('/') || name.contains("..") {
        return Err(BuildError::InvalidBuildName {
            name: name.to_string(),
        });
    }
    Ok(())
}

#[derive(Clone)]
pub struct BuildService {
    exec: ExecService,
    services: Arc<dyn ServiceCluster>,
    registry: Arc<dyn AppRegistry>,
    storage: Arc<dyn Storage>,
    config: Arc<TeresaConfig>,
}

impl BuildService {
    pub fn new(
        exec: ExecService,
        services: Arc<dyn ServiceCluster>,
        registry: Arc<dyn AppRegistry>,
        storage: Arc<dyn Storage>,
        config: Arc<TeresaConfig>,
    ) -> Self {
        Self {
            exec,
            services,
            registry,
            storage,
            config,
        }
    }

    /// Upload the tarball and run the builder pod, teeing its output to `progress`
    pub async fn create_by_opts(
        &self,
        ctx: &OpContext,
        opts: CreateOptions<'_>,
    ) -> Result<(), BuildError> {
        let CreateOptions {
            app,
            build_name,
            slug_in,
            slug_dest,
            tarball,
            progress,
        } = opts;

        tarball
            .seek(SeekFrom::Start(0))
            .map_err(|e| BuildError::Storage(anyhow::Error::new(e).context("rewind tarball")))?;
        if let Err(e) = self.storage.upload_file(&slug_in, tarball).await {
            progress
                .line("The Build failed to upload the TarBall to slug storage")
                .await;
            return Err(BuildError::Storage(e));
        }
        debug!(app = %app.name, path = %slug_in, "tarball uploaded");

        let storage = self.storage.info();
        let pod = BuildPodBuilder::new(
            build_pod_name(&build_name),
            &self.config.images.slug_builder,
            app,
            &storage,
        )
        .with_tarball_path(&slug_in)
        .send_slug_to(&slug_dest)
        .with_limits(&self.config.build_limits.to_container_limits())
        .build();

        info!(app = %app.name, build_id = %build_name, "starting build");
        let (lines, outcome) = self
            .exec
            .run_command_by_spec(ctx, &pod)
            .await
            .map_err(|e| match e {
                ExecError::Cluster(ClusterError::Invalid { .. }) => BuildError::InvalidBuildName {
                    name: build_name.clone(),
                },
                other => BuildError::Exec(other),
            })?;

        follow(lines, outcome, &progress).await.map_err(|e| {
            warn!(app = %app.name, build_id = %build_name, error = %e, "build failed");
            build_failure(e)
        })
    }

    /// Build `tarball` as the named build `name`, optionally running it afterwards
    pub async fn create(
        &self,
        ctx: &OpContext,
        user: &User,
        app_name: &str,
        name: &str,
        tarball: Vec<u8>,
        run_app: bool,
    ) -> Result<(mpsc::Receiver<String>, Completion), TeresaError> {
        let app = self.registry.check_perm_and_get(user, app_name).await?;
        validate_build_name(name)?;

        let this = self.clone();
        let ctx = ctx.clone();
        let app_name = app.name.clone();
        let name = name.to_string();
        Ok(self.spawn(&app_name, move |progress| async move {
            let desc = BuildDescriptor::named(&app.name, &name);
            let mut cursor = Cursor::new(tarball);
            this.create_by_opts(
                &ctx,
                CreateOptions {
                    app: &app,
                    build_name: name.clone(),
                    slug_in: desc.source_location.clone(),
                    slug_dest: desc.artifact_destination.clone(),
                    tarball: &mut cursor,
                    progress: progress.clone(),
                },
            )
            .await?;
            progress.line(format!("Build {} created", name)).await;

            if run_app {
                this.run_slug(&ctx, &app, &desc.slug_url(), &progress).await?;
            }
            Ok(())
        }))
    }

    /// Named builds of an app, sorted by name
    pub async fn list(&self, user: &User, app_name: &str) -> Result<Vec<BuildListItem>, TeresaError> {
        let app = self.registry.check_perm_and_get(user, app_name).await?;
        let objects = self
            .storage
            .list(&build_prefix(&app.name, None))
            .await
            .map_err(BuildError::Storage)?;

        let mut builds: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();
        for object in objects {
            let Some(name) = build_name_of(&app.name, &object.name) else {
                continue;
            };
            let latest = builds.entry(name).or_insert(object.last_modified);
            if object.last_modified > *latest {
                *latest = object.last_modified;
            }
        }
        Ok(builds
            .into_iter()
            .map(|(name, last_modified)| BuildListItem {
                name,
                last_modified,
            })
            .collect())
    }

    pub async fn delete(&self, user: &User, app_name: &str, name: &str) -> Result<(), TeresaError> {
        let app = self.registry.check_perm_and_get(user, app_name).await?;
        validate_build_name(name)?;
        self.storage
            .delete(&build_prefix(&app.name, Some(name)))
            .await
            .map_err(BuildError::Storage)?;
        info!(app = %app.name, build = %name, user = %user.email, "build deleted");
        Ok(())
    }

    /// Run a stored build in a throwaway pod until it exits or `ctx` ends
    pub async fn run(
        &self,
        ctx: &OpContext,
        user: &User,
        app_name: &str,
        name: &str,
    ) -> Result<(mpsc::Receiver<String>, Completion), TeresaError> {
        let app = self.registry.check_perm_and_get(user, app_name).await?;
        validate_build_name(name)?;
        let stored = self
            .storage
            .list(&build_prefix(&app.name, Some(name)))
            .await
            .map_err(BuildError::Storage)?;
        if stored.is_empty() {
            return Err(BuildError::InvalidBuildName {
                name: name.to_string(),
            }
            .into());
        }

        let this = self.clone();
        let ctx = ctx.clone();
        let slug = BuildDescriptor::named(&app.name, name).slug_url();
        let app_name = app.name.clone();
        Ok(self.spawn(&app_name, move |progress| async move {
            this.run_slug(&ctx, &app, &slug, &progress).await
        }))
    }

    /// Run `op` in its own task, streaming through a fresh progress channel
    fn spawn<F, Fut>(&self, app: &str, op: F) -> (mpsc::Receiver<String>, Completion)
    where
        F: FnOnce(Progress) -> Fut,
        Fut: std::future::Future<Output = Result<(), TeresaError>> + Send + 'static,
    {
        let (progress, lines) = Progress::channel();
        let (done_tx, done) = oneshot::channel();
        let fut = op(progress);
        let app = app.to_string();
        tokio::spawn(async move {
            let result = fut.await;
            if let Err(e) = &result {
                error!(app = %app, error = %e, "build operation failed");
            }
            if done_tx.send(result).is_err() {
                debug!(app = %app, "nobody waiting for the build outcome");
            }
        });
        (lines, done)
    }

    async fn run_slug(
        &self,
        ctx: &OpContext,
        app: &App,
        slug: &str,
        progress: &Progress,
    ) -> Result<(), TeresaError> {
        let pod_name = build_run_pod_name(&app.name, &self.exec.next_id());
        let labels = run_labels(&pod_name);
        let storage = self.storage.info();
        let pod = RunnerPodBuilder::new(
            &pod_name,
            &self.config.images.slug_runner,
            &self.config.images.slug_store,
            app,
            &storage,
        )
        .with_slug(slug)
        .with_args(vec!["start".to_string(), app.process_type.clone()])
        .with_limits(&self.config.exec_limits.to_container_limits())
        .with_labels(&labels)
        .build();

        let web = app.is_web();
        let pods = self.exec.pods();
        let services = self.services.clone();
        let _cleanup = scopeguard::guard(
            (app.name.clone(), pod_name.clone()),
            move |(namespace, name)| {
                tokio::spawn(async move {
                    match pods.delete_pod(&namespace, &name).await {
                        Err(e) if !e.is_not_found() => {
                            warn!(pod = %name, error = %e, "failed to delete build run pod")
                        }
                        _ => {}
                    }
                    if web {
                        if let Err(e) = services.delete_service(&namespace, &name).await {
                            warn!(service = %name, error = %e, "failed to delete build run service");
                        }
                    }
                });
            },
        );

        let (lines, outcome) = self.exec.run_command_by_spec(ctx, &pod).await?;

        let announcer = if web {
            let svc = ServiceSpec::new(
                &app.name,
                &pod_name,
                &self.config.default_service_type,
                vec![ServicePort::default_named(&app.protocol)],
                labels,
            );
            self.services.create_service(&svc).await?;
            progress.line("Waiting for the app address").await;

            let services = self.services.clone();
            let progress = progress.clone();
            let (namespace, name) = (app.name.clone(), pod_name.clone());
            Some(tokio::spawn(async move {
                match services.service_address(&namespace, &name).await {
                    Ok(addrs) => {
                        for addr in addrs {
                            progress.line(format!("App available at {}", addr)).await;
                        }
                    }
                    Err(e) => warn!(service = %name, error = %e, "no address for build run"),
                }
            }))
        } else {
            None
        };

        let result = follow(lines, outcome, progress).await;
        if let Some(handle) = announcer {
            handle.abort();
        }
        result.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::build::SequentialGenerator;
    use crate::error::{AppError, ErrorKind};
    use crate::infrastructure::cluster::PodExit;
    use crate::infrastructure::fake::FakeCluster;
    use crate::infrastructure::registry::{RegistryDocument, Team, YamlRegistry};
    use crate::infrastructure::storage::FileStorage;
    use crate::infrastructure::tarball::tests::tarball;

    struct Fixture {
        cluster: Arc<FakeCluster>,
        service: BuildService,
        dir: tempfile::TempDir,
    }

    fn fixture_with(app: App) -> Fixture {
        let mut doc = RegistryDocument::default();
        doc.teams.insert(
            "luizalabs".to_string(),
            Team {
                members: vec!["gopher@luizalabs.com".to_string()],
            },
        );
        doc.apps.insert(app.name.clone(), app);
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(FakeCluster::new());
        let registry = Arc::new(YamlRegistry::new(doc));
        let storage = Arc::new(FileStorage::new(dir.path()));
        let config = Arc::new(TeresaConfig::default());
        let exec = ExecService::new(
            cluster.clone(),
            registry.clone(),
            storage.clone(),
            Arc::new(SequentialGenerator::new("id")),
            config.clone(),
        );
        let service = BuildService::new(exec, cluster.clone(), registry, storage, config);
        Fixture {
            cluster,
            service,
            dir,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(App::new("myapp", "luizalabs"))
    }

    fn user() -> User {
        User::new("gopher", "gopher@luizalabs.com")
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(line) = rx.try_recv() {
            out.push(line);
        }
        out
    }

    async fn collect(mut rx: mpsc::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(line) = rx.recv().await {
            out.push(line);
        }
        out
    }

    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition never held");
    }

    async fn build_once(f: &Fixture) -> (Result<(), BuildError>, Vec<String>) {
        let app = App::new("myapp", "luizalabs");
        let (progress, mut lines) = Progress::channel();
        let mut cursor = Cursor::new(tarball(&[("Procfile", "web: python app.py")]));
        let desc = BuildDescriptor::for_deploy("myapp", "b1");
        let result = f
            .service
            .create_by_opts(
                &OpContext::background(),
                CreateOptions {
                    app: &app,
                    build_name: "b1".to_string(),
                    slug_in: desc.source_location.clone(),
                    slug_dest: desc.artifact_destination.clone(),
                    tarball: &mut cursor,
                    progress,
                },
            )
            .await;
        (result, drain(&mut lines))
    }

    #[tokio::test]
    async fn test_create_by_opts_uploads_and_builds() {
        let f = fixture();
        f.cluster
            .script_pod(&["-----> Python app detected", "done"], PodExit::Code(0));

        let (result, lines) = build_once(&f).await;
        result.unwrap();
        assert_eq!(lines, vec!["-----> Python app detected", "done"]);
        assert!(f.dir.path().join("deploys/myapp/b1/in/app.tgz").exists());

        let state = f.cluster.state();
        let pod = &state.pods[0];
        assert_eq!(pod.name, "build-b1");
        let builder = pod.app_container().unwrap();
        assert_eq!(builder.env["TAR_PATH"], "deploys/myapp/b1/in/app.tgz");
        assert_eq!(builder.env["PUT_PATH"], "deploys/myapp/b1/out");
        assert_eq!(builder.limits.as_ref().unwrap().memory, "1024Mi");
    }

    #[tokio::test]
    async fn test_create_by_opts_failures() {
        let f = fixture();
        f.cluster.script_pod(&["compile error"], PodExit::Code(1));
        let (result, _) = build_once(&f).await;
        assert!(matches!(result, Err(BuildError::BuildFailed)));

        f.cluster.script_pod(&[], PodExit::Timeout);
        let (result, _) = build_once(&f).await;
        assert!(matches!(result, Err(BuildError::Timeout)));

        f.cluster.state().reject_pods = true;
        let (result, _) = build_once(&f).await;
        assert!(matches!(result, Err(BuildError::InvalidBuildName { ref name }) if name == "b1"));
    }

    #[tokio::test]
    async fn test_named_build_list_and_delete() {
        let f = fixture();
        for name in ["v1", "v2"] {
            let (lines, done) = f
                .service
                .create(
                    &OpContext::background(),
                    &user(),
                    "myapp",
                    name,
                    tarball(&[("app.py", "print(1)")]),
                    false,
                )
                .await
                .unwrap();
            let out = collect(lines).await;
            assert_eq!(out.last().unwrap(), &format!("Build {} created", name));
            done.await.unwrap().unwrap();
        }

        let builds = f.service.list(&user(), "myapp").await.unwrap();
        let names: Vec<_> = builds.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["v1", "v2"]);

        f.service.delete(&user(), "myapp", "v1").await.unwrap();
        let builds = f.service.list(&user(), "myapp").await.unwrap();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].name, "v2");
    }

    #[tokio::test]
    async fn test_build_ops_check_permission() {
        let f = fixture();
        let stranger = User::new("x", "x@example.com");
        let err = f.service.list(&stranger, "myapp").await.unwrap_err();
        assert!(matches!(err, TeresaError::App(AppError::PermissionDenied)));
        let err = f.service.list(&user(), "nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_run_unknown_build_is_invalid() {
        let f = fixture();
        let err = f
            .service
            .run(&OpContext::background(), &user(), "myapp", "v9")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(f.cluster.pod_names().is_empty());
    }

    #[tokio::test]
    async fn test_run_web_build_cleans_up() {
        let f = fixture();
        let (lines, done) = f
            .service
            .create(
                &OpContext::background(),
                &user(),
                "myapp",
                "v1",
                tarball(&[("app.py", "print(1)")]),
                false,
            )
            .await
            .unwrap();
        collect(lines).await;
        done.await.unwrap().unwrap();

        f.cluster.script_pod(&["listening on 5000"], PodExit::Code(0));
        let (lines, done) = f
            .service
            .run(&OpContext::background(), &user(), "myapp", "v1")
            .await
            .unwrap();
        let out = collect(lines).await;
        done.await.unwrap().unwrap();
        assert!(out.contains(&"listening on 5000".to_string()));
        assert!(out.contains(&"Waiting for the app address".to_string()));

        let pod_name = "build-run-myapp-id1";
        {
            let state = f.cluster.state();
            let pod = state.pods.last().unwrap();
            assert_eq!(pod.name, pod_name);
            assert_eq!(pod.labels["run"], pod_name);
            assert_eq!(
                pod.app_container().unwrap().env["SLUG_URL"],
                "builds/myapp/v1/out/slug.tgz"
            );
        }

        let key = format!("myapp/{}", pod_name);
        eventually(|| f.cluster.state().deleted_pods.contains(&key)).await;
        eventually(|| f.cluster.state().deleted_services.contains(&key)).await;
        assert!(!f.cluster.state().services.contains_key(&key));
    }

    #[tokio::test]
    async fn test_run_worker_build_has_no_service() {
        let f = fixture_with(App::new("myapp", "luizalabs").with_process_type("worker"));
        let (lines, done) = f
            .service
            .create(
                &OpContext::background(),
                &user(),
                "myapp",
                "v1",
                tarball(&[("app.py", "print(1)")]),
                true,
            )
            .await
            .unwrap();
        collect(lines).await;
        done.await.unwrap().unwrap();

        assert_eq!(f.cluster.pod_names(), vec!["build-v1", "build-run-myapp-id1"]);
        eventually(|| !f.cluster.state().deleted_pods.is_empty()).await;
        assert!(f.cluster.state().services.is_empty());
        assert!(f.cluster.state().deleted_services.is_empty());
    }
}
