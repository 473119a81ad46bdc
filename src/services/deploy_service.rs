//! Deploy service - orchestrates the deploy pipeline
//!
//! A deploy walks the [`DeployStage`]s strictly in order: permission check,
//! config extraction, build, the optional release command, apply, expose and
//! the rollout monitor. Every stage writes a start line and a closing line
//! to the caller; the first failure ends the pipeline with a line naming the
//! stage. Revisions, rollback, env vars, replicas and autoscaling of the live
//! deployment are managed here too.

use std::collections::{BTreeMap, VecDeque};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::TeresaConfig;
use crate::domain::app::{is_protected_env_var, App, AutoScale, EnvVar, User};
use crate::domain::build::{release_pod_name, BuildDescriptor};
use crate::domain::deploy::{cron_success_line, failure_line, success_line};
use crate::domain::spec::sidecar::NGINX_CONF_FILE;
use crate::domain::spec::{
    run_labels, CloudSqlProxy, CronJobBuilder, CronJobSpec, DeployBuilder, DeploySpec,
    RunnerPodBuilder, StorageInfo, RUN_LABEL, SLUG_ANNOTATION,
};
use crate::domain::{DeployOptions, DeployStage, StageOutcome, StageResult};
use crate::error::{AppError, DeployError, ExecError, TeresaError};
use crate::infrastructure::cluster::{DeployCluster, ReplicaSetListItem, RolloutOutcome};
use crate::infrastructure::registry::AppRegistry;
use crate::infrastructure::storage::Storage;
use crate::infrastructure::tarball::{self, DeployConfigFiles, RELEASE_PROCESS};
use crate::services::build_service::{BuildService, CreateOptions};
use crate::services::exec_service::{follow, ExecService};
use crate::stream::{Completion, OpContext, Progress};

/// Service type of apps flagged as internal
const INTERNAL_SERVICE_TYPE: &str = "ClusterIP";

/// State carried from one stage to the next
struct DeployRun {
    user: User,
    opts: DeployOptions,
    tarball: Cursor<Vec<u8>>,
    app: Option<App>,
    files: DeployConfigFiles,
    build: Option<BuildDescriptor>,
}

impl DeployRun {
    fn app(&self) -> Result<&App, DeployError> {
        self.app.as_ref().ok_or(DeployError::StageOutOfOrder {
            stage: DeployStage::PermissionCheck.name(),
        })
    }

    fn build(&self) -> Result<&BuildDescriptor, DeployError> {
        self.build.as_ref().ok_or(DeployError::StageOutOfOrder {
            stage: DeployStage::Build.name(),
        })
    }
}

/// Warning a stage hands back instead of failing
type StageWarning = Option<String>;

/// Release pods fail as a whole; only timeouts and cancellation keep their identity
fn release_failure(err: ExecError) -> TeresaError {
    match err {
        ExecError::NonZeroExitCode { .. } | ExecError::PodFailed { .. } => {
            DeployError::ReleaseFailed.into()
        }
        other => other.into(),
    }
}

fn autoscale_line(auto_scale: &AutoScale) -> String {
    format!(
        "Autoscaling between {} and {} replicas at {}% cpu",
        auto_scale.min, auto_scale.max, auto_scale.cpu_target_utilization
    )
}

/// Workload applied by a deploy
#[derive(Debug, Clone, PartialEq)]
pub enum Workload {
    Deploy(DeploySpec),
    CronJob(CronJobSpec),
}

/// The app's nginx.conf, when it is a web app and an nginx image is configured
pub fn nginx_conf<'a>(
    config: &TeresaConfig,
    app: &App,
    files: &'a DeployConfigFiles,
) -> Option<&'a String> {
    files
        .nginx_conf
        .as_ref()
        .filter(|_| app.is_web() && !config.images.nginx.is_empty())
}

/// Build the workload for `slug_url` without touching the cluster
pub fn workload_spec(
    config: &TeresaConfig,
    storage: &StorageInfo,
    app: &App,
    files: &DeployConfigFiles,
    slug_url: &str,
    description: &str,
) -> Result<Workload, DeployError> {
    let runner = RunnerPodBuilder::new(
        &app.name,
        &config.images.slug_runner,
        &config.images.slug_store,
        app,
        storage,
    )
    .with_slug(slug_url);

    if app.is_cron() {
        let schedule = files
            .teresa_yaml
            .as_ref()
            .and_then(|ty| ty.cron_schedule())
            .ok_or(DeployError::CronScheduleNotFound)?;
        let command = files
            .procfile_entry(&app.process_type)
            .ok_or_else(|| DeployError::ProcessTypeNotFound {
                process_type: app.process_type.clone(),
            })?;
        let pod = runner
            .with_args(command.split_whitespace().map(String::from).collect())
            .build();
        return Ok(Workload::CronJob(
            CronJobBuilder::new(slug_url)
                .with_description(description)
                .with_schedule(schedule)
                .build(pod),
        ));
    }

    let labels = run_labels(&app.name);
    let mut runner = runner
        .with_labels(&labels)
        .with_args(vec!["start".to_string(), app.process_type.clone()]);
    if nginx_conf(config, app, files).is_some() {
        runner = runner.with_nginx_side_car(&config.images.nginx);
    }
    let csp = CloudSqlProxy::from_teresa_yaml(
        &config.images.cloudsql_proxy,
        files.teresa_yaml.as_ref(),
        app,
    )
    .map_err(|message| DeployError::InvalidConfigFile { message })?;
    let pod = runner.with_cloudsql_proxy_side_car(csp).build();

    Ok(Workload::Deploy(
        DeployBuilder::new(slug_url)
            .with_teresa_yaml(files.teresa_yaml.as_ref())
            .with_revision_history_limit(config.revision_history_limit)
            .with_description(description)
            .with_match_labels(&labels)
            .build(pod),
    ))
}

#[derive(Clone)]
pub struct DeployService {
    build: BuildService,
    exec: ExecService,
    deploys: Arc<dyn DeployCluster>,
    registry: Arc<dyn AppRegistry>,
    storage: Arc<dyn Storage>,
    config: Arc<TeresaConfig>,
}

impl DeployService {
    pub fn new(
        build: BuildService,
        exec: ExecService,
        deploys: Arc<dyn DeployCluster>,
        registry: Arc<dyn AppRegistry>,
        storage: Arc<dyn Storage>,
        config: Arc<TeresaConfig>,
    ) -> Self {
        Self {
            build,
            exec,
            deploys,
            registry,
            storage,
            config,
        }
    }

    /// Deploy `tarball` as a new revision of `opts.app_name`.
    ///
    /// Progress lines arrive on the receiver; the completion carries the
    /// outcome and must be awaited, EOF alone says nothing.
    pub fn deploy(
        &self,
        ctx: &OpContext,
        user: &User,
        opts: DeployOptions,
        tarball: Vec<u8>,
    ) -> (mpsc::Receiver<String>, Completion) {
        let (progress, lines) = Progress::channel();
        let (done_tx, done) = oneshot::channel();

        let this = self.clone();
        let ctx = ctx.clone();
        let run = DeployRun {
            user: user.clone(),
            opts,
            tarball: Cursor::new(tarball),
            app: None,
            files: DeployConfigFiles::default(),
            build: None,
        };
        tokio::spawn(async move {
            let app_name = run.opts.app_name.clone();
            let result = this.execute(&ctx, run, &progress).await;
            if done_tx.send(result).is_err() {
                debug!(app = %app_name, "nobody waiting for the deploy outcome");
            }
        });
        (lines, done)
    }

    async fn execute(
        &self,
        ctx: &OpContext,
        mut run: DeployRun,
        progress: &Progress,
    ) -> Result<(), TeresaError> {
        let app_name = run.opts.app_name.clone();
        let started = Instant::now();
        let mut results: Vec<StageResult> = Vec::new();
        let mut stages =
            VecDeque::from([DeployStage::PermissionCheck, DeployStage::ConfigExtraction]);
        debug!(app = %app_name, user = %run.user.email, "deploy started");

        while let Some(stage) = stages.pop_front() {
            progress.line(stage.start_line(&app_name)).await;

            let start = Instant::now();
            let result = match self.execute_stage(ctx, &mut run, stage, progress).await {
                Ok(None) => StageResult::success(stage, start.elapsed()),
                Ok(Some(warning)) => {
                    warn!(app = %app_name, stage = stage.name(), warning = %warning, "stage warning");
                    StageResult::warning(stage, start.elapsed(), warning)
                }
                Err(e) => {
                    error!(app = %app_name, stage = stage.name(), error = %e, "deploy failed");
                    let result = StageResult::failure(stage, start.elapsed(), e.safe_message());
                    progress.line(result.line(&app_name)).await;
                    results.push(result);
                    debug!(app = %app_name, stages = results.len(), "deploy aborted");
                    return Err(e);
                }
            };
            info!(
                app = %app_name,
                stage = stage.name(),
                "{} completed in {:.1}s",
                stage.name(),
                result.duration.as_secs_f64()
            );
            progress.line(result.line(&app_name)).await;
            results.push(result);

            if stage == DeployStage::ConfigExtraction {
                let app = run.app()?;
                stages.extend(
                    DeployStage::plan(
                        app,
                        run.files.has_release_command(),
                        self.config.monitor_rollout,
                    )
                    .into_iter()
                    .skip_while(|s| *s != DeployStage::Build),
                );
            }
        }

        let app = run.app()?;
        let warnings = results
            .iter()
            .filter(|r| matches!(r.outcome, StageOutcome::Warning(_)))
            .count();
        info!(
            app = %app_name,
            stages = results.len(),
            warnings,
            "deploy completed in {:.1}s",
            started.elapsed().as_secs_f64()
        );
        let line = if app.is_cron() {
            cron_success_line(&app.name)
        } else {
            success_line(&app.name)
        };
        progress.line(line).await;
        Ok(())
    }

    async fn execute_stage(
        &self,
        ctx: &OpContext,
        run: &mut DeployRun,
        stage: DeployStage,
        progress: &Progress,
    ) -> Result<StageWarning, TeresaError> {
        match stage {
            DeployStage::PermissionCheck => self.stage_permission_check(run).await,
            DeployStage::ConfigExtraction => self.stage_config_extraction(run),
            DeployStage::Build => self.stage_build(ctx, run, progress).await,
            DeployStage::ReleaseCommand => self.stage_release(ctx, run, progress).await,
            DeployStage::ApplyDeploy => self.stage_apply(run, progress).await,
            DeployStage::Expose => self.stage_expose(run, progress).await,
            DeployStage::RolloutMonitor => self.stage_rollout(ctx, run).await,
        }
    }

    async fn stage_permission_check(&self, run: &mut DeployRun) -> Result<StageWarning, TeresaError> {
        let mut app = self
            .registry
            .check_perm_and_get(&run.user, &run.opts.app_name)
            .await?;
        app.team = self.registry.team_name(&app.name).await?;
        run.app = Some(app);
        Ok(None)
    }

    fn stage_config_extraction(&self, run: &mut DeployRun) -> Result<StageWarning, TeresaError> {
        let (name, process_type) = {
            let app = run.app()?;
            (app.name.clone(), app.process_type.clone())
        };
        run.files = tarball::deploy_config_files(&mut run.tarball, &name, &process_type)?;
        debug!(
            app = %name,
            teresa_yaml = run.files.teresa_yaml.is_some(),
            procfile = run.files.procfile.is_some(),
            nginx = run.files.nginx_conf.is_some(),
            "deploy config extracted"
        );
        Ok(None)
    }

    async fn stage_build(
        &self,
        ctx: &OpContext,
        run: &mut DeployRun,
        progress: &Progress,
    ) -> Result<StageWarning, TeresaError> {
        let app = run.app()?.clone();
        let desc = BuildDescriptor::for_deploy(&app.name, self.exec.next_id());
        self.build
            .create_by_opts(
                ctx,
                CreateOptions {
                    app: &app,
                    build_name: desc.id.clone(),
                    slug_in: desc.source_location.clone(),
                    slug_dest: desc.artifact_destination.clone(),
                    tarball: &mut run.tarball,
                    progress: progress.clone(),
                },
            )
            .await?;
        run.build = Some(desc);
        Ok(None)
    }

    async fn stage_release(
        &self,
        ctx: &OpContext,
        run: &DeployRun,
        progress: &Progress,
    ) -> Result<StageWarning, TeresaError> {
        let app = run.app()?;
        let build = run.build()?;
        let storage = self.storage.info();
        let pod = RunnerPodBuilder::new(
            release_pod_name(&app.name, &build.id),
            &self.config.images.slug_runner,
            &self.config.images.slug_store,
            app,
            &storage,
        )
        .with_slug(build.slug_url())
        .with_args(vec!["start".to_string(), RELEASE_PROCESS.to_string()])
        .with_limits(&self.config.build_limits.to_container_limits())
        .build();

        let (lines, outcome) = self.exec.run_command_by_spec(ctx, &pod).await?;
        follow(lines, outcome, progress)
            .await
            .map_err(release_failure)?;
        Ok(None)
    }

    /// Apply the workload; the caller becomes the app's last editor once it is live
    async fn stage_apply(
        &self,
        run: &DeployRun,
        progress: &Progress,
    ) -> Result<StageWarning, TeresaError> {
        let app = run.app()?;
        let build = run.build()?;
        let workload = workload_spec(
            &self.config,
            &self.storage.info(),
            app,
            &run.files,
            &build.slug_url(),
            &run.opts.description,
        )?;

        match workload {
            Workload::CronJob(spec) => {
                self.deploys.create_or_update_cron_job(&spec).await?;
                info!(app = %app.name, schedule = %spec.schedule, "cron job applied");
            }
            Workload::Deploy(spec) => {
                match nginx_conf(&self.config, app, &run.files) {
                    Some(conf) => {
                        let data = BTreeMap::from([(NGINX_CONF_FILE.to_string(), conf.clone())]);
                        self.deploys
                            .create_or_update_config_map(&app.name, &app.name, data)
                            .await?;
                        progress.line("Using the nginx.conf from the app").await;
                    }
                    None => match self.deploys.delete_config_map(&app.name, &app.name).await {
                        Err(e) if !e.is_not_found() => return Err(e.into()),
                        _ => {}
                    },
                }
                self.deploys.create_or_update_deploy(&spec).await?;
                info!(app = %app.name, slug = %spec.slug_url, "deploy applied");

                if let Some(auto_scale) = &app.auto_scale {
                    auto_scale.validate()?;
                    self.deploys
                        .create_or_update_autoscale(&app.name, &app.name, auto_scale)
                        .await?;
                    progress.line(autoscale_line(auto_scale)).await;
                }
            }
        }

        if let Err(e) = self.registry.save_app(app, &run.user.email).await {
            warn!(
                app = %app.name,
                user = %run.user.email,
                error = %e,
                "failed to save last deploy user"
            );
        }
        Ok(None)
    }

    /// Failures here are warnings: the deploy is already live
    async fn stage_expose(
        &self,
        run: &DeployRun,
        progress: &Progress,
    ) -> Result<StageWarning, TeresaError> {
        let app = run.app()?;
        let service_type = if app.internal {
            INTERNAL_SERVICE_TYPE
        } else {
            self.config.default_service_type.as_str()
        };

        match self
            .deploys
            .expose_deploy(
                &app.name,
                &app.name,
                service_type,
                &app.protocol,
                &app.virtual_hosts,
            )
            .await
        {
            Ok(outcome) => {
                if outcome.service_created {
                    progress
                        .line(format!("Service {} created ({})", app.name, service_type))
                        .await;
                }
                if outcome.ingress_created {
                    progress.line(format!("Ingress {} created", app.name)).await;
                }
                Ok(None)
            }
            Err(e) => {
                warn!(app = %app.name, error = %e, "failed to expose app");
                let err = TeresaError::from(e);
                Ok(Some(format!(
                    "the app is deployed but could not be exposed: {}",
                    err.safe_message()
                )))
            }
        }
    }

    /// Wait for the new pods to replace the old ones; cancel stops the wait only
    async fn stage_rollout(&self, ctx: &OpContext, run: &DeployRun) -> Result<StageWarning, TeresaError> {
        let app = run.app()?;
        let timeout = self.config.rollout_timeout;
        let watch = tokio::time::timeout(timeout, self.deploys.watch_deploy(&app.name, &app.name));

        let outcome = tokio::select! {
            biased;
            err = ctx.done() => return Err(err.into()),
            res = watch => res.map_err(|_| DeployError::RolloutTimeout {
                waited: humantime::format_duration(timeout).to_string(),
            })??,
        };
        match outcome {
            RolloutOutcome::Finished => Ok(None),
            RolloutOutcome::Stalled => Err(DeployError::RolloutStalled.into()),
        }
    }

    /// Revisions of the app, newest first
    pub async fn list(
        &self,
        user: &User,
        app_name: &str,
    ) -> Result<Vec<ReplicaSetListItem>, TeresaError> {
        let app = self.registry.check_perm_and_get(user, app_name).await?;
        let mut items = self
            .deploys
            .replica_set_list_by_label(&app.name, RUN_LABEL, &app.name)
            .await?;
        items.sort_by_key(|item| std::cmp::Reverse(item.revision.parse::<u64>().unwrap_or(0)));
        Ok(items)
    }

    /// Roll the deployment back to `revision` and adopt that revision's env vars
    pub async fn rollback(
        &self,
        user: &User,
        app_name: &str,
        revision: &str,
    ) -> Result<(), TeresaError> {
        let mut app = self.registry.check_perm_and_get(user, app_name).await?;
        match self
            .deploys
            .deploy_rollback_to_revision(&app.name, &app.name, revision)
            .await
        {
            Err(e) if e.is_not_found() => {
                return Err(DeployError::RevisionNotFound {
                    revision: revision.to_string(),
                }
                .into())
            }
            other => other?,
        }

        let env = self
            .deploys
            .container_explicit_env_vars(&app.name, &app.name, &app.name)
            .await?;
        app.env_vars = env
            .into_iter()
            .filter(|ev| !is_protected_env_var(&ev.key))
            .collect();
        self.registry.save_app(&app, &user.email).await?;
        info!(app = %app.name, revision, user = %user.email, "rolled back");
        Ok(())
    }

    pub async fn set_env(
        &self,
        user: &User,
        app_name: &str,
        env_vars: &[EnvVar],
    ) -> Result<(), TeresaError> {
        let mut app = self.registry.check_perm_and_get(user, app_name).await?;
        app.set_env_vars(env_vars)?;
        self.apply_env(&app, env_vars, &[]).await?;
        self.registry.save_app(&app, &user.email).await?;
        info!(app = %app.name, count = env_vars.len(), user = %user.email, "env vars set");
        Ok(())
    }

    pub async fn unset_env(
        &self,
        user: &User,
        app_name: &str,
        keys: &[String],
    ) -> Result<(), TeresaError> {
        let mut app = self.registry.check_perm_and_get(user, app_name).await?;
        app.unset_env_vars(keys)?;
        self.apply_env(&app, &[], keys).await?;
        self.registry.save_app(&app, &user.email).await?;
        info!(app = %app.name, count = keys.len(), user = %user.email, "env vars unset");
        Ok(())
    }

    /// Push env changes to the live deployment, pinned to the slug it runs now
    async fn apply_env(
        &self,
        app: &App,
        set: &[EnvVar],
        unset: &[String],
    ) -> Result<(), TeresaError> {
        let Some(slug) = self.live_slug(app).await? else {
            debug!(app = %app.name, "nothing deployed, env saved only");
            return Ok(());
        };

        let mut set = set.to_vec();
        set.push(EnvVar::new("SLUG_URL", slug));
        self.deploys
            .update_container_env(&app.name, &app.name, &app.name, &set, unset)
            .await?;
        Ok(())
    }

    /// Slug the live deployment runs, `None` when nothing is deployed
    async fn live_slug(&self, app: &App) -> Result<Option<String>, TeresaError> {
        match self
            .exec
            .pods()
            .deploy_annotation(&app.name, &app.name, SLUG_ANNOTATION)
            .await
        {
            Ok(slug) => Ok(Some(slug)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Save the autoscaler bounds of the app and apply them to its live deployment
    pub async fn set_autoscale(
        &self,
        user: &User,
        app_name: &str,
        auto_scale: AutoScale,
    ) -> Result<(), TeresaError> {
        let mut app = self.registry.check_perm_and_get(user, app_name).await?;
        if app.is_cron() {
            return Err(AppError::InvalidAutoScale {
                reason: "cron jobs do not autoscale".to_string(),
            }
            .into());
        }
        auto_scale.validate()?;

        if self.live_slug(&app).await?.is_some() {
            self.deploys
                .create_or_update_autoscale(&app.name, &app.name, &auto_scale)
                .await?;
        } else {
            debug!(app = %app.name, "nothing deployed, autoscale saved only");
        }
        info!(
            app = %app.name,
            min = auto_scale.min,
            max = auto_scale.max,
            user = %user.email,
            "autoscale set"
        );
        app.auto_scale = Some(auto_scale);
        self.registry.save_app(&app, &user.email).await?;
        Ok(())
    }

    pub async fn scale(&self, user: &User, app_name: &str, replicas: i32) -> Result<(), TeresaError> {
        let app = self.registry.check_perm_and_get(user, app_name).await?;
        if replicas < 0 {
            return Err(DeployError::InvalidReplicas { replicas }.into());
        }
        self.deploys
            .deploy_set_replicas(&app.name, &app.name, replicas)
            .await?;
        info!(app = %app.name, replicas, user = %user.email, "scaled");
        Ok(())
    }
}
