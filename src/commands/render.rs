//! Render command
//!
//! Prints the objects a deploy of a tarball would apply, without a cluster.
//! Useful to review teresa.yaml, Procfile and nginx.conf changes offline.

use anyhow::{Context, Result};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

use teresa_core::config::TeresaConfig;
use teresa_core::domain::BuildDescriptor;
use teresa_core::infrastructure::cluster::convert;
use teresa_core::infrastructure::storage::Storage;
use teresa_core::infrastructure::{tarball, AppRegistry, FileStorage, YamlRegistry};
use teresa_core::services::deploy_service::{nginx_conf, workload_spec, Workload};

use super::read_tarball;

pub async fn execute(
    config: &TeresaConfig,
    app_name: &str,
    tarball_path: &Path,
    slug: Option<String>,
) -> Result<()> {
    let registry = YamlRegistry::load(&config.registry_path)?;
    let app = registry.get(app_name).await?;
    let storage = FileStorage::new(&config.storage_root);

    let mut cursor = Cursor::new(read_tarball(tarball_path)?);
    let files = tarball::deploy_config_files(&mut cursor, &app.name, &app.process_type)?;
    let slug = slug.unwrap_or_else(|| BuildDescriptor::for_deploy(&app.name, "render").slug_url());
    debug!(app = %app.name, slug = %slug, "rendering workload");

    let workload = workload_spec(config, &storage.info(), &app, &files, &slug, "render")?;
    let rendered = match workload {
        Workload::Deploy(spec) => {
            let mut out = String::new();
            if let Some(conf) = nginx_conf(config, &app, &files) {
                let cm = convert::config_map(
                    &app.name,
                    &app.name,
                    [(
                        teresa_core::domain::spec::sidecar::NGINX_CONF_FILE.to_string(),
                        conf.clone(),
                    )]
                    .into(),
                );
                out.push_str(&serde_yaml::to_string(&cm).context("Failed to render config map")?);
                out.push_str("---\n");
            }
            let deployment = convert::deployment(&spec, 1)?;
            out.push_str(&serde_yaml::to_string(&deployment).context("Failed to render deployment")?);
            out
        }
        Workload::CronJob(spec) => {
            let cron = convert::cron_job(&spec)?;
            serde_yaml::to_string(&cron).context("Failed to render cron job")?
        }
    };
    print!("{}", rendered);
    Ok(())
}
