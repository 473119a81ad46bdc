//! App views, logs and scaling

use anyhow::Result;
use colored::Colorize;
use teresa_core::domain::AutoScale;
use teresa_core::error::{ExecError, TeresaError};
use teresa_core::infrastructure::cluster::LogOptions;

use super::{interruptible, stream_only, Runtime};

pub async fn info(rt: &Runtime, app: &str) -> Result<()> {
    let info = rt.apps.info(&rt.user, app).await?;
    println!("{}", serde_yaml::to_string(&info)?);
    Ok(())
}

pub async fn list(rt: &Runtime) -> Result<()> {
    let items = rt.apps.list(&rt.user).await?;
    for item in &items {
        let addresses: Vec<&str> = item.addresses.iter().map(|a| a.hostname.as_str()).collect();
        println!(
            "{:<24} {:<16} {:<8} {}",
            item.name.bold(),
            item.team,
            item.process_type,
            addresses.join(",")
        );
    }
    Ok(())
}

pub async fn scale(rt: &Runtime, app: &str, replicas: i32) -> Result<()> {
    rt.deploy.scale(&rt.user, app, replicas).await?;
    println!("{}", format!("{} scaled to {} replicas", app, replicas).green());
    Ok(())
}

pub async fn logs(rt: &Runtime, app: &str, lines: i64, follow: bool) -> Result<()> {
    let ctx = interruptible();
    let stream = rt
        .apps
        .logs(&ctx, &rt.user, app, LogOptions { lines, follow })
        .await?;
    match rt.stream(&ctx, stream, stream_only()).await {
        // Ctrl-C is how a followed log ends
        Err(TeresaError::Exec(ExecError::Canceled)) if follow => Ok(()),
        other => Ok(other?),
    }
}

pub async fn autoscale(rt: &Runtime, app: &str, min: i32, max: i32, cpu: i32) -> Result<()> {
    rt.deploy
        .set_autoscale(&rt.user, app, AutoScale::new(min, max, cpu))
        .await?;
    println!(
        "{}",
        format!("{} autoscales between {} and {} replicas at {}% cpu", app, min, max, cpu).green()
    );
    Ok(())
}
