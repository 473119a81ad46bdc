//! Stored build commands

use anyhow::Result;
use colored::Colorize;
use std::path::Path;

use super::{interruptible, read_tarball, Runtime};

pub async fn create(rt: &Runtime, app: &str, name: &str, tarball: &Path, run: bool) -> Result<()> {
    let tarball = read_tarball(tarball)?;
    let ctx = interruptible();
    let (lines, done) = rt
        .build
        .create(&ctx, &rt.user, app, name, tarball, run)
        .await?;
    rt.stream(&ctx, lines, done).await?;
    Ok(())
}

pub async fn list(rt: &Runtime, app: &str) -> Result<()> {
    let builds = rt.build.list(&rt.user, app).await?;
    if builds.is_empty() {
        println!("No builds of {}", app);
        return Ok(());
    }
    for build in &builds {
        println!(
            "{:<30} {}",
            build.name.bold(),
            build.last_modified.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

pub async fn delete(rt: &Runtime, app: &str, name: &str) -> Result<()> {
    rt.build.delete(&rt.user, app, name).await?;
    println!("{}", format!("Build {} deleted", name).green());
    Ok(())
}

pub async fn run(rt: &Runtime, app: &str, name: &str) -> Result<()> {
    let ctx = interruptible();
    let (lines, done) = rt.build.run(&ctx, &rt.user, app, name).await?;
    rt.stream(&ctx, lines, done).await?;
    Ok(())
}
