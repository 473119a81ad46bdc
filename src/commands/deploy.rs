//! Deploy command
//!
//! Streams the pipeline output while it runs; the exit status comes from
//! the completion, never from the end of the output.

use anyhow::Result;
use colored::Colorize;
use std::path::Path;

use teresa_core::domain::DeployOptions;

use super::{interruptible, read_tarball, Runtime};

pub async fn execute(rt: &Runtime, app: &str, tarball: &Path, description: &str) -> Result<()> {
    let tarball = read_tarball(tarball)?;
    let ctx = interruptible();
    let (lines, done) = rt.deploy.deploy(
        &ctx,
        &rt.user,
        DeployOptions::new(app, description),
        tarball,
    );
    rt.stream(&ctx, lines, done).await?;
    println!("{}", format!("Deploy of {} finished", app).green().bold());
    Ok(())
}
