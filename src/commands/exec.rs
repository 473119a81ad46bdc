//! Ad-hoc commands against the live slug

use anyhow::Result;

use super::{completion, interruptible, Runtime};

pub async fn execute(rt: &Runtime, app: &str, command: Vec<String>) -> Result<()> {
    let ctx = interruptible();
    let (lines, outcome) = rt.exec.run_command(&ctx, &rt.user, app, command).await?;
    rt.stream(&ctx, lines, completion(outcome)).await?;
    Ok(())
}
