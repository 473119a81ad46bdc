//! Revision listing and rollback

use anyhow::Result;
use chrono::Utc;
use colored::Colorize;

use teresa_core::infrastructure::cluster::ReplicaSetListItem;

use super::Runtime;

fn format_release(item: &ReplicaSetListItem, now: chrono::DateTime<Utc>) -> String {
    let age = item
        .age(now)
        .map(|d| humantime::format_duration(std::time::Duration::from_secs(d.as_secs())).to_string())
        .unwrap_or_else(|| "-".to_string());
    let marker = if item.current { "*" } else { " " };
    format!(
        "{} {:>4}  {:<12}  {}",
        marker, item.revision, age, item.description
    )
}

pub async fn list(rt: &Runtime, app: &str) -> Result<()> {
    let items = rt.deploy.list(&rt.user, app).await?;
    if items.is_empty() {
        println!("No releases of {} yet", app);
        return Ok(());
    }
    println!("{}", format!("Releases of {}", app).bold());
    let now = Utc::now();
    for item in &items {
        let line = format_release(item, now);
        if item.current {
            println!("{}", line.green());
        } else {
            println!("{}", line);
        }
    }
    Ok(())
}

pub async fn rollback(rt: &Runtime, app: &str, revision: &str) -> Result<()> {
    rt.deploy.rollback(&rt.user, app, revision).await?;
    println!(
        "{}",
        format!("Rolled {} back to revision {}", app, revision).green()
    );
    Ok(())
}
