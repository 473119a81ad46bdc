//! Provider specific exposure: SSL and static IPs

use anyhow::Result;
use colored::Colorize;

use super::Runtime;

pub async fn set_ssl(rt: &Runtime, app: &str, cert: &str, port: i32) -> Result<()> {
    rt.cloud.set_ssl(&rt.user, app, cert, port).await?;
    println!("{}", format!("SSL configured for {}", app).green());
    Ok(())
}

pub async fn ssl_info(rt: &Runtime, app: &str) -> Result<()> {
    let info = rt.cloud.ssl_info(&rt.user, app).await?;
    println!("{:<6} {}", "cert:".bold(), info.cert);
    if let Some(port) = info.port {
        println!("{:<6} {}", "port:".bold(), port);
    }
    Ok(())
}

pub async fn static_ip(rt: &Runtime, app: &str, address: &str) -> Result<()> {
    rt.cloud.set_static_ip(&rt.user, app, address).await?;
    println!("{}", format!("{} bound to the static IP {}", app, address).green());
    Ok(())
}
