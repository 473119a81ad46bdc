//! Env var commands

use anyhow::{bail, Result};
use colored::Colorize;

use teresa_core::domain::EnvVar;

use super::Runtime;

/// Parse `KEY=VALUE`; the value may itself contain `=`
fn parse_pair(pair: &str) -> Result<EnvVar> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok(EnvVar::new(key, value)),
        _ => bail!("Invalid env var {:?}, expected KEY=VALUE", pair),
    }
}

pub async fn set(rt: &Runtime, app: &str, pairs: &[String]) -> Result<()> {
    let env_vars = pairs
        .iter()
        .map(|p| parse_pair(p))
        .collect::<Result<Vec<_>>>()?;
    rt.deploy.set_env(&rt.user, app, &env_vars).await?;
    for ev in &env_vars {
        println!("{} {}", "set".green(), ev.key);
    }
    Ok(())
}

pub async fn unset(rt: &Runtime, app: &str, keys: &[String]) -> Result<()> {
    rt.deploy.unset_env(&rt.user, app, keys).await?;
    for key in keys {
        println!("{} {}", "unset".yellow(), key);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pair() {
        assert_eq!(
            parse_pair("DATABASE_URL=postgres://u:p@h/db?x=1").unwrap(),
            EnvVar::new("DATABASE_URL", "postgres://u:p@h/db?x=1")
        );
        assert_eq!(parse_pair("EMPTY=").unwrap(), EnvVar::new("EMPTY", ""));
        assert!(parse_pair("NOVALUE").is_err());
        assert!(parse_pair("=x").is_err());
    }
}
