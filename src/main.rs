use anyhow::Result;
use clap::Parser;
use colored::Colorize;

mod cli;
mod commands;

use cli::{BuildCommands, Cli, ClusterCommands, Commands, EnvCommands, SslCommands};
use commands::{
    apps, build, cloud, deploy, env, exec, keep_alive_override, releases, render, Runtime,
};
use teresa_core::config::TeresaConfig;
use teresa_core::error::TeresaError;

/// Exit code for `err`: the error kind when it is a teresa error, 1 otherwise
fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<TeresaError>()
        .map(|e| e.kind().exit_code())
        .unwrap_or(1)
}

/// What the user sees; internal details only go to the logs
fn user_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<TeresaError>() {
        Some(e) => e.safe_message(),
        None => format!("{:#}", err),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config =
        TeresaConfig::load_or_default(cli.config.as_deref()).map_err(TeresaError::from)?;
    keep_alive_override(&mut config, cli.keep_alive);

    match cli.command {
        Commands::Render { app, tarball, slug } => {
            render::execute(&config, &app, &tarball, slug).await
        }
        Commands::Cluster(command) => {
            let rt = Runtime::connect(config, &cli.user).await?;
            dispatch(&rt, command).await
        }
    }
}

async fn dispatch(rt: &Runtime, command: ClusterCommands) -> Result<()> {
    match command {
        ClusterCommands::Deploy {
            app,
            tarball,
            description,
        } => deploy::execute(rt, &app, &tarball, &description).await,
        ClusterCommands::Releases { app } => releases::list(rt, &app).await,
        ClusterCommands::Rollback { app, revision } => releases::rollback(rt, &app, &revision).await,
        ClusterCommands::Exec { app, command } => exec::execute(rt, &app, command).await,
        ClusterCommands::Env { command } => match command {
            EnvCommands::Set { app, pairs } => env::set(rt, &app, &pairs).await,
            EnvCommands::Unset { app, keys } => env::unset(rt, &app, &keys).await,
        },
        ClusterCommands::Build { command } => match command {
            BuildCommands::Create {
                app,
                name,
                tarball,
                run,
            } => build::create(rt, &app, &name, &tarball, run).await,
            BuildCommands::List { app } => build::list(rt, &app).await,
            BuildCommands::Delete { app, name } => build::delete(rt, &app, &name).await,
            BuildCommands::Run { app, name } => build::run(rt, &app, &name).await,
        },
        ClusterCommands::Scale { app, replicas } => apps::scale(rt, &app, replicas).await,
        ClusterCommands::Info { app } => apps::info(rt, &app).await,
        ClusterCommands::Apps => apps::list(rt).await,
        ClusterCommands::Logs { app, lines, follow } => apps::logs(rt, &app, lines, follow).await,
        ClusterCommands::Autoscale { app, min, max, cpu } => {
            apps::autoscale(rt, &app, min, max, cpu).await
        }
        ClusterCommands::Ssl { command } => match command {
            SslCommands::Set { app, cert, port } => cloud::set_ssl(rt, &app, &cert, port).await,
            SslCommands::Info { app } => cloud::ssl_info(rt, &app).await,
        },
        ClusterCommands::StaticIp { app, address } => cloud::static_ip(rt, &app, &address).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging with LOGGING env var support
    // LOGGING=debug,info,warn,error or just LOGGING=debug
    let log_level = std::env::var("LOGGING")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or_else(|_| {
            if cli.verbose {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli).await {
        tracing::error!(error = %format!("{:#}", err), "command failed");
        eprintln!("{} {}", "Error:".red().bold(), user_message(&err));
        std::process::exit(exit_code(&err));
    }
}
