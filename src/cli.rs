//! CLI definitions for teresa-core
//!
//! This module contains all CLI argument parsing structures using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "teresa-core",
    version,
    about = "Build and deploy orchestration core for the teresa PaaS",
    long_about = "Builds app tarballs into slugs inside one-shot pods, deploys them as\nKubernetes workloads and manages revisions, env vars and ad-hoc commands."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Server configuration file (YAML)
    #[arg(long, global = true, env = "TERESA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Email of the user the operation runs as
    #[arg(long, global = true, env = "TERESA_USER", default_value = "")]
    pub user: String,

    /// Override the keep-alive interval of streamed output (e.g. 10s)
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    pub keep_alive: Option<Duration>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the Kubernetes objects a deploy of the tarball would apply
    Render {
        /// App name as found in the registry
        #[arg(long)]
        app: String,

        /// Gzipped tarball of the app source
        tarball: PathBuf,

        /// Slug the rendered workload points at (defaults to a placeholder build)
        #[arg(long)]
        slug: Option<String>,
    },

    #[command(flatten)]
    Cluster(ClusterCommands),
}

/// Commands that talk to the cluster
#[derive(Subcommand)]
pub enum ClusterCommands {
    /// Build and deploy a tarball as a new revision
    Deploy {
        #[arg(long)]
        app: String,

        /// Gzipped tarball of the app source
        tarball: PathBuf,

        /// Change cause recorded on the revision
        #[arg(long, default_value = "")]
        description: String,
    },

    /// List the revisions of an app, newest first
    Releases {
        #[arg(long)]
        app: String,
    },

    /// Roll an app back to a previous revision
    Rollback {
        #[arg(long)]
        app: String,

        #[arg(long)]
        revision: String,
    },

    /// Run a command in a one-shot pod with the live slug
    Exec {
        #[arg(long)]
        app: String,

        /// Command and arguments
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Manage app environment variables
    Env {
        #[command(subcommand)]
        command: EnvCommands,
    },

    /// Manage stored builds
    Build {
        #[command(subcommand)]
        command: BuildCommands,
    },

    /// Set the replica count of the live deployment
    Scale {
        #[arg(long)]
        app: String,

        #[arg(long)]
        replicas: i32,
    },

    /// Show app details with addresses and replicas
    Info {
        #[arg(long)]
        app: String,
    },

    /// List apps visible to the user
    Apps,

    /// Print the logs of the app's running pods
    Logs {
        #[arg(long)]
        app: String,

        /// Lines from before the stream starts
        #[arg(long, default_value_t = 10)]
        lines: i64,

        /// Keep streaming new lines until Ctrl-C
        #[arg(short, long)]
        follow: bool,
    },

    /// Scale the app horizontally on CPU usage
    Autoscale {
        #[arg(long)]
        app: String,

        #[arg(long)]
        min: i32,

        #[arg(long)]
        max: i32,

        /// Target CPU utilization, in percent
        #[arg(long, default_value_t = 70)]
        cpu: i32,
    },

    /// Manage SSL termination of the app
    Ssl {
        #[command(subcommand)]
        command: SslCommands,
    },

    /// Bind the app's ingress to a reserved address
    StaticIp {
        #[arg(long)]
        app: String,

        /// Name of the reserved address
        #[arg(long)]
        address: String,
    },
}

#[derive(Subcommand)]
pub enum SslCommands {
    /// Terminate TLS with a provider certificate
    Set {
        #[arg(long)]
        app: String,

        /// Certificate id (an ACM ARN on aws, a certificate name on gce)
        #[arg(long)]
        cert: String,

        #[arg(long, default_value_t = 443)]
        port: i32,
    },

    Info {
        #[arg(long)]
        app: String,
    },
}

#[derive(Subcommand)]
pub enum EnvCommands {
    /// Set KEY=VALUE pairs
    Set {
        #[arg(long)]
        app: String,

        #[arg(required = true)]
        pairs: Vec<String>,
    },

    /// Remove keys
    Unset {
        #[arg(long)]
        app: String,

        #[arg(required = true)]
        keys: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum BuildCommands {
    /// Build a tarball and keep the slug under a name
    Create {
        #[arg(long)]
        app: String,

        #[arg(long)]
        name: String,

        tarball: PathBuf,

        /// Run the slug once built
        #[arg(long)]
        run: bool,
    },

    List {
        #[arg(long)]
        app: String,
    },

    Delete {
        #[arg(long)]
        app: String,

        #[arg(long)]
        name: String,
    },

    /// Run a stored build in a throwaway pod
    Run {
        #[arg(long)]
        app: String,

        #[arg(long)]
        name: String,
    },
}
