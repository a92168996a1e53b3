use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rkinit", version, about = "rk8s node initializer")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Prepare tenant data directories on this node and, on the control
    /// node, rotate the object storage credentials on a schedule
    Start(StartArgs),
    /// Print the admin account registered with the settings service
    AdminAccount(AdminAccountArgs),
}

#[derive(Args)]
pub struct StartArgs {
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// InternalIP of the node this agent runs on
    #[arg(long, env = "NODE_IP")]
    pub node_ip: Option<String>,

    /// Rotation schedule, five or six field cron expression
    #[arg(long, env = "SCHEDULE")]
    pub schedule: Option<String>,

    /// Object storage bucket; `none` disables rotation
    #[arg(long, env = "S3_BUCKET")]
    pub bucket: Option<String>,

    #[arg(long, env = "APP_RANDOM_KEY", hide_env_values = true)]
    pub random_key: Option<String>,

    #[arg(short, long, default_value = "debug")]
    pub log_level: String,
}

#[derive(Args)]
pub struct AdminAccountArgs {
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Admin user name; looked up by owner role when omitted
    #[arg(long)]
    pub admin: Option<String>,

    #[arg(long, env = "APP_RANDOM_KEY", hide_env_values = true)]
    pub random_key: Option<String>,

    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}
