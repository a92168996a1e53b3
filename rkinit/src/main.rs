mod cli;

use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::{Local, Timelike};
use clap::Parser;
use cli::{AdminAccountArgs, Cli, Commands, StartArgs};
use rkinit::cloud::{CloudClient, find_admin_user};
use rkinit::config::load_config;
use rkinit::controller::Controller;
use rkinit::identity::{NodeIdentity, NodeRole};
use rkinit::logging::{self, LogLevel};
use rkinit::provision::Provisioner;
use rkinit::reconcile::NodeInitReconciler;
use rkinit::rotation::{JuicefsCli, RotationJob, default_schedule, parse_schedule, run_schedule};
use rkinit::store::{ClusterStore, XlineStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => start(args).await,
        Commands::AdminAccount(args) => admin_account(args).await,
    }
}

async fn start(args: StartArgs) -> anyhow::Result<()> {
    logging::init(args.log_level.parse::<LogLevel>().unwrap_or_default());

    let node_ip = args
        .node_ip
        .filter(|ip| !ip.trim().is_empty())
        .ok_or_else(|| anyhow!("NODE_IP is not set"))?;
    let identity = NodeIdentity::new(node_ip)?;

    let cfg = load_config(args.config.as_deref())?;
    let store = XlineStore::new(&cfg.xline_config)
        .await
        .context("failed to connect to xline")?;
    let shared: Arc<dyn ClusterStore> = Arc::new(store.clone());

    let role = identity
        .resolve_role(shared.as_ref())
        .await
        .context("failed to determine the node role")?;

    let shutdown = CancellationToken::new();
    let rotation = if role == NodeRole::Control {
        let expr = args
            .schedule
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| default_schedule(Local::now().minute()));
        let schedule = parse_schedule(&expr)?;
        info!("credential rotation scheduled with {expr:?}");

        let job = RotationJob::new(
            shared.clone(),
            Arc::new(CloudClient::new(cfg.cloud.clone(), args.random_key)),
            Arc::new(JuicefsCli::new(&cfg.juicefs)),
        )
        .with_bucket(args.bucket)
        .with_secret_path(cfg.juicefs.redis_conf.clone())
        .with_record_name(cfg.controller.cluster_record.clone());
        Some(tokio::spawn(run_schedule(
            Arc::new(job),
            schedule,
            shutdown.clone(),
        )))
    } else {
        None
    };

    let reconciler = NodeInitReconciler::new(shared, identity, Provisioner::default());
    let controller = Controller::new(store, reconciler, cfg.controller.workers);
    let running = tokio::spawn(controller.run(shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("received shutdown signal");
    shutdown.cancel();

    if let Err(e) = running.await {
        error!("controller task failed: {e}");
    }
    if let Some(task) = rotation
        && let Err(e) = task.await
    {
        error!("rotation task failed: {e}");
    }
    Ok(())
}

async fn admin_account(args: AdminAccountArgs) -> anyhow::Result<()> {
    logging::init(args.log_level.parse::<LogLevel>().unwrap_or_default());

    let cfg = load_config(args.config.as_deref())?;
    let admin = match args.admin {
        Some(admin) => admin,
        None => {
            let store = XlineStore::new(&cfg.xline_config)
                .await
                .context("failed to connect to xline")?;
            find_admin_user(&store)
                .await?
                .ok_or_else(|| anyhow!("no user with owner or admin role found"))?
        }
    };

    let client = CloudClient::new(cfg.cloud, args.random_key);
    let account = client
        .fetch_account(&admin)
        .await
        .with_context(|| format!("failed to fetch account of {admin}"))?;
    println!("userid: {}", account.userid);
    println!("token: {}", account.token);
    Ok(())
}
