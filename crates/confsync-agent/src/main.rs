use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use confsync_agent::{Agent, AgentConfig, RequestOutcome};
use confsync_model::ChangeRequest;
use confsync_pipeline::{Coordinator, Deployment, DeploymentSpec};
use confsync_store::{layout, put_json, ObjectStore};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .short('c')
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Agent config file (TOML)")
}

fn id_arg() -> Arg {
    Arg::new("id")
        .long("id")
        .required(true)
        .help("Deployment id")
}

fn cli() -> Command {
    Command::new("confsync")
        .version(confsync_agent::VERSION)
        .about("Baseline drift detection and safe config propagation for game-server nodes")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("agent")
                .about("Run the change-apply and drift-scan schedules until Ctrl-C")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("scan")
                .about("Run one drift scan and print the reports as JSON")
                .arg(config_arg())
                .arg(
                    Arg::new("instance")
                        .long("instance")
                        .help("Scan only this instance (the report is not published)"),
                ),
        )
        .subcommand(
            Command::new("apply-once")
                .about("Run one change-apply cycle")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("submit")
                .about("Enqueue a change request")
                .arg(config_arg())
                .arg(
                    Arg::new("request")
                        .long("request")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("ChangeRequest JSON file"),
                ),
        )
        .subcommand(
            Command::new("deploy")
                .about("Drive the dev-then-prod deployment pipeline")
                .subcommand_required(true)
                .arg(config_arg())
                .subcommand(
                    Command::new("create").about("Create a deployment and enqueue dev").arg(
                        Arg::new("spec")
                            .long("spec")
                            .required(true)
                            .value_parser(value_parser!(PathBuf))
                            .help("DeploymentSpec JSON file"),
                    ),
                )
                .subcommand(
                    Command::new("advance")
                        .about("Observe results and move the deployment forward")
                        .arg(id_arg()),
                )
                .subcommand(
                    Command::new("approve")
                        .about("Approve prod and enqueue prod requests")
                        .arg(id_arg())
                        .arg(Arg::new("approver").long("approver").required(true)),
                )
                .subcommand(
                    Command::new("retry")
                        .about("Re-enqueue a failed dev stage")
                        .arg(id_arg())
                        .arg(Arg::new("actor").long("actor").required(true)),
                )
                .subcommand(
                    Command::new("rollback")
                        .about("Withdraw pending requests and restore completed targets")
                        .arg(id_arg())
                        .arg(Arg::new("by").long("by").required(true)),
                )
                .subcommand(
                    Command::new("status")
                        .about("Show one deployment, or list all")
                        .arg(Arg::new("id").long("id")),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a String> {
    args.get_one::<String>(name)
        .with_context(|| format!("missing --{name}"))
}

fn load_config(args: &ArgMatches) -> Result<Arc<AgentConfig>> {
    let path = args
        .get_one::<PathBuf>("config")
        .context("missing --config")?;
    let config = AgentConfig::load(path)?;
    Ok(Arc::new(config))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("cannot parse {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_deployment(deployment: &Deployment) {
    println!("{}  {}", deployment.id, deployment.stage);
    for run in deployment.dev_runs.iter().chain(&deployment.prod_runs) {
        let status = run
            .status
            .map_or_else(|| "pending".to_string(), |s| format!("{s:?}"));
        println!(
            "  {}/{}  {}  {}",
            run.target.server, run.target.instance, run.request_id, status
        );
    }
    if !deployment.awaiting_rollback.is_empty() {
        println!("  awaiting rollback: {}", deployment.awaiting_rollback.len());
    }
    if let Some(last) = deployment.history.last() {
        println!("  last: {} -> {} by {} at {}", last.from, last.to, last.actor, last.at);
    }
}

fn describe(outcome: &RequestOutcome) -> String {
    match outcome {
        RequestOutcome::Completed(_) => "completed".to_string(),
        RequestOutcome::Failed(r) => format!(
            "failed ({})",
            r.primary_reason().map_or_else(|| "unknown".to_string(), |c| c.to_string())
        ),
        RequestOutcome::AlreadyCompleted(_) => "already completed".to_string(),
        RequestOutcome::Republished(_) => "republished from journal".to_string(),
        RequestOutcome::ClaimedElsewhere { holder } => format!("claimed by {holder}"),
        RequestOutcome::Vanished => "vanished".to_string(),
    }
}

/// Resolves on Ctrl-C or, on unix, SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl-C, shutting down"),
        () = terminate => info!("Received terminate signal, shutting down"),
    }
}

async fn run_agent(config: Arc<AgentConfig>) -> Result<()> {
    let store = config.store.build(&config.retry);
    let agent = Agent::new(config, store)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        shutdown_signal().await;
        if shutdown_tx.send(true).is_err() {
            warn!("Agent already stopped");
        }
    });

    agent.run(shutdown_rx).await;
    Ok(())
}

async fn run_scan(config: Arc<AgentConfig>, instance: Option<&String>) -> Result<()> {
    let store = config.store.build(&config.retry);
    let agent = Agent::new(config, store)?;
    match instance {
        Some(instance) => print_json(&agent.scan_instance(instance).await?),
        None => print_json(&agent.run_drift_cycle().await?),
    }
}

async fn run_apply_once(config: Arc<AgentConfig>) -> Result<()> {
    let store = config.store.build(&config.retry);
    let agent = Agent::new(config, store)?;
    let report = agent.run_apply_cycle().await?;
    if report.outcomes.is_empty() {
        println!("no pending requests");
    }
    for (id, outcome) in &report.outcomes {
        println!("{id}  {}", describe(outcome));
    }
    Ok(())
}

async fn submit(store: &dyn ObjectStore, path: &Path) -> Result<()> {
    let request: ChangeRequest = read_json(path)?;
    request.validate_shape()?;
    let key = layout::pending_key(&request.target_server, &request.id);
    put_json(store, layout::CHANGES, &key, &request).await?;
    println!("{}", request.id);
    Ok(())
}

async fn deploy(config: &AgentConfig, args: &ArgMatches) -> Result<()> {
    let coordinator = Coordinator::new(config.store.build(&config.retry), config.pipeline.clone());
    let now = Utc::now();
    let deployment = match args.subcommand() {
        Some(("create", sub)) => {
            let path = sub.get_one::<PathBuf>("spec").context("missing --spec")?;
            let spec: DeploymentSpec = read_json(path)?;
            coordinator.create(spec, now).await?
        }
        Some(("advance", sub)) => coordinator.advance(required(sub, "id")?, now).await?,
        Some(("approve", sub)) => {
            coordinator
                .approve(required(sub, "id")?, required(sub, "approver")?, now)
                .await?
        }
        Some(("retry", sub)) => {
            coordinator
                .retry(required(sub, "id")?, required(sub, "actor")?, now)
                .await?
        }
        Some(("rollback", sub)) => {
            coordinator
                .rollback(required(sub, "id")?, required(sub, "by")?, now)
                .await?
        }
        Some(("status", sub)) => match sub.get_one::<String>("id") {
            Some(id) => coordinator.status(id).await?,
            None => {
                for id in coordinator.list().await? {
                    println!("{id}");
                }
                return Ok(());
            }
        },
        Some((other, _)) => bail!("unknown deploy command '{other}'"),
        None => bail!("missing deploy command"),
    };
    print_deployment(&deployment);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("agent", args)) => run_agent(load_config(args)?).await,
        Some(("scan", args)) => run_scan(load_config(args)?, args.get_one::<String>("instance")).await,
        Some(("apply-once", args)) => run_apply_once(load_config(args)?).await,
        Some(("submit", args)) => {
            let config = load_config(args)?;
            let path = args.get_one::<PathBuf>("request").context("missing --request")?;
            submit(&*config.store.build(&config.retry), path).await
        }
        Some(("deploy", args)) => deploy(&*load_config(args)?, args).await,
        Some((other, _)) => bail!("unknown command '{other}'"),
        None => bail!("missing command"),
    }
}
