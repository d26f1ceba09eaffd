#![deny(warnings)]

//! Operator CLI for the colony progression engine. Every command prints JSON
//! on stdout.

use anyhow::{anyhow, bail, Context, Result};
use colony_core::{BuildingKind, CostLine, EngineConfig, OrderId, OwnerId, ResourceKind, SettlementId};
use colony_runtime::{CompletionSignal, CompletionWorker, Engine, EngineError, SystemClock, TokioTimers};
use persistence::schedules::ScheduleFile;
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: colony [--config <path>] [--db <url>] <command>

commands:
  migrate
  seed <schedules.yaml>
  found --owner <id> --name <name>
  upgrade <settlement> <kind>
  cancel <settlement> <order>
  collect <settlement> <order>
  resources <settlement>
  grant <settlement> <resource> <amount>
  queue <settlement>
  building <settlement> <kind>
  reconcile
  serve
  version";

struct Args {
    config: Option<PathBuf>,
    db: Option<String>,
    command: Vec<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config: None,
        db: None,
        command: Vec::new(),
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config = it.next().map(PathBuf::from),
            "--db" => args.db = it.next(),
            "-h" | "--help" => bail!(USAGE),
            _ => args.command.push(arg),
        }
    }
    if args.command.is_empty() {
        bail!(USAGE);
    }
    Ok(args)
}

fn flag(rest: &[String], name: &str) -> Result<String> {
    rest.iter()
        .position(|a| a == name)
        .and_then(|i| rest.get(i + 1))
        .cloned()
        .ok_or_else(|| anyhow!("missing {name}"))
}

fn positional(rest: &[String], idx: usize, what: &str) -> Result<String> {
    rest.get(idx).cloned().ok_or_else(|| anyhow!("missing <{what}>\n\n{USAGE}"))
}

fn settlement(rest: &[String]) -> Result<SettlementId> {
    let raw = positional(rest, 0, "settlement")?;
    Ok(SettlementId(raw.parse().with_context(|| format!("settlement id {raw:?}"))?))
}

fn order(rest: &[String]) -> Result<OrderId> {
    let raw = positional(rest, 1, "order")?;
    Ok(OrderId(raw.parse().with_context(|| format!("order id {raw:?}"))?))
}

fn kind(rest: &[String]) -> Result<BuildingKind> {
    let raw = positional(rest, 1, "kind")?;
    raw.parse().map_err(|e| anyhow!("{e}"))
}

fn emit<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Renders engine failures as player-facing text, logging the detail.
fn checked<T>(res: Result<T, EngineError>) -> Result<T> {
    res.map_err(|e| {
        error!(error = %e, "command failed");
        anyhow!(e.user_message())
    })
}

async fn open(config: &EngineConfig) -> Result<(Engine, UnboundedReceiver<CompletionSignal>)> {
    let pool = persistence::init_db(&config.database_url).await?;
    let (timers, rx) = TokioTimers::new();
    let engine = checked(Engine::new(pool, config.clone(), Arc::new(SystemClock), timers).await)?;
    Ok((engine, rx))
}

async fn serve(engine: Engine, rx: UnboundedReceiver<CompletionSignal>) -> Result<()> {
    let report = checked(engine.reconcile_on_startup().await)?;
    emit(&report)?;
    let worker = CompletionWorker::new(engine, rx);
    let stats = worker
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "ctrl-c handler failed");
            }
        })
        .await;
    emit(&stats)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    let mut config = EngineConfig::load(args.config.as_deref())?;
    if let Some(db) = args.db {
        config.database_url = db;
    }
    let (cmd, rest) = args
        .command
        .split_first()
        .ok_or_else(|| anyhow!(USAGE))?;
    info!(command = %cmd, db = %config.database_url, "starting colony");

    if cmd == "version" {
        return emit(&serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "git_sha": env!("GIT_SHA"),
            "build_date": env!("BUILD_DATE"),
        }));
    }

    let (engine, rx) = open(&config).await?;
    match cmd.as_str() {
        "migrate" => emit(&serde_json::json!({ "database_url": config.database_url, "migrated": true })),
        "seed" => {
            let path = positional(rest, 0, "schedules.yaml")?;
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            let file = ScheduleFile::from_yaml_str(&text)?;
            emit(&checked(engine.load_schedules(&file).await)?)
        }
        "found" => {
            let owner: i64 = flag(rest, "--owner")?.parse().context("owner id")?;
            let name = flag(rest, "--name")?;
            emit(&checked(engine.found_settlement(OwnerId(owner), &name).await)?)
        }
        "upgrade" => emit(&checked(engine.request_upgrade(settlement(rest)?, kind(rest)?).await)?),
        "cancel" => emit(&checked(engine.cancel_order(settlement(rest)?, order(rest)?).await)?),
        "collect" => emit(&checked(engine.collect_order(settlement(rest)?, order(rest)?).await)?),
        "resources" => emit(&checked(engine.get_resources(settlement(rest)?).await)?),
        "grant" => {
            let resource: ResourceKind = positional(rest, 1, "resource")?
                .parse()
                .map_err(|e| anyhow!("{e}"))?;
            let amount: Decimal = positional(rest, 2, "amount")?.parse().context("amount")?;
            let lines = [CostLine { resource, amount }];
            emit(&checked(engine.grant_resources(settlement(rest)?, &lines).await)?)
        }
        "queue" => emit(&checked(engine.list_queue(settlement(rest)?).await)?),
        "building" => emit(&checked(engine.describe_building(settlement(rest)?, kind(rest)?).await)?),
        "reconcile" => emit(&checked(engine.reconcile_on_startup().await)?),
        "serve" => serve(engine, rx).await,
        other => Err(anyhow!("unknown command {other:?}\n\n{USAGE}")),
    }
}
