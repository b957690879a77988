//! Operator CLI for sweeping unused AWS resources.
//!
//! One subcommand per resource kind. Runs are dry by default: without
//! `--delete` (or, for RDS, `--resize`) the tool only reports what would
//! be deletable and why the rest is blocked.
//!
//! ```sh
//! sweeper -v nat
//! sweeper -v nat --input doomed-gateways.txt --delete
//! sweeper -v rds --input resizes.txt --resize
//! ```

use std::time::Duration;

use anyhow::Context;
use aws_config::SdkConfig;
use clap::{Parser, Subcommand};
use colored::Colorize;
use sweeper::{
    aws::{elb, endpoint, nat, rds},
    report::{Record, Report},
    Controller, ControllerConfig, Decision, ExceptionAction, Lifecycle, Outcome, ResourceKind,
    SnapshotCollisionPolicy, WaitConfig,
};

#[derive(Parser)]
#[command(name = "sweeper", version, about = "Inventory, validate and sweep unused AWS resources")]
struct Cli {
    /// Sets the verbosity level
    #[arg(short, action = clap::ArgAction::Count)]
    verbosity: u8,

    /// AWS region override. Defaults to the environment's region.
    #[arg(long)]
    region: Option<String>,

    /// Seconds between state polls while waiting on the provider.
    #[arg(long, default_value_t = 10)]
    poll_secs: u64,

    /// Upper bound in seconds on any single wait.
    #[arg(long, default_value_t = 600)]
    wait_timeout_secs: u64,

    /// Print the batch report as JSON records.
    #[arg(long)]
    json: bool,

    /// Print the batch report as an HTML table.
    #[arg(long, conflicts_with = "json")]
    html: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct SweepArgs {
    /// `ALL` for every resource of this kind in the region, or a path to
    /// a file of identifiers, one per line.
    #[arg(short, long, default_value = "ALL")]
    input: String,

    /// Actually delete. Without this flag the run only reports.
    #[arg(long)]
    delete: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, clap::ValueEnum)]
enum OnDelete {
    /// Leave the instance alone.
    NoAction,
    /// Snapshot, wait for it, then delete.
    WithSnapshot,
    /// Delete directly.
    WithoutSnapshot,
}

#[derive(Clone, Copy, Debug, PartialEq, clap::ValueEnum)]
enum Collision {
    /// Reuse a same-day snapshot that already exists.
    Reuse,
    /// Refuse to delete when the snapshot name already exists.
    Fail,
}

#[derive(Subcommand)]
enum Command {
    /// Application, network and classic load balancers.
    ///
    /// Identifiers starting with `arn:` address ALB/NLBs; anything else is
    /// treated as a classic load balancer name.
    Elb(SweepArgs),
    /// VPC endpoints.
    Endpoint(SweepArgs),
    /// NAT gateways and their elastic IP allocations.
    Nat(SweepArgs),
    /// RDS database instances: delete with an exception action, or resize.
    Rds {
        #[command(flatten)]
        args: SweepArgs,

        /// Resize instead of sweeping. The input file lines are
        /// `identifier,instance-class`.
        #[arg(long, conflicts_with = "delete")]
        resize: bool,

        /// Exception action applied to every instance when deleting.
        #[arg(long, value_enum, default_value = "with-snapshot")]
        on_delete: OnDelete,

        /// What to do when today's snapshot name already exists.
        #[arg(long, value_enum, default_value = "fail")]
        collision: Collision,
    },
}

/// `None` means the `ALL` input mode; otherwise the file's identifiers.
fn identifiers(input: &str) -> anyhow::Result<Option<Vec<String>>> {
    if input == "ALL" {
        Ok(None)
    } else {
        Ok(Some(sweeper::read_identifier_file(input)?))
    }
}

fn print_decision(id: &str, kind: ResourceKind, decision: &Decision) {
    match decision {
        Decision::Deletable => {
            println!("{kind} '{id}' {}", "can be deleted safely".green())
        }
        Decision::Blocked { reasons } => println!(
            "{kind} '{id}' is {}: {}",
            "blocked".yellow(),
            reasons.join("; ")
        ),
    }
}

fn print_outcome(id: &str, kind: ResourceKind, outcome: &Outcome) {
    match outcome {
        Outcome::Deleted => println!("{kind} '{id}': {}", "deleted".green()),
        Outcome::Resized {
            applied_to,
            instance_class,
        } => println!(
            "{kind} '{applied_to}': {} to {instance_class}",
            "resized".green()
        ),
        Outcome::Blocked { reasons } => println!(
            "{kind} '{id}': {}: {}",
            "blocked".yellow(),
            reasons.join("; ")
        ),
        Outcome::Skipped => println!("{kind} '{id}': {}", "skipped".yellow()),
        Outcome::Partial { done, failed } => println!(
            "{kind} '{id}': {}: {done}; {failed}",
            "partially completed".red()
        ),
    }
}

/// Evaluate or delete a single identifier, appending one report record.
///
/// Errors are recorded and logged, never propagated: a failure on one
/// identifier must not abort the rest of the batch.
async fn process_one<L: Lifecycle<Provider = SdkConfig>>(
    ctl: &Controller<L>,
    id: &str,
    delete: bool,
    action: ExceptionAction,
    report: &mut Report,
) {
    let kind = ctl.lifecycle().kind();
    if delete {
        match ctl.delete(id, action).await {
            Ok(outcome) => {
                print_outcome(id, kind, &outcome);
                report.push(Record::outcome(id, kind, &outcome));
            }
            Err(error) => {
                log::error!("{kind} '{id}': {error}");
                report.push(Record::error(id, kind, &error));
            }
        }
    } else {
        match ctl.evaluate(id).await {
            Ok(decision) => {
                print_decision(id, kind, &decision);
                report.push(Record::decision(id, kind, &decision));
            }
            Err(error) => {
                log::error!("{kind} '{id}': {error}");
                report.push(Record::error(id, kind, &error));
            }
        }
    }
}

/// Run one controller over the resolved identifier set, sequentially.
async fn sweep<L: Lifecycle<Provider = SdkConfig>>(
    ctl: &Controller<L>,
    input: &str,
    delete: bool,
    action: ExceptionAction,
    report: &mut Report,
) -> anyhow::Result<()> {
    let ids = match identifiers(input)? {
        Some(ids) => ids,
        None => ctl.list().await?.into_iter().map(|r| r.id).collect(),
    };
    if ids.is_empty() {
        log::info!("no {} identifiers to process", ctl.lifecycle().kind());
    }
    for id in ids {
        process_one(ctl, &id, delete, action, report).await;
    }
    Ok(())
}

/// Load balancers need routing: v2 resources are addressed by ARN, classic
/// ones by name, and an `ALL` run inventories both APIs independently.
async fn sweep_load_balancers(
    cfg: &SdkConfig,
    controller_cfg: &ControllerConfig,
    args: &SweepArgs,
    report: &mut Report,
) -> anyhow::Result<()> {
    let v2 = Controller::new(cfg.clone(), elb::LoadBalancers).with_config(controller_cfg.clone());
    let classic =
        Controller::new(cfg.clone(), elb::ClassicLoadBalancers).with_config(controller_cfg.clone());

    let ids = match identifiers(&args.input)? {
        Some(ids) => ids,
        None => {
            let mut ids: Vec<String> = v2.list().await?.into_iter().map(|r| r.id).collect();
            ids.extend(classic.list().await?.into_iter().map(|r| r.id));
            ids
        }
    };
    for id in ids {
        if id.starts_with("arn:") {
            process_one(&v2, &id, args.delete, ExceptionAction::TerminateWithoutSnapshot, report)
                .await;
        } else {
            process_one(
                &classic,
                &id,
                args.delete,
                ExceptionAction::TerminateWithoutSnapshot,
                report,
            )
            .await;
        }
    }
    Ok(())
}

/// Apply `identifier,instance-class` resize lines from the input file.
async fn resize_db_instances(
    cfg: &SdkConfig,
    input: &str,
    report: &mut Report,
) -> anyhow::Result<()> {
    let lines = identifiers(input)?
        .context("--resize needs an input file of `identifier,instance-class` lines")?;
    let rds = rds::DbInstances;
    for line in lines {
        let Some((id, class)) = line.split_once(',') else {
            log::error!("malformed resize line '{line}', expected `identifier,instance-class`");
            report.push(Record {
                id: line.clone(),
                kind: ResourceKind::DbInstance,
                status: "failed".to_owned(),
                detail: "malformed resize line, expected `identifier,instance-class`".to_owned(),
            });
            continue;
        };
        let (id, class) = (id.trim(), class.trim());
        match rds.resize(cfg, id, class).await {
            Ok(outcome) => {
                print_outcome(id, ResourceKind::DbInstance, &outcome);
                report.push(Record::outcome(id, ResourceKind::DbInstance, &outcome));
            }
            Err(error) => {
                log::error!("DB instance '{id}': {error}");
                report.push(Record::error(id, ResourceKind::DbInstance, &error));
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::default()
        .filter_level(log::LevelFilter::Warn)
        .filter_module("sweeper", level)
        .init();

    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(region) = cli.region.clone() {
        loader = loader.region(aws_config::Region::new(region));
    }
    let cfg = loader.load().await;

    let controller_cfg = ControllerConfig {
        wait: WaitConfig {
            poll_interval: Duration::from_secs(cli.poll_secs),
            timeout: Duration::from_secs(cli.wait_timeout_secs),
        },
        ..Default::default()
    };

    let mut report = Report::default();
    match &cli.command {
        Command::Elb(args) => {
            sweep_load_balancers(&cfg, &controller_cfg, args, &mut report).await?
        }
        Command::Endpoint(args) => {
            let ctl = Controller::new(cfg.clone(), endpoint::VpcEndpoints)
                .with_config(controller_cfg.clone());
            sweep(
                &ctl,
                &args.input,
                args.delete,
                ExceptionAction::TerminateWithoutSnapshot,
                &mut report,
            )
            .await?
        }
        Command::Nat(args) => {
            let ctl =
                Controller::new(cfg.clone(), nat::NatGateways).with_config(controller_cfg.clone());
            sweep(
                &ctl,
                &args.input,
                args.delete,
                ExceptionAction::TerminateWithoutSnapshot,
                &mut report,
            )
            .await?
        }
        Command::Rds {
            args,
            resize,
            on_delete,
            collision,
        } => {
            if *resize {
                resize_db_instances(&cfg, &args.input, &mut report).await?
            } else {
                let action = match on_delete {
                    OnDelete::NoAction => ExceptionAction::NoAction,
                    OnDelete::WithSnapshot => ExceptionAction::TerminateWithSnapshot,
                    OnDelete::WithoutSnapshot => ExceptionAction::TerminateWithoutSnapshot,
                };
                let mut rds_cfg = controller_cfg.clone();
                rds_cfg.snapshot_collision = match collision {
                    Collision::Reuse => SnapshotCollisionPolicy::ReuseExisting,
                    Collision::Fail => SnapshotCollisionPolicy::Fail,
                };
                let ctl = Controller::new(cfg.clone(), rds::DbInstances).with_config(rds_cfg);
                sweep(&ctl, &args.input, args.delete, action, &mut report).await?
            }
        }
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(report.records())?);
    } else if cli.html {
        println!("{}", report.to_html_table());
    } else if !report.is_empty() {
        println!("Summary:");
        print!("{report}");
    }

    Ok(())
}
