//! mvirt-handler: converges a single VM's libvirt domain towards its spec.
//!
//! One invocation performs one reconciliation pass and exits. The outer
//! watch loop (or an operator) decides when to call it and retries failed
//! passes with its own backoff.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mvirt_handler::{
    DegradedStatePolicy, DomainManager, EventSink, JsonlSink, LibvirtXml, LifecycleEvent,
    ManagerConfig, Reconciler, TracingSink, VirshConnection, VmSpec,
};

/// mvirt domain handler
#[derive(Parser, Debug)]
#[command(name = "mvirt-handler", version, about)]
struct Args {
    /// libvirt connection URI (e.g., qemu:///system)
    #[arg(long, global = true)]
    connect: Option<String>,

    /// Path to the virsh binary
    #[arg(long, default_value = "virsh", global = true)]
    virsh: PathBuf,

    /// Directory for staging domain definitions
    #[arg(long, default_value = "/var/lib/mvirt/domains", global = true)]
    definition_dir: PathBuf,

    /// Append lifecycle events to this JSON lines file instead of the log
    #[arg(long, global = true)]
    event_log: Option<PathBuf>,

    /// Handling of blocked/pmsuspended domains on sync (leave, restart, reject)
    #[arg(long, default_value = "leave", value_parser = parse_policy, global = true)]
    degraded_policy: DegradedStatePolicy,

    /// Do not record Deleted when terminate only undefines a stopped domain
    #[arg(long, global = true)]
    no_undefine_event: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Define and start the domain if needed
    Sync {
        /// VM spec (JSON)
        #[arg(long)]
        spec: PathBuf,
    },
    /// Destroy and undefine the domain if present
    Terminate {
        /// VM spec (JSON)
        #[arg(long)]
        spec: PathBuf,
    },
}

fn parse_policy(s: &str) -> Result<DegradedStatePolicy, String> {
    match s {
        "leave" => Ok(DegradedStatePolicy::Leave),
        "restart" => Ok(DegradedStatePolicy::Restart),
        "reject" => Ok(DegradedStatePolicy::Reject),
        other => Err(format!(
            "unknown policy '{}', expected leave, restart or reject",
            other
        )),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mvirt_handler=info,audit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let events: Arc<dyn EventSink> = match &args.event_log {
        Some(path) => {
            info!(path = %path.display(), "Recording lifecycle events to file");
            Arc::new(JsonlSink::new(path))
        }
        None => Arc::new(TracingSink::new()),
    };

    let conn = VirshConnection::with_binary(
        args.virsh.clone(),
        args.connect.clone(),
        args.definition_dir.clone(),
    );
    let manager = DomainManager::new(
        Arc::new(conn),
        events,
        Arc::new(LibvirtXml),
        ManagerConfig {
            degraded_policy: args.degraded_policy,
            record_undefine_only: !args.no_undefine_event,
        },
    );

    let (spec_path, finalize) = match &args.command {
        Command::Sync { spec } => (spec, false),
        Command::Terminate { spec } => (spec, true),
    };
    let spec = VmSpec::load(spec_path)
        .await
        .with_context(|| format!("Failed to load VM spec from {}", spec_path.display()))?;

    info!(vm = %spec.identity, uri = ?args.connect, "Reconciling domain");
    let result = if finalize {
        manager.finalize(&spec).await
    } else {
        manager.reconcile(&spec).await
    };

    match result {
        Ok(emitted) => {
            println!("{}", summarize(&emitted));
            Ok(())
        }
        Err(e) => {
            error!(vm = %e.identity(), op = ?e.operation(), "Reconciliation failed: {}", e);
            Err(e).context("Reconciliation failed")
        }
    }
}

fn summarize(emitted: &[LifecycleEvent]) -> String {
    if emitted.is_empty() {
        return "converged".to_string();
    }
    emitted
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
