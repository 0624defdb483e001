mod args;
mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use args::{Args, Command, ParseArgs, ScanArgs, ServeArgs};
use config::FileConfig;
use vigil_api::config::StartScanRequest;
use vigil_core::{CancellationToken, Orchestrator, ScanOutcome, TracingSink};
use vigil_db::ScanStore;
use vigil_types::{PhaseToggles, Scan, ServiceRecord, TimingProfile, now_ms, validate_targets};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing based on verbosity
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let config = FileConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Serve(serve) => run_server(serve, config).await,
        Command::Scan(scan) => run_scan(scan, config).await,
        Command::Parse(parse) => run_parse(&parse),
    }
}

async fn run_server(args: ServeArgs, config: FileConfig) -> Result<()> {
    let addr: SocketAddr = args
        .listen
        .parse()
        .with_context(|| format!("invalid --listen address: {}", args.listen))?;

    let services = config.services();
    let feeds = services.intel.feed_names();
    let api_config = vigil_api::ApiConfig {
        listen_addr: addr,
        api_key: args.api_key,
        db_path: args.db,
        services,
        server: config.server,
        auth: config.auth,
    };

    eprintln!("vigil server listening on http://{addr}");
    if api_config.api_key.is_some() {
        eprintln!("  Authentication: enabled (Bearer token required)");
    } else {
        eprintln!("  Authentication: disabled (use --api-key to enable)");
    }
    if feeds.is_empty() {
        eprintln!("  Threat feeds: none configured");
    } else {
        eprintln!("  Threat feeds: {}", feeds.join(", "));
    }

    vigil_api::start_server(api_config).await
}

async fn run_scan(args: ScanArgs, config: FileConfig) -> Result<()> {
    let request = StartScanRequest {
        targets: args.targets,
        scan_type: Some(args.scan_type),
        ports: args.ports,
        stealth: args.stealth,
        timing: args.aggressive.then_some(TimingProfile::Aggressive),
        phases: Some(PhaseToggles {
            threat_intel: !args.no_intel,
            ..PhaseToggles::default()
        }),
        tags: Vec::new(),
    };
    let scan_config = request.scan_config().map_err(anyhow::Error::msg)?;
    let targets = validate_targets(&request.targets)?;

    let store = match &args.db {
        Some(path) => ScanStore::open(path)
            .with_context(|| format!("failed to open scan database {}", path.display()))?,
        None => ScanStore::open_in_memory().context("failed to open in-memory database")?,
    };
    let store = Arc::new(Mutex::new(store));

    let services = config.services();
    let orchestrator = Orchestrator::new(
        store.clone(),
        services.scanner,
        services.intel,
        services.analyzer,
        Arc::new(TracingSink),
    );

    let scan = Scan::new(
        format!("scan-{}", uuid::Uuid::new_v4()),
        targets,
        scan_config,
        None,
        now_ms(),
    );
    store
        .lock()
        .await
        .insert_scan(&scan)
        .context("failed to record scan")?;

    // Ctrl+C stops the external tool and leaves the record cancelled.
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt_store = store.clone();
    let interrupt_id = scan.id.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling scan");
            let store = interrupt_store.lock().await;
            if let Err(e) = store.finalize_scan(
                &interrupt_id,
                vigil_types::ScanStatus::Cancelled,
                None,
                None,
                Some(vigil_core::CANCELLED_BY_USER),
                now_ms(),
            ) {
                warn!(error = %e, "failed to record cancellation");
            }
            on_interrupt.cancel();
        }
    });

    info!(scan_id = %scan.id, "starting scan");
    let outcome = orchestrator.perform_scan(&scan, &cancel).await;

    let stored = store
        .lock()
        .await
        .load_scan(&scan.id)
        .context("failed to load scan result")?
        .with_context(|| format!("scan record {} vanished", scan.id))?;
    println!("{}", serde_json::to_string_pretty(&stored)?);

    match outcome {
        ScanOutcome::Completed(_) => Ok(()),
        ScanOutcome::Failed(e) => bail!("scan failed: {e}"),
        ScanOutcome::Cancelled => bail!("scan cancelled"),
    }
}

#[derive(Serialize)]
struct ParsedOutput {
    target: String,
    os: Option<String>,
    services: Vec<ServiceRecord>,
}

fn run_parse(args: &ParseArgs) -> Result<()> {
    let output = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let parsed = ParsedOutput {
        target: args.target.clone(),
        os: vigil_probe::parse_os(&output),
        services: vigil_probe::parse_services(&args.target, &output),
    };
    println!("{}", serde_json::to_string_pretty(&parsed)?);
    Ok(())
}
