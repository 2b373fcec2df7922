//! dkim-sync binary entry point.

use clap::Parser;
use dkim_sync::{
    telemetry, CloudflareClient, Config, ConfigEmitter, DomainLookup, Driver, KeyStore,
    MergedDomains, NoopReload, PollingSource, ProcessSignalReload, Reconciler, SignerReload,
    ZoneCache,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tripwire::Tripwire;

/// Provision DKIM keys, OpenDKIM tables and Cloudflare TXT records for mail domains.
#[derive(Parser, Debug)]
#[command(name = "dkim-sync")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "dkim-sync.toml")]
    config: PathBuf,

    /// Run a single batch and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()).required(false))
        .add_source(
            config::Environment::with_prefix("DKIM_SYNC")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("source.domains")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    // Initialize telemetry
    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    config.validate()?;
    let interval = config.source.sync_interval()?;

    info!(
        config_file = %args.config.display(),
        target_path = %config.keys.target_path.display(),
        interval = ?interval,
        "Starting dkim-sync"
    );

    let provider = match CloudflareClient::from_config(&config.cloudflare) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, "Failed to initialize Cloudflare DNS API");
            return Err(e.into());
        }
    };

    let reload: Arc<dyn SignerReload> = if config.signer.enabled {
        Arc::new(ProcessSignalReload::new(&config.signer.process_name))
    } else {
        Arc::new(NoopReload)
    };

    let driver = Driver::new(
        KeyStore::new(&config.keys.target_path),
        ConfigEmitter::new(&config.keys.target_path, reload),
        Reconciler::new(provider, ZoneCache::new()),
    );
    let lookup: Arc<dyn DomainLookup> = Arc::new(MergedDomains::from_config(&config.source));

    if args.once {
        let domains = lookup.fetch().await?;
        let report = driver.run_batch(&domains).await;
        info!(
            failed = report.failed_domains().len(),
            "single batch complete"
        );
        return Ok(());
    }

    // Setup graceful shutdown
    let (tripwire, tripwire_worker) = Tripwire::new_signals();
    tokio::spawn(tripwire_worker);

    let (domains, source_handle) = PollingSource::spawn(lookup, interval, tripwire.clone());
    let result = driver.run(domains, tripwire).await;
    source_handle.abort();

    if let Err(e) = result {
        error!("dkim-sync terminated: {}", e);
        return Err(e.into());
    }

    info!("dkim-sync shutdown complete");
    Ok(())
}
