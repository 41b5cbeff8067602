use std::sync::Arc;

use anyhow::Result;
use reseller_quota_ledger::{AccountStore, QuotaLedger};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use reseller_quota_sweeper::{AccountDatabase, SweepScheduler, SweeperConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config = SweeperConfig::from_env()?;
    init_tracing(&config.log_level)?;

    info!(
        data_dir = %config.data_dir.display(),
        interval_secs = config.sweep_interval_secs,
        warning_threshold_percent = config.warning_threshold_percent,
        "starting quota-sweeper service"
    );

    let database: Arc<dyn AccountStore> = Arc::new(AccountDatabase::new(config.data_dir.clone())?);
    let ledger = QuotaLedger::with_config(database, config.ledger_config());

    match ledger.all_usage_stats() {
        Ok(stats) => {
            let limited = stats.iter().filter(|s| s.quota_bytes.is_some()).count();
            let exceeded = stats.iter().filter(|s| s.exceeded).count();
            info!(
                resellers = stats.len(),
                limited,
                exceeded,
                "loaded reseller usage"
            );
        }
        Err(err) => {
            warn!(error = %err, "failed to load reseller usage");
        }
    }

    let sweep_task = SweepScheduler::new(ledger, &config).start();

    shutdown_signal().await;
    sweep_task.abort();

    info!("quota-sweeper service shutting down");
    Ok(())
}

fn init_tracing(default_level: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
