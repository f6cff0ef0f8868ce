use pointsd::api::{self, ApiState};
use pointsd::chain::ChainClient;
use pointsd::config::{Config, PoolTable};
use pointsd::storage::ledger::BalanceLedger;
use pointsd::watcher::{HealthRegistry, Watcher};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env defaults (never overriding real env) and make sure a
    // template exists for operators.
    pointsd::utils::env_guard::harden_env_setup();

    // Default to `info` when `RUST_LOG` is unset or invalid to avoid silent
    // startup.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load()?;
    tracing::info!(
        "[STARTUP] Watching {} contract(s); ledger at {}",
        config.contracts.len(),
        config.ledger_db_path
    );

    let pools = Arc::new(PoolTable::load(&config.pool_data_path)?);
    tracing::info!(
        "[STARTUP] Loaded {} pool multiplier(s) from {}",
        pools.len(),
        config.pool_data_path
    );

    // Dial failure after the retry budget is fatal: nothing downstream can
    // make progress without a working endpoint.
    let chain = Arc::new(ChainClient::connect(&config.rpc_url).await?);
    let ledger = Arc::new(BalanceLedger::open(&config.ledger_db_path)?);
    let health = Arc::new(HealthRegistry::default());

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    #[cfg(unix)]
    {
        let shutdown_tx_sigterm = shutdown_tx.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let Ok(mut term_signal) = signal(SignalKind::terminate()) else {
                return;
            };
            let _ = term_signal.recv().await;
            tracing::info!("[STARTUP] SIGTERM received, shutting down");
            let _ = shutdown_tx_sigterm.send(());
        });
    }

    let mut watcher_handles = Vec::with_capacity(config.contracts.len());
    for watched in &config.contracts {
        let watcher = Watcher::new(watched, chain.clone(), ledger.clone(), &health);
        watcher_handles.push(tokio::spawn(watcher.run(shutdown_tx.subscribe())));
    }

    let api_state = Arc::new(ApiState {
        ledger: ledger.clone(),
        pools,
        health,
    });
    let api_shutdown = shutdown_tx.subscribe();
    let listen_addr = config.api_listen_addr.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(err) = api::serve(api_state, &listen_addr, api_shutdown).await {
            tracing::error!("[API] Server error: {err:#}");
        }
    });

    let mut shutdown_watch = shutdown_tx.subscribe();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("[STARTUP] Interrupt received, shutting down gracefully");
            let _ = shutdown_tx.send(());
        }
        _ = shutdown_watch.recv() => {}
    }

    // Scanners observe cancellation between iterations, so the drain is
    // bounded by one outstanding RPC call plus its backoff sleep.
    let drain = async {
        for handle in watcher_handles {
            let _ = handle.await;
        }
        let _ = api_handle.await;
    };
    if tokio::time::timeout(Duration::from_secs(30), drain).await.is_err() {
        tracing::warn!("[STARTUP] Drain timed out; exiting with tasks still in flight");
    }

    Ok(())
}
