//! formsync server - main entry point

use anyhow::{Context, Result};
use formsync_common::logging::{init_logging, LogConfig};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use formsync_server::{
    app,
    config::Config,
    db,
    features::FeatureState,
    ingest::{
        HttpAttachmentFetcher, IngestConfig, IngestScheduler, IngestionPipeline, PgSink,
        SheetsClient,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let log_config = LogConfig::builder()
        .log_file_prefix("formsync-server")
        .filter_directives("formsync_server=debug,tower_http=debug,sqlx=warn")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting formsync server");

    let config = Config::load()?;
    let ingest_config = IngestConfig::from_env().context("invalid ingestion configuration")?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let db_pool = db::create_pool(&config.database).await?;
    db::run_migrations(&db_pool).await?;

    let shutdown = CancellationToken::new();

    let (pipeline, scheduler_handle) = if ingest_config.enabled {
        let source = SheetsClient::new(ingest_config.sheets.clone())
            .context("failed to initialise spreadsheet client")?;
        let fetcher = HttpAttachmentFetcher::new(ingest_config.download.clone())?;
        let pipeline = Arc::new(IngestionPipeline::new(
            Arc::new(source),
            Arc::new(fetcher),
            Arc::new(PgSink::new(db_pool.clone())),
            ingest_config.clear_mode,
        ));

        let handle =
            IngestScheduler::new(pipeline.clone(), &ingest_config, shutdown.child_token()).start();
        info!(
            spreadsheet = %ingest_config.sheets.spreadsheet_id,
            sheet = %ingest_config.sheets.sheet_name,
            "Ingestion enabled"
        );
        (Some(pipeline), Some(handle))
    } else {
        info!("Ingestion is disabled (INGEST_ENABLED=false)");
        (None, None)
    };

    let state = FeatureState {
        db: db_pool.clone(),
        pipeline,
    };
    let router = app::create_router(state, &config.cors);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // Lets a running cycle commit or roll back before the pool goes away
    shutdown.cancel();
    if let Some(handle) = scheduler_handle {
        let grace = Duration::from_secs(config.server.shutdown_timeout_secs);
        if tokio::time::timeout(grace, handle).await.is_err() {
            tracing::warn!("Ingestion scheduler did not stop within {:?}", grace);
        }
    }

    db_pool.close().await;
    info!("Server shut down gracefully");

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM and cancels `shutdown`
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    shutdown.cancel();
}
