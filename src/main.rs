use presenter_backend::{apiserver::create_api_router, config::BackendConfig, start_backend};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::init();

    let config = BackendConfig::from_env()?;
    let backend = start_backend(&config).await?;
    let app = create_api_router(&backend);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    log::info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for shutdown signal: {:?}", e);
            }
            log::info!("Shutdown signal received.");
        })
        .await?;

    backend.sync_queue.stop_background_sync();
    if let Err(e) = backend.model_manager.save_to_file(&backend.show_path).await {
        log::error!("Failed to save show on shutdown: {:?}", e);
    }
    Ok(())
}
