use std::sync::Arc;

use tracing::info;

use blaze_pool::adaptive::BufferPool;
use blaze_pool::server::{EchoHandler, Server};
use blaze_pool::{logging, Config};

/// Idle read buffers kept by the echo handler.
const BUFFER_POOL_RETAIN: usize = 4096;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::from_env()?;
    logging::init(&config.logging)?;

    info!("Starting blaze_pool {}...", blaze_pool::VERSION);
    config.log_summary();

    let worker_threads = config.server.worker_threads();
    let runtime = if worker_threads == 1 {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
    } else {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .enable_all()
            .build()?
    };

    runtime.block_on(async_main(config))
}

async fn async_main(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let buffers = Arc::new(BufferPool::new(BUFFER_POOL_RETAIN));
    let server = Server::bind(&config, EchoHandler::new(buffers))?;

    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    let stats = server.shutdown();
    info!(
        stats = %serde_json::to_string(&stats).unwrap_or_default(),
        "Server stopped"
    );
    Ok(())
}
