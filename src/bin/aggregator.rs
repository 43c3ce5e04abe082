use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use salvo::catcher::Catcher;
use salvo::prelude::*;
use tracing::info;

use logfabric::aggregator::{self, IngestListener, MetriczEndpoint, TailEndpoint};
use logfabric::config;
use logfabric::sinks::SinkManager;
use logfabric::utils;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = config::init_aggregator();
    let _guard = config.log.guard();
    info!("log level: {}", &config.log.filter_level);

    let manager = SinkManager::start();

    let ingest = IngestListener::bind(
        (config.listen_addr.as_str(), config.ingest_port),
        Arc::clone(&manager),
    )
    .await
    .context("binding ingest listener")?;
    tokio::spawn(Arc::clone(&ingest).run());

    let tail = TailEndpoint::new(
        Arc::clone(&manager),
        Duration::from_secs(config.keep_alive_secs),
        config.message_buffer_size,
    );
    let metricz = MetriczEndpoint::new(manager, Some(ingest));
    let service = Service::new(aggregator::router(tail, metricz)).catcher(Catcher::default());

    let acceptor = TcpListener::new((config.listen_addr.clone(), config.listen_port))
        .bind()
        .await;
    let server = Server::new(acceptor);
    tokio::spawn(utils::shutdown_signal(server.handle()));
    info!(
        "aggregator listening on ws://{}:{}/tail",
        config.listen_addr, config.listen_port
    );
    server.serve(service).await;
    Ok(())
}
