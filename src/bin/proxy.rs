use std::sync::Arc;

use anyhow::Context;
use salvo::catcher::Catcher;
use salvo::prelude::*;
use tracing::info;

use logfabric::config;
use logfabric::proxy::{self, ApiLogAccessAuthorizer, FanOutProxy, HashGroup};
use logfabric::utils;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = config::init_proxy();
    let _guard = config.log.guard();
    info!("log level: {}", &config.log.filter_level);

    let hash_groups = config
        .hash_groups
        .iter()
        .map(|members| HashGroup::new(members.clone()))
        .collect::<Result<Vec<_>, _>>()
        .context("constructing hash groups")?;
    let authorizer = Arc::new(ApiLogAccessAuthorizer::new(config.api_endpoint.clone()));
    let fan_out = Arc::new(FanOutProxy::new(hash_groups, authorizer));

    let service = Service::new(proxy::router(fan_out)).catcher(Catcher::default());

    let acceptor = TcpListener::new((config.listen_addr.clone(), config.listen_port))
        .bind()
        .await;
    let server = Server::new(acceptor);
    tokio::spawn(utils::shutdown_signal(server.handle()));
    info!(
        "proxy listening on ws://{}:{}/tail",
        config.listen_addr, config.listen_port
    );
    server.serve(service).await;
    Ok(())
}
