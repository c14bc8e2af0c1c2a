use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hookd::config::Config;
use hookd::registry::{watcher, HookRegistry};
use hookd::server::{RequestPipeline, Server};
use hookd::{logging, signals};

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::from_env()?;

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.filter));

    if config.logging.is_json() {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .event_format(logging::JsonFormatter::new(config.logging.service_name.clone())),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!(version = hookd::PKG_VERSION, "hookd server starting");
    config.log_summary();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(config))
}

async fn async_main(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (registry, reload_rx) =
        HookRegistry::new(config.hooks.files.clone(), config.hooks.as_template);

    for err in registry.load() {
        error!(error = %err, "error loading hooks");
    }

    if registry.is_empty() && !config.hooks.allow_empty_registry {
        error!(
            "couldn't load any hooks from file! \
             aborting, set ALLOW_EMPTY_REGISTRY=1 to start without hooks"
        );
        std::process::exit(1);
    }

    info!(hooks = registry.len(), "hooks loaded");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // Registry maintenance task: reload notifications and, when enabled,
    // the hook file watcher. It is the sole writer of the registry.
    tokio::spawn(watcher::run(
        Arc::clone(&registry),
        reload_rx,
        shutdown_rx.clone(),
        config.hooks.hot_reload,
    ));

    signals::setup(Arc::clone(&registry), shutdown_tx);

    let pipeline = Arc::new(RequestPipeline::new(
        Arc::clone(&registry),
        &config.server,
    ));

    let server = Server::bind(config.server.listen_addr, pipeline, shutdown_rx).await?;
    info!(
        "serving hooks on http://{}/{}/{{hook-id}}",
        server.local_addr()?,
        config.server.url_prefix
    );

    server.run().await
}
