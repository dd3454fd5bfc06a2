use std::time::Duration;

use relay_api::EventSource;
use relay_engine::Engine;
use relay_source_http_poll::HttpPollSource;
use relay_source_ticker::TickerSource;

use crate::config::{ServeArgs, ServerConfig, SourceConfig};
use crate::error::ServerError;

const DRAIN: Duration = Duration::from_secs(5);

/// Создать адаптер по `cfg.kind`.
pub fn build_source(cfg: &SourceConfig) -> Result<Box<dyn EventSource>, ServerError> {
    let config_json = cfg.config_json()?;
    let source: Box<dyn EventSource> = match cfg.kind.as_str() {
        "http_poll" => Box::new(HttpPollSource::from_json(cfg.name.clone(), &config_json)?),
        "ticker" => Box::new(TickerSource::from_json(cfg.name.clone(), &config_json)?),
        other => {
            return Err(ServerError::UnknownSourceKind { name: cfg.name.clone(), kind: other.to_string() });
        }
    };
    Ok(source)
}

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("relay-server starting");

    // --- Load config ---
    let config = ServerConfig::load(&args.config)?.effective(&args)?;
    tracing::info!(config = %args.config, sources = config.sources.len(), "loaded config");

    // --- Engine: dispatcher + lifecycle sweeper ---
    let mut engine = Engine::start(config.delivery.clone())?;

    // --- Sources ---
    if config.sources.is_empty() {
        tracing::warn!("no [[sources]] configured, topics are fed by HTTP publish only");
    }
    for source_cfg in &config.sources {
        let source = build_source(source_cfg)?;
        engine.add_source(source_cfg.topic.clone(), source);
        tracing::info!(
            source = %source_cfg.name,
            kind = %source_cfg.kind,
            topic = %source_cfg.topic,
            "spawned source"
        );
    }

    // --- API server ---
    let api_token = engine.token().child_token();
    let api_dispatcher = engine.dispatcher().clone();
    let api_port = config.api_port;
    let mut api_handle = tokio::spawn(async move {
        if let Err(e) = relay_api_server::run(api_port, api_dispatcher, api_token).await {
            tracing::error!(error = %e, "api server error");
        }
    });

    tracing::info!(port = config.api_port, "server ready");

    // --- Ожидание Ctrl+C (или падения API сервера) ---
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("shutting down...");
        }
        _ = &mut api_handle => {
            tracing::error!("api server exited, shutting down");
        }
    }

    // Закрыть подписки: открытые стримы и удерживаемые long poll завершатся.
    engine.token().cancel();
    engine.dispatcher().close_all();
    if !api_handle.is_finished() && tokio::time::timeout(DRAIN, &mut api_handle).await.is_err() {
        tracing::warn!("api server did not stop in time, aborting");
        api_handle.abort();
    }

    engine.shutdown(DRAIN).await;
    tracing::info!("shutdown complete");
    Ok(())
}
