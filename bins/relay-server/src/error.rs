#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("source '{name}': unknown kind '{kind}'")]
    UnknownSourceKind { name: String, kind: String },

    #[error("{0}")]
    Source(#[from] relay_api::SourceError),

    #[error("{0}")]
    Engine(#[from] relay_engine::EngineError),

    #[error("api server: {0}")]
    Api(#[from] relay_api_server::ApiServerError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
