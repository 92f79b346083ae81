//! CLI command implementations and shared wiring.

pub mod ask;
pub mod serve;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use datascope_config::AppConfig;
use datascope_core::inference::InferenceBackend;
use datascope_engine::{BASE_BRANCH, EngineFactory, Orchestrator};
use datascope_providers::AnthropicBackend;
use datascope_tools::{ChartTool, ComputeTool, DraftOnlyMailer, EmailTool, FormatterTool, SqlTool};
use tracing::warn;

type CommandError = Box<dyn std::error::Error>;

/// Load configuration from the given path or the working directory.
pub(crate) fn load_config(path: Option<PathBuf>) -> Result<AppConfig, CommandError> {
    let config = match path {
        Some(path) => AppConfig::load_path(&path)?,
        None => AppConfig::load_path(Path::new("datascope.toml"))?,
    };
    Ok(config)
}

/// Build the inference backend from configuration.
fn build_backend(config: &AppConfig) -> Result<Arc<dyn InferenceBackend>, CommandError> {
    let api_key = config.provider.api_key.clone().ok_or(
        "No API key configured - set DATASCOPE_API_KEY or provider.api_key in datascope.toml",
    )?;
    let mut backend = AnthropicBackend::new(api_key, &config.provider.model);
    if let Some(base_url) = &config.provider.base_url {
        backend = backend.with_base_url(base_url);
    }
    Ok(Arc::new(backend))
}

/// Build the engine factory used for every new conversation: shared tool
/// instances (the SQL pool lives on the tool), fresh engine per id.
pub(crate) async fn build_engine_factory(
    config: &AppConfig,
) -> Result<EngineFactory, CommandError> {
    let backend = build_backend(config)?;
    let domain_context = config.load_domain_context()?;

    let sql = match &config.database.url {
        Some(url) => Some(Arc::new(
            SqlTool::connect(backend.clone(), url, config.database.max_connections).await?,
        )),
        None => {
            warn!("No database configured; the SQL tool will not be registered");
            None
        }
    };
    let chart = Arc::new(ChartTool::new(backend.clone()));
    let compute = Arc::new(ComputeTool::new(backend.clone()));
    let formatter = Arc::new(FormatterTool::new(backend.clone()));
    let email = Arc::new(EmailTool::new(backend.clone(), Arc::new(DraftOnlyMailer)));

    let max_steps = config.engine.max_steps;
    let routing_retry_limit = config.engine.routing_retry_limit;

    Ok(Arc::new(move |conversation_id: &str| {
        let mut engine = Orchestrator::new(conversation_id, domain_context.clone(), backend.clone())
            .with_max_steps(max_steps)
            .with_routing_retry_limit(routing_retry_limit);

        // Registration on a fresh engine with unique names cannot collide.
        if let Some(sql) = &sql {
            engine
                .add_tool(BASE_BRANCH, sql.clone())
                .expect("fresh engine accepts base tools");
        }
        engine
            .add_tool(BASE_BRANCH, chart.clone())
            .expect("fresh engine accepts base tools");
        engine
            .add_tool(BASE_BRANCH, compute.clone())
            .expect("fresh engine accepts base tools");
        engine
            .add_tool(BASE_BRANCH, formatter.clone())
            .expect("fresh engine accepts base tools");
        engine
            .add_tool(BASE_BRANCH, email.clone())
            .expect("fresh engine accepts base tools");
        engine
    }))
}
