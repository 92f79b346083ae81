//! `datascope ask` — one analytical question, envelopes as JSON lines.

use std::path::PathBuf;

use datascope_core::envelope::Envelope;
use tokio::sync::mpsc;

pub async fn run(
    question: &str,
    config_path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let factory = super::build_engine_factory(&config).await?;
    let mut engine = factory("cli");

    let (tx, mut rx) = mpsc::channel::<Envelope>(16);
    let printer = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            println!("{}", serde_json::to_string(&envelope).unwrap_or_default());
        }
    });

    let result = engine.run(question, &tx).await;
    drop(tx);
    printer.await?;
    result?;
    Ok(())
}
