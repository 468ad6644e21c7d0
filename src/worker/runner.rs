use std::path::Path;

use crate::adapter::build_adapter;
use crate::config::AdapterConfig;
use crate::error::Result;
use crate::message::MessageStore;

/// Body of the `run-job` child process: build the adapter described by
/// `adapter_spec` and translate one persisted message in place.
///
/// Any error is returned to `main`, which exits non-zero. The worker only
/// observes that the process ended.
pub async fn run_job(message_dir: &Path, request_id: &str, adapter_spec: &str) -> Result<()> {
    let config = AdapterConfig::from_spec(adapter_spec)?;
    let store = MessageStore::new(message_dir);
    let adapter = build_adapter(&config)?;

    tracing::info!(
        request_id,
        adapter = adapter.name(),
        pid = std::process::id(),
        "Running translation job"
    );
    adapter.translate(&store, request_id).await?;
    Ok(())
}
