//! Translation backends behind one interface.
//!
//! Every engine the worker can front implements [`BackendAdapter`]. The
//! worker never talks to an engine directly: it hands the request id to an
//! isolated execution, which builds the adapter from its [`AdapterConfig`]
//! and calls [`BackendAdapter::translate`].
//!
//! # Variants
//!
//! - [`dummy`]: uppercases the source text, for testing
//! - [`moses`]: local decoder process fed through scratch files, either for
//!   one fixed pair or for a table of pairs with one config each
//! - [`moses_server`]: remote decoder over XML-RPC, one call per line
//! - [`lucy`]: rule-based engine over XML-RPC
//! - [`google`]: scraped web front end with sentinel batching
//! - [`bing`]: `TranslateArray` XML API
//!
//! Shared plumbing lives in [`batch`] (line-integrity protocol), [`http`]
//! (transport seam) and [`xmlrpc`] (minimal XML-RPC client).

pub mod batch;
pub mod bing;
pub mod dummy;
pub mod google;
pub mod http;
pub mod lucy;
pub mod moses;
pub mod moses_server;
pub mod xmlrpc;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::AdapterConfig;
use crate::error::MtError;
use crate::message::{MessageStore, TranslationJobMessage};

pub use http::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};

/// A supported `(source, target)` language code pair.
pub type LanguagePair = (String, String);

#[derive(Debug)]
pub enum AdapterError {
    UnsupportedLanguage { code: String },
    UnsupportedPair { source: String, target: String },
    Unreachable(String),
    Backend { status: u16, body: String },
    Protocol(String),
    Fault { code: i64, message: String },
    Decoder(String),
    LineMismatch { expected: usize, actual: usize },
    SentinelInSource { line: usize },
    Io(std::io::Error),
    Message(MtError),
}

// Hand-written rather than `#[derive(thiserror::Error)]`: thiserror treats
// any field named `source` as the error source, which `UnsupportedPair`'s
// language-code field is not.
impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterError::UnsupportedLanguage { code } => {
                write!(f, "No mapping available for language code {code:?}")
            }
            AdapterError::UnsupportedPair { source, target } => {
                write!(f, "Language pair {source}-{target} is not served")
            }
            AdapterError::Unreachable(e) => write!(f, "Backend unreachable: {e}"),
            AdapterError::Backend { status, body } => {
                write!(f, "Backend returned HTTP {status}: {body}")
            }
            AdapterError::Protocol(e) => write!(f, "Unexpected backend reply: {e}"),
            AdapterError::Fault { code, message } => {
                write!(f, "Backend fault {code}: {message}")
            }
            AdapterError::Decoder(e) => write!(f, "Decoder failed: {e}"),
            AdapterError::LineMismatch { expected, actual } => {
                write!(f, "Expected {expected} lines from backend, got {actual}")
            }
            AdapterError::SentinelInSource { line } => {
                write!(f, "Source line {line} contains the batch sentinel")
            }
            AdapterError::Io(e) => write!(f, "I/O error: {e}"),
            AdapterError::Message(e) => std::fmt::Display::fmt(e, f),
        }
    }
}

impl std::error::Error for AdapterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AdapterError::Io(e) => Some(e),
            AdapterError::Message(e) => std::error::Error::source(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AdapterError {
    fn from(e: std::io::Error) -> Self {
        AdapterError::Io(e)
    }
}

impl From<MtError> for AdapterError {
    fn from(e: MtError) -> Self {
        AdapterError::Message(e)
    }
}

impl AdapterError {
    /// Errors that describe a bad engine answer rather than a failed call.
    /// These are recorded in the message as an `ERROR:` artifact. Engine
    /// faults are failed calls: the job fails and the blob is left as is.
    pub fn is_correctness_violation(&self) -> bool {
        matches!(
            self,
            AdapterError::LineMismatch { .. }
                | AdapterError::SentinelInSource { .. }
                | AdapterError::Protocol(_)
        )
    }
}

/// A translation engine.
///
/// Implementations hold only their configuration; all per-job state lives in
/// the persisted message.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Short name used in logs and the CLI.
    fn name(&self) -> &'static str;

    fn language_pairs(&self) -> BTreeSet<LanguagePair>;

    /// Map a generic three-letter code to the engine's own code.
    fn language_code(&self, code: &str) -> Option<String>;

    /// Fill in `target_text` (and optionally `packet_data`).
    ///
    /// `store` is used only for scratch files; the message itself is read
    /// and written by [`translate`](Self::translate).
    async fn translate_message(
        &self,
        store: &MessageStore,
        message: &mut TranslationJobMessage,
    ) -> Result<(), AdapterError>;

    /// Read the persisted message and run it through the engine, without
    /// writing anything back.
    ///
    /// Correctness violations from the engine end up in `target_text` as an
    /// `ERROR:` artifact. Any other failure is returned.
    async fn complete(
        &self,
        store: &MessageStore,
        request_id: &str,
    ) -> Result<TranslationJobMessage, AdapterError> {
        let mut message = store.read(request_id)?;

        match self.translate_message(store, &mut message).await {
            Ok(()) => {}
            Err(e) if e.is_correctness_violation() => {
                tracing::warn!(
                    request_id,
                    adapter = self.name(),
                    error = %e,
                    "Backend violated line integrity"
                );
                message.target_text = Some(error_artifact(&e));
            }
            Err(e) => return Err(e),
        }
        Ok(message)
    }

    /// [`complete`](Self::complete) the message and write it back. A failure
    /// leaves the blob untouched.
    async fn translate(&self, store: &MessageStore, request_id: &str) -> Result<(), AdapterError> {
        let message = self.complete(store, request_id).await?;
        store.write(&message)?;
        tracing::info!(request_id, adapter = self.name(), "Translation stored");
        Ok(())
    }
}

/// Resolve both engine codes of a message, failing before any remote call.
pub fn engine_codes(
    adapter: &dyn BackendAdapter,
    message: &TranslationJobMessage,
) -> Result<(String, String), AdapterError> {
    let lookup = |code: &str| {
        adapter
            .language_code(code)
            .ok_or_else(|| AdapterError::UnsupportedLanguage {
                code: code.to_string(),
            })
    };
    Ok((
        lookup(&message.source_language)?,
        lookup(&message.target_language)?,
    ))
}

pub fn error_artifact(err: &AdapterError) -> String {
    format!("ERROR: {}", err)
}

/// Every ordered pair of distinct languages.
pub fn all_pairs(languages: &[&str]) -> BTreeSet<LanguagePair> {
    languages
        .iter()
        .flat_map(|a| {
            languages
                .iter()
                .filter(move |b| *b != a)
                .map(move |b| (a.to_string(), b.to_string()))
        })
        .collect()
}

/// Build the adapter described by `config`. HTTP-backed variants get a
/// [`ReqwestTransport`].
pub fn build_adapter(config: &AdapterConfig) -> Result<Arc<dyn BackendAdapter>, AdapterError> {
    let adapter: Arc<dyn BackendAdapter> = match config {
        AdapterConfig::Dummy { delay_ms } => Arc::new(dummy::DummyAdapter::new(*delay_ms)),
        AdapterConfig::Moses {
            command,
            config,
            source_language,
            target_language,
        } => Arc::new(moses::MosesAdapter::new(
            command.clone(),
            config.clone(),
            source_language.clone(),
            target_language.clone(),
        )),
        AdapterConfig::MosesMulti {
            command,
            config_template,
            pairs,
            codes,
        } => Arc::new(moses::MosesAdapter::multi_pair(
            command.clone(),
            config_template.clone(),
            pairs.iter().cloned(),
            codes.clone(),
        )),
        AdapterConfig::MosesServer {
            url,
            source_language,
            target_language,
        } => Arc::new(moses_server::MosesServerAdapter::new(
            url.clone(),
            source_language.clone(),
            target_language.clone(),
            transport()?,
        )),
        AdapterConfig::Lucy { url } => Arc::new(lucy::LucyAdapter::new(url.clone(), transport()?)),
        AdapterConfig::Google {
            url,
            max_lines,
            max_chars,
        } => Arc::new(google::GoogleAdapter::new(
            url.clone(),
            *max_lines,
            *max_chars,
            transport()?,
        )),
        AdapterConfig::Bing {
            url,
            app_id,
            max_lines,
        } => Arc::new(bing::BingAdapter::new(
            url.clone(),
            app_id.clone(),
            *max_lines,
            transport()?,
        )),
    };
    Ok(adapter)
}

fn transport() -> Result<Arc<dyn HttpTransport>, AdapterError> {
    Ok(Arc::new(ReqwestTransport::new()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_pairs_excludes_identity() {
        let pairs = all_pairs(&["deu", "eng", "fra"]);
        assert_eq!(pairs.len(), 6);
        assert!(pairs.contains(&("deu".to_string(), "eng".to_string())));
        assert!(!pairs.contains(&("eng".to_string(), "eng".to_string())));
    }

    #[test]
    fn engine_codes_reports_the_unmapped_code() {
        let adapter = lucy::LucyAdapter::new(
            "http://127.0.0.1:1/".to_string(),
            Arc::new(ReqwestTransport::new().unwrap()),
        );
        let message = TranslationJobMessage::new("eng", "ita", "x");
        let err = engine_codes(&adapter, &message).unwrap_err();
        assert!(matches!(err, AdapterError::UnsupportedLanguage { code } if code == "ita"));
    }

    #[test]
    fn build_adapter_selects_variant_by_name() {
        let adapter = build_adapter(&AdapterConfig::Dummy { delay_ms: 0 }).unwrap();
        assert_eq!(adapter.name(), "dummy");

        let adapter = build_adapter(&AdapterConfig::Lucy {
            url: "http://127.0.0.1:9999/".to_string(),
        })
        .unwrap();
        assert_eq!(adapter.name(), "lucy");
    }
}
