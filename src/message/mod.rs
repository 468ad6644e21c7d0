//! The translation job message and its persisted form.
//!
//! A [`TranslationJobMessage`] is the unit of work exchanged between broker
//! and worker. It is created by the broker, mutated exactly once by the
//! worker's isolated execution (which fills in `target_text` and
//! `packet_data`), and read-only afterwards.
//!
//! - [`codec`]: protobuf (de)serialization and base64 armoring
//! - [`store`]: the flat per-job blob directory

pub mod codec;
pub mod store;

pub use codec::{armor, decode, disarm, encode};
pub use store::MessageStore;

use uuid::Uuid;

use crate::error::{MtError, Result};

/// Length of the language codes carried in a message (ISO 639-2/3).
pub const LANGUAGE_CODE_LEN: usize = 3;

/// An opaque side-channel entry produced by an adapter.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyValuePair {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

/// A translation job and, once the worker has finished it, its result.
///
/// New optional fields may be appended with fresh tags; older readers skip
/// them, so broker and worker versions can drift.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TranslationJobMessage {
    #[prost(string, tag = "1")]
    pub request_id: String,
    #[prost(string, tag = "2")]
    pub source_language: String,
    #[prost(string, tag = "3")]
    pub target_language: String,
    #[prost(string, tag = "4")]
    pub source_text: String,
    #[prost(string, optional, tag = "5")]
    pub target_text: Option<String>,
    #[prost(message, repeated, tag = "6")]
    pub packet_data: Vec<KeyValuePair>,
}

impl TranslationJobMessage {
    /// Create a job with a freshly generated request id.
    pub fn new(
        source_language: impl Into<String>,
        target_language: impl Into<String>,
        source_text: impl Into<String>,
    ) -> Self {
        Self {
            request_id: new_request_id(),
            source_language: source_language.into(),
            target_language: target_language.into(),
            source_text: source_text.into(),
            target_text: None,
            packet_data: Vec::new(),
        }
    }

    /// Source text as an ordered sequence of lines.
    pub fn source_lines(&self) -> Vec<&str> {
        self.source_text.split('\n').collect()
    }

    pub fn push_packet(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.packet_data.push(KeyValuePair {
            key: key.into(),
            value: value.into(),
        });
    }

    /// First packet value stored under `key`.
    pub fn packet(&self, key: &str) -> Option<&str> {
        self.packet_data
            .iter()
            .find(|kv| kv.key == key)
            .map(|kv| kv.value.as_str())
    }

    /// Check both language codes are well formed.
    pub fn validate_languages(&self) -> Result<()> {
        validate_language(&self.source_language)?;
        validate_language(&self.target_language)
    }
}

/// Generate a request id: the 32 hex digits of a random UUID.
pub fn new_request_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Language codes are three lowercase ASCII letters.
pub fn validate_language(code: &str) -> Result<()> {
    if code.len() == LANGUAGE_CODE_LEN && code.bytes().all(|b| b.is_ascii_lowercase()) {
        Ok(())
    } else {
        Err(MtError::InvalidLanguage(code.to_string()))
    }
}
