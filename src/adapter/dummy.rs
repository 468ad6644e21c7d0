use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;

use crate::adapter::{AdapterError, BackendAdapter, LanguagePair};
use crate::message::{validate_language, MessageStore, TranslationJobMessage};

/// Uppercases the source text. Any well-formed code maps to itself, so the
/// adapter accepts every language pair.
#[derive(Debug, Clone, Default)]
pub struct DummyAdapter {
    delay: Duration,
}

impl DummyAdapter {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
        }
    }
}

#[async_trait]
impl BackendAdapter for DummyAdapter {
    fn name(&self) -> &'static str {
        "dummy"
    }

    /// Empty set: the dummy advertises no fixed pairs and accepts any.
    fn language_pairs(&self) -> BTreeSet<LanguagePair> {
        BTreeSet::new()
    }

    fn language_code(&self, code: &str) -> Option<String> {
        validate_language(code).ok().map(|_| code.to_string())
    }

    async fn translate_message(
        &self,
        _store: &MessageStore,
        message: &mut TranslationJobMessage,
    ) -> Result<(), AdapterError> {
        super::engine_codes(self, message)?;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        message.target_text = Some(message.source_text.to_uppercase());
        Ok(())
    }
}
