use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::adapter::xmlrpc::{self, Value};
use crate::adapter::{engine_codes, AdapterError, BackendAdapter, HttpTransport, LanguagePair};
use crate::message::{MessageStore, TranslationJobMessage};

/// Remote decoder speaking XML-RPC. Lines are sent one call at a time so
/// the server can never merge them.
pub struct MosesServerAdapter {
    url: String,
    source_language: String,
    target_language: String,
    transport: Arc<dyn HttpTransport>,
}

impl MosesServerAdapter {
    pub fn new(
        url: String,
        source_language: String,
        target_language: String,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            url,
            source_language,
            target_language,
            transport,
        }
    }
}

#[async_trait]
impl BackendAdapter for MosesServerAdapter {
    fn name(&self) -> &'static str {
        "moses-server"
    }

    fn language_pairs(&self) -> BTreeSet<LanguagePair> {
        BTreeSet::from([(self.source_language.clone(), self.target_language.clone())])
    }

    fn language_code(&self, code: &str) -> Option<String> {
        (code == self.source_language || code == self.target_language).then(|| code.to_string())
    }

    async fn translate_message(
        &self,
        _store: &MessageStore,
        message: &mut TranslationJobMessage,
    ) -> Result<(), AdapterError> {
        engine_codes(self, message)?;

        let mut lines = Vec::new();
        for line in message.source_lines() {
            let reply = xmlrpc::call(
                self.transport.as_ref(),
                &self.url,
                "translate",
                &[Value::structure([("text", Value::from(line))])],
            )
            .await?;

            let text = reply
                .get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| AdapterError::Protocol("reply has no 'text' member".to_string()))?;
            lines.push(text.trim().replace('\n', " "));
        }

        message.target_text = Some(lines.join("\n"));
        Ok(())
    }
}
