use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;

use crate::adapter::xmlrpc::{self, Value};
use crate::adapter::{engine_codes, AdapterError, BackendAdapter, HttpTransport, LanguagePair};
use crate::message::{MessageStore, TranslationJobMessage};

/// Packet key holding the unfiltered engine output.
pub const RAW_RESULT: &str = "RAW_RESULT";
/// Packet key holding the engine's parse trees.
pub const TREES: &str = "TREES";

const PAIRS: [(&str, &str); 10] = [
    ("eng", "fre"),
    ("eng", "ger"),
    ("eng", "spa"),
    ("fre", "eng"),
    ("fre", "ger"),
    ("ger", "eng"),
    ("ger", "spa"),
    ("ger", "fre"),
    ("spa", "eng"),
    ("spa", "ger"),
];

fn alternatives_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // <A[first|second|...]> keeps only the first reading
    PATTERN.get_or_init(|| {
        Regex::new(r"<.\[(.+?)(\|.+?)?\]>").expect("alternatives pattern is valid")
    })
}

/// Rule-based engine behind an XML-RPC wrapper.
pub struct LucyAdapter {
    url: String,
    transport: Arc<dyn HttpTransport>,
}

impl LucyAdapter {
    pub fn new(url: String, transport: Arc<dyn HttpTransport>) -> Self {
        Self { url, transport }
    }

    async fn is_alive(&self) -> bool {
        match xmlrpc::call(self.transport.as_ref(), &self.url, "isAlive", &[]).await {
            Ok(value) => value.as_bool().unwrap_or(false),
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "Lucy engine liveness check failed");
                false
            }
        }
    }
}

/// The reply is keyed by file name; `SPANISH` and `GERMAN` do not start
/// with their ISO 639-1 code.
fn result_key(engine_target: &str) -> String {
    let prefix: String = engine_target.chars().take(2).collect();
    let prefix = match prefix.as_str() {
        "SP" => "ES",
        "GE" => "DE",
        other => other,
    };
    format!("{}.txt", prefix)
}

pub fn filter_alternatives(text: &str) -> String {
    alternatives_pattern().replace_all(text, "$1").into_owned()
}

#[async_trait]
impl BackendAdapter for LucyAdapter {
    fn name(&self) -> &'static str {
        "lucy"
    }

    fn language_pairs(&self) -> BTreeSet<LanguagePair> {
        PAIRS
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    fn language_code(&self, code: &str) -> Option<String> {
        let engine = match code {
            "eng" => "ENGLISH",
            "fre" => "FRENCH",
            "ger" => "GERMAN",
            "spa" => "SPANISH",
            _ => return None,
        };
        Some(engine.to_string())
    }

    async fn translate_message(
        &self,
        _store: &MessageStore,
        message: &mut TranslationJobMessage,
    ) -> Result<(), AdapterError> {
        let (source, target) = engine_codes(self, message)?;

        if !self.is_alive().await {
            return Err(AdapterError::Unreachable(format!(
                "Lucy engine at {} is not alive",
                self.url
            )));
        }

        let reply = xmlrpc::call(
            self.transport.as_ref(),
            &self.url,
            "lucyTranslate",
            &[
                Value::from(message.source_text.as_str()),
                Value::from(source),
                Value::from(target.as_str()),
            ],
        )
        .await?;

        let key = result_key(&target);
        let raw = reply
            .get(&key)
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::Protocol(format!("reply has no {:?} member", key)))?;

        // Packets are kept even when the text below is rejected.
        message.push_packet(RAW_RESULT, raw);
        if let Some(trees) = reply.get("tre").and_then(Value::as_str) {
            message.push_packet(TREES, trees);
        }

        let mut filtered = filter_alternatives(raw);
        if filtered.ends_with('\n') && !message.source_text.ends_with('\n') {
            filtered.pop();
        }
        let expected = message.source_lines().len();
        let actual = filtered.split('\n').count();
        if actual != expected {
            return Err(AdapterError::LineMismatch { expected, actual });
        }

        message.target_text = Some(filtered);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_key_uses_iso_prefix() {
        assert_eq!(result_key("ENGLISH"), "EN.txt");
        assert_eq!(result_key("FRENCH"), "FR.txt");
        assert_eq!(result_key("SPANISH"), "ES.txt");
        assert_eq!(result_key("GERMAN"), "DE.txt");
    }

    #[test]
    fn alternatives_reduce_to_first_choice() {
        assert_eq!(
            filter_alternatives("The <A[house|home]> is <B[big]>."),
            "The house is big."
        );
        assert_eq!(filter_alternatives("no markup"), "no markup");
    }
}
