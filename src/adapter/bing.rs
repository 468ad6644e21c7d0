use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;

use crate::adapter::batch::plan_batches;
use crate::adapter::http::HttpRequest;
use crate::adapter::xmlrpc::unescape;
use crate::adapter::{
    all_pairs, engine_codes, AdapterError, BackendAdapter, HttpTransport, LanguagePair,
};
use crate::message::{MessageStore, TranslationJobMessage};

pub const DEFAULT_URL: &str = "http://api.microsofttranslator.com/v2/Http.svc/TranslateArray";
pub const DEFAULT_MAX_LINES: usize = 100;

const ARRAYS_NS: &str = "http://schemas.microsoft.com/2003/10/Serialization/Arrays";

const LANGUAGES: [(&str, &str); 31] = [
    ("ara", "ar"),
    ("bul", "bg"),
    ("zho", "zh-CHS"),
    ("ces", "cs"),
    ("dan", "da"),
    ("nld", "nl"),
    ("eng", "en"),
    ("est", "et"),
    ("fin", "fi"),
    ("fra", "fr"),
    ("deu", "de"),
    ("ell", "el"),
    ("hat", "ht"),
    ("heb", "he"),
    ("hun", "hu"),
    ("ita", "it"),
    ("jpn", "ja"),
    ("kor", "ko"),
    ("lav", "lv"),
    ("lit", "lt"),
    ("nor", "no"),
    ("pol", "pl"),
    ("por", "pt"),
    ("ron", "ro"),
    ("rus", "ru"),
    ("slk", "sk"),
    ("slv", "sl"),
    ("spa", "es"),
    ("swe", "sv"),
    ("tha", "th"),
    ("tur", "tr"),
];

fn translated_text_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?is)<TranslatedText>(.*?)</TranslatedText>")
            .expect("TranslatedText pattern is valid")
    })
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn translate_array_request(app_id: &str, from: &str, to: &str, lines: &[&str]) -> String {
    let texts: Vec<String> = lines
        .iter()
        .map(|line| format!("<string xmlns=\"{}\">{}</string>", ARRAYS_NS, escape(line.trim())))
        .collect();

    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<TranslateArrayRequest>\n<AppId>{}</AppId>\n<From>{}</From>\n<Texts>\n{}\n</Texts>\n<To>{}</To>\n</TranslateArrayRequest>",
        escape(app_id),
        from,
        texts.join("\n"),
        to
    )
}

/// One entry per `<TranslatedText>` element, in document order.
pub fn parse_translate_array(body: &str) -> Vec<String> {
    translated_text_pattern()
        .captures_iter(body)
        .filter_map(|caps| caps.get(1))
        .map(|m| unescape(m.as_str()).trim().replace('\n', " "))
        .collect()
}

/// XML array API: every input line comes back as its own element, so no
/// sentinels are needed; the element count is still checked.
pub struct BingAdapter {
    url: String,
    app_id: String,
    max_lines: usize,
    transport: Arc<dyn HttpTransport>,
}

impl BingAdapter {
    pub fn new(
        url: String,
        app_id: String,
        max_lines: usize,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            url,
            app_id,
            max_lines,
            transport,
        }
    }
}

#[async_trait]
impl BackendAdapter for BingAdapter {
    fn name(&self) -> &'static str {
        "bing"
    }

    fn language_pairs(&self) -> BTreeSet<LanguagePair> {
        let codes: Vec<&str> = LANGUAGES.iter().map(|(code, _)| *code).collect();
        all_pairs(&codes)
    }

    fn language_code(&self, code: &str) -> Option<String> {
        LANGUAGES
            .iter()
            .find(|(generic, _)| *generic == code)
            .map(|(_, engine)| engine.to_string())
    }

    async fn translate_message(
        &self,
        _store: &MessageStore,
        message: &mut TranslationJobMessage,
    ) -> Result<(), AdapterError> {
        let (source, target) = engine_codes(self, message)?;
        let lines = message.source_lines();

        let mut translated = Vec::with_capacity(lines.len());
        for range in plan_batches(&lines, self.max_lines, usize::MAX) {
            let body =
                translate_array_request(&self.app_id, &source, &target, &lines[range.clone()]);
            let reply = self
                .transport
                .post(HttpRequest::xml(self.url.as_str(), body))
                .await?
                .into_success()?;

            let texts = parse_translate_array(&reply);
            if texts.len() != range.len() {
                return Err(AdapterError::LineMismatch {
                    expected: range.len(),
                    actual: texts.len(),
                });
            }
            translated.extend(texts);
        }

        message.target_text = Some(translated.join("\n"));
        Ok(())
    }
}
