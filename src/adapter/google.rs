use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData, RcDom};

use crate::adapter::batch::{interleave, plan_batches, reconstruct};
use crate::adapter::http::HttpRequest;
use crate::adapter::{
    all_pairs, engine_codes, AdapterError, BackendAdapter, HttpTransport, LanguagePair,
};
use crate::message::{MessageStore, TranslationJobMessage};

pub const DEFAULT_URL: &str = "http://translate.google.com/translate_t";
/// Source lines per request; the sentinels double the entry count.
pub const DEFAULT_MAX_LINES: usize = 100;
pub const DEFAULT_MAX_CHARS: usize = 5000;

const LANGUAGES: [(&str, &str); 57] = [
    ("afr", "af"),
    ("sqi", "sq"),
    ("ara", "ar"),
    ("hye", "hy"),
    ("aze", "az"),
    ("eus", "eu"),
    ("bel", "be"),
    ("bul", "bg"),
    ("cat", "ca"),
    ("zho", "zh-CN"),
    ("hrv", "hr"),
    ("ces", "cs"),
    ("dan", "da"),
    ("nld", "nl"),
    ("eng", "en"),
    ("est", "et"),
    ("tgl", "tl"),
    ("fin", "fi"),
    ("fra", "fr"),
    ("glg", "gl"),
    ("kat", "ka"),
    ("deu", "de"),
    ("ell", "el"),
    ("hat", "ht"),
    ("heb", "iw"),
    ("hin", "hi"),
    ("hun", "hu"),
    ("isl", "is"),
    ("ind", "id"),
    ("gle", "ga"),
    ("ita", "it"),
    ("jpn", "ja"),
    ("kor", "ko"),
    ("lav", "lv"),
    ("lit", "lt"),
    ("mkd", "mk"),
    ("msa", "ms"),
    ("mlt", "mt"),
    ("nor", "no"),
    ("fas", "fa"),
    ("pol", "pl"),
    ("por", "pt"),
    ("ron", "ro"),
    ("rus", "ru"),
    ("srp", "sr"),
    ("slk", "sk"),
    ("slv", "sl"),
    ("spa", "es"),
    ("swa", "sw"),
    ("swe", "sv"),
    ("tha", "th"),
    ("tur", "tr"),
    ("ukr", "uk"),
    ("urd", "ur"),
    ("vie", "vi"),
    ("cym", "cy"),
    ("yid", "yi"),
];

/// Pull the translated text out of the front end's HTML.
///
/// Every innermost `span` below the element with id `result_box` holds one
/// chunk of output. Chunks are trimmed and joined with newlines; `<br>`
/// inside a chunk is a hard line break.
pub fn extract_result(html: &str) -> Result<String, AdapterError> {
    let dom = parse_document(RcDom::default(), Default::default()).one(html);
    let result = find_by_id(&dom.document, "result_box")
        .ok_or_else(|| AdapterError::Protocol("result_box not found in reply".to_string()))?;

    let mut chunks = Vec::new();
    collect_chunks(&result, &mut chunks);
    Ok(chunks.join("\n"))
}

fn is_element(node: &Handle, tag: &str) -> bool {
    matches!(node.data, NodeData::Element { ref name, .. } if &*name.local == tag)
}

fn find_by_id(node: &Handle, id: &str) -> Option<Handle> {
    if let NodeData::Element { ref attrs, .. } = node.data {
        let matches = attrs
            .borrow()
            .iter()
            .any(|attr| &*attr.name.local == "id" && &*attr.value == id);
        if matches {
            return Some(node.clone());
        }
    }
    node.children
        .borrow()
        .iter()
        .find_map(|child| find_by_id(child, id))
}

fn contains_span(node: &Handle) -> bool {
    node.children
        .borrow()
        .iter()
        .any(|child| is_element(child, "span") || contains_span(child))
}

fn collect_chunks(node: &Handle, chunks: &mut Vec<String>) {
    for child in node.children.borrow().iter() {
        if is_element(child, "span") && !contains_span(child) {
            let mut text = String::new();
            push_text(child, &mut text);
            let text = text.trim();
            if !text.is_empty() {
                chunks.push(text.to_string());
            }
        } else {
            collect_chunks(child, chunks);
        }
    }
}

fn push_text(node: &Handle, out: &mut String) {
    for child in node.children.borrow().iter() {
        match child.data {
            NodeData::Text { ref contents } => out.push_str(&contents.borrow()),
            NodeData::Element { .. } if is_element(child, "br") => out.push('\n'),
            _ => push_text(child, out),
        }
    }
}

/// Scraped web front end. Text is sent in sentinel-interleaved batches and
/// realigned with [`reconstruct`].
pub struct GoogleAdapter {
    url: String,
    max_lines: usize,
    max_chars: usize,
    transport: Arc<dyn HttpTransport>,
}

impl GoogleAdapter {
    pub fn new(
        url: String,
        max_lines: usize,
        max_chars: usize,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            url,
            max_lines,
            max_chars,
            transport,
        }
    }
}

#[async_trait]
impl BackendAdapter for GoogleAdapter {
    fn name(&self) -> &'static str {
        "google"
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
        for range in plan_batches(&lines, self.max_lines, self.max_chars) {
            let text = interleave(&lines[range.clone()], range.start)?;
            let request = HttpRequest::form(
                self.url.as_str(),
                vec![
                    ("js".to_string(), "n".to_string()),
                    ("sl".to_string(), source.clone()),
                    ("tl".to_string(), target.clone()),
                    ("text".to_string(), text),
                ],
            );

            let html = self.transport.post(request).await?.into_success()?;
            let reply = extract_result(&html)?;
            translated.extend(reconstruct(&reply, range.len())?);

            tracing::debug!(
                request_id = %message.request_id,
                lines = range.len(),
                "Batch translated"
            );
        }

        message.target_text = Some(translated.join("\n"));
        Ok(())
    }
}
