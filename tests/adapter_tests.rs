use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use mtland::adapter::batch::SENTINEL;
use mtland::adapter::bing::BingAdapter;
use mtland::adapter::google::GoogleAdapter;
use mtland::adapter::lucy::{LucyAdapter, RAW_RESULT, TREES};
use mtland::adapter::moses::{self, MosesAdapter};
use mtland::adapter::moses_server::MosesServerAdapter;
use mtland::adapter::xmlrpc::{self, Value};
use mtland::adapter::{
    AdapterError, BackendAdapter, HttpRequest, HttpResponse, HttpTransport,
};
use mtland::adapter::http::HttpBody;
use mtland::message::{MessageStore, TranslationJobMessage};

type Handler = Box<dyn Fn(&HttpRequest) -> Result<HttpResponse, AdapterError> + Send + Sync>;

/// Transport double that records requests and answers from a closure
struct FakeTransport {
    handler: Handler,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeTransport {
    fn new(
        handler: impl Fn(&HttpRequest) -> Result<HttpResponse, AdapterError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn post(&self, request: HttpRequest) -> Result<HttpResponse, AdapterError> {
        let response = (self.handler)(&request);
        self.requests.lock().unwrap().push(request);
        response
    }
}

fn store() -> (tempfile::TempDir, MessageStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = MessageStore::open(dir.path()).unwrap();
    (dir, store)
}

/// Persist a message, run the adapter over it and read the result back
async fn run(
    adapter: &dyn BackendAdapter,
    store: &MessageStore,
    message: TranslationJobMessage,
) -> (Result<(), AdapterError>, TranslationJobMessage) {
    store.write(&message).unwrap();
    let result = adapter.translate(store, &message.request_id).await;
    (result, store.read(&message.request_id).unwrap())
}

fn form_field<'a>(request: &'a HttpRequest, name: &str) -> &'a str {
    let HttpBody::Form(fields) = &request.body else {
        panic!("expected a form body");
    };
    fields
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
        .unwrap()
}

fn xml_body(request: &HttpRequest) -> &str {
    let HttpBody::Text { body, .. } = &request.body else {
        panic!("expected an XML body");
    };
    body
}

// =============================================================================
// Google
// =============================================================================

/// Render the engine's answer the way the web front end does: each source
/// line split over two spans, sentinels glued onto the preceding span.
fn google_page(text: &str, drop_sentinel: bool) -> String {
    let mut spans: Vec<String> = Vec::new();
    let mut dropped = false;
    for line in text.split('\n') {
        if line == SENTINEL {
            if drop_sentinel && !dropped {
                dropped = true;
                continue;
            }
            match spans.last_mut() {
                Some(last) => last.push_str(" [[ MTLAND_SPLITTER ]]"),
                None => spans.push(SENTINEL.to_string()),
            }
            continue;
        }
        let upper = line.to_uppercase();
        let words: Vec<&str> = upper.split_whitespace().collect();
        let (head, tail) = words.split_at(words.len() / 2);
        for part in [head, tail] {
            if !part.is_empty() {
                spans.push(part.join(" "));
            }
        }
    }

    let body: Vec<String> = spans
        .iter()
        .map(|s| format!("<span title=\"orig\">{}</span>", s))
        .collect();
    format!(
        "<html><div id=gt-res-content><span id=result_box class=\"long_text\">{}</span></div></html>",
        body.join("<br>")
    )
}

fn google(transport: Arc<FakeTransport>, max_lines: usize) -> GoogleAdapter {
    GoogleAdapter::new("http://fake/translate_t".to_string(), max_lines, 5000, transport)
}

#[tokio::test]
async fn test_google_rewrapped_reply_keeps_line_count() {
    let (_dir, store) = store();
    let transport = FakeTransport::new(|req| Ok(HttpResponse::ok(google_page(form_field(req, "text"), false))));
    let adapter = google(transport.clone(), 2);

    let source = "the quick brown fox\njumps over\n\nthe lazy dog today\nend";
    let (result, stored) = run(&adapter, &store, TranslationJobMessage::new("eng", "fra", source)).await;
    result.unwrap();

    assert_eq!(
        stored.target_text.as_deref(),
        Some("THE QUICK BROWN FOX\nJUMPS OVER\n\nTHE LAZY DOG TODAY\nEND")
    );
    // 5 lines in batches of 2
    assert_eq!(transport.request_count(), 3);

    let requests = transport.requests.lock().unwrap();
    assert_eq!(form_field(&requests[0], "sl"), "en");
    assert_eq!(form_field(&requests[0], "tl"), "fr");
    assert_eq!(
        form_field(&requests[0], "text"),
        format!("the quick brown fox\n{s}\njumps over\n{s}", s = SENTINEL)
    );
}

#[tokio::test]
async fn test_google_dropped_sentinel_yields_error_artifact() {
    let (_dir, store) = store();
    let transport = FakeTransport::new(|req| Ok(HttpResponse::ok(google_page(form_field(req, "text"), true))));
    let adapter = google(transport, 100);

    let (result, stored) = run(
        &adapter,
        &store,
        TranslationJobMessage::new("eng", "fra", "one\ntwo\nthree"),
    )
    .await;
    result.unwrap();

    let target = stored.target_text.unwrap();
    assert!(target.starts_with("ERROR: "), "{}", target);
}

#[tokio::test]
async fn test_google_sentinel_in_source_is_rejected() {
    let (_dir, store) = store();
    let transport = FakeTransport::new(|_| Ok(HttpResponse::ok("")));
    let adapter = google(transport.clone(), 100);

    let source = format!("fine\nsneaky {}", SENTINEL);
    let (result, stored) = run(&adapter, &store, TranslationJobMessage::new("eng", "fra", source)).await;
    result.unwrap();

    assert!(stored.target_text.as_deref().unwrap().starts_with("ERROR: "));
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn test_unsupported_language_stops_before_any_call() {
    let (_dir, store) = store();
    let transport = FakeTransport::new(|_| Ok(HttpResponse::ok("")));
    let adapter = google(transport.clone(), 100);

    let (result, stored) = run(&adapter, &store, TranslationJobMessage::new("eng", "xxx", "hi")).await;
    assert!(matches!(
        result,
        Err(AdapterError::UnsupportedLanguage { code }) if code == "xxx"
    ));
    assert!(stored.target_text.is_none());
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn test_backend_failure_leaves_message_untouched() {
    let (_dir, store) = store();
    let transport = FakeTransport::new(|_| {
        Ok(HttpResponse {
            status: 503,
            body: "busy".to_string(),
        })
    });
    let adapter = google(transport, 100);

    let (result, stored) = run(&adapter, &store, TranslationJobMessage::new("eng", "fra", "hi")).await;
    assert!(matches!(result, Err(AdapterError::Backend { status: 503, .. })));
    assert!(stored.target_text.is_none());
}

// =============================================================================
// Bing
// =============================================================================

fn bing_reply(texts: &[String]) -> String {
    let items: Vec<String> = texts
        .iter()
        .map(|t| {
            format!(
                "<TranslateArrayResponse><From>en</From><TranslatedText>{}</TranslatedText></TranslateArrayResponse>",
                t
            )
        })
        .collect();
    format!("<ArrayOfTranslateArrayResponse>{}</ArrayOfTranslateArrayResponse>", items.join(""))
}

fn bing_strings(body: &str) -> Vec<String> {
    let pattern = regex::Regex::new(r"<string[^>]*>(.*?)</string>").unwrap();
    pattern
        .captures_iter(body)
        .map(|caps| caps[1].to_string())
        .collect()
}

#[tokio::test]
async fn test_bing_translates_in_batches() {
    let (_dir, store) = store();
    let transport = FakeTransport::new(|req| {
        let texts: Vec<String> = bing_strings(xml_body(req))
            .iter()
            .map(|s| s.to_uppercase())
            .collect();
        Ok(HttpResponse::ok(bing_reply(&texts)))
    });
    let adapter = BingAdapter::new("http://fake/TranslateArray".to_string(), "APPID".to_string(), 2, transport.clone());

    let (result, stored) = run(
        &adapter,
        &store,
        TranslationJobMessage::new("deu", "eng", "eins\nzwei\ndrei"),
    )
    .await;
    result.unwrap();

    assert_eq!(stored.target_text.as_deref(), Some("EINS\nZWEI\nDREI"));
    assert_eq!(transport.request_count(), 2);
    let requests = transport.requests.lock().unwrap();
    let body = xml_body(&requests[0]);
    assert!(body.contains("<AppId>APPID</AppId>"));
    assert!(body.contains("<From>de</From>"));
    assert!(body.contains("<To>en</To>"));
}

#[tokio::test]
async fn test_bing_short_reply_yields_error_artifact() {
    let (_dir, store) = store();
    let transport = FakeTransport::new(|_| Ok(HttpResponse::ok(bing_reply(&["ONLY".to_string()]))));
    let adapter = BingAdapter::new("http://fake".to_string(), "id".to_string(), 100, transport);

    let (result, stored) = run(&adapter, &store, TranslationJobMessage::new("eng", "fra", "a\nb")).await;
    result.unwrap();
    assert!(stored.target_text.as_deref().unwrap().starts_with("ERROR: "));
}

// =============================================================================
// Lucy
// =============================================================================

fn lucy_engine(alive: bool, reply_text: &'static str) -> Arc<FakeTransport> {
    FakeTransport::new(move |req| {
        let (method, params) = xmlrpc::decode_call(xml_body(req))?;
        let value = match method.as_str() {
            "isAlive" => Value::Bool(alive),
            "lucyTranslate" => {
                assert_eq!(params[1], Value::from("ENGLISH"));
                let key = match params[2].as_str() {
                    Some("GERMAN") => "DE.txt",
                    Some("SPANISH") => "ES.txt",
                    _ => "FR.txt",
                };
                Value::structure([
                    (key, Value::from(reply_text)),
                    ("tre", Value::from("(S (NP hello))")),
                ])
            }
            other => return Ok(HttpResponse::ok(xmlrpc::encode_fault(1, other))),
        };
        Ok(HttpResponse::ok(xmlrpc::encode_response(&value)))
    })
}

fn lucy(transport: Arc<FakeTransport>) -> LucyAdapter {
    LucyAdapter::new("http://fake/RPC2".to_string(), transport)
}

#[tokio::test]
async fn test_lucy_filters_alternatives_and_keeps_packets() {
    let (_dir, store) = store();
    let adapter = lucy(lucy_engine(true, "Hallo <A[Welt|Erde]>\nGuten <B[Tag|Morgen]>\n"));

    let (result, stored) = run(
        &adapter,
        &store,
        TranslationJobMessage::new("eng", "ger", "Hello world\nGood day"),
    )
    .await;
    result.unwrap();

    assert_eq!(stored.target_text.as_deref(), Some("Hallo Welt\nGuten Tag"));
    assert_eq!(
        stored.packet(RAW_RESULT),
        Some("Hallo <A[Welt|Erde]>\nGuten <B[Tag|Morgen]>\n")
    );
    assert_eq!(stored.packet(TREES), Some("(S (NP hello))"));
}

#[tokio::test]
async fn test_lucy_dead_engine_is_unreachable() {
    let (_dir, store) = store();
    let transport = lucy_engine(false, "unused");
    let adapter = lucy(transport.clone());

    let (result, stored) = run(&adapter, &store, TranslationJobMessage::new("eng", "spa", "Hello")).await;
    assert!(matches!(result, Err(AdapterError::Unreachable(_))));
    assert!(stored.target_text.is_none());
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn test_lucy_line_mismatch_keeps_raw_result() {
    let (_dir, store) = store();
    let adapter = lucy(lucy_engine(true, "Uno dos tres"));

    let (result, stored) = run(
        &adapter,
        &store,
        TranslationJobMessage::new("eng", "spa", "One\nTwo\nThree"),
    )
    .await;
    result.unwrap();

    assert!(stored.target_text.as_deref().unwrap().starts_with("ERROR: "));
    assert_eq!(stored.packet(RAW_RESULT), Some("Uno dos tres"));
}

#[tokio::test]
async fn test_lucy_rejects_unmapped_language() {
    let (_dir, store) = store();
    let transport = lucy_engine(true, "unused");
    let adapter = lucy(transport.clone());

    let (result, _) = run(&adapter, &store, TranslationJobMessage::new("eng", "ita", "Hello")).await;
    assert!(matches!(result, Err(AdapterError::UnsupportedLanguage { .. })));
    assert_eq!(transport.request_count(), 0);
}

// =============================================================================
// Moses server
// =============================================================================

#[tokio::test]
async fn test_moses_server_translates_line_by_line() {
    let (_dir, store) = store();
    let transport = FakeTransport::new(|req| {
        let (method, params) = xmlrpc::decode_call(xml_body(req))?;
        assert_eq!(method, "translate");
        let text = params[0].get("text").and_then(Value::as_str).unwrap_or_default();
        let reply = Value::structure([("text", Value::from(format!(" {}\n", text.to_uppercase())))]);
        Ok(HttpResponse::ok(xmlrpc::encode_response(&reply)))
    });
    let adapter = MosesServerAdapter::new(
        "http://fake/RPC2".to_string(),
        "eng".to_string(),
        "fre".to_string(),
        transport.clone(),
    );

    let (result, stored) = run(
        &adapter,
        &store,
        TranslationJobMessage::new("eng", "fre", "first line\nsecond line"),
    )
    .await;
    result.unwrap();

    assert_eq!(stored.target_text.as_deref(), Some("FIRST LINE\nSECOND LINE"));
    assert_eq!(transport.request_count(), 2);
}

#[tokio::test]
async fn test_moses_server_fault_fails_the_job() {
    let (_dir, store) = store();
    let transport = FakeTransport::new(|_| Ok(HttpResponse::ok(xmlrpc::encode_fault(-32601, "overloaded"))));
    let adapter = MosesServerAdapter::new(
        "http://fake/RPC2".to_string(),
        "eng".to_string(),
        "fre".to_string(),
        transport,
    );

    let (result, stored) = run(&adapter, &store, TranslationJobMessage::new("eng", "fre", "x")).await;
    assert!(matches!(result, Err(AdapterError::Fault { ref message, .. }) if message == "overloaded"));
    assert!(stored.target_text.is_none());
}

// =============================================================================
// Moses (local decoder)
// =============================================================================

/// A stand-in decoder: `/bin/sh -f <script>` runs the script over stdin
fn decoder_script(dir: &std::path::Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("decoder.sh");
    std::fs::write(&path, body).unwrap();
    path
}

fn moses(script: std::path::PathBuf) -> MosesAdapter {
    MosesAdapter::new("/bin/sh".into(), script, "eng".to_string(), "fre".to_string())
}

#[tokio::test]
async fn test_moses_runs_decoder_over_scratch_files() {
    let (dir, store) = store();
    let adapter = moses(decoder_script(dir.path(), "tr a-z A-Z\n"));

    let message = TranslationJobMessage::new("eng", "fre", "hello\nworld");
    let id = message.request_id.clone();
    let (result, stored) = run(&adapter, &store, message).await;
    result.unwrap();

    assert_eq!(stored.target_text.as_deref(), Some("HELLO\nWORLD"));
    assert!(!store.scratch_path(&id, "source").unwrap().exists());
    assert!(!store.scratch_path(&id, "target").unwrap().exists());
}

#[tokio::test]
async fn test_moses_line_mismatch_yields_error_artifact() {
    let (dir, store) = store();
    let adapter = moses(decoder_script(dir.path(), "tr -d '\\n'; echo\n"));

    let (result, stored) = run(
        &adapter,
        &store,
        TranslationJobMessage::new("eng", "fre", "one\ntwo\nthree"),
    )
    .await;
    result.unwrap();
    assert!(stored.target_text.as_deref().unwrap().starts_with("ERROR: "));
}

#[tokio::test]
async fn test_moses_decoder_failure_leaves_message_untouched() {
    let (dir, store) = store();
    let adapter = moses(decoder_script(
        dir.path(),
        "echo 'decoder: missing phrase table' >&2\nexit 3\n",
    ));

    let message = TranslationJobMessage::new("eng", "fre", "one");
    let id = message.request_id.clone();
    let (result, stored) = run(&adapter, &store, message).await;
    assert!(matches!(result, Err(AdapterError::Decoder(_))));
    assert!(stored.target_text.is_none());

    // Scratch files go on the failure path too
    assert!(!store.scratch_path(&id, "source").unwrap().exists());
    assert!(!store.scratch_path(&id, "target").unwrap().exists());
}

#[tokio::test]
async fn test_moses_only_serves_its_pair() {
    let (dir, store) = store();
    let adapter = moses(decoder_script(dir.path(), "cat\n"));
    assert_eq!(adapter.language_pairs().len(), 1);

    let (result, _) = run(&adapter, &store, TranslationJobMessage::new("deu", "fre", "x")).await;
    assert!(matches!(result, Err(AdapterError::UnsupportedLanguage { code }) if code == "deu"));
}

#[tokio::test]
async fn test_multi_pair_moses_picks_config_per_pair() {
    let (dir, store) = store();
    std::fs::write(dir.path().join("de-en.sh"), "tr a-z A-Z\n").unwrap();
    std::fs::write(dir.path().join("en-lv.sh"), "sed 's/^/lv: /'\n").unwrap();
    let template = format!("{}/{{source}}-{{target}}.sh", dir.path().display());
    let adapter = MosesAdapter::multi_pair(
        "/bin/sh".into(),
        template,
        moses::default_multi_pairs(),
        moses::default_multi_codes(),
    );

    let (result, stored) = run(&adapter, &store, TranslationJobMessage::new("ger", "eng", "guten\ntag")).await;
    result.unwrap();
    assert_eq!(stored.target_text.as_deref(), Some("GUTEN\nTAG"));

    let (result, stored) = run(&adapter, &store, TranslationJobMessage::new("eng", "lav", "hello")).await;
    result.unwrap();
    assert_eq!(stored.target_text.as_deref(), Some("lv: hello"));
}

#[tokio::test]
async fn test_multi_pair_moses_refuses_unlisted_direction() {
    let (dir, store) = store();
    let template = format!("{}/{{source}}-{{target}}.sh", dir.path().display());
    let adapter = MosesAdapter::multi_pair(
        "/bin/sh".into(),
        template,
        moses::default_multi_pairs(),
        moses::default_multi_codes(),
    );

    // Both codes are known, but only ger->eng is installed.
    let (result, stored) = run(&adapter, &store, TranslationJobMessage::new("eng", "ger", "hello")).await;
    assert!(matches!(
        result,
        Err(AdapterError::UnsupportedPair { ref source, ref target }) if source == "eng" && target == "ger"
    ));
    assert!(stored.target_text.is_none());

    // Listed pair whose config is missing: the decoder fails.
    let (result, _) = run(&adapter, &store, TranslationJobMessage::new("eng", "est", "hello")).await;
    assert!(matches!(result, Err(AdapterError::Decoder(_))));
}
