use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::adapter::{engine_codes, AdapterError, BackendAdapter, LanguagePair};
use crate::message::{MessageStore, TranslationJobMessage};

/// Pairs served by the stock multi-pair decoder installation.
const MULTI_PAIRS: [(&str, &str); 17] = [
    ("ger", "eng"),
    ("gre", "rum"),
    ("slv", "eng"),
    ("rum", "eng"),
    ("rum", "gre"),
    ("rum", "ger"),
    ("lav", "lit"),
    ("lit", "rum"),
    ("hrv", "eng"),
    ("eng", "slv"),
    ("eng", "rum"),
    ("eng", "lav"),
    ("eng", "lit"),
    ("eng", "hrv"),
    ("eng", "est"),
    ("eng", "gre"),
    ("ger", "rum"),
];

/// Generic code to the code used in the decoder's config directory names.
const MULTI_CODES: [(&str, &str); 9] = [
    ("ger", "de"),
    ("eng", "en"),
    ("gre", "el"),
    ("rum", "ro"),
    ("slv", "sl"),
    ("lav", "lv"),
    ("lit", "lt"),
    ("hrv", "hr"),
    ("est", "et"),
];

pub fn default_multi_pairs() -> Vec<LanguagePair> {
    MULTI_PAIRS
        .iter()
        .map(|(s, t)| (s.to_string(), t.to_string()))
        .collect()
}

pub fn default_multi_codes() -> BTreeMap<String, String> {
    MULTI_CODES
        .iter()
        .map(|(generic, engine)| (generic.to_string(), engine.to_string()))
        .collect()
}

/// Where the decoder configuration for a pair lives.
#[derive(Debug, Clone)]
enum DecoderConfig {
    Fixed(PathBuf),
    /// `{source}` and `{target}` are replaced by the pair's engine codes.
    Template(String),
}

/// Local decoder fed through scratch files.
///
/// Runs `<command> -f <config> < <id>.source > <id>.target` and blocks until
/// the decoder exits, which is why it only ever runs inside an isolated
/// execution. A single-pair instance has one fixed config; a multi-pair
/// instance picks the config per request from a path template.
#[derive(Debug, Clone)]
pub struct MosesAdapter {
    name: &'static str,
    command: PathBuf,
    config: DecoderConfig,
    pairs: BTreeSet<LanguagePair>,
    codes: BTreeMap<String, String>,
}

impl MosesAdapter {
    pub fn new(
        command: PathBuf,
        config: PathBuf,
        source_language: String,
        target_language: String,
    ) -> Self {
        let codes = BTreeMap::from([
            (source_language.clone(), source_language.clone()),
            (target_language.clone(), target_language.clone()),
        ]);
        Self {
            name: "moses",
            command,
            config: DecoderConfig::Fixed(config),
            pairs: BTreeSet::from([(source_language, target_language)]),
            codes,
        }
    }

    pub fn multi_pair(
        command: PathBuf,
        config_template: String,
        pairs: impl IntoIterator<Item = LanguagePair>,
        codes: BTreeMap<String, String>,
    ) -> Self {
        Self {
            name: "moses-multi",
            command,
            config: DecoderConfig::Template(config_template),
            pairs: pairs.into_iter().collect(),
            codes,
        }
    }

    /// Decoder config for a pair given in engine codes.
    pub fn config_path(&self, source: &str, target: &str) -> PathBuf {
        match &self.config {
            DecoderConfig::Fixed(path) => path.clone(),
            DecoderConfig::Template(template) => PathBuf::from(
                template
                    .replace("{source}", source)
                    .replace("{target}", target),
            ),
        }
    }
}

fn remove_scratch(request_id: &str, path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(request_id, path = %path.display(), error = %e, "Failed to remove scratch file");
        }
    }
}

#[async_trait]
impl BackendAdapter for MosesAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn language_pairs(&self) -> BTreeSet<LanguagePair> {
        self.pairs.clone()
    }

    fn language_code(&self, code: &str) -> Option<String> {
        self.codes.get(code).cloned()
    }

    async fn translate_message(
        &self,
        store: &MessageStore,
        message: &mut TranslationJobMessage,
    ) -> Result<(), AdapterError> {
        let (source_code, target_code) = engine_codes(self, message)?;
        let pair = (
            message.source_language.clone(),
            message.target_language.clone(),
        );
        if !self.pairs.contains(&pair) {
            return Err(AdapterError::UnsupportedPair {
                source: pair.0,
                target: pair.1,
            });
        }
        let config = self.config_path(&source_code, &target_code);

        let source_path = store.scratch_path(&message.request_id, "source")?;
        let target_path = store.scratch_path(&message.request_id, "target")?;

        // The decoder only consumes newline-terminated lines.
        let mut source = message.source_text.clone();
        source.push('\n');
        fs::write(&source_path, source)?;

        tracing::debug!(
            request_id = %message.request_id,
            command = %self.command.display(),
            config = %config.display(),
            "Starting decoder"
        );

        let status = Command::new(&self.command)
            .arg("-f")
            .arg(&config)
            .stdin(Stdio::from(fs::File::open(&source_path)?))
            .stdout(Stdio::from(fs::File::create(&target_path)?))
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .status()
            .await;

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                remove_scratch(&message.request_id, &source_path);
                remove_scratch(&message.request_id, &target_path);
                return Err(e.into());
            }
        };
        if !status.success() {
            remove_scratch(&message.request_id, &source_path);
            remove_scratch(&message.request_id, &target_path);
            return Err(AdapterError::Decoder(format!(
                "{} exited with {}",
                self.command.display(),
                status
            )));
        }

        let output = fs::read_to_string(&target_path);
        remove_scratch(&message.request_id, &source_path);
        remove_scratch(&message.request_id, &target_path);
        let output = output?;
        let target = output.strip_suffix('\n').unwrap_or(&output);

        let expected = message.source_lines().len();
        let actual = target.split('\n').count();
        if actual != expected {
            return Err(AdapterError::LineMismatch { expected, actual });
        }

        message.target_text = Some(target.to_string());
        Ok(())
    }
}
