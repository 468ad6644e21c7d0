use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{MtError, Result};
use crate::message::{codec, TranslationJobMessage};

const MESSAGE_EXTENSION: &str = "message";
const PARTIAL_EXTENSION: &str = "message.tmp";

/// Extensions of per-job scratch files that local adapters may leave behind.
pub const SCRATCH_EXTENSIONS: [&str; 2] = ["source", "target"];

/// Flat directory of serialized messages, one blob per request id.
///
/// Blobs are named `<request_id>.message`. Writes go through a temporary
/// sibling and a rename so a concurrent reader never sees a half-written
/// message.
#[derive(Debug, Clone)]
pub struct MessageStore {
    dir: PathBuf,
}

impl MessageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the directory if needed and return a store rooted there.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(dir);
        fs::create_dir_all(&store.dir)?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, request_id: &str) -> Result<PathBuf> {
        self.file(request_id, MESSAGE_EXTENSION)
    }

    /// Path of a scratch file such as `<request_id>.source`.
    pub fn scratch_path(&self, request_id: &str, extension: &str) -> Result<PathBuf> {
        self.file(request_id, extension)
    }

    pub fn exists(&self, request_id: &str) -> bool {
        self.path(request_id).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Read the raw blob. A missing file is reported as
    /// [`MtError::MissingMessage`], never as an empty message.
    pub fn read_raw(&self, request_id: &str) -> Result<Vec<u8>> {
        let path = self.path(request_id)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(MtError::MissingMessage {
                request_id: request_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn read(&self, request_id: &str) -> Result<TranslationJobMessage> {
        codec::decode(&self.read_raw(request_id)?)
    }

    pub fn write(&self, message: &TranslationJobMessage) -> Result<()> {
        let path = self.path(&message.request_id)?;
        let partial = self.file(&message.request_id, PARTIAL_EXTENSION)?;

        let mut file = fs::File::create(&partial)?;
        file.write_all(&codec::encode(message))?;
        file.sync_all()?;
        drop(file);

        fs::rename(&partial, &path)?;
        Ok(())
    }

    /// Remove the blob and every file derived from it. Files that do not
    /// exist are skipped.
    pub fn remove(&self, request_id: &str) -> Result<()> {
        let mut extensions = vec![MESSAGE_EXTENSION, PARTIAL_EXTENSION];
        extensions.extend(SCRATCH_EXTENSIONS);

        for extension in extensions {
            let path = self.file(request_id, extension)?;
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn file(&self, request_id: &str, extension: &str) -> Result<PathBuf> {
        validate_request_id(request_id)?;
        Ok(self.dir.join(format!("{}.{}", request_id, extension)))
    }
}

/// Request ids become file names, so only `[A-Za-z0-9_-]` is accepted.
pub fn validate_request_id(request_id: &str) -> Result<()> {
    let valid = !request_id.is_empty()
        && request_id.len() <= 128
        && request_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');

    if valid {
        Ok(())
    } else {
        Err(MtError::InvalidRequestId(request_id.to_string()))
    }
}
