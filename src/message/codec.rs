use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use prost::Message;

use crate::error::Result;
use crate::message::TranslationJobMessage;

/// Serialize a message to its protobuf wire bytes.
pub fn encode(message: &TranslationJobMessage) -> Vec<u8> {
    message.encode_to_vec()
}

/// Parse protobuf wire bytes. Truncated or malformed input yields
/// [`MtError::CorruptMessage`](crate::error::MtError::CorruptMessage).
pub fn decode(bytes: &[u8]) -> Result<TranslationJobMessage> {
    Ok(TranslationJobMessage::decode(bytes)?)
}

/// Base64-armor binary payload for the text-only RPC transport.
pub fn armor(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn disarm(armored: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(armored.trim())?)
}
