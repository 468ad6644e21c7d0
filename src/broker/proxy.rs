use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;

use crate::adapter::{xmlrpc, LanguagePair};
use crate::error::{MtError, Result};
use crate::message::{self, TranslationJobMessage};
use crate::rpc::protocol::{WorkerCall, FETCH_ERROR, FETCH_NOT_READY, RPC_PATH};

/// Outcome of `fetch_translation` as seen by the broker.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    Message(TranslationJobMessage),
    NotReady,
    Error,
}

/// Broker-side handle on one worker's RPC surface, spoken as XML-RPC.
///
/// Every transport or protocol failure is logged and collapsed into the
/// conservative answer for that call (`false`, empty, `Fetched::Error`).
/// Callers cannot tell an unreachable worker from a negative reply.
#[derive(Debug, Clone)]
pub struct WorkerProxy {
    name: String,
    endpoint: String,
    client: reqwest::Client,
}

impl WorkerProxy {
    pub fn new(name: impl Into<String>, base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: name.into(),
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), RPC_PATH),
            client,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Raw call; errors are returned rather than collapsed. A fault reply
    /// is an error too.
    pub async fn call<T: DeserializeOwned>(&self, call: &WorkerCall) -> Result<T> {
        let body = xmlrpc::encode_call(call.method(), &call.xmlrpc_params());
        let text = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let value = xmlrpc::decode_response(&text).map_err(|e| MtError::RpcReply(e.to_string()))?;
        serde_json::from_value(value.into()).map_err(|e| MtError::RpcReply(e.to_string()))
    }

    async fn call_or<T: DeserializeOwned>(&self, call: WorkerCall, fallback: T) -> T {
        match self.call(&call).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(
                    worker = %self.name,
                    method = call.method(),
                    error = %e,
                    "Worker call failed"
                );
                fallback
            }
        }
    }

    pub async fn is_alive(&self) -> bool {
        self.call_or(WorkerCall::IsAlive, false).await
    }

    pub async fn is_busy(&self) -> bool {
        self.call_or(WorkerCall::IsBusy, false).await
    }

    pub async fn is_ready(&self, request_id: &str) -> bool {
        self.call_or(WorkerCall::IsReady(request_id.to_string()), false)
            .await
    }

    pub async fn is_valid(&self, request_id: &str) -> bool {
        self.call_or(WorkerCall::IsValid(request_id.to_string()), false)
            .await
    }

    pub async fn start_translation(&self, message: &TranslationJobMessage) -> bool {
        let armored = message::armor(&message::encode(message));
        self.call_or(WorkerCall::StartTranslation(armored), false)
            .await
    }

    pub async fn fetch_translation(&self, request_id: &str) -> Fetched {
        let text: String = self
            .call_or(
                WorkerCall::FetchTranslation(request_id.to_string()),
                FETCH_ERROR.to_string(),
            )
            .await;

        match text.as_str() {
            FETCH_ERROR => Fetched::Error,
            FETCH_NOT_READY => Fetched::NotReady,
            armored => match decode_armored(armored) {
                Ok(message) => Fetched::Message(message),
                Err(e) => {
                    tracing::warn!(worker = %self.name, request_id, error = %e, "Undecodable fetch reply");
                    Fetched::Error
                }
            },
        }
    }

    pub async fn delete_translation(&self, request_id: &str) -> bool {
        self.call_or(WorkerCall::DeleteTranslation(request_id.to_string()), false)
            .await
    }

    pub async fn language_pairs(&self) -> Vec<LanguagePair> {
        self.call_or(WorkerCall::LanguagePairs, Vec::new()).await
    }

    pub async fn list_requests(&self) -> Vec<String> {
        self.call_or(WorkerCall::ListRequests, Vec::new()).await
    }

    /// Ask the worker to kill its jobs and exit. Returns whether the worker
    /// acknowledged.
    pub async fn stop_worker(&self) -> bool {
        match self.call::<serde_json::Value>(&WorkerCall::StopWorker).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(worker = %self.name, error = %e, "Worker call failed");
                false
            }
        }
    }
}

fn decode_armored(armored: &str) -> Result<TranslationJobMessage> {
    let bytes = message::disarm(armored)?;
    message::decode(&bytes)
}
