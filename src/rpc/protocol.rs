use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapter::xmlrpc::Value;
use crate::adapter::LanguagePair;

/// Endpoint every call is POSTed to.
pub const RPC_PATH: &str = "/RPC2";

/// `fetch_translation` reply for unknown ids and unreadable results.
pub const FETCH_ERROR: &str = "ERROR";
/// `fetch_translation` reply while the job is still running.
pub const FETCH_NOT_READY: &str = "NOT_READY";

/// XML-RPC fault codes, following the xmlrpc-epi convention.
pub const FAULT_PARSE_ERROR: i64 = -32700;
pub const FAULT_UNKNOWN_METHOD: i64 = -32601;
pub const FAULT_INVALID_PARAMS: i64 = -32602;

/// Why an XML-RPC `methodCall` does not name a worker call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("method {0:?} is not supported")]
    UnknownMethod(String),

    #[error("{method} takes {expected} string parameter(s)")]
    InvalidParams { method: String, expected: usize },
}

impl CallError {
    pub fn fault_code(&self) -> i64 {
        match self {
            CallError::UnknownMethod(_) => FAULT_UNKNOWN_METHOD,
            CallError::InvalidParams { .. } => FAULT_INVALID_PARAMS,
        }
    }
}

/// A call on the worker's RPC surface.
///
/// XML-RPC is the primary encoding: a `methodCall` named after the method
/// with the request id or armored message as its only string parameter.
/// The JSON encoding is `{"method": "is_ready", "params": "<request_id>"}`;
/// nullary methods carry no `params`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum WorkerCall {
    IsAlive,
    IsBusy,
    IsReady(String),
    IsValid(String),
    /// Base64-armored serialized message.
    StartTranslation(String),
    FetchTranslation(String),
    DeleteTranslation(String),
    LanguagePairs,
    ListRequests,
    StopWorker,
}

impl WorkerCall {
    pub fn method(&self) -> &'static str {
        match self {
            WorkerCall::IsAlive => "is_alive",
            WorkerCall::IsBusy => "is_busy",
            WorkerCall::IsReady(_) => "is_ready",
            WorkerCall::IsValid(_) => "is_valid",
            WorkerCall::StartTranslation(_) => "start_translation",
            WorkerCall::FetchTranslation(_) => "fetch_translation",
            WorkerCall::DeleteTranslation(_) => "delete_translation",
            WorkerCall::LanguagePairs => "language_pairs",
            WorkerCall::ListRequests => "list_requests",
            WorkerCall::StopWorker => "stop_worker",
        }
    }

    pub fn from_xmlrpc(method: &str, params: &[Value]) -> Result<Self, CallError> {
        let invalid = |expected| CallError::InvalidParams {
            method: method.to_string(),
            expected,
        };
        let arg = || match params {
            [Value::Str(arg)] => Ok(arg.clone()),
            _ => Err(invalid(1)),
        };
        let nullary = |call| {
            if params.is_empty() {
                Ok(call)
            } else {
                Err(invalid(0))
            }
        };

        match method {
            "is_alive" => nullary(WorkerCall::IsAlive),
            "is_busy" => nullary(WorkerCall::IsBusy),
            "is_ready" => arg().map(WorkerCall::IsReady),
            "is_valid" => arg().map(WorkerCall::IsValid),
            "start_translation" => arg().map(WorkerCall::StartTranslation),
            "fetch_translation" => arg().map(WorkerCall::FetchTranslation),
            "delete_translation" => arg().map(WorkerCall::DeleteTranslation),
            "language_pairs" => nullary(WorkerCall::LanguagePairs),
            "list_requests" => nullary(WorkerCall::ListRequests),
            "stop_worker" => nullary(WorkerCall::StopWorker),
            other => Err(CallError::UnknownMethod(other.to_string())),
        }
    }

    pub fn xmlrpc_params(&self) -> Vec<Value> {
        match self {
            WorkerCall::IsReady(arg)
            | WorkerCall::IsValid(arg)
            | WorkerCall::StartTranslation(arg)
            | WorkerCall::FetchTranslation(arg)
            | WorkerCall::DeleteTranslation(arg) => vec![Value::from(arg.as_str())],
            _ => Vec::new(),
        }
    }
}

/// Result of a call. There is no fault channel: failures are sentinels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum WorkerReply {
    Bool(bool),
    Text(String),
    Pairs(Vec<LanguagePair>),
    Ids(Vec<String>),
    Null,
}

impl WorkerReply {
    /// Pairs become two-element arrays; `Null` is `<nil/>`.
    pub fn to_xmlrpc(&self) -> Value {
        match self {
            WorkerReply::Bool(b) => Value::Bool(*b),
            WorkerReply::Text(text) => Value::from(text.as_str()),
            WorkerReply::Pairs(pairs) => Value::Array(
                pairs
                    .iter()
                    .map(|(source, target)| {
                        Value::Array(vec![Value::from(source.as_str()), Value::from(target.as_str())])
                    })
                    .collect(),
            ),
            WorkerReply::Ids(ids) => Value::Array(ids.iter().map(|id| Value::from(id.as_str())).collect()),
            WorkerReply::Null => Value::Nil,
        }
    }
}

/// JSON reply envelope: `{"result": <value>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse<T> {
    pub result: T,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn calls_use_method_and_params() {
        let call = WorkerCall::IsReady("abc".to_string());
        assert_eq!(
            serde_json::to_value(&call).unwrap(),
            json!({"method": "is_ready", "params": "abc"})
        );
        assert_eq!(
            serde_json::to_value(WorkerCall::ListRequests).unwrap(),
            json!({"method": "list_requests"})
        );
    }

    #[test]
    fn nullary_calls_parse_without_params() {
        let call: WorkerCall = serde_json::from_str(r#"{"method":"stop_worker"}"#).unwrap();
        assert_eq!(call, WorkerCall::StopWorker);
        assert_eq!(call.method(), "stop_worker");
    }

    #[test]
    fn unknown_method_does_not_parse() {
        assert!(serde_json::from_str::<WorkerCall>(r#"{"method":"format_disk"}"#).is_err());
        assert!(serde_json::from_str::<WorkerCall>(r#"{"method":"is_ready"}"#).is_err());
    }

    #[test]
    fn xmlrpc_calls_map_to_worker_calls() {
        let call = WorkerCall::FetchTranslation("abc".to_string());
        assert_eq!(
            WorkerCall::from_xmlrpc(call.method(), &call.xmlrpc_params()).unwrap(),
            call
        );
        assert_eq!(
            WorkerCall::from_xmlrpc("list_requests", &[]).unwrap(),
            WorkerCall::ListRequests
        );
    }

    #[test]
    fn xmlrpc_calls_reject_bad_methods_and_arity() {
        let err = WorkerCall::from_xmlrpc("format_disk", &[]).unwrap_err();
        assert_eq!(err.fault_code(), FAULT_UNKNOWN_METHOD);

        let err = WorkerCall::from_xmlrpc("is_ready", &[]).unwrap_err();
        assert_eq!(err.fault_code(), FAULT_INVALID_PARAMS);
        assert!(WorkerCall::from_xmlrpc("is_alive", &[Value::from("x")]).is_err());
        assert!(WorkerCall::from_xmlrpc("is_valid", &[Value::Int(3)]).is_err());
    }

    #[test]
    fn replies_encode_as_xmlrpc_values() {
        let pairs = WorkerReply::Pairs(vec![("eng".to_string(), "fre".to_string())]);
        assert_eq!(
            pairs.to_xmlrpc(),
            Value::Array(vec![Value::Array(vec![Value::from("eng"), Value::from("fre")])])
        );
        assert_eq!(WorkerReply::Null.to_xmlrpc(), Value::Nil);
        assert_eq!(WorkerReply::Bool(false).to_xmlrpc(), Value::Bool(false));
    }

    #[test]
    fn replies_serialize_as_bare_values() {
        let pairs = WorkerReply::Pairs(vec![("eng".to_string(), "fre".to_string())]);
        assert_eq!(
            serde_json::to_value(RpcResponse { result: pairs }).unwrap(),
            json!({"result": [["eng", "fre"]]})
        );
        assert_eq!(
            serde_json::to_value(RpcResponse {
                result: WorkerReply::Null
            })
            .unwrap(),
            json!({"result": null})
        );
        assert_eq!(
            serde_json::to_value(WorkerReply::Bool(true)).unwrap(),
            json!(true)
        );
    }
}
