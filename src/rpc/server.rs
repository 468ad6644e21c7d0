use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::adapter::xmlrpc;
use crate::rpc::protocol::{RpcResponse, WorkerCall, WorkerReply, FAULT_PARSE_ERROR, RPC_PATH};
use crate::rpc::service::ServiceRequest;

#[derive(Clone)]
struct RpcState {
    tx: mpsc::Sender<ServiceRequest>,
}

/// Router exposing the worker's RPC endpoint. Calls are forwarded to the
/// service loop behind `tx`.
///
/// XML bodies (`text/xml`) are XML-RPC calls answered with a
/// `methodResponse` or a fault; anything else is parsed as JSON.
pub fn router(tx: mpsc::Sender<ServiceRequest>) -> Router {
    Router::new()
        .route(RPC_PATH, post(rpc_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(RpcState { tx })
}

async fn rpc_handler(State(state): State<RpcState>, headers: HeaderMap, body: Bytes) -> Response {
    if is_xml(&headers) {
        xmlrpc_call(&state, &body).await
    } else {
        json_call(&state, &body).await
    }
}

fn is_xml(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/xml") || ct.starts_with("application/xml"))
}

async fn json_call(state: &RpcState, body: &[u8]) -> Response {
    let Json(call) = match Json::<WorkerCall>::from_bytes(body) {
        Ok(call) => call,
        Err(rejection) => return rejection.into_response(),
    };
    match dispatch(state, call).await {
        Ok(result) => Json(RpcResponse { result }).into_response(),
        Err(status) => status.into_response(),
    }
}

async fn xmlrpc_call(state: &RpcState, body: &[u8]) -> Response {
    let call = std::str::from_utf8(body)
        .map_err(|e| (FAULT_PARSE_ERROR, e.to_string()))
        .and_then(|text| xmlrpc::decode_call(text).map_err(|e| (FAULT_PARSE_ERROR, e.to_string())))
        .and_then(|(method, params)| {
            WorkerCall::from_xmlrpc(&method, &params).map_err(|e| (e.fault_code(), e.to_string()))
        });

    let reply = match call {
        Ok(call) => match dispatch(state, call).await {
            Ok(result) => xmlrpc::encode_response(&result.to_xmlrpc()),
            Err(status) => return status.into_response(),
        },
        Err((code, message)) => {
            tracing::warn!(code, error = %message, "Rejected XML-RPC call");
            xmlrpc::encode_fault(code, &message)
        }
    };
    ([(header::CONTENT_TYPE, "text/xml")], reply).into_response()
}

async fn dispatch(state: &RpcState, call: WorkerCall) -> Result<WorkerReply, StatusCode> {
    let (reply_tx, reply_rx) = oneshot::channel();
    let method = call.method();

    if state
        .tx
        .send(ServiceRequest { call, reply_tx })
        .await
        .is_err()
    {
        tracing::warn!(method, "Service loop is gone, rejecting call");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    reply_rx.await.map_err(|_| {
        tracing::warn!(method, "Service loop dropped the call");
        StatusCode::SERVICE_UNAVAILABLE
    })
}

/// Serve the RPC endpoint on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    tx: mpsc::Sender<ServiceRequest>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(addr = %addr, path = RPC_PATH, "Worker RPC server listening");

    axum::serve(listener, router(tx))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!(addr = %addr, "Worker RPC server stopped");
    Ok(())
}
