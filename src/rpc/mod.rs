//! The worker's remote-call surface: XML-RPC (or JSON) calls POSTed to a
//! single endpoint, answered by one service loop that owns the job registry.

pub mod protocol;
pub mod server;
pub mod service;

pub use protocol::{
    CallError, RpcResponse, WorkerCall, WorkerReply, FAULT_INVALID_PARAMS, FAULT_PARSE_ERROR,
    FAULT_UNKNOWN_METHOD, FETCH_ERROR, FETCH_NOT_READY, RPC_PATH,
};
pub use server::{router, serve};
pub use service::{ServiceRequest, WorkerService};
