pub mod adapter;
pub mod broker;
pub mod config;
pub mod error;
pub mod message;
pub mod node;
pub mod rpc;
pub mod scheduler;
pub mod shutdown;
pub mod worker;
