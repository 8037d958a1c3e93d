//! RPC over gRPC: methods, interceptors, the tonic server and client.
//!
//! Methods are plain async functions over [`Bytes`](bytes::Bytes) or JSON
//! values, served as unary gRPC calls under the `janus.Rpc` service. The
//! registrar installs them into the server's dispatch table, each bound to
//! its metrics record and run behind the supervisor.

mod client;
mod codec;
mod method;
mod server;

pub use client::RpcClient;
pub use codec::{RawCodec, RawDecoder, RawEncoder};
pub use method::{RpcHandler, RpcInterceptor, RpcMethod};
pub use server::{RpcServer, RpcServerConfig, SERVICE_NAME};
pub(crate) use server::{MethodEntry, MethodTable, RpcShared};
pub use tonic::{Code, Status};

/// One-line rendering of a status for logs, e.g. `NotFound: no widget 0`.
#[must_use]
pub fn status_line(status: &Status) -> String {
    format!("{:?}: {}", status.code(), status.message())
}
