//! A client for the RPC server over a tonic channel.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use http::uri::PathAndQuery;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tonic::client::Grpc;
use tonic::codec::CompressionEncoding;
use tonic::metadata::{Ascii, MetadataKey, MetadataValue};
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};

use super::codec::RawCodec;
use super::server::SERVICE_NAME;

/// Largest response the client accepts.
const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

/// Client connection to an RPC server.
///
/// Clones share one HTTP/2 connection, so calls from clones run
/// concurrently. Gzip responses are always accepted.
///
/// ```rust,ignore
/// let client = RpcClient::connect(addr).await?;
/// let widget: Widget = client.call_json("GetWidget", &GetWidget { id: 42 }).await?;
/// ```
#[derive(Clone)]
pub struct RpcClient {
    grpc: Grpc<Channel>,
    compress: bool,
}

impl fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("compress", &self.compress)
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Connects to the server at `addr`.
    pub async fn connect(addr: SocketAddr) -> Result<Self, tonic::transport::Error> {
        let channel = Endpoint::from_shared(format!("http://{addr}"))?
            .connect()
            .await?;
        let grpc = Grpc::new(channel)
            .accept_compressed(CompressionEncoding::Gzip)
            .max_decoding_message_size(MAX_RESPONSE_BYTES);
        Ok(Self { grpc, compress: false })
    }

    /// Gzip-compresses request messages.
    #[must_use]
    pub fn with_compression(mut self, enabled: bool) -> Self {
        if enabled && !self.compress {
            self.grpc = self.grpc.send_compressed(CompressionEncoding::Gzip);
        }
        self.compress = enabled;
        self
    }

    /// Calls `method` with a raw payload.
    pub async fn call(&self, method: &str, payload: Bytes) -> Result<Bytes, Status> {
        self.call_with_metadata(method, BTreeMap::new(), payload).await
    }

    /// Calls `method` with caller metadata.
    pub async fn call_with_metadata(
        &self,
        method: &str,
        metadata: BTreeMap<String, String>,
        payload: Bytes,
    ) -> Result<Bytes, Status> {
        let mut request = Request::new(payload);
        for (key, value) in &metadata {
            let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
                .map_err(|_| Status::invalid_argument(format!("invalid metadata key '{key}'")))?;
            let value = value
                .parse::<MetadataValue<Ascii>>()
                .map_err(|_| Status::invalid_argument(format!("invalid metadata value for '{key}'")))?;
            request.metadata_mut().insert(name, value);
        }

        let path = PathAndQuery::try_from(format!("/{SERVICE_NAME}/{method}"))
            .map_err(|e| Status::invalid_argument(format!("invalid method name '{method}': {e}")))?;

        let mut grpc = self.grpc.clone();
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("rpc channel not ready: {e}")))?;
        let response = grpc.unary(request, path, RawCodec).await?;
        Ok(response.into_inner())
    }

    /// Calls `method` with a JSON-encoded request and decodes a JSON response.
    pub async fn call_json<I, O>(&self, method: &str, input: &I) -> Result<O, Status>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let payload = serde_json::to_vec(input)
            .map_err(|e| Status::invalid_argument(format!("failed to encode request: {e}")))?;
        let response = self.call(method, Bytes::from(payload)).await?;
        serde_json::from_slice(&response)
            .map_err(|e| Status::internal(format!("failed to decode response: {e}")))
    }
}
