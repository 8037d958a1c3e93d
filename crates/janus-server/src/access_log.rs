//! File-backed access logs.
//!
//! HTTP requests are written in Apache combined log format followed by the
//! request duration in milliseconds. RPC calls are written as one JSON object
//! per line. Files are opened in append mode when the server starts; rotation
//! is left to external tooling.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use http::{Method, StatusCode, Version};
use janus_telemetry::logging::fields;
use parking_lot::Mutex;
use serde_json::{Map, Value};

/// Errors opening or writing an access log.
#[derive(Debug, thiserror::Error)]
pub enum AccessLogError {
    /// The file could not be opened.
    #[error("failed to open access log '{path}': {source}")]
    Open {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A line could not be written.
    #[error("failed to write access log: {0}")]
    Write(#[from] std::io::Error),
}

/// An append-only access log file.
#[derive(Debug)]
pub struct AccessLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl AccessLog {
    /// Opens (creating if needed) `path` for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AccessLogError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| AccessLogError::Open {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line and flushes it.
    pub fn write_line(&self, line: &str) -> Result<(), AccessLogError> {
        let mut writer = self.writer.lock();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Writes an HTTP entry; write failures are logged, not returned.
    pub fn log_http(&self, entry: &HttpAccessEntry<'_>) {
        if let Err(e) = self.write_line(&entry.combined_line()) {
            tracing::warn!(path = %self.path.display(), error = %e, "http access log write failed");
        }
    }

    /// Writes an RPC entry; write failures are logged, not returned.
    pub fn log_rpc(
        &self,
        name: &str,
        duration: Duration,
        error: Option<&str>,
        metadata: &BTreeMap<String, String>,
    ) {
        let line = rpc_line(Utc::now(), name, duration, error, metadata);
        if let Err(e) = self.write_line(&line) {
            tracing::warn!(path = %self.path.display(), error = %e, "rpc access log write failed");
        }
    }
}

/// One HTTP request as it appears in the access log.
#[derive(Debug, Clone)]
pub struct HttpAccessEntry<'a> {
    /// Resolved client IP.
    pub client_ip: IpAddr,
    /// Request time.
    pub time: DateTime<Utc>,
    /// Request method.
    pub method: &'a Method,
    /// Path and query as received.
    pub target: &'a str,
    /// HTTP version.
    pub version: Version,
    /// Response status.
    pub status: StatusCode,
    /// Response body size.
    pub bytes: usize,
    /// `Referer` header.
    pub referer: Option<&'a str>,
    /// `User-Agent` header.
    pub user_agent: Option<&'a str>,
    /// Wall-clock handling time.
    pub duration: Duration,
}

impl HttpAccessEntry<'_> {
    /// Formats the entry as a combined-log line plus duration.
    #[must_use]
    pub fn combined_line(&self) -> String {
        let bytes = if self.bytes == 0 {
            "-".to_string()
        } else {
            self.bytes.to_string()
        };
        format!(
            "{} - - [{}] \"{} {} {:?}\" {} {} \"{}\" \"{}\" {:.3}",
            self.client_ip,
            self.time.format("%d/%b/%Y:%H:%M:%S %z"),
            self.method,
            self.target,
            self.version,
            self.status.as_u16(),
            bytes,
            self.referer.unwrap_or("-"),
            self.user_agent.unwrap_or("-"),
            self.duration.as_secs_f64() * 1000.0,
        )
    }
}

/// Formats one RPC access-log line.
///
/// Caller metadata becomes top-level fields; the fixed fields win on a
/// name clash.
pub fn rpc_line(
    time: DateTime<Utc>,
    name: &str,
    duration: Duration,
    error: Option<&str>,
    metadata: &BTreeMap<String, String>,
) -> String {
    let mut obj: Map<String, Value> = metadata
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    obj.insert("time".into(), Value::String(time.to_rfc3339()));
    obj.insert("msg".into(), Value::String("access".into()));
    obj.insert("name".into(), Value::String(name.to_string()));
    obj.insert(
        fields::DURATION_MS.into(),
        serde_json::json!(duration.as_micros() as f64 / 1000.0),
    );
    obj.insert(
        fields::ERROR.into(),
        error.map_or(Value::Null, |e| Value::String(e.to_string())),
    );

    Value::Object(obj).to_string()
}
