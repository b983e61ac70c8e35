//! Access logging
//!
//! The access logger sees every request exactly once, after the response
//! status is final (including statuses written by the error handler or the
//! panic fallback).

use crate::context::RequestContext;
use axum::http::{Method, StatusCode, Version};
use std::net::SocketAddr;
use std::time::Duration;
use uuid::Uuid;

/// What happened to one request
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub request_id: Uuid,
    pub method: Method,
    pub path: String,
    pub protocol: Version,
    pub status: StatusCode,
    pub bytes_written: usize,
    pub elapsed: Duration,
    pub remote: Option<SocketAddr>,
}

/// Strategy receiving one [`AccessRecord`] per request
///
/// Implemented for any `Fn(&RequestContext, &AccessRecord)`.
pub trait AccessLogger: Send + Sync + 'static {
    fn log(&self, ctx: &RequestContext, record: &AccessRecord);
}

impl<F> AccessLogger for F
where
    F: Fn(&RequestContext, &AccessRecord) + Send + Sync + 'static,
{
    fn log(&self, ctx: &RequestContext, record: &AccessRecord) {
        self(ctx, record)
    }
}

/// Writes access records as `tracing` events on the `access` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAccessLogger;

impl AccessLogger for TracingAccessLogger {
    fn log(&self, _ctx: &RequestContext, record: &AccessRecord) {
        tracing::info!(
            target: "access",
            timestamp = %chrono::Local::now().format("%d/%b/%Y:%H:%M:%S %z"),
            request_id = %record.request_id,
            method = %record.method,
            path = %record.path,
            protocol = ?record.protocol,
            status = record.status.as_u16(),
            bytes = record.bytes_written,
            elapsed_ms = record.elapsed.as_secs_f64() * 1000.0,
            remote = ?record.remote,
            "{} {} {}",
            record.method,
            record.path,
            record.status.as_u16()
        );
    }
}
