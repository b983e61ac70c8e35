//! Utility module
//!
//! Small request helpers shared by strategies and handlers.

use crate::context::{RequestContext, SharedContext};
use crate::error::BoxError;
use crate::module::Module;
use async_trait::async_trait;
use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

/// The builtin utility module
#[derive(Debug, Default, Clone)]
pub struct UtilityModule;

impl UtilityModule {
    pub fn new() -> Self {
        Self
    }

    /// The originating client address of a request.
    ///
    /// Prefers the first `X-Forwarded-For` entry, then `X-Real-IP`, then the
    /// peer address of the connection.
    pub fn client_ip(&self, ctx: &RequestContext) -> Option<IpAddr> {
        client_ip(ctx.headers(), ctx.remote_addr())
    }
}

/// Client IP extraction from raw headers and the peer address.
pub fn client_ip(headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> Option<IpAddr> {
    let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());

    header(X_FORWARDED_FOR)
        .and_then(|forwarded| forwarded.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .or_else(|| header(X_REAL_IP).and_then(|real| real.trim().parse().ok()))
        .or_else(|| remote_addr.map(|addr| addr.ip()))
}

#[async_trait]
impl Module for UtilityModule {
    async fn start(&self, _ctx: &SharedContext) -> Result<(), BoxError> {
        tracing::debug!("Utility module ready");
        Ok(())
    }
}
