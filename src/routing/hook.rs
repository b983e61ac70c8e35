//! Request lifecycle hooks

use crate::context::RequestContext;
use crate::error::BoxError;
use async_trait::async_trait;

/// Server- or group-level hook pair run once per request
///
/// For a route nested in groups A ⊃ B ⊃ C, startup runs A→B→C before the
/// handler and shutdown runs C→B→A after it. A hook whose startup ran (even
/// if it failed) always gets its shutdown called.
///
/// # Example
/// ```
/// use tessera::context::{ContextKey, RequestContext};
/// use tessera::error::BoxError;
/// use tessera::routing::RequestHook;
/// use tessera::async_trait;
///
/// const TENANT: ContextKey<String> = ContextKey::new("tenant");
///
/// struct TenantHook;
///
/// #[async_trait]
/// impl RequestHook for TenantHook {
///     async fn on_request_startup(&self, ctx: &mut RequestContext) -> Result<(), BoxError> {
///         let tenant = ctx.header("x-tenant").ok_or("missing x-tenant")?.to_string();
///         ctx.set_value(&TENANT, tenant);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait RequestHook: Send + Sync + 'static {
    /// Runs before the handler. An error aborts the remaining startup hooks
    /// and the handler.
    async fn on_request_startup(&self, ctx: &mut RequestContext) -> Result<(), BoxError>;

    /// Runs after the handler. Errors are logged, never returned to the client.
    async fn on_request_shutdown(&self, _ctx: &mut RequestContext) -> Result<(), BoxError> {
        Ok(())
    }

    /// Name used in logs and errors.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
