//! Origin allow-list guard.

use std::collections::HashSet;

use tracing::info;

use super::{HandshakeRequest, response};
use crate::{
    component::Component,
    connection::{ConnectionId, Context, Payload},
    error::{HandshakeError, PipelineError, Result},
};

/// Vetoes handshakes whose `Origin` is not allowed.
///
/// The origin is compared case-sensitively by host name: `http://a.com:80`
/// matches an allow-list entry of `a.com`. A list containing `*` admits
/// every origin. Only `on_open` is ever vetoed; later events for admitted
/// connections pass straight through.
pub struct OriginGuard<C> {
    inner: C,
    allowed: Vec<String>,
    admitted: HashSet<ConnectionId>,
}

impl<C: Component> OriginGuard<C> {
    /// Guard `inner` with the given allow-list.
    pub fn new<I, S>(inner: C, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner,
            allowed: allowed.into_iter().map(Into::into).collect(),
            admitted: HashSet::new(),
        }
    }

    /// Allow an additional origin.
    pub fn allow(&mut self, origin: impl Into<String>) { self.allowed.push(origin.into()); }

    /// Borrow the inner component.
    pub fn inner(&self) -> &C { &self.inner }

    /// Returns `true` if `origin` passes the allow-list.
    #[must_use]
    pub fn is_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed.iter().any(|entry| entry == "*") {
            return true;
        }
        let Some(origin) = origin else {
            return false;
        };
        let host = origin_host(origin);
        self.allowed
            .iter()
            .any(|entry| entry == host || entry == origin)
    }
}

/// Extract the host from an origin such as `https://a.com:8443`.
fn origin_host(origin: &str) -> &str {
    let rest = origin
        .split_once("://")
        .map_or(origin, |(_, rest)| rest);
    let authority = rest.split('/').next().unwrap_or(rest);
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => authority,
    }
}

impl<C: Component> Component for OriginGuard<C> {
    fn on_open(&mut self, ctx: &mut Context<'_>, request: &HandshakeRequest) -> Result<()> {
        let origin = request.origin();
        if !self.is_allowed(origin) {
            info!(connection = %ctx.id(), origin = ?origin, "origin rejected");
            ctx.send(response(403, "Forbidden"));
            return Err(HandshakeError::OriginRejected {
                origin: origin.map(str::to_owned),
            }
            .into());
        }
        self.inner.on_open(ctx, request)?;
        self.admitted.insert(ctx.id());
        Ok(())
    }

    fn on_message(&mut self, ctx: &mut Context<'_>, payload: Payload) -> Result<()> {
        self.inner.on_message(ctx, payload)
    }

    fn on_close(&mut self, ctx: &mut Context<'_>) {
        if self.admitted.remove(&ctx.id()) {
            self.inner.on_close(ctx);
        }
    }

    fn on_error(&mut self, ctx: &mut Context<'_>, error: &PipelineError) {
        if self.admitted.contains(&ctx.id()) {
            self.inner.on_error(ctx, error);
        }
    }
}
