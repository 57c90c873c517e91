//! Exact-path routing of handshakes to components.

use std::collections::HashMap;

use tracing::debug;

use super::{HandshakeRequest, response};
use crate::{
    component::Component,
    connection::{ConnectionId, Context, Payload},
    error::{HandshakeError, PipelineError, Result},
};

struct Route {
    path: String,
    host: Option<String>,
    component: Box<dyn Component>,
}

impl Route {
    fn matches(&self, request: &HandshakeRequest) -> bool {
        self.path == request.path()
            && self
                .host
                .as_deref()
                .is_none_or(|host| request.host_name() == Some(host))
    }
}

/// Dispatches each connection to the component registered for its path.
///
/// Routes are tried in registration order. Only `GET` handshakes are
/// routed; anything else, or an unmatched path, is answered with an HTTP
/// status line and closed.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    active: HashMap<ConnectionId, usize>,
}

impl Router {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register `component` for requests to `path` on any host.
    #[must_use]
    pub fn route(mut self, path: impl Into<String>, component: impl Component + 'static) -> Self {
        self.add(path.into(), None, Box::new(component));
        self
    }

    /// Register `component` for requests to `path` on `host` only.
    #[must_use]
    pub fn route_host(
        mut self,
        path: impl Into<String>,
        host: impl Into<String>,
        component: impl Component + 'static,
    ) -> Self {
        self.add(path.into(), Some(host.into()), Box::new(component));
        self
    }

    pub(crate) fn add(&mut self, path: String, host: Option<String>, component: Box<dyn Component>) {
        self.routes.push(Route {
            path,
            host,
            component,
        });
    }

    /// Number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize { self.routes.len() }

    /// Returns `true` if no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.routes.is_empty() }

    fn active_route(&mut self, id: ConnectionId) -> Option<&mut Box<dyn Component>> {
        let index = *self.active.get(&id)?;
        self.routes.get_mut(index).map(|route| &mut route.component)
    }
}

impl Component for Router {
    fn on_open(&mut self, ctx: &mut Context<'_>, request: &HandshakeRequest) -> Result<()> {
        if request.method() != "GET" {
            ctx.send(response(405, "Method Not Allowed"));
            return Err(HandshakeError::MethodNotAllowed {
                method: request.method().to_owned(),
            }
            .into());
        }
        let Some(index) = self.routes.iter().position(|route| route.matches(request)) else {
            ctx.send(response(404, "Not Found"));
            return Err(HandshakeError::NotFound {
                path: request.path().to_owned(),
            }
            .into());
        };
        debug!(connection = %ctx.id(), path = request.path(), route = index, "route matched");
        if let Some(route) = self.routes.get_mut(index) {
            route.component.on_open(ctx, request)?;
            self.active.insert(ctx.id(), index);
        }
        Ok(())
    }

    fn on_message(&mut self, ctx: &mut Context<'_>, payload: Payload) -> Result<()> {
        match self.active_route(ctx.id()) {
            Some(component) => component.on_message(ctx, payload),
            None => Ok(()),
        }
    }

    fn on_close(&mut self, ctx: &mut Context<'_>) {
        if let Some(component) = self.active_route(ctx.id()) {
            component.on_close(ctx);
        }
        self.active.remove(&ctx.id());
    }

    fn on_error(&mut self, ctx: &mut Context<'_>, error: &PipelineError) {
        if let Some(component) = self.active_route(ctx.id()) {
            component.on_error(ctx, error);
        }
    }
}
