//! Application builder assembling complete pipelines.
//!
//! [`App`] registers sub-protocol applications by path and produces the
//! pipeline root that the runtime drives. Every route gets its own stack:
//!
//! ```text
//! HandshakeServer -> Router -> OriginGuard -> FramingStage -> SubProtocol -> Application
//! ```

use crate::{
    codec::{LengthDelimitedMessageCodec, MessageCodec},
    config::PipelineConfig,
    framing::FramingStage,
    http::{HandshakeServer, OriginGuard, Router},
    protocol::{Application, SubProtocol},
};

/// The assembled pipeline root.
pub type Pipeline = HandshakeServer<Router>;

/// Builder for a routed pipeline.
pub struct App<K = LengthDelimitedMessageCodec> {
    config: PipelineConfig,
    codec: K,
    router: Router,
}

impl App {
    /// Start an empty application using `config`.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        let config = config.normalized();
        let codec = LengthDelimitedMessageCodec::new(config.max_frame_length);
        Self {
            config,
            codec,
            router: Router::new(),
        }
    }
}

impl Default for App {
    fn default() -> Self { Self::new(PipelineConfig::default()) }
}

impl<K: MessageCodec> App<K> {
    /// Replace the message codec used by routes registered afterwards.
    #[must_use]
    pub fn codec<K2: MessageCodec>(self, codec: K2) -> App<K2> {
        App {
            config: self.config,
            codec,
            router: self.router,
        }
    }

    /// The configuration routes are built with.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig { &self.config }

    /// Serve `app` at `path`, admitting the configured origins.
    #[must_use]
    pub fn route<A: Application + 'static>(self, path: impl Into<String>, app: A) -> Self {
        let origins = self.config.effective_origins();
        self.route_with_origins(path, app, origins)
    }

    /// Serve `app` at `path`, admitting only `origins`.
    ///
    /// An empty list falls back to the configured host; a list containing
    /// `*` admits every origin.
    #[must_use]
    pub fn route_with_origins<A, I, S>(mut self, path: impl Into<String>, app: A, origins: I) -> Self
    where
        A: Application + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut origins: Vec<String> = origins.into_iter().map(Into::into).collect();
        if origins.is_empty() {
            origins.push(self.config.http_host.clone());
        }
        let engine = SubProtocol::with_server_ident(app, self.config.server_ident.clone());
        let stage = OriginGuard::new(FramingStage::new(engine, self.codec.clone()), origins);
        self.router = self.router.route(path, stage);
        self
    }

    /// Number of registered routes.
    #[must_use]
    pub fn route_count(&self) -> usize { self.router.len() }

    /// Assemble the pipeline root.
    #[must_use]
    pub fn build(self) -> Pipeline { HandshakeServer::with_config(self.router, &self.config) }
}
