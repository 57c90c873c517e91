//! Pipeline configuration.
//!
//! [`PipelineConfig`] gathers the tunables of the handshake and framing
//! stages. It deserializes from JSON so deployments can keep it in a file;
//! every field has a default.

use std::{fs, path::Path};

use serde::Deserialize;

use crate::codec::clamp_frame_length;

/// Default bound on an unterminated handshake header block.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 4096;

/// Default maximum message frame length (64 KiB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Which byte sequences end a handshake header block.
///
/// Older clients terminated their headers with bare line feeds. Accepting
/// them is a compatibility choice rather than part of the grammar.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TerminatorPolicy {
    /// Only `\r\n\r\n` ends the header block.
    Strict,
    /// `\r\n\r\n` and the legacy `\n\n` both end the header block.
    #[default]
    Lenient,
}

impl TerminatorPolicy {
    /// Terminator sequences recognised under this policy.
    #[must_use]
    pub fn terminators(self) -> &'static [&'static [u8]] {
        match self {
            Self::Strict => &[b"\r\n\r\n"],
            Self::Lenient => &[b"\r\n\r\n", b"\n\n"],
        }
    }
}

/// Tunables for a pipeline instance.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Maximum bytes buffered while waiting for the header terminator.
    pub max_header_bytes: usize,
    /// Accepted header terminators.
    pub terminators: TerminatorPolicy,
    /// Host name clients are expected to connect to.
    pub http_host: String,
    /// Origins admitted by the guard. Empty means only `http_host`; a single
    /// `*` disables the check.
    pub allowed_origins: Vec<String>,
    /// Identifier advertised in the WELCOME envelope.
    pub server_ident: String,
    /// Maximum size of a single framed message.
    pub max_frame_length: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            terminators: TerminatorPolicy::default(),
            http_host: "localhost".to_owned(),
            allowed_origins: Vec::new(),
            server_ident: concat!("topicwire/", env!("CARGO_PKG_VERSION")).to_owned(),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

/// Errors raised while loading a [`PipelineConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid configuration JSON.
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl PipelineConfig {
    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the JSON is invalid or names an
    /// unknown field.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        Ok(config.normalized())
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Clamp limits to usable bounds.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.max_header_bytes = self.max_header_bytes.max(16);
        self.max_frame_length = clamp_frame_length(self.max_frame_length);
        self
    }

    /// The effective origin allow-list.
    ///
    /// An empty list admits only the configured host.
    #[must_use]
    pub fn effective_origins(&self) -> Vec<String> {
        if self.allowed_origins.is_empty() {
            vec![self.http_host.clone()]
        } else {
            self.allowed_origins.clone()
        }
    }
}
