//! Test utilities for `topicwire` pipelines.
//!
//! [`RecordingTransport`] captures everything a pipeline sends so sans-I/O
//! stages can be driven synchronously, [`ScriptedApp`] records the
//! callbacks an engine makes, and the [`wire`] helpers build handshakes and
//! frames. [`TestClient`] speaks the same wire format over real TCP.
//!
//! ```rust
//! use topicwire::{App, ConnectionId, PipelineConfig};
//! use topicwire_testing::{PipelineDriver, ScriptedApp, wire};
//!
//! let app = App::new(PipelineConfig::default()).route("/", ScriptedApp::default());
//! let mut driver = PipelineDriver::new(app.build());
//! let id = ConnectionId::new(1);
//! driver.connect(id);
//! driver.feed(id, wire::handshake("/", Some("localhost")));
//! assert!(driver.transport().response(id).starts_with("HTTP/1.1 101"));
//! ```

mod app;
mod client;
mod driver;
pub mod logging;
mod transport;
pub mod wire;

pub use app::{AppEvent, ScriptedApp};
pub use client::TestClient;
pub use driver::PipelineDriver;
pub use logging::{LoggerHandle, logger};
pub use transport::{Delivery, RecordingTransport};
