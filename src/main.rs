//! Demo server for `topicwire`.
//!
//! Serves one route at `/`: calls to `…#echo` return their arguments,
//! `…#sessions` reports the subscriber count of a topic, and every publish
//! is relayed to the topic's subscribers.

mod cli;

use clap::Parser;
use serde_json::{Value, json};
use topicwire::{
    App,
    AppResult,
    Application,
    PipelineConfig,
    Session,
    TopicServer,
    protocol::Arguments,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const ERROR_URI: &str = "http://topicwire.invalid/error#";

struct Relay;

impl Application for Relay {
    fn on_session_start(&mut self, session: &mut Session<'_>) -> AppResult {
        info!(session = session.session_id(), "session started");
        Ok(())
    }

    fn on_call(
        &mut self,
        session: &mut Session<'_>,
        call_id: &str,
        proc_uri: &str,
        args: Arguments,
    ) -> AppResult {
        let procedure = proc_uri.rsplit_once('#').map_or(proc_uri, |(_, name)| name);
        match procedure {
            "echo" => {
                let result = match args {
                    Arguments::Positional(mut values) if values.len() == 1 => values.remove(0),
                    Arguments::Positional(values) => Value::Array(values),
                    Arguments::Named(map) => Value::Object(map),
                };
                session.call_result(call_id, &result);
            }
            "sessions" => {
                let topic = args
                    .positional()
                    .and_then(|values| values.first())
                    .and_then(Value::as_str)
                    .map(|topic| session.resolve(topic).into_owned());
                match topic {
                    Some(topic) => {
                        let count = session.topics().subscriber_count(&topic);
                        session.call_result(call_id, &json!(count));
                    }
                    None => session.call_error(
                        call_id,
                        &format!("{ERROR_URI}invalid-argument"),
                        "expected a topic URI",
                        None,
                    ),
                }
            }
            _ => session.call_error(
                call_id,
                &format!("{ERROR_URI}no-such-procedure"),
                "unknown procedure",
                Some(&json!(proc_uri)),
            ),
        }
        Ok(())
    }

    fn on_publish(
        &mut self,
        session: &mut Session<'_>,
        topic: &str,
        event: Value,
        exclude: &[String],
        eligible: Option<&[String]>,
    ) -> AppResult {
        let delivered = session.broadcast(topic, &event, exclude, eligible);
        tracing::debug!(topic, delivered, "event relayed");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = cli::Cli::parse();
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if !cli.origins.is_empty() {
        config.allowed_origins.clone_from(&cli.origins);
    }

    #[cfg(feature = "metrics")]
    if let Some(addr) = cli.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!(%addr, "serving metrics");
    }
    #[cfg(not(feature = "metrics"))]
    if cli.metrics_addr.is_some() {
        tracing::warn!("built without the metrics feature; --metrics-addr ignored");
    }

    let mut server = TopicServer::new(App::new(config).route("/", Relay).build());
    if let Some(workers) = cli.workers {
        server = server.workers(workers);
    }
    let server = server.bind(cli.bind)?;
    info!(addr = ?server.local_addr(), "listening");
    server.run().await?;
    Ok(())
}
