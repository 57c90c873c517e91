//! Command line interface for the `topicwire` demo server.
//!
//! Shared with the build script, which renders the manual page from it.

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// Command line arguments for the `topicwire` binary.
#[derive(Debug, Parser)]
#[command(
    name = "topicwire",
    version,
    about = "Publish/subscribe and remote-call demo server"
)]
pub struct Cli {
    /// Address to listen on.
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// Origin admitted by the handshake guard; repeat for several. `*`
    /// admits every origin.
    #[arg(short, long = "origin", value_name = "ORIGIN")]
    pub origins: Vec<String>,

    /// JSON file with pipeline configuration.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of accept loops.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Serve Prometheus metrics on this address.
    #[arg(long, value_name = "ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}
