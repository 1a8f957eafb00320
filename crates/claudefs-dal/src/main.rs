#![warn(missing_docs)]

//! cfs-dal: place, store and fetch objects through a configured DAL.

use anyhow::Result;
use clap::Parser;
use claudefs_dal::cli::Cli;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    Cli::parse().run()
}
