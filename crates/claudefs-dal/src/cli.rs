//! Command-line front end of `cfs-dal`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::config::RepoDalConfig;
use crate::handle::{FileHandle, Namespace, ObjectLocation, OpenParams, Repo};
use crate::mc::{path_template, placement, Geometry, Placement};
use crate::registry;
use crate::stream::DalStream;

/// Top-level arguments.
#[derive(Parser)]
#[command(name = "cfs-dal")]
#[command(about = "ClaudeFS data abstraction layer tool", long_about = None)]
pub struct Cli {
    /// Action to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Print the placement of an object in an MC repository.
    Place {
        /// Data blocks.
        #[arg(long, default_value = "10")]
        n: u32,
        /// Erasure blocks.
        #[arg(long, default_value = "2")]
        e: u32,
        /// Number of pods.
        #[arg(long, default_value = "1")]
        pods: u32,
        /// Capacitors per pod.
        #[arg(long, default_value = "1")]
        caps: u32,
        /// Scatter directories per capacitor.
        #[arg(long, default_value = "1")]
        scatter: u32,
        /// Repository path format, e.g. /zfs/repo/pod%d/block%s/cap%d/scatter%d
        #[arg(long)]
        format: Option<String>,
        /// Object id.
        objid: String,
    },
    /// Store a local file as an object.
    Put {
        #[command(flatten)]
        target: Target,
        /// Source file.
        file: PathBuf,
    },
    /// Fetch an object into a local file.
    Get {
        #[command(flatten)]
        target: Target,
        /// Destination file.
        file: PathBuf,
    },
}

/// Where an object lives and which driver stores it.
#[derive(clap::Args)]
pub struct Target {
    /// JSON file with the repository's DAL stanza.
    #[arg(short, long, env = "CFS_DAL_CONFIG")]
    pub config: PathBuf,
    /// Repository name.
    #[arg(long, default_value = "repo")]
    pub repo: String,
    /// Repository host field (root directory or path format).
    #[arg(long)]
    pub repo_host: String,
    /// Namespace name.
    #[arg(long, default_value = "ns")]
    pub namespace: String,
    /// Object id.
    pub objid: String,
}

#[derive(Serialize)]
struct PlaceReport<'a> {
    objid: &'a str,
    #[serde(flatten)]
    placement: Placement,
    #[serde(skip_serializing_if = "Option::is_none")]
    template: Option<String>,
}

impl Target {
    fn open_stream(&self) -> Result<DalStream> {
        let cfg = RepoDalConfig::from_file(&self.config)
            .with_context(|| format!("reading {}", self.config.display()))?;
        let dal = registry::global()
            .configure(&cfg)
            .with_context(|| format!("configuring DAL {}", cfg.dal))?;
        let repo = Arc::new(Repo {
            name: self.repo.clone(),
            host: self.repo_host.clone(),
        });
        let ns = Arc::new(Namespace {
            name: self.namespace.clone(),
        });
        let fh = FileHandle::new(ObjectLocation::new(repo, ns, &self.objid));
        let mut stream = DalStream::new(dal, fh)?;
        stream.update_object_location()?;
        Ok(stream)
    }
}

impl Cli {
    /// Runs the selected subcommand.
    pub fn run(self) -> Result<()> {
        match self.command {
            Command::Place {
                n,
                e,
                pods,
                caps,
                scatter,
                format,
                objid,
            } => {
                let geometry = Geometry {
                    n,
                    e,
                    num_pods: pods,
                    num_cap: caps,
                    scatter_width: scatter,
                };
                place(geometry, format.as_deref(), &objid)
            }
            Command::Put { target, file } => put(&target, &file),
            Command::Get { target, file } => get(&target, &file),
        }
    }
}

fn place(geometry: Geometry, format: Option<&str>, objid: &str) -> Result<()> {
    geometry.validate()?;
    let p = placement::compute(objid, &geometry);
    let template = format
        .map(|f| path_template(f, objid, &p, None))
        .transpose()?;
    let report = PlaceReport {
        objid,
        placement: p,
        template,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn put(target: &Target, file: &Path) -> Result<()> {
    let data = fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let mut stream = target.open_stream()?;
    stream.open(OpenParams::write())?;
    stream.put_all(&data)?;
    stream.sync()?;
    stream.close()?;
    let fh = stream.finish()?;
    tracing::info!("stored {} bytes as {}", fh.os.written, fh);
    Ok(())
}

fn get(target: &Target, file: &Path) -> Result<()> {
    let mut stream = target.open_stream()?;
    stream.open(OpenParams::read())?;
    let mut data = Vec::new();
    stream.get_to_end(&mut data)?;
    stream.sync()?;
    stream.close()?;
    stream.finish()?;
    fs::write(file, &data).with_context(|| format!("writing {}", file.display()))?;
    tracing::info!("fetched {} bytes into {}", data.len(), file.display());
    Ok(())
}
