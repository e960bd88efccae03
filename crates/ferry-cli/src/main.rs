//! ferry - chunk manifest の確認と chunk のロード
//!
//! - `ferry url 93`: chunk の URL
//! - `ferry asset 4796e397`: chunk 名から URL
//! - `ferry load --root build 93 85 --require 3905`: asset directory から
//!   chunk を読み込み、module の exports と runtime status を表示

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use ferry_core::domain::{ChunkId, ChunkManifest, ModuleId};
use ferry_core::impls::FsScriptHost;
use ferry_core::{LoaderBuilder, RuntimeStatus};

#[derive(Debug, Parser)]
#[command(name = "ferry", version, about = "Lazy chunk loader for static documentation sites")]
struct Cli {
    /// Chunk manifest (JSON). Defaults to the built-in docs tables.
    #[arg(long, global = true)]
    manifest: Option<PathBuf>,

    /// Log state transitions to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the URL of a chunk.
    Url { id: ChunkId },

    /// Print the URL of a chunk given its name.
    Asset { name: String },

    /// Load chunks from an asset directory.
    Load {
        /// Directory the public path maps to.
        #[arg(long)]
        root: PathBuf,

        #[arg(required = true)]
        ids: Vec<ChunkId>,

        /// Module to require once every chunk is loaded.
        #[arg(long)]
        require: Option<String>,
    },
}

#[derive(Debug, Serialize)]
struct LoadReport {
    chunks: Vec<ChunkId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exports: Option<Value>,
    status: RuntimeStatus,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let manifest = match &cli.manifest {
        Some(path) => ChunkManifest::from_path(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?,
        None => ChunkManifest::docs(),
    };

    match cli.command {
        Command::Url { id } => println!("{}", manifest.chunk_url(id)?),
        Command::Asset { name } => println!("{}", manifest.chunk_asset_url(&name)?),
        Command::Load { root, ids, require } => {
            let report = load(manifest, root, ids, require).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "ferry=debug,ferry_core=debug"
    } else {
        "ferry=warn,ferry_core=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn load(
    manifest: ChunkManifest,
    root: PathBuf,
    ids: Vec<ChunkId>,
    require: Option<String>,
) -> Result<LoadReport> {
    let host = FsScriptHost::new(&root).with_public_path(manifest.public_path.clone());
    let runtime = LoaderBuilder::new(manifest)
        .host(Arc::new(host))
        .build()
        .context("failed to build runtime")?;
    let worker = runtime.start()?;
    debug!(root = %root.display(), chunks = ?ids, "loading chunks");

    let exports = runtime
        .ensure_chunks_then(ids.iter().copied(), |rt| {
            require
                .as_deref()
                .map(|id| rt.require(ModuleId::from(id)).map(|e| e.to_value()))
                .transpose()
        })
        .await;

    let status = runtime.status();
    worker.shutdown_and_join().await;

    let exports = exports
        .and_then(|exports| exports)
        .with_context(|| format!("failed to load chunks {ids:?}"))?;

    Ok(LoadReport {
        chunks: ids,
        exports,
        status,
    })
}
