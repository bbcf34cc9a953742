//! MBTiles pipeline - load tiles from an MBTiles archive.
//!
//! This binary wires the archive, worker pool and source together and prints
//! a JSON summary per requested tile.

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use clap::Parser;
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mbtiles_pipeline::{
    config::{Cli, Command, InspectConfig, LoadConfig},
    CachePolicyDecoder, DecodedTile, MbtilesArchive, MbtilesSource, PassthroughDecoder, Tile,
    TileArchive, TileCoordinate, TileUid, WorkerPool,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Load(config) => run_load(config).await,
        Command::Inspect(config) => run_inspect(config).await,
    }
}

// =============================================================================
// Load Command
// =============================================================================

/// Buffers handed to the installer, keyed by tile.
#[derive(Debug, Clone, Copy)]
struct Installed {
    bytes: usize,
    buffers: usize,
    generation: u64,
    installs: usize,
}

async fn run_load(config: LoadConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let archive = match MbtilesArchive::open(&config.archive) {
        Ok(archive) => archive,
        Err(e) => {
            error!("Failed to open {}: {}", config.archive.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let archive_max_zoom = match archive.metadata().await {
        Ok(metadata) => metadata.max_zoom,
        Err(e) => {
            warn!("Could not read archive metadata: {}", e);
            None
        }
    };

    let options = config.source_options(archive_max_zoom);
    let workers = config.worker_count();

    info!("Configuration:");
    info!("  Archive: {}", archive.identifier());
    info!("  Max zoom: {}", options.max_zoom);
    info!("  Tile size: {}", options.tile_size);
    info!(
        "  Workers: {} ({} tiles of decode state each)",
        workers, config.worker_tile_capacity
    );
    if let Some(timeout) = options.decode_timeout {
        info!("  Decode timeout: {}ms", timeout.as_millis());
    }
    if let Some(policy) = &config.cache_control {
        info!("  Cache-Control: {}", policy);
        if !options.refresh_expired_tiles {
            warn!("--cache-control has no effect without --refresh-expired-tiles");
        }
    }

    let installed: Arc<Mutex<HashMap<TileUid, Installed>>> = Arc::default();
    let sink = Arc::clone(&installed);

    let pool = match &config.cache_control {
        Some(policy) => WorkerPool::with_capacity(
            workers,
            config.worker_tile_capacity,
            CachePolicyDecoder::new(PassthroughDecoder, policy.as_str()),
        ),
        None => WorkerPool::with_capacity(workers, config.worker_tile_capacity, PassthroughDecoder),
    };
    let source = MbtilesSource::new(archive, pool, options).with_installer(
        move |uid: TileUid, _: TileCoordinate, data: DecodedTile| {
            let mut installed = sink.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = installed.entry(uid).or_insert(Installed {
                bytes: 0,
                buffers: 0,
                generation: 0,
                installs: 0,
            });
            entry.bytes = data.byte_len();
            entry.buffers = data.buffers.len();
            entry.generation = data.generation;
            entry.installs += 1;
        },
    );

    let mut failed = false;
    for coordinate in &config.tiles {
        let tile = Arc::new(Tile::new(*coordinate));

        let requests: Vec<_> = (0..config.repeat)
            .map(|_| {
                let source = source.clone();
                let tile = Arc::clone(&tile);
                tokio::spawn(async move { source.load(&tile).await })
            })
            .collect();

        let mut completed = 0usize;
        let mut errors = Vec::new();
        for request in requests {
            match request.await {
                Ok(Ok(())) => completed += 1,
                Ok(Err(e)) => errors.push(e.to_string()),
                Err(e) => errors.push(format!("load task failed: {}", e)),
            }
        }
        if completed == 0 {
            failed = true;
        }

        // Stale data is loaded once more, on the worker that holds the tile
        let refreshed = if source.expire_if_stale(&tile, SystemTime::now()) {
            match source.load(&tile).await {
                Ok(()) => true,
                Err(e) => {
                    errors.push(format!("refresh failed: {}", e));
                    false
                }
            }
        } else {
            false
        };

        let install = installed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&tile.uid())
            .copied();

        let summary = json!({
            "tile": coordinate.to_string(),
            "status": tile.status(),
            "worker": tile.worker_affinity().map(|w| w.to_string()),
            "overscaling": tile.overscaling(),
            "requests": config.repeat,
            "completed": completed,
            "refreshed": refreshed,
            "expires_at": tile
                .expiry()
                .and_then(|e| e.expires_at)
                .and_then(|at| at.duration_since(SystemTime::UNIX_EPOCH).ok())
                .map(|since| since.as_secs()),
            "errors": errors,
            "installs": install.map(|i| i.installs).unwrap_or(0),
            "bytes": install.map(|i| i.bytes),
            "buffers": install.map(|i| i.buffers),
            "generation": install.map(|i| i.generation),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).unwrap_or_else(|_| summary.to_string())
        );

        source.unload_tile(&tile);
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

// =============================================================================
// Inspect Command
// =============================================================================

async fn run_inspect(config: InspectConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    let archive = match MbtilesArchive::open(&config.archive) {
        Ok(archive) => archive,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match archive.metadata().await {
        Ok(metadata) => {
            let output = json!({
                "archive": archive.identifier(),
                "metadata": metadata,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&output).unwrap_or_else(|_| output.to_string())
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "mbtiles_pipeline=debug"
    } else {
        "mbtiles_pipeline=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
