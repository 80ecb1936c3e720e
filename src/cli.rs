// ============================================================================
// MintFE CLI — headless marketplace access via command-line arguments
// ============================================================================
//
// Usage examples:
//   mintfe --stats
//   mintfe --owner 8fGk3W1zQ9yB...
//   mintfe --check 42,17
//   mintfe --mint --image ad.png --region 2,3:2x2 --link https://example.com
//
// No GUI is opened in CLI mode. All service calls run on a local tokio
// runtime, block-on style; the process exits when the command completes.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc;
use std::time::Instant;

use clap::Parser;

use crate::config::AppConfig;
use crate::grid::{CellCoord, Region};
use crate::mint::{MintEvent, MintPipeline, MintRequest};
use crate::services::chain::RpcChainClient;
use crate::services::records::RestRecordStore;
use crate::services::storage::GatewayStorageClient;
use crate::services::RecordStore;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// MintFE headless marketplace client.
///
/// Query the ownership record store or mint a region without opening the GUI.
#[derive(Parser, Debug)]
#[command(
    name = "mintfe",
    about = "MintFE headless grid-marketplace client",
    long_about = "Query marketplace state and mint grid regions without opening\n\
                  the GUI. Service endpoints come from the MintFE config file;\n\
                  the wallet bridge must be running for --mint.\n\n\
                  Examples:\n  \
                  mintfe --stats\n  \
                  mintfe --check 42,17\n  \
                  mintfe --mint --image ad.png --region 2,3:2x2"
)]
pub struct CliArgs {
    /// Print aggregate marketplace statistics (sold cells, unique owners).
    #[arg(long)]
    pub stats: bool,

    /// List every record owned by this wallet address.
    #[arg(long, value_name = "ADDRESS")]
    pub owner: Option<String>,

    /// Check one cell's availability. Format: "x,y".
    #[arg(long, value_name = "X,Y")]
    pub check: Option<String>,

    /// Mint a region headlessly. Requires --image and --region.
    #[arg(long)]
    pub mint: bool,

    /// Ad image file for --mint (PNG, JPEG, WEBP or BMP).
    #[arg(short, long, value_name = "FILE")]
    pub image: Option<PathBuf>,

    /// Region for --mint. Format: "x,y:WxH" (top-left cell, then size).
    #[arg(short, long, value_name = "X,Y:WxH")]
    pub region: Option<String>,

    /// Optional click-through link stored in the region's metadata.
    #[arg(long, value_name = "URL")]
    pub link: Option<String>,

    /// Print per-step timing information.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// Returns `true` when any CLI-mode flag is present in the real process
    /// arguments. Used by `main()` to route before creating a window.
    pub fn is_cli_mode() -> bool {
        std::env::args().any(|a| a == "--stats" || a == "--owner" || a == "--check" || a == "--mint")
    }
}

/// Parse "x,y:WxH" into a region. Width/height must be at least 1.
pub fn parse_region(s: &str) -> Result<Region, String> {
    let (origin, size) = s
        .split_once(':')
        .ok_or_else(|| format!("bad region '{}': expected x,y:WxH", s))?;
    let origin = CellCoord::parse_key(origin)
        .ok_or_else(|| format!("bad region origin '{}': expected x,y", origin))?;
    let (w, h) = size
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("bad region size '{}': expected WxH", size))?;
    let w: u32 = w.trim().parse().map_err(|_| format!("bad width '{}'", w))?;
    let h: u32 = h.trim().parse().map_err(|_| format!("bad height '{}'", h))?;
    if w == 0 || h == 0 {
        return Err("region width and height must be at least 1".to_string());
    }
    Ok(Region {
        start_x: origin.x,
        start_y: origin.y,
        end_x: origin.x + w - 1,
        end_y: origin.y + h - 1,
    })
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "image/png",
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the requested CLI command and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    let config = AppConfig::load();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(run_async(args, config))
}

async fn run_async(args: CliArgs, config: AppConfig) -> ExitCode {
    let records = RestRecordStore::new(&config.records_url, &config.records_api_key);

    if args.stats {
        return match records.stats().await {
            Ok(stats) => {
                let total = config.grid_width as u64 * config.grid_height as u64;
                println!("records:       {}", stats.record_count);
                println!("unique owners: {}", stats.unique_owners);
                println!("cells sold:    {} / {}", stats.total_cells, total);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: stats query failed: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    if let Some(owner) = &args.owner {
        return match records.by_owner(owner).await {
            Ok(recs) => {
                for r in &recs {
                    println!(
                        "{}  ({},{})-({},{})  {} cells  tx {}",
                        r.id,
                        r.region.start_x,
                        r.region.start_y,
                        r.region.end_x,
                        r.region.end_y,
                        r.region.cell_count(),
                        r.tx_signature
                    );
                }
                println!("{} record(s)", recs.len());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: owner query failed: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    if let Some(check) = &args.check {
        let Some(cell) = CellCoord::parse_key(check) else {
            eprintln!("error: bad cell '{}': expected x,y", check);
            return ExitCode::FAILURE;
        };
        return match records.containing(cell).await {
            Ok(Some(rec)) => {
                println!("{} is owned by {} (minted {})", cell.key(), rec.owner, rec.created_at);
                ExitCode::SUCCESS
            }
            Ok(None) => {
                println!("{} is available", cell.key());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: availability query failed: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    if args.mint {
        return run_mint(&args, &config, &records).await;
    }

    eprintln!("error: no command given (try --stats, --owner, --check or --mint)");
    ExitCode::FAILURE
}

async fn run_mint(args: &CliArgs, config: &AppConfig, records: &RestRecordStore) -> ExitCode {
    let (Some(image_path), Some(region_str)) = (&args.image, &args.region) else {
        eprintln!("error: --mint requires both --image and --region");
        return ExitCode::FAILURE;
    };
    let region = match parse_region(region_str) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if region.end_x >= config.grid_width || region.end_y >= config.grid_height {
        eprintln!(
            "error: region exceeds the {}x{} grid",
            config.grid_width, config.grid_height
        );
        return ExitCode::FAILURE;
    }

    let image_bytes = match std::fs::read(image_path) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("error: cannot read {}: {}", image_path.display(), e);
            return ExitCode::FAILURE;
        }
    };
    // Decode up front so a corrupt file fails here, not mid-pipeline.
    if let Err(e) = image::load_from_memory(&image_bytes) {
        eprintln!("error: {} is not a decodable image: {}", image_path.display(), e);
        return ExitCode::FAILURE;
    }

    // Pre-flight overlap check against the mirror — the store would reject
    // the insert anyway, but failing before paying is friendlier.
    match records.overlapping(region).await {
        Ok(hits) if !hits.is_empty() => {
            eprintln!("error: region overlaps {} existing record(s)", hits.len());
            return ExitCode::FAILURE;
        }
        Ok(_) => {}
        Err(e) => {
            eprintln!("warning: overlap pre-check failed ({}); continuing", e);
        }
    }

    let chain = match RpcChainClient::connect(&config.rpc_url, &config.wallet_url).await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: wallet bridge not reachable: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let storage = GatewayStorageClient::new(&config.storage_url);

    let request = MintRequest {
        region,
        image_bytes,
        image_content_type: content_type_for(image_path).to_string(),
        external_link: args.link.clone(),
    };

    let pipeline = MintPipeline {
        storage: &storage,
        chain: &chain,
        records,
        config,
    };

    let started = Instant::now();
    let (tx, rx) = mpsc::channel();
    let result = pipeline.run(request, &tx).await;

    if args.verbose {
        for event in rx.try_iter() {
            if let MintEvent::Step(step) = event {
                println!("[{:>6.1?}] {}", started.elapsed(), step.label());
            }
        }
    }

    match result {
        Ok(outcome) => {
            println!("minted {}", outcome.asset_address);
            println!("tx     {}", outcome.record.tx_signature);
            println!("image  {}", outcome.record.image_url);
            if !outcome.persisted {
                println!("note: record-store write failed; the mint itself succeeded");
            }
            if args.verbose {
                println!("total {:?}", started.elapsed());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_parsing() {
        assert_eq!(
            parse_region("2,3:2x2"),
            Ok(Region { start_x: 2, start_y: 3, end_x: 3, end_y: 4 })
        );
        assert_eq!(
            parse_region("0,0:1x1"),
            Ok(Region { start_x: 0, start_y: 0, end_x: 0, end_y: 0 })
        );
        assert!(parse_region("2,3").is_err());
        assert!(parse_region("2,3:0x2").is_err());
        assert!(parse_region("a,b:2x2").is_err());
    }

    #[test]
    fn content_types_from_extension() {
        assert_eq!(content_type_for(Path::new("a.jpg")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("a.webp")), "image/webp");
        assert_eq!(content_type_for(Path::new("a.png")), "image/png");
        assert_eq!(content_type_for(Path::new("noext")), "image/png");
    }
}
