#![allow(clippy::expect_used, clippy::print_stdout)]

//! Dump the header and live cells of a bundle on local disk.
//!
//! Usage:
//!   cargo run --example dump_bundle -p tilebundle-storage -- \
//!       <store_dir> <cache_root> <z> <x> <y>
//!
//! `<x> <y>` may be any tile inside the bundle. Without arguments a demo
//! bundle is written to a temporary directory and dumped.
//!
//! Set `RUST_LOG=tilebundle_storage=debug` to see the range reads.

use std::sync::Arc;
use tempfile::TempDir;
use tilebundle_storage::lock::LocalLockService;
use tilebundle_storage::object_store::LocalObjectStore;
use tilebundle_storage::{BundleCache, BundleCacheConfig, Tile, TileCoord};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let _demo_dir;
    let (store_dir, cache_root, coord) = if let [dir, root, z, x, y] = args.as_slice() {
        (
            std::path::PathBuf::from(dir),
            root.clone(),
            TileCoord::new(x.parse()?, y.parse()?, z.parse()?),
        )
    } else if args.is_empty() {
        let dir = TempDir::new()?;
        let path = dir.path().to_path_buf();
        _demo_dir = dir;
        (path, "demo".to_string(), TileCoord::new(0, 0, 3))
    } else {
        eprintln!("usage: dump_bundle <store_dir> <cache_root> <z> <x> <y>");
        std::process::exit(2);
    };

    let cache = BundleCache::new(
        BundleCacheConfig::new(cache_root),
        Arc::new(LocalObjectStore::new(&store_dir)),
        Arc::new(LocalLockService::new()),
    )?;

    if args.is_empty() {
        println!("Writing demo tiles below {}\n", store_dir.display());
        let mut tiles: Vec<Tile> = (0..6)
            .map(|i| {
                Tile::with_data(
                    TileCoord::new(i, i * 2, 3),
                    vec![i as u8; 100 + i as usize],
                )
            })
            .collect();
        cache.store_many(&mut tiles).await?;
        cache
            .store(&mut Tile::with_data(TileCoord::new(0, 0, 3), b"replaced".to_vec()))
            .await?;
        cache.remove(&Tile::new(TileCoord::new(5, 10, 3))).await?;
    }

    let bundle = cache.bundle(coord);
    println!("Bundle: {}", bundle.path());

    let Some(header) = bundle.header().await? else {
        println!("  (missing)");
        return Ok(());
    };
    println!("  version          {}", header.version);
    println!("  record count     {}", header.record_count);
    println!("  max record size  {}", header.max_record_size);
    println!("  offset size      {}", header.offset_size);
    println!("  file size        {}", header.file_size);
    println!("  index size       {}", header.index_size);

    let (logical, physical) = bundle.size().await?;
    println!("  logical size     {logical}");
    println!("  physical size    {physical}");

    if let Some(index) = bundle.index().await? {
        let (col, row) = bundle.location().origin();
        println!("\nLive cells ({}):", index.live_count());
        for (rel_x, rel_y, entry) in index.live_entries() {
            println!(
                "  ({:>3}, {:>3})  tile ({}, {})  offset={:>10} size={:>8}",
                rel_x,
                rel_y,
                col + rel_x,
                row + rel_y,
                entry.offset,
                entry.size
            );
        }
    }

    if let Some(report) = bundle.verify().await? {
        println!(
            "\nVerification: {} live, {} leaked bytes, {}",
            report.live_tiles,
            report.leaked_bytes(),
            if report.is_consistent() {
                "consistent".to_string()
            } else {
                format!("{} problems", report.problems.len())
            }
        );
        for problem in &report.problems {
            println!("  - {problem}");
        }
    }

    Ok(())
}
