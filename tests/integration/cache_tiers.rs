#![allow(missing_docs)]

use std::fs;
use std::sync::Once;

use tempfile::{tempdir, TempDir};
use tessera::{
    cache::{CacheOptions, CacheStatus, TileCache, WritePolicy},
    storage::{CommandReply, FileBackend, FileBackendOptions, PixelFormat, Tile, TileCommand, TileSource},
    types::{Result, TileCoord},
};
use tracing_subscriber::EnvFilter;

const TS: usize = 4 * 4 * 4;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("tessera=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

fn cached(opts: CacheOptions) -> Result<(TempDir, TileCache<FileBackend>)> {
    let dir = tempdir()?;
    let backend = FileBackend::open(
        dir.path().join("cache.swap"),
        FileBackendOptions::default()
            .tile_dimensions(4, 4)
            .format(PixelFormat::rgba_u8())
            .sync_on_flush(false),
    )?;
    Ok((dir, TileCache::new(backend, opts)))
}

fn c(x: i32) -> TileCoord {
    TileCoord::new(x, 0, 0)
}

#[test]
fn eviction_releases_payload_and_keeps_bytes_in_backend() -> Result<()> {
    init_tracing();
    let (_dir, mut cache) = cached(CacheOptions::default())?;
    cache.set(c(0), &mut Tile::filled(TS, 0x11))?;
    cache.set(c(1), &mut Tile::filled(TS, 0x22))?;
    let before = cache.stats().resident_bytes;

    assert!(cache.evict(c(0))?);
    assert!(!cache.evict(c(0))?);
    let stats = cache.stats();
    assert_eq!(before - stats.resident_bytes, TS as u64);
    assert_eq!(stats.evicted_tiles, 1);
    assert_eq!(cache.status(c(0)), CacheStatus::Evicted);

    let from_disk = cache.source_mut().get_tile(c(0))?.unwrap();
    assert_eq!(from_disk.data(), &[0x11; TS][..]);

    let reloaded = cache.get(c(0))?.unwrap();
    assert_eq!(reloaded.data(), &[0x11; TS][..]);
    assert_eq!(cache.status(c(0)), CacheStatus::Resident);
    assert_eq!(cache.stats().misses, 1);
    Ok(())
}

#[test]
fn capacity_pressure_writes_back_before_evicting() -> Result<()> {
    init_tracing();
    let opts = CacheOptions::default()
        .capacity_bytes(2 * TS as u64)
        .write_policy(WritePolicy::WriteBack);
    let (_dir, mut cache) = cached(opts)?;
    for x in 0..3 {
        cache.set(c(x), &mut Tile::filled(TS, x as u8 + 1))?;
    }
    assert!(cache.source().tile_exists(c(0)));
    assert!(!cache.source().tile_exists(c(1)));
    assert!(!cache.source().tile_exists(c(2)));
    assert_eq!(cache.status(c(0)), CacheStatus::Evicted);

    let stats = cache.stats();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.writebacks, 1);
    assert_eq!(stats.resident_bytes, 2 * TS as u64);
    assert!(cache.exists(c(2)));

    assert_eq!(cache.get(c(0))?.unwrap().data(), &[1u8; TS][..]);
    assert!(cache.source().tile_exists(c(1)));
    Ok(())
}

#[test]
fn hits_promote_unless_disabled() -> Result<()> {
    for promote in [true, false] {
        let opts = CacheOptions::default()
            .capacity_bytes(2 * TS as u64)
            .promote_on_hit(promote);
        let (_dir, mut cache) = cached(opts)?;
        cache.set(c(0), &mut Tile::new(TS))?;
        cache.set(c(1), &mut Tile::new(TS))?;
        cache.get(c(0))?;
        cache.set(c(2), &mut Tile::new(TS))?;

        let (kept, dropped) = if promote { (c(0), c(1)) } else { (c(1), c(0)) };
        assert_eq!(cache.status(kept), CacheStatus::Resident, "promote={promote}");
        assert_eq!(cache.status(dropped), CacheStatus::Evicted, "promote={promote}");
        assert_eq!(cache.stats().hits, 1);
    }
    Ok(())
}

#[test]
fn void_clears_every_tier_and_the_backend() -> Result<()> {
    let (_dir, mut cache) = cached(CacheOptions::default())?;
    cache.set(c(0), &mut Tile::new(TS))?;
    cache.set(c(1), &mut Tile::new(TS))?;
    cache.evict(c(1))?;

    assert!(cache.void(c(0))?);
    assert!(cache.void(c(1))?);
    assert!(!cache.void(c(2))?);
    for x in 0..2 {
        assert!(!cache.exists(c(x)));
        assert_eq!(cache.status(c(x)), CacheStatus::Undefined);
        assert_eq!(cache.get(c(x))?, None);
    }
    assert!(cache.source().is_empty());
    Ok(())
}

#[test]
fn write_back_flush_persists_through_reopen() -> Result<()> {
    init_tracing();
    let opts = CacheOptions::default().write_policy(WritePolicy::WriteBack);
    let (dir, mut cache) = cached(opts)?;
    for x in 0..4 {
        cache.set(c(x), &mut Tile::filled(TS, 0x40 + x as u8))?;
    }
    assert!(cache.source().is_empty());
    cache.flush()?;
    assert_eq!(cache.source().len(), 4);
    assert_eq!(cache.stats().writebacks, 4);

    let copy = dir.path().join("cache-copy.swap");
    fs::copy(cache.source().path(), &copy)?;
    let mut reopened = FileBackend::open(&copy, FileBackendOptions::default())?;
    for x in 0..4 {
        assert_eq!(
            reopened.get_tile(c(x))?.unwrap().data(),
            &[0x40 + x as u8; TS][..]
        );
    }
    Ok(())
}

#[test]
fn idle_drains_dirty_tiles_then_defers_to_backend() -> Result<()> {
    let opts = CacheOptions::default().write_policy(WritePolicy::WriteBack);
    let (_dir, mut cache) = cached(opts)?;
    cache.set(c(0), &mut Tile::new(TS))?;
    cache.set(c(1), &mut Tile::new(TS))?;
    assert!(cache.idle()?);
    assert!(cache.idle()?);
    assert!(!cache.idle()?);
    assert_eq!(cache.source().len(), 2);

    let backend = cache.into_inner()?;
    assert_eq!(backend.stats().writes, 2);
    Ok(())
}

#[test]
fn cache_answers_the_command_surface() -> Result<()> {
    let (_dir, mut cache) = cached(CacheOptions::default())?;
    let coord = TileCoord::new(-1, -1, 2);
    let mut tile = Tile::filled(TS, 9);
    assert_eq!(cache.command(coord, TileCommand::Set(&mut tile))?, CommandReply::Stored);
    assert_eq!(cache.command(coord, TileCommand::Exists)?, CommandReply::Exists(true));
    match cache.command(coord, TileCommand::Get)? {
        CommandReply::Tile(Some(read)) => assert_eq!(read.data(), &[9u8; TS][..]),
        other => panic!("unexpected reply {other:?}"),
    }
    assert_eq!(cache.command(coord, TileCommand::Flush)?, CommandReply::Flushed);
    assert_eq!(cache.command(coord, TileCommand::Idle)?, CommandReply::Idle(false));
    assert_eq!(cache.command(coord, TileCommand::Void)?, CommandReply::Voided(true));
    assert_eq!(cache.command(coord, TileCommand::Exists)?, CommandReply::Exists(false));
    Ok(())
}
