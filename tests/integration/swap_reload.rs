#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Once;

use tempfile::tempdir;
use tessera::{
    storage::{index::BLOCK_LEN, FileBackend, FileBackendOptions, PixelFormat, Tile},
    types::{Result, TileCoord},
};
use tracing_subscriber::EnvFilter;

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

fn small() -> FileBackendOptions {
    FileBackendOptions::default()
        .tile_dimensions(8, 8)
        .format(PixelFormat::rgba_u8())
        .sync_on_flush(false)
}

fn mapping(backend: &FileBackend) -> HashMap<TileCoord, u64> {
    backend
        .coords()
        .map(|coord| (coord, backend.entry_offset(coord).unwrap()))
        .collect()
}

/// Copies the swap file aside and opens the copy; the original is deleted
/// when its backend drops.
fn reopen_copy(backend: &FileBackend, copy: &Path) -> Result<FileBackend> {
    fs::copy(backend.path(), copy)?;
    FileBackend::open(copy, FileBackendOptions::default())
}

#[test]
fn flush_and_reload_reproduce_mapping() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let mut backend = FileBackend::open(dir.path().join("orig.swap"), small())?;
    let size = backend.tile_size();
    for x in -10..30 {
        let coord = TileCoord::new(x, x * 3, x.rem_euclid(4));
        backend.set_tile(coord, &mut Tile::filled(size, x as u8))?;
    }
    for x in (0..30).step_by(4) {
        backend.void_tile(TileCoord::new(x, x * 3, x.rem_euclid(4)));
    }
    backend.flush()?;
    let expected = mapping(&backend);
    assert_eq!(backend.header().entry_count, expected.len() as u64);

    let mut reopened = reopen_copy(&backend, &dir.path().join("copy.swap"))?;
    assert_eq!(mapping(&reopened), expected);
    assert_eq!(reopened.tile_width(), 8);
    assert_eq!(reopened.tile_height(), 8);
    assert_eq!(reopened.format(), &PixelFormat::rgba_u8());
    for (coord, _) in expected {
        let tile = reopened.get_tile(coord)?.unwrap();
        assert_eq!(tile.data(), &vec![coord.x as u8; size][..]);
    }
    Ok(())
}

#[test]
fn reflushing_a_reloaded_file_is_stable() -> Result<()> {
    let dir = tempdir()?;
    let mut backend = FileBackend::open(dir.path().join("a.swap"), small())?;
    for x in 0..5 {
        backend.set_tile(TileCoord::new(x, 0, 0), &mut Tile::filled(256, 1))?;
    }
    backend.flush()?;

    let mut second = reopen_copy(&backend, &dir.path().join("b.swap"))?;
    second.set_tile(TileCoord::new(99, 0, 0), &mut Tile::filled(256, 2))?;
    second.flush()?;
    let expected = mapping(&second);

    let mut third = reopen_copy(&second, &dir.path().join("c.swap"))?;
    assert_eq!(mapping(&third), expected);
    assert_eq!(third.len(), 6);
    assert_eq!(
        third.get_tile(TileCoord::new(99, 0, 0))?.unwrap().data(),
        &[2u8; 256][..]
    );
    Ok(())
}

#[test]
fn empty_flush_reloads_empty() -> Result<()> {
    let dir = tempdir()?;
    let mut backend = FileBackend::open(dir.path().join("empty.swap"), small())?;
    backend.flush()?;
    assert_eq!(backend.header().next, 0);

    let reopened = reopen_copy(&backend, &dir.path().join("empty-copy.swap"))?;
    assert!(reopened.is_empty());
    let stats = reopened.stats();
    assert_eq!(stats.frontier, 256);
    assert_eq!(stats.free_slots, 0);
    Ok(())
}

#[test]
fn interrupted_chain_keeps_prefix() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let mut backend = FileBackend::open(dir.path().join("cut.swap"), small())?;
    for x in 0..6 {
        backend.set_tile(TileCoord::new(x, 1, 0), &mut Tile::filled(256, x as u8))?;
    }
    backend.flush()?;
    let full = mapping(&backend);
    let chain_start = backend.header().next;

    let copy = dir.path().join("cut-copy.swap");
    fs::copy(backend.path(), &copy)?;
    let file = OpenOptions::new().write(true).open(&copy)?;
    file.set_len(chain_start + 2 * BLOCK_LEN as u64 + 5)?;
    drop(file);

    let mut reopened = FileBackend::open(&copy, FileBackendOptions::default())?;
    assert_eq!(reopened.len(), 2);
    for (coord, offset) in mapping(&reopened) {
        assert_eq!(full.get(&coord), Some(&offset));
        let tile = reopened.get_tile(coord)?.unwrap();
        assert_eq!(tile.data(), &vec![coord.x as u8; 256][..]);
    }
    Ok(())
}

#[test]
fn reload_reclaims_unused_slots() -> Result<()> {
    let dir = tempdir()?;
    let mut backend = FileBackend::open(dir.path().join("gaps.swap"), small())?;
    for x in 0..4 {
        backend.set_tile(TileCoord::new(x, 0, 0), &mut Tile::filled(256, 3))?;
    }
    let hole = backend.entry_offset(TileCoord::new(1, 0, 0)).unwrap();
    backend.void_tile(TileCoord::new(1, 0, 0));
    backend.flush()?;

    let mut reopened = reopen_copy(&backend, &dir.path().join("gaps-copy.swap"))?;
    let stats = reopened.stats();
    assert_eq!(stats.live_tiles, 3);
    assert_eq!(stats.free_slots, 1);
    assert_eq!(stats.frontier, 256 + 4 * 256);

    reopened.set_tile(TileCoord::new(50, 0, 0), &mut Tile::filled(256, 4))?;
    assert_eq!(reopened.entry_offset(TileCoord::new(50, 0, 0)), Some(hole));
    Ok(())
}

#[test]
fn header_geometry_overrides_options() -> Result<()> {
    let dir = tempdir()?;
    let opts = FileBackendOptions::default()
        .tile_dimensions(16, 4)
        .format(PixelFormat::rgba_float())
        .sync_on_flush(false);
    let mut backend = FileBackend::open(dir.path().join("geom.swap"), opts)?;
    backend.set_tile(TileCoord::new(0, 0, 0), &mut Tile::new(16 * 4 * 16))?;
    backend.flush()?;

    let other = FileBackendOptions::default().tile_dimensions(2, 2);
    let copy = dir.path().join("geom-copy.swap");
    fs::copy(backend.path(), &copy)?;
    let reopened = FileBackend::open(&copy, other)?;
    assert_eq!(reopened.tile_width(), 16);
    assert_eq!(reopened.tile_height(), 4);
    assert_eq!(reopened.format().name(), "RGBA float");
    assert_eq!(reopened.tile_size(), 1024);
    Ok(())
}

#[test]
fn stale_blocks_from_an_earlier_flush_do_not_resurrect_voided_tiles() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let mut backend = FileBackend::open(dir.path().join("gen.swap"), small())?;
    for x in 0..4 {
        backend.set_tile(TileCoord::new(x, 0, 0), &mut Tile::filled(256, x as u8))?;
    }
    backend.flush()?;
    assert_eq!(backend.header().generation, 1);
    let first_flush = fs::read(backend.path())?;
    let chain_start = backend.header().next;

    let voided = TileCoord::new(1, 0, 0);
    let reused = backend.entry_offset(voided).unwrap();
    assert!(backend.void_tile(voided));
    backend.set_tile(TileCoord::new(9, 0, 0), &mut Tile::filled(256, 9))?;
    assert_eq!(backend.entry_offset(TileCoord::new(9, 0, 0)), Some(reused));
    backend.flush()?;
    assert_eq!(backend.header().generation, 2);
    assert_eq!(backend.header().next, chain_start);
    let second_flush = fs::read(backend.path())?;

    // The second flush stopped after its first block: header and the rest
    // of the chain are still the first flush's.
    let start = chain_start as usize;
    let mut crashed = first_flush;
    crashed[start..start + BLOCK_LEN].copy_from_slice(&second_flush[start..start + BLOCK_LEN]);
    let copy = dir.path().join("gen-crashed.swap");
    fs::write(&copy, &crashed)?;

    let reopened = FileBackend::open(&copy, FileBackendOptions::default())?;
    assert!(!reopened.tile_exists(voided));
    let offsets: HashSet<u64> = mapping(&reopened).into_values().collect();
    assert_eq!(offsets.len(), reopened.len());
    drop(reopened);

    // An intact file keeps counting generations across reopen.
    let mut intact = reopen_copy(&backend, &dir.path().join("gen-intact.swap"))?;
    assert_eq!(intact.header().generation, 2);
    assert!(!intact.tile_exists(voided));
    assert_eq!(intact.len(), 4);
    intact.flush()?;
    assert_eq!(intact.header().generation, 3);
    Ok(())
}
