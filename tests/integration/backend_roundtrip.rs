#![allow(missing_docs)]

use std::fs;
use std::path::Path;
use std::sync::Once;

use tempfile::tempdir;
use tessera::{
    storage::{
        freelist::GROWTH_SLOTS, CommandReply, FileBackend, FileBackendOptions, PixelFormat, Tile,
        TileCommand, TileSource, HEADER_LEN,
    },
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

/// 32 x 32 RGBA u8: 4096-byte tiles.
fn page_sized() -> FileBackendOptions {
    FileBackendOptions::default()
        .tile_dimensions(32, 32)
        .format(PixelFormat::rgba_u8())
        .sync_on_flush(false)
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[test]
fn set_then_get_returns_same_bytes() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let mut backend = FileBackend::open(dir.path().join("rt.swap"), page_sized())?;
    let size = backend.tile_size();
    assert_eq!(size, 4096);

    let coords = [
        TileCoord::new(0, 0, 0),
        TileCoord::new(-3, 7, 0),
        TileCoord::new(1 << 22, -(1 << 22), 3),
        TileCoord::new(i32::MIN, i32::MAX, -1),
    ];
    for (i, coord) in coords.iter().enumerate() {
        let bytes: Vec<u8> = (0..size).map(|b| (b + i * 31) as u8).collect();
        let mut tile = Tile::from_bytes(bytes);
        backend.set_tile(*coord, &mut tile)?;
    }
    for (i, coord) in coords.iter().enumerate() {
        let expected: Vec<u8> = (0..size).map(|b| (b + i * 31) as u8).collect();
        let tile = backend.get_tile(*coord)?.expect("tile present");
        assert_eq!(tile.data(), expected.as_slice(), "payload for {coord}");
        assert!(tile.is_stored());
    }
    assert_eq!(backend.get_tile(TileCoord::new(5, 5, 5))?, None);
    assert_eq!(backend.len(), coords.len());
    Ok(())
}

#[test]
fn overwrite_keeps_slot() -> Result<()> {
    let dir = tempdir()?;
    let mut backend = FileBackend::open(dir.path().join("ow.swap"), page_sized())?;
    let coord = TileCoord::new(4, 4, 0);
    backend.set_tile(coord, &mut Tile::filled(4096, 1))?;
    let offset = backend.entry_offset(coord);
    backend.set_tile(coord, &mut Tile::filled(4096, 2))?;
    assert_eq!(backend.entry_offset(coord), offset);
    assert_eq!(backend.get_tile(coord)?.unwrap().data(), &[2u8; 4096][..]);
    assert_eq!(backend.stats().live_tiles, 1);
    Ok(())
}

#[test]
fn void_then_set_reuses_offset_without_growth() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("reuse.swap");
    let mut backend = FileBackend::open(&path, page_sized())?;
    let a = TileCoord::new(0, 0, 0);
    let b = TileCoord::new(1, 0, 0);
    backend.set_tile(a, &mut Tile::filled(4096, 0xA1))?;
    backend.set_tile(b, &mut Tile::filled(4096, 0xB2))?;
    let freed = backend.entry_offset(a).unwrap();
    let total = backend.stats().total_bytes;
    let len = file_len(&path);

    assert!(backend.void_tile(a));
    assert!(!backend.void_tile(a));
    assert!(!backend.tile_exists(a));

    let c = TileCoord::new(9, 9, 1);
    backend.set_tile(c, &mut Tile::filled(4096, 0xC3))?;
    assert_eq!(backend.entry_offset(c), Some(freed));
    assert_eq!(backend.stats().total_bytes, total);
    assert_eq!(file_len(&path), len);
    assert_eq!(backend.get_tile(b)?.unwrap().data(), &[0xB2; 4096][..]);
    Ok(())
}

#[test]
fn freed_slots_are_reused_most_recent_first() -> Result<()> {
    let dir = tempdir()?;
    let mut backend = FileBackend::open(dir.path().join("lifo.swap"), page_sized())?;
    for x in 0..4 {
        backend.set_tile(TileCoord::new(x, 0, 0), &mut Tile::new(4096))?;
    }
    let first = backend.entry_offset(TileCoord::new(1, 0, 0)).unwrap();
    let second = backend.entry_offset(TileCoord::new(3, 0, 0)).unwrap();
    backend.void_tile(TileCoord::new(1, 0, 0));
    backend.void_tile(TileCoord::new(3, 0, 0));

    backend.set_tile(TileCoord::new(10, 0, 0), &mut Tile::new(4096))?;
    backend.set_tile(TileCoord::new(11, 0, 0), &mut Tile::new(4096))?;
    assert_eq!(backend.entry_offset(TileCoord::new(10, 0, 0)), Some(second));
    assert_eq!(backend.entry_offset(TileCoord::new(11, 0, 0)), Some(first));
    Ok(())
}

#[test]
fn file_grows_in_fixed_increments() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("grow.swap");
    let opts = FileBackendOptions::default()
        .tile_dimensions(4, 4)
        .format(PixelFormat::y_u8())
        .sync_on_flush(false);
    let mut backend = FileBackend::open(&path, opts)?;
    let step = GROWTH_SLOTS * backend.tile_size() as u64;

    let mut last_len = 0;
    let mut growths = 0;
    for x in 0..200 {
        backend.set_tile(TileCoord::new(x, 0, 0), &mut Tile::filled(16, x as u8))?;
        let len = file_len(&path);
        if len != last_len {
            if last_len == 0 {
                assert_eq!(len, HEADER_LEN as u64 + step);
            } else {
                assert_eq!(len - last_len, step, "grew by one increment at tile {x}");
            }
            last_len = len;
            growths += 1;
        }
        let stats = backend.stats();
        assert!(stats.frontier <= stats.total_bytes);
        assert_eq!(stats.total_bytes, len);
    }
    assert_eq!(backend.stats().grows, growths);
    assert_eq!(growths, 7);
    Ok(())
}

#[test]
fn page_sized_tiles_survive_reopen_and_reuse_slot() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let mut backend = FileBackend::open(dir.path().join("scenario.swap"), page_sized())?;
    let (p0, p1, p2) = (
        TileCoord::new(0, 0, 0),
        TileCoord::new(1, 0, 0),
        TileCoord::new(2, 0, 0),
    );
    backend.set_tile(p0, &mut Tile::filled(4096, 0xAA))?;
    backend.set_tile(p1, &mut Tile::filled(4096, 0xBB))?;
    backend.flush()?;

    let copy = dir.path().join("scenario-reopen.swap");
    fs::copy(backend.path(), &copy)?;
    drop(backend);

    let mut reopened = FileBackend::open(&copy, FileBackendOptions::default())?;
    assert_eq!(reopened.tile_size(), 4096);
    assert_eq!(reopened.get_tile(p0)?.unwrap().data(), &[0xAA; 4096][..]);
    assert_eq!(reopened.get_tile(p1)?.unwrap().data(), &[0xBB; 4096][..]);

    let freed = reopened.entry_offset(p0).unwrap();
    assert!(reopened.void_tile(p0));
    assert!(!reopened.tile_exists(p0));
    reopened.set_tile(p2, &mut Tile::filled(4096, 0xCC))?;
    assert_eq!(reopened.entry_offset(p2), Some(freed));
    Ok(())
}

#[test]
fn drop_deletes_swap_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("teardown.swap");
    {
        let mut backend = FileBackend::open(&path, page_sized())?;
        backend.set_tile(TileCoord::new(0, 0, 0), &mut Tile::new(4096))?;
        backend.flush()?;
        assert!(path.exists());
    }
    assert!(!path.exists());

    {
        let _never_used = FileBackend::open(&path, page_sized())?;
    }
    assert!(!path.exists());
    Ok(())
}

#[test]
fn command_surface_matches_direct_calls() -> Result<()> {
    let dir = tempdir()?;
    let mut backend = FileBackend::open(dir.path().join("cmd.swap"), page_sized())?;
    let coord = TileCoord::new(3, -2, 1);
    let mut tile = Tile::filled(4096, 0x5A);

    assert_eq!(
        backend.command(coord, TileCommand::Exists)?,
        CommandReply::Exists(false)
    );
    assert_eq!(
        backend.command(coord, TileCommand::Set(&mut tile))?,
        CommandReply::Stored
    );
    assert!(tile.is_stored());
    match backend.command(coord, TileCommand::Get)? {
        CommandReply::Tile(Some(read)) => assert_eq!(read.data(), tile.data()),
        other => panic!("unexpected reply {other:?}"),
    }
    assert_eq!(backend.command(coord, TileCommand::Flush)?, CommandReply::Flushed);
    assert_eq!(backend.command(coord, TileCommand::Idle)?, CommandReply::Idle(false));
    assert_eq!(backend.command(coord, TileCommand::Void)?, CommandReply::Voided(true));
    assert_eq!(
        backend.command(coord, TileCommand::Get)?,
        CommandReply::Tile(None)
    );
    assert_eq!(backend.stats().flushes, 1);
    Ok(())
}
