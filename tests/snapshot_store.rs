use std::sync::Arc;

use anyhow::Result;
use tempfile::tempdir;

use leafwatch::storage::save_frame;
use leafwatch::{Frame, SnapshotStore, SqliteSnapshotStore};

#[test]
fn snapshots_survive_reopen() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("detections.db");

    let frame = Frame::filled(12, 8, [60, 150, 60]);
    let id = {
        let store = SqliteSnapshotStore::open(&db_path)?;
        save_frame(&store, &frame)?
    };

    let store = SqliteSnapshotStore::open(&db_path)?;
    let listed = store.list()?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id);
    assert_eq!(Frame::decode(&listed[0].image)?, frame);
    Ok(())
}

#[test]
fn concurrent_saves_and_clears_keep_rows_whole() -> Result<()> {
    let dir = tempdir()?;
    let store: Arc<dyn SnapshotStore> =
        Arc::new(SqliteSnapshotStore::open(dir.path().join("detections.db"))?);
    let png = Frame::filled(4, 4, [1, 2, 3]).encode_png()?;

    let mut workers = Vec::new();
    for t in 0..4 {
        let store = Arc::clone(&store);
        let png = png.clone();
        workers.push(std::thread::spawn(move || -> Result<()> {
            for i in 0..25 {
                store.save(&format!("2024-05-01 10:{:02}:{:02}", t, i), &png)?;
                if t == 0 && i % 10 == 0 {
                    store.clear()?;
                }
            }
            Ok(())
        }));
    }
    for worker in workers {
        worker.join().expect("worker panicked")?;
    }

    let snapshots = store.list()?;
    assert!(!snapshots.is_empty());
    for snapshot in &snapshots {
        assert_eq!(snapshot.image, png);
        assert_eq!(snapshot.timestamp.len(), 19);
    }
    let mut ids: Vec<i64> = snapshots.iter().map(|s| s.id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), snapshots.len());
    Ok(())
}

#[test]
fn clear_reports_removed_rows_and_ids_keep_growing() -> Result<()> {
    let dir = tempdir()?;
    let store = SqliteSnapshotStore::open(dir.path().join("detections.db"))?;
    let first = store.save("2024-05-01 08:00:00", b"a")?;
    store.save("2024-05-01 08:00:01", b"b")?;
    assert_eq!(store.clear()?, 2);
    assert_eq!(store.clear()?, 0);
    let next = store.save("2024-05-01 08:00:02", b"c")?;
    assert!(next > first + 1);
    Ok(())
}
