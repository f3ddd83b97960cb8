use heftydb::{CompactionPolicy, Config};
use test_log::test;

fn table_file_count(folder: &std::path::Path) -> usize {
    std::fs::read_dir(folder)
        .expect("folder should exist")
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "table"))
        .count()
}

#[test]
fn full_compaction_merges_all_tables() -> heftydb::Result<()> {
    const ITEM_COUNT: u64 = 1_000;

    let folder = tempfile::tempdir()?;

    let db = Config::new(&folder)
        .compaction_policy(CompactionPolicy::Full)
        .compaction_workers(1)
        .open()?;

    for idx in 0..ITEM_COUNT {
        db.put(idx.to_be_bytes(), "v1")?;

        if idx % 250 == 249 {
            db.flush()?;
        }
    }

    for idx in 0..ITEM_COUNT / 2 {
        db.put(idx.to_be_bytes(), "v2")?;
    }

    db.flush()?;
    db.compact()?.wait()?;

    assert_eq!(1, table_file_count(folder.path()));

    for idx in 0..ITEM_COUNT {
        let expected: &[u8] = if idx < ITEM_COUNT / 2 { b"v2" } else { b"v1" };
        assert_eq!(Some(expected.into()), db.get(idx.to_be_bytes())?);
    }

    Ok(())
}

#[test]
fn compaction_preserves_reads_at_retained_snapshots() -> heftydb::Result<()> {
    let folder = tempfile::tempdir()?;

    let db = Config::new(&folder)
        .compaction_policy(CompactionPolicy::Full)
        .compaction_workers(1)
        .open()?;

    let old_snapshot = db.put("k", "old")?;
    db.retain_snapshot(old_snapshot);
    db.flush()?;

    db.put("k", "new")?;
    db.flush()?;

    db.compact()?.wait()?;

    // The retained version survived the merge
    assert_eq!(Some("old".as_bytes().into()), db.get_at("k", old_snapshot)?);
    assert_eq!(Some("new".as_bytes().into()), db.get("k")?);

    db.release_snapshot(old_snapshot);

    Ok(())
}

#[test]
fn compaction_drops_tombstones_at_oldest_level() -> heftydb::Result<()> {
    let folder = tempfile::tempdir()?;

    let db = Config::new(&folder)
        .compaction_policy(CompactionPolicy::Full)
        .compaction_workers(1)
        .open()?;

    db.put("doomed", "v")?;
    db.put("kept", "v")?;
    db.flush()?;

    db.delete("doomed")?;
    db.flush()?;

    db.compact()?.wait()?;

    assert_eq!(None, db.get("doomed")?);
    assert_eq!(Some("v".as_bytes().into()), db.get("kept")?);

    // The merge covered every table, so neither the tombstone nor the
    // shadowed version survives
    let items = db
        .ascending_iterator(None, None)?
        .collect::<heftydb::Result<Vec<_>>>()?;
    assert_eq!(vec![("kept".into(), "v".into())], items);

    assert_eq!(1, table_file_count(folder.path()));

    Ok(())
}

#[test]
fn compaction_keeps_tombstone_while_snapshot_retained() -> heftydb::Result<()> {
    let folder = tempfile::tempdir()?;

    let db = Config::new(&folder)
        .compaction_policy(CompactionPolicy::Full)
        .compaction_workers(1)
        .open()?;

    let value_snapshot = db.put("k", "v")?;
    db.retain_snapshot(value_snapshot);
    db.flush()?;

    db.delete("k")?;
    db.flush()?;

    db.compact()?.wait()?;

    // Deleted now, but the retained snapshot still reads the value
    assert_eq!(None, db.get("k")?);
    assert_eq!(Some("v".as_bytes().into()), db.get_at("k", value_snapshot)?);

    db.release_snapshot(value_snapshot);

    Ok(())
}

#[test]
fn disabled_policy_makes_compact_a_noop() -> heftydb::Result<()> {
    let folder = tempfile::tempdir()?;

    let db = Config::new(&folder)
        .compaction_policy(CompactionPolicy::Disabled)
        .open()?;

    db.put("a", "1")?;
    db.flush()?;
    db.put("b", "2")?;
    db.flush()?;

    db.compact()?.wait()?;

    assert_eq!(2, table_file_count(folder.path()));
    assert_eq!(Some("1".as_bytes().into()), db.get("a")?);

    Ok(())
}

#[test]
fn size_tiered_compacts_once_tier_fills() -> heftydb::Result<()> {
    const ITEM_COUNT: u64 = 4_000;

    let folder = tempfile::tempdir()?;

    let db = Config::new(&folder)
        .compaction_policy(CompactionPolicy::SizeTiered)
        .compaction_workers(1)
        .open()?;

    for idx in 0..ITEM_COUNT {
        db.put(idx.to_be_bytes(), nanoid::nanoid!())?;

        if idx % 500 == 499 {
            db.flush()?;
        }
    }

    db.flush()?;

    // Force the strategy to look at the accumulated tier
    db.compact()?.wait()?;

    // Tables of the same tier got merged down
    assert!(table_file_count(folder.path()) < 8);

    for idx in 0..ITEM_COUNT {
        assert!(db.get(idx.to_be_bytes())?.is_some(), "tuple {idx} went missing");
    }

    Ok(())
}

#[test]
fn reads_are_consistent_while_compacting() -> heftydb::Result<()> {
    const ITEM_COUNT: u64 = 2_000;

    let folder = tempfile::tempdir()?;

    let db = Config::new(&folder)
        .compaction_policy(CompactionPolicy::Full)
        .open()?;

    for idx in 0..ITEM_COUNT {
        db.put(idx.to_be_bytes(), "v")?;

        if idx % 400 == 399 {
            db.flush()?;
        }
    }

    // An iterator created before the compaction must keep working on the
    // old table files even after they are swapped out
    let iter = db.ascending_iterator(None, None)?;

    db.compact()?.wait()?;

    let items = iter.collect::<heftydb::Result<Vec<_>>>()?;
    assert_eq!(ITEM_COUNT as usize, items.len());

    Ok(())
}
