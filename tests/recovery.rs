use heftydb::Config;
use test_log::test;

fn wal_files(folder: &std::path::Path) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(folder)
        .expect("folder should exist")
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "write"))
        .collect()
}

#[test]
fn reopen_replays_write_ahead_log() -> heftydb::Result<()> {
    const ITEM_COUNT: u64 = 1_000;

    let folder = tempfile::tempdir()?;

    {
        let db = Config::new(&folder).open()?;

        for idx in 0..ITEM_COUNT {
            db.put_fsync(idx.to_be_bytes(), idx.to_string())?;
        }

        // Dropped without flushing: everything lives in the log only
    }

    assert!(!wal_files(folder.path()).is_empty());

    let db = Config::new(&folder).open()?;

    for idx in 0..ITEM_COUNT {
        assert_eq!(
            Some(idx.to_string().as_bytes().into()),
            db.get(idx.to_be_bytes())?,
            "tuple {idx} did not survive recovery",
        );
    }

    Ok(())
}

#[test]
fn reopen_preserves_snapshot_ordering() -> heftydb::Result<()> {
    let folder = tempfile::tempdir()?;

    let last_snapshot = {
        let db = Config::new(&folder).open()?;
        db.put_fsync("a", "1")?;
        db.put_fsync("a", "2")?
    };

    let db = Config::new(&folder).open()?;

    // New writes must continue strictly above everything recovered
    let next = db.put("b", "3")?;
    assert!(next > last_snapshot);

    assert_eq!(Some("2".as_bytes().into()), db.get("a")?);
    assert_eq!(Some("1".as_bytes().into()), db.get_at("a", last_snapshot - 1)?);

    Ok(())
}

#[test]
fn torn_log_tail_recovers_clean_prefix() -> heftydb::Result<()> {
    const ITEM_COUNT: u64 = 100;

    let folder = tempfile::tempdir()?;

    {
        let db = Config::new(&folder).open()?;

        for idx in 0..ITEM_COUNT {
            db.put_fsync(idx.to_be_bytes(), "value")?;
        }
    }

    // Simulate a crash mid-append by chopping bytes off the log tail
    let wal_path = wal_files(folder.path()).pop().expect("log should exist");
    let file = std::fs::OpenOptions::new().write(true).open(&wal_path)?;
    let len = file.metadata()?.len();
    file.set_len(len - 5)?;
    file.sync_all()?;
    drop(file);

    let db = Config::new(&folder).open()?;

    // Everything but the torn last record survives
    for idx in 0..ITEM_COUNT - 1 {
        assert!(db.get(idx.to_be_bytes())?.is_some(), "tuple {idx} went missing");
    }

    assert_eq!(None, db.get((ITEM_COUNT - 1).to_be_bytes())?);

    Ok(())
}

#[test]
fn reopen_after_flush_reads_from_tables() -> heftydb::Result<()> {
    const ITEM_COUNT: u64 = 500;

    let folder = tempfile::tempdir()?;

    {
        let db = Config::new(&folder).open()?;

        for idx in 0..ITEM_COUNT {
            db.put(idx.to_be_bytes(), idx.to_string())?;
        }

        db.flush()?;
    }

    let db = Config::new(&folder).open()?;

    for idx in 0..ITEM_COUNT {
        assert_eq!(
            Some(idx.to_string().as_bytes().into()),
            db.get(idx.to_be_bytes())?,
        );
    }

    Ok(())
}

#[test]
fn corrupt_table_is_quarantined_not_fatal() -> heftydb::Result<()> {
    use std::io::{Seek, SeekFrom, Write};

    let folder = tempfile::tempdir()?;

    {
        let db = Config::new(&folder).open()?;
        db.put("durable", "yes")?;
        db.flush()?;
        db.put_fsync("logged", "yes")?;
    }

    // Clobber the table file's trailer magic
    let table_path = std::fs::read_dir(folder.path())?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .find(|path| path.extension().is_some_and(|ext| ext == "table"))
        .expect("table file should exist");

    let mut file = std::fs::OpenOptions::new().write(true).open(&table_path)?;
    file.seek(SeekFrom::End(-4))?;
    file.write_all(&[0, 0, 0, 0])?;
    file.sync_all()?;
    drop(file);

    let db = Config::new(&folder).open()?;

    // The broken table is quarantined and its data lost, but the
    // database opens and the logged write is still there
    assert_eq!(Some("yes".as_bytes().into()), db.get("logged")?);
    assert_eq!(None, db.get("durable")?);

    assert!(!table_path.exists());

    let quarantined = std::fs::read_dir(folder.path())?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .any(|path| path.extension().is_some_and(|ext| ext == "broken"));
    assert!(quarantined, "broken table file should be quarantined");

    Ok(())
}

#[test]
fn generations_are_not_reused_after_reopen() -> heftydb::Result<()> {
    let folder = tempfile::tempdir()?;

    {
        let db = Config::new(&folder).open()?;
        db.put("a", "1")?;
        db.flush()?;
    }

    {
        let db = Config::new(&folder).open()?;
        db.put("b", "2")?;
        db.flush()?;
    }

    let db = Config::new(&folder).open()?;
    assert_eq!(Some("1".as_bytes().into()), db.get("a")?);
    assert_eq!(Some("2".as_bytes().into()), db.get("b")?);

    Ok(())
}
