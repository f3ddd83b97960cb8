use crate::GenerationId;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Extension of sorted table files
pub const TABLE_EXT: &str = "table";

/// Extension of write-ahead log files
pub const WAL_EXT: &str = "write";

/// Extension that quarantined table files are renamed to
pub const BROKEN_EXT: &str = "broken";

/// Path of the sorted table file for a generation.
#[must_use]
pub fn table_file_path<P: AsRef<Path>>(folder: P, generation: GenerationId) -> PathBuf {
    folder.as_ref().join(format!("{generation}.{TABLE_EXT}"))
}

/// Path of the write-ahead log file for a generation.
#[must_use]
pub fn wal_file_path<P: AsRef<Path>>(folder: P, generation: GenerationId) -> PathBuf {
    folder.as_ref().join(format!("{generation}.{WAL_EXT}"))
}

/// Parses `<generation>.<ext>` file names.
#[must_use]
pub fn parse_file_name(path: &Path) -> Option<(GenerationId, &str)> {
    let extension = path.extension()?.to_str()?;
    let stem = path.file_stem()?.to_str()?;
    let generation = stem.parse::<GenerationId>().ok()?;
    Some((generation, extension))
}

/// Fsyncs a directory, making sure directory entries (file creations,
/// renames, deletions) are durable.
pub fn fsync_directory<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    let file = File::open(path)?;
    debug_assert!(file.metadata()?.is_dir());

    #[cfg(unix)]
    file.sync_all()?;

    // NOTE: Windows does not support fsyncing directories
    #[cfg(windows)]
    let _ = file;

    Ok(())
}

/// Reads exactly `buf.len()` bytes at `offset` without moving any cursor,
/// so concurrent readers can share one file handle.
pub fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileExt;
        file.read_exact_at(buf, offset)
    }

    #[cfg(windows)]
    {
        use std::os::windows::fs::FileExt;

        let mut pos = 0;

        while pos < buf.len() {
            let n = file.seek_read(&mut buf[pos..], offset + pos as u64)?;

            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ));
            }

            pos += n;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn file_name_round_trip() {
        let path = table_file_path(Path::new("/tmp/db"), 42);
        assert_eq!(Some((42, TABLE_EXT)), parse_file_name(&path));

        let path = wal_file_path(Path::new("/tmp/db"), 7);
        assert_eq!(Some((7, WAL_EXT)), parse_file_name(&path));
    }

    #[test]
    fn file_name_rejects_garbage() {
        assert_eq!(None, parse_file_name(Path::new("/tmp/db/LOCK")));
        assert_eq!(None, parse_file_name(Path::new("/tmp/db/abc.table")));
    }
}
