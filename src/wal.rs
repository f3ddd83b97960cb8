use crate::value::{GenerationId, Tuple};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Append-only durability log, paired 1:1 with a memtable generation.
///
/// Record format (all integers little-endian):
///
/// ```text
/// [u32 length][u32 keyLen][keyBytes][u64 snapshotId][u32 valueLen][valueBytes][u32 crc32]
/// ```
///
/// `length` covers the record body (everything between it and the CRC);
/// the CRC-32 is computed over the same body.
pub struct Wal {
    generation: GenerationId,
    path: PathBuf,
    writer: BufWriter<File>,
}

impl Wal {
    /// Creates a fresh log file for a generation.
    ///
    /// Fails if the file already exists - generations are never reused.
    pub fn create<P: AsRef<Path>>(folder: P, generation: GenerationId) -> crate::Result<Self> {
        let path = crate::file::wal_file_path(folder, generation);

        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)?;

        Ok(Self {
            generation,
            path,
            writer: BufWriter::new(file),
        })
    }

    #[must_use]
    pub fn generation(&self) -> GenerationId {
        self.generation
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a tuple, optionally fsyncing before returning.
    pub fn append(&mut self, tuple: &Tuple, sync: bool) -> crate::Result<()> {
        let mut body =
            Vec::with_capacity(4 + tuple.key.user_key.len() + 8 + 4 + tuple.value.len());

        // NOTE: Key and value lengths are asserted to fit u32 on construction
        #[allow(clippy::cast_possible_truncation)]
        {
            body.write_u32::<LittleEndian>(tuple.key.user_key.len() as u32)?;
            body.write_all(&tuple.key.user_key)?;
            body.write_u64::<LittleEndian>(tuple.key.snapshot_id)?;
            body.write_u32::<LittleEndian>(tuple.value.len() as u32)?;
            body.write_all(&tuple.value)?;

            self.writer.write_u32::<LittleEndian>(body.len() as u32)?;
        }

        self.writer.write_all(&body)?;
        self.writer
            .write_u32::<LittleEndian>(crc32fast::hash(&body))?;

        self.writer.flush()?;

        if sync {
            self.writer.get_mut().sync_data()?;
        }

        Ok(())
    }

    /// Fsyncs the log file.
    pub fn sync(&mut self) -> crate::Result<()> {
        self.writer.flush()?;
        self.writer.get_mut().sync_data()?;
        Ok(())
    }
}

/// Replays a log file, returning every record up to (excluding) the first
/// torn or corrupt one.
///
/// A trailing partial record is the normal shape of a crash mid-append, so
/// hitting one terminates the replay cleanly instead of erroring.
pub fn replay<P: AsRef<Path>>(path: P) -> crate::Result<Vec<Tuple>> {
    let path = path.as_ref();

    let mut reader = BufReader::new(File::open(path)?);
    let mut tuples = Vec::new();

    loop {
        let length = match reader.read_u32::<LittleEndian>() {
            Ok(length) => length,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };

        let mut body = vec![0; length as usize];

        if reader.read_exact(&mut body).is_err() {
            log::warn!("{path:?}: torn record at tail, stopping replay");
            break;
        }

        let crc = match reader.read_u32::<LittleEndian>() {
            Ok(crc) => crc,
            Err(_) => {
                log::warn!("{path:?}: torn checksum at tail, stopping replay");
                break;
            }
        };

        if crc32fast::hash(&body) != crc {
            log::warn!("{path:?}: checksum mismatch, stopping replay");
            break;
        }

        match decode_body(&body) {
            Some(tuple) => tuples.push(tuple),
            None => {
                log::warn!("{path:?}: malformed record body, stopping replay");
                break;
            }
        }
    }

    log::debug!("{path:?}: replayed {} records", tuples.len());

    Ok(tuples)
}

fn decode_body(mut body: &[u8]) -> Option<Tuple> {
    let key_len = body.read_u32::<LittleEndian>().ok()? as usize;

    if body.len() < key_len {
        return None;
    }

    let (key_bytes, rest) = body.split_at(key_len);
    let key_bytes: crate::UserKey = key_bytes.into();
    body = rest;

    let snapshot_id = body.read_u64::<LittleEndian>().ok()?;
    let value_len = body.read_u32::<LittleEndian>().ok()? as usize;

    if body.len() != value_len || key_bytes.is_empty() {
        return None;
    }

    Some(Tuple::from_components(key_bytes, body, snapshot_id))
}
