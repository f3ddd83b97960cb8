use super::index_block::{self, IndexRecord};
use super::record_block;
use super::trailer::Trailer;
use crate::value::{GenerationId, SnapshotId, Tuple, UserKey};
use crate::Config;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Streams sorted tuples into a new table file
///
/// Maintains one in-progress record block; every time it reaches the
/// configured size it is flushed to disk and summarized into the leaf index
/// level. `finish` writes the index tree bottom-up (one root block on top),
/// the bloom filter and the trailer, then fsyncs.
pub struct TableBuilder {
    generation: GenerationId,
    path: PathBuf,
    folder: PathBuf,

    record_block_size: u32,
    index_block_size: u32,
    bloom_fp_rate: f32,

    writer: BufWriter<File>,
    file_pos: u64,

    current: record_block::Builder,
    leaf_entries: Vec<IndexRecord>,

    /// Hashes for the bloom filter; one per distinct user key
    bloom_hashes: Vec<u64>,
    current_user_key: Option<UserKey>,

    tuple_count: u64,
    block_count: usize,
    max_snapshot: SnapshotId,
}

impl TableBuilder {
    /// Sets up a new table builder writing `<generation>.table`.
    pub fn new(generation: GenerationId, config: &Config) -> crate::Result<Self> {
        let folder = config.path.clone();
        let path = crate::file::table_file_path(&folder, generation);

        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)?;

        Ok(Self {
            generation,
            path,
            folder,

            record_block_size: config.record_block_size,
            index_block_size: config.index_block_size,
            bloom_fp_rate: config.bloom_false_positive_rate,

            writer: BufWriter::with_capacity(512_000, file),
            file_pos: 0,

            current: record_block::Builder::default(),
            leaf_entries: Vec::new(),

            bloom_hashes: Vec::with_capacity(10_000),
            current_user_key: None,

            tuple_count: 0,
            block_count: 0,
            max_snapshot: 0,
        })
    }

    /// Writes a tuple. Input must arrive in ascending key order.
    pub fn write(&mut self, tuple: Tuple) -> crate::Result<()> {
        if Some(&tuple.key.user_key) != self.current_user_key.as_ref() {
            self.current_user_key = Some(tuple.key.user_key.clone());

            // IMPORTANT: One hash per distinct user key, not per version
            self.bloom_hashes
                .push(crate::table::filter::Builder::get_hash(&tuple.key.user_key));
        }

        self.max_snapshot = self.max_snapshot.max(tuple.key.snapshot_id);
        self.tuple_count += 1;

        self.current.add(tuple);

        if self.current.encoded_size() >= self.record_block_size as usize {
            self.flush_record_block()?;
        }

        Ok(())
    }

    /// Writes the in-progress record block to disk and registers it
    /// in the leaf index level.
    fn flush_record_block(&mut self) -> crate::Result<()> {
        debug_assert!(!self.current.is_empty());

        let builder = std::mem::take(&mut self.current);

        // NOTE: The builder is only flushed when non-empty
        #[allow(clippy::expect_used)]
        let end_key = builder.last_key().expect("block should not be empty").clone();

        let bytes = builder.build();
        self.writer.write_all(&bytes)?;

        self.leaf_entries.push(IndexRecord {
            end_key,
            child_offset: self.file_pos,
            child_size: bytes.len() as u64,
        });

        self.file_pos += bytes.len() as u64;
        self.block_count += 1;

        Ok(())
    }

    /// Writes one level of index blocks, returning the entries of the level above.
    fn write_index_level(
        &mut self,
        entries: Vec<IndexRecord>,
    ) -> crate::Result<Vec<IndexRecord>> {
        let mut parent_entries = Vec::new();
        let mut block = index_block::Builder::default();

        let mut flush =
            |block: &mut index_block::Builder,
             writer: &mut BufWriter<File>,
             file_pos: &mut u64,
             parent_entries: &mut Vec<IndexRecord>|
             -> crate::Result<()> {
                let full = std::mem::take(block);

                // NOTE: Only flushed when non-empty
                #[allow(clippy::expect_used)]
                let end_key = full
                    .last_key()
                    .expect("index block should not be empty")
                    .clone();

                let bytes = full.build();
                writer.write_all(&bytes)?;

                parent_entries.push(IndexRecord {
                    end_key,
                    child_offset: *file_pos,
                    child_size: bytes.len() as u64,
                });

                *file_pos += bytes.len() as u64;

                Ok(())
            };

        for entry in entries {
            block.add(entry);

            // At least two children per block, so every level is strictly
            // smaller than the one below it and the loop in `finish`
            // terminates even with oversized keys
            if block.len() >= 2 && block.encoded_size() >= self.index_block_size as usize {
                flush(
                    &mut block,
                    &mut self.writer,
                    &mut self.file_pos,
                    &mut parent_entries,
                )?;
            }
        }

        if !block.is_empty() {
            flush(
                &mut block,
                &mut self.writer,
                &mut self.file_pos,
                &mut parent_entries,
            )?;
        }

        Ok(parent_entries)
    }

    /// Abandons the table, removing the partially written file.
    pub fn abort(self) -> crate::Result<()> {
        let Self { writer, path, .. } = self;

        drop(writer);
        std::fs::remove_file(&path)?;

        log::debug!("aborted table write, removed {path:?}");

        Ok(())
    }

    /// Finishes the table, making sure all data is durable.
    ///
    /// Returns `None` (and removes the file) if no tuples were written.
    pub fn finish(mut self) -> crate::Result<Option<Trailer>> {
        if !self.current.is_empty() {
            self.flush_record_block()?;
        }

        if self.tuple_count == 0 {
            log::debug!(
                "removing empty table file {:?} because no tuples were written",
                self.path,
            );

            drop(self.writer);
            std::fs::remove_file(&self.path)?;
            return Ok(None);
        }

        // Record blocks end here; everything above is index territory
        let index_region_offset = self.file_pos;

        // Close index levels bottom-up until a single root block remains
        let mut entries = std::mem::take(&mut self.leaf_entries);

        let root = loop {
            let mut parent_entries = self.write_index_level(entries)?;

            // NOTE: Each level writes at least one block
            #[allow(clippy::expect_used)]
            if parent_entries.len() == 1 {
                break parent_entries.pop().expect("should exist");
            }

            entries = parent_entries;
        };

        // Bloom filter sits between the index tree and the trailer
        let filter_offset = self.file_pos;

        let mut filter_builder = crate::table::filter::Builder::with_fp_rate(
            self.bloom_hashes.len().max(1),
            self.bloom_fp_rate,
        );

        for hash in std::mem::take(&mut self.bloom_hashes) {
            filter_builder.set_with_hash(hash);
        }

        let filter = filter_builder.build();
        let filter_size = filter.encoded_size() as u64;
        filter.encode_into(&mut self.writer)?;
        self.file_pos += filter_size;

        let trailer = Trailer {
            root_index_offset: root.child_offset,
            root_index_size: root.child_size,
            filter_offset,
            filter_size,
            tuple_count: self.tuple_count,
            index_region_offset,
            max_snapshot: self.max_snapshot,
        };

        trailer.encode_into(&mut self.writer)?;

        self.writer.flush()?;
        self.writer.get_mut().sync_all()?;

        // IMPORTANT: fsync folder on Unix so the new file is durable
        crate::file::fsync_directory(&self.folder)?;

        log::debug!(
            "written {} tuples in {} record blocks to table {} ({} MiB)",
            self.tuple_count,
            self.block_count,
            self.generation,
            self.file_pos / 1_024 / 1_024,
        );

        Ok(Some(trailer))
    }
}
