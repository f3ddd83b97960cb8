use crate::{SnapshotId, UserKey};
use std::cmp::Reverse;

/// A user key paired with the snapshot id of the write that produced it.
///
/// This is the key type of every sorted structure in the engine: the
/// memtable, record blocks, index blocks and the merge machinery all order
/// by it.
#[derive(Clone, Eq)]
pub struct Key {
    /// User-supplied key bytes
    pub user_key: UserKey,

    /// Snapshot id of the write that produced this version
    pub snapshot_id: SnapshotId,
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.user_key
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.user_key == other.user_key && self.snapshot_id == other.snapshot_id
    }
}

impl std::hash::Hash for Key {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write(&self.user_key);
        state.write_u64(self.snapshot_id);
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}:{}", self.user_key, self.snapshot_id)
    }
}

impl Key {
    /// Creates a new key from a user key and snapshot id.
    pub fn new<K: Into<UserKey>>(user_key: K, snapshot_id: SnapshotId) -> Self {
        let user_key = user_key.into();

        assert!(
            u32::try_from(user_key.len()).is_ok(),
            "keys can be 2^32 bytes in length",
        );

        Self {
            user_key,
            snapshot_id,
        }
    }

    /// The lowest possible key for a given user key.
    ///
    /// Because newer snapshots order first, this sorts before every version
    /// of `user_key`, making it the start bound for ascending scans.
    pub fn scan_floor<K: Into<UserKey>>(user_key: K) -> Self {
        Self::new(user_key, SnapshotId::MAX)
    }

    /// The highest possible key for a given user key.
    ///
    /// Sorts after every version of `user_key`, making it the start bound
    /// for descending scans.
    pub fn scan_ceiling<K: Into<UserKey>>(user_key: K) -> Self {
        Self::new(user_key, 0)
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// Order by user key, THEN by snapshot id in reverse
//
// At equal user keys the NEWEST version orders first, so a forward scan
// naturally encounters the newest visible version before its shadows.
// Every binary search, heap merge and iterator relies on this single impl.
impl Ord for Key {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.user_key, Reverse(self.snapshot_id))
            .cmp(&(&other.user_key, Reverse(other.snapshot_id)))
    }
}
