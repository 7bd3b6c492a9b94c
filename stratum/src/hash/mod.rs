//! Disk-resident extendible hash table.
//!
//! Three page levels: a header routing the top hash bits to directories,
//! directories routing the low `global_depth` bits to buckets, and dense
//! bucket pages of fixed-width entries. Readers and writers crab page
//! latches down the path, releasing each parent as soon as the child is
//! latched.

mod bucket_page;
mod directory_page;
mod header_page;

pub use bucket_page::bucket_capacity;
pub use directory_page::{HASH_DIRECTORY_ARRAY_SIZE, HASH_DIRECTORY_MAX_DEPTH};
pub use header_page::{HASH_HEADER_ARRAY_SIZE, HASH_HEADER_MAX_DEPTH};

use std::hash::{Hash, Hasher};
use std::io;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::buffer_pool::WritePageGuard;
use crate::{BufferPoolManager, PageId, INVALID_PAGE_ID};

/// Default key hasher: SipHash folded to 32 bits.
pub fn default_hash<K: Hash>(key: &K) -> u32 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish() as u32
}

/// A single-value-per-key extendible hash index over fixed-width keys and
/// values.
pub struct DiskExtendibleHashTable<K, V> {
    bpm: Arc<BufferPoolManager>,
    header_page_id: PageId,
    directory_max_depth: u32,
    bucket_max_size: u32,
    hash_fn: fn(&K) -> u32,
    _marker: PhantomData<(K, V)>,
}

impl<K: Copy + PartialEq, V: Copy> DiskExtendibleHashTable<K, V> {
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        header_max_depth: u32,
        directory_max_depth: u32,
        bucket_max_size: u32,
        hash_fn: fn(&K) -> u32,
    ) -> io::Result<Self> {
        let header_page_id = {
            let mut guard = bpm.new_page()?;
            guard.write().init_hash_header(header_max_depth);
            guard.id()
        };
        Ok(Self {
            bpm,
            header_page_id,
            directory_max_depth,
            bucket_max_size,
            hash_fn,
            _marker: PhantomData,
        })
    }

    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    /// Looks up `key`, crabbing read latches header -> directory -> bucket.
    pub fn get(&self, key: &K) -> io::Result<Option<V>> {
        let hash = (self.hash_fn)(key);
        let header = self.bpm.acquire_page_read(self.header_page_id)?;
        let directory_idx = header.hash_to_directory_index(hash);
        let directory_page_id = header.directory_page_id(directory_idx);
        if directory_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let directory = self.bpm.acquire_page_read(directory_page_id)?;
        drop(header);

        let bucket_idx = directory.hash_to_bucket_index(hash);
        let bucket_page_id = directory.bucket_page_id(bucket_idx);
        if bucket_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let bucket = self.bpm.acquire_page_read(bucket_page_id)?;
        drop(directory);

        Ok(bucket.bucket_lookup::<K, V>(key))
    }

    /// Inserts a key/value pair. Duplicate keys are rejected. Returns false
    /// when the key exists or the index is at capacity everywhere along the
    /// path.
    pub fn insert(&self, key: &K, value: &V) -> io::Result<bool> {
        if self.get(key)?.is_some() {
            return Ok(false);
        }
        let hash = (self.hash_fn)(key);
        let mut header = self.bpm.acquire_page_write(self.header_page_id)?;
        let directory_idx = header.hash_to_directory_index(hash);
        let directory_page_id = header.directory_page_id(directory_idx);
        if directory_page_id == INVALID_PAGE_ID {
            // First key routed here: build the directory and its first bucket.
            let mut directory = self.bpm.new_page()?.upgrade_write();
            directory.init_hash_directory(self.directory_max_depth);
            header.set_directory_page_id(directory_idx, directory.id());
            drop(header);
            let bucket_idx = directory.hash_to_bucket_index(hash);
            return self.insert_to_new_bucket(&mut directory, bucket_idx, key, value);
        }
        let mut directory = self.bpm.acquire_page_write(directory_page_id)?;
        drop(header);

        let mut bucket_idx = directory.hash_to_bucket_index(hash);
        let mut bucket_page_id = directory.bucket_page_id(bucket_idx);
        if bucket_page_id == INVALID_PAGE_ID {
            return self.insert_to_new_bucket(&mut directory, bucket_idx, key, value);
        }
        let mut bucket = self.bpm.acquire_page_write(bucket_page_id)?;
        // Re-check under the write latch: a racing insert may have won.
        if bucket.bucket_lookup::<K, V>(key).is_some() {
            return Ok(false);
        }

        loop {
            if bucket.bucket_insert(key, value) {
                return Ok(true);
            }
            let local_depth = directory.local_depth(bucket_idx);
            if local_depth < directory.global_depth() {
                // Split: peel the entries whose next hash bit is set off
                // into an image bucket.
                let image_idx = bucket_idx ^ (1 << local_depth);
                let new_local_depth = local_depth + 1;
                let local_mask = (1u32 << new_local_depth) - 1;

                let mut image = self.bpm.new_page()?.upgrade_write();
                let image_page_id = image.id();
                image.init_hash_bucket::<K, V>(self.bucket_max_size);
                directory.update_directory_mapping(
                    image_idx,
                    image_page_id,
                    new_local_depth,
                    local_mask,
                );
                directory.update_directory_mapping(
                    bucket_idx,
                    bucket_page_id,
                    new_local_depth,
                    local_mask,
                );

                let mut idx = 0;
                while idx < bucket.bucket_size() {
                    let (k, v) = bucket.bucket_entry_at::<K, V>(idx);
                    if ((self.hash_fn)(&k) & local_mask) == (image_idx & local_mask) {
                        image.bucket_insert(&k, &v);
                        bucket.bucket_remove_at::<K, V>(idx);
                    } else {
                        idx += 1;
                    }
                }

                // Continue in whichever image the new key maps to. The split
                // may be uneven, so the loop retries the insert.
                if (hash & local_mask) == (image_idx & local_mask) {
                    bucket = image;
                    bucket_idx = image_idx;
                    bucket_page_id = image_page_id;
                }
            } else if directory.global_depth() < directory.directory_max_depth() {
                directory.incr_global_depth();
                bucket_idx = directory.hash_to_bucket_index(hash);
                bucket_page_id = directory.bucket_page_id(bucket_idx);
            } else {
                return Ok(false);
            }
        }
    }

    fn insert_to_new_bucket(
        &self,
        directory: &mut WritePageGuard<'_>,
        bucket_idx: u32,
        key: &K,
        value: &V,
    ) -> io::Result<bool> {
        let mut bucket = self.bpm.new_page()?.upgrade_write();
        bucket.init_hash_bucket::<K, V>(self.bucket_max_size);
        directory.set_bucket_page_id(bucket_idx, bucket.id());
        Ok(bucket.bucket_insert(key, value))
    }

    /// Removes `key`, merging emptied buckets with their split images and
    /// shrinking the directory while every local depth allows it.
    pub fn remove(&self, key: &K) -> io::Result<bool> {
        let hash = (self.hash_fn)(key);
        let header = self.bpm.acquire_page_write(self.header_page_id)?;
        let directory_idx = header.hash_to_directory_index(hash);
        let directory_page_id = header.directory_page_id(directory_idx);
        if directory_page_id == INVALID_PAGE_ID {
            return Ok(false);
        }
        let mut directory = self.bpm.acquire_page_write(directory_page_id)?;
        drop(header);

        let mut bucket_idx = directory.hash_to_bucket_index(hash);
        let mut bucket_page_id = directory.bucket_page_id(bucket_idx);
        if bucket_page_id == INVALID_PAGE_ID {
            return Ok(false);
        }
        let mut bucket = self.bpm.acquire_page_write(bucket_page_id)?;
        if !bucket.bucket_remove::<K, V>(key) {
            return Ok(false);
        }

        loop {
            let local_depth = directory.local_depth(bucket_idx);
            if local_depth == 0 {
                break;
            }
            let masked_idx = bucket_idx & directory.local_depth_mask(bucket_idx);
            let image_idx = masked_idx ^ (1 << (local_depth - 1));
            let image_page_id = directory.bucket_page_id(image_idx);
            assert!(image_page_id != INVALID_PAGE_ID, "split image must exist");

            // Images merge only at equal depth and only when one is empty.
            if directory.local_depth(image_idx) != local_depth {
                break;
            }
            let image = self.bpm.acquire_page_write(image_page_id)?;
            if !bucket.bucket_is_empty() && !image.bucket_is_empty() {
                break;
            }

            let dead_page_id;
            let survivor_page_id;
            if bucket.bucket_is_empty() {
                dead_page_id = bucket_page_id;
                survivor_page_id = image_page_id;
                bucket = image;
                bucket_idx = image_idx;
                bucket_page_id = image_page_id;
            } else {
                dead_page_id = image_page_id;
                survivor_page_id = bucket_page_id;
                drop(image);
            }
            self.bpm.delete_page(dead_page_id)?;

            let step = 1u32 << (local_depth - 1);
            let mut i = masked_idx.min(image_idx);
            while i < directory.directory_size() {
                directory.set_bucket_page_id(i, survivor_page_id);
                directory.decr_local_depth(i);
                i += step;
            }
        }
        while directory.can_shrink() {
            directory.decr_global_depth();
        }
        Ok(true)
    }

    /// Checks the directory invariants: every local depth is bounded by the
    /// global depth, and slots agreeing on the low `local_depth` bits share
    /// a bucket. Panics on violation.
    pub fn verify_integrity(&self) -> io::Result<()> {
        let header = self.bpm.acquire_page_read(self.header_page_id)?;
        for directory_idx in 0..header.header_size() {
            let directory_page_id = header.directory_page_id(directory_idx);
            if directory_page_id == INVALID_PAGE_ID {
                continue;
            }
            let directory = self.bpm.acquire_page_read(directory_page_id)?;
            let global_depth = directory.global_depth();
            assert!(global_depth <= directory.directory_max_depth());
            for i in 0..directory.directory_size() {
                let local_depth = directory.local_depth(i);
                assert!(local_depth <= global_depth);
                let mask = (1u32 << local_depth) - 1;
                for j in 0..directory.directory_size() {
                    let same_group = (i & mask) == (j & mask)
                        && directory.local_depth(j) == local_depth;
                    if same_group {
                        assert_eq!(
                            directory.bucket_page_id(i),
                            directory.bucket_page_id(j),
                            "slots agreeing on low local-depth bits must share a bucket"
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManager;
    use tempfile::tempdir;

    fn identity_hash(key: &u32) -> u32 {
        *key
    }

    fn table(
        dir: &tempfile::TempDir,
        directory_max_depth: u32,
        bucket_max_size: u32,
    ) -> DiskExtendibleHashTable<u32, u64> {
        let dm = DiskManager::open(dir.path().join("test.db")).unwrap();
        let bpm = Arc::new(BufferPoolManager::new(64, 2, dm));
        DiskExtendibleHashTable::new(bpm, 2, directory_max_depth, bucket_max_size, identity_hash)
            .unwrap()
    }

    #[test]
    fn insert_and_get_round_trip() {
        let dir = tempdir().unwrap();
        let ht = table(&dir, 3, 4);
        for key in 0..16u32 {
            assert!(ht.insert(&key, &(key as u64 * 100)).unwrap());
        }
        for key in 0..16u32 {
            assert_eq!(ht.get(&key).unwrap(), Some(key as u64 * 100));
        }
        assert_eq!(ht.get(&99).unwrap(), None);
        ht.verify_integrity().unwrap();
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let dir = tempdir().unwrap();
        let ht = table(&dir, 2, 4);
        assert!(ht.insert(&5, &50).unwrap());
        assert!(!ht.insert(&5, &51).unwrap());
        assert_eq!(ht.get(&5).unwrap(), Some(50));
    }

    #[test]
    fn growth_splits_buckets_and_keeps_keys_findable() {
        // bucket_max_size 2, directory_max_depth 2: inserting hashes 0..4
        // forces a directory grow and a bucket split.
        let dir = tempdir().unwrap();
        let ht = table(&dir, 2, 2);
        for key in 0..4u32 {
            assert!(ht.insert(&key, &(key as u64)).unwrap(), "insert {key}");
        }
        for key in 0..4u32 {
            assert_eq!(ht.get(&key).unwrap(), Some(key as u64), "lookup {key}");
        }
        ht.verify_integrity().unwrap();
    }

    #[test]
    fn insert_fails_when_directory_and_bucket_are_saturated() {
        // All keys share the low two bits, so at global = local = max depth
        // the target bucket can never split again.
        let dir = tempdir().unwrap();
        let ht = table(&dir, 2, 2);
        assert!(ht.insert(&0b000, &0).unwrap());
        assert!(ht.insert(&0b100, &1).unwrap());
        assert!(!ht.insert(&0b1000, &2).unwrap());
    }

    #[test]
    fn remove_merges_and_shrinks_directory() {
        let dir = tempdir().unwrap();
        let ht = table(&dir, 3, 2);
        for key in 0..8u32 {
            assert!(ht.insert(&key, &(key as u64)).unwrap());
        }
        for key in 0..8u32 {
            assert!(ht.remove(&key).unwrap(), "remove {key}");
            assert_eq!(ht.get(&key).unwrap(), None);
            ht.verify_integrity().unwrap();
        }
        // Everything merged away; re-inserting still works.
        assert!(ht.insert(&3, &33).unwrap());
        assert_eq!(ht.get(&3).unwrap(), Some(33));
    }

    #[test]
    fn remove_of_missing_key_returns_false() {
        let dir = tempdir().unwrap();
        let ht = table(&dir, 2, 4);
        assert!(!ht.remove(&1).unwrap());
        ht.insert(&1, &10).unwrap();
        assert!(ht.remove(&1).unwrap());
        assert!(!ht.remove(&1).unwrap());
    }

    #[test]
    fn randomized_workload_stays_consistent() {
        use rand::prelude::*;
        let dir = tempdir().unwrap();
        let ht = table(&dir, HASH_DIRECTORY_MAX_DEPTH, 4);
        let mut shadow = std::collections::HashMap::new();
        let mut rng = StdRng::seed_from_u64(0xC0FFEE);
        for _ in 0..2000 {
            let key = rng.gen_range(0..256u32);
            if rng.gen_bool(0.6) {
                let value = rng.gen::<u64>();
                let inserted = ht.insert(&key, &value).unwrap();
                assert_eq!(inserted, !shadow.contains_key(&key));
                if inserted {
                    shadow.insert(key, value);
                }
            } else {
                let removed = ht.remove(&key).unwrap();
                assert_eq!(removed, shadow.remove(&key).is_some());
            }
        }
        for (key, value) in &shadow {
            assert_eq!(ht.get(key).unwrap(), Some(*value));
        }
        ht.verify_integrity().unwrap();
    }
}
