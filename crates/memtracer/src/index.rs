//! The two live-record indices.
//!
//! Records are owned by the [`AllocationIndex`] alone; the
//! [`PathIndex`] holds user-pointer positions into it, so there is no
//! shared ownership between the containers.

use crate::record::PathRecord;
use indexmap::IndexMap;
use std::collections::BTreeMap;

/// Pointer-keyed index of live records. Insertion order is the
/// allocation chronology; removal shifts rather than swaps so that the
/// order survives frees.
#[derive(Default)]
pub struct AllocationIndex {
    live: IndexMap<usize, PathRecord>,
}

impl AllocationIndex {
    pub fn insert(&mut self, record: PathRecord) {
        let prev = self.live.insert(record.ptr(), record);
        debug_assert!(prev.is_none(), "allocator returned a live pointer twice");
    }

    pub fn get(&self, ptr: usize) -> Option<&PathRecord> {
        self.live.get(&ptr)
    }

    pub fn remove(&mut self, ptr: usize) -> Option<PathRecord> {
        self.live.shift_remove(&ptr)
    }

    /// Live records in allocation order.
    pub fn records(&self) -> impl Iterator<Item = &PathRecord> {
        self.live.values()
    }

    pub fn total_size(&self) -> usize {
        self.live.values().map(|r| r.size()).sum()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Empty the index, yielding the records in allocation order.
    pub fn drain(&mut self) -> impl Iterator<Item = PathRecord> + '_ {
        self.live.drain(..).map(|(_, record)| record)
    }
}

/// One path-index entry. The first record seen for a fingerprint is
/// the bucket head; later records with the same fingerprint become
/// members in insertion order, whether or not their ip sequences
/// actually match the head's.
pub struct PathBucket {
    pub head: usize,
    pub members: Vec<usize>,
}

/// Fingerprint-keyed ordered map of buckets.
#[derive(Default)]
pub struct PathIndex {
    buckets: BTreeMap<u32, PathBucket>,
}

impl PathIndex {
    pub fn insert(&mut self, fingerprint: u32, ptr: usize) {
        self.buckets
            .entry(fingerprint)
            .and_modify(|bucket| bucket.members.push(ptr))
            .or_insert_with(|| PathBucket {
                head: ptr,
                members: Vec::new(),
            });
    }

    /// Detach `ptr` from its bucket. Freeing a head with members
    /// promotes the first member to head; the remaining membership is
    /// unchanged. Freeing the last record of a bucket removes the
    /// bucket.
    pub fn unlink(&mut self, fingerprint: u32, ptr: usize) {
        let Some(bucket) = self.buckets.get_mut(&fingerprint) else {
            debug_assert!(false, "record missing from path index");
            return;
        };
        if bucket.head == ptr {
            if bucket.members.is_empty() {
                self.buckets.remove(&fingerprint);
            } else {
                bucket.head = bucket.members.remove(0);
            }
        } else if let Some(at) = bucket.members.iter().position(|&p| p == ptr) {
            bucket.members.remove(at);
        } else {
            debug_assert!(false, "record missing from its bucket");
        }
    }

    /// The bucket ordered immediately before `fingerprint`. Used to
    /// name the most likely overflower when a canary trips.
    pub fn predecessor(&self, fingerprint: u32) -> Option<&PathBucket> {
        self.buckets
            .range(..fingerprint)
            .next_back()
            .map(|(_, bucket)| bucket)
    }

    pub fn get(&self, fingerprint: u32) -> Option<&PathBucket> {
        self.buckets.get(&fingerprint)
    }

    /// Buckets in ascending fingerprint order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &PathBucket)> {
        self.buckets.iter().map(|(fp, bucket)| (*fp, bucket))
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ptr: usize, size: usize) -> PathRecord {
        PathRecord::new(ptr, size, &[ptr])
    }

    #[test]
    fn chronology_survives_removal() {
        let mut live = AllocationIndex::default();
        live.insert(record(0x1, 10));
        live.insert(record(0x2, 20));
        live.insert(record(0x3, 30));
        live.remove(0x2);
        let order: Vec<usize> = live.records().map(|r| r.ptr()).collect();
        assert_eq!(order, vec![0x1, 0x3]);
        assert_eq!(live.total_size(), 40);
    }

    #[test]
    fn lookup_is_by_pointer() {
        let mut live = AllocationIndex::default();
        live.insert(record(0x10, 8));
        assert_eq!(live.get(0x10).map(|r| r.size()), Some(8));
        assert!(live.get(0x11).is_none());
        assert_eq!(live.remove(0x10).map(|r| r.ptr()), Some(0x10));
        assert!(live.is_empty());
    }

    #[test]
    fn drain_preserves_allocation_order() {
        let mut live = AllocationIndex::default();
        for ptr in [0x5, 0x3, 0x9] {
            live.insert(record(ptr, 1));
        }
        let order: Vec<usize> = live.drain().map(|r| r.ptr()).collect();
        assert_eq!(order, vec![0x5, 0x3, 0x9]);
        assert!(live.is_empty());
    }

    #[test]
    fn first_insert_becomes_head() {
        let mut paths = PathIndex::default();
        paths.insert(7, 0x1);
        paths.insert(7, 0x2);
        paths.insert(7, 0x3);
        let bucket = paths.get(7).unwrap();
        assert_eq!(bucket.head, 0x1);
        assert_eq!(bucket.members, vec![0x2, 0x3]);
        assert_eq!(paths.len(), 1);
    }

    #[test]
    fn freeing_the_head_promotes_the_next_member() {
        let mut paths = PathIndex::default();
        paths.insert(7, 0x1);
        paths.insert(7, 0x2);
        paths.insert(7, 0x3);
        paths.unlink(7, 0x1);
        let bucket = paths.get(7).unwrap();
        assert_eq!(bucket.head, 0x2);
        assert_eq!(bucket.members, vec![0x3]);
    }

    #[test]
    fn freeing_a_member_leaves_the_head_alone() {
        let mut paths = PathIndex::default();
        paths.insert(7, 0x1);
        paths.insert(7, 0x2);
        paths.insert(7, 0x3);
        paths.unlink(7, 0x2);
        let bucket = paths.get(7).unwrap();
        assert_eq!(bucket.head, 0x1);
        assert_eq!(bucket.members, vec![0x3]);
    }

    #[test]
    fn freeing_the_last_record_drops_the_bucket() {
        let mut paths = PathIndex::default();
        paths.insert(7, 0x1);
        paths.unlink(7, 0x1);
        assert!(paths.get(7).is_none());
        assert!(paths.is_empty());
    }

    #[test]
    fn iteration_is_in_fingerprint_order() {
        let mut paths = PathIndex::default();
        paths.insert(9, 0x1);
        paths.insert(3, 0x2);
        paths.insert(6, 0x3);
        let fps: Vec<u32> = paths.iter().map(|(fp, _)| fp).collect();
        assert_eq!(fps, vec![3, 6, 9]);
    }

    #[test]
    fn predecessor_is_the_previous_bucket_in_order() {
        let mut paths = PathIndex::default();
        paths.insert(3, 0x2);
        paths.insert(6, 0x3);
        paths.insert(9, 0x1);
        assert_eq!(paths.predecessor(9).map(|b| b.head), Some(0x3));
        assert_eq!(paths.predecessor(6).map(|b| b.head), Some(0x2));
        assert!(paths.predecessor(3).is_none());
    }
}
