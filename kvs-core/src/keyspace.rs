//! The keyspace engine: a dict with lazy plus active expiration, and the
//! set type it stores alongside plain string values.
//!
//! Mirrors `oxidart`'s split between the value store and a disjoint
//! expiry index (there, a slab-indexed radix tree; here, a plain
//! `HashMap` since the spec calls for a dict, not a prefix tree), and its
//! `evict_expired` sample-and-threshold sweep, generalized from random
//! slab sampling to a sequential pass over the expiry index.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;

use crate::set::Set;

/// Visit up to this many expiring keys per sampling batch.
pub const SAMPLE_SIZE: usize = 20;
/// A batch is "mostly stale" when at least this fraction of it was expired.
pub const ACCEPTED_EXPIRED_PROPORTION: f64 = 0.10;
/// A single sweep call never runs longer than this, regardless of progress.
pub const TIME_LIMIT_MS: u64 = 500;

/// A value held at a dict key. Commands that expect the other variant are
/// out of scope here (spec: "out of scope... core defines only the
/// observed single-type-per-command behavior").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueObject {
    StringValue(Bytes),
    SetValue(Set),
}

/// A mapping from key to [`ValueObject`], paired with a disjoint mapping
/// from key to absolute-epoch-ms expiry. `0` (absent from the expiry map)
/// means "no expiration".
#[derive(Debug, Default)]
pub struct Keyspace {
    values: HashMap<Bytes, ValueObject>,
    expiry: HashMap<Bytes, u64>,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` iff `key` has a recorded expiry strictly before `now_ms`.
    pub fn has_expired(&self, key: &[u8], now_ms: u64) -> bool {
        self.expiry.get(key).is_some_and(|&exp| exp < now_ms)
    }

    fn expire_if_due(&mut self, key: &[u8], now_ms: u64) {
        if self.has_expired(key, now_ms) {
            self.delete(key);
        }
    }

    /// Removes `key` from both maps. Returns whether the value map
    /// contained it.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        self.expiry.remove(key);
        self.values.remove(key).is_some()
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.values.contains_key(key)
    }

    /// Deletes `key`, first applying lazy expiration. An already-expired
    /// key is logically absent and does not count as removed.
    pub fn delete_live(&mut self, key: &[u8], now_ms: u64) -> bool {
        self.expire_if_due(key, now_ms);
        self.delete(key)
    }

    /// Looks up the expiry map only, without touching lazy expiration.
    pub fn expiry_of(&self, key: &[u8]) -> Option<u64> {
        self.expiry.get(key).copied()
    }

    pub fn get_string(&mut self, key: &[u8], now_ms: u64) -> Option<Bytes> {
        self.expire_if_due(key, now_ms);
        match self.values.get(key) {
            Some(ValueObject::StringValue(v)) => Some(v.clone()),
            _ => None,
        }
    }

    /// Overwrites the value at `key`. `expiry_ms == 0` clears any existing
    /// expiry; otherwise it replaces it.
    pub fn set_string(&mut self, key: Bytes, value: Bytes, expiry_ms: u64) {
        self.values.insert(key.clone(), ValueObject::StringValue(value));
        if expiry_ms > 0 {
            self.expiry.insert(key, expiry_ms);
        } else {
            self.expiry.remove(&key);
        }
    }

    pub fn ttl(&mut self, key: &[u8], now_ms: u64) -> TtlStatus {
        self.expire_if_due(key, now_ms);
        if !self.contains_key(key) {
            return TtlStatus::Missing;
        }
        match self.expiry_of(key) {
            None => TtlStatus::NoExpiry,
            Some(exp) => TtlStatus::ExpiresIn((exp - now_ms) / 1000),
        }
    }

    pub fn sadd(&mut self, key: &Bytes, members: &[Bytes], now_ms: u64) -> usize {
        self.expire_if_due(key, now_ms);
        let entry = self
            .values
            .entry(key.clone())
            .or_insert_with(|| ValueObject::SetValue(Set::new()));
        let ValueObject::SetValue(set) = entry else {
            return 0;
        };
        set.add(members.iter().cloned())
    }

    pub fn srem(&mut self, key: &[u8], members: &[Bytes], now_ms: u64) -> usize {
        self.expire_if_due(key, now_ms);
        let Some(ValueObject::SetValue(set)) = self.values.get_mut(key) else {
            return 0;
        };
        let removed = set.remove(members);
        if set.is_empty() {
            self.delete(key);
        }
        removed
    }

    pub fn smembers(&mut self, key: &[u8], now_ms: u64) -> Vec<Bytes> {
        self.expire_if_due(key, now_ms);
        match self.values.get(key) {
            Some(ValueObject::SetValue(set)) => set.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn scard(&mut self, key: &[u8], now_ms: u64) -> usize {
        self.expire_if_due(key, now_ms);
        match self.values.get(key) {
            Some(ValueObject::SetValue(set)) => set.len(),
            _ => 0,
        }
    }

    pub fn smismember(&mut self, key: &[u8], members: &[Bytes], now_ms: u64) -> Vec<bool> {
        self.expire_if_due(key, now_ms);
        match self.values.get(key) {
            Some(ValueObject::SetValue(set)) => {
                members.iter().map(|m| set.contains(m)).collect()
            }
            _ => vec![false; members.len()],
        }
    }

    /// Empty result if any named set is missing. Otherwise scans the
    /// smallest set and tests each member against every other, returning
    /// members in the smallest set's iteration order.
    pub fn sinter(&mut self, keys: &[Bytes], now_ms: u64) -> Vec<Bytes> {
        for key in keys {
            self.expire_if_due(key, now_ms);
        }
        let mut sets = Vec::with_capacity(keys.len());
        for key in keys {
            match self.values.get(&key[..]) {
                Some(ValueObject::SetValue(set)) => sets.push(set),
                _ => return Vec::new(),
            }
        }
        let Some(smallest_idx) = sets
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.len())
            .map(|(i, _)| i)
        else {
            return Vec::new();
        };
        sets[smallest_idx]
            .iter()
            .filter(|member| {
                sets.iter()
                    .enumerate()
                    .all(|(i, s)| i == smallest_idx || s.contains(member))
            })
            .cloned()
            .collect()
    }

    /// Active expiration: sample batches of [`SAMPLE_SIZE`] expiring keys,
    /// deleting any that have passed. Stops a batch's streak early once
    /// fewer than [`ACCEPTED_EXPIRED_PROPORTION`] of a batch was expired,
    /// or once [`TIME_LIMIT_MS`] of wall time has elapsed. The deleted/total
    /// counters reset after every batch — the stop decision only ever looks
    /// at the most recent batch, not the cumulative rate, matching the
    /// source sweep's reset cadence (computed here in floating point, not
    /// the source's suspected integer-truncation bug).
    ///
    /// Pacing (how often the caller invokes this) is the event loop's
    /// concern, not this method's.
    pub fn active_expire_cycle(&mut self, now_ms: u64) -> usize {
        let started = Instant::now();
        let keys: Vec<Bytes> = self.expiry.keys().cloned().collect();

        let mut total_deleted = 0;
        let mut total = 0usize;
        let mut deleted = 0usize;

        for key in keys {
            if started.elapsed().as_millis() as u64 > TIME_LIMIT_MS {
                break;
            }

            total += 1;
            if self.has_expired(&key, now_ms) {
                self.delete(&key);
                deleted += 1;
                total_deleted += 1;
            }

            if total == SAMPLE_SIZE {
                let ratio = deleted as f64 / total as f64;
                if ratio < ACCEPTED_EXPIRED_PROPORTION {
                    break;
                }
                total = 0;
                deleted = 0;
            }
        }

        total_deleted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStatus {
    Missing,
    NoExpiry,
    ExpiresIn(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_returns_the_value() {
        let mut ks = Keyspace::new();
        ks.set_string(Bytes::from_static(b"k"), Bytes::from_static(b"v"), 0);
        assert_eq!(ks.get_string(b"k", 1000), Some(Bytes::from_static(b"v")));
    }

    #[test]
    fn del_is_one_then_zero() {
        let mut ks = Keyspace::new();
        ks.set_string(Bytes::from_static(b"k"), Bytes::from_static(b"v"), 0);
        assert!(ks.delete(b"k"));
        assert!(!ks.delete(b"k"));
    }

    #[test]
    fn delete_live_treats_an_expired_key_as_already_absent() {
        let mut ks = Keyspace::new();
        ks.set_string(Bytes::from_static(b"k"), Bytes::from_static(b"v"), 1_000);
        assert!(!ks.delete_live(b"k", 5_000));
    }

    #[test]
    fn lazy_expiration_on_get_and_ttl() {
        let mut ks = Keyspace::new();
        ks.set_string(Bytes::from_static(b"k"), Bytes::from_static(b"v"), 1_000);
        assert_eq!(ks.get_string(b"k", 500), Some(Bytes::from_static(b"v")));
        assert_eq!(ks.get_string(b"k", 2_000), None);
        assert!(!ks.contains_key(b"k"));
    }

    #[test]
    fn ttl_reports_missing_no_expiry_and_remaining_seconds() {
        let mut ks = Keyspace::new();
        assert_eq!(ks.ttl(b"missing", 0), TtlStatus::Missing);

        ks.set_string(Bytes::from_static(b"a"), Bytes::from_static(b"v"), 0);
        assert_eq!(ks.ttl(b"a", 0), TtlStatus::NoExpiry);

        ks.set_string(Bytes::from_static(b"b"), Bytes::from_static(b"v"), 60_000);
        assert_eq!(ks.ttl(b"b", 0), TtlStatus::ExpiresIn(60));

        ks.set_string(Bytes::from_static(b"c"), Bytes::from_static(b"v"), 1_000);
        assert_eq!(ks.ttl(b"c", 5_000), TtlStatus::Missing);
        assert!(!ks.contains_key(b"c"));
    }

    #[test]
    fn sadd_and_srem_count_changed_members_only() {
        let mut ks = Keyspace::new();
        let key = Bytes::from_static(b"s");
        let added = ks.sadd(
            &key,
            &[Bytes::from_static(b"a"), Bytes::from_static(b"b"), Bytes::from_static(b"c")],
            0,
        );
        assert_eq!(added, 3);
        let added_again = ks.sadd(&key, &[Bytes::from_static(b"c"), Bytes::from_static(b"d")], 0);
        assert_eq!(added_again, 1);
        assert_eq!(ks.scard(b"s", 0), 4);

        let removed = ks.srem(b"s", &[Bytes::from_static(b"a"), Bytes::from_static(b"z")], 0);
        assert_eq!(removed, 1);
        assert_eq!(ks.scard(b"s", 0), 3);
    }

    #[test]
    fn srem_deletes_key_once_set_becomes_empty() {
        let mut ks = Keyspace::new();
        let key = Bytes::from_static(b"s");
        ks.sadd(&key, &[Bytes::from_static(b"a")], 0);
        ks.srem(b"s", &[Bytes::from_static(b"a")], 0);
        assert!(!ks.contains_key(b"s"));
    }

    #[test]
    fn smismember_reports_membership_per_key_or_all_false_when_missing() {
        let mut ks = Keyspace::new();
        let key = Bytes::from_static(b"s");
        ks.sadd(&key, &[Bytes::from_static(b"a")], 0);
        assert_eq!(
            ks.smismember(b"s", &[Bytes::from_static(b"a"), Bytes::from_static(b"z")], 0),
            vec![true, false]
        );
        assert_eq!(
            ks.smismember(b"missing", &[Bytes::from_static(b"a")], 0),
            vec![false]
        );
    }

    #[test]
    fn sinter_scans_smallest_set_and_empty_on_missing_set() {
        let mut ks = Keyspace::new();
        ks.sadd(
            &Bytes::from_static(b"s1"),
            &[
                Bytes::from_static(b"a"),
                Bytes::from_static(b"b"),
                Bytes::from_static(b"c"),
                Bytes::from_static(b"d"),
            ],
            0,
        );
        ks.sadd(
            &Bytes::from_static(b"s2"),
            &[
                Bytes::from_static(b"b"),
                Bytes::from_static(b"c"),
                Bytes::from_static(b"d"),
                Bytes::from_static(b"e"),
            ],
            0,
        );
        ks.sadd(
            &Bytes::from_static(b"s3"),
            &[
                Bytes::from_static(b"c"),
                Bytes::from_static(b"d"),
                Bytes::from_static(b"e"),
                Bytes::from_static(b"f"),
            ],
            0,
        );

        let mut result = ks.sinter(
            &[
                Bytes::from_static(b"s1"),
                Bytes::from_static(b"s2"),
                Bytes::from_static(b"s3"),
            ],
            0,
        );
        result.sort();
        assert_eq!(result, vec![Bytes::from_static(b"c"), Bytes::from_static(b"d")]);

        assert!(ks
            .sinter(&[Bytes::from_static(b"s1"), Bytes::from_static(b"missing")], 0)
            .is_empty());
    }

    #[test]
    fn active_expire_cycle_deletes_past_keys_and_leaves_future_ones() {
        let mut ks = Keyspace::new();
        for i in 0..30 {
            ks.set_string(
                Bytes::from(format!("expired:{i}")),
                Bytes::from_static(b"v"),
                500,
            );
        }
        for i in 0..5 {
            ks.set_string(
                Bytes::from(format!("future:{i}")),
                Bytes::from_static(b"v"),
                10_000,
            );
        }

        let deleted = ks.active_expire_cycle(1_000);
        assert_eq!(deleted, 30);
        for i in 0..30 {
            assert!(!ks.contains_key(format!("expired:{i}").as_bytes()));
        }
        for i in 0..5 {
            assert!(ks.contains_key(format!("future:{i}").as_bytes()));
        }
    }

    #[test]
    fn active_expire_cycle_stops_early_when_batch_is_mostly_fresh() {
        let mut ks = Keyspace::new();
        // 1 expired key among 20 (5%) should stop the sweep after one batch.
        ks.set_string(Bytes::from_static(b"stale"), Bytes::from_static(b"v"), 500);
        for i in 0..19 {
            ks.set_string(
                Bytes::from(format!("fresh:{i}")),
                Bytes::from_static(b"v"),
                10_000,
            );
        }
        let deleted = ks.active_expire_cycle(1_000);
        assert_eq!(deleted, 1);
    }
}
