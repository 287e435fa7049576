//! In-process store with Redis command semantics
//!
//! `MemoryStore` owns one keyspace shared by every [`MemoryConnection`]
//! handed out by [`MemoryStore::connect`]. It implements the subset of
//! Redis behavior the engine relies on:
//!
//! - strings, lists, hashes and sorted sets under one keyspace, with
//!   WRONGTYPE replies when a command hits a key of another type
//! - empty lists, hashes and sorted sets disappear, like in Redis
//! - a pipeline executes under one lock, so its commands are not interleaved
//!   with other connections
//!
//! # Fault injection
//!
//! [`MemoryStore::inject_failures`] makes the next `n` round trips fail with
//! `Error::Store`, which lets tests exercise the engine's recovery path.

use crate::command::{Command, Reply};
use crate::connection::Connection;
use crate::glob::glob_match;
use crate::zset::{normalize_range, SortedSet};
use parking_lot::RwLock;
use redmap_core::{Error, Result};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

/// One keyspace entry
#[derive(Debug, Clone)]
enum Entry {
    Str(Vec<u8>),
    List(VecDeque<Vec<u8>>),
    Hash(BTreeMap<Vec<u8>, Vec<u8>>),
    ZSet(SortedSet),
}

impl Entry {
    fn is_empty(&self) -> bool {
        match self {
            Entry::Str(_) => false,
            Entry::List(l) => l.is_empty(),
            Entry::Hash(h) => h.is_empty(),
            Entry::ZSet(z) => z.is_empty(),
        }
    }
}

type CmdResult = std::result::Result<Reply, Reply>;

fn wrong_type() -> Reply {
    Reply::Error(WRONGTYPE.to_string())
}

fn bulk_array<I: IntoIterator<Item = Vec<u8>>>(items: I) -> Reply {
    Reply::Array(items.into_iter().map(Reply::Bulk).collect())
}

fn member_array(members: Vec<String>) -> Reply {
    bulk_array(members.into_iter().map(String::into_bytes))
}

#[derive(Debug, Default)]
struct Keyspace {
    entries: FxHashMap<String, Entry>,
}

macro_rules! typed {
    ($fn_ref:ident, $fn_mut:ident, $variant:ident, $ty:ty) => {
        fn $fn_ref(&self, key: &str) -> std::result::Result<Option<&$ty>, Reply> {
            match self.entries.get(key) {
                None => Ok(None),
                Some(Entry::$variant(v)) => Ok(Some(v)),
                Some(_) => Err(wrong_type()),
            }
        }

        fn $fn_mut(&mut self, key: &str) -> std::result::Result<&mut $ty, Reply> {
            let entry = self
                .entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::$variant(Default::default()));
            match entry {
                Entry::$variant(v) => Ok(v),
                _ => Err(wrong_type()),
            }
        }
    };
}

impl Keyspace {
    typed!(list, list_mut, List, VecDeque<Vec<u8>>);
    typed!(hash, hash_mut, Hash, BTreeMap<Vec<u8>, Vec<u8>>);
    typed!(zset, zset_mut, ZSet, SortedSet);

    /// Drop `key` if a command left it empty
    fn prune(&mut self, key: &str) {
        if self.entries.get(key).map(Entry::is_empty).unwrap_or(false) {
            self.entries.remove(key);
        }
    }

    fn apply(&mut self, command: Command) -> Reply {
        let key = match &command {
            Command::Del { .. } | Command::Keys { .. } => None,
            Command::Get { key }
            | Command::Set { key, .. }
            | Command::SetNx { key, .. }
            | Command::Exists { key }
            | Command::Incr { key }
            | Command::RPush { key, .. }
            | Command::LRange { key, .. }
            | Command::HSet { key, .. }
            | Command::HGet { key, .. }
            | Command::HGetAll { key }
            | Command::HDel { key, .. }
            | Command::ZAdd { key, .. }
            | Command::ZRem { key, .. }
            | Command::ZRange { key, .. }
            | Command::ZRangeByScore { key, .. }
            | Command::ZRank { key, .. }
            | Command::ZScore { key, .. }
            | Command::ZCard { key }
            | Command::ZRemRangeByRank { key, .. } => Some(key.clone()),
        };
        let reply = self.dispatch(command).unwrap_or_else(|err| err);
        if let Some(key) = key {
            self.prune(&key);
        }
        reply
    }

    fn dispatch(&mut self, command: Command) -> CmdResult {
        match command {
            Command::Get { key } => match self.entries.get(&key) {
                None => Ok(Reply::Nil),
                Some(Entry::Str(v)) => Ok(Reply::Bulk(v.clone())),
                Some(_) => Err(wrong_type()),
            },
            Command::Set { key, value } => {
                self.entries.insert(key, Entry::Str(value));
                Ok(Reply::ok())
            }
            Command::SetNx { key, value } => {
                if self.entries.contains_key(&key) {
                    Ok(Reply::Integer(0))
                } else {
                    self.entries.insert(key, Entry::Str(value));
                    Ok(Reply::Integer(1))
                }
            }
            Command::Exists { key } => Ok(Reply::Integer(self.entries.contains_key(&key) as i64)),
            Command::Del { keys } => {
                let removed = keys
                    .iter()
                    .filter(|k| self.entries.remove(k.as_str()).is_some())
                    .count();
                Ok(Reply::Integer(removed as i64))
            }
            Command::Incr { key } => {
                let current = match self.entries.get(&key) {
                    None => 0,
                    Some(Entry::Str(v)) => std::str::from_utf8(v)
                        .ok()
                        .and_then(|s| s.parse::<i64>().ok())
                        .ok_or_else(|| {
                            Reply::Error("ERR value is not an integer or out of range".into())
                        })?,
                    Some(_) => return Err(wrong_type()),
                };
                let next = current
                    .checked_add(1)
                    .ok_or_else(|| Reply::Error("ERR increment would overflow".into()))?;
                self.entries
                    .insert(key, Entry::Str(next.to_string().into_bytes()));
                Ok(Reply::Integer(next))
            }
            Command::Keys { pattern } => {
                let mut keys: Vec<&String> = self
                    .entries
                    .keys()
                    .filter(|k| glob_match(&pattern, k))
                    .collect();
                keys.sort();
                Ok(bulk_array(keys.into_iter().map(|k| k.clone().into_bytes())))
            }
            Command::RPush { key, values } => {
                if values.is_empty() {
                    return Ok(Reply::Integer(self.list(&key)?.map_or(0, |l| l.len()) as i64));
                }
                let list = self.list_mut(&key)?;
                list.extend(values);
                Ok(Reply::Integer(list.len() as i64))
            }
            Command::LRange { key, start, stop } => {
                let Some(list) = self.list(&key)? else {
                    return Ok(Reply::Array(Vec::new()));
                };
                Ok(match normalize_range(start, stop, list.len()) {
                    Some((s, e)) => bulk_array(list.range(s..=e).cloned()),
                    None => Reply::Array(Vec::new()),
                })
            }
            Command::HSet { key, fields } => {
                if fields.is_empty() {
                    return Ok(Reply::Integer(0));
                }
                let hash = self.hash_mut(&key)?;
                let added = fields
                    .into_iter()
                    .filter(|(f, v)| hash.insert(f.clone(), v.clone()).is_none())
                    .count();
                Ok(Reply::Integer(added as i64))
            }
            Command::HGet { key, field } => Ok(self
                .hash(&key)?
                .and_then(|h| h.get(&field))
                .map_or(Reply::Nil, |v| Reply::Bulk(v.clone()))),
            Command::HGetAll { key } => {
                let Some(hash) = self.hash(&key)? else {
                    return Ok(Reply::Array(Vec::new()));
                };
                Ok(bulk_array(
                    hash.iter().flat_map(|(f, v)| [f.clone(), v.clone()]),
                ))
            }
            Command::HDel { key, fields } => {
                if self.hash(&key)?.is_none() {
                    return Ok(Reply::Integer(0));
                }
                let hash = self.hash_mut(&key)?;
                let removed = fields.iter().filter(|f| hash.remove(*f).is_some()).count();
                Ok(Reply::Integer(removed as i64))
            }
            Command::ZAdd {
                key,
                score,
                member,
                nx,
            } => {
                if score.is_nan() {
                    return Err(Reply::Error("ERR value is not a valid float".into()));
                }
                let added = self.zset_mut(&key)?.insert(&member, score, nx);
                Ok(Reply::Integer(added as i64))
            }
            Command::ZRem { key, member } => {
                if self.zset(&key)?.is_none() {
                    return Ok(Reply::Integer(0));
                }
                Ok(Reply::Integer(self.zset_mut(&key)?.remove(&member) as i64))
            }
            Command::ZRange {
                key,
                start,
                stop,
                rev,
            } => Ok(member_array(
                self.zset(&key)?
                    .map(|z| z.range_by_rank(start, stop, rev))
                    .unwrap_or_default(),
            )),
            Command::ZRangeByScore { key, min, max, rev } => Ok(member_array(
                self.zset(&key)?
                    .map(|z| z.range_by_score(min, max, rev))
                    .unwrap_or_default(),
            )),
            Command::ZRank { key, member, rev } => Ok(self
                .zset(&key)?
                .and_then(|z| z.rank(&member, rev))
                .map_or(Reply::Nil, |r| Reply::Integer(r as i64))),
            Command::ZScore { key, member } => Ok(self
                .zset(&key)?
                .and_then(|z| z.score(&member))
                .map_or(Reply::Nil, |s| Reply::Bulk(s.to_string().into_bytes()))),
            Command::ZCard { key } => Ok(Reply::Integer(
                self.zset(&key)?.map_or(0, |z| z.len()) as i64,
            )),
            Command::ZRemRangeByRank { key, start, stop } => {
                if self.zset(&key)?.is_none() {
                    return Ok(Reply::Integer(0));
                }
                let removed = self.zset_mut(&key)?.remove_range_by_rank(start, stop);
                Ok(Reply::Integer(removed as i64))
            }
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    keyspace: RwLock<Keyspace>,
    failures: AtomicUsize,
    round_trips: AtomicU64,
}

impl Shared {
    fn take_failure(&self) -> Result<()> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            debug!(target: "redmap::store", "injected store failure");
            return Err(Error::store("injected failure"));
        }
        Ok(())
    }
}

/// In-process key-value store
///
/// Cloning shares the keyspace.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection to this store
    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Fail the next `n` round trips with `Error::Store`
    pub fn inject_failures(&self, n: usize) {
        self.shared.failures.store(n, Ordering::SeqCst);
    }

    /// Number of round trips served so far (a pipeline counts once)
    pub fn round_trips(&self) -> u64 {
        self.shared.round_trips.load(Ordering::Relaxed)
    }

    /// Every key currently stored, sorted
    pub fn keys(&self) -> Vec<String> {
        let keyspace = self.shared.keyspace.read();
        let mut keys: Vec<String> = keyspace.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Whether `key` exists
    pub fn contains_key(&self, key: &str) -> bool {
        self.shared.keyspace.read().entries.contains_key(key)
    }

    /// Remove every key
    pub fn flush_all(&self) {
        self.shared.keyspace.write().entries.clear();
    }
}

/// Connection to a [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    shared: Arc<Shared>,
}

impl Connection for MemoryConnection {
    fn execute(&mut self, command: Command) -> Result<Reply> {
        self.shared.take_failure()?;
        self.shared.round_trips.fetch_add(1, Ordering::Relaxed);
        trace!(target: "redmap::store", command = command.name(), "execute");
        Ok(self.shared.keyspace.write().apply(command))
    }

    fn execute_pipeline(&mut self, commands: Vec<Command>) -> Result<Vec<Reply>> {
        self.shared.take_failure()?;
        self.shared.round_trips.fetch_add(1, Ordering::Relaxed);
        let mut keyspace = self.shared.keyspace.write();
        Ok(commands.into_iter().map(|c| keyspace.apply(c)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::Bound;

    fn conn() -> (MemoryStore, MemoryConnection) {
        let store = MemoryStore::new();
        let conn = store.connect();
        (store, conn)
    }

    fn run(conn: &mut MemoryConnection, command: Command) -> Reply {
        conn.execute(command).unwrap()
    }

    #[test]
    fn test_strings_and_setnx() {
        let (_, mut c) = conn();
        let set = |v: &str| Command::SetNx {
            key: "u".into(),
            value: v.as_bytes().to_vec(),
        };
        assert_eq!(run(&mut c, set("1")), Reply::Integer(1));
        assert_eq!(run(&mut c, set("2")), Reply::Integer(0));
        assert_eq!(
            run(&mut c, Command::Get { key: "u".into() }),
            Reply::Bulk(b"1".to_vec())
        );
        assert_eq!(
            run(&mut c, Command::Del { keys: vec!["u".into(), "x".into()] }),
            Reply::Integer(1)
        );
        assert_eq!(run(&mut c, Command::Get { key: "u".into() }), Reply::Nil);
    }

    #[test]
    fn test_incr() {
        let (_, mut c) = conn();
        assert_eq!(run(&mut c, Command::Incr { key: "n".into() }), Reply::Integer(1));
        assert_eq!(run(&mut c, Command::Incr { key: "n".into() }), Reply::Integer(2));
        run(
            &mut c,
            Command::Set {
                key: "s".into(),
                value: b"abc".to_vec(),
            },
        );
        assert!(matches!(
            run(&mut c, Command::Incr { key: "s".into() }),
            Reply::Error(_)
        ));
    }

    #[test]
    fn test_lists() {
        let (store, mut c) = conn();
        run(
            &mut c,
            Command::RPush {
                key: "l".into(),
                values: vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()],
            },
        );
        let all = run(
            &mut c,
            Command::LRange {
                key: "l".into(),
                start: 0,
                stop: -1,
            },
        );
        assert_eq!(all.into_bytes_array().unwrap().len(), 3);
        let tail = run(
            &mut c,
            Command::LRange {
                key: "l".into(),
                start: -2,
                stop: -1,
            },
        );
        assert_eq!(
            tail.into_bytes_array().unwrap(),
            vec![b"b".to_vec(), b"c".to_vec()]
        );
        run(
            &mut c,
            Command::RPush {
                key: "empty".into(),
                values: vec![],
            },
        );
        assert!(!store.contains_key("empty"));
    }

    #[test]
    fn test_hashes_disappear_when_empty() {
        let (store, mut c) = conn();
        run(
            &mut c,
            Command::HSet {
                key: "h".into(),
                fields: vec![(b"f".to_vec(), b"1".to_vec())],
            },
        );
        assert_eq!(
            run(
                &mut c,
                Command::HGet {
                    key: "h".into(),
                    field: b"f".to_vec()
                }
            ),
            Reply::Bulk(b"1".to_vec())
        );
        run(
            &mut c,
            Command::HDel {
                key: "h".into(),
                fields: vec![b"f".to_vec()],
            },
        );
        assert!(!store.contains_key("h"));
    }

    #[test]
    fn test_wrong_type() {
        let (_, mut c) = conn();
        run(
            &mut c,
            Command::Set {
                key: "k".into(),
                value: b"v".to_vec(),
            },
        );
        let reply = run(
            &mut c,
            Command::HGetAll { key: "k".into() },
        );
        assert!(matches!(reply, Reply::Error(msg) if msg.starts_with("WRONGTYPE")));
    }

    #[test]
    fn test_sorted_set_commands() {
        let (store, mut c) = conn();
        for (m, s) in [("a", 1.0), ("b", 2.0), ("c", 3.0)] {
            run(
                &mut c,
                Command::ZAdd {
                    key: "z".into(),
                    score: s,
                    member: m.into(),
                    nx: false,
                },
            );
        }
        let rev = run(
            &mut c,
            Command::ZRange {
                key: "z".into(),
                start: 0,
                stop: 0,
                rev: true,
            },
        );
        assert_eq!(rev.into_string_array().unwrap(), vec!["c"]);
        let by_score = run(
            &mut c,
            Command::ZRangeByScore {
                key: "z".into(),
                min: Bound::Included(2.0),
                max: Bound::Unbounded,
                rev: false,
            },
        );
        assert_eq!(by_score.into_string_array().unwrap(), vec!["b", "c"]);
        assert_eq!(
            run(
                &mut c,
                Command::ZScore {
                    key: "z".into(),
                    member: "b".into()
                }
            )
            .into_score()
            .unwrap(),
            Some(2.0)
        );
        assert_eq!(
            run(
                &mut c,
                Command::ZRank {
                    key: "z".into(),
                    member: "zz".into(),
                    rev: false
                }
            ),
            Reply::Nil
        );
        assert_eq!(
            run(
                &mut c,
                Command::ZRemRangeByRank {
                    key: "z".into(),
                    start: 0,
                    stop: -1
                }
            ),
            Reply::Integer(3)
        );
        assert!(!store.contains_key("z"));
    }

    #[test]
    fn test_nan_score_rejected() {
        let (_, mut c) = conn();
        let reply = run(
            &mut c,
            Command::ZAdd {
                key: "z".into(),
                score: f64::NAN,
                member: "a".into(),
                nx: false,
            },
        );
        assert!(matches!(reply, Reply::Error(_)));
    }

    #[test]
    fn test_keys_pattern() {
        let (_, mut c) = conn();
        for k in ["te:1:__all__", "te:__all_ids__", "other:1"] {
            run(
                &mut c,
                Command::Set {
                    key: k.into(),
                    value: b"x".to_vec(),
                },
            );
        }
        let keys = run(&mut c, Command::Keys { pattern: "te:*".into() })
            .into_string_array()
            .unwrap();
        assert_eq!(keys, vec!["te:1:__all__", "te:__all_ids__"]);
    }

    #[test]
    fn test_injected_failures_and_round_trips() {
        let (store, mut c) = conn();
        store.inject_failures(1);
        assert!(c.execute(Command::Exists { key: "k".into() }).is_err());
        assert!(c.execute(Command::Exists { key: "k".into() }).is_ok());
        c.execute_pipeline(vec![
            Command::Incr { key: "a".into() },
            Command::Incr { key: "b".into() },
        ])
        .unwrap();
        assert_eq!(store.round_trips(), 2);
    }
}
