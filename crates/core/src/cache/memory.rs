//! In-process reference implementation of [`CacheStore`].
//!
//! Mirrors the Redis semantics the core depends on: lazy TTL expiry, sets that
//! vanish when emptied, glob-pattern SCAN with cursors, and scripts applied
//! under a single lock so they are indivisible.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::store::{AtomicScript, CacheStore, PAYLOAD_CHANGED, ScanPage, StoreOp, StoreReply};
use crate::Error;

/// Open cursors kept before the oldest is evicted. An evicted cursor resumes
/// as an invalid-cursor error, and the caller restarts from 0.
const MAX_OPEN_CURSORS: usize = 1024;

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Default)]
struct Keyspace {
    slots: BTreeMap<String, Slot>,
    /// Open scan cursors, each resuming after the last key it returned.
    cursors: BTreeMap<u64, String>,
    next_cursor: u64,
}

impl Keyspace {
    fn open_cursor(&mut self, last: String) -> u64 {
        while self.cursors.len() >= MAX_OPEN_CURSORS {
            self.cursors.pop_first();
        }
        self.next_cursor += 1;
        self.cursors.insert(self.next_cursor, last);
        self.next_cursor
    }

    fn sweep(&mut self) {
        let now = Instant::now();
        self.slots.retain(|_, slot| slot.is_live(now));
    }

    fn set(&mut self, key: &str, value: &[u8], ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.slots.insert(key.to_string(), Slot { value: Value::Bytes(value.to_vec()), expires_at });
    }

    fn delete(&mut self, keys: &[String]) -> u64 {
        keys.iter().filter(|key| self.slots.remove(key.as_str()).is_some()).count() as u64
    }

    fn set_add(&mut self, key: &str, members: &[String]) -> Result<u64, Error> {
        let slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Slot { value: Value::Set(BTreeSet::new()), expires_at: None });
        match &mut slot.value {
            Value::Set(set) => Ok(members.iter().filter(|m| set.insert((*m).clone())).count() as u64),
            Value::Bytes(_) => Err(wrong_type(key)),
        }
    }

    fn set_remove(&mut self, key: &str, members: &[String]) -> Result<u64, Error> {
        let Some(slot) = self.slots.get_mut(key) else {
            return Ok(0);
        };
        let (removed, now_empty) = match &mut slot.value {
            Value::Set(set) => {
                let removed = members.iter().filter(|m| set.remove(m.as_str())).count() as u64;
                (removed, set.is_empty())
            }
            Value::Bytes(_) => return Err(wrong_type(key)),
        };
        if now_empty {
            self.slots.remove(key);
        }
        Ok(removed)
    }
}

fn wrong_type(key: &str) -> Error {
    Error::Command(format!("WRONGTYPE operation against key {key} holding the wrong kind of value"))
}

/// In-memory [`CacheStore`] for tests and single-process use.
#[derive(Debug, Default)]
pub struct MemoryStore {
    keyspace: Mutex<Keyspace>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with a connection error until reset.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Drop `key` the way natural TTL expiry would, leaving index sets untouched.
    pub async fn expire_now(&self, key: &str) {
        self.keyspace.lock().await.slots.remove(key);
    }

    pub async fn contains(&self, key: &str) -> bool {
        let mut keyspace = self.keyspace.lock().await;
        keyspace.sweep();
        keyspace.slots.contains_key(key)
    }

    /// Remaining time to live, `None` for missing or non-expiring keys.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let keyspace = self.keyspace.lock().await;
        keyspace
            .slots
            .get(key)
            .and_then(|slot| slot.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// All live keys in lexicographic order.
    pub async fn keys(&self) -> Vec<String> {
        let mut keyspace = self.keyspace.lock().await;
        keyspace.sweep();
        keyspace.slots.keys().cloned().collect()
    }

    fn check_online(&self) -> Result<(), Error> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Connection("memory store is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        self.check_online()?;
        let mut keyspace = self.keyspace.lock().await;
        keyspace.sweep();
        match keyspace.slots.get(key).map(|slot| &slot.value) {
            Some(Value::Bytes(bytes)) => Ok(Some(bytes.clone())),
            Some(Value::Set(_)) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), Error> {
        self.check_online()?;
        self.keyspace.lock().await.set(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, Error> {
        self.check_online()?;
        let mut keyspace = self.keyspace.lock().await;
        keyspace.sweep();
        Ok(keyspace.delete(keys))
    }

    async fn set_add(&self, set_key: &str, members: &[String]) -> Result<u64, Error> {
        self.check_online()?;
        let mut keyspace = self.keyspace.lock().await;
        keyspace.sweep();
        keyspace.set_add(set_key, members)
    }

    async fn set_members(&self, set_key: &str) -> Result<Vec<String>, Error> {
        self.check_online()?;
        let mut keyspace = self.keyspace.lock().await;
        keyspace.sweep();
        match keyspace.slots.get(set_key).map(|slot| &slot.value) {
            Some(Value::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(Value::Bytes(_)) => Err(wrong_type(set_key)),
            None => Ok(Vec::new()),
        }
    }

    async fn set_remove(&self, set_key: &str, members: &[String]) -> Result<u64, Error> {
        self.check_online()?;
        let mut keyspace = self.keyspace.lock().await;
        keyspace.sweep();
        keyspace.set_remove(set_key, members)
    }

    async fn increment(&self, key: &str) -> Result<i64, Error> {
        self.check_online()?;
        let mut keyspace = self.keyspace.lock().await;
        keyspace.sweep();
        let current = match keyspace.slots.get(key).map(|slot| &slot.value) {
            Some(Value::Bytes(bytes)) => std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| Error::Command("value is not an integer or out of range".into()))?,
            Some(Value::Set(_)) => return Err(wrong_type(key)),
            None => 0,
        };
        let next = current + 1;
        let expires_at = keyspace.slots.get(key).and_then(|slot| slot.expires_at);
        keyspace
            .slots
            .insert(key.to_string(), Slot { value: Value::Bytes(next.to_string().into_bytes()), expires_at });
        Ok(next)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage, Error> {
        self.check_online()?;
        let mut keyspace = self.keyspace.lock().await;
        keyspace.sweep();
        let step = count.max(1);

        let mut window: Vec<String> = if cursor == 0 {
            keyspace.slots.keys().take(step + 1).cloned().collect()
        } else {
            let last = keyspace
                .cursors
                .remove(&cursor)
                .ok_or_else(|| Error::Command(format!("invalid cursor {cursor}")))?;
            keyspace
                .slots
                .range::<str, _>((Bound::Excluded(last.as_str()), Bound::Unbounded))
                .take(step + 1)
                .map(|(key, _)| key.clone())
                .collect()
        };

        let has_more = window.len() > step;
        window.truncate(step);

        let next = match window.last() {
            Some(last) if has_more => keyspace.open_cursor(last.clone()),
            _ => 0,
        };

        let keys = window.into_iter().filter(|key| glob_match(pattern, key)).collect();
        Ok(ScanPage { cursor: next, keys })
    }

    async fn run_atomic_script(&self, script: AtomicScript, keys: &[String], args: &[Vec<u8>]) -> Result<i64, Error> {
        self.check_online()?;
        let mut keyspace = self.keyspace.lock().await;
        keyspace.sweep();
        match script {
            AtomicScript::DeleteWithIndexes => {
                let (query_key, index_keys) = keys
                    .split_first()
                    .ok_or_else(|| Error::Command("script expects at least one key".into()))?;
                let expected = args
                    .first()
                    .ok_or_else(|| Error::Command("script expects the observed payload argument".into()))?;
                let unchanged = match keyspace.slots.get(query_key.as_str()).map(|slot| &slot.value) {
                    Some(Value::Bytes(current)) => current == expected,
                    Some(Value::Set(_)) => return Err(wrong_type(query_key)),
                    None => expected.is_empty(),
                };
                if !unchanged {
                    return Ok(PAYLOAD_CHANGED);
                }
                let removed = keyspace.delete(std::slice::from_ref(query_key));
                for index_key in index_keys {
                    keyspace.set_remove(index_key, std::slice::from_ref(query_key))?;
                }
                Ok(removed as i64)
            }
        }
    }

    async fn info(&self, section: &str) -> Result<HashMap<String, String>, Error> {
        self.check_online()?;
        let mut keyspace = self.keyspace.lock().await;
        keyspace.sweep();
        let mut info = HashMap::new();
        match section {
            "keyspace" => {
                let expiring = keyspace.slots.values().filter(|slot| slot.expires_at.is_some()).count();
                info.insert("db0".to_string(), format!("keys={},expires={}", keyspace.slots.len(), expiring));
            }
            "memory" => {
                let used: usize = keyspace
                    .slots
                    .iter()
                    .map(|(key, slot)| {
                        key.len()
                            + match &slot.value {
                                Value::Bytes(bytes) => bytes.len(),
                                Value::Set(set) => set.iter().map(String::len).sum(),
                            }
                    })
                    .sum();
                info.insert("used_memory".to_string(), used.to_string());
            }
            _ => {}
        }
        Ok(info)
    }

    async fn pipeline(&self, ops: Vec<StoreOp>) -> Result<Vec<StoreReply>, Error> {
        self.check_online()?;
        let mut keyspace = self.keyspace.lock().await;
        keyspace.sweep();
        let mut replies = Vec::with_capacity(ops.len());
        for op in ops {
            let reply = match op {
                StoreOp::Set { key, value, ttl } => {
                    keyspace.set(&key, &value, ttl);
                    StoreReply::Ok
                }
                StoreOp::SetAdd { key, members } => StoreReply::Integer(keyspace.set_add(&key, &members)? as i64),
                StoreOp::Delete { keys } => StoreReply::Integer(keyspace.delete(&keys) as i64),
            };
            replies.push(reply);
        }
        Ok(replies)
    }
}

/// Redis-style glob match: `*`, `?`, `[abc]`, `[a-z]`, `[^a]` and `\` escapes.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_match_from(&pattern, &text)
}

fn glob_match_from(pattern: &[char], text: &[char]) -> bool {
    let Some((&first, rest)) = pattern.split_first() else {
        return text.is_empty();
    };
    match first {
        '*' => (0..=text.len()).any(|skip| glob_match_from(rest, &text[skip..])),
        '?' => !text.is_empty() && glob_match_from(rest, &text[1..]),
        '[' => {
            let Some((&c, text_rest)) = text.split_first() else {
                return false;
            };
            match match_class(rest, c) {
                Some((true, after)) => glob_match_from(after, text_rest),
                Some((false, _)) => false,
                // Unterminated class: treat '[' literally.
                None => c == '[' && glob_match_from(rest, text_rest),
            }
        }
        '\\' if !rest.is_empty() => text.first() == Some(&rest[0]) && glob_match_from(&rest[1..], &text[1..]),
        literal => text.first() == Some(&literal) && glob_match_from(rest, &text[1..]),
    }
}

/// Match `c` against a class body starting right after `[`.
///
/// Returns whether it matched and the pattern remaining after `]`.
fn match_class(body: &[char], c: char) -> Option<(bool, &[char])> {
    let (negated, mut i) = if body.first() == Some(&'^') { (true, 1) } else { (false, 0) };
    let mut matched = false;
    while i < body.len() {
        match body[i] {
            ']' => return Some((matched != negated, &body[i + 1..])),
            '\\' if i + 1 < body.len() => {
                matched |= body[i + 1] == c;
                i += 2;
            }
            lo if i + 2 < body.len() && body[i + 1] == '-' && body[i + 2] != ']' => {
                let hi = body[i + 2];
                matched |= (lo.min(hi)..=lo.max(hi)).contains(&c);
                i += 3;
            }
            other => {
                matched |= other == c;
                i += 1;
            }
        }
    }
    None
}
