//! A key/value store driven entirely through the log.
//!
//! [`KvStore`] is the state machine the integration tests recover. Writes
//! are built as [`KvAction`]s that carry the LSNs they supersede; the engine
//! records them (updating the store) and, after a restart, replays the
//! survivors backward into a fresh store.
//!
//! Callers serialize writes to the same key; the store computes
//! invalidations from the last LSN that wrote each key.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use relog_core::{Action, ActionCodec, CodecError, Lsn, ReplayError};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A key inside a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    /// Scope (map) the key lives in.
    pub scope: u64,
    /// Key name.
    pub name: String,
}

impl Key {
    /// Creates a key.
    pub fn new(scope: u64, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
        }
    }
}

/// One mutation of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    /// Sets a key.
    Put {
        /// Target key.
        key: Key,
        /// New value.
        value: Vec<u8>,
    },
    /// Removes a key.
    Delete {
        /// Target key.
        key: Key,
    },
    /// Removes every key of a scope.
    DeleteScope {
        /// Target scope.
        scope: u64,
    },
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<Key, (Vec<u8>, Lsn)>,
    /// Last LSN that wrote each key, deletes included.
    last_write: HashMap<Key, Lsn>,
    /// Last LSN that deleted each scope.
    scope_deletes: HashMap<u64, Lsn>,
    replayed: Vec<Lsn>,
    disposed: usize,
}

/// The in-memory store.
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct KvStore {
    state: Arc<Mutex<State>>,
}

impl KvStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an action that sets `key` to `value`.
    pub fn put(&self, key: Key, value: impl Into<Vec<u8>>) -> KvAction {
        let invalidates = self.state.lock().last_write.get(&key).copied();
        self.action(
            KvOp::Put {
                key,
                value: value.into(),
            },
            invalidates.into_iter().collect(),
        )
    }

    /// Builds an action that removes `key`.
    pub fn delete(&self, key: Key) -> KvAction {
        let invalidates = self.state.lock().last_write.get(&key).copied();
        self.action(KvOp::Delete { key }, invalidates.into_iter().collect())
    }

    /// Builds an action that removes every key of `scope`.
    pub fn delete_scope(&self, scope: u64) -> KvAction {
        let invalidates = self.state.lock().scope_deletes.get(&scope).copied();
        self.action(KvOp::DeleteScope { scope }, invalidates.into_iter().collect())
    }

    /// Builds an action that does not supersede anything.
    ///
    /// Useful for crafting logs by hand.
    pub fn action(&self, op: KvOp, invalidates: Vec<Lsn>) -> KvAction {
        KvAction {
            store: self.clone(),
            op,
            invalidates,
        }
    }

    /// Current value of `key`.
    #[must_use]
    pub fn get(&self, key: &Key) -> Option<Vec<u8>> {
        self.state.lock().entries.get(key).map(|(value, _)| value.clone())
    }

    /// LSN that produced the current value of `key`.
    #[must_use]
    pub fn version(&self, key: &Key) -> Option<Lsn> {
        self.state.lock().entries.get(key).map(|(_, lsn)| *lsn)
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns whether the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every live key and value, in key order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(Key, Vec<u8>)> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|(key, (value, _))| (key.clone(), value.clone()))
            .collect()
    }

    /// LSNs replayed into this store, in the order they were applied.
    #[must_use]
    pub fn replayed(&self) -> Vec<Lsn> {
        self.state.lock().replayed.clone()
    }

    /// Number of actions disposed without effect.
    #[must_use]
    pub fn disposed(&self) -> usize {
        self.state.lock().disposed
    }

    /// Applies `op` as of `lsn`, keeping whichever version is newer.
    fn apply(&self, op: &KvOp, lsn: Lsn) {
        let mut state = self.state.lock();
        match op {
            KvOp::Put { key, value } => {
                let newer = state.entries.get(key).is_some_and(|(_, at)| *at > lsn);
                if !newer {
                    state.entries.insert(key.clone(), (value.clone(), lsn));
                }
                record_write(&mut state.last_write, key, lsn);
            }
            KvOp::Delete { key } => {
                if state.entries.get(key).is_some_and(|(_, at)| *at < lsn) {
                    state.entries.remove(key);
                }
                record_write(&mut state.last_write, key, lsn);
            }
            KvOp::DeleteScope { scope } => {
                state
                    .entries
                    .retain(|key, (_, at)| key.scope != *scope || *at > lsn);
                state.last_write.retain(|key, at| key.scope != *scope || *at > lsn);
                let last = state.scope_deletes.entry(*scope).or_insert(lsn);
                *last = (*last).max(lsn);
            }
        }
    }
}

fn record_write(last_write: &mut HashMap<Key, Lsn>, key: &Key, lsn: Lsn) {
    let last = last_write.entry(key.clone()).or_insert(lsn);
    *last = (*last).max(lsn);
}

/// A store mutation as logged by the engine.
#[derive(Debug, Clone)]
pub struct KvAction {
    store: KvStore,
    op: KvOp,
    invalidates: Vec<Lsn>,
}

impl KvAction {
    /// The mutation.
    #[must_use]
    pub fn op(&self) -> &KvOp {
        &self.op
    }

    /// Replaces the superseded LSNs.
    #[must_use]
    pub fn invalidating(mut self, lsns: &[Lsn]) -> Self {
        self.invalidates = lsns.to_vec();
        self
    }
}

/// FNV-1a over the scope and key name; stable across processes.
fn bucket_of(key: &Key) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    key.scope
        .to_be_bytes()
        .iter()
        .chain(key.name.as_bytes())
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(PRIME))
}

impl Action for KvAction {
    fn record(self, lsn: Lsn) {
        self.store.apply(&self.op, lsn);
    }

    fn replay(self, lsn: Lsn) -> Result<(), ReplayError> {
        self.store.apply(&self.op, lsn);
        self.store.state.lock().replayed.push(lsn);
        Ok(())
    }

    fn invalidated_lsns(&self) -> &[Lsn] {
        &self.invalidates
    }

    fn replay_concurrency(&self) -> u64 {
        match &self.op {
            KvOp::Put { key, .. } | KvOp::Delete { key } => bucket_of(key),
            KvOp::DeleteScope { scope } => *scope,
        }
    }

    fn scope(&self) -> Option<u64> {
        match &self.op {
            KvOp::Put { key, .. } | KvOp::Delete { key } => Some(key.scope),
            KvOp::DeleteScope { scope } => Some(*scope),
        }
    }

    fn deleted_scope(&self) -> Option<u64> {
        match &self.op {
            KvOp::DeleteScope { scope } => Some(*scope),
            _ => None,
        }
    }

    fn dispose(self) {
        self.store.state.lock().disposed += 1;
    }
}

const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;
const OP_DELETE_SCOPE: u8 = 3;

/// Binary codec for [`KvAction`]; decoded actions target `store`.
///
/// ```text
/// | op (1) | scope (8) | name len (4) | name | value len (4) | value | count (4) | lsns (8 each) |
/// ```
/// Name and value are present only for the ops that carry them.
#[derive(Debug, Clone, Default)]
pub struct KvCodec {
    store: KvStore,
}

impl KvCodec {
    /// Creates a codec that decodes into `store`.
    #[must_use]
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }

    /// The store decoded actions apply to.
    #[must_use]
    pub fn store(&self) -> &KvStore {
        &self.store
    }
}

fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) -> Result<(), CodecError> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| CodecError::Invalid(format!("field of {} bytes", bytes.len())))?;
    buf.put_u32(len);
    buf.put_slice(bytes);
    Ok(())
}

fn need(buf: &[u8], needed: usize) -> Result<(), CodecError> {
    if buf.remaining() < needed {
        return Err(CodecError::Truncated {
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}

fn get_bytes(buf: &mut &[u8]) -> Result<Vec<u8>, CodecError> {
    need(buf, 4)?;
    let len = buf.get_u32() as usize;
    need(buf, len)?;
    let bytes = buf[..len].to_vec();
    buf.advance(len);
    Ok(bytes)
}

fn get_key(buf: &mut &[u8], scope: u64) -> Result<Key, CodecError> {
    let name = String::from_utf8(get_bytes(buf)?)
        .map_err(|err| CodecError::Invalid(format!("key name: {err}")))?;
    Ok(Key { scope, name })
}

impl ActionCodec for KvCodec {
    type Action = KvAction;

    fn encode(&self, action: &KvAction) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::with_capacity(64);
        match &action.op {
            KvOp::Put { key, value } => {
                buf.put_u8(OP_PUT);
                buf.put_u64(key.scope);
                put_bytes(&mut buf, key.name.as_bytes())?;
                put_bytes(&mut buf, value)?;
            }
            KvOp::Delete { key } => {
                buf.put_u8(OP_DELETE);
                buf.put_u64(key.scope);
                put_bytes(&mut buf, key.name.as_bytes())?;
            }
            KvOp::DeleteScope { scope } => {
                buf.put_u8(OP_DELETE_SCOPE);
                buf.put_u64(*scope);
            }
        }
        buf.put_u32(action.invalidates.len() as u32);
        for lsn in &action.invalidates {
            buf.put_u64(lsn.as_u64());
        }
        Ok(buf.freeze())
    }

    fn decode(&self, payload: &[u8]) -> Result<KvAction, CodecError> {
        let mut buf = payload;
        need(buf, 9)?;
        let tag = buf.get_u8();
        let scope = buf.get_u64();
        let op = match tag {
            OP_PUT => {
                let key = get_key(&mut buf, scope)?;
                let value = get_bytes(&mut buf)?;
                KvOp::Put { key, value }
            }
            OP_DELETE => KvOp::Delete {
                key: get_key(&mut buf, scope)?,
            },
            OP_DELETE_SCOPE => KvOp::DeleteScope { scope },
            other => return Err(CodecError::UnknownTag(other)),
        };

        need(buf, 4)?;
        let count = buf.get_u32() as usize;
        if buf.remaining() != count * 8 {
            return Err(CodecError::Invalid(format!(
                "expected {count} invalidated lsns, {} bytes left",
                buf.remaining()
            )));
        }
        let invalidates = (0..count).map(|_| Lsn::new(buf.get_u64())).collect();
        Ok(self.store.action(op, invalidates))
    }
}
