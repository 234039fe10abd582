//! Actions, the payload codec seam and the transaction envelope.
//!
//! An [`Action`] is one unit of mutation intent. During normal operation it is
//! recorded once its LSN is known; during recovery the replay engine decodes
//! it from the log and replays it instead. The core never looks inside action
//! payloads: encoding belongs to the [`ActionCodec`] collaborator.
//!
//! ## Envelope Format
//!
//! The core wraps every payload in a small envelope so that recovery can tell
//! transaction members and commits apart without involving the codec:
//!
//! ```text
//! | tag (1) | txn id (8, member/commit only) | codec payload (plain/member only) |
//! ```

use crate::error::CodecError;
use crate::error::ReplayError;
use crate::types::{Lsn, TransactionId};
use bytes::{BufMut, Bytes, BytesMut};

const TAG_PLAIN: u8 = 0x01;
const TAG_MEMBER: u8 = 0x02;
const TAG_COMMIT: u8 = 0x03;

/// A unit of mutation intent.
///
/// Every action is consumed exactly once: by [`record`](Action::record) when
/// it is first logged, by [`replay`](Action::replay) when recovery applies it,
/// or by [`dispose`](Action::dispose) when recovery decides not to.
pub trait Action: Send + Sized + 'static {
    /// Applies the action during normal operation, now that it owns `lsn`.
    fn record(self, lsn: Lsn);

    /// Re-applies the action during recovery.
    ///
    /// # Errors
    ///
    /// Any error aborts the whole recovery attempt.
    fn replay(self, lsn: Lsn) -> Result<(), ReplayError>;

    /// LSNs of earlier actions this one supersedes.
    fn invalidated_lsns(&self) -> &[Lsn];

    /// Replay bucket. Actions in the same bucket replay one at a time, newest
    /// first; different buckets may replay in parallel.
    fn replay_concurrency(&self) -> u64;

    /// The object scope this action mutates, if it belongs to one.
    fn scope(&self) -> Option<u64> {
        None
    }

    /// The scope this action deletes wholesale, if any.
    ///
    /// Recovery drops every earlier action whose [`scope`](Action::scope)
    /// matches.
    fn deleted_scope(&self) -> Option<u64> {
        None
    }

    /// Releases whatever the action holds without applying it.
    fn dispose(self) {}
}

/// Encodes and decodes action payloads.
pub trait ActionCodec: Send + Sync + 'static {
    /// The action type this codec produces.
    type Action: Action;

    /// Encodes an action into payload bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the action cannot be represented.
    fn encode(&self, action: &Self::Action) -> Result<Bytes, CodecError>;

    /// Decodes payload bytes produced by [`encode`](ActionCodec::encode).
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is malformed.
    fn decode(&self, payload: &[u8]) -> Result<Self::Action, CodecError>;
}

/// An action as it appears in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggedAction<A> {
    /// A standalone action.
    Plain(A),
    /// An action that only takes effect if `txn` commits.
    Member {
        /// Owning transaction.
        txn: TransactionId,
        /// The wrapped action.
        action: A,
    },
    /// The commit marker of `txn`.
    Commit {
        /// Committed transaction.
        txn: TransactionId,
    },
}

impl<A: Action> LoggedAction<A> {
    /// LSNs superseded by the wrapped action; commits supersede nothing.
    pub fn invalidated_lsns(&self) -> &[Lsn] {
        match self {
            Self::Plain(action) | Self::Member { action, .. } => action.invalidated_lsns(),
            Self::Commit { .. } => &[],
        }
    }

    /// Transaction this entry belongs to, if any.
    #[must_use]
    pub fn txn(&self) -> Option<TransactionId> {
        match self {
            Self::Plain(_) => None,
            Self::Member { txn, .. } | Self::Commit { txn } => Some(*txn),
        }
    }

    /// Unwraps the action, if the entry carries one.
    pub fn into_action(self) -> Option<A> {
        match self {
            Self::Plain(action) | Self::Member { action, .. } => Some(action),
            Self::Commit { .. } => None,
        }
    }

    /// Disposes the wrapped action, if any.
    pub fn dispose(self) {
        if let Some(action) = self.into_action() {
            action.dispose();
        }
    }

    /// Encodes the envelope around the codec's payload.
    ///
    /// # Errors
    ///
    /// Propagates codec failures.
    pub fn encode<C>(&self, codec: &C) -> Result<Bytes, CodecError>
    where
        C: ActionCodec<Action = A>,
    {
        let mut buf = BytesMut::new();
        match self {
            Self::Plain(action) => {
                let payload = codec.encode(action)?;
                buf.reserve(1 + payload.len());
                buf.put_u8(TAG_PLAIN);
                buf.put_slice(&payload);
            }
            Self::Member { txn, action } => {
                let payload = codec.encode(action)?;
                buf.reserve(9 + payload.len());
                buf.put_u8(TAG_MEMBER);
                buf.put_u64(txn.as_u64());
                buf.put_slice(&payload);
            }
            Self::Commit { txn } => {
                buf.put_u8(TAG_COMMIT);
                buf.put_u64(txn.as_u64());
            }
        }
        Ok(buf.freeze())
    }

    /// Decodes an envelope produced by [`encode`](LoggedAction::encode).
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown tag, a short envelope, or a codec failure.
    pub fn decode<C>(codec: &C, bytes: &[u8]) -> Result<Self, CodecError>
    where
        C: ActionCodec<Action = A>,
    {
        let (&tag, rest) = bytes.split_first().ok_or(CodecError::Truncated {
            needed: 1,
            available: 0,
        })?;

        let read_txn = |rest: &[u8]| -> Result<TransactionId, CodecError> {
            let raw: [u8; 8] = rest
                .get(..8)
                .and_then(|b| b.try_into().ok())
                .ok_or(CodecError::Truncated {
                    needed: 8,
                    available: rest.len(),
                })?;
            Ok(TransactionId::new(u64::from_be_bytes(raw)))
        };

        match tag {
            TAG_PLAIN => Ok(Self::Plain(codec.decode(rest)?)),
            TAG_MEMBER => {
                let txn = read_txn(rest)?;
                Ok(Self::Member {
                    txn,
                    action: codec.decode(&rest[8..])?,
                })
            }
            TAG_COMMIT => {
                let txn = read_txn(rest)?;
                if rest.len() != 8 {
                    return Err(CodecError::Invalid(format!(
                        "trailing bytes in commit envelope: {}",
                        rest.len() - 8
                    )));
                }
                Ok(Self::Commit { txn })
            }
            other => Err(CodecError::UnknownTag(other)),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Minimal action used by the core's unit tests: records what happens to it.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) struct Tracked {
        pub(crate) id: u64,
        pub(crate) bucket: u64,
        pub(crate) invalidates: Vec<Lsn>,
        pub(crate) fail: bool,
        pub(crate) panic_on_record: bool,
        pub(crate) journal: Journal,
    }

    #[derive(Debug, Clone, Default)]
    pub(crate) struct Journal(pub(crate) Arc<Mutex<Vec<(&'static str, u64, Lsn)>>>);

    impl PartialEq for Journal {
        fn eq(&self, _: &Self) -> bool {
            true
        }
    }

    impl Eq for Journal {}

    impl Journal {
        pub(crate) fn entries(&self, kind: &str) -> Vec<(u64, Lsn)> {
            self.0
                .lock()
                .iter()
                .filter(|(k, _, _)| *k == kind)
                .map(|(_, id, lsn)| (*id, *lsn))
                .collect()
        }
    }

    impl Tracked {
        pub(crate) fn new(id: u64, journal: &Journal) -> Self {
            Self {
                id,
                bucket: 0,
                invalidates: Vec::new(),
                fail: false,
                panic_on_record: false,
                journal: journal.clone(),
            }
        }

        pub(crate) fn bucket(mut self, bucket: u64) -> Self {
            self.bucket = bucket;
            self
        }

        pub(crate) fn invalidating(mut self, lsns: &[u64]) -> Self {
            self.invalidates = lsns.iter().copied().map(Lsn::new).collect();
            self
        }

        pub(crate) fn failing(mut self) -> Self {
            self.fail = true;
            self
        }

        pub(crate) fn panicking(mut self) -> Self {
            self.panic_on_record = true;
            self
        }
    }

    impl Action for Tracked {
        fn record(self, lsn: Lsn) {
            assert!(!self.panic_on_record, "action {} panicked at {lsn}", self.id);
            self.journal.0.lock().push(("record", self.id, lsn));
        }

        fn replay(self, lsn: Lsn) -> Result<(), ReplayError> {
            if self.fail {
                return Err(ReplayError::new(format!("tracked action {} refused", self.id)));
            }
            self.journal.0.lock().push(("replay", self.id, lsn));
            Ok(())
        }

        fn invalidated_lsns(&self) -> &[Lsn] {
            &self.invalidates
        }

        fn replay_concurrency(&self) -> u64 {
            self.bucket
        }

        fn dispose(self) {
            self.journal.0.lock().push(("dispose", self.id, Lsn::NONE));
        }
    }

    /// Codec for [`Tracked`]: id, bucket, fail flag and invalidated LSNs.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct TrackedCodec {
        pub(crate) journal: Journal,
    }

    impl ActionCodec for TrackedCodec {
        type Action = Tracked;

        fn encode(&self, action: &Tracked) -> Result<Bytes, CodecError> {
            let mut buf = BytesMut::new();
            buf.put_u64(action.id);
            buf.put_u64(action.bucket);
            buf.put_u8(u8::from(action.fail));
            buf.put_u32(action.invalidates.len() as u32);
            for lsn in &action.invalidates {
                buf.put_u64(lsn.as_u64());
            }
            Ok(buf.freeze())
        }

        fn decode(&self, payload: &[u8]) -> Result<Tracked, CodecError> {
            use bytes::Buf;
            let mut buf = payload;
            if buf.remaining() < 21 {
                return Err(CodecError::Truncated {
                    needed: 21,
                    available: buf.remaining(),
                });
            }
            let id = buf.get_u64();
            let bucket = buf.get_u64();
            let fail = buf.get_u8() != 0;
            let count = buf.get_u32() as usize;
            if buf.remaining() != count * 8 {
                return Err(CodecError::Invalid("bad invalidation list".into()));
            }
            let invalidates = (0..count).map(|_| Lsn::new(buf.get_u64())).collect();
            Ok(Tracked {
                id,
                bucket,
                invalidates,
                fail,
                panic_on_record: false,
                journal: self.journal.clone(),
            })
        }
    }

    #[test]
    fn plain_envelope_roundtrip() {
        let codec = TrackedCodec::default();
        let logged = LoggedAction::Plain(Tracked::new(7, &codec.journal).invalidating(&[100]));
        let bytes = logged.encode(&codec).unwrap();
        assert_eq!(bytes[0], TAG_PLAIN);
        assert_eq!(LoggedAction::decode(&codec, &bytes).unwrap(), logged);
    }

    #[test]
    fn member_and_commit_envelopes_carry_txn() {
        let codec = TrackedCodec::default();
        let member = LoggedAction::Member {
            txn: TransactionId::new(9),
            action: Tracked::new(1, &codec.journal),
        };
        let commit: LoggedAction<Tracked> = LoggedAction::Commit {
            txn: TransactionId::new(9),
        };

        let decoded = LoggedAction::decode(&codec, &member.encode(&codec).unwrap()).unwrap();
        assert_eq!(decoded.txn(), Some(TransactionId::new(9)));
        assert_eq!(decoded, member);

        let bytes = commit.encode(&codec).unwrap();
        assert_eq!(bytes.len(), 9);
        let decoded = LoggedAction::decode(&codec, &bytes).unwrap();
        assert_eq!(decoded, commit);
        assert!(decoded.invalidated_lsns().is_empty());
        assert!(decoded.into_action().is_none());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let codec = TrackedCodec::default();
        let result = LoggedAction::<Tracked>::decode(&codec, &[0x7F]);
        assert_eq!(result, Err(CodecError::UnknownTag(0x7F)));
    }

    #[test]
    fn short_member_envelope_is_truncated() {
        let codec = TrackedCodec::default();
        let result = LoggedAction::<Tracked>::decode(&codec, &[TAG_MEMBER, 0, 1]);
        assert!(matches!(result, Err(CodecError::Truncated { needed: 8, .. })));
    }

    #[test]
    fn empty_envelope_is_truncated() {
        let codec = TrackedCodec::default();
        assert!(matches!(
            LoggedAction::<Tracked>::decode(&codec, &[]),
            Err(CodecError::Truncated { needed: 1, .. })
        ));
    }

    #[test]
    fn dispose_reaches_wrapped_action() {
        let journal = Journal::default();
        LoggedAction::Member {
            txn: TransactionId::new(1),
            action: Tracked::new(3, &journal),
        }
        .dispose();
        assert_eq!(journal.entries("dispose"), vec![(3, Lsn::NONE)]);
    }
}
