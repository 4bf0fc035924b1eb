// 1.8: idempotency guard. a request id, once it has produced an audit row, never applies again.
// the audit row is the witness, so the guard can be rebuilt from the audit log after a restart.

use crate::types::{AuditId, RequestId};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    // never seen, will be recorded
    Fresh,
    // already applied, here is the audit row that proves it
    Replay(AuditId),
    // no request id, nothing to dedup against
    Untracked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guarded<T> {
    Applied(T),
    Replayed(AuditId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("Request {request_id} already claimed by audit record {prior:?}")]
    AlreadyClaimed { request_id: RequestId, prior: AuditId },
}

#[derive(Debug, Clone, Default)]
pub struct IdempotencyGuard {
    witnesses: HashMap<RequestId, AuditId>,
}

impl IdempotencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, request_id: Option<&RequestId>) -> Admission {
        match request_id {
            None => Admission::Untracked,
            Some(id) => match self.witnesses.get(id) {
                Some(prior) => Admission::Replay(*prior),
                None => Admission::Fresh,
            },
        }
    }

    /// Unique-constraint insert. Losing a race is an error, never a second apply.
    pub fn claim(&mut self, request_id: &RequestId, audit_id: AuditId) -> Result<(), GuardError> {
        match self.witnesses.entry(request_id.clone()) {
            Entry::Occupied(prior) => Err(GuardError::AlreadyClaimed {
                request_id: request_id.clone(),
                prior: *prior.get(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(audit_id);
                Ok(())
            }
        }
    }

    /// Runs `effect` unless `request_id` was already witnessed. The claim is
    /// taken before the effect, so a failed claim leaves state untouched.
    pub fn apply<T>(
        &mut self,
        request_id: Option<&RequestId>,
        audit_id: AuditId,
        effect: impl FnOnce() -> T,
    ) -> Result<Guarded<T>, GuardError> {
        match self.check(request_id) {
            Admission::Replay(prior) => Ok(Guarded::Replayed(prior)),
            Admission::Untracked => Ok(Guarded::Applied(effect())),
            Admission::Fresh => {
                if let Some(id) = request_id {
                    self.claim(id, audit_id)?;
                }
                Ok(Guarded::Applied(effect()))
            }
        }
    }

    pub fn witness_of(&self, request_id: &RequestId) -> Option<AuditId> {
        self.witnesses.get(request_id).copied()
    }

    pub fn len(&self) -> usize {
        self.witnesses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.witnesses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_apply_is_a_replay() {
        let mut guard = IdempotencyGuard::new();
        let rid = RequestId::new("r-1");
        let mut hits = 0;

        let first = guard.apply(Some(&rid), AuditId(1), || hits += 1).unwrap();
        assert_eq!(first, Guarded::Applied(()));

        let second = guard.apply(Some(&rid), AuditId(2), || hits += 1).unwrap();
        assert_eq!(second, Guarded::Replayed(AuditId(1)));
        assert_eq!(hits, 1);
    }

    #[test]
    fn untracked_requests_always_apply() {
        let mut guard = IdempotencyGuard::new();
        let mut hits = 0;
        guard.apply(None, AuditId(1), || hits += 1).unwrap();
        guard.apply(None, AuditId(2), || hits += 1).unwrap();
        assert_eq!(hits, 2);
        assert!(guard.is_empty());
    }

    #[test]
    fn claim_enforces_uniqueness() {
        let mut guard = IdempotencyGuard::new();
        let rid = RequestId::new("dup");
        guard.claim(&rid, AuditId(4)).unwrap();
        let err = guard.claim(&rid, AuditId(5)).unwrap_err();
        assert_eq!(
            err,
            GuardError::AlreadyClaimed {
                request_id: rid.clone(),
                prior: AuditId(4)
            }
        );
        assert_eq!(guard.witness_of(&rid), Some(AuditId(4)));
    }
}
