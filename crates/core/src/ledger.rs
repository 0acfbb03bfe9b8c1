//! External collaborator seams: CA identity registry and ledger client.
//!
//! Registration of orgs, users, and services is a two-phase operation in the
//! deployed system: an identity is enrolled with the CA, then the entity is
//! recorded on the ledger. Either phase can fail independently. The core only
//! sees these collaborators through the traits below and never retries; a
//! failure is surfaced verbatim to the caller, and the service-registration
//! saga issues a compensating CA revoke so no half-registered entity remains
//! visible.

use std::collections::BTreeSet;
use std::sync::Mutex;

/// Failure reported by a CA or ledger collaborator.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct BackendError(pub String);

/// Identity provider that issues credentials for registered entities.
pub trait CaRegistry: Send + Sync {
    /// Enroll an identity with the CA.
    fn enroll(&self, id: &str, secret: &str) -> Result<(), BackendError>;

    /// Revoke a previously enrolled identity. Used as the compensating step
    /// when the ledger phase of a registration fails.
    fn revoke(&self, id: &str) -> Result<(), BackendError>;
}

/// Durable ledger that records registered entities and contract state.
pub trait LedgerClient: Send + Sync {
    /// Record an entity of the given kind on the ledger.
    fn record(&self, kind: &str, id: &str) -> Result<(), BackendError>;
}

/// In-memory CA used in-process; tracks enrolled identities so tests can
/// assert the compensating revoke actually happened.
#[derive(Default)]
pub struct InMemoryCa {
    enrolled: Mutex<BTreeSet<String>>,
}

impl InMemoryCa {
    /// Whether an identity is currently enrolled.
    pub fn is_enrolled(&self, id: &str) -> bool {
        let enrolled = self.enrolled.lock().unwrap_or_else(|e| e.into_inner());
        enrolled.contains(id)
    }
}

impl CaRegistry for InMemoryCa {
    fn enroll(&self, id: &str, _secret: &str) -> Result<(), BackendError> {
        let mut enrolled = self.enrolled.lock().unwrap_or_else(|e| e.into_inner());
        enrolled.insert(id.to_owned());
        Ok(())
    }

    fn revoke(&self, id: &str) -> Result<(), BackendError> {
        let mut enrolled = self.enrolled.lock().unwrap_or_else(|e| e.into_inner());
        enrolled.remove(id);
        Ok(())
    }
}

/// In-memory ledger that always succeeds.
#[derive(Default)]
pub struct InMemoryLedger {
    records: Mutex<Vec<(String, String)>>,
}

impl InMemoryLedger {
    /// Number of records of the given kind.
    pub fn count(&self, kind: &str) -> usize {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.iter().filter(|(k, _)| k == kind).count()
    }
}

impl LedgerClient for InMemoryLedger {
    fn record(&self, kind: &str, id: &str) -> Result<(), BackendError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.push((kind.to_owned(), id.to_owned()));
        Ok(())
    }
}

/// Ledger that fails `record` calls. Test double for the saga's
/// compensating-rollback path; optionally scoped to one record kind so
/// fixture setup for other kinds still succeeds.
#[derive(Default)]
pub struct FailingLedger {
    fail_kind: Option<String>,
}

impl FailingLedger {
    /// Fails only records of the given kind; everything else succeeds.
    pub fn for_kind(kind: &str) -> Self {
        Self {
            fail_kind: Some(kind.to_owned()),
        }
    }
}

impl LedgerClient for FailingLedger {
    fn record(&self, kind: &str, _id: &str) -> Result<(), BackendError> {
        match &self.fail_kind {
            Some(k) if k != kind => Ok(()),
            _ => Err(BackendError(format!("Failed to register {kind}"))),
        }
    }
}
