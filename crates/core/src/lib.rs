//! # OMR Core
//!
//! Core business logic for the Off-chain Medical Records (OMR) service:
//! identity and roles, the datatype and service registries, the consent
//! engine, user/owner data stores, the contract lifecycle, and the audit log.
//!
//! All mutable state is owned exclusively by a single [`OmrService`] instance
//! and mutated only through its operations; every operation executes as an
//! independent, serializable transaction against the shared state.
//!
//! **No API concerns**: authentication transports, HTTP servers, and status
//! code mapping belong in `api-rest` and `api-shared`.

pub mod audit;
pub mod auth;
pub mod config;
pub mod consent;
pub mod contract;
pub mod data;
pub mod datatype;
pub mod error;
pub mod ledger;
pub mod org;
pub mod service;
pub mod user;
mod validation;

pub use audit::AuditFilters;
pub use auth::Caller;
pub use config::CoreConfig;
pub use consent::Access;
pub use data::DataFilters;
pub use error::{OmrError, OmrResult};
pub use ledger::{BackendError, CaRegistry, FailingLedger, InMemoryCa, InMemoryLedger, LedgerClient};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared state behind the service facade.
///
/// Lock ordering, where an operation needs more than one section:
/// identity → datatypes → services → consents → contracts → data → audit.
/// Most operations copy the small facts they need out of one section and drop
/// the guard before taking the next.
pub(crate) struct OmrState {
    pub(crate) cfg: CoreConfig,
    pub(crate) ca: Arc<dyn CaRegistry>,
    pub(crate) ledger: Arc<dyn LedgerClient>,
    pub(crate) seq: AtomicU64,
    pub(crate) identity: RwLock<auth::IdentityStore>,
    pub(crate) datatypes: RwLock<BTreeMap<String, datatype::Datatype>>,
    pub(crate) services: RwLock<BTreeMap<String, service::Service>>,
    pub(crate) consents: RwLock<BTreeMap<consent::ConsentKey, consent::ConsentRecord>>,
    pub(crate) contracts: Mutex<BTreeMap<String, contract::Contract>>,
    pub(crate) user_data: Mutex<BTreeMap<data::UserDataKey, Vec<data::DataRecord>>>,
    pub(crate) owner_data: Mutex<BTreeMap<data::OwnerDataKey, Vec<data::DataRecord>>>,
    pub(crate) audit: Mutex<Vec<audit::AuditEntry>>,
}

/// The OMR core service. Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct OmrService {
    pub(crate) state: Arc<OmrState>,
}

impl OmrService {
    /// Creates a service with in-memory CA and ledger collaborators.
    pub fn new(cfg: CoreConfig) -> Self {
        Self::with_backends(
            cfg,
            Arc::new(InMemoryCa::default()),
            Arc::new(InMemoryLedger::default()),
        )
    }

    /// Creates a service with explicit CA and ledger collaborators.
    pub fn with_backends(
        cfg: CoreConfig,
        ca: Arc<dyn CaRegistry>,
        ledger: Arc<dyn LedgerClient>,
    ) -> Self {
        Self {
            state: Arc::new(OmrState {
                cfg,
                ca,
                ledger,
                seq: AtomicU64::new(1),
                identity: RwLock::new(auth::IdentityStore::default()),
                datatypes: RwLock::new(BTreeMap::new()),
                services: RwLock::new(BTreeMap::new()),
                consents: RwLock::new(BTreeMap::new()),
                contracts: Mutex::new(BTreeMap::new()),
                user_data: Mutex::new(BTreeMap::new()),
                owner_data: Mutex::new(BTreeMap::new()),
                audit: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Next value of the global sequence used to order append-only records.
    pub(crate) fn next_seq(&self) -> u64 {
        self.state.seq.fetch_add(1, Ordering::SeqCst)
    }
}

/// Current time as epoch milliseconds; the timestamp unit used on the wire.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// Lock guards recover from poisoning: state is only ever mutated through
// short critical sections that uphold their invariants before any panic
// could propagate.

pub(crate) fn rlock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn wlock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn mlock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use api_shared::dto;

    pub const SYS_TOKEN: &str = "sys-admin-token";

    /// A service with defaults used across module tests.
    pub fn service() -> OmrService {
        let cfg = CoreConfig::new(SYS_TOKEN, config::DEFAULT_AUDIT_PAGE_SIZE)
            .expect("test config should be valid");
        OmrService::new(cfg)
    }

    pub fn sys(svc: &OmrService) -> Caller {
        svc.resolve_token(SYS_TOKEN)
            .expect("sys token should resolve")
    }

    pub fn org_req(id: &str) -> dto::OrgReq {
        dto::OrgReq {
            id: Some(id.into()),
            name: Some(format!("{id} name")),
            ca_org: Some("ca.example.com".into()),
            secret: Some(format!("{id}-secret")),
            email: Some(format!("admin@{id}.example.com")),
            status: Some("active".into()),
            data: None,
        }
    }

    pub fn user_req(id: &str, org: Option<&str>) -> dto::UserReq {
        dto::UserReq {
            id: Some(id.into()),
            secret: Some(format!("{id}-secret")),
            name: Some(format!("{id} name")),
            org: org.map(Into::into),
            email: Some(format!("{id}@example.com")),
            data: None,
        }
    }

    pub fn service_req(id: &str, org_id: &str, datatypes: &[(&str, &[&str])]) -> dto::ServiceReq {
        dto::ServiceReq {
            id: Some(id.into()),
            name: Some(format!("{id} name")),
            secret: Some(format!("{id}-secret")),
            ca_org: Some("ca.example.com".into()),
            email: Some(format!("admin@{id}.example.com")),
            org_id: Some(org_id.into()),
            summary: Some(format!("{id} summary")),
            payment_required: Some("no".into()),
            datatypes: Some(
                datatypes
                    .iter()
                    .map(|(dt, access)| dto::ServiceDatatypeReq {
                        datatype_id: Some((*dt).into()),
                        access: Some(access.iter().map(|a| (*a).to_string()).collect()),
                    })
                    .collect(),
            ),
            terms: None,
            solution_private_data: None,
        }
    }

    /// Registers org `org1` with datatype `dt1` and service `svc1`, returning
    /// the org admin and service admin callers.
    pub fn seed_org_service(svc: &OmrService) -> (Caller, Caller) {
        let sys = sys(svc);
        svc.create_org(&sys, org_req("org1"))
            .expect("org1 should register");
        let org_admin = svc
            .resolve_token("org1-secret")
            .expect("org1 secret should resolve");
        svc.register_datatype(
            &sys,
            dto::DatatypeReq {
                id: Some("dt1".into()),
                description: Some("Datatype one".into()),
            },
        )
        .expect("dt1 should register");
        svc.register_service(
            &org_admin,
            service_req("svc1", "org1", &[("dt1", &["read", "write"])]),
        )
        .expect("svc1 should register");
        let svc_admin = svc
            .resolve_token("svc1-secret")
            .expect("svc1 secret should resolve");
        (org_admin, svc_admin)
    }

    /// Seeds a patient `patient1` (org-less) and returns their caller.
    pub fn seed_patient(svc: &OmrService) -> Caller {
        let sys = sys(svc);
        svc.create_user(&sys, user_req("patient1", None))
            .expect("patient1 should register");
        svc.resolve_token("patient1-secret")
            .expect("patient1 secret should resolve")
    }
}
