//! Consent engine.
//!
//! Patients grant per-(service, target, datatype) consent with an option set
//! drawn from `read`/`write`/`deny`. `deny` is a tombstone, not a deletion:
//! it is modelled as its own state so "deny excludes read/write" is enforced
//! structurally, and a denied record stays visible in listings. Only the
//! owning patient may write a consent record; every data-plane operation
//! consults [`OmrService::check_access`] before touching patient data.

use std::collections::BTreeSet;

use api_shared::dto;
use serde_json::json;

use crate::audit::AuditEvent;
use crate::auth::Caller;
use crate::validation::require_field;
use crate::{now_ms, rlock, wlock, OmrError, OmrResult, OmrService};

/// Access kind a consent can grant and a service can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Access {
    Read,
    Write,
}

impl Access {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "read" => Some(Access::Read),
            "write" => Some(Access::Write),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Access::Read => "read",
            Access::Write => "write",
        }
    }
}

/// The state of one consent record. Writing `deny` supersedes any prior
/// read/write set; writing read/write replaces the prior set atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConsentState {
    Allow(BTreeSet<Access>),
    Deny,
}

impl ConsentState {
    /// Parses a raw option list. Any occurrence of `deny` collapses the
    /// whole set to `Deny`; unknown options and empty sets are invalid.
    pub(crate) fn from_options(raw: &[String]) -> OmrResult<Self> {
        if raw.is_empty() {
            return Err(OmrError::Validation(
                "Invalid data: invalid consent option".into(),
            ));
        }
        let mut set = BTreeSet::new();
        let mut deny = false;
        for entry in raw {
            match entry.trim() {
                "deny" => deny = true,
                other => match Access::parse(other) {
                    Some(access) => {
                        set.insert(access);
                    }
                    None => {
                        return Err(OmrError::Validation(
                            "Invalid data: invalid consent option".into(),
                        ));
                    }
                },
            }
        }
        if deny {
            Ok(ConsentState::Deny)
        } else {
            Ok(ConsentState::Allow(set))
        }
    }

    pub(crate) fn options(&self) -> Vec<String> {
        match self {
            ConsentState::Allow(set) => set.iter().map(|a| a.as_str().to_owned()).collect(),
            ConsentState::Deny => vec!["deny".into()],
        }
    }

    pub(crate) fn permits(&self, access: Access) -> bool {
        match self {
            ConsentState::Allow(set) => set.contains(&access),
            ConsentState::Deny => false,
        }
    }
}

/// Composite key of a consent record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct ConsentKey {
    pub owner: String,
    pub service: String,
    pub datatype: String,
    pub target: String,
}

#[derive(Debug, Clone)]
pub(crate) struct ConsentRecord {
    pub state: ConsentState,
    /// Epoch milliseconds; 0 means never expires.
    pub expiration: i64,
}

impl ConsentRecord {
    fn is_active(&self, now: i64) -> bool {
        self.expiration == 0 || self.expiration > now
    }
}

fn consent_view(key: &ConsentKey, record: &ConsentRecord) -> dto::ConsentRes {
    dto::ConsentRes {
        patient_id: key.owner.clone(),
        service_id: key.service.clone(),
        datatype_id: key.datatype.clone(),
        target_id: key.target.clone(),
        option: record.state.options(),
        expiration: record.expiration,
    }
}

impl OmrService {
    /// Creates, updates, or revokes (via `option=["deny"]`) a consent record.
    /// Self-authorization only: no admin may write on a patient's behalf.
    pub fn put_consent(&self, caller: &Caller, req: dto::ConsentReq) -> OmrResult<dto::ConsentRes> {
        let patient_id = require_field(&req.patient_id, "patient_id")?.to_owned();
        let service_id = require_field(&req.service_id, "service_id")?.to_owned();
        let target_id = require_field(&req.target_id, "target_id")?.to_owned();
        let datatype_id = require_field(&req.datatype_id, "datatype_id")?.to_owned();
        let options = req.option.as_deref().unwrap_or(&[]);
        let state = ConsentState::from_options(options)?;
        let expiration = req.expiration.unwrap_or(0);

        // Reference checks surface as the generic 500, indistinguishable
        // from authorization failures at the HTTP layer.
        {
            let identity = rlock(&self.state.identity);
            if !identity.users.contains_key(&patient_id) {
                return Err(OmrError::denied("unknown patient id"));
            }
        }
        if self.service_org(&service_id).is_none() {
            return Err(OmrError::denied("unknown service id"));
        }
        if self.service_org(&target_id).is_none() {
            return Err(OmrError::denied("unknown target id"));
        }
        if !self.service_has_datatype(&service_id, &datatype_id) {
            return Err(OmrError::denied("datatype is not handled by service"));
        }

        if !matches!(caller, Caller::User(u) if *u == patient_id) {
            return Err(OmrError::denied("caller is not the consent owner"));
        }

        let key = ConsentKey {
            owner: patient_id.clone(),
            service: service_id.clone(),
            datatype: datatype_id.clone(),
            target: target_id.clone(),
        };
        let record = ConsentRecord { state, expiration };
        let view = consent_view(&key, &record);
        {
            let mut consents = wlock(&self.state.consents);
            consents.insert(key, record);
        }

        self.append_audit(
            AuditEvent::PutConsentPatientData,
            json!({ "option": view.option }),
            &patient_id,
            &service_id,
            &datatype_id,
            &target_id,
        );
        Ok(view)
    }

    /// All consents a user holds toward one service, across targets and
    /// datatypes. Unauthorized callers get an empty list, not an error.
    pub fn get_consents_for_service_user(
        &self,
        caller: &Caller,
        service_id: &str,
        user_id: &str,
    ) -> OmrResult<Vec<dto::ConsentRes>> {
        let authorized = matches!(caller, Caller::User(u) if *u == user_id)
            || self.is_service_actor(caller, service_id);
        if !authorized {
            return Ok(vec![]);
        }
        let consents = rlock(&self.state.consents);
        Ok(consents
            .iter()
            .filter(|(k, _)| k.owner == user_id && k.service == service_id)
            .map(|(k, r)| consent_view(k, r))
            .collect())
    }

    /// Single-record lookup narrowed to one datatype. Prefers the service's
    /// own-target record; blank sentinel when absent or unauthorized.
    pub fn get_consent_for_service_user_datatype(
        &self,
        caller: &Caller,
        service_id: &str,
        user_id: &str,
        datatype_id: &str,
    ) -> OmrResult<dto::ConsentRes> {
        let authorized = matches!(caller, Caller::User(u) if *u == user_id)
            || self.is_service_actor(caller, service_id);
        if !authorized {
            return Ok(dto::ConsentRes::default());
        }
        let consents = rlock(&self.state.consents);
        let matching: Vec<_> = consents
            .iter()
            .filter(|(k, _)| {
                k.owner == user_id && k.service == service_id && k.datatype == datatype_id
            })
            .collect();
        let chosen = matching
            .iter()
            .find(|(k, _)| k.target == service_id)
            .or_else(|| matching.first());
        Ok(chosen
            .map(|&(k, r)| consent_view(k, r))
            .unwrap_or_default())
    }

    /// All consents a user holds, across all services. Org admins see only
    /// the subset belonging to their orgs' services.
    pub fn get_consents_for_user(
        &self,
        caller: &Caller,
        user_id: &str,
    ) -> OmrResult<Vec<dto::ConsentRes>> {
        if matches!(caller, Caller::User(u) if *u == user_id) {
            let consents = rlock(&self.state.consents);
            return Ok(consents
                .iter()
                .filter(|(k, _)| k.owner == user_id)
                .map(|(k, r)| consent_view(k, r))
                .collect());
        }
        let admin_orgs = self.admin_orgs(caller);
        if admin_orgs.is_empty() {
            return Ok(vec![]);
        }
        let service_orgs: std::collections::BTreeMap<String, String> = {
            let services = rlock(&self.state.services);
            services
                .values()
                .map(|s| (s.id.clone(), s.org_id.clone()))
                .collect()
        };
        let consents = rlock(&self.state.consents);
        Ok(consents
            .iter()
            .filter(|(k, _)| {
                k.owner == user_id
                    && service_orgs
                        .get(&k.service)
                        .map(|org| admin_orgs.contains(org))
                        .unwrap_or(false)
            })
            .map(|(k, r)| consent_view(k, r))
            .collect())
    }

    /// Derived "requests" view: one entry per service the user holds any
    /// consent for, scoped like [`OmrService::get_consents_for_user`].
    pub fn get_requests_for_user(
        &self,
        caller: &Caller,
        user_id: &str,
    ) -> OmrResult<Vec<dto::RequestRes>> {
        let consents = self.get_consents_for_user(caller, user_id)?;
        let service_ids: BTreeSet<String> =
            consents.into_iter().map(|c| c.service_id).collect();
        let services = rlock(&self.state.services);
        Ok(service_ids
            .iter()
            .filter_map(|id| services.get(id))
            .map(|s| dto::RequestRes {
                user: user_id.to_owned(),
                org: s.org_id.clone(),
                service: s.id.clone(),
                service_name: s.name.clone(),
                status: "active".into(),
            })
            .collect())
    }

    /// Checks whether a service would be allowed the requested access.
    ///
    /// Always succeeds at the transport level; the outcome is carried in the
    /// body. Grant requires the consent option set to contain the requested
    /// access and the caller to be an actor of the validated service.
    pub fn validate_consent(
        &self,
        caller: &Caller,
        service_id: &str,
        user_id: &str,
        datatype_id: &str,
        requested_access: &str,
    ) -> OmrResult<dto::ValidateConsentRes> {
        let access = Access::parse(requested_access).ok_or_else(|| {
            OmrError::Validation("Invalid data: invalid access type".into())
        })?;
        let granted = self.check_access(
            caller,
            service_id,
            service_id,
            user_id,
            datatype_id,
            access,
        );
        Ok(dto::ValidateConsentRes {
            owner: user_id.to_owned(),
            datatype: datatype_id.to_owned(),
            target: service_id.to_owned(),
            requested_access: access.as_str().to_owned(),
            permission_granted: granted,
            message: if granted {
                "permission granted".into()
            } else {
                "permission denied".into()
            },
            token: if granted {
                uuid::Uuid::new_v4().to_string()
            } else {
                String::new()
            },
        })
    }

    /// Data-plane gate: true iff a live, non-deny consent for
    /// `(user, service, datatype, target)` contains `access` AND the caller
    /// is an authorized actor for the target service. Patients are never
    /// actors here; their read-your-own-data bypass lives in the data store.
    pub(crate) fn check_access(
        &self,
        caller: &Caller,
        service_id: &str,
        target_id: &str,
        user_id: &str,
        datatype_id: &str,
        access: Access,
    ) -> bool {
        let consent_ok = {
            let consents = rlock(&self.state.consents);
            let key = ConsentKey {
                owner: user_id.to_owned(),
                service: service_id.to_owned(),
                datatype: datatype_id.to_owned(),
                target: target_id.to_owned(),
            };
            consents
                .get(&key)
                .map(|r| r.is_active(now_ms()) && r.state.permits(access))
                .unwrap_or(false)
        };
        consent_ok && self.is_service_actor(caller, target_id)
    }
}
