//! Append-only audit log.
//!
//! Every consent mutation and data-plane operation appends an entry. Entries
//! are immutable, globally ordered by a monotonic sequence, and read back
//! newest-first. Visibility is scoped at query time from the live grant
//! table, so revoking an admin permission empties that caller's view with
//! nothing to invalidate.

use std::collections::BTreeSet;

use api_shared::dto;
use serde_json::Value;

use crate::auth::Caller;
use crate::{mlock, now_ms, rlock, OmrResult, OmrService};

/// The operations that produce audit entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuditEvent {
    PutConsentPatientData,
    UploadUserData,
    DownloadUserData,
    UploadOwnerData,
    DownloadOwnerData,
    DownloadOwnerDataAsRequester,
}

impl AuditEvent {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::PutConsentPatientData => "PutConsentPatientData",
            AuditEvent::UploadUserData => "UploadUserData",
            AuditEvent::DownloadUserData => "DownloadUserData",
            AuditEvent::UploadOwnerData => "UploadOwnerData",
            AuditEvent::DownloadOwnerData => "DownloadOwnerData",
            AuditEvent::DownloadOwnerDataAsRequester => "DownloadOwnerDataAsRequester",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct AuditEntry {
    pub seq: u64,
    pub entry_type: &'static str,
    /// Redacted at append time; payloads are never logged.
    pub data: Value,
    pub patient_id: String,
    pub service_id: String,
    pub datatype_id: String,
    pub consent_owner_target_id: String,
    pub timestamp: i64,
}

/// Conjunction filters for a history query.
#[derive(Debug, Clone, Default)]
pub struct AuditFilters {
    pub patient_id: Option<String>,
    pub service_id: Option<String>,
    pub datatype_id: Option<String>,
    pub consent_owner_target_id: Option<String>,
    pub latest_only: bool,
    pub max_num: Option<usize>,
    pub start_timestamp: Option<i64>,
    pub end_timestamp: Option<i64>,
}

impl AuditFilters {
    fn matches(&self, entry: &AuditEntry) -> bool {
        self.patient_id.as_deref().map_or(true, |p| entry.patient_id == p)
            && self.service_id.as_deref().map_or(true, |s| entry.service_id == s)
            && self.datatype_id.as_deref().map_or(true, |d| entry.datatype_id == d)
            && self
                .consent_owner_target_id
                .as_deref()
                .map_or(true, |t| entry.consent_owner_target_id == t)
            && self.start_timestamp.map_or(true, |s| entry.timestamp >= s)
            && self.end_timestamp.map_or(true, |e| entry.timestamp <= e)
    }
}

fn entry_view(entry: &AuditEntry) -> dto::AuditEntryRes {
    dto::AuditEntryRes {
        entry_type: entry.entry_type.to_owned(),
        data: entry.data.clone(),
        patient_id: entry.patient_id.clone(),
        service_id: entry.service_id.clone(),
        datatype_id: entry.datatype_id.clone(),
        consent_owner_target_id: entry.consent_owner_target_id.clone(),
        timestamp: entry.timestamp,
    }
}

impl OmrService {
    /// Appends one entry. `data` must already be redacted for the event type.
    pub(crate) fn append_audit(
        &self,
        event: AuditEvent,
        data: Value,
        patient_id: &str,
        service_id: &str,
        datatype_id: &str,
        consent_owner_target_id: &str,
    ) {
        let entry = AuditEntry {
            seq: self.next_seq(),
            entry_type: event.as_str(),
            data,
            patient_id: patient_id.to_owned(),
            service_id: service_id.to_owned(),
            datatype_id: datatype_id.to_owned(),
            consent_owner_target_id: consent_owner_target_id.to_owned(),
            timestamp: now_ms(),
        };
        let mut audit = mlock(&self.state.audit);
        audit.push(entry);
    }

    /// Queries the audit log, newest-first.
    ///
    /// The caller sees the union of entries about themself (patient scope)
    /// and entries of every service they administer directly or through org
    /// admin rights. The sys admin sees everything. No match is an empty
    /// list, never an error.
    pub fn query_history(
        &self,
        caller: &Caller,
        filters: &AuditFilters,
    ) -> OmrResult<Vec<dto::AuditEntryRes>> {
        let scope = self.visibility_scope(caller);

        // Newest-first by global sequence; timestamps are not unique enough
        // to order entries appended within the same millisecond.
        let mut matching: Vec<(u64, dto::AuditEntryRes)> = {
            let audit = mlock(&self.state.audit);
            audit
                .iter()
                .filter(|e| scope.covers(caller, e))
                .filter(|e| filters.matches(e))
                .map(|e| (e.seq, entry_view(e)))
                .collect()
        };
        matching.sort_by(|a, b| b.0.cmp(&a.0));

        let limit = if filters.latest_only {
            1
        } else {
            filters
                .max_num
                .unwrap_or_else(|| self.state.cfg.audit_page_size())
        };
        matching.truncate(limit);
        Ok(matching.into_iter().map(|(_, view)| view).collect())
    }

    /// The services whose entries the caller may see, resolved from the live
    /// grant table at query time.
    fn visibility_scope(&self, caller: &Caller) -> VisibilityScope {
        if self.is_sys(caller) {
            return VisibilityScope::All;
        }
        let mut services = self.admin_services(caller);
        let admin_orgs = self.admin_orgs(caller);
        if !admin_orgs.is_empty() {
            let registry = rlock(&self.state.services);
            services.extend(
                registry
                    .values()
                    .filter(|s| admin_orgs.contains(&s.org_id))
                    .map(|s| s.id.clone()),
            );
        }
        VisibilityScope::Services(services)
    }
}

enum VisibilityScope {
    All,
    Services(BTreeSet<String>),
}

impl VisibilityScope {
    fn covers(&self, caller: &Caller, entry: &AuditEntry) -> bool {
        match self {
            VisibilityScope::All => true,
            VisibilityScope::Services(services) => {
                let self_scope =
                    matches!(caller, Caller::User(u) if *u == entry.patient_id);
                self_scope || services.contains(&entry.service_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::test_support::{seed_org_service, seed_patient, service, sys, user_req, SYS_TOKEN};
    use serde_json::json;

    fn grant_consent(svc: &crate::OmrService, patient: &Caller, options: &[&str]) {
        svc.put_consent(
            patient,
            dto::ConsentReq {
                patient_id: Some("patient1".into()),
                service_id: Some("svc1".into()),
                target_id: Some("svc1".into()),
                datatype_id: Some("dt1".into()),
                option: Some(options.iter().map(|o| (*o).to_string()).collect()),
                expiration: None,
            },
        )
        .expect("consent should succeed");
    }

    fn upload(svc: &crate::OmrService, caller: &Caller, n: i64) {
        svc.upload_user_data(
            caller,
            "svc1",
            "patient1",
            "dt1",
            dto::UploadDataReq {
                data: Some(json!({ "n": n })),
            },
        )
        .expect("upload should succeed");
    }

    #[test]
    fn test_entries_read_newest_first() {
        let svc = service();
        let (_, svc_admin) = seed_org_service(&svc);
        let patient = seed_patient(&svc);
        grant_consent(&svc, &patient, &["write"]);
        upload(&svc, &svc_admin, 1);
        upload(&svc, &svc_admin, 2);

        let sys_caller = sys(&svc);
        let history = svc
            .query_history(&sys_caller, &AuditFilters::default())
            .expect("query should succeed");
        // Two uploads plus the consent write; uploads first.
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].entry_type, "UploadUserData");
        assert_eq!(history[2].entry_type, "PutConsentPatientData");
    }

    #[test]
    fn test_same_millisecond_entries_order_by_sequence() {
        let svc = service();
        let sys_caller = sys(&svc);
        // Appended back to back, these share a millisecond timestamp.
        for dt in ["dt-a", "dt-b", "dt-c"] {
            svc.append_audit(
                AuditEvent::UploadUserData,
                json!({}),
                "patient1",
                "svc1",
                dt,
                "svc1",
            );
        }

        let history = svc
            .query_history(&sys_caller, &AuditFilters::default())
            .expect("query should succeed");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].datatype_id, "dt-c");
        assert_eq!(history[1].datatype_id, "dt-b");
        assert_eq!(history[2].datatype_id, "dt-a");
    }

    #[test]
    fn test_filters_are_conjunctive() {
        let svc = service();
        let (_, svc_admin) = seed_org_service(&svc);
        let patient = seed_patient(&svc);
        grant_consent(&svc, &patient, &["write"]);
        upload(&svc, &svc_admin, 1);

        let sys_caller = sys(&svc);
        let filters = AuditFilters {
            patient_id: Some("patient1".into()),
            service_id: Some("svc1".into()),
            ..AuditFilters::default()
        };
        let history = svc
            .query_history(&sys_caller, &filters)
            .expect("query should succeed");
        assert_eq!(history.len(), 2);

        let filters = AuditFilters {
            patient_id: Some("patient1".into()),
            service_id: Some("no-such-service".into()),
            ..AuditFilters::default()
        };
        let history = svc
            .query_history(&sys_caller, &filters)
            .expect("query should succeed");
        assert!(history.is_empty(), "no match is an empty list");
    }

    #[test]
    fn test_latest_only_and_page_size() {
        let cfg = CoreConfig::new(SYS_TOKEN, 3).expect("config should be valid");
        let svc = crate::OmrService::new(cfg);
        let (_, svc_admin) = seed_org_service(&svc);
        let patient = seed_patient(&svc);
        grant_consent(&svc, &patient, &["write"]);
        for n in 1..=5 {
            upload(&svc, &svc_admin, n);
        }

        let sys_caller = sys(&svc);
        let history = svc
            .query_history(&sys_caller, &AuditFilters::default())
            .expect("query should succeed");
        assert_eq!(history.len(), 3, "default limit is the configured page size");

        let latest = svc
            .query_history(
                &sys_caller,
                &AuditFilters {
                    latest_only: true,
                    ..AuditFilters::default()
                },
            )
            .expect("query should succeed");
        assert_eq!(latest.len(), 1);

        let wide = svc
            .query_history(
                &sys_caller,
                &AuditFilters {
                    max_num: Some(100),
                    ..AuditFilters::default()
                },
            )
            .expect("query should succeed");
        assert_eq!(wide.len(), 6, "explicit max_num overrides the page size");
    }

    #[test]
    fn test_patient_sees_only_their_own_entries() {
        let svc = service();
        let (_, svc_admin) = seed_org_service(&svc);
        let patient = seed_patient(&svc);
        let sys_caller = sys(&svc);
        svc.create_user(&sys_caller, user_req("patient2", None))
            .expect("patient2 should register");
        let patient2 = svc
            .resolve_token("patient2-secret")
            .expect("should resolve");
        grant_consent(&svc, &patient, &["write"]);
        upload(&svc, &svc_admin, 1);

        let own = svc
            .query_history(&patient, &AuditFilters::default())
            .expect("query should succeed");
        assert_eq!(own.len(), 2);

        let other = svc
            .query_history(&patient2, &AuditFilters::default())
            .expect("query should succeed");
        assert!(other.is_empty());
    }

    #[test]
    fn test_revoked_service_admin_loses_visibility_immediately() {
        let svc = service();
        let (org_admin, svc_admin) = seed_org_service(&svc);
        let patient = seed_patient(&svc);
        grant_consent(&svc, &patient, &["write"]);
        upload(&svc, &svc_admin, 1);

        svc.create_user(&org_admin, user_req("delegate", Some("org1")))
            .expect("delegate should register");
        let delegate = svc.resolve_token("delegate-secret").expect("should resolve");
        let grant = dto::PermissionReq {
            kind: Some("service".into()),
            scope_id: Some("svc1".into()),
        };
        svc.grant_permission(&org_admin, "delegate", grant.clone())
            .expect("grant should succeed");

        let seen = svc
            .query_history(&delegate, &AuditFilters::default())
            .expect("query should succeed");
        assert_eq!(seen.len(), 2);

        svc.revoke_permission(&org_admin, "delegate", grant)
            .expect("revoke should succeed");
        let seen = svc
            .query_history(&delegate, &AuditFilters::default())
            .expect("query should succeed");
        assert!(seen.is_empty(), "revocation empties the view at once");

        // The default service credential is unaffected.
        let seen = svc
            .query_history(&svc_admin, &AuditFilters::default())
            .expect("query should succeed");
        assert_eq!(seen.len(), 2);
    }
}
