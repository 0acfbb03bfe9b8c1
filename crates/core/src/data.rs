//! Append-only user and owner data stores.
//!
//! User data is keyed per (service, user, datatype) and gated by the consent
//! engine; owner data is keyed per (service, datatype) and belongs to the
//! service itself, downloadable by outsiders only through a contract. Records
//! are never mutated or deleted, only appended and read in insertion order.
//!
//! Write consent gates both upload and download of user data: a patient who
//! denies a service loses the service's download access even if read was
//! never granted. Patients can always read their own data, and can never
//! upload, regardless of consent.

use api_shared::dto;
use serde_json::{json, Value};

use crate::audit::AuditEvent;
use crate::auth::Caller;
use crate::consent::Access;
use crate::{mlock, now_ms, OmrError, OmrResult, OmrService};

/// (service_id, user_id, datatype_id)
pub(crate) type UserDataKey = (String, String, String);
/// (service_id, datatype_id)
pub(crate) type OwnerDataKey = (String, String);

#[derive(Debug, Clone)]
pub(crate) struct DataRecord {
    pub seq: u64,
    pub timestamp: i64,
    pub data: Value,
}

/// Retrieval filters shared by every download operation.
#[derive(Debug, Clone, Default)]
pub struct DataFilters {
    pub latest_only: bool,
    pub max_num: Option<usize>,
    pub start_timestamp: Option<i64>,
    pub end_timestamp: Option<i64>,
}

impl DataFilters {
    /// Applies the time window, then `latest_only`/`max_num`. Records come
    /// back ordered by their global sequence number, so records sharing a
    /// millisecond timestamp still read back in append order; `max_num` keeps
    /// the most recent N.
    pub(crate) fn apply(&self, records: &[DataRecord]) -> Vec<dto::DataRecordRes> {
        let mut windowed: Vec<&DataRecord> = records
            .iter()
            .filter(|r| {
                self.start_timestamp.map_or(true, |s| r.timestamp >= s)
                    && self.end_timestamp.map_or(true, |e| r.timestamp <= e)
            })
            .collect();
        windowed.sort_by_key(|r| r.seq);
        let kept: &[&DataRecord] = if self.latest_only {
            windowed.last().map(std::slice::from_ref).unwrap_or(&[])
        } else if let Some(n) = self.max_num {
            &windowed[windowed.len().saturating_sub(n)..]
        } else {
            &windowed[..]
        };
        kept.iter()
            .map(|r| dto::DataRecordRes {
                data: r.data.clone(),
                timestamp: r.timestamp,
            })
            .collect()
    }
}

impl OmrService {
    /// Appends a user-data record. Requires write consent toward the service
    /// itself; patients cannot upload their own data.
    pub fn upload_user_data(
        &self,
        caller: &Caller,
        service_id: &str,
        user_id: &str,
        datatype_id: &str,
        req: dto::UploadDataReq,
    ) -> OmrResult<()> {
        if !self.check_access(caller, service_id, service_id, user_id, datatype_id, Access::Write) {
            return Err(OmrError::denied("no write consent for upload"));
        }
        let record = DataRecord {
            seq: self.next_seq(),
            timestamp: now_ms(),
            data: req.data.unwrap_or(Value::Null),
        };
        {
            let mut store = mlock(&self.state.user_data);
            store
                .entry((
                    service_id.to_owned(),
                    user_id.to_owned(),
                    datatype_id.to_owned(),
                ))
                .or_default()
                .push(record);
        }
        // The payload itself is never logged.
        self.append_audit(
            AuditEvent::UploadUserData,
            json!({}),
            user_id,
            service_id,
            datatype_id,
            service_id,
        );
        Ok(())
    }

    /// Reads a user's records under one service/datatype. The user may always
    /// read their own data; anyone else needs write consent.
    pub fn download_user_data(
        &self,
        caller: &Caller,
        service_id: &str,
        user_id: &str,
        datatype_id: &str,
        filters: &DataFilters,
    ) -> OmrResult<Vec<dto::DataRecordRes>> {
        let self_read = matches!(caller, Caller::User(u) if *u == user_id);
        if !self_read
            && !self.check_access(caller, service_id, service_id, user_id, datatype_id, Access::Write)
        {
            return Err(OmrError::denied("no write consent for download"));
        }
        let records = {
            let store = mlock(&self.state.user_data);
            store
                .get(&(
                    service_id.to_owned(),
                    user_id.to_owned(),
                    datatype_id.to_owned(),
                ))
                .map(|r| filters.apply(r))
                .unwrap_or_default()
        };
        self.append_audit(
            AuditEvent::DownloadUserData,
            json!({}),
            user_id,
            service_id,
            datatype_id,
            service_id,
        );
        Ok(records)
    }

    /// Appends an owner-data record for the service itself. Service actors
    /// only; consent does not apply since there is no user dimension.
    pub fn upload_owner_data(
        &self,
        caller: &Caller,
        service_id: &str,
        datatype_id: &str,
        req: dto::UploadDataReq,
    ) -> OmrResult<()> {
        if !self.is_service_actor(caller, service_id) {
            return Err(OmrError::denied("caller is not an actor of the service"));
        }
        if !self.service_has_datatype(service_id, datatype_id) {
            return Err(OmrError::denied("datatype is not handled by service"));
        }
        let record = DataRecord {
            seq: self.next_seq(),
            timestamp: now_ms(),
            data: req.data.unwrap_or(Value::Null),
        };
        {
            let mut store = mlock(&self.state.owner_data);
            store
                .entry((service_id.to_owned(), datatype_id.to_owned()))
                .or_default()
                .push(record);
        }
        self.append_audit(
            AuditEvent::UploadOwnerData,
            json!({}),
            "",
            service_id,
            datatype_id,
            service_id,
        );
        Ok(())
    }

    /// Reads the service's own owner-data records. Service actors only;
    /// requester-side access goes through the contract download instead.
    pub fn download_owner_data_as_owner(
        &self,
        caller: &Caller,
        service_id: &str,
        datatype_id: &str,
        filters: &DataFilters,
    ) -> OmrResult<Vec<dto::DataRecordRes>> {
        if !self.is_service_actor(caller, service_id) {
            return Err(OmrError::denied("caller is not an actor of the service"));
        }
        let records = self.read_owner_data(service_id, datatype_id, filters);
        self.append_audit(
            AuditEvent::DownloadOwnerData,
            json!({}),
            "",
            service_id,
            datatype_id,
            service_id,
        );
        Ok(records)
    }

    /// Raw read of the owner store for callers already vetted by the
    /// contract lifecycle.
    pub(crate) fn read_owner_data(
        &self,
        service_id: &str,
        datatype_id: &str,
        filters: &DataFilters,
    ) -> Vec<dto::DataRecordRes> {
        let store = mlock(&self.state.owner_data);
        store
            .get(&(service_id.to_owned(), datatype_id.to_owned()))
            .map(|r| filters.apply(r))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_org_service, seed_patient, service, sys};

    fn payload(n: i64) -> dto::UploadDataReq {
        dto::UploadDataReq {
            data: Some(json!({ "n": n })),
        }
    }

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

    #[test]
    fn test_upload_requires_write_consent() {
        let svc = service();
        let (_, svc_admin) = seed_org_service(&svc);
        let patient = seed_patient(&svc);

        let err = svc
            .upload_user_data(&svc_admin, "svc1", "patient1", "dt1", payload(1))
            .expect_err("upload without consent should fail");
        assert!(matches!(err, OmrError::Denied(_)));

        grant_consent(&svc, &patient, &["read"]);
        let err = svc
            .upload_user_data(&svc_admin, "svc1", "patient1", "dt1", payload(1))
            .expect_err("read-only consent should not permit upload");
        assert!(matches!(err, OmrError::Denied(_)));

        grant_consent(&svc, &patient, &["write"]);
        svc.upload_user_data(&svc_admin, "svc1", "patient1", "dt1", payload(1))
            .expect("write consent should permit upload");
    }

    #[test]
    fn test_self_upload_always_denied() {
        let svc = service();
        seed_org_service(&svc);
        let patient = seed_patient(&svc);
        grant_consent(&svc, &patient, &["read", "write"]);

        let err = svc
            .upload_user_data(&patient, "svc1", "patient1", "dt1", payload(1))
            .expect_err("patients must not upload their own data");
        assert!(matches!(err, OmrError::Denied(_)));
    }

    #[test]
    fn test_write_consent_gates_download_and_deny_revokes_it() {
        let svc = service();
        let (_, svc_admin) = seed_org_service(&svc);
        let patient = seed_patient(&svc);
        grant_consent(&svc, &patient, &["write"]);
        svc.upload_user_data(&svc_admin, "svc1", "patient1", "dt1", payload(1))
            .expect("upload should succeed");

        let records = svc
            .download_user_data(&svc_admin, "svc1", "patient1", "dt1", &DataFilters::default())
            .expect("download with write consent should succeed");
        assert_eq!(records.len(), 1);

        grant_consent(&svc, &patient, &["deny"]);
        let err = svc
            .download_user_data(&svc_admin, "svc1", "patient1", "dt1", &DataFilters::default())
            .expect_err("deny should revoke download access");
        assert!(matches!(err, OmrError::Denied(_)));
    }

    #[test]
    fn test_patient_reads_own_data_regardless_of_consent() {
        let svc = service();
        let (_, svc_admin) = seed_org_service(&svc);
        let patient = seed_patient(&svc);
        grant_consent(&svc, &patient, &["write"]);
        svc.upload_user_data(&svc_admin, "svc1", "patient1", "dt1", payload(7))
            .expect("upload should succeed");
        grant_consent(&svc, &patient, &["deny"]);

        let records = svc
            .download_user_data(&patient, "svc1", "patient1", "dt1", &DataFilters::default())
            .expect("patient should read their own data");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data, json!({ "n": 7 }));
    }

    #[test]
    fn test_filters_preserve_insertion_order() {
        let svc = service();
        let (_, svc_admin) = seed_org_service(&svc);
        let patient = seed_patient(&svc);
        grant_consent(&svc, &patient, &["write"]);
        for n in 1..=4 {
            svc.upload_user_data(&svc_admin, "svc1", "patient1", "dt1", payload(n))
                .expect("upload should succeed");
        }

        let all = svc
            .download_user_data(&svc_admin, "svc1", "patient1", "dt1", &DataFilters::default())
            .expect("download should succeed");
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].data, json!({ "n": 1 }));

        let latest = svc
            .download_user_data(
                &svc_admin,
                "svc1",
                "patient1",
                "dt1",
                &DataFilters {
                    latest_only: true,
                    ..DataFilters::default()
                },
            )
            .expect("download should succeed");
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].data, json!({ "n": 4 }));

        let recent = svc
            .download_user_data(
                &svc_admin,
                "svc1",
                "patient1",
                "dt1",
                &DataFilters {
                    max_num: Some(2),
                    ..DataFilters::default()
                },
            )
            .expect("download should succeed");
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].data, json!({ "n": 3 }));
        assert_eq!(recent[1].data, json!({ "n": 4 }));
    }

    #[test]
    fn test_apply_orders_by_sequence_on_equal_timestamps() {
        // Appends within the same millisecond share a timestamp; the global
        // sequence number is the stable order.
        let records = vec![
            DataRecord {
                seq: 3,
                timestamp: 100,
                data: json!(3),
            },
            DataRecord {
                seq: 1,
                timestamp: 100,
                data: json!(1),
            },
            DataRecord {
                seq: 2,
                timestamp: 100,
                data: json!(2),
            },
        ];

        let all = DataFilters::default().apply(&records);
        let values: Vec<_> = all.iter().map(|r| r.data.clone()).collect();
        assert_eq!(values, vec![json!(1), json!(2), json!(3)]);

        let latest = DataFilters {
            latest_only: true,
            ..DataFilters::default()
        }
        .apply(&records);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].data, json!(3));
    }

    #[test]
    fn test_time_window_filter() {
        let records = vec![
            DataRecord {
                seq: 1,
                timestamp: 100,
                data: json!(1),
            },
            DataRecord {
                seq: 2,
                timestamp: 200,
                data: json!(2),
            },
            DataRecord {
                seq: 3,
                timestamp: 300,
                data: json!(3),
            },
        ];
        let filters = DataFilters {
            start_timestamp: Some(150),
            end_timestamp: Some(250),
            ..DataFilters::default()
        };
        let kept = filters.apply(&records);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].timestamp, 200);
    }

    #[test]
    fn test_owner_data_is_service_actor_only() {
        let svc = service();
        let (org_admin, svc_admin) = seed_org_service(&svc);
        let patient = seed_patient(&svc);

        svc.upload_owner_data(&svc_admin, "svc1", "dt1", payload(1))
            .expect("service admin should upload owner data");
        svc.upload_owner_data(&org_admin, "svc1", "dt1", payload(2))
            .expect("org admin should upload owner data");

        let err = svc
            .upload_owner_data(&patient, "svc1", "dt1", payload(3))
            .expect_err("patient must not upload owner data");
        assert!(matches!(err, OmrError::Denied(_)));

        let records = svc
            .download_owner_data_as_owner(&svc_admin, "svc1", "dt1", &DataFilters::default())
            .expect("owner download should succeed");
        assert_eq!(records.len(), 2);

        let err = svc
            .download_owner_data_as_owner(&patient, "svc1", "dt1", &DataFilters::default())
            .expect_err("patient must not download owner data");
        assert!(matches!(err, OmrError::Denied(_)));
    }

    #[test]
    fn test_upload_audit_never_carries_payload() {
        let svc = service();
        let (_, svc_admin) = seed_org_service(&svc);
        let patient = seed_patient(&svc);
        grant_consent(&svc, &patient, &["write"]);
        svc.upload_user_data(&svc_admin, "svc1", "patient1", "dt1", payload(42))
            .expect("upload should succeed");

        let audit = mlock(&svc.state.audit);
        let entry = audit
            .iter()
            .find(|e| e.entry_type == AuditEvent::UploadUserData.as_str())
            .expect("upload should be audited");
        assert_eq!(entry.data, json!({}));
    }

    #[test]
    fn test_sys_admin_has_no_data_plane_rights() {
        let svc = service();
        seed_org_service(&svc);
        let patient = seed_patient(&svc);
        grant_consent(&svc, &patient, &["write"]);
        let sys_caller = sys(&svc);

        let err = svc
            .upload_user_data(&sys_caller, "svc1", "patient1", "dt1", payload(1))
            .expect_err("sys admin is not a service actor");
        assert!(matches!(err, OmrError::Denied(_)));
    }
}
