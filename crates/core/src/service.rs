//! Service registry.
//!
//! A service belongs to an org, declares the datatypes it handles and the
//! access (`read`/`write`) it wants per datatype, and carries a default
//! service-admin credential. Registration is a two-phase saga against the CA
//! and the ledger; a ledger failure triggers a compensating CA revoke so the
//! service is not visible anywhere afterwards.

use std::collections::BTreeSet;

use api_shared::dto;
use serde_json::Value;

use crate::auth::Caller;
use crate::consent::Access;
use crate::validation::{require_field, require_identifier};
use crate::{rlock, wlock, OmrError, OmrResult, OmrService};

/// A datatype attachment on a service.
#[derive(Debug, Clone)]
pub(crate) struct ServiceDatatype {
    pub datatype_id: String,
    pub access: BTreeSet<Access>,
}

/// A registered service.
#[derive(Debug, Clone)]
pub(crate) struct Service {
    pub id: String,
    pub name: String,
    pub secret: String,
    pub ca_org: String,
    pub email: String,
    pub org_id: String,
    pub summary: String,
    pub payment_required: String,
    pub terms: Value,
    pub solution_private_data: Value,
    pub datatypes: Vec<ServiceDatatype>,
    /// Enrollment roster. Kept server-side only; the wire view of a service
    /// never lists its users.
    pub enrolled_users: BTreeSet<String>,
}

/// Caller-facing view; private fields blank unless `full`.
pub(crate) fn service_view(service: &Service, full: bool) -> dto::ServiceRes {
    dto::ServiceRes {
        id: service.id.clone(),
        name: service.name.clone(),
        ca_org: service.ca_org.clone(),
        email: if full {
            service.email.clone()
        } else {
            String::new()
        },
        secret: if full {
            service.secret.clone()
        } else {
            String::new()
        },
        org_id: service.org_id.clone(),
        summary: service.summary.clone(),
        payment_required: service.payment_required.clone(),
        datatypes: service
            .datatypes
            .iter()
            .map(|sd| dto::ServiceDatatypeRes {
                datatype_id: sd.datatype_id.clone(),
                access: sd.access.iter().map(|a| a.as_str().to_owned()).collect(),
            })
            .collect(),
        terms: service.terms.clone(),
        solution_private_data: if full {
            service.solution_private_data.clone()
        } else {
            Value::Null
        },
    }
}

/// Parses a non-empty access list into a set of `read`/`write`.
fn parse_access(raw: &Option<Vec<String>>) -> OmrResult<BTreeSet<Access>> {
    let list = match raw {
        Some(list) if !list.is_empty() => list,
        _ => return Err(OmrError::missing("access")),
    };
    let mut set = BTreeSet::new();
    for entry in list {
        let access = Access::parse(entry).ok_or_else(|| {
            OmrError::Validation("Invalid data: invalid access type".into())
        })?;
        set.insert(access);
    }
    Ok(set)
}

impl OmrService {
    /// Registers a service. Org admin of `org_id` only.
    ///
    /// Field validation runs one field at a time in a fixed order; the first
    /// failing field is reported. The CA and ledger phases run last, after
    /// all local checks have passed.
    pub fn register_service(
        &self,
        caller: &Caller,
        req: dto::ServiceReq,
    ) -> OmrResult<dto::ServiceRes> {
        let id = require_identifier(&req.id, "id")?;
        let name = require_field(&req.name, "name")?.to_owned();
        let secret = require_field(&req.secret, "secret")?.to_owned();
        let ca_org = require_field(&req.ca_org, "ca_org")?.to_owned();
        let email = require_field(&req.email, "email")?.to_owned();
        let org_id = require_identifier(&req.org_id, "org_id")?;
        let summary = require_field(&req.summary, "summary")?.to_owned();
        let payment_required = match req.payment_required.as_deref().map(str::trim) {
            Some("yes") => "yes".to_owned(),
            Some("no") => "no".to_owned(),
            _ => {
                return Err(OmrError::Validation(
                    "Invalid data: payment_required must be either 'yes' or 'no'".into(),
                ));
            }
        };

        let datatype_reqs = match &req.datatypes {
            Some(list) if !list.is_empty() => list,
            _ => return Err(OmrError::missing("datatypes")),
        };
        let mut datatypes: Vec<ServiceDatatype> = Vec::with_capacity(datatype_reqs.len());
        for entry in datatype_reqs {
            let datatype_id = require_identifier(&entry.datatype_id, "datatype_id")?;
            let access = parse_access(&entry.access)?;
            if !self.datatype_exists(&datatype_id) {
                return Err(OmrError::not_found("Datatype"));
            }
            if datatypes.iter().any(|sd| sd.datatype_id == datatype_id) {
                return Err(OmrError::Validation(
                    "Invalid data: duplicate datatype in service".into(),
                ));
            }
            datatypes.push(ServiceDatatype {
                datatype_id,
                access,
            });
        }

        {
            let services = rlock(&self.state.services);
            if services.contains_key(&id) {
                return Err(OmrError::Validation(
                    "Existing service with same id found".into(),
                ));
            }
        }
        {
            let identity = rlock(&self.state.identity);
            if !identity.orgs.contains_key(&org_id) {
                return Err(OmrError::not_found("Organization"));
            }
        }
        if !self.is_org_admin(caller, &org_id) {
            return Err(OmrError::denied(
                "caller is not an admin of the owning organization",
            ));
        }

        // Two-phase registration: CA first, then the ledger. A ledger failure
        // must leave no trace, so the CA enrollment is compensated.
        self.state
            .ca
            .enroll(&id, &secret)
            .map_err(|e| OmrError::Backend(e.to_string()))?;
        if let Err(e) = self.state.ledger.record("service", &id) {
            if let Err(revoke_err) = self.state.ca.revoke(&id) {
                tracing::warn!("failed to revoke CA identity for {id}: {revoke_err}");
            }
            return Err(OmrError::Backend(format!(
                "Service is registered to CA, but failed to register service in Blockchain:{e}"
            )));
        }

        let service = Service {
            id: id.clone(),
            name,
            secret: secret.clone(),
            ca_org,
            email,
            org_id,
            summary,
            payment_required,
            terms: req.terms.unwrap_or(Value::Null),
            solution_private_data: req.solution_private_data.unwrap_or(Value::Null),
            datatypes,
            enrolled_users: BTreeSet::new(),
        };
        let view = service_view(&service, true);
        self.register_token(&secret, Caller::Service(id.clone()));
        {
            let mut services = wlock(&self.state.services);
            services.insert(id.clone(), service);
        }
        tracing::info!("registered service {id}");
        Ok(view)
    }

    /// Attaches a datatype to a service.
    pub fn add_service_datatype(
        &self,
        caller: &Caller,
        path_service_id: &str,
        req: dto::AddDatatypeReq,
    ) -> OmrResult<dto::ServiceRes> {
        let service_id = require_field(&req.service_id, "service_id")?.to_owned();
        if service_id != path_service_id {
            return Err(OmrError::Validation(
                "Invalid data: service_id in path does not match body".into(),
            ));
        }
        let datatype_id = require_field(&req.datatype_id, "datatype_id")?.to_owned();
        let access = parse_access(&req.access)?;

        if self.service_org(&service_id).is_none() {
            return Err(OmrError::invalid_id(&service_id));
        }
        if !self.datatype_exists(&datatype_id) {
            return Err(OmrError::not_found("Datatype"));
        }
        if !self.is_service_actor(caller, &service_id) {
            return Err(OmrError::denied(
                "caller is not authorized for this service",
            ));
        }

        let mut services = wlock(&self.state.services);
        let service = services
            .get_mut(&service_id)
            .ok_or_else(|| OmrError::invalid_id(&service_id))?;
        if service
            .datatypes
            .iter()
            .any(|sd| sd.datatype_id == datatype_id)
        {
            return Err(OmrError::Conflict(
                "error: datatype already attached to service".into(),
            ));
        }
        service.datatypes.push(ServiceDatatype {
            datatype_id,
            access,
        });
        Ok(service_view(service, true))
    }

    /// Detaches a datatype from a service.
    pub fn remove_service_datatype(
        &self,
        caller: &Caller,
        service_id: &str,
        datatype_id: &str,
    ) -> OmrResult<dto::ServiceRes> {
        if self.service_org(service_id).is_none() {
            return Err(OmrError::invalid_id(service_id));
        }
        if !self.datatype_exists(datatype_id) {
            return Err(OmrError::not_found("Datatype"));
        }
        if !self.is_service_actor(caller, service_id) {
            return Err(OmrError::denied(
                "caller is not authorized for this service",
            ));
        }

        let mut services = wlock(&self.state.services);
        let service = services
            .get_mut(service_id)
            .ok_or_else(|| OmrError::invalid_id(service_id))?;
        let before = service.datatypes.len();
        service.datatypes.retain(|sd| sd.datatype_id != datatype_id);
        if service.datatypes.len() == before {
            return Err(OmrError::Conflict(
                "error: datatype is not attached to service".into(),
            ));
        }
        Ok(service_view(service, true))
    }

    /// Fetches a service; blank sentinel when unknown, private fields
    /// redacted outside the owning org.
    pub fn get_service(&self, caller: &Caller, id: &str) -> OmrResult<dto::ServiceRes> {
        let full = self.is_service_actor(caller, id);
        let services = rlock(&self.state.services);
        Ok(services
            .get(id)
            .map(|s| service_view(s, full))
            .unwrap_or_default())
    }

    /// Lists the services owned by an org, with per-record redaction.
    pub fn services_for_org(&self, caller: &Caller, org_id: &str) -> OmrResult<Vec<dto::ServiceRes>> {
        let org_admin = self.is_org_admin(caller, org_id);
        let admin_services = self.admin_services(caller);
        let services = rlock(&self.state.services);
        Ok(services
            .values()
            .filter(|s| s.org_id == org_id)
            .map(|s| service_view(s, org_admin || admin_services.contains(&s.id)))
            .collect())
    }

    /// Enrolls a user with a service. Allowed to the user themself or to a
    /// service actor; idempotent. The roster is an internal registration
    /// record: no response echoes it, and data-plane access is governed by
    /// consent alone.
    pub fn enroll_user(
        &self,
        caller: &Caller,
        service_id: &str,
        req: dto::EnrollUserReq,
    ) -> OmrResult<dto::ServiceRes> {
        let user_id = require_field(&req.user_id, "user_id")?.to_owned();
        if self.service_org(service_id).is_none() {
            return Err(OmrError::not_found("Service"));
        }
        {
            let identity = rlock(&self.state.identity);
            if !identity.users.contains_key(&user_id) {
                return Err(OmrError::not_found("User"));
            }
        }
        let authorized = matches!(caller, Caller::User(u) if *u == user_id)
            || self.is_service_actor(caller, service_id);
        if !authorized {
            return Err(OmrError::denied(
                "caller is not authorized to enroll this user",
            ));
        }
        let full = self.is_service_actor(caller, service_id);

        let mut services = wlock(&self.state.services);
        let service = services
            .get_mut(service_id)
            .ok_or_else(|| OmrError::not_found("Service"))?;
        service.enrolled_users.insert(user_id);
        Ok(service_view(service, full))
    }

    /// Whether a service has the datatype attached.
    pub(crate) fn service_has_datatype(&self, service_id: &str, datatype_id: &str) -> bool {
        let services = rlock(&self.state.services);
        services
            .get(service_id)
            .map(|s| s.datatypes.iter().any(|sd| sd.datatype_id == datatype_id))
            .unwrap_or(false)
    }
}
