//! Organization registry.
//!
//! Organizations own services and users. The org's `secret` doubles as the
//! default org-admin credential and is immutable after creation; updates must
//! carry every public field and keep `status` at `active`.

use api_shared::dto;
use serde_json::Value;

use crate::auth::Caller;
use crate::validation::{require_field, require_identifier};
use crate::{rlock, wlock, OmrError, OmrResult, OmrService};

/// A registered organization.
#[derive(Debug, Clone)]
pub(crate) struct Org {
    pub id: String,
    pub name: String,
    pub ca_org: String,
    pub secret: String,
    pub email: String,
    pub status: String,
    pub data: Value,
}

/// Builds the caller-facing view of an org. Private fields are blanked
/// unless the caller administers this org; the sys admin gets the public
/// view like everyone else.
pub(crate) fn org_view(org: &Org, full: bool) -> dto::OrgRes {
    dto::OrgRes {
        id: org.id.clone(),
        name: org.name.clone(),
        ca_org: org.ca_org.clone(),
        email: if full { org.email.clone() } else { String::new() },
        secret: if full { org.secret.clone() } else { String::new() },
        status: org.status.clone(),
        data: org.data.clone(),
    }
}

impl OmrService {
    /// Registers a new organization. Sys admin only.
    ///
    /// Enrolls the org's admin identity with the CA and records the org on
    /// the ledger; if the ledger phase fails the CA identity is revoked so
    /// the org is not visible in any backend afterwards.
    pub fn create_org(&self, caller: &Caller, req: dto::OrgReq) -> OmrResult<dto::OrgRes> {
        let id = require_identifier(&req.id, "id")?;
        let name = require_field(&req.name, "name")?.to_owned();
        let ca_org = require_field(&req.ca_org, "ca_org")?.to_owned();
        let secret = require_field(&req.secret, "secret")?.to_owned();
        let email = require_field(&req.email, "email")?.to_owned();
        let status = require_field(&req.status, "status")?.to_owned();
        if status != "active" {
            return Err(OmrError::Validation(
                "Invalid data: status must be active".into(),
            ));
        }

        if !self.is_sys(caller) {
            return Err(OmrError::denied(
                "caller is not authorized to register organizations",
            ));
        }

        {
            let identity = rlock(&self.state.identity);
            if identity.orgs.contains_key(&id) {
                return Err(OmrError::Conflict(
                    "error: existing organization with same id found".into(),
                ));
            }
        }

        self.state
            .ca
            .enroll(&id, &secret)
            .map_err(|e| OmrError::Backend(e.to_string()))?;
        if let Err(e) = self.state.ledger.record("organization", &id) {
            if let Err(revoke_err) = self.state.ca.revoke(&id) {
                tracing::warn!("failed to revoke CA identity for {id}: {revoke_err}");
            }
            return Err(OmrError::Backend(format!(
                "Organization is registered to CA, but failed to register organization in Blockchain:{e}"
            )));
        }

        let org = Org {
            id: id.clone(),
            name,
            ca_org,
            secret: secret.clone(),
            email,
            status,
            data: req.data.unwrap_or(Value::Null),
        };
        let view = org_view(&org, true);
        {
            let mut identity = wlock(&self.state.identity);
            identity.tokens.insert(secret, Caller::Org(id.clone()));
            identity.orgs.insert(id.clone(), org);
        }
        tracing::info!("registered organization {id}");
        Ok(view)
    }

    /// Updates an organization. All public fields must be present, `status`
    /// must stay `active`, and the secret cannot be changed.
    pub fn update_org(
        &self,
        caller: &Caller,
        path_id: &str,
        req: dto::OrgReq,
    ) -> OmrResult<dto::OrgRes> {
        let id = require_identifier(&req.id, "id")?;
        let name = require_field(&req.name, "name")?.to_owned();
        let ca_org = require_field(&req.ca_org, "ca_org")?.to_owned();
        let email = require_field(&req.email, "email")?.to_owned();
        let status = require_field(&req.status, "status")?.to_owned();
        if status != "active" {
            return Err(OmrError::Validation(
                "Invalid data: status must be active".into(),
            ));
        }
        if id != path_id {
            return Err(OmrError::Validation(
                "Invalid data: id in path does not match id in body".into(),
            ));
        }

        let mut identity = wlock(&self.state.identity);
        let org = identity
            .orgs
            .get(&id)
            .ok_or_else(|| OmrError::not_found("Organization"))?;

        let authorized = self.is_sys(caller)
            || matches!(caller, Caller::Org(o) if *o == id)
            || matches!(caller, Caller::User(u) if identity.grants_for(u).org_admin_of.contains(&id));
        if !authorized {
            return Err(OmrError::denied(
                "caller is not authorized to update this organization",
            ));
        }

        if let Some(secret) = &req.secret {
            if !secret.is_empty() && *secret != org.secret {
                return Err(OmrError::Validation(
                    "Invalid data: secret cannot be changed".into(),
                ));
            }
        }

        let org = identity
            .orgs
            .get_mut(&id)
            .ok_or_else(|| OmrError::not_found("Organization"))?;
        org.name = name;
        org.ca_org = ca_org;
        org.email = email;
        org.status = status;
        if let Some(data) = req.data {
            org.data = data;
        }
        Ok(org_view(org, true))
    }

    /// Fetches an organization. Unknown ids return a blank sentinel, not an
    /// error; private fields are redacted for callers outside the org.
    pub fn get_org(&self, caller: &Caller, id: &str) -> OmrResult<dto::OrgRes> {
        let full = self.is_org_admin(caller, id);
        let identity = rlock(&self.state.identity);
        Ok(identity
            .orgs
            .get(id)
            .map(|org| org_view(org, full))
            .unwrap_or_default())
    }

    /// Lists all organizations with per-record redaction.
    pub fn list_orgs(&self, caller: &Caller) -> OmrResult<Vec<dto::OrgRes>> {
        let admin_orgs = self.admin_orgs(caller);
        let identity = rlock(&self.state.identity);
        Ok(identity
            .orgs
            .values()
            .map(|org| org_view(org, admin_orgs.contains(&org.id)))
            .collect())
    }
}
