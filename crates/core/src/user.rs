//! User registry and admin-permission grants.
//!
//! Users are created by the sys admin (unaffiliated patients) or by an org
//! admin (members of their own org). Admin roles are never flags on the user
//! record: they live in the grant table and are surfaced read-only through
//! `solution_info`.

use api_shared::dto;
use serde_json::Value;

use crate::auth::Caller;
use crate::validation::{require_field, require_identifier};
use crate::{rlock, wlock, OmrError, OmrResult, OmrService};

/// A registered user. `org` is empty for unaffiliated patients.
#[derive(Debug, Clone)]
pub(crate) struct User {
    pub id: String,
    pub secret: String,
    pub name: String,
    pub role: String,
    pub org: String,
    pub email: String,
    pub data: Value,
}

impl OmrService {
    /// Creates a user. Sys admin for org-less users; org admin for users
    /// within their own org.
    pub fn create_user(&self, caller: &Caller, req: dto::UserReq) -> OmrResult<dto::UserRes> {
        let id = require_identifier(&req.id, "id")?;
        let secret = require_field(&req.secret, "secret")?.to_owned();
        let name = require_field(&req.name, "name")?.to_owned();
        let email = require_field(&req.email, "email")?.to_owned();
        let org = req
            .org
            .as_deref()
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(ToOwned::to_owned);

        match &org {
            None => {
                if !self.is_sys(caller) {
                    return Err(OmrError::denied(
                        "only the sys admin may create unaffiliated users",
                    ));
                }
            }
            Some(org_id) => {
                {
                    let identity = rlock(&self.state.identity);
                    if !identity.orgs.contains_key(org_id) {
                        return Err(OmrError::not_found("Organization"));
                    }
                }
                if !self.is_org_admin(caller, org_id) {
                    return Err(OmrError::denied(
                        "caller is not an admin of the user's organization",
                    ));
                }
            }
        }

        {
            let identity = rlock(&self.state.identity);
            if identity.users.contains_key(&id) {
                return Err(OmrError::Conflict(
                    "error: existing user with same id found".into(),
                ));
            }
        }

        self.state
            .ca
            .enroll(&id, &secret)
            .map_err(|e| OmrError::Backend(e.to_string()))?;

        let user = User {
            id: id.clone(),
            secret: secret.clone(),
            name,
            role: "user".into(),
            org: org.unwrap_or_default(),
            email,
            data: req.data.unwrap_or(Value::Null),
        };
        let view = self.user_view(&user, true);
        {
            let mut identity = wlock(&self.state.identity);
            identity.tokens.insert(secret, Caller::User(id.clone()));
            identity.users.insert(id.clone(), user);
        }
        tracing::info!("registered user {id}");
        Ok(view)
    }

    /// Fetches a user. Private fields are visible to the user themself, the
    /// sys admin, and admins of the user's org; `solution_info` is always
    /// derived from the current grant table.
    pub fn get_user(&self, caller: &Caller, id: &str) -> OmrResult<dto::UserRes> {
        let user = {
            let identity = rlock(&self.state.identity);
            identity
                .users
                .get(id)
                .cloned()
                .ok_or_else(|| OmrError::not_found("User"))?
        };
        let full = matches!(caller, Caller::User(u) if u == id)
            || self.is_sys(caller)
            || (!user.org.is_empty() && self.is_org_admin(caller, &user.org));
        Ok(self.user_view(&user, full))
    }

    /// Grants an admin permission to a user.
    ///
    /// `kind=org` requires the caller to administer the org and the user to
    /// belong to it; `kind=service` requires the caller to administer the
    /// service or its owning org.
    pub fn grant_permission(
        &self,
        caller: &Caller,
        user_id: &str,
        req: dto::PermissionReq,
    ) -> OmrResult<dto::UserRes> {
        let (kind, scope_id) = self.check_permission_change(caller, user_id, &req)?;
        {
            let mut identity = wlock(&self.state.identity);
            let grants = identity.grants.entry(user_id.to_owned()).or_default();
            match kind.as_str() {
                "org" => grants.org_admin_of.insert(scope_id.clone()),
                _ => grants.service_admin_of.insert(scope_id.clone()),
            };
        }
        tracing::info!("granted {kind} admin of {scope_id} to {user_id}");
        self.get_user(caller, user_id)
    }

    /// Revokes an admin permission from a user. Takes effect on the next
    /// authorization check; nothing is cached.
    pub fn revoke_permission(
        &self,
        caller: &Caller,
        user_id: &str,
        req: dto::PermissionReq,
    ) -> OmrResult<dto::UserRes> {
        let (kind, scope_id) = self.check_permission_change(caller, user_id, &req)?;
        {
            let mut identity = wlock(&self.state.identity);
            if let Some(grants) = identity.grants.get_mut(user_id) {
                match kind.as_str() {
                    "org" => grants.org_admin_of.remove(&scope_id),
                    _ => grants.service_admin_of.remove(&scope_id),
                };
            }
        }
        tracing::info!("revoked {kind} admin of {scope_id} from {user_id}");
        self.get_user(caller, user_id)
    }

    /// Validates and authorizes a grant/revoke request; returns (kind, scope).
    fn check_permission_change(
        &self,
        caller: &Caller,
        user_id: &str,
        req: &dto::PermissionReq,
    ) -> OmrResult<(String, String)> {
        let kind = require_field(&req.kind, "kind")?.to_owned();
        let scope_id = require_field(&req.scope_id, "scope_id")?.to_owned();

        let user_org = {
            let identity = rlock(&self.state.identity);
            identity
                .users
                .get(user_id)
                .map(|u| u.org.clone())
                .ok_or_else(|| OmrError::not_found("User"))?
        };

        match kind.as_str() {
            "org" => {
                {
                    let identity = rlock(&self.state.identity);
                    if !identity.orgs.contains_key(&scope_id) {
                        return Err(OmrError::not_found("Organization"));
                    }
                }
                if user_org != scope_id {
                    return Err(OmrError::denied(
                        "user does not belong to the target organization",
                    ));
                }
                if !self.is_org_admin(caller, &scope_id) {
                    return Err(OmrError::denied(
                        "caller is not an admin of the target organization",
                    ));
                }
            }
            "service" => {
                let owning_org = self
                    .service_org(&scope_id)
                    .ok_or_else(|| OmrError::not_found("Service"))?;
                let authorized = self.is_org_admin(caller, &owning_org)
                    || matches!(caller, Caller::Service(s) if *s == scope_id);
                if !authorized {
                    return Err(OmrError::denied(
                        "caller is not authorized for the target service",
                    ));
                }
            }
            _ => {
                return Err(OmrError::Validation(
                    "Invalid data: invalid permission kind".into(),
                ));
            }
        }
        Ok((kind, scope_id))
    }

    fn user_view(&self, user: &User, full: bool) -> dto::UserRes {
        let grants = {
            let identity = rlock(&self.state.identity);
            identity.grants_for(&user.id)
        };
        dto::UserRes {
            id: user.id.clone(),
            name: user.name.clone(),
            role: user.role.clone(),
            org: user.org.clone(),
            email: if full { user.email.clone() } else { String::new() },
            secret: if full { user.secret.clone() } else { String::new() },
            data: user.data.clone(),
            solution_info: dto::SolutionInfo {
                is_org_admin: !grants.org_admin_of.is_empty(),
                service_admins: grants.service_admin_of.into_iter().collect(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_org_service, service, sys, user_req};

    #[test]
    fn test_orgless_user_requires_sys_admin() {
        let svc = service();
        let (org_admin, _) = seed_org_service(&svc);
        let err = svc
            .create_user(&org_admin, user_req("patient1", None))
            .expect_err("org admin must not create unaffiliated users");
        assert!(matches!(err, OmrError::Denied(_)));

        let sys_caller = sys(&svc);
        let created = svc
            .create_user(&sys_caller, user_req("patient1", None))
            .expect("sys admin should create unaffiliated users");
        assert_eq!(created.role, "user");
        assert_eq!(created.org, "");
    }

    #[test]
    fn test_org_user_requires_admin_of_that_org() {
        let svc = service();
        let (org_admin, _) = seed_org_service(&svc);
        let sys_caller = sys(&svc);

        let err = svc
            .create_user(&sys_caller, user_req("member1", Some("org1")))
            .expect_err("sys admin must not create org members");
        assert!(matches!(err, OmrError::Denied(_)));

        svc.create_user(&org_admin, user_req("member1", Some("org1")))
            .expect("org admin should create members of their org");
    }

    #[test]
    fn test_create_user_rejects_unknown_org() {
        let svc = service();
        let sys_caller = sys(&svc);
        let err = svc
            .create_user(&sys_caller, user_req("member1", Some("ghost")))
            .expect_err("unknown org should fail");
        assert_eq!(err.to_string(), "Organization not found");
    }

    #[test]
    fn test_solution_info_tracks_grants() {
        let svc = service();
        let (org_admin, _) = seed_org_service(&svc);
        svc.create_user(&org_admin, user_req("member1", Some("org1")))
            .expect("member should register");

        let grant = dto::PermissionReq {
            kind: Some("service".into()),
            scope_id: Some("svc1".into()),
        };
        let view = svc
            .grant_permission(&org_admin, "member1", grant.clone())
            .expect("grant should succeed");
        assert_eq!(view.solution_info.service_admins, vec!["svc1".to_string()]);
        assert!(!view.solution_info.is_org_admin);

        let view = svc
            .grant_permission(
                &org_admin,
                "member1",
                dto::PermissionReq {
                    kind: Some("org".into()),
                    scope_id: Some("org1".into()),
                },
            )
            .expect("org grant should succeed");
        assert!(view.solution_info.is_org_admin);

        let view = svc
            .revoke_permission(&org_admin, "member1", grant)
            .expect("revoke should succeed");
        assert!(view.solution_info.service_admins.is_empty());
    }

    #[test]
    fn test_org_grant_requires_membership() {
        let svc = service();
        let (org_admin, _) = seed_org_service(&svc);
        let sys_caller = sys(&svc);
        svc.create_user(&sys_caller, user_req("patient1", None))
            .expect("patient should register");

        let err = svc
            .grant_permission(
                &org_admin,
                "patient1",
                dto::PermissionReq {
                    kind: Some("org".into()),
                    scope_id: Some("org1".into()),
                },
            )
            .expect_err("grant to non-member should fail");
        assert!(matches!(err, OmrError::Denied(_)));
    }

    #[test]
    fn test_get_user_redacts_for_outsiders() {
        let svc = service();
        let (org_admin, svc_admin) = seed_org_service(&svc);
        svc.create_user(&org_admin, user_req("member1", Some("org1")))
            .expect("member should register");

        let seen_by_admin = svc
            .get_user(&org_admin, "member1")
            .expect("get should succeed");
        assert_eq!(seen_by_admin.secret, "member1-secret");

        let seen_by_service = svc
            .get_user(&svc_admin, "member1")
            .expect("get should succeed");
        assert_eq!(seen_by_service.secret, "");
        assert_eq!(seen_by_service.email, "");
    }

    #[test]
    fn test_get_unknown_user_is_not_found() {
        let svc = service();
        let sys_caller = sys(&svc);
        let err = svc
            .get_user(&sys_caller, "ghost")
            .expect_err("unknown user should 404");
        assert_eq!(err.to_string(), "User not found");
    }
}
