//! Caller resolution and authorization scope checks.
//!
//! A bearer token resolves to exactly one principal: the sys admin, an org's
//! default admin credential, a service's default admin credential, or a user.
//! A user's effective admin roles come from an explicit grant table keyed by
//! `(user_id, scope)` rather than mutable flags on the user record, so
//! revocation takes effect on the next check with nothing to invalidate.
//!
//! Helpers here acquire and release their own locks; operations call them
//! before taking any store guard of their own.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::OmrError;
use crate::{org::Org, rlock, user::User, OmrResult, OmrService};

/// A resolved caller principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// The top-level sys admin.
    Sys,
    /// An org's default admin credential.
    Org(String),
    /// A service's default admin credential.
    Service(String),
    /// A registered user; admin roles, if any, come from the grant table.
    User(String),
}

impl Caller {
    /// The id the principal acts as. The sys admin has no entity id.
    pub fn id(&self) -> &str {
        match self {
            Caller::Sys => "sys",
            Caller::Org(id) | Caller::Service(id) | Caller::User(id) => id,
        }
    }
}

/// Admin permissions granted to a user.
#[derive(Debug, Default, Clone)]
pub(crate) struct Grants {
    pub org_admin_of: BTreeSet<String>,
    pub service_admin_of: BTreeSet<String>,
}

/// Orgs, users, their grant table, and the credential directory.
#[derive(Default)]
pub(crate) struct IdentityStore {
    pub orgs: BTreeMap<String, Org>,
    pub users: BTreeMap<String, User>,
    pub grants: BTreeMap<String, Grants>,
    pub tokens: BTreeMap<String, Caller>,
}

impl IdentityStore {
    pub(crate) fn grants_for(&self, user_id: &str) -> Grants {
        self.grants.get(user_id).cloned().unwrap_or_default()
    }
}

impl OmrService {
    /// Resolves a bearer token to a caller principal.
    ///
    /// # Errors
    ///
    /// Returns `OmrError::Denied` for an unknown token; credential failures
    /// share the generic 500 envelope with other authorization failures.
    pub fn resolve_token(&self, token: &str) -> OmrResult<Caller> {
        if token == self.state.cfg.sys_admin_token() {
            return Ok(Caller::Sys);
        }
        let identity = rlock(&self.state.identity);
        identity
            .tokens
            .get(token)
            .cloned()
            .ok_or_else(|| OmrError::denied("invalid credential"))
    }

    /// Orgs the caller administers.
    pub(crate) fn admin_orgs(&self, caller: &Caller) -> BTreeSet<String> {
        match caller {
            Caller::Org(org_id) => BTreeSet::from([org_id.clone()]),
            Caller::User(user_id) => {
                let identity = rlock(&self.state.identity);
                identity.grants_for(user_id).org_admin_of
            }
            Caller::Sys | Caller::Service(_) => BTreeSet::new(),
        }
    }

    /// Services the caller administers directly (default credential or
    /// delegated grant); org-admin authority is not included here.
    pub(crate) fn admin_services(&self, caller: &Caller) -> BTreeSet<String> {
        match caller {
            Caller::Service(service_id) => BTreeSet::from([service_id.clone()]),
            Caller::User(user_id) => {
                let identity = rlock(&self.state.identity);
                identity.grants_for(user_id).service_admin_of
            }
            Caller::Sys | Caller::Org(_) => BTreeSet::new(),
        }
    }

    pub(crate) fn is_sys(&self, caller: &Caller) -> bool {
        matches!(caller, Caller::Sys)
    }

    /// Whether the caller is an org admin of the given org.
    pub(crate) fn is_org_admin(&self, caller: &Caller, org_id: &str) -> bool {
        match caller {
            Caller::Org(id) => id == org_id,
            Caller::User(user_id) => {
                let identity = rlock(&self.state.identity);
                identity.grants_for(user_id).org_admin_of.contains(org_id)
            }
            Caller::Sys | Caller::Service(_) => false,
        }
    }

    /// Whether the caller is an org admin of any org. Datatype registration
    /// is open to every org admin regardless of org.
    pub(crate) fn is_any_org_admin(&self, caller: &Caller) -> bool {
        match caller {
            Caller::Org(_) => true,
            Caller::User(user_id) => {
                let identity = rlock(&self.state.identity);
                !identity.grants_for(user_id).org_admin_of.is_empty()
            }
            Caller::Sys | Caller::Service(_) => false,
        }
    }

    /// Whether the caller is a service admin of the given service: its
    /// default credential or a user holding a service-admin grant.
    pub(crate) fn is_service_admin(&self, caller: &Caller, service_id: &str) -> bool {
        match caller {
            Caller::Service(id) => id == service_id,
            Caller::User(user_id) => {
                let identity = rlock(&self.state.identity);
                identity
                    .grants_for(user_id)
                    .service_admin_of
                    .contains(service_id)
            }
            Caller::Sys | Caller::Org(_) => false,
        }
    }

    /// The org owning a service, if the service exists.
    pub(crate) fn service_org(&self, service_id: &str) -> Option<String> {
        let services = rlock(&self.state.services);
        services.get(service_id).map(|s| s.org_id.clone())
    }

    /// Whether the caller may act for a service: service admin of it, or org
    /// admin of its owning org.
    pub(crate) fn is_service_actor(&self, caller: &Caller, service_id: &str) -> bool {
        if self.is_service_admin(caller, service_id) {
            return true;
        }
        match self.service_org(service_id) {
            Some(org_id) => self.is_org_admin(caller, &org_id),
            None => false,
        }
    }

    pub(crate) fn register_token(&self, secret: &str, principal: Caller) {
        let mut identity = crate::wlock(&self.state.identity);
        identity.tokens.insert(secret.to_owned(), principal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_org_service, service, SYS_TOKEN};
    use api_shared::dto;

    #[test]
    fn test_sys_token_resolves_to_sys() {
        let svc = service();
        let caller = svc.resolve_token(SYS_TOKEN).expect("should resolve");
        assert_eq!(caller, Caller::Sys);
    }

    #[test]
    fn test_unknown_token_is_denied() {
        let svc = service();
        let err = svc
            .resolve_token("no-such-token")
            .expect_err("unknown token should be rejected");
        assert!(matches!(err, OmrError::Denied(_)));
    }

    #[test]
    fn test_org_secret_resolves_to_org_admin() {
        let svc = service();
        seed_org_service(&svc);
        let caller = svc
            .resolve_token("org1-secret")
            .expect("org secret should resolve");
        assert_eq!(caller, Caller::Org("org1".into()));
        assert!(svc.is_org_admin(&caller, "org1"));
        assert!(!svc.is_org_admin(&caller, "org2"));
    }

    #[test]
    fn test_service_secret_is_service_actor_but_not_org_admin() {
        let svc = service();
        let (_, svc_admin) = seed_org_service(&svc);
        assert!(svc.is_service_admin(&svc_admin, "svc1"));
        assert!(svc.is_service_actor(&svc_admin, "svc1"));
        assert!(!svc.is_org_admin(&svc_admin, "org1"));
    }

    #[test]
    fn test_org_admin_is_service_actor_for_owned_service() {
        let svc = service();
        let (org_admin, _) = seed_org_service(&svc);
        assert!(svc.is_service_actor(&org_admin, "svc1"));
        assert!(!svc.is_service_admin(&org_admin, "svc1"));
    }

    #[test]
    fn test_delegated_grant_makes_user_service_admin() {
        let svc = service();
        let (org_admin, _) = seed_org_service(&svc);
        svc.create_user(&org_admin, crate::test_support::user_req("delegate", Some("org1")))
            .expect("delegate user should register");
        let delegate = svc
            .resolve_token("delegate-secret")
            .expect("delegate secret should resolve");
        assert!(!svc.is_service_admin(&delegate, "svc1"));

        svc.grant_permission(
            &org_admin,
            "delegate",
            dto::PermissionReq {
                kind: Some("service".into()),
                scope_id: Some("svc1".into()),
            },
        )
        .expect("grant should succeed");
        assert!(svc.is_service_admin(&delegate, "svc1"));

        svc.revoke_permission(
            &org_admin,
            "delegate",
            dto::PermissionReq {
                kind: Some("service".into()),
                scope_id: Some("svc1".into()),
            },
        )
        .expect("revoke should succeed");
        assert!(!svc.is_service_admin(&delegate, "svc1"));
    }
}
