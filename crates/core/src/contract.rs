//! Data-sharing contract lifecycle.
//!
//! A contract binds an owning service to a requesting service and walks a
//! strict state machine, no skipping:
//!
//! `created -> signed -> paid -> verified -> permission-granted -> terminated`
//!
//! Owner-side admins create, change terms, verify payment, and grant
//! download permission; requester-side admins sign, pay, and download.
//! Either side may terminate from any non-terminal state. Illegal
//! transitions and authorization failures are indistinguishable on the
//! wire, both the generic 500.
//!
//! Authorization helpers take their own locks, so every transition fetches
//! the contract's side ids first, authorizes, then re-acquires the contracts
//! lock for an atomic check-and-apply. A concurrent race on the same
//! transition resolves to exactly one winner; the loser fails the state
//! check.

use std::collections::BTreeMap;

use api_shared::dto;
use serde_json::{json, Value};

use crate::audit::AuditEvent;
use crate::auth::Caller;
use crate::data::DataFilters;
use crate::validation::require_field;
use crate::{mlock, OmrError, OmrResult, OmrService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContractStatus {
    Created,
    Signed,
    Paid,
    Verified,
    PermissionGranted,
    Terminated,
}

impl ContractStatus {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Created => "created",
            ContractStatus::Signed => "signed",
            ContractStatus::Paid => "paid",
            ContractStatus::Verified => "verified",
            ContractStatus::PermissionGranted => "permission-granted",
            ContractStatus::Terminated => "terminated",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "created" => Some(ContractStatus::Created),
            "signed" => Some(ContractStatus::Signed),
            "paid" => Some(ContractStatus::Paid),
            "verified" => Some(ContractStatus::Verified),
            "permission-granted" => Some(ContractStatus::PermissionGranted),
            "terminated" => Some(ContractStatus::Terminated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Contract {
    pub id: String,
    pub owner_org_id: String,
    pub owner_service_id: String,
    pub requester_org_id: String,
    pub requester_service_id: String,
    pub status: ContractStatus,
    pub terms: Value,
    pub signed_by: String,
    pub terminated_by: String,
    /// datatype_id -> remaining downloads.
    pub permissions: BTreeMap<String, u32>,
}

fn contract_view(c: &Contract) -> dto::ContractRes {
    let permissions: Vec<Value> = c
        .permissions
        .iter()
        .map(|(dt, remaining)| json!({ "datatype_id": dt, "max_num_download": remaining }))
        .collect();
    dto::ContractRes {
        contract_id: c.id.clone(),
        owner_org_id: c.owner_org_id.clone(),
        owner_service_id: c.owner_service_id.clone(),
        requester_org_id: c.requester_org_id.clone(),
        requester_service_id: c.requester_service_id.clone(),
        status: c.status.as_str().to_owned(),
        contract_terms: c.terms.clone(),
        contract_details: json!({
            "signed_by": c.signed_by,
            "terminated_by": c.terminated_by,
            "download_permissions": permissions,
        }),
    }
}

fn state_error(contract: &Contract, attempted: &str) -> OmrError {
    OmrError::InvalidState(format!(
        "error: contract in state {} cannot be {attempted}",
        contract.status.as_str()
    ))
}

impl OmrService {
    /// Creates a contract in `created` state. Owner-side admins only; the
    /// contract is recorded on the ledger before it becomes visible.
    pub fn create_contract(
        &self,
        caller: &Caller,
        req: dto::ContractReq,
    ) -> OmrResult<dto::ContractRes> {
        let owner_org_id = require_field(&req.owner_org_id, "owner_org_id")?.to_owned();
        let owner_service_id = require_field(&req.owner_service_id, "owner_service_id")?.to_owned();
        let requester_org_id = require_field(&req.requester_org_id, "requester_org_id")?.to_owned();
        let requester_service_id =
            require_field(&req.requester_service_id, "requester_service_id")?.to_owned();

        for (service_id, org_id) in [
            (&owner_service_id, &owner_org_id),
            (&requester_service_id, &requester_org_id),
        ] {
            match self.service_org(service_id) {
                Some(org) if org == *org_id => {}
                Some(_) => {
                    return Err(OmrError::denied("service does not belong to stated org"));
                }
                None => return Err(OmrError::denied("unknown service id")),
            }
        }
        if !self.is_service_actor(caller, &owner_service_id) {
            return Err(OmrError::denied("caller is not an owner-side admin"));
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.state
            .ledger
            .record("contract", &id)
            .map_err(|e| OmrError::Backend(e.to_string()))?;

        let contract = Contract {
            id: id.clone(),
            owner_org_id,
            owner_service_id,
            requester_org_id,
            requester_service_id,
            status: ContractStatus::Created,
            terms: req.contract_terms.unwrap_or(Value::Null),
            signed_by: String::new(),
            terminated_by: String::new(),
            permissions: BTreeMap::new(),
        };
        let view = contract_view(&contract);
        {
            let mut contracts = mlock(&self.state.contracts);
            contracts.insert(id.clone(), contract);
        }
        tracing::info!("created contract {id}");
        Ok(view)
    }

    /// Replaces the terms. Owner side only, `created` state only; repeated
    /// calls stay in `created`.
    pub fn change_contract_terms(
        &self,
        caller: &Caller,
        contract_id: &str,
        req: dto::TermsReq,
    ) -> OmrResult<dto::ContractRes> {
        let (owner, _) = self.contract_sides(contract_id)?;
        if !self.is_service_actor(caller, &owner) {
            return Err(OmrError::denied("caller is not an owner-side admin"));
        }
        self.with_contract(contract_id, |c| {
            if c.status != ContractStatus::Created {
                return Err(state_error(c, "amended"));
            }
            c.terms = req.contract_terms.clone().unwrap_or(Value::Null);
            Ok(contract_view(c))
        })
    }

    /// `created -> signed`, requester side only.
    pub fn sign_contract(
        &self,
        caller: &Caller,
        contract_id: &str,
        req: dto::SignReq,
    ) -> OmrResult<dto::ContractRes> {
        let signed_by = require_field(&req.signed_by, "signed_by")?.to_owned();
        let (_, requester) = self.contract_sides(contract_id)?;
        if !self.is_service_actor(caller, &requester) {
            return Err(OmrError::denied("caller is not a requester-side admin"));
        }
        self.with_contract(contract_id, |c| {
            if c.status != ContractStatus::Created {
                return Err(state_error(c, "signed"));
            }
            c.status = ContractStatus::Signed;
            c.signed_by = signed_by.clone();
            Ok(contract_view(c))
        })
    }

    /// `signed -> paid`, requester side only.
    pub fn pay_contract(&self, caller: &Caller, contract_id: &str) -> OmrResult<dto::ContractRes> {
        let (_, requester) = self.contract_sides(contract_id)?;
        if !self.is_service_actor(caller, &requester) {
            return Err(OmrError::denied("caller is not a requester-side admin"));
        }
        self.with_contract(contract_id, |c| {
            if c.status != ContractStatus::Signed {
                return Err(state_error(c, "paid"));
            }
            c.status = ContractStatus::Paid;
            Ok(contract_view(c))
        })
    }

    /// `paid -> verified`, owner side only.
    pub fn verify_contract_payment(
        &self,
        caller: &Caller,
        contract_id: &str,
    ) -> OmrResult<dto::ContractRes> {
        let (owner, _) = self.contract_sides(contract_id)?;
        if !self.is_service_actor(caller, &owner) {
            return Err(OmrError::denied("caller is not an owner-side admin"));
        }
        self.with_contract(contract_id, |c| {
            if c.status != ContractStatus::Paid {
                return Err(state_error(c, "verified"));
            }
            c.status = ContractStatus::Verified;
            Ok(contract_view(c))
        })
    }

    /// Grants a per-datatype download budget; `verified -> permission-granted`.
    /// Owner side only; further grants for other datatypes stay in
    /// `permission-granted`.
    pub fn grant_download_permission(
        &self,
        caller: &Caller,
        contract_id: &str,
        req: dto::GrantPermissionReq,
    ) -> OmrResult<dto::ContractRes> {
        let datatype_id = require_field(&req.datatype_id, "datatype_id")?.to_owned();
        let max_num_download = req
            .max_num_download
            .ok_or_else(|| OmrError::missing("max_num_download"))?;
        if max_num_download == 0 {
            return Err(OmrError::Validation(
                "Invalid data: max_num_download must be greater than zero".into(),
            ));
        }
        let (owner, _) = self.contract_sides(contract_id)?;
        if !self.is_service_actor(caller, &owner) {
            return Err(OmrError::denied("caller is not an owner-side admin"));
        }
        if !self.service_has_datatype(&owner, &datatype_id) {
            return Err(OmrError::denied("datatype is not handled by owner service"));
        }
        self.with_contract(contract_id, |c| {
            if !matches!(
                c.status,
                ContractStatus::Verified | ContractStatus::PermissionGranted
            ) {
                return Err(state_error(c, "granted download permission"));
            }
            c.status = ContractStatus::PermissionGranted;
            c.permissions.insert(datatype_id.clone(), max_num_download);
            Ok(contract_view(c))
        })
    }

    /// Requester-side download of the owner service's data. Consumes one
    /// permission unit; the check-and-decrement is atomic under the
    /// contracts lock, so a concurrent race over the last unit admits
    /// exactly one winner.
    pub fn download_as_requester(
        &self,
        caller: &Caller,
        contract_id: &str,
        req: dto::RequesterDownloadReq,
    ) -> OmrResult<Vec<dto::DataRecordRes>> {
        let datatype_id = require_field(&req.datatype_id, "datatype_id")?.to_owned();
        let (owner, requester) = self.contract_sides(contract_id)?;
        if !self.is_service_actor(caller, &requester) {
            return Err(OmrError::denied("caller is not a requester-side admin"));
        }
        self.with_contract(contract_id, |c| {
            if c.status != ContractStatus::PermissionGranted {
                return Err(state_error(c, "downloaded from"));
            }
            match c.permissions.get_mut(&datatype_id) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    Ok(())
                }
                _ => Err(OmrError::denied("download permission exhausted")),
            }
        })?;

        let filters = DataFilters {
            latest_only: req.latest_only.unwrap_or(false),
            max_num: req.max_num,
            start_timestamp: req.start_timestamp,
            end_timestamp: req.end_timestamp,
        };
        let records = self.read_owner_data(&owner, &datatype_id, &filters);
        self.append_audit(
            AuditEvent::DownloadOwnerDataAsRequester,
            json!({}),
            "",
            &owner,
            &datatype_id,
            &requester,
        );
        Ok(records)
    }

    /// Terminal from any non-terminal state, by either side's admin.
    /// `terminated_by` must name the service of the side the caller is
    /// authorized for.
    pub fn terminate_contract(
        &self,
        caller: &Caller,
        contract_id: &str,
        req: dto::TerminateReq,
    ) -> OmrResult<dto::ContractRes> {
        let terminated_by = require_field(&req.terminated_by, "terminated_by")?.to_owned();
        let (owner, requester) = self.contract_sides(contract_id)?;
        let authorized_side = [owner, requester]
            .into_iter()
            .find(|side| *side == terminated_by && self.is_service_actor(caller, side));
        if authorized_side.is_none() {
            return Err(OmrError::denied(
                "terminated_by does not match the caller's side",
            ));
        }
        self.with_contract(contract_id, |c| {
            if c.status == ContractStatus::Terminated {
                return Err(state_error(c, "terminated"));
            }
            c.status = ContractStatus::Terminated;
            c.terminated_by = terminated_by.clone();
            Ok(contract_view(c))
        })
    }

    /// Full detail for either side's admins; blank sentinel for everyone
    /// else, unknown ids included.
    pub fn get_contract(&self, caller: &Caller, contract_id: &str) -> OmrResult<dto::ContractRes> {
        let contract = {
            let contracts = mlock(&self.state.contracts);
            contracts.get(contract_id).cloned()
        };
        let Some(contract) = contract else {
            return Ok(dto::ContractRes::default());
        };
        let related = self.is_service_actor(caller, &contract.owner_service_id)
            || self.is_service_actor(caller, &contract.requester_service_id);
        if !related {
            return Ok(dto::ContractRes::default());
        }
        Ok(contract_view(&contract))
    }

    /// Contracts where the service is the owner side. Unrelated callers get
    /// an empty list; `status="*"` or absent matches any status.
    pub fn list_contracts_by_owner(
        &self,
        caller: &Caller,
        service_id: &str,
        status: Option<&str>,
    ) -> OmrResult<Vec<dto::ContractRes>> {
        self.list_contracts(caller, service_id, status, |c| &c.owner_service_id)
    }

    /// Contracts where the service is the requester side.
    pub fn list_contracts_by_requester(
        &self,
        caller: &Caller,
        service_id: &str,
        status: Option<&str>,
    ) -> OmrResult<Vec<dto::ContractRes>> {
        self.list_contracts(caller, service_id, status, |c| &c.requester_service_id)
    }

    fn list_contracts(
        &self,
        caller: &Caller,
        service_id: &str,
        status: Option<&str>,
        side: impl Fn(&Contract) -> &String,
    ) -> OmrResult<Vec<dto::ContractRes>> {
        if !self.is_service_actor(caller, service_id) {
            return Ok(vec![]);
        }
        let wanted = match status {
            None | Some("*") => None,
            Some(raw) => match ContractStatus::parse(raw) {
                Some(s) => Some(s),
                // An unknown status matches nothing.
                None => return Ok(vec![]),
            },
        };
        let contracts = mlock(&self.state.contracts);
        Ok(contracts
            .values()
            .filter(|c| side(c) == service_id)
            .filter(|c| wanted.map_or(true, |s| c.status == s))
            .map(contract_view)
            .collect())
    }

    /// (owner_service_id, requester_service_id) of a contract. Unknown ids
    /// share the generic 500 with authorization failures.
    fn contract_sides(&self, contract_id: &str) -> OmrResult<(String, String)> {
        let contracts = mlock(&self.state.contracts);
        contracts
            .get(contract_id)
            .map(|c| (c.owner_service_id.clone(), c.requester_service_id.clone()))
            .ok_or_else(|| OmrError::denied("unknown contract id"))
    }

    /// Runs a closure against one contract under the contracts lock.
    fn with_contract<T>(
        &self,
        contract_id: &str,
        f: impl FnOnce(&mut Contract) -> OmrResult<T>,
    ) -> OmrResult<T> {
        let mut contracts = mlock(&self.state.contracts);
        let contract = contracts
            .get_mut(contract_id)
            .ok_or_else(|| OmrError::denied("unknown contract id"))?;
        f(contract)
    }
}
