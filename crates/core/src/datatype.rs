//! Datatype registry.
//!
//! Datatypes are global, named data categories that services attach to.
//! Registration and updates are open to the sys admin and to any org admin;
//! there is no deletion. Fetching an unknown datatype returns a blank
//! sentinel, not a 404.

use api_shared::dto;

use crate::auth::Caller;
use crate::validation::{require_field, require_identifier};
use crate::{rlock, wlock, OmrError, OmrResult, OmrService};

/// A registered datatype.
#[derive(Debug, Clone)]
pub(crate) struct Datatype {
    pub id: String,
    pub description: String,
}

fn datatype_view(dt: &Datatype) -> dto::DatatypeRes {
    dto::DatatypeRes {
        id: dt.id.clone(),
        description: dt.description.clone(),
    }
}

impl OmrService {
    /// Registers a datatype. Sys admin or any org admin.
    pub fn register_datatype(
        &self,
        caller: &Caller,
        req: dto::DatatypeReq,
    ) -> OmrResult<dto::DatatypeRes> {
        let id = require_identifier(&req.id, "id")?;
        let description = require_field(&req.description, "description")?.to_owned();

        if !self.is_sys(caller) && !self.is_any_org_admin(caller) {
            return Err(OmrError::denied(
                "caller is not authorized to register datatypes",
            ));
        }

        let mut datatypes = wlock(&self.state.datatypes);
        if datatypes.contains_key(&id) {
            return Err(OmrError::Conflict(
                "error: existing datatype with same id found".into(),
            ));
        }
        let dt = Datatype {
            id: id.clone(),
            description,
        };
        let view = datatype_view(&dt);
        datatypes.insert(id, dt);
        Ok(view)
    }

    /// Updates a datatype's description. Sys admin or any org admin.
    pub fn update_datatype(
        &self,
        caller: &Caller,
        path_id: &str,
        req: dto::DatatypeReq,
    ) -> OmrResult<dto::DatatypeRes> {
        let id = require_identifier(&req.id, "id")?;
        let description = require_field(&req.description, "description")?.to_owned();
        if id != path_id {
            return Err(OmrError::Validation(
                "Invalid data: id in path does not match id in body".into(),
            ));
        }

        if !self.is_sys(caller) && !self.is_any_org_admin(caller) {
            return Err(OmrError::denied(
                "caller is not authorized to update datatypes",
            ));
        }

        let mut datatypes = wlock(&self.state.datatypes);
        let dt = datatypes
            .get_mut(&id)
            .ok_or_else(|| OmrError::not_found("Datatype"))?;
        dt.description = description;
        Ok(datatype_view(dt))
    }

    /// Fetches a datatype; blank sentinel when unknown.
    pub fn get_datatype(&self, _caller: &Caller, id: &str) -> OmrResult<dto::DatatypeRes> {
        let datatypes = rlock(&self.state.datatypes);
        Ok(datatypes.get(id).map(datatype_view).unwrap_or_default())
    }

    /// Lists all datatypes.
    pub fn list_datatypes(&self, _caller: &Caller) -> OmrResult<Vec<dto::DatatypeRes>> {
        let datatypes = rlock(&self.state.datatypes);
        Ok(datatypes.values().map(datatype_view).collect())
    }

    /// Whether a datatype exists in the registry.
    pub(crate) fn datatype_exists(&self, id: &str) -> bool {
        let datatypes = rlock(&self.state.datatypes);
        datatypes.contains_key(id)
    }
}
