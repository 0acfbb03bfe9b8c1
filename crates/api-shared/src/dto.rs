//! Wire DTOs for the OMR API.
//!
//! Request bodies keep every field optional so the core can run its ordered
//! presence validation and produce the exact `Invalid data: <field> missing`
//! literals; serde-level rejection would lose control of both message and
//! ordering. Response types with a blank sentinel role (`OrgRes`,
//! `ServiceRes`, `DatatypeRes`, `ConsentRes`, `ContractRes`) derive `Default`
//! and are returned blank-filled, with HTTP 200, where the contract demands
//! an empty sentinel rather than an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// The error envelope used for every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorRes {
    pub msg: String,
}

// ---------------------------------------------------------------------------
// Organizations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct OrgReq {
    pub id: Option<String>,
    pub name: Option<String>,
    pub ca_org: Option<String>,
    pub secret: Option<String>,
    pub email: Option<String>,
    pub status: Option<String>,
    #[schema(value_type = Object)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct OrgRes {
    pub id: String,
    pub name: String,
    pub ca_org: String,
    pub email: String,
    pub secret: String,
    pub status: String,
    #[schema(value_type = Object)]
    pub data: Value,
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UserReq {
    pub id: Option<String>,
    pub secret: Option<String>,
    pub name: Option<String>,
    /// Empty or absent means an unaffiliated patient.
    pub org: Option<String>,
    pub email: Option<String>,
    #[schema(value_type = Object)]
    pub data: Option<Value>,
}

/// Derived admin-role view carried on a user record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SolutionInfo {
    pub is_org_admin: bool,
    pub service_admins: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UserRes {
    pub id: String,
    pub name: String,
    pub role: String,
    pub org: String,
    pub email: String,
    pub secret: String,
    #[schema(value_type = Object)]
    pub data: Value,
    pub solution_info: SolutionInfo,
}

/// Grant or revoke an admin permission for a user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PermissionReq {
    /// `org` or `service`.
    pub kind: Option<String>,
    /// The org id or service id the permission is scoped to.
    pub scope_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Datatypes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct DatatypeReq {
    pub id: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct DatatypeRes {
    pub id: String,
    pub description: String,
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ServiceDatatypeReq {
    pub datatype_id: Option<String>,
    pub access: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ServiceReq {
    pub id: Option<String>,
    pub name: Option<String>,
    pub secret: Option<String>,
    pub ca_org: Option<String>,
    pub email: Option<String>,
    pub org_id: Option<String>,
    pub summary: Option<String>,
    /// `yes` or `no`.
    pub payment_required: Option<String>,
    pub datatypes: Option<Vec<ServiceDatatypeReq>>,
    #[schema(value_type = Object)]
    pub terms: Option<Value>,
    #[schema(value_type = Object)]
    pub solution_private_data: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ServiceDatatypeRes {
    pub datatype_id: String,
    pub access: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ServiceRes {
    pub id: String,
    pub name: String,
    pub ca_org: String,
    pub email: String,
    pub secret: String,
    pub org_id: String,
    pub summary: String,
    pub payment_required: String,
    pub datatypes: Vec<ServiceDatatypeRes>,
    #[schema(value_type = Object)]
    pub terms: Value,
    #[schema(value_type = Object)]
    pub solution_private_data: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct AddDatatypeReq {
    pub service_id: Option<String>,
    pub datatype_id: Option<String>,
    pub access: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct EnrollUserReq {
    pub user_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Consents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ConsentReq {
    pub patient_id: Option<String>,
    pub service_id: Option<String>,
    pub target_id: Option<String>,
    pub datatype_id: Option<String>,
    /// Subset of `read`, `write`, `deny`; `deny` is exclusive.
    pub option: Option<Vec<String>>,
    /// Epoch milliseconds; 0 means never expires.
    pub expiration: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ConsentRes {
    pub patient_id: String,
    pub service_id: String,
    pub datatype_id: String,
    pub target_id: String,
    pub option: Vec<String>,
    pub expiration: i64,
}

/// A service that holds any consent from a user, as seen by org admins.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RequestRes {
    pub user: String,
    pub org: String,
    pub service: String,
    pub service_name: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ValidateConsentRes {
    pub owner: String,
    pub datatype: String,
    pub target: String,
    pub requested_access: String,
    pub permission_granted: bool,
    /// `permission granted` or `permission denied`.
    pub message: String,
    /// Non-empty only when permission was granted.
    pub token: String,
}

// ---------------------------------------------------------------------------
// Data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UploadDataReq {
    #[schema(value_type = Object)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct DataRecordRes {
    #[schema(value_type = Object)]
    pub data: Value,
    pub timestamp: i64,
}

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ContractReq {
    pub owner_org_id: Option<String>,
    pub owner_service_id: Option<String>,
    pub requester_org_id: Option<String>,
    pub requester_service_id: Option<String>,
    #[schema(value_type = Object)]
    pub contract_terms: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ContractRes {
    pub contract_id: String,
    pub owner_org_id: String,
    pub owner_service_id: String,
    pub requester_org_id: String,
    pub requester_service_id: String,
    pub status: String,
    #[schema(value_type = Object)]
    pub contract_terms: Value,
    #[schema(value_type = Object)]
    pub contract_details: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TermsReq {
    #[schema(value_type = Object)]
    pub contract_terms: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SignReq {
    pub signed_by: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct GrantPermissionReq {
    pub datatype_id: Option<String>,
    pub max_num_download: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TerminateReq {
    pub terminated_by: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RequesterDownloadReq {
    pub datatype_id: Option<String>,
    pub latest_only: Option<bool>,
    pub max_num: Option<usize>,
    pub start_timestamp: Option<i64>,
    pub end_timestamp: Option<i64>,
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct AuditEntryRes {
    #[serde(rename = "type")]
    #[schema(rename = "type")]
    pub entry_type: String,
    /// Redacted per type: empty for uploads/downloads, `{option}` for
    /// consent changes.
    #[schema(value_type = Object)]
    pub data: Value,
    pub patient_id: String,
    pub service_id: String,
    pub datatype_id: String,
    pub consent_owner_target_id: String,
    pub timestamp: i64,
}
