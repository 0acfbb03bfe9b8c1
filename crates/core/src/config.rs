//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the
//! core service. The intent is to avoid reading process-wide environment
//! variables during request handling, which can lead to inconsistent behaviour
//! in multi-threaded runtimes and test harnesses.

use crate::{OmrError, OmrResult};

/// Default number of audit entries returned when a query gives no `max_num`.
pub const DEFAULT_AUDIT_PAGE_SIZE: usize = 20;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    sys_admin_token: String,
    audit_page_size: usize,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns `OmrError::Validation` if the sys admin token is empty or the
    /// audit page size is zero.
    pub fn new(sys_admin_token: impl Into<String>, audit_page_size: usize) -> OmrResult<Self> {
        let sys_admin_token = sys_admin_token.into();
        if sys_admin_token.trim().is_empty() {
            return Err(OmrError::Validation(
                "sys_admin_token cannot be empty".into(),
            ));
        }
        if audit_page_size == 0 {
            return Err(OmrError::Validation(
                "audit_page_size must be at least 1".into(),
            ));
        }
        Ok(Self {
            sys_admin_token,
            audit_page_size,
        })
    }

    /// The bearer token that resolves to the sys admin principal.
    pub fn sys_admin_token(&self) -> &str {
        &self.sys_admin_token
    }

    /// Maximum audit entries returned when a query gives no explicit limit.
    pub fn audit_page_size(&self) -> usize {
        self.audit_page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_accepts_valid_configuration() {
        let cfg = CoreConfig::new("sys-token", DEFAULT_AUDIT_PAGE_SIZE)
            .expect("valid configuration should be accepted");
        assert_eq!(cfg.sys_admin_token(), "sys-token");
        assert_eq!(cfg.audit_page_size(), DEFAULT_AUDIT_PAGE_SIZE);
    }

    #[test]
    fn test_new_rejects_empty_token() {
        let err = CoreConfig::new("  ", 20).expect_err("empty token should be rejected");
        assert!(matches!(err, OmrError::Validation(_)));
    }

    #[test]
    fn test_new_rejects_zero_page_size() {
        let err = CoreConfig::new("sys-token", 0).expect_err("zero page size should be rejected");
        assert!(matches!(err, OmrError::Validation(_)));
    }
}
