use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Health check response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// Simple health service used by the REST API.
///
/// Provides a standardised way to check the health status of the OMR system.
#[derive(Clone)]
pub struct HealthService;

impl HealthService {
    /// Creates a new instance of HealthService.
    pub fn new() -> Self {
        Self
    }

    /// Static method to check health without creating an instance.
    ///
    /// # Returns
    /// A `HealthRes` indicating the service is healthy.
    pub fn check_health() -> HealthRes {
        HealthRes {
            ok: true,
            message: "OMR is alive".into(),
        }
    }
}

impl Default for HealthService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_health_reports_ok() {
        let res = HealthService::check_health();
        assert!(res.ok);
        assert_eq!(res.message, "OMR is alive");
    }
}
