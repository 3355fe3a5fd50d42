//! Shared-secret gate for the admin console and destructive resets
//!
//! This is an operator convenience, not an access-control boundary: anyone who
//! can reach the replicated document can modify it directly.

use crate::config::AdminConfig;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

pub struct AdminGate {
    secret: Zeroizing<String>,
}

impl AdminGate {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Zeroizing::new(secret.into()),
        }
    }

    pub fn from_config(config: &AdminConfig) -> Self {
        Self::new(config.secret.clone())
    }

    /// Compare a typed secret against the configured one in constant time.
    pub fn verify(&self, attempt: &str) -> bool {
        let expected = self.secret.as_bytes();
        let given = attempt.as_bytes();
        if expected.len() != given.len() {
            return false;
        }
        expected.ct_eq(given).into()
    }
}

impl std::fmt::Debug for AdminGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminGate").finish_non_exhaustive()
    }
}
