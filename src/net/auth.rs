//! Connection-level authentication
//!
//! The login HTTP service issues a credential to the browser; the realtime
//! server only ever asks an [`Authenticator`] to resolve it.

use async_trait::async_trait;

use crate::game::state::UserId;
use crate::persistence::store::StoreError;

/// A credential that resolved to a logged-in account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedUser {
    pub user_id: UserId,
    pub session_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Credential missing or malformed")]
    Malformed,
    #[error("Credential unknown or expired")]
    Rejected,
    #[error("Credential lookup failed: {0}")]
    Store(#[from] StoreError),
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<VerifiedUser, AuthError>;
}

/// Reject obviously bad credentials before touching the store
pub fn check_credential_shape(credential: &str) -> Result<&str, AuthError> {
    let trimmed = credential.trim();
    if trimmed.is_empty()
        || trimmed.len() > 256
        || !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '/' | '=' | '.'))
    {
        return Err(AuthError::Malformed);
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_shape_accepts_tokens() {
        assert_eq!(check_credential_shape(" abc-123_XYZ= ").unwrap(), "abc-123_XYZ=");
        assert!(check_credential_shape("s3cr3t.token/with+base64==").is_ok());
    }

    #[test]
    fn test_credential_shape_rejects_garbage() {
        assert!(matches!(check_credential_shape(""), Err(AuthError::Malformed)));
        assert!(matches!(check_credential_shape("   "), Err(AuthError::Malformed)));
        assert!(matches!(
            check_credential_shape("'; DROP TABLE users; --"),
            Err(AuthError::Malformed)
        ));
        let long = "a".repeat(300);
        assert!(matches!(check_credential_shape(&long), Err(AuthError::Malformed)));
    }
}
