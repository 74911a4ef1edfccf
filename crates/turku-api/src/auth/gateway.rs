//! Credential checks shared by every protocol operation.
//!
//! Every failure here surfaces as the same [`AuthError::BadAuth`], whether
//! the entity is unknown, disabled, or presented the wrong secret.

use serde::Deserialize;
use tracing::warn;

use super::password::SecretHasher;
use crate::storage::{AuthCredential, DatabaseError, Machine, SecretKind, StorageUnit, TurkuDatabase};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Bad auth")]
    BadAuth,

    #[error("Secret hashing failed: {0}")]
    Hash(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Registration secret presented when creating a machine or storage unit.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RegistrationAuth {
    /// `{"name": ..., "secret": ...}`
    Named {
        name: Option<String>,
        secret: Option<String>,
    },
    /// A bare secret, checked against every active credential of the kind.
    ///
    /// Deprecated: clients should send the named form.
    Legacy(String),
}

/// An entity that logs in with its own secret.
pub trait SecretHolder {
    fn secret_hash(&self) -> &str;
    fn is_active(&self) -> bool;
}

impl SecretHolder for Machine {
    fn secret_hash(&self) -> &str {
        &self.secret_hash
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

impl SecretHolder for StorageUnit {
    fn secret_hash(&self) -> &str {
        &self.secret_hash
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

/// Check an entity's own secret.
///
/// A missing entity is `Ok(None)` when the caller may go on to register
/// it, otherwise a failure. A disabled entity or a wrong secret is always
/// a failure.
pub fn check_login<T: SecretHolder>(
    hasher: &SecretHasher,
    found: Option<T>,
    secret: &str,
    allow_create: bool,
) -> Result<Option<T>, AuthError> {
    match found {
        None if allow_create => Ok(None),
        None => Err(AuthError::BadAuth),
        Some(entity) if !entity.is_active() => Err(AuthError::BadAuth),
        Some(entity) => {
            if hasher.verify(secret, entity.secret_hash()) {
                Ok(Some(entity))
            } else {
                Err(AuthError::BadAuth)
            }
        }
    }
}

/// Find the active registration credential matching `auth`.
pub async fn resolve_registration_auth(
    db: &TurkuDatabase,
    hasher: &SecretHasher,
    kind: SecretKind,
    auth: Option<&RegistrationAuth>,
) -> Result<AuthCredential, AuthError> {
    match auth {
        Some(RegistrationAuth::Named {
            name: Some(name),
            secret: Some(secret),
        }) => {
            let Some(credential) = db.get_active_auth(name, kind).await? else {
                warn!(kind = kind.as_str(), auth_name = %name, "Unknown registration auth");
                return Err(AuthError::BadAuth);
            };
            if hasher.verify(secret, &credential.secret_hash) {
                Ok(credential)
            } else {
                warn!(kind = kind.as_str(), auth_name = %name, "Bad registration secret");
                Err(AuthError::BadAuth)
            }
        }
        Some(RegistrationAuth::Legacy(secret)) => {
            warn!(kind = kind.as_str(), "Deprecated bare registration secret");
            db.list_active_auths(kind)
                .await?
                .into_iter()
                .find(|credential| hasher.verify(secret, &credential.secret_hash))
                .ok_or_else(|| {
                    warn!(kind = kind.as_str(), "Bare registration secret matched nothing");
                    AuthError::BadAuth
                })
        }
        _ => {
            warn!(kind = kind.as_str(), "Registration auth missing");
            Err(AuthError::BadAuth)
        }
    }
}
