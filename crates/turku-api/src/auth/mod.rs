//! Authentication gateway for machines and storage units.

pub mod gateway;
pub mod password;

pub use gateway::{
    AuthError, RegistrationAuth, SecretHolder, check_login, resolve_registration_auth,
};
pub use password::SecretHasher;
