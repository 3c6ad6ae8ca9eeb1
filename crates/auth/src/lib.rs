//! `agrotrack-auth` — authentication and ownership authorization primitives.
//!
//! This crate is intentionally decoupled from HTTP and storage.

pub mod claims;
pub mod credentials;
pub mod jwt;
pub mod ownership;

pub use claims::{TokenClaims, TokenValidationError, validate_claims};
pub use credentials::{Argon2Hasher, CredentialError, CredentialHasher, HashCost};
pub use jwt::{Hs256JwtValidator, JwtIssuer, JwtValidator};
pub use ownership::{OwnershipError, authorize_owner};
