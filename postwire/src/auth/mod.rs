//! Authentication mechanisms.
//!
//! Supported methods are trust, cleartext password, MD5 password, and
//! SCRAM-SHA-256 without channel binding. Kerberos, GSSAPI and SSPI are
//! rejected with [`AuthError::Unsupported`].
use md5::{Digest, Md5};
use std::{borrow::Cow, fmt};

use crate::postgres::DatabaseError;

mod scram;

pub use scram::{ScramClient, SCRAM_SHA_256};

/// Compute the response for an MD5 password challenge.
///
/// `concat('md5', md5(concat(md5(concat(password, username)), random-salt)))`
pub fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let mut md5 = Md5::new();
    md5.update(password.as_bytes());
    md5.update(user.as_bytes());
    let inner = format!("{:x}", md5.finalize_reset());

    md5.update(inner.as_bytes());
    md5.update(salt);
    format!("md5{:x}", md5.finalize())
}

/// An error during authentication exchange.
///
/// Authentication failure always terminate the session.
pub enum AuthError {
    /// Server requested an authentication method this library does not implement.
    Unsupported(Cow<'static, str>),
    /// Server requested a password but none configured.
    MissingPassword,
    /// SCRAM exchange failed, including server signature mismatch.
    Scram(Cow<'static, str>),
    /// Server rejected the startup, such as wrong password or unknown database.
    Rejected(DatabaseError),
}

impl std::error::Error for AuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AuthError::Rejected(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Unsupported(method) => write!(f, "unsupported authentication method: {method}"),
            AuthError::MissingPassword => f.write_str("server requested a password but none configured"),
            AuthError::Scram(reason) => write!(f, "SCRAM authentication failed: {reason}"),
            AuthError::Rejected(err) => write!(f, "server rejected startup: {err}"),
        }
    }
}

impl fmt::Debug for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn md5_known_answer() {
        let hashed = md5_password("postgres", "password", [1, 2, 3, 4]);
        assert_eq!(hashed, "md598511ceaec347a656f032c7f2a16ef17");
        assert_ne!(hashed, md5_password("postgres", "password", [4, 3, 2, 1]));
    }

    #[test]
    fn md5_inner_digest() {
        let mut md5 = Md5::new();
        md5.update(b"passwordpostgres");
        assert_eq!(format!("{:x}", md5.finalize()), "32e12f215ba27cb750c9e093ce4b5127");
    }
}
