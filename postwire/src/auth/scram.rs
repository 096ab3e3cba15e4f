//! SCRAM-SHA-256 authentication, RFC 5802 and RFC 7677.
//!
//! Channel binding is not supported, the client always send the `n,,` gs2 header.
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::borrow::Cow;

use super::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// Mechanism name sent in `SASLInitialResponse`.
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// Highest iteration count accepted from the server.
const MAX_ITERATIONS: u32 = 1 << 20;

/// SCRAM-SHA-256 client state.
///
/// Holds the client nonce and first message needed for the authentication exchange.
#[derive(Debug, Clone)]
pub struct ScramClient {
    /// Base64-encoded client nonce (18 random bytes)
    pub client_nonce_b64: String,
    /// Client-first-message-bare (without gs2 header)
    pub client_first_bare: String,
    /// Complete client-first-message to send to server
    pub client_first: String,
}

impl ScramClient {
    /// Create a new SCRAM client with a random nonce.
    pub fn new(username: &str) -> ScramClient {
        let mut nonce = [0u8; 18];
        rand::rng().fill_bytes(&mut nonce);
        Self::with_nonce(username, &B64.encode(nonce))
    }

    /// Create a SCRAM client with a specific nonce.
    pub(crate) fn with_nonce(username: &str, nonce_b64: &str) -> ScramClient {
        let user = sasl_escape_username(username);
        let client_first_bare = format!("n={user},r={nonce_b64}");
        let client_first = format!("n,,{client_first_bare}");

        ScramClient {
            client_nonce_b64: nonce_b64.to_string(),
            client_first_bare,
            client_first,
        }
    }

    /// Parse server-first-message into combined nonce, base64 salt, and iteration count.
    fn parse_server_first(server_first: &str) -> Result<(&str, &str, u32), AuthError> {
        let mut r = None;
        let mut s = None;
        let mut i = None;

        for part in server_first.split(',') {
            if let Some(v) = part.strip_prefix("r=") {
                r = Some(v);
            } else if let Some(v) = part.strip_prefix("s=") {
                s = Some(v);
            } else if let Some(v) = part.strip_prefix("i=") {
                i = v.parse::<u32>().ok();
            }
        }

        let i = i
            .filter(|i| *i > 0)
            .ok_or_else(|| scram_error("server-first missing or invalid iteration count (i=)"))?;
        if i > MAX_ITERATIONS {
            return Err(scram_error(format!("iteration count {i} exceeds {MAX_ITERATIONS}")));
        }

        Ok((
            r.ok_or_else(|| scram_error("server-first missing nonce (r=)"))?,
            s.ok_or_else(|| scram_error("server-first missing salt (s=)"))?,
            i,
        ))
    }

    /// Compute client-final-message.
    ///
    /// Returns the message to send, the auth message and the salted password,
    /// the later two are required by [`verify_server_final`][ScramClient::verify_server_final].
    pub fn client_final(
        &self,
        password: &str,
        server_first: &str,
    ) -> Result<(String, String, Vec<u8>), AuthError> {
        let (rnonce, salt_b64, iters) = Self::parse_server_first(server_first)?;

        // server nonce must extend our nonce
        if !rnonce.starts_with(&self.client_nonce_b64) || rnonce.len() == self.client_nonce_b64.len() {
            return Err(scram_error("nonce mismatch"));
        }

        let salt = B64
            .decode(salt_b64.as_bytes())
            .map_err(|e| scram_error(format!("invalid salt base64: {e}")))?;

        // "biws" = base64("n,,")
        let client_final_wo_proof = format!("c=biws,r={rnonce}");

        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, client_final_wo_proof
        );

        // passwords that fail SASLprep are used as is
        let password = stringprep::saslprep(password).unwrap_or(Cow::Borrowed(password));

        let salted_password = hi_sha256(password.as_bytes(), &salt, iters);
        let client_key = hmac_sha256(&salted_password, b"Client Key");
        let stored_key = Sha256::digest(&client_key);

        let client_sig = hmac_sha256(stored_key.as_slice(), auth_message.as_bytes());
        let proof = xor_bytes(&client_key, &client_sig);
        let proof_b64 = B64.encode(proof);

        let client_final = format!("{client_final_wo_proof},p={proof_b64}");
        Ok((client_final, auth_message, salted_password))
    }

    /// Verify server-final-message, proving the server also knows the password.
    pub fn verify_server_final(
        server_final: &str,
        salted_password: &[u8],
        auth_message: &str,
    ) -> Result<(), AuthError> {
        if let Some(err) = server_final.split(',').find_map(|p| p.strip_prefix("e=")) {
            return Err(scram_error(format!("server error: {err}")));
        }

        let v = server_final
            .split(',')
            .find_map(|p| p.strip_prefix("v="))
            .ok_or_else(|| scram_error("server-final missing signature (v=)"))?;

        let server_sig = B64
            .decode(v.trim().as_bytes())
            .map_err(|e| scram_error(format!("invalid server signature base64: {e}")))?;

        let server_key = hmac_sha256(salted_password, b"Server Key");
        let expected = hmac_sha256(&server_key, auth_message.as_bytes());

        if !constant_time_eq(&server_sig, &expected) {
            return Err(scram_error("server signature mismatch"));
        }

        Ok(())
    }
}

fn scram_error(reason: impl Into<Cow<'static, str>>) -> AuthError {
    AuthError::Scram(reason.into())
}

/// Escapes `=` as `=3D` and `,` as `=2C`.
fn sasl_escape_username(u: &str) -> String {
    u.replace('=', "=3D").replace(',', "=2C")
}

/// Hi() function from RFC 5802, PBKDF2-HMAC-SHA256.
fn hi_sha256(password: &[u8], salt: &[u8], iters: u32) -> Vec<u8> {
    // U1 = HMAC(password, salt || INT(1))
    let mut s1 = Vec::with_capacity(salt.len() + 4);
    s1.extend_from_slice(salt);
    s1.extend_from_slice(&1u32.to_be_bytes());

    let mut u = hmac_sha256(password, &s1);
    let mut out = u.clone();

    // Ui = HMAC(password, U(i-1)), result = U1 XOR U2 XOR ... XOR Ui
    for _ in 1..iters {
        u = hmac_sha256(password, &u);
        for (o, ui) in out.iter_mut().zip(u.iter()) {
            *o ^= *ui;
        }
    }

    out
}

fn hmac_sha256(key: &[u8], msg: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC key length is always valid");
    mac.update(msg);
    mac.finalize().into_bytes().to_vec()
}

fn xor_bytes(a: &[u8], b: &[u8]) -> Vec<u8> {
    debug_assert_eq!(a.len(), b.len(), "XOR operands must have equal length");
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let result = a
        .iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));

    result == 0
}

#[cfg(test)]
mod test {
    use super::*;

    // RFC 7677 section 3 test vector
    const NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const SERVER_FIRST: &str =
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
    const CLIENT_FINAL: &str =
        "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ=";
    const SERVER_FINAL: &str = "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";

    #[test]
    fn rfc7677_exchange() {
        let client = ScramClient::with_nonce("user", NONCE);
        assert_eq!(client.client_first, "n,,n=user,r=rOprNGfwEbeRWgbNEkqO");

        let (client_final, auth_message, salted) = client.client_final("pencil", SERVER_FIRST).unwrap();
        assert_eq!(client_final, CLIENT_FINAL);

        ScramClient::verify_server_final(SERVER_FINAL, &salted, &auth_message).unwrap();
    }

    #[test]
    fn wrong_server_signature() {
        let client = ScramClient::with_nonce("user", NONCE);
        let (_, auth_message, salted) = client.client_final("pencil", SERVER_FIRST).unwrap();
        let forged = "v=AAAATRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";
        assert!(ScramClient::verify_server_final(forged, &salted, &auth_message).is_err());
    }

    #[test]
    fn server_error_attribute() {
        let err = ScramClient::verify_server_final("e=invalid-proof", &[], "").unwrap_err();
        assert!(err.to_string().contains("invalid-proof"));
    }

    #[test]
    fn nonce_must_extend_client_nonce() {
        let client = ScramClient::with_nonce("user", NONCE);
        assert!(client.client_final("pencil", "r=other,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096").is_err());
    }

    #[test]
    fn iteration_count_is_bounded() {
        let client = ScramClient::with_nonce("user", NONCE);
        let server_first = format!("r={NONCE}srv,s=W22ZaJ0SNY7soEsUEjb6gQ==,i={}", u32::MAX);
        let err = client.client_final("pencil", &server_first).unwrap_err();
        assert!(err.to_string().contains("iteration count"), "{err}");

        let server_first = format!("r={NONCE}srv,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=0");
        assert!(client.client_final("pencil", &server_first).is_err());
    }

    #[test]
    fn escape_username() {
        assert_eq!(sasl_escape_username("a=b,c"), "a=3Db=2Cc");
    }
}
