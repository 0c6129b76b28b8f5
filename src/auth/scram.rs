//! SCRAM-SHA-256 client
//!
//! Implements the client side of SCRAM-SHA-256 (RFC 5802 / RFC 7677), used by
//! the digest negotiator. The optional authorization identity carries the
//! user the client acts on behalf of.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// SASL mechanism name
pub const MECHANISM: &str = "SCRAM-SHA-256";

/// Largest PBKDF2 iteration count accepted from a server
pub const MAX_ITERATIONS: u32 = 1_000_000;

/// SCRAM authentication error types
#[derive(Debug, Clone)]
pub enum ScramError {
    /// Invalid proof from server
    InvalidServerProof(String),
    /// Invalid server message format
    InvalidServerMessage(String),
    /// Server reported an error (`e=` attribute)
    ServerError(String),
    /// Base64 decoding error
    Base64Error(String),
}

impl fmt::Display for ScramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScramError::InvalidServerProof(msg) => write!(f, "invalid server proof: {}", msg),
            ScramError::InvalidServerMessage(msg) => write!(f, "invalid server message: {}", msg),
            ScramError::ServerError(msg) => write!(f, "server error: {}", msg),
            ScramError::Base64Error(msg) => write!(f, "Base64 error: {}", msg),
        }
    }
}

impl std::error::Error for ScramError {}

/// Internal state needed to verify the server's final message
#[derive(Clone, Debug)]
pub struct ScramState {
    /// Combined authentication message (for verification)
    auth_message: Vec<u8>,
    /// Server key (for verification calculation)
    server_key: Vec<u8>,
}

/// SCRAM-SHA-256 client implementation
pub struct ScramClient {
    username: String,
    password: String,
    authzid: Option<String>,
    nonce: String,
}

impl ScramClient {
    /// Create a new SCRAM client
    pub fn new(username: String, password: String) -> Self {
        Self::with_authzid(username, password, None)
    }

    /// Create a client that asks to act as `authzid` once authenticated
    pub fn with_authzid(username: String, password: String, authzid: Option<String>) -> Self {
        let mut rng = rand::thread_rng();
        let nonce_bytes: Vec<u8> = (0..24).map(|_| rng.gen()).collect();
        let nonce = BASE64.encode(&nonce_bytes);

        Self {
            username,
            password,
            authzid,
            nonce,
        }
    }

    /// GS2 header: no channel binding, optional authzid
    fn gs2_header(&self) -> String {
        match &self.authzid {
            Some(authzid) => format!("n,a={},", saslname(authzid)),
            None => "n,,".to_string(),
        }
    }

    fn client_first_bare(&self) -> String {
        format!("n={},r={}", saslname(&self.username), self.nonce)
    }

    /// Generate client first message
    pub fn client_first(&self) -> String {
        format!("{}{}", self.gs2_header(), self.client_first_bare())
    }

    /// Process server first message and generate client final message
    ///
    /// Returns (client_final_message, internal_state)
    pub fn client_final(&mut self, server_first: &str) -> Result<(String, ScramState), ScramError> {
        // r=<client_nonce><server_nonce>,s=<salt>,i=<iterations>
        let (server_nonce, salt, iterations) = parse_server_first(server_first)?;

        if !server_nonce.starts_with(&self.nonce) {
            return Err(ScramError::InvalidServerMessage(
                "server nonce doesn't contain client nonce".to_string(),
            ));
        }

        let salt_bytes = BASE64
            .decode(&salt)
            .map_err(|_| ScramError::Base64Error("invalid salt encoding".to_string()))?;
        let iterations = iterations
            .parse::<u32>()
            .ok()
            .filter(|i| *i > 0)
            .ok_or_else(|| {
                ScramError::InvalidServerMessage("invalid iteration count".to_string())
            })?;
        if iterations > MAX_ITERATIONS {
            return Err(ScramError::InvalidServerMessage(format!(
                "iteration count {} exceeds limit of {}",
                iterations, MAX_ITERATIONS
            )));
        }

        // c = base64(gs2-header), no channel binding data
        let channel_binding = BASE64.encode(self.gs2_header().as_bytes());
        let client_final_without_proof = format!("c={},r={}", channel_binding, server_nonce);

        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_first,
            client_final_without_proof
        );

        let salted = salted_password(&self.password, &salt_bytes, iterations);
        let proof = client_proof(&salted, auth_message.as_bytes());
        let server_key = hmac_sha256(&salted, b"Server Key");

        let client_final = format!("{},p={}", client_final_without_proof, BASE64.encode(&proof));

        let state = ScramState {
            auth_message: auth_message.into_bytes(),
            server_key,
        };

        Ok((client_final, state))
    }

    /// Verify server final message and confirm authentication
    pub fn verify_server_final(
        &self,
        server_final: &str,
        state: &ScramState,
    ) -> Result<(), ScramError> {
        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(ScramError::ServerError(err.to_string()));
        }

        // v=<server_signature>
        let server_sig_encoded = server_final
            .strip_prefix("v=")
            .ok_or_else(|| ScramError::InvalidServerMessage("missing 'v=' prefix".to_string()))?;

        let server_signature = BASE64.decode(server_sig_encoded).map_err(|_| {
            ScramError::Base64Error("invalid server signature encoding".to_string())
        })?;

        let expected_signature = hmac_sha256(&state.server_key, &state.auth_message);

        if constant_time_compare(&server_signature, &expected_signature) {
            Ok(())
        } else {
            Err(ScramError::InvalidServerProof(
                "server signature verification failed".to_string(),
            ))
        }
    }
}

/// Escape `=` and `,` as RFC 5802 requires for names
fn saslname(name: &str) -> String {
    name.replace('=', "=3D").replace(',', "=2C")
}

/// Parse server first message format: r=<nonce>,s=<salt>,i=<iterations>
fn parse_server_first(msg: &str) -> Result<(String, String, String), ScramError> {
    if let Some(err) = msg.strip_prefix("e=") {
        return Err(ScramError::ServerError(err.to_string()));
    }

    let mut nonce = String::new();
    let mut salt = String::new();
    let mut iterations = String::new();

    for part in msg.split(',') {
        if let Some(value) = part.strip_prefix("r=") {
            nonce = value.to_string();
        } else if let Some(value) = part.strip_prefix("s=") {
            salt = value.to_string();
        } else if let Some(value) = part.strip_prefix("i=") {
            iterations = value.to_string();
        }
    }

    if nonce.is_empty() || salt.is_empty() || iterations.is_empty() {
        return Err(ScramError::InvalidServerMessage(
            "missing required fields in server first message".to_string(),
        ));
    }

    Ok((nonce, salt, iterations))
}

/// SaltedPassword := PBKDF2(password, salt, iterations, HMAC-SHA256)
pub(crate) fn salted_password(password: &str, salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut salted = vec![0u8; 32];
    // Output length matches HMAC-SHA256, so the length check cannot fail
    let _ = pbkdf2::<HmacSha256>(password.as_bytes(), salt, iterations, &mut salted);
    salted
}

/// HMAC-SHA256(key, data)
pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// ClientProof := ClientKey XOR HMAC(SHA256(ClientKey), AuthMessage)
pub(crate) fn client_proof(salted: &[u8], auth_message: &[u8]) -> Vec<u8> {
    let client_key = hmac_sha256(salted, b"Client Key");
    let stored_key = Sha256::digest(&client_key);
    let client_signature = hmac_sha256(&stored_key, auth_message);

    client_key
        .iter()
        .zip(client_signature.iter())
        .map(|(k, s)| k ^ s)
        .collect()
}

/// Constant-time comparison to prevent timing attacks
pub(crate) fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
