use crate::config::{AuthConfig, AuthMethod, UserConfig};
use anyhow::{anyhow, Result};
use argon2::Argon2;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use password_hash::{PasswordHash, PasswordVerifier};
use pgbridge_core::GatewayError;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

pub const SCRAM_MECHANISM: &str = "SCRAM-SHA-256";
pub const SCRAM_ITERATIONS: u32 = 4096;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 18;

type HmacSha256 = Hmac<Sha256>;

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    match HmacSha256::new_from_slice(key) {
        Ok(mut mac) => {
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        Err(_) => Vec::new(),
    }
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Server-side SCRAM-SHA-256 secret: what PostgreSQL keeps in
/// `pg_authid.rolpassword`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScramVerifier {
    pub iterations: u32,
    pub salt: Vec<u8>,
    pub stored_key: Vec<u8>,
    pub server_key: Vec<u8>,
}

impl ScramVerifier {
    pub fn derive(password: &str, salt: Vec<u8>, iterations: u32) -> Self {
        let mut salted = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut salted);
        let client_key = hmac(&salted, b"Client Key");
        Self {
            iterations,
            salt,
            stored_key: Sha256::digest(&client_key).to_vec(),
            server_key: hmac(&salted, b"Server Key"),
        }
    }

    /// Parses `SCRAM-SHA-256$<iterations>:<salt>$<StoredKey>:<ServerKey>`.
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.strip_prefix("SCRAM-SHA-256$")?;
        let (params, keys) = rest.split_once('$')?;
        let (iterations, salt) = params.split_once(':')?;
        let (stored_key, server_key) = keys.split_once(':')?;
        Some(Self {
            iterations: iterations.parse().ok()?,
            salt: BASE64.decode(salt).ok()?,
            stored_key: BASE64.decode(stored_key).ok()?,
            server_key: BASE64.decode(server_key).ok()?,
        })
    }
}

#[derive(Debug, Clone)]
struct Credentials {
    password_hash: Option<String>,
    password_plain: Option<String>,
    scram: Option<ScramVerifier>,
    superuser: bool,
}

impl Credentials {
    fn from_config(user: &UserConfig) -> Result<Self> {
        let scram = match (&user.scram_verifier, &user.password_plain) {
            (Some(text), _) => Some(ScramVerifier::parse(text).ok_or_else(|| {
                anyhow!("user {} has a malformed scram_verifier", user.username)
            })?),
            (None, Some(plain)) => Some(ScramVerifier::derive(
                plain,
                random_bytes(SALT_LEN),
                SCRAM_ITERATIONS,
            )),
            (None, None) => None,
        };
        Ok(Self {
            password_hash: user.password_hash.clone(),
            password_plain: user.password_plain.clone(),
            scram,
            superuser: user.superuser,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Authenticator {
    method: AuthMethod,
    users: HashMap<String, Credentials>,
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        let mut users = HashMap::new();
        for user in &config.users {
            users.insert(user.username.clone(), Credentials::from_config(user)?);
        }
        Ok(Self {
            method: config.method,
            users,
        })
    }

    pub fn method(&self) -> AuthMethod {
        self.method
    }

    pub fn is_superuser(&self, username: &str) -> bool {
        self.users.get(username).is_some_and(|c| c.superuser)
    }

    /// Cleartext password check against an argon2 hash or a plain password.
    pub fn verify_password(&self, username: &str, password: &str) -> Result<(), GatewayError> {
        let failed = || GatewayError::auth_failed(username);
        let user = self.users.get(username).ok_or_else(failed)?;
        if let Some(hash) = &user.password_hash {
            let parsed = PasswordHash::new(hash).map_err(|_| failed())?;
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .map_err(|_| failed())
        } else if let Some(plain) = &user.password_plain {
            if plain == password {
                Ok(())
            } else {
                Err(failed())
            }
        } else {
            Err(failed())
        }
    }

    pub fn scram(&self, username: &str) -> Result<ScramExchange, GatewayError> {
        let verifier = self
            .users
            .get(username)
            .and_then(|c| c.scram.clone())
            .ok_or_else(|| GatewayError::auth_failed(username))?;
        Ok(ScramExchange::new(username, verifier))
    }
}

/// One SCRAM-SHA-256 conversation (RFC 5802 / RFC 7677) without channel
/// binding.
#[derive(Debug)]
pub struct ScramExchange {
    username: String,
    verifier: ScramVerifier,
    nonce: String,
    gs2_header: String,
    client_first_bare: String,
    server_first: String,
}

fn malformed(what: &str) -> GatewayError {
    GatewayError::Protocol(format!("malformed SCRAM {what}"))
}

impl ScramExchange {
    fn new(username: &str, verifier: ScramVerifier) -> Self {
        Self {
            username: username.to_string(),
            verifier,
            nonce: String::new(),
            gs2_header: String::new(),
            client_first_bare: String::new(),
            server_first: String::new(),
        }
    }

    fn failed(&self) -> GatewayError {
        GatewayError::auth_failed(&self.username)
    }

    /// Consumes client-first-message, returns server-first-message.
    pub fn server_first(&mut self, client_first: &[u8]) -> Result<Vec<u8>, GatewayError> {
        let text = std::str::from_utf8(client_first).map_err(|_| malformed("client-first-message"))?;
        let mut parts = text.splitn(3, ',');
        let (Some(cbind), Some(authzid), Some(bare)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed("client-first-message"));
        };
        if cbind.starts_with("p=") {
            return Err(GatewayError::Authentication {
                code: "28000",
                message: "channel binding is not supported".into(),
            });
        }
        let client_nonce = bare
            .split(',')
            .find_map(|attr| attr.strip_prefix("r="))
            .filter(|n| !n.is_empty())
            .ok_or_else(|| malformed("client-first-message"))?;
        self.gs2_header = format!("{cbind},{authzid},");
        self.client_first_bare = bare.to_string();
        self.nonce = format!("{client_nonce}{}", BASE64.encode(random_bytes(NONCE_LEN)));
        self.server_first = format!(
            "r={},s={},i={}",
            self.nonce,
            BASE64.encode(&self.verifier.salt),
            self.verifier.iterations
        );
        Ok(self.server_first.clone().into_bytes())
    }

    /// Verifies client-final-message, returns server-final-message.
    pub fn server_final(&self, client_final: &[u8]) -> Result<Vec<u8>, GatewayError> {
        let text = std::str::from_utf8(client_final).map_err(|_| malformed("client-final-message"))?;
        let (without_proof, proof) = text
            .rsplit_once(",p=")
            .ok_or_else(|| malformed("client-final-message"))?;
        let mut binding = None;
        let mut nonce = None;
        for attr in without_proof.split(',') {
            if let Some(value) = attr.strip_prefix("c=") {
                binding = Some(value);
            } else if let Some(value) = attr.strip_prefix("r=") {
                nonce = Some(value);
            }
        }
        let binding = binding.ok_or_else(|| malformed("client-final-message"))?;
        if BASE64.decode(binding).ok().as_deref() != Some(self.gs2_header.as_bytes()) {
            return Err(self.failed());
        }
        if nonce != Some(self.nonce.as_str()) {
            return Err(self.failed());
        }
        let proof = BASE64.decode(proof).map_err(|_| self.failed())?;
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, self.server_first, without_proof
        );
        let signature = hmac(&self.verifier.stored_key, auth_message.as_bytes());
        if proof.len() != signature.len() {
            return Err(self.failed());
        }
        let client_key: Vec<u8> = proof.iter().zip(&signature).map(|(a, b)| a ^ b).collect();
        if Sha256::digest(&client_key).as_slice() != self.verifier.stored_key.as_slice() {
            return Err(self.failed());
        }
        let server_signature = hmac(&self.verifier.server_key, auth_message.as_bytes());
        Ok(format!("v={}", BASE64.encode(server_signature)).into_bytes())
    }
}
