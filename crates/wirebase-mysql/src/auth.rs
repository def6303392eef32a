//! MySQL authentication implementations.
//!
//! This module implements the password scrambles a client answers the
//! server's seed with:
//! - `scramble_legacy`: protocol-9 servers (3.21 and older)
//! - `scramble_323`: protocol-10 servers without secure connection, and the
//!   `mysql_old_password` plugin
//! - `mysql_native_password`: SHA1-based (MySQL < 8.0 default)
//! - `caching_sha2_password`: SHA256-based (MySQL 8.0+ default)
//!
//! # mysql_native_password
//!
//! Password scramble algorithm:
//! ```text
//! SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))
//! ```
//!
//! # caching_sha2_password
//!
//! Fast auth (if cached on server):
//! ```text
//! XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + seed))
//! ```
//!
//! Full auth without TLS uses RSA public key encryption.
//!
//! Every scheme answers an empty password with an empty response.

use sha1::Sha1;
use sha2::{Digest, Sha256};

use rand::rngs::OsRng;

use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;

use wirebase_core::error::{ConnectionError, ConnectionErrorKind};
use wirebase_core::{Error, Result};

/// Well-known authentication plugin names.
pub mod plugins {
    /// SHA1-based authentication (legacy default)
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    /// Pre-4.1 password hashing
    pub const MYSQL_OLD_PASSWORD: &str = "mysql_old_password";
    /// SHA256-based authentication (MySQL 8.0+ default)
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
    /// RSA-based SHA256 authentication
    pub const SHA256_PASSWORD: &str = "sha256_password";
    /// MySQL clear password (requires a secure channel)
    pub const MYSQL_CLEAR_PASSWORD: &str = "mysql_clear_password";
}

/// Response codes for caching_sha2_password protocol.
pub mod caching_sha2 {
    /// Request for public key (client should send 0x02)
    pub const REQUEST_PUBLIC_KEY: u8 = 0x02;
    /// Fast auth success
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    /// Full auth needed (switch to secure channel or RSA)
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

/// Authentication method negotiated for a login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPlugin {
    /// Protocol 9 servers
    Legacy,
    /// Protocol 10 without secure connection, or `mysql_old_password`
    OldPassword,
    NativePassword,
    CachingSha2,
    Sha256,
}

impl AuthPlugin {
    /// Plugin for a server-announced name. Unknown names are `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            plugins::MYSQL_NATIVE_PASSWORD => Some(AuthPlugin::NativePassword),
            plugins::MYSQL_OLD_PASSWORD => Some(AuthPlugin::OldPassword),
            plugins::CACHING_SHA2_PASSWORD => Some(AuthPlugin::CachingSha2),
            plugins::SHA256_PASSWORD => Some(AuthPlugin::Sha256),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            AuthPlugin::Legacy | AuthPlugin::OldPassword => plugins::MYSQL_OLD_PASSWORD,
            AuthPlugin::NativePassword => plugins::MYSQL_NATIVE_PASSWORD,
            AuthPlugin::CachingSha2 => plugins::CACHING_SHA2_PASSWORD,
            AuthPlugin::Sha256 => plugins::SHA256_PASSWORD,
        }
    }

    /// Response to send for `seed`.
    ///
    /// `sha256_password` only has a meaningful first answer over a secure
    /// channel, so without one it starts by requesting the public key.
    pub fn scramble(self, password: &str, seed: &[u8]) -> Vec<u8> {
        match self {
            AuthPlugin::Legacy => scramble_legacy(password, seed),
            AuthPlugin::OldPassword => {
                // The old scheme only uses the first 8 seed bytes
                scramble_323(password, &seed[..seed.len().min(8)])
            }
            AuthPlugin::NativePassword => mysql_native_password(password, seed),
            AuthPlugin::CachingSha2 => caching_sha2_password(password, seed),
            AuthPlugin::Sha256 if password.is_empty() => Vec::new(),
            AuthPlugin::Sha256 => vec![1],
        }
    }
}

/// Rolling hash over the bytes of a credential or seed, skipping spaces
/// and tabs. Returns the 31-bit accumulator.
fn old_hash(bytes: &[u8]) -> i64 {
    let mut nr: i64 = 1_345_345_333;
    let mut nr2: i64 = 7;
    for &b in bytes {
        if b == b' ' || b == b'\t' {
            continue;
        }
        let tmp = i64::from(b);
        nr ^= ((nr & 63) + nr2).wrapping_mul(tmp).wrapping_add(nr << 8);
        nr2 = nr2.wrapping_add(tmp);
    }
    nr & 0x7FFF_FFFF
}

/// Two-accumulator variant of [`old_hash`]. Seeds are hashed verbatim,
/// credentials with spaces and tabs skipped.
fn new_hash(bytes: &[u8], skip_blanks: bool) -> (i64, i64) {
    let mut nr: i64 = 1_345_345_333;
    let mut add: i64 = 7;
    let mut nr2: i64 = 0x1234_5671;
    for &b in bytes {
        if skip_blanks && (b == b' ' || b == b'\t') {
            continue;
        }
        let tmp = i64::from(b);
        nr ^= ((nr & 63) + add).wrapping_mul(tmp).wrapping_add(nr << 8);
        nr2 = nr2.wrapping_add((nr2 << 8) ^ nr);
        add = add.wrapping_add(tmp);
    }
    (nr & 0x7FFF_FFFF, nr2 & 0x7FFF_FFFF)
}

/// Linear-congruential mixer shared by both pre-4.1 scrambles.
struct Mixer {
    seed1: i64,
    seed2: i64,
    max: i64,
}

impl Mixer {
    fn next(&mut self) -> f64 {
        self.seed1 = (self.seed1 * 3 + self.seed2) % self.max;
        self.seed2 = (self.seed1 + self.seed2 + 33) % self.max;
        self.seed1 as f64 / self.max as f64
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn next_byte(&mut self) -> u8 {
        (self.next() * 31.0 + 64.0).floor() as u8
    }
}

/// Protocol-9 scramble: one printable byte per seed byte.
pub fn scramble_legacy(password: &str, seed: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let max = 0x01FF_FFFF;
    let nr = (old_hash(seed) ^ old_hash(password.as_bytes())) % max;
    let mut mixer = Mixer {
        seed1: nr,
        seed2: nr / 2,
        max,
    };
    seed.iter().map(|_| mixer.next_byte()).collect()
}

/// Pre-4.1 scramble for protocol-10 servers: both hash accumulators seed
/// the mixer, and one extra pass is XORed over the output.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn scramble_323(password: &str, seed: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let max = 0x3FFF_FFFF;
    let (s0, s1) = new_hash(seed, false);
    let (p0, p1) = new_hash(password.as_bytes(), true);
    let mut mixer = Mixer {
        seed1: (s0 ^ p0) % max,
        seed2: (s1 ^ p1) % max,
        max,
    };
    let mut out: Vec<u8> = seed.iter().map(|_| mixer.next_byte()).collect();
    let extra = (mixer.next() * 31.0).floor() as u8;
    for b in &mut out {
        *b ^= extra;
    }
    out
}

/// Compute mysql_native_password authentication response.
///
/// Algorithm: `SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))`
///
/// # Arguments
/// * `password` - The user's password (UTF-8)
/// * `auth_data` - The 20-byte scramble from the server
///
/// # Returns
/// The 20-byte authentication response, or empty vec if password is empty.
pub fn mysql_native_password(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return vec![];
    }

    let seed = &auth_data[..auth_data.len().min(20)];

    let stage1: [u8; 20] = Sha1::digest(password.as_bytes()).into();
    let stage2: [u8; 20] = Sha1::digest(stage1).into();

    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let stage3: [u8; 20] = hasher.finalize().into();

    stage1
        .iter()
        .zip(stage3.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// Compute caching_sha2_password fast authentication response.
///
/// Algorithm: `XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + seed))`
///
/// # Returns
/// The 32-byte authentication response, or empty vec if password is empty.
pub fn caching_sha2_password(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return vec![];
    }

    // MySQL sends a 20-byte scramble followed by NUL
    let seed = if auth_data.len() == 21 && auth_data.last() == Some(&0) {
        &auth_data[..20]
    } else {
        auth_data
    };

    let password_hash: [u8; 32] = Sha256::digest(password.as_bytes()).into();
    let password_hash_hash: [u8; 32] = Sha256::digest(password_hash).into();

    let mut hasher = Sha256::new();
    hasher.update(password_hash_hash);
    hasher.update(seed);
    let scramble: [u8; 32] = hasher.finalize().into();

    password_hash
        .iter()
        .zip(scramble.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// Encrypt the password with the server's RSA public key.
///
/// Used for full authentication with `caching_sha2_password` and
/// `sha256_password` when the connection is not secured by TLS:
/// `RSA_encrypt((password + NUL) XOR seed)`.
///
/// Servers from 8.0.5 expect OAEP padding, older ones PKCS#1 v1.5.
pub fn sha256_password_rsa(
    password: &str,
    seed: &[u8],
    public_key_pem: &[u8],
    use_oaep: bool,
) -> Result<Vec<u8>> {
    let seed = match seed.last() {
        Some(0) => &seed[..seed.len() - 1],
        _ => seed,
    };
    if seed.is_empty() {
        return Err(auth_error("authentication seed is empty"));
    }

    let mut pw = password.as_bytes().to_vec();
    pw.push(0);
    for (i, b) in pw.iter_mut().enumerate() {
        *b ^= seed[i % seed.len()];
    }

    let pem = std::str::from_utf8(public_key_pem)
        .map_err(|e| auth_error(format!("public key is not valid UTF-8 PEM: {e}")))?;

    let pub_key = RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| auth_error(format!("failed to parse RSA public key PEM: {e}")))?;

    let encrypted = if use_oaep {
        pub_key.encrypt(&mut OsRng, rsa::Oaep::new::<Sha1>(), &pw)
    } else {
        pub_key.encrypt(&mut OsRng, rsa::Pkcs1v15Encrypt, &pw)
    };
    encrypted.map_err(|e| auth_error(format!("RSA encryption failed: {e}")))
}

fn auth_error(message: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Authentication,
        message: message.into(),
        server_code: None,
        source: None,
    })
}
