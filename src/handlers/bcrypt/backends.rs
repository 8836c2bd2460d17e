//! The bcrypt engines a [`Bcrypt`](super::Bcrypt) handler can negotiate between, in
//! preference order: the `bcrypt` crate, the `pwhash` crate, and a built-in implementation
//! over the `blowfish` crate's EksBlowfish primitives. The built-in engine is disabled unless
//! `CRYPT_CONTEXT_BUILTIN_BCRYPT` is set to a true value.

use crate::backend::{Backend, BackendFailure, Capabilities};
use crate::encoding::BCRYPT64;

use base64::Engine;
use blowfish::Blowfish;
use std::sync::Arc;

/// Environment variable that enables the built-in engine
pub const BUILTIN_ENV_VAR: &str = "CRYPT_CONTEXT_BUILTIN_BCRYPT";

type BackendResult<T> = std::result::Result<T, BackendFailure>;

/// The default candidates, in preference order
pub fn default_backends() -> Vec<Arc<dyn Backend>> {
    vec![
        Arc::new(BcryptCrateBackend),
        Arc::new(PwhashBackend),
        Arc::new(BuiltinBackend::new()),
    ]
}

/// A bcrypt configuration string split into its parts
struct BcryptConfig<'a> {
    ident: &'a str,
    cost: u32,
    salt: &'a str,
}

fn split_config(config: &str) -> BackendResult<BcryptConfig<'_>> {
    let mut parts = config.split('$');

    let (ident, cost, salt) = match (parts.next(), parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(""), Some(ident), Some(cost), Some(salt), None) => (ident, cost, salt),
        _ => return Err(BackendFailure::Failed(format!("malformed config {:?}", config))),
    };

    let cost = match cost.parse() {
        Ok(c) => c,
        Err(_) => return Err(BackendFailure::Failed(format!("invalid cost in {:?}", config))),
    };

    if salt.len() != 22 {
        return Err(BackendFailure::Failed(format!("invalid salt in {:?}", config)));
    }

    Ok(BcryptConfig { ident, cost, salt })
}

fn decode_salt(salt: &str) -> BackendResult<[u8; 16]> {
    let raw = match BCRYPT64.decode(salt) {
        Ok(r) => r,
        Err(e) => return Err(BackendFailure::Failed(format!("undecodable salt: {}", e))),
    };

    match raw.try_into() {
        Ok(r) => Ok(r),
        Err(_) => Err(BackendFailure::Failed(String::from("salt is not 16 bytes"))),
    }
}

/// Engine provided by the `bcrypt` crate
#[derive(Debug)]
pub struct BcryptCrateBackend;

impl Backend for BcryptCrateBackend {
    fn name(&self) -> &'static str {
        "bcrypt"
    }

    #[cfg(feature = "backend-bcrypt")]
    fn load(&self) -> BackendResult<Capabilities> {
        Ok(Capabilities::default())
    }

    #[cfg(not(feature = "backend-bcrypt"))]
    fn load(&self) -> BackendResult<Capabilities> {
        Err(BackendFailure::Unsupported(String::from(
            "not compiled in (enable the backend-bcrypt feature)",
        )))
    }

    #[cfg(feature = "backend-bcrypt")]
    fn raw_compute(&self, secret: &[u8], config: &str) -> BackendResult<String> {
        let parsed = split_config(config)?;

        let version = match parsed.ident {
            "2a" => bcrypt::Version::TwoA,
            "2b" => bcrypt::Version::TwoB,
            "2y" => bcrypt::Version::TwoY,
            other => {
                return Err(BackendFailure::Unsupported(format!(
                    "${}$ is not implemented",
                    other
                )))
            }
        };

        let salt = decode_salt(parsed.salt)?;

        match bcrypt::hash_with_salt(secret, parsed.cost, salt) {
            Ok(parts) => Ok(parts.format_for_version(version)),
            Err(e) => Err(BackendFailure::Failed(e.to_string())),
        }
    }

    #[cfg(not(feature = "backend-bcrypt"))]
    fn raw_compute(&self, _secret: &[u8], _config: &str) -> BackendResult<String> {
        Err(BackendFailure::Unsupported(String::from("not compiled in")))
    }
}

/// Engine provided by the `pwhash` crate
#[derive(Debug)]
pub struct PwhashBackend;

impl Backend for PwhashBackend {
    fn name(&self) -> &'static str {
        "pwhash"
    }

    #[cfg(feature = "backend-pwhash")]
    fn load(&self) -> BackendResult<Capabilities> {
        Ok(Capabilities::default())
    }

    #[cfg(not(feature = "backend-pwhash"))]
    fn load(&self) -> BackendResult<Capabilities> {
        Err(BackendFailure::Unsupported(String::from(
            "not compiled in (enable the backend-pwhash feature)",
        )))
    }

    #[cfg(feature = "backend-pwhash")]
    fn raw_compute(&self, secret: &[u8], config: &str) -> BackendResult<String> {
        use pwhash::bcrypt::{BcryptSetup, BcryptVariant};

        let parsed = split_config(config)?;

        let variant = match parsed.ident {
            "2a" => BcryptVariant::V2a,
            "2b" => BcryptVariant::V2b,
            "2y" => BcryptVariant::V2y,
            other => {
                return Err(BackendFailure::Unsupported(format!(
                    "${}$ is not implemented",
                    other
                )))
            }
        };

        let setup = BcryptSetup {
            salt: Some(parsed.salt),
            cost: Some(parsed.cost),
            variant: Some(variant),
        };

        match pwhash::bcrypt::hash_with(setup, secret) {
            Ok(hash) => Ok(hash),
            Err(e) => Err(BackendFailure::Failed(e.to_string())),
        }
    }

    #[cfg(not(feature = "backend-pwhash"))]
    fn raw_compute(&self, _secret: &[u8], _config: &str) -> BackendResult<String> {
        Err(BackendFailure::Unsupported(String::from("not compiled in")))
    }
}

/// Built-in engine. Slower than the others, and off unless [`BUILTIN_ENV_VAR`] is set or the
/// backend is constructed with [`BuiltinBackend::enabled`].
#[derive(Debug)]
pub struct BuiltinBackend {
    force: bool,
}

impl BuiltinBackend {
    /// Create the engine, gated on [`BUILTIN_ENV_VAR`]
    pub fn new() -> Self {
        Self { force: false }
    }

    /// Create the engine with the environment gate bypassed
    pub fn enabled() -> Self {
        Self { force: true }
    }
}

impl Default for BuiltinBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn env_flag_set(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "y"
        ),
        Err(_) => false,
    }
}

impl Backend for BuiltinBackend {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn load(&self) -> BackendResult<Capabilities> {
        if self.force || env_flag_set(BUILTIN_ENV_VAR) {
            Ok(Capabilities::default())
        } else {
            Err(BackendFailure::Unsupported(format!(
                "disabled (set {}=true to enable)",
                BUILTIN_ENV_VAR
            )))
        }
    }

    fn raw_compute(&self, secret: &[u8], config: &str) -> BackendResult<String> {
        let parsed = split_config(config)?;

        if !matches!(parsed.ident, "2a" | "2b" | "2y") {
            return Err(BackendFailure::Unsupported(format!(
                "${}$ is not implemented",
                parsed.ident
            )));
        }

        if !(4..=31).contains(&parsed.cost) {
            return Err(BackendFailure::Failed(format!("cost {} out of range", parsed.cost)));
        }

        let salt = decode_salt(parsed.salt)?;

        let mut key = Vec::with_capacity(secret.len() + 1);
        key.extend_from_slice(secret);
        key.push(0);
        key.truncate(72);

        let output = eks_blowfish(parsed.cost, &salt, &key);

        Ok(format!(
            "${}${:02}${}{}",
            parsed.ident,
            parsed.cost,
            BCRYPT64.encode(salt),
            BCRYPT64.encode(&output[..23])
        ))
    }
}

/// The bcrypt core: expensive key setup followed by 64 encryptions of "OrpheanBeholderScryDoubt"
fn eks_blowfish(cost: u32, salt: &[u8; 16], key: &[u8]) -> [u8; 24] {
    let mut state: Blowfish = Blowfish::bc_init_state();

    state.salted_expand_key(salt, key);
    for _ in 0..1u64 << cost {
        state.bc_expand_key(key);
        state.bc_expand_key(salt);
    }

    let mut ctext: [u32; 6] = [
        0x4f72_7068,
        0x6561_6e42,
        0x6568_6f6c,
        0x6465_7253,
        0x6372_7944,
        0x6f75_6274,
    ];

    for i in (0..6).step_by(2) {
        for _ in 0..64 {
            let [l, r] = state.bc_encrypt([ctext[i], ctext[i + 1]]);
            ctext[i] = l;
            ctext[i + 1] = r;
        }
    }

    let mut output = [0u8; 24];
    for (chunk, word) in output.chunks_exact_mut(4).zip(ctext.iter()) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }

    output
}
