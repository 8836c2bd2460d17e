use super::bcrypt::{self, Bcrypt, BCRYPT_ROUNDS, BCRYPT_SALT};
use crate::digest::DigestKind;
use crate::encoding::{self, BCRYPT64_CHARS};
use crate::error::{CryptError, Result};
use crate::handler::{
    rounds_below_target, Checksum, ContextKwds, Handler, HandlerInfo, HashRecord, Secret,
    Settings,
};
use crate::lexer::{parse_decimal, TokenizedHash};
use crate::params::Salt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::Arc;

const NAME: &str = "bcrypt_sha256";
const IDENT: &str = "bcrypt-sha256";
const PREFIX: &str = "$bcrypt-sha256$";

const CURRENT_VERSION: u32 = 2;
const CURRENT_IDENT: &str = "2b";

const SALT_CHARS: usize = 22;
const CHECKSUM_CHARS: usize = 31;

/// Salt endings whose unused padding bits are clear
const FINAL_SALT_CHARS: &str = ".Oeu";

const INFO: HandlerInfo = HandlerInfo {
    name: NAME,
    setting_kwds: &["salt", "salt_size", "rounds"],
    context_kwds: &[],
    rounds: Some(BCRYPT_ROUNDS),
    salt: Some(BCRYPT_SALT),
    ident: None,
};

/// Turns a secret of any length into the 44-character key handed to bcrypt.
///
/// Version 2 keys an HMAC-SHA256 off the encoded salt so precomputed SHA-256 tables are of
/// no use; version 1 is a bare SHA-256.
fn prehash(version: u32, salt: &str, secret: &[u8]) -> Result<String> {
    let digest = match version {
        1 => DigestKind::Sha256.digest(secret),
        _ => {
            if !salt.ends_with(|c| FINAL_SALT_CHARS.contains(c)) {
                return Err(CryptError::unsupported(NAME, "salt has padding bits set"));
            }
            DigestKind::Sha256.hmac(salt.as_bytes(), secret)?
        }
    };

    Ok(STANDARD.encode(digest))
}

fn parse_rounds(field: &str) -> Result<u32> {
    let rounds = parse_decimal(NAME, field, "rounds")?;
    if field.len() > 2 || !(BCRYPT_ROUNDS.min..=BCRYPT_ROUNDS.max).contains(&rounds) {
        return Err(CryptError::malformed(NAME, "rounds out of range"));
    }

    Ok(rounds)
}

/// Parses the `v=2,t=2b,r=12` (version 2) or `2a,12` (version 1) header
fn parse_header(header: &str) -> Result<(u32, &str, u32)> {
    if let Some(rest) = header.strip_prefix("v=") {
        let mut parts = rest.split(',');
        let (version, ident, rounds) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(v), Some(t), Some(r), None) => match (t.strip_prefix("t="), r.strip_prefix("r=")) {
                (Some(t), Some(r)) => (v, t, r),
                _ => return Err(CryptError::malformed(NAME, "malformed header")),
            },
            _ => return Err(CryptError::malformed(NAME, "malformed header")),
        };

        let version = parse_decimal(NAME, version, "version")?;
        if version < 2 {
            return Err(CryptError::malformed(NAME, "version 1 hashes use the short header"));
        }
        if version > CURRENT_VERSION {
            return Err(CryptError::unsupported(
                NAME,
                format!("unknown or unsupported version: {}", version),
            ));
        }

        if ident != CURRENT_IDENT {
            return Err(CryptError::malformed(NAME, "version 2 hashes must use $2b$"));
        }

        return Ok((version, ident, parse_rounds(rounds)?));
    }

    match header.split_once(',') {
        Some((ident @ ("2a" | "2b"), rounds)) => Ok((1, ident, parse_rounds(rounds)?)),
        _ => Err(CryptError::malformed(NAME, "malformed header")),
    }
}

/// bcrypt over an HMAC-SHA256 of the secret, lifting bcrypt's 72 byte limit
/// (`$bcrypt-sha256$v=2,t=2b,r=<cost>$<salt>$<checksum>`).
///
/// Legacy version 1 hashes (`$bcrypt-sha256$2b,<cost>$...`), which use a bare SHA-256, still
/// verify but always need an update.
#[derive(Debug)]
pub struct BcryptSha256 {
    bcrypt: Arc<Bcrypt>,
}

impl BcryptSha256 {
    /// Create a handler backed by the process-wide bcrypt handler
    pub fn new() -> Self {
        Self::with_bcrypt(bcrypt::shared())
    }

    /// Create a handler that computes through a specific bcrypt handler
    pub fn with_bcrypt(bcrypt: Arc<Bcrypt>) -> Self {
        Self { bcrypt }
    }
}

impl Default for BcryptSha256 {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for BcryptSha256 {
    fn info(&self) -> &HandlerInfo {
        &INFO
    }

    fn identify(&self, hash: &str) -> bool {
        hash.starts_with(PREFIX)
    }

    fn parse(&self, hash: &str) -> Result<HashRecord> {
        let tokens = TokenizedHash::tokenize(NAME, hash)?;

        if tokens.ident != IDENT {
            return Err(CryptError::malformed(NAME, "wrong identifier"));
        }

        let (header, salt, checksum) = match tokens.fields.as_slice() {
            [header, salt] => (*header, *salt, None),
            [header, salt, checksum] => (*header, *salt, Some(*checksum)),
            _ => return Err(CryptError::malformed(NAME, "wrong number of '$' separated fields")),
        };

        let (version, ident, rounds) = parse_header(header)?;

        if salt.len() != SALT_CHARS || !encoding::is_in_charset(salt, BCRYPT64_CHARS) {
            return Err(CryptError::malformed(NAME, "invalid salt"));
        }

        if let Some(c) = checksum {
            if c.len() != CHECKSUM_CHARS || !encoding::is_in_charset(c, BCRYPT64_CHARS) {
                return Err(CryptError::malformed(NAME, "invalid checksum"));
            }
        }

        Ok(HashRecord {
            ident: Some(ident.to_string()),
            version: Some(version),
            rounds: Some(rounds),
            salt: Some(Salt::Text(salt.to_string())),
            checksum: checksum.map(|c| Checksum::Text(c.to_string())),
            ..HashRecord::default()
        })
    }

    fn render(&self, record: &HashRecord) -> Result<String> {
        let ident = record.ident.as_deref().unwrap_or(CURRENT_IDENT);
        let rounds = record.rounds_value(NAME)?;
        let salt = record.salt_text(NAME)?;

        let mut out = match record.version.unwrap_or(CURRENT_VERSION) {
            1 => format!("{}{},{}${}", PREFIX, ident, rounds, salt),
            v => format!("{}v={},t={},r={}${}", PREFIX, v, ident, rounds, salt),
        };

        match &record.checksum {
            Some(Checksum::Text(c)) => {
                out.push('$');
                out.push_str(c);
            }
            Some(_) => return Err(CryptError::unsupported(NAME, "checksum must be text")),
            None => (),
        }

        Ok(out)
    }

    fn configure(&self, settings: &Settings) -> Result<HashRecord> {
        let mut record = HashRecord::configure_from(&INFO, settings)?;
        record.version = Some(CURRENT_VERSION);
        record.ident = Some(CURRENT_IDENT.to_string());
        Ok(record)
    }

    fn compute(&self, secret: Secret<'_>, config: &HashRecord, _context: &ContextKwds) -> Result<Checksum> {
        let salt = config.salt_text(NAME)?;
        let version = config.version.unwrap_or(CURRENT_VERSION);
        let key = prehash(version, salt, secret.as_bytes())?;

        let checksum = self.bcrypt.raw_checksum(
            key.as_bytes(),
            config.ident.as_deref().unwrap_or(CURRENT_IDENT),
            config.rounds_value(NAME)?,
            salt,
        )?;

        Ok(Checksum::Text(checksum))
    }

    fn needs_update(&self, hash: &str, settings: &Settings) -> Result<bool> {
        let record = self.parse(hash)?;

        if record.version.unwrap_or(CURRENT_VERSION) < CURRENT_VERSION {
            return Ok(true);
        }

        Ok(rounds_below_target(&INFO, &record, settings))
    }
}
