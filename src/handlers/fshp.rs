use crate::digest::DigestKind;
use crate::error::{CryptError, Result};
use crate::handler::{Checksum, ContextKwds, Handler, HandlerInfo, HashRecord, Secret};
use crate::lexer::parse_decimal;
use crate::params::{IdentSpec, RoundsCost, RoundsSpec, Salt, SaltCharset, SaltSpec};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

const NAME: &str = "fshp";
const PREFIX: &str = "{FSHP";

const VARIANTS: IdentSpec = IdentSpec {
    idents: &["0", "1", "2", "3"],
    aliases: &[("sha1", "0"), ("sha256", "1"), ("sha384", "2"), ("sha512", "3")],
    default: "1",
};

const INFO: HandlerInfo = HandlerInfo {
    name: NAME,
    setting_kwds: &["salt", "salt_size", "rounds", "ident"],
    context_kwds: &[],
    rounds: Some(RoundsSpec {
        min: 1,
        max: u32::MAX,
        default: Some(480_000),
        cost: RoundsCost::Linear,
    }),
    salt: Some(SaltSpec {
        min_size: 0,
        max_size: 1024,
        default_size: 16,
        charset: SaltCharset::Raw,
        repair_padding: false,
    }),
    ident: Some(VARIANTS),
};

fn variant_digest(variant: &str) -> Result<DigestKind> {
    match variant {
        "0" => Ok(DigestKind::Sha1),
        "1" => Ok(DigestKind::Sha256),
        "2" => Ok(DigestKind::Sha384),
        "3" => Ok(DigestKind::Sha512),
        other => Err(CryptError::unsupported(NAME, format!("unknown variant {:?}", other))),
    }
}

/// Fairly Secure Hashed Password: `{FSHP<variant>|<salt size>|<rounds>}<base64(salt ‖ checksum)>`.
/// The variant (selected through the `ident` setting, by number or digest name) picks the digest.
#[derive(Debug, Default)]
pub struct Fshp;

impl Handler for Fshp {
    fn info(&self) -> &HandlerInfo {
        &INFO
    }

    fn identify(&self, hash: &str) -> bool {
        hash.starts_with(PREFIX)
    }

    fn parse(&self, hash: &str) -> Result<HashRecord> {
        let rest = match hash.strip_prefix(PREFIX) {
            Some(r) => r,
            None => return Err(CryptError::malformed(NAME, "missing {FSHP prefix")),
        };

        let (header, data) = match rest.split_once('}') {
            Some(parts) => parts,
            None => return Err(CryptError::malformed(NAME, "unterminated header")),
        };

        let (variant, salt_size, rounds) = {
            let mut fields = header.split('|');
            match (fields.next(), fields.next(), fields.next(), fields.next()) {
                (Some(v), Some(s), Some(r), None) => (v, s, r),
                _ => return Err(CryptError::malformed(NAME, "header must have three fields")),
            }
        };

        let kind = match variant_digest(variant) {
            Ok(k) => k,
            Err(_) => return Err(CryptError::malformed(NAME, "unknown variant")),
        };

        let salt_size = parse_decimal(NAME, salt_size, "salt size")? as usize;
        let rounds = parse_decimal(NAME, rounds, "rounds")?;
        if rounds == 0 {
            return Err(CryptError::malformed(NAME, "rounds must be at least 1"));
        }

        let data = match STANDARD.decode(data) {
            Ok(d) => d,
            Err(_) => return Err(CryptError::malformed(NAME, "data is not valid base64")),
        };

        if data.len() != salt_size + kind.output_size() {
            return Err(CryptError::malformed(NAME, "invalid checksum length for variant"));
        }

        let (salt, checksum) = data.split_at(salt_size);

        Ok(HashRecord {
            ident: Some(variant.to_string()),
            rounds: Some(rounds),
            salt: Some(Salt::Raw(salt.to_vec())),
            checksum: Some(Checksum::Bytes(checksum.to_vec())),
            ..HashRecord::default()
        })
    }

    fn render(&self, record: &HashRecord) -> Result<String> {
        let variant = record.ident.as_deref().unwrap_or(VARIANTS.default);
        let kind = variant_digest(variant)?;
        let salt = record.salt_bytes(NAME)?;

        let mut data = salt.to_vec();
        match &record.checksum {
            Some(Checksum::Bytes(c)) => data.extend_from_slice(c),
            Some(_) => return Err(CryptError::unsupported(NAME, "checksum must be raw bytes")),
            // The format has no config-only form; a zeroed stub stands in for the checksum
            None => data.resize(salt.len() + kind.output_size(), 0),
        }

        Ok(format!(
            "{}{}|{}|{}}}{}",
            PREFIX,
            variant,
            salt.len(),
            record.rounds_value(NAME)?,
            STANDARD.encode(data)
        ))
    }

    fn compute(&self, secret: Secret<'_>, config: &HashRecord, _context: &ContextKwds) -> Result<Checksum> {
        let variant = config.ident.as_deref().unwrap_or(VARIANTS.default);
        let kind = variant_digest(variant)?;

        // FSHP feeds the salt in as the PBKDF1 password and the secret as its salt
        Ok(Checksum::Bytes(kind.pbkdf1(
            config.salt_bytes(NAME)?,
            secret.as_bytes(),
            config.rounds_value(NAME)?,
        )))
    }
}
