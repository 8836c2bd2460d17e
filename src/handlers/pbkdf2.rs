use crate::digest::DigestKind;
use crate::encoding;
use crate::error::{CryptError, Result};
use crate::handler::{Checksum, ContextKwds, Handler, HandlerInfo, HashRecord, Secret};
use crate::lexer::{parse_decimal, TokenizedHash};
use crate::params::{RoundsCost, RoundsSpec, Salt, SaltCharset, SaltSpec};

const PBKDF2_SALT: SaltSpec = SaltSpec {
    min_size: 0,
    max_size: 1024,
    default_size: 16,
    charset: SaltCharset::Raw,
    repair_padding: false,
};

const fn pbkdf2_info(name: &'static str, default_rounds: u32) -> HandlerInfo {
    HandlerInfo {
        name,
        setting_kwds: &["salt", "salt_size", "rounds"],
        context_kwds: &[],
        rounds: Some(RoundsSpec {
            min: 1,
            max: u32::MAX,
            default: Some(default_rounds),
            cost: RoundsCost::Linear,
        }),
        salt: Some(PBKDF2_SALT),
        ident: None,
    }
}

const PBKDF2_SHA1_INFO: HandlerInfo = pbkdf2_info("pbkdf2_sha1", 131_000);
const PBKDF2_SHA256_INFO: HandlerInfo = pbkdf2_info("pbkdf2_sha256", 29_000);
const PBKDF2_SHA512_INFO: HandlerInfo = pbkdf2_info("pbkdf2_sha512", 25_000);

/// PBKDF2-HMAC in modular crypt format: `$pbkdf2[-sha256]$<rounds>$<ab64 salt>$<ab64 checksum>`
#[derive(Debug)]
pub struct Pbkdf2 {
    info: &'static HandlerInfo,
    ident: &'static str,
    kind: DigestKind,
}

impl Pbkdf2 {
    /// `$pbkdf2$`, using HMAC-SHA1
    pub fn sha1() -> Self {
        Self {
            info: &PBKDF2_SHA1_INFO,
            ident: "pbkdf2",
            kind: DigestKind::Sha1,
        }
    }

    /// `$pbkdf2-sha256$`
    pub fn sha256() -> Self {
        Self {
            info: &PBKDF2_SHA256_INFO,
            ident: "pbkdf2-sha256",
            kind: DigestKind::Sha256,
        }
    }

    /// `$pbkdf2-sha512$`
    pub fn sha512() -> Self {
        Self {
            info: &PBKDF2_SHA512_INFO,
            ident: "pbkdf2-sha512",
            kind: DigestKind::Sha512,
        }
    }

    fn decode(&self, field: &str, what: &str) -> Result<Vec<u8>> {
        match encoding::ab64_decode(field) {
            Ok(b) => Ok(b),
            Err(_) => Err(CryptError::MalformedHash(format!(
                "{}: {} is not valid ab64",
                self.info.name, what
            ))),
        }
    }
}

impl Handler for Pbkdf2 {
    fn info(&self) -> &HandlerInfo {
        self.info
    }

    fn identify(&self, hash: &str) -> bool {
        match hash.strip_prefix('$').and_then(|h| h.split_once('$')) {
            Some((ident, _)) => ident == self.ident,
            None => false,
        }
    }

    fn parse(&self, hash: &str) -> Result<HashRecord> {
        let name = self.info.name;
        let tokens = TokenizedHash::tokenize(name, hash)?;

        if tokens.ident != self.ident {
            return Err(CryptError::malformed(name, "wrong identifier"));
        }

        let (rounds, salt, checksum) = match tokens.fields.as_slice() {
            [rounds, salt] => (*rounds, *salt, None),
            [rounds, salt, checksum] => (*rounds, *salt, Some(*checksum)),
            _ => return Err(CryptError::malformed(name, "wrong number of '$' separated fields")),
        };

        let rounds = parse_decimal(name, rounds, "rounds")?;
        if rounds == 0 {
            return Err(CryptError::malformed(name, "rounds must be at least 1"));
        }

        let salt = self.decode(salt, "salt")?;

        let checksum = match checksum {
            Some(c) => {
                let c = self.decode(c, "checksum")?;
                if c.len() != self.kind.output_size() {
                    return Err(CryptError::malformed(name, "wrong checksum size"));
                }
                Some(Checksum::Bytes(c))
            }
            None => None,
        };

        Ok(HashRecord {
            rounds: Some(rounds),
            salt: Some(Salt::Raw(salt)),
            checksum,
            ..HashRecord::default()
        })
    }

    fn render(&self, record: &HashRecord) -> Result<String> {
        let mut out = format!(
            "${}${}${}",
            self.ident,
            record.rounds_value(self.info.name)?,
            encoding::ab64_encode(record.salt_bytes(self.info.name)?)
        );

        match &record.checksum {
            Some(Checksum::Bytes(c)) => {
                out.push('$');
                out.push_str(&encoding::ab64_encode(c));
            }
            Some(_) => return Err(CryptError::unsupported(self.info.name, "checksum must be raw bytes")),
            None => (),
        }

        Ok(out)
    }

    fn compute(&self, secret: Secret<'_>, config: &HashRecord, _context: &ContextKwds) -> Result<Checksum> {
        Ok(Checksum::Bytes(self.kind.pbkdf2(
            secret.as_bytes(),
            config.salt_bytes(self.info.name)?,
            config.rounds_value(self.info.name)?,
            self.kind.output_size(),
        )))
    }
}
