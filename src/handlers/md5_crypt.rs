use crate::encoding::{self, HASH64_CHARS};
use crate::error::{CryptError, Result};
use crate::handler::{Checksum, ContextKwds, Handler, HandlerInfo, HashRecord, Secret};
use crate::lexer::TokenizedHash;
use crate::params::{Salt, SaltCharset, SaltSpec};

use md5::{Digest, Md5};

const CHECKSUM_CHARS: usize = 22;
const ROUNDS: usize = 1000;

const MD5_SALT: SaltSpec = SaltSpec {
    min_size: 0,
    max_size: 8,
    default_size: 8,
    charset: SaltCharset::Text(HASH64_CHARS),
    repair_padding: false,
};

const MD5_CRYPT_INFO: HandlerInfo = HandlerInfo {
    name: "md5_crypt",
    setting_kwds: &["salt", "salt_size"],
    context_kwds: &[],
    rounds: None,
    salt: Some(MD5_SALT),
    ident: None,
};

const APR_MD5_CRYPT_INFO: HandlerInfo = HandlerInfo {
    name: "apr_md5_crypt",
    ..MD5_CRYPT_INFO
};

/// The MD5-crypt family: FreeBSD's `$1$` and Apache's `$apr1$`, which differ only in the
/// magic string mixed into the digest
#[derive(Debug)]
pub struct Md5Crypt {
    info: &'static HandlerInfo,
    ident: &'static str,
}

impl Md5Crypt {
    /// `$1$` hashes
    pub fn md5_crypt() -> Self {
        Self {
            info: &MD5_CRYPT_INFO,
            ident: "1",
        }
    }

    /// `$apr1$` hashes, as written by Apache's htpasswd
    pub fn apr_md5_crypt() -> Self {
        Self {
            info: &APR_MD5_CRYPT_INFO,
            ident: "apr1",
        }
    }

    fn magic(&self) -> String {
        format!("${}$", self.ident)
    }
}

fn md5_crypt_checksum(secret: &[u8], salt: &[u8], magic: &[u8]) -> String {
    let alternate = Md5::new()
        .chain_update(secret)
        .chain_update(salt)
        .chain_update(secret)
        .finalize();

    let mut ctx = Md5::new()
        .chain_update(secret)
        .chain_update(magic)
        .chain_update(salt);

    for chunk in secret.chunks(16) {
        ctx.update(&alternate[..chunk.len()]);
    }

    let mut i = secret.len();
    while i > 0 {
        if i & 1 == 1 {
            ctx.update([0u8]);
        } else {
            ctx.update(&secret[..1]);
        }
        i >>= 1;
    }

    let mut result = ctx.finalize();

    for round in 0..ROUNDS {
        let mut ctx = Md5::new();

        if round & 1 == 1 {
            ctx.update(secret);
        } else {
            ctx.update(result);
        }

        if round % 3 != 0 {
            ctx.update(salt);
        }

        if round % 7 != 0 {
            ctx.update(secret);
        }

        if round & 1 == 1 {
            ctx.update(result);
        } else {
            ctx.update(secret);
        }

        result = ctx.finalize();
    }

    let mut out = String::with_capacity(CHECKSUM_CHARS);
    for (a, b, c) in [(0, 6, 12), (1, 7, 13), (2, 8, 14), (3, 9, 15), (4, 10, 5)] {
        encoding::h64_encode_int24(&mut out, result[a], result[b], result[c]);
    }
    encoding::h64_encode_int8(&mut out, result[11]);

    out
}

impl Handler for Md5Crypt {
    fn info(&self) -> &HandlerInfo {
        self.info
    }

    fn identify(&self, hash: &str) -> bool {
        hash.starts_with(&self.magic())
    }

    fn parse(&self, hash: &str) -> Result<HashRecord> {
        let name = self.info.name;
        let tokens = TokenizedHash::tokenize(name, hash)?;

        if tokens.ident != self.ident {
            return Err(CryptError::malformed(name, "wrong identifier"));
        }

        let (salt, checksum) = match tokens.fields.as_slice() {
            [salt] => (*salt, None),
            [salt, ""] => (*salt, None),
            [salt, checksum] => (*salt, Some(*checksum)),
            _ => return Err(CryptError::malformed(name, "wrong number of '$' separated fields")),
        };

        if salt.len() > MD5_SALT.max_size || !encoding::is_in_charset(salt, HASH64_CHARS) {
            return Err(CryptError::malformed(name, "invalid salt"));
        }

        if let Some(c) = checksum {
            if c.len() != CHECKSUM_CHARS || !encoding::is_in_charset(c, HASH64_CHARS) {
                return Err(CryptError::malformed(name, "invalid checksum"));
            }
        }

        Ok(HashRecord {
            salt: Some(Salt::Text(salt.to_string())),
            checksum: checksum.map(|c| Checksum::Text(c.to_string())),
            ..HashRecord::default()
        })
    }

    fn render(&self, record: &HashRecord) -> Result<String> {
        let salt = record.salt_text(self.info.name)?;

        match &record.checksum {
            Some(Checksum::Text(c)) => Ok(format!("{}{}${}", self.magic(), salt, c)),
            Some(_) => Err(CryptError::unsupported(self.info.name, "checksum must be text")),
            None => Ok(format!("{}{}$", self.magic(), salt)),
        }
    }

    fn compute(&self, secret: Secret<'_>, config: &HashRecord, _context: &ContextKwds) -> Result<Checksum> {
        let salt = config.salt_text(self.info.name)?;
        Ok(Checksum::Text(md5_crypt_checksum(
            secret.as_bytes(),
            salt.as_bytes(),
            self.magic().as_bytes(),
        )))
    }
}
