use crate::digest::DigestKind;
use crate::error::{CryptError, Result};
use crate::handler::{
    consteq, require_context, Checksum, ContextKwds, Handler, HandlerInfo, HashRecord, Secret,
    Settings,
};

use std::sync::Arc;

fn unsalted_info(name: &'static str, context_kwds: &'static [&'static str]) -> HandlerInfo {
    HandlerInfo {
        name,
        setting_kwds: &[],
        context_kwds,
        rounds: None,
        salt: None,
        ident: None,
    }
}

fn checksum_bytes<'r>(name: &str, record: &'r HashRecord) -> Result<Option<&'r [u8]>> {
    match &record.checksum {
        Some(Checksum::Bytes(b)) => Ok(Some(b)),
        Some(_) => Err(CryptError::unsupported(name, "checksum must be raw bytes")),
        None => Ok(None),
    }
}

fn no_config(name: &str) -> CryptError {
    CryptError::unsupported(name, "this scheme has no configuration string")
}

/// An unsalted hex-encoded digest (`hex_md5`, `hex_sha256`)
#[derive(Debug)]
pub struct HexDigest {
    info: HandlerInfo,
    kind: DigestKind,
}

impl HexDigest {
    /// Create a handler named `name` over `kind`
    pub fn new(name: &'static str, kind: DigestKind) -> Self {
        Self {
            info: unsalted_info(name, &[]),
            kind,
        }
    }
}

impl Handler for HexDigest {
    fn info(&self) -> &HandlerInfo {
        &self.info
    }

    fn identify(&self, hash: &str) -> bool {
        hash.len() == self.kind.output_size() * 2 && hash.bytes().all(|b| b.is_ascii_hexdigit())
    }

    fn parse(&self, hash: &str) -> Result<HashRecord> {
        if !self.identify(hash) {
            return Err(CryptError::malformed(self.info.name, "wrong size or non-hex digest"));
        }

        let digest = match hex::decode(hash) {
            Ok(d) => d,
            Err(_) => return Err(CryptError::malformed(self.info.name, "invalid hex digest")),
        };

        Ok(HashRecord {
            checksum: Some(Checksum::Bytes(digest)),
            ..HashRecord::default()
        })
    }

    fn render(&self, record: &HashRecord) -> Result<String> {
        match checksum_bytes(self.info.name, record)? {
            Some(b) => Ok(hex::encode(b)),
            None => Err(no_config(self.info.name)),
        }
    }

    fn compute(&self, secret: Secret<'_>, _config: &HashRecord, _context: &ContextKwds) -> Result<Checksum> {
        Ok(Checksum::Bytes(self.kind.digest(secret.as_bytes())))
    }
}

/// Puts a fixed prefix in front of another handler's hashes (`{SHA}` + `hex_sha1`)
#[derive(Debug)]
pub struct PrefixWrapper {
    info: HandlerInfo,
    prefix: &'static str,
    inner: Arc<dyn Handler>,
}

impl PrefixWrapper {
    /// Wraps `inner` under a new name. The wrapper takes the inner handler's settings.
    pub fn new(name: &'static str, prefix: &'static str, inner: Arc<dyn Handler>) -> Self {
        let info = HandlerInfo {
            name,
            ..*inner.info()
        };

        Self {
            info,
            prefix,
            inner,
        }
    }

    fn strip<'h>(&self, hash: &'h str) -> Result<&'h str> {
        match hash.strip_prefix(self.prefix) {
            Some(rest) => Ok(rest),
            None => Err(CryptError::MalformedHash(format!(
                "{}: missing {:?} prefix",
                self.info.name, self.prefix
            ))),
        }
    }
}

impl Handler for PrefixWrapper {
    fn info(&self) -> &HandlerInfo {
        &self.info
    }

    fn identify(&self, hash: &str) -> bool {
        match hash.strip_prefix(self.prefix) {
            Some(rest) => self.inner.identify(rest),
            None => false,
        }
    }

    fn parse(&self, hash: &str) -> Result<HashRecord> {
        self.inner.parse(self.strip(hash)?)
    }

    fn render(&self, record: &HashRecord) -> Result<String> {
        Ok(format!("{}{}", self.prefix, self.inner.render(record)?))
    }

    fn configure(&self, settings: &Settings) -> Result<HashRecord> {
        self.inner.configure(settings)
    }

    fn compute(&self, secret: Secret<'_>, config: &HashRecord, context: &ContextKwds) -> Result<Checksum> {
        self.inner.compute(secret, config, context)
    }

    fn verify(&self, secret: Secret<'_>, hash: &str, context: &ContextKwds) -> Result<bool> {
        self.inner.verify(secret, self.strip(hash)?, context)
    }

    fn needs_update(&self, hash: &str, settings: &Settings) -> Result<bool> {
        self.inner.needs_update(self.strip(hash)?, settings)
    }
}

/// Stores the secret itself. Only useful for migrating away from it.
#[derive(Debug)]
pub struct Plaintext {
    info: HandlerInfo,
}

impl Plaintext {
    /// Create the handler
    pub fn new() -> Self {
        Self {
            info: unsalted_info("plaintext", &[]),
        }
    }
}

impl Default for Plaintext {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for Plaintext {
    fn info(&self) -> &HandlerInfo {
        &self.info
    }

    fn identify(&self, _hash: &str) -> bool {
        true
    }

    fn parse(&self, hash: &str) -> Result<HashRecord> {
        Ok(HashRecord {
            checksum: Some(Checksum::Bytes(hash.as_bytes().to_vec())),
            ..HashRecord::default()
        })
    }

    fn render(&self, record: &HashRecord) -> Result<String> {
        match checksum_bytes(self.info.name, record)? {
            Some(b) => match std::str::from_utf8(b) {
                Ok(s) => Ok(s.to_string()),
                Err(_) => Err(CryptError::ForbiddenSecretContent(
                    "plaintext secrets must be valid UTF-8",
                )),
            },
            None => Err(no_config(self.info.name)),
        }
    }

    fn compute(&self, secret: Secret<'_>, _config: &HashRecord, _context: &ContextKwds) -> Result<Checksum> {
        Ok(Checksum::Bytes(secret.as_bytes().to_vec()))
    }

    fn verify(&self, secret: Secret<'_>, hash: &str, _context: &ContextKwds) -> Result<bool> {
        Ok(consteq(secret.as_bytes(), hash.as_bytes()))
    }
}

/// PostgreSQL's `md5` + md5(secret ‖ user) format. Requires the `user` context keyword.
#[derive(Debug)]
pub struct PostgresMd5 {
    info: HandlerInfo,
}

const PG_PREFIX: &str = "md5";

impl PostgresMd5 {
    /// Create the handler
    pub fn new() -> Self {
        Self {
            info: unsalted_info("postgres_md5", &["user"]),
        }
    }
}

impl Default for PostgresMd5 {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for PostgresMd5 {
    fn info(&self) -> &HandlerInfo {
        &self.info
    }

    fn identify(&self, hash: &str) -> bool {
        match hash.strip_prefix(PG_PREFIX) {
            Some(rest) => rest.len() == 32 && rest.bytes().all(|b| b.is_ascii_hexdigit()),
            None => false,
        }
    }

    fn parse(&self, hash: &str) -> Result<HashRecord> {
        if !self.identify(hash) {
            return Err(CryptError::malformed(self.info.name, "expected md5 followed by 32 hex digits"));
        }

        let digest = match hex::decode(&hash[PG_PREFIX.len()..]) {
            Ok(d) => d,
            Err(_) => return Err(CryptError::malformed(self.info.name, "invalid hex digest")),
        };

        Ok(HashRecord {
            checksum: Some(Checksum::Bytes(digest)),
            ..HashRecord::default()
        })
    }

    fn render(&self, record: &HashRecord) -> Result<String> {
        match checksum_bytes(self.info.name, record)? {
            Some(b) => Ok(format!("{}{}", PG_PREFIX, hex::encode(b))),
            None => Err(no_config(self.info.name)),
        }
    }

    fn compute(&self, secret: Secret<'_>, _config: &HashRecord, context: &ContextKwds) -> Result<Checksum> {
        let user = require_context(&self.info, context, "user")?;

        let mut data = Vec::with_capacity(secret.len() + user.len());
        data.extend_from_slice(secret.as_bytes());
        data.extend_from_slice(user.as_bytes());

        Ok(Checksum::Bytes(DigestKind::Md5.digest(&data)))
    }
}
