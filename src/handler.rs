use crate::error::{CryptError, Result};
use crate::params::{IdentSpec, RoundsSpec, Salt, SaltSpec};

use std::collections::BTreeMap;
use std::fmt;
use subtle::ConstantTimeEq;

/// Auxiliary runtime values some schemes need in order to hash or verify, keyed by the names
/// in [`HandlerInfo::context_kwds`] (for example, `user` for `postgres_md5`).
pub type ContextKwds = BTreeMap<String, String>;

/// A password or other secret to be hashed. Wraps a borrowed byte slice so every handler
/// sees the same canonical byte form, however the caller happened to hold the secret.
#[derive(Clone, Copy)]
pub struct Secret<'a>(&'a [u8]);

impl<'a> Secret<'a> {
    /// Wraps a reference to anything that can be viewed as bytes
    pub fn using<T: AsRef<[u8]> + ?Sized>(secret: &'a T) -> Self {
        Self(secret.as_ref())
    }

    /// The secret's bytes
    pub fn as_bytes(&self) -> &'a [u8] {
        self.0
    }

    /// Length of the secret in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the secret is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fails if the secret contains a NUL byte, which C-string based backends would silently
    /// treat as the end of the secret
    pub fn forbid_nul(&self) -> Result<()> {
        if self.0.contains(&0) {
            return Err(CryptError::ForbiddenSecretContent(
                "secret must not contain NUL bytes",
            ));
        }

        Ok(())
    }

    /// The secret as UTF-8 text
    pub fn as_str(&self) -> Result<&'a str> {
        match std::str::from_utf8(self.0) {
            Ok(s) => Ok(s),
            Err(_) => Err(CryptError::ForbiddenSecretContent(
                "secret must be valid UTF-8 for this scheme",
            )),
        }
    }
}

impl fmt::Debug for Secret<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({} bytes)", self.0.len())
    }
}

impl<'a> From<&'a [u8]> for Secret<'a> {
    fn from(secret: &'a [u8]) -> Self {
        Self(secret)
    }
}

impl<'a> From<&'a Vec<u8>> for Secret<'a> {
    fn from(secret: &'a Vec<u8>) -> Self {
        Self(secret)
    }
}

impl<'a, const SIZE: usize> From<&'a [u8; SIZE]> for Secret<'a> {
    fn from(secret: &'a [u8; SIZE]) -> Self {
        Self(secret)
    }
}

impl<'a> From<&'a str> for Secret<'a> {
    fn from(secret: &'a str) -> Self {
        Self(secret.as_bytes())
    }
}

impl<'a> From<&'a String> for Secret<'a> {
    fn from(secret: &'a String) -> Self {
        Self(secret.as_bytes())
    }
}

/// Compares two byte strings in time that depends only on their lengths
pub fn consteq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// The checksum portion of a hash
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Checksum {
    /// Raw digest bytes
    Bytes(Vec<u8>),
    /// A checksum kept in its encoded form (bcrypt's 31 characters)
    Text(String),
    /// One digest per algorithm, keyed by IANA name (SCRAM)
    Digests(BTreeMap<String, Vec<u8>>),
}

impl Checksum {
    /// Constant-time comparison of two checksums. Checksums of different shapes never match.
    pub fn ct_eq(&self, other: &Checksum) -> bool {
        match (self, other) {
            (Checksum::Bytes(a), Checksum::Bytes(b)) => consteq(a, b),
            (Checksum::Text(a), Checksum::Text(b)) => consteq(a.as_bytes(), b.as_bytes()),
            (Checksum::Digests(a), Checksum::Digests(b)) => {
                if !a.keys().eq(b.keys()) {
                    return false;
                }

                a.values()
                    .zip(b.values())
                    .fold(true, |acc, (x, y)| consteq(x, y) & acc)
            }
            _ => false,
        }
    }
}

/// The structured form of a stored hash: everything the wire format carries, decoded
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HashRecord {
    /// Identifier tag (`2b`), if the scheme has several
    pub ident: Option<String>,
    /// Format version, for schemes that have revised their encoding
    pub version: Option<u32>,
    /// Cost parameter, in the handler's native units
    pub rounds: Option<u32>,
    /// Salt
    pub salt: Option<Salt>,
    /// Digest algorithms a multi-digest hash was configured with
    pub algs: Vec<String>,
    /// Checksum; `None` for a configuration string
    pub checksum: Option<Checksum>,
}

impl HashRecord {
    /// Applies the parameter handling every scheme shares: ident resolution, rounds
    /// normalization, and salt normalization or generation.
    pub fn configure_from(info: &HandlerInfo, settings: &Settings) -> Result<Self> {
        let mut record = HashRecord::default();

        if let Some(ident) = &info.ident {
            record.ident = Some(ident.resolve(info.name, settings.ident.as_deref())?.to_string());
        }

        if let Some(rounds) = &info.rounds {
            record.rounds = Some(rounds.normalize(info.name, settings.rounds)?);
        }

        if let Some(salt) = &info.salt {
            record.salt = Some(match &settings.salt {
                Some(s) => salt.normalize(info.name, s.clone(), settings.relaxed)?.0,
                None => {
                    let size = salt.resolve_size(info.name, settings.salt_size, settings.relaxed)?;
                    salt.generate(size)
                }
            });
        }

        Ok(record)
    }

    /// The salt as text; fails if the record carries none
    pub fn salt_text(&self, handler: &str) -> Result<&str> {
        match &self.salt {
            Some(Salt::Text(s)) => Ok(s),
            _ => Err(CryptError::unsupported(handler, "missing salt")),
        }
    }

    /// The salt bytes; fails if the record carries none
    pub fn salt_bytes(&self, handler: &str) -> Result<&[u8]> {
        match &self.salt {
            Some(s) => Ok(s.as_bytes()),
            None => Err(CryptError::unsupported(handler, "missing salt")),
        }
    }

    /// The rounds value; fails if the record carries none
    pub fn rounds_value(&self, handler: &str) -> Result<u32> {
        match self.rounds {
            Some(r) => Ok(r),
            None => Err(CryptError::unsupported(handler, "missing rounds")),
        }
    }
}

/// Caller-supplied settings for creating a new hash. Unset fields fall back to the policy,
/// then to the handler's defaults.
///
/// ```rust
/// use crypt_context::Settings;
///
/// let settings = Settings::new().rounds(10).ident("2a");
/// assert_eq!(settings.rounds, Some(10));
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Settings {
    /// Explicit salt. In most cases this should be left unset so a random salt is generated.
    pub salt: Option<Salt>,
    /// Size of the generated salt, in the handler's salt units
    pub salt_size: Option<usize>,
    /// Cost parameter, in the handler's native units
    pub rounds: Option<u32>,
    /// Identifier tag, for schemes with several
    pub ident: Option<String>,
    /// Digest algorithms, for multi-digest schemes
    pub algs: Option<Vec<String>>,
    /// Reject secrets the scheme would otherwise silently truncate
    pub truncate_error: Option<bool>,
    /// Correct out-of-bounds salts instead of failing
    pub relaxed: bool,
}

impl Settings {
    /// Create an empty set of settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a specific salt made of the handler's salt characters. Only use this if you are
    /// trying to generate a hash deterministically; a random salt is generated otherwise.
    pub fn salt(mut self, salt: &str) -> Self {
        self.salt = Some(Salt::Text(salt.to_string()));
        self
    }

    /// Uses a specific raw salt, for schemes that store binary salts
    pub fn raw_salt(mut self, salt: &[u8]) -> Self {
        self.salt = Some(Salt::Raw(salt.to_vec()));
        self
    }

    /// The size of the generated salt
    pub fn salt_size(mut self, size: usize) -> Self {
        self.salt_size = Some(size);
        self
    }

    /// The cost parameter. For log2-cost schemes such as bcrypt, each increment doubles the
    /// work.
    pub fn rounds(mut self, rounds: u32) -> Self {
        self.rounds = Some(rounds);
        self
    }

    /// The identifier tag to emit
    pub fn ident(mut self, ident: &str) -> Self {
        self.ident = Some(ident.to_string());
        self
    }

    /// The digest algorithms to include
    pub fn algs<I, S>(mut self, algs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.algs = Some(algs.into_iter().map(|s| s.as_ref().to_string()).collect());
        self
    }

    /// Whether secrets longer than the scheme can use are an error
    pub fn truncate_error(mut self, truncate_error: bool) -> Self {
        self.truncate_error = Some(truncate_error);
        self
    }

    /// Correct out-of-range salts and salt sizes with a warning instead of failing
    pub fn relaxed(mut self, relaxed: bool) -> Self {
        self.relaxed = relaxed;
        self
    }

    /// Fills every unset field from `defaults`
    pub fn merged_over(mut self, defaults: &Settings) -> Self {
        if self.salt.is_none() {
            self.salt = defaults.salt.clone();
        }
        if self.salt_size.is_none() {
            self.salt_size = defaults.salt_size;
        }
        if self.rounds.is_none() {
            self.rounds = defaults.rounds;
        }
        if self.ident.is_none() {
            self.ident = defaults.ident.clone();
        }
        if self.algs.is_none() {
            self.algs = defaults.algs.clone();
        }
        if self.truncate_error.is_none() {
            self.truncate_error = defaults.truncate_error;
        }
        self.relaxed |= defaults.relaxed;
        self
    }
}

/// Metadata describing a handler
#[derive(Clone, Copy, Debug)]
pub struct HandlerInfo {
    /// Globally unique name, matching `[a-z0-9_]+`
    pub name: &'static str,
    /// Names of the settings accepted when creating a new hash
    pub setting_kwds: &'static [&'static str],
    /// Names of the runtime values required to hash or verify
    pub context_kwds: &'static [&'static str],
    /// Rounds bounds, for schemes with a cost parameter
    pub rounds: Option<RoundsSpec>,
    /// Salt bounds, for salted schemes
    pub salt: Option<SaltSpec>,
    /// Identifier tags, for schemes with several wire variants
    pub ident: Option<IdentSpec>,
}

impl HandlerInfo {
    /// Whether the handler accepts the named setting
    pub fn accepts_setting(&self, name: &str) -> bool {
        self.setting_kwds.contains(&name)
    }
}

/// Fetches a required context keyword
pub fn require_context<'c>(
    info: &HandlerInfo,
    context: &'c ContextKwds,
    key: &'static str,
) -> Result<&'c str> {
    match context.get(key) {
        Some(v) => Ok(v),
        None => Err(CryptError::unsupported(
            info.name,
            format!("the {:?} context keyword is required", key),
        )),
    }
}

/// Whether a record's rounds fall below what `settings` (or the handler default) asks for
pub fn rounds_below_target(info: &HandlerInfo, record: &HashRecord, settings: &Settings) -> bool {
    match (&info.rounds, record.rounds) {
        (Some(spec), Some(rounds)) => match settings.rounds.or(spec.default) {
            Some(target) => rounds < target.clamp(spec.min, spec.max),
            None => false,
        },
        _ => false,
    }
}

/// One password hashing algorithm.
///
/// Implementors supply parsing, rendering, configuration and the raw checksum computation;
/// hashing, verification and canonicalization are derived from those. Handlers whose wire
/// format admits several spellings of the same checksum (case-insensitive hex, multiple
/// digests) override [`Handler::verify`] to compare decoded fields.
pub trait Handler: fmt::Debug + Send + Sync {
    /// Static metadata for this handler
    fn info(&self) -> &HandlerInfo;

    /// The handler's registered name
    fn name(&self) -> &'static str {
        self.info().name
    }

    /// Returns `true` if `hash` unambiguously belongs to this scheme. Never fails.
    fn identify(&self, hash: &str) -> bool;

    /// Parses a hash or configuration string
    fn parse(&self, hash: &str) -> Result<HashRecord>;

    /// Renders a record in canonical form. Records without a checksum render as
    /// configuration strings.
    fn render(&self, record: &HashRecord) -> Result<String>;

    /// Builds a configuration (salt, cost, identifier; no checksum) from settings
    fn configure(&self, settings: &Settings) -> Result<HashRecord> {
        HashRecord::configure_from(self.info(), settings)
    }

    /// Computes the checksum of `secret` under `config`
    fn compute(
        &self,
        secret: Secret<'_>,
        config: &HashRecord,
        context: &ContextKwds,
    ) -> Result<Checksum>;

    /// Hashes a secret with freshly configured parameters
    fn hash(&self, secret: Secret<'_>, settings: &Settings, context: &ContextKwds) -> Result<String> {
        let mut record = self.configure(settings)?;
        let checksum = self.compute(secret, &record, context)?;
        record.checksum = Some(checksum);
        self.render(&record)
    }

    /// Checks a secret against a stored hash. A mismatch is `Ok(false)`; only structurally
    /// invalid input is an error.
    fn verify(&self, secret: Secret<'_>, hash: &str, context: &ContextKwds) -> Result<bool> {
        let record = self.parse(hash)?;
        let expected = match &record.checksum {
            Some(c) => c,
            None => return Err(CryptError::malformed(self.name(), "hash has no checksum")),
        };

        let actual = self.compute(secret, &record, context)?;
        Ok(actual.ct_eq(expected))
    }

    /// Whether the hash was created with parameters weaker than `settings` asks for
    fn needs_update(&self, hash: &str, settings: &Settings) -> Result<bool> {
        let record = self.parse(hash)?;
        Ok(rounds_below_target(self.info(), &record, settings))
    }

    /// Re-renders a hash in canonical form. Strings this handler does not identify are
    /// returned unchanged.
    fn normhash(&self, hash: &str) -> Result<String> {
        if !self.identify(hash) {
            return Ok(hash.to_string());
        }

        self.render(&self.parse(hash)?)
    }

    /// Renders a fresh configuration string
    fn genconfig(&self, settings: &Settings) -> Result<String> {
        self.render(&self.configure(settings)?)
    }
}
