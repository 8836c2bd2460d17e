//! Server-side storage for SCRAM (RFC 5802) credentials.
//!
//! A `$scram$` hash stores one salted password per digest algorithm, all sharing a salt and
//! iteration count:
//!
//! ```text
//! $scram$<rounds>$<ab64 salt>$sha-1=<ab64 digest>,sha-256=<ab64 digest>,...
//! ```
//!
//! Besides the usual handler operations, [`Scram`] exposes the helpers a SCRAM
//! authentication stack needs to answer a client from a stored hash, and [`ScramRecord`]
//! performs the key arithmetic. The handshake itself is out of scope.

use crate::digest::{norm_digest_name, DigestKind};
use crate::encoding;
use crate::error::{CryptError, Result};
use crate::handler::{
    consteq, rounds_below_target, Checksum, ContextKwds, Handler, HandlerInfo, HashRecord,
    Secret, Settings,
};
use crate::lexer::{parse_decimal, TokenizedHash};
use crate::params::{RoundsCost, RoundsSpec, Salt, SaltCharset, SaltSpec};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

const NAME: &str = "scram";
const IDENT: &str = "scram";

/// Digests included in new hashes when no `algs` setting is given
pub const DEFAULT_ALGS: &[&str] = &["sha-1", "sha-256", "sha-512"];

/// Preference order when verifying against a single digest
const VERIFY_ORDER: &[&str] = &["sha-256", "sha-512", "sha-384", "sha-224", "sha-1"];

/// SCRAM mechanism names top out at `SCRAM-` plus nine characters
const MAX_ALG_LEN: usize = 9;

const INFO: HandlerInfo = HandlerInfo {
    name: NAME,
    setting_kwds: &["salt", "salt_size", "rounds", "algs"],
    context_kwds: &[],
    rounds: Some(RoundsSpec {
        min: 1,
        max: u32::MAX,
        default: Some(100_000),
        cost: RoundsCost::Linear,
    }),
    salt: Some(SaltSpec {
        min_size: 0,
        max_size: 1024,
        default_size: 12,
        charset: SaltCharset::Raw,
        repair_padding: false,
    }),
    ident: None,
};

fn check_alg_name(alg: &str) -> Result<()> {
    if alg.len() > MAX_ALG_LEN {
        return Err(CryptError::unsupported(
            NAME,
            format!("algorithm names are limited to {} characters: {:?}", MAX_ALG_LEN, alg),
        ));
    }

    Ok(())
}

/// Normalizes, sorts and deduplicates an algorithm list. SHA-1 is mandatory in SCRAM.
fn norm_algs<S: AsRef<str>>(algs: &[S]) -> Result<Vec<String>> {
    let mut normed = Vec::with_capacity(algs.len());

    for alg in algs {
        let alg = norm_digest_name(alg.as_ref());
        check_alg_name(&alg)?;
        normed.push(alg);
    }

    normed.sort();
    normed.dedup();

    if !normed.iter().any(|a| a == "sha-1") {
        return Err(CryptError::unsupported(NAME, "sha-1 must be in the algorithm list"));
    }

    Ok(normed)
}

fn digest_kind(alg: &str) -> Result<DigestKind> {
    match DigestKind::from_name(alg) {
        Some(k) => Ok(k),
        None => Err(CryptError::unsupported(
            NAME,
            format!("unsupported digest algorithm {:?}", alg),
        )),
    }
}

fn decode_ab64(field: &str, what: &str) -> Result<Vec<u8>> {
    match encoding::ab64_decode(field) {
        Ok(b) => Ok(b),
        Err(_) => Err(CryptError::MalformedHash(format!(
            "{}: {} is not valid ab64",
            NAME, what
        ))),
    }
}

fn digests_of(record: &HashRecord) -> Result<&BTreeMap<String, Vec<u8>>> {
    match &record.checksum {
        Some(Checksum::Digests(d)) => Ok(d),
        Some(_) => Err(CryptError::unsupported(NAME, "checksum must be a digest map")),
        None => Err(CryptError::malformed(NAME, "hash contains no digests")),
    }
}

/// The SCRAM credential store format
#[derive(Debug, Default)]
pub struct Scram;

impl Scram {
    /// Extracts `(salt, rounds, salted password)` for one algorithm from a stored hash.
    /// `alg` may be any spelling [`norm_digest_name`] accepts, including a SCRAM mechanism
    /// name like `SCRAM-SHA-256`.
    pub fn extract_digest_info(hash: &str, alg: &str) -> Result<(Vec<u8>, u32, Vec<u8>)> {
        let alg = norm_digest_name(alg);
        let record = Scram.parse(hash)?;
        let digests = digests_of(&record)?;

        let digest = match digests.get(&alg) {
            Some(d) => d.clone(),
            None => {
                return Err(CryptError::unsupported(
                    NAME,
                    format!("hash has no digest for {:?}", alg),
                ))
            }
        };

        Ok((
            record.salt_bytes(NAME)?.to_vec(),
            record.rounds_value(NAME)?,
            digest,
        ))
    }

    /// IANA names of every algorithm stored in a hash or configuration string
    pub fn extract_digest_algs(hash: &str) -> Result<Vec<String>> {
        Ok(Scram.parse(hash)?.algs)
    }

    /// `SaltedPassword := Hi(Normalize(password), salt, i)`
    pub fn derive_digest(secret: Secret<'_>, salt: &[u8], rounds: u32, alg: &str) -> Result<Vec<u8>> {
        let kind = digest_kind(&norm_digest_name(alg))?;

        let prepped = match stringprep::saslprep(secret.as_str()?) {
            Ok(p) => p,
            Err(_) => {
                return Err(CryptError::ForbiddenSecretContent(
                    "secret contains characters prohibited by SASLprep",
                ))
            }
        };

        if rounds == 0 {
            return Err(CryptError::unsupported(NAME, "rounds must be at least 1"));
        }

        Ok(kind.pbkdf2(prepped.as_bytes(), salt, rounds, kind.output_size()))
    }

    /// Checks every stored digest rather than only the strongest. A hash whose digests
    /// disagree with one another never verifies.
    pub fn verify_full(&self, secret: Secret<'_>, hash: &str) -> Result<bool> {
        let record = self.parse(hash)?;
        if record.checksum.is_none() {
            return Ok(false);
        }
        let digests = digests_of(&record)?;
        let salt = record.salt_bytes(NAME)?;
        let rounds = record.rounds_value(NAME)?;

        let mut correct = false;
        let mut failed = false;

        for (alg, stored) in digests {
            let derived = Self::derive_digest(secret, salt, rounds, alg)?;
            if derived.len() != stored.len() {
                return Err(CryptError::MalformedHash(format!(
                    "{}: mis-sized {} digest ({} != {})",
                    NAME,
                    alg,
                    stored.len(),
                    derived.len()
                )));
            }

            if consteq(&derived, stored) {
                correct = true;
            } else {
                failed = true;
            }
        }

        if correct && failed {
            warn!(handler = NAME, "scram hash verified inconsistently, may be corrupted");
            return Ok(false);
        }

        Ok(correct)
    }

    fn target_algs(settings: &Settings) -> Result<Vec<String>> {
        match &settings.algs {
            Some(algs) => norm_algs(algs),
            None => norm_algs(DEFAULT_ALGS),
        }
    }
}

impl Handler for Scram {
    fn info(&self) -> &HandlerInfo {
        &INFO
    }

    fn identify(&self, hash: &str) -> bool {
        hash.starts_with("$scram$")
    }

    fn parse(&self, hash: &str) -> Result<HashRecord> {
        let tokens = TokenizedHash::tokenize(NAME, hash)?;

        if tokens.ident != IDENT {
            return Err(CryptError::malformed(NAME, "wrong identifier"));
        }

        tokens.expect_fields(NAME, 3)?;

        let rounds = parse_decimal(NAME, tokens.fields[0], "rounds")?;
        if rounds == 0 {
            return Err(CryptError::malformed(NAME, "rounds must be at least 1"));
        }

        let salt = decode_ab64(tokens.fields[1], "salt")?;

        let data = tokens.fields[2];
        if data.is_empty() {
            return Err(CryptError::malformed(NAME, "missing digest list"));
        }

        let (algs, checksum) = if data.contains('=') {
            let mut digests = BTreeMap::new();

            for pair in data.split(',') {
                let (alg, digest) = match pair.split_once('=') {
                    Some(p) => p,
                    None => return Err(CryptError::malformed(NAME, "digest entry lacks '='")),
                };

                if alg != norm_digest_name(alg) || alg.len() > MAX_ALG_LEN {
                    return Err(CryptError::MalformedHash(format!(
                        "{}: malformed algorithm name {:?}",
                        NAME, alg
                    )));
                }

                if digests
                    .insert(alg.to_string(), decode_ab64(digest, "digest")?)
                    .is_some()
                {
                    return Err(CryptError::malformed(NAME, "duplicate algorithm"));
                }
            }

            if !digests.contains_key("sha-1") {
                return Err(CryptError::malformed(NAME, "sha-1 digest is missing"));
            }

            let algs = digests.keys().cloned().collect();
            (algs, Some(Checksum::Digests(digests)))
        } else {
            let algs: Vec<&str> = data.split(',').collect();
            match norm_algs(&algs) {
                Ok(a) => (a, None),
                Err(_) => return Err(CryptError::malformed(NAME, "invalid algorithm list")),
            }
        };

        Ok(HashRecord {
            rounds: Some(rounds),
            salt: Some(Salt::Raw(salt)),
            algs,
            checksum,
            ..HashRecord::default()
        })
    }

    fn render(&self, record: &HashRecord) -> Result<String> {
        let data = match &record.checksum {
            Some(Checksum::Digests(digests)) => digests
                .iter()
                .map(|(alg, d)| format!("{}={}", alg, encoding::ab64_encode(d)))
                .collect::<Vec<_>>()
                .join(","),
            Some(_) => return Err(CryptError::unsupported(NAME, "checksum must be a digest map")),
            None => record.algs.join(","),
        };

        Ok(format!(
            "${}${}${}${}",
            IDENT,
            record.rounds_value(NAME)?,
            encoding::ab64_encode(record.salt_bytes(NAME)?),
            data
        ))
    }

    fn configure(&self, settings: &Settings) -> Result<HashRecord> {
        let mut record = HashRecord::configure_from(&INFO, settings)?;
        record.algs = Self::target_algs(settings)?;

        for alg in &record.algs {
            digest_kind(alg)?;
        }

        Ok(record)
    }

    fn compute(&self, secret: Secret<'_>, config: &HashRecord, _context: &ContextKwds) -> Result<Checksum> {
        let salt = config.salt_bytes(NAME)?;
        let rounds = config.rounds_value(NAME)?;

        let mut digests = BTreeMap::new();
        for alg in &config.algs {
            digests.insert(alg.clone(), Self::derive_digest(secret, salt, rounds, alg)?);
        }

        Ok(Checksum::Digests(digests))
    }

    fn verify(&self, secret: Secret<'_>, hash: &str, _context: &ContextKwds) -> Result<bool> {
        let record = self.parse(hash)?;
        // A configuration string has nothing to match against
        if record.checksum.is_none() {
            return Ok(false);
        }
        let digests = digests_of(&record)?;

        for alg in VERIFY_ORDER {
            if let Some(stored) = digests.get(*alg) {
                let derived = Self::derive_digest(
                    secret,
                    record.salt_bytes(NAME)?,
                    record.rounds_value(NAME)?,
                    alg,
                )?;
                return Ok(consteq(&derived, stored));
            }
        }

        Err(CryptError::malformed(NAME, "sha-1 digest is missing"))
    }

    fn needs_update(&self, hash: &str, settings: &Settings) -> Result<bool> {
        let record = self.parse(hash)?;
        let target = Self::target_algs(settings)?;

        if !target.iter().all(|alg| record.algs.contains(alg)) {
            return Ok(true);
        }

        Ok(rounds_below_target(&INFO, &record, settings))
    }
}

/// The keys a SCRAM server derives from one stored digest
pub struct ScramRecord {
    /// Digest algorithm
    pub alg: DigestKind,
    /// Raw salt
    pub salt: Vec<u8>,
    /// Iteration count
    pub rounds: u32,
    /// `SaltedPassword`
    pub salted_password: Vec<u8>,
    /// `ClientKey := HMAC(SaltedPassword, "Client Key")`
    pub client_key: Vec<u8>,
    /// `StoredKey := H(ClientKey)`
    pub stored_key: Vec<u8>,
    /// `ServerKey := HMAC(SaltedPassword, "Server Key")`
    pub server_key: Vec<u8>,
    /// The salt in standard base64, as sent to the client
    pub encoded_salt: String,
}

impl ScramRecord {
    /// Derives the keys for `alg` from a stored digest
    pub fn new(alg: DigestKind, salt: Vec<u8>, rounds: u32, salted_password: Vec<u8>) -> Result<Self> {
        let client_key = alg.hmac(&salted_password, b"Client Key")?;
        let stored_key = alg.digest(&client_key);
        let server_key = alg.hmac(&salted_password, b"Server Key")?;
        let encoded_salt = STANDARD.encode(&salt);

        Ok(Self {
            alg,
            salt,
            rounds,
            salted_password,
            client_key,
            stored_key,
            server_key,
            encoded_salt,
        })
    }

    /// Loads the digest for `alg` out of a `$scram$` hash
    pub fn from_hash(hash: &str, alg: &str) -> Result<Self> {
        let kind = digest_kind(&norm_digest_name(alg))?;
        let (salt, rounds, digest) = Scram::extract_digest_info(hash, alg)?;
        Self::new(kind, salt, rounds, digest)
    }

    /// `ClientSignature := HMAC(StoredKey, AuthMessage)`
    pub fn client_signature(&self, auth_msg: &[u8]) -> Result<Vec<u8>> {
        self.alg.hmac(&self.stored_key, auth_msg)
    }

    /// `ClientProof := ClientKey XOR ClientSignature`
    pub fn client_proof(&self, auth_msg: &[u8]) -> Result<Vec<u8>> {
        let signature = self.client_signature(auth_msg)?;
        Ok(self
            .client_key
            .iter()
            .zip(signature.iter())
            .map(|(k, s)| k ^ s)
            .collect())
    }

    /// `ServerSignature := HMAC(ServerKey, AuthMessage)`
    pub fn server_signature(&self, auth_msg: &[u8]) -> Result<Vec<u8>> {
        self.alg.hmac(&self.server_key, auth_msg)
    }
}

impl fmt::Debug for ScramRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScramRecord")
            .field("alg", &self.alg)
            .field("rounds", &self.rounds)
            .field("encoded_salt", &self.encoded_salt)
            .finish_non_exhaustive()
    }
}
