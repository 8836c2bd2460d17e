use crate::backend::{ProbeOutcome, Prober, Verdict};
use crate::error::{CryptError, Result};

use tracing::{debug, warn};

/// What the probe battery learned about the active bcrypt backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BcryptCapabilities {
    /// The backend can't produce `$2$` hashes
    pub lacks_2: bool,
    /// The backend can't produce `$2y$` hashes
    pub lacks_2y: bool,
    /// The backend can't produce `$2b$` hashes
    pub lacks_2b: bool,
    /// `$2a$` hashes of secrets of 255 bytes or more wrap around to a few bytes of the secret
    pub has_2a_wraparound_bug: bool,
    /// Ident to compute with when the requested one is missing
    pub fallback_ident: &'static str,
}

impl Default for BcryptCapabilities {
    fn default() -> Self {
        Self {
            lacks_2: false,
            lacks_2y: false,
            lacks_2b: false,
            has_2a_wraparound_bug: false,
            fallback_ident: "2a",
        }
    }
}

pub(crate) const TEST_SECRET: &[u8] = b"test";
pub(crate) const TEST_HASH_2A: &str = "$2a$04$5BJqKfqMQvV7nS.yUguNcueVirQqDBGaLXSqj.rs.pZPlNR0UX/HK";
pub(crate) const TEST_HASH_2: &str = "$2$04$5BJqKfqMQvV7nS.yUguNcuRfMMOXK0xPWavM7pOzjEi5ze5T1k8/S";

/// "ё" in UTF-8. Implementations with the 8-bit bug sign-extend its bytes.
pub(crate) const EIGHT_BIT_SECRET: &[u8] = b"\xd1\x91";
const EIGHT_BIT_BUG_SUFFIX: &str = "05$6bNw2HLQYeqHYyBfLMsv/OiwqTymGIGzFsA4hOTWebfehXHNprcAS";
const EIGHT_BIT_OK_SUFFIX: &str = "05$6bNw2HLQYeqHYyBfLMsv/OUcZd0LKP39b87nBw3.S2tVZSqiQX6eu";

const WRAP_BUG_SUFFIX: &str = "04$R1lJ2gkNaoPGdafE.H.16.nVyh2niHsGJhayOHLMiXlI45o8/DU.6";
const WRAP_OK_SUFFIX: &str = "04$R1lJ2gkNaoPGdafE.H.16.1MKHPvmKwryeulRe225LKProWYwt9Oi";

/// 255 bytes of repeated digits
pub(crate) fn wraparound_secret() -> Vec<u8> {
    b"0123456789".iter().copied().cycle().take(255).collect()
}

pub(crate) fn eight_bit_bug_hash(ident: &str) -> String {
    format!("${}${}", ident, EIGHT_BIT_BUG_SUFFIX)
}

pub(crate) fn wraparound_bug_hash(ident: &str) -> String {
    format!("${}${}", ident, WRAP_BUG_SUFFIX)
}

/// The config portion of a reference hash (everything but the 31-character checksum)
fn config_of(hash: &str) -> &str {
    &hash[..hash.len() - 31]
}

fn probe_hash(prober: &Prober<'_>, secret: &[u8], hash: &str) -> Result<ProbeOutcome> {
    prober.probe(secret, config_of(hash), hash)
}

fn with_ident(hash: &str, ident: &str) -> String {
    format!("${}{}", ident, &hash[3..])
}

fn violation(prober: &Prober<'_>, detail: String) -> CryptError {
    CryptError::BackendContractViolation {
        backend: prober.backend_name(),
        detail,
    }
}

/// A backend that accepts a different secret as the right one can't be worked around
fn check_eight_bit_bug(prober: &Prober<'_>, ident: &str) -> Result<()> {
    let bug_hash = eight_bit_bug_hash(ident);
    if probe_hash(prober, EIGHT_BIT_SECRET, &bug_hash)? == ProbeOutcome::Match {
        return Err(CryptError::BackendSecurityDefect {
            backend: prober.backend_name(),
            detail: format!("${}$ hashes are affected by the 8-bit bug", ident),
        });
    }

    let ok_hash = format!("${}${}", ident, EIGHT_BIT_OK_SUFFIX);
    if probe_hash(prober, EIGHT_BIT_SECRET, &ok_hash)? != ProbeOutcome::Match {
        return Err(violation(
            prober,
            format!("${}$ failed the 8-bit reference vector", ident),
        ));
    }

    Ok(())
}

/// Returns whether the wraparound bug is present for `ident`
fn detect_wraparound_bug(prober: &Prober<'_>, ident: &str) -> Result<bool> {
    let secret = wraparound_secret();

    if probe_hash(prober, &secret, &wraparound_bug_hash(ident))? == ProbeOutcome::Match {
        return Ok(true);
    }

    let ok_hash = format!("${}${}", ident, WRAP_OK_SUFFIX);
    if probe_hash(prober, &secret, &ok_hash)? != ProbeOutcome::Match {
        return Err(violation(
            prober,
            format!("${}$ failed the wraparound reference vector", ident),
        ));
    }

    Ok(false)
}

/// Probes an optional variant. Returns `true` if the backend lacks it.
fn probe_optional_variant(prober: &Prober<'_>, hash: &str, ident: &str) -> Result<bool> {
    match probe_hash(prober, TEST_SECRET, hash)? {
        ProbeOutcome::Match => Ok(false),
        ProbeOutcome::Unsupported => {
            debug!(backend = prober.backend_name(), "backend lacks ${}$ support", ident);
            Ok(true)
        }
        ProbeOutcome::NoMatch => Err(violation(
            prober,
            format!("${}$ reference hash did not verify", ident),
        )),
    }
}

/// Characterizes a bcrypt backend. The `$2a$` self test is mandatory; failing it skips the
/// backend. The 8-bit bug is fatal for every variant and the wraparound bug is fatal for
/// `$2y$` and `$2b$`; under `$2a$` it is recorded and worked around.
pub(crate) fn bcrypt_battery(prober: &Prober<'_>) -> Result<Verdict<BcryptCapabilities>> {
    if probe_hash(prober, TEST_SECRET, TEST_HASH_2A)? != ProbeOutcome::Match {
        return Ok(Verdict::Reject(String::from("$2a$ self test failed")));
    }

    let mut caps = BcryptCapabilities::default();

    caps.lacks_2 = probe_optional_variant(prober, TEST_HASH_2, "2")?;

    check_eight_bit_bug(prober, "2a")?;

    caps.has_2a_wraparound_bug = detect_wraparound_bug(prober, "2a")?;
    if caps.has_2a_wraparound_bug {
        warn!(
            backend = prober.backend_name(),
            "bcrypt backend has the $2a$ wraparound bug; secrets of 255 bytes or more will be \
             truncated to 72 bytes before hashing"
        );
    }

    caps.lacks_2y = probe_optional_variant(prober, &with_ident(TEST_HASH_2A, "2y"), "2y")?;
    if !caps.lacks_2y {
        check_eight_bit_bug(prober, "2y")?;
        if detect_wraparound_bug(prober, "2y")? {
            return Err(CryptError::BackendSecurityDefect {
                backend: prober.backend_name(),
                detail: String::from("$2y$ hashes are affected by the wraparound bug"),
            });
        }
    }

    caps.lacks_2b = probe_optional_variant(prober, &with_ident(TEST_HASH_2A, "2b"), "2b")?;
    if !caps.lacks_2b {
        check_eight_bit_bug(prober, "2b")?;
        if detect_wraparound_bug(prober, "2b")? {
            return Err(CryptError::BackendSecurityDefect {
                backend: prober.backend_name(),
                detail: String::from("$2b$ hashes are affected by the wraparound bug"),
            });
        }
        caps.fallback_ident = "2b";
    }

    debug!(backend = prober.backend_name(), ?caps, "bcrypt backend characterized");
    Ok(Verdict::Accept(caps))
}
