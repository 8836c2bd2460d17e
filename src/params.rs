//! Parameter handling shared by most schemes: salts, rounds and multi-identifier tags. A
//! handler declares bounds with [`SaltSpec`], [`RoundsSpec`] and [`IdentSpec`]; the
//! normalization rules live here so every handler applies them the same way.

use crate::encoding;
use crate::error::CryptError;

use rand::{rngs::OsRng, Rng, RngCore};
use std::str::FromStr;
use tracing::warn;

/// A salt, either as text drawn from a handler-specific alphabet or as raw bytes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Salt {
    /// Salt stored in the hash exactly as these characters
    Text(String),
    /// Salt stored encoded; the handler decides the encoding
    Raw(Vec<u8>),
}

impl Salt {
    /// The salt's bytes. For text salts these are the characters themselves.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Salt::Text(s) => s.as_bytes(),
            Salt::Raw(b) => b,
        }
    }

    /// Length in characters (text) or bytes (raw)
    pub fn len(&self) -> usize {
        match self {
            Salt::Text(s) => s.chars().count(),
            Salt::Raw(b) => b.len(),
        }
    }

    /// Whether the salt is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a salt is made of
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaltCharset {
    /// Characters from the given alphabet
    Text(&'static str),
    /// Arbitrary bytes
    Raw,
}

/// Salt bounds for one handler
#[derive(Clone, Copy, Debug)]
pub struct SaltSpec {
    /// Smallest salt accepted
    pub min_size: usize,
    /// Largest salt accepted
    pub max_size: usize,
    /// Size of generated salts when no `salt_size` is requested
    pub default_size: usize,
    /// Salt alphabet
    pub charset: SaltCharset,
    /// The last character has padding bits that must be zero (bcrypt64 salts)
    pub repair_padding: bool,
}

impl SaltSpec {
    /// Validates a requested salt size. Out-of-range sizes are clamped when `relaxed`.
    pub fn resolve_size(
        &self,
        handler: &str,
        size: Option<usize>,
        relaxed: bool,
    ) -> Result<usize, CryptError> {
        let size = match size {
            Some(s) => s,
            None => return Ok(self.default_size),
        };

        if size < self.min_size || size > self.max_size {
            if !relaxed {
                return Err(CryptError::unsupported(
                    handler,
                    format!(
                        "salt_size must be between {} and {}, got {}",
                        self.min_size, self.max_size, size
                    ),
                ));
            }

            let clamped = size.clamp(self.min_size, self.max_size);
            warn!(handler, "salt_size {} clamped to {}", size, clamped);
            return Ok(clamped);
        }

        Ok(size)
    }

    /// Generates a fresh salt from the operating system's secure random number generator
    pub fn generate(&self, size: usize) -> Salt {
        match self.charset {
            SaltCharset::Raw => {
                let mut salt = vec![0u8; size];
                OsRng.fill_bytes(&mut salt);
                Salt::Raw(salt)
            }

            SaltCharset::Text(chars) => {
                let chars = chars.as_bytes();
                let salt: String = (0..size)
                    .map(|_| char::from(chars[OsRng.gen_range(0..chars.len())]))
                    .collect();

                if self.repair_padding {
                    Salt::Text(encoding::bcrypt64_repair_unused(&salt).1)
                } else {
                    Salt::Text(salt)
                }
            }
        }
    }

    /// Brings a caller-supplied or parsed salt into canonical form. Returns whether anything
    /// had to be corrected.
    ///
    /// * Characters outside the alphabet are fatal unless `relaxed`, in which case they are
    ///   replaced with the alphabet's first character.
    /// * Salts longer than the maximum are truncated.
    /// * Salts shorter than the minimum are fatal unless `relaxed`, in which case they are
    ///   right-padded.
    /// * Nonzero padding bits are cleared.
    pub fn normalize(
        &self,
        handler: &str,
        candidate: Salt,
        relaxed: bool,
    ) -> Result<(Salt, bool), CryptError> {
        let mut corrected = false;

        let mut salt = match (candidate, self.charset) {
            (Salt::Text(text), SaltCharset::Text(chars)) => {
                if encoding::is_in_charset(&text, chars) {
                    Salt::Text(text)
                } else if relaxed {
                    let first = chars.chars().next().unwrap_or('.');
                    let fixed: String = text
                        .chars()
                        .map(|c| if chars.contains(c) { c } else { first })
                        .collect();
                    warn!(handler, "salt contains invalid characters; replaced with {:?}", first);
                    corrected = true;
                    Salt::Text(fixed)
                } else {
                    return Err(CryptError::unsupported(
                        handler,
                        "salt contains characters outside of the salt alphabet",
                    ));
                }
            }

            (Salt::Raw(raw), SaltCharset::Raw) => Salt::Raw(raw),
            (Salt::Text(text), SaltCharset::Raw) => Salt::Raw(text.into_bytes()),

            (Salt::Raw(_), SaltCharset::Text(_)) => {
                return Err(CryptError::unsupported(
                    handler,
                    "salt must be given as text for this scheme",
                ))
            }
        };

        let len = salt.len();
        if len > self.max_size {
            warn!(handler, "salt too large ({} > {}); truncated", len, self.max_size);
            salt = match salt {
                Salt::Text(s) => Salt::Text(s.chars().take(self.max_size).collect()),
                Salt::Raw(mut b) => {
                    b.truncate(self.max_size);
                    Salt::Raw(b)
                }
            };
            corrected = true;
        } else if len < self.min_size {
            if !relaxed {
                return Err(CryptError::unsupported(
                    handler,
                    format!("salt too small ({} < {})", len, self.min_size),
                ));
            }

            warn!(handler, "salt too small ({} < {}); padded", len, self.min_size);
            salt = match (salt, self.charset) {
                (Salt::Text(mut s), SaltCharset::Text(chars)) => {
                    let pad = chars.chars().next().unwrap_or('.');
                    s.extend(std::iter::repeat(pad).take(self.min_size - len));
                    Salt::Text(s)
                }
                (Salt::Raw(mut b), _) => {
                    b.resize(self.min_size, 0);
                    Salt::Raw(b)
                }
                (other, _) => other,
            };
            corrected = true;
        }

        if self.repair_padding {
            if let Salt::Text(ref s) = salt {
                let (repaired, fixed) = encoding::bcrypt64_repair_with_warning(handler, "salt", s);
                if repaired {
                    salt = Salt::Text(fixed);
                    corrected = true;
                }
            }
        }

        Ok((salt, corrected))
    }
}

/// How a stored rounds value relates to the work performed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundsCost {
    /// The value is the iteration count
    Linear,
    /// The value is the binary logarithm of the iteration count
    Log2,
}

/// Rounds bounds for one handler
#[derive(Clone, Copy, Debug)]
pub struct RoundsSpec {
    /// Smallest rounds value accepted
    pub min: u32,
    /// Largest rounds value accepted
    pub max: u32,
    /// Rounds used when none is requested
    pub default: Option<u32>,
    /// Meaning of the rounds value
    pub cost: RoundsCost,
}

impl RoundsSpec {
    /// Falls back to the default and clamps into `[min, max]`. Clamping is never fatal.
    pub fn normalize(&self, handler: &str, requested: Option<u32>) -> Result<u32, CryptError> {
        let rounds = match requested.or(self.default) {
            Some(r) => r,
            None => return Err(CryptError::unsupported(handler, "no rounds specified")),
        };

        let clamped = rounds.clamp(self.min, self.max);
        if clamped != rounds {
            warn!(
                handler,
                "rounds {} outside of [{}, {}]; clamped to {}", rounds, self.min, self.max, clamped
            );
        }

        Ok(clamped)
    }

    /// Draws uniformly around `base`, re-clamped into this handler's bounds. Percentages are
    /// applied to the iteration count, so for log2 costs the window is computed in linear
    /// space and converted back.
    pub fn vary(&self, base: u32, vary: VaryRounds) -> u32 {
        let (lower, upper) = self.vary_window(base, vary);
        if lower >= upper {
            return lower;
        }

        OsRng.gen_range(lower..=upper)
    }

    /// Inclusive bounds `vary` draws from
    fn vary_window(&self, base: u32, vary: VaryRounds) -> (u32, u32) {
        let (lower, upper) = match (vary, self.cost) {
            (VaryRounds::Absolute(v), _) => (base.saturating_sub(v), base.saturating_add(v)),

            (VaryRounds::Percent(p), RoundsCost::Linear) => {
                let delta =
                    u32::try_from(u64::from(base) * u64::from(p) / 100).unwrap_or(u32::MAX);
                (base.saturating_sub(delta), base.saturating_add(delta))
            }

            (VaryRounds::Percent(p), RoundsCost::Log2) => {
                let linear = 2f64.powi(base.min(62) as i32);
                let delta = linear * f64::from(p) / 100.0;
                let lower = linear_to_log2(linear - delta, false);
                let upper = linear_to_log2(linear + delta, true);
                (lower.min(base), upper.max(base))
            }
        };

        (lower.clamp(self.min, self.max), upper.clamp(self.min, self.max))
    }
}

fn linear_to_log2(value: f64, upper: bool) -> u32 {
    if value <= 1.0 {
        return 0;
    }

    let log = value.log2();
    if upper {
        log.floor() as u32
    } else {
        log.ceil() as u32
    }
}

/// How far a policy lets generated rounds stray from the default
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VaryRounds {
    /// Plus or minus this many rounds (in the handler's native units)
    Absolute(u32),
    /// Plus or minus this percentage of the default iteration count
    Percent(u32),
}

impl FromStr for VaryRounds {
    type Err = CryptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || CryptError::InvalidPolicyValue {
            key: String::from("vary_rounds"),
            reason: format!("expected an integer or a percentage, got {:?}", s),
        };

        match s.strip_suffix('%') {
            Some(p) => p.trim().parse().map(VaryRounds::Percent).map_err(|_| invalid()),
            None => s.parse().map(VaryRounds::Absolute).map_err(|_| invalid()),
        }
    }
}

/// Rounds overrides a policy applies on top of a handler's own bounds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoundsPolicy {
    /// Rounds below this are raised (and stored hashes below it need updating)
    pub min_rounds: Option<u32>,
    /// Rounds above this are lowered
    pub max_rounds: Option<u32>,
    /// Rounds for new hashes
    pub default_rounds: Option<u32>,
    /// Randomization applied to `default_rounds`
    pub vary_rounds: Option<VaryRounds>,
}

impl RoundsPolicy {
    /// Picks the rounds for a new hash. An explicit request wins over the policy default,
    /// both are clamped into the policy's bounds (`min_rounds` taking precedence), and the
    /// handler clamps once more against its own bounds when it configures the hash.
    /// `None` means "use the handler's default".
    pub fn resolve(&self, spec: &RoundsSpec, requested: Option<u32>) -> Option<u32> {
        let rounds = match requested {
            Some(r) => Some(r),
            None => {
                let default = self
                    .default_rounds
                    .or(self.max_rounds)
                    .or(self.min_rounds);

                match (default, self.vary_rounds) {
                    (Some(d), Some(vary)) => Some(spec.vary(d, vary)),
                    (Some(d), None) => Some(d),
                    (None, _) => None,
                }
            }
        };

        rounds.map(|mut r| {
            if let Some(max) = self.max_rounds {
                r = r.min(max);
            }
            if let Some(min) = self.min_rounds {
                r = r.max(min);
            }
            r
        })
    }

    /// Whether this policy constrains rounds at all
    pub fn is_empty(&self) -> bool {
        *self == RoundsPolicy::default()
    }
}

/// The identifier tags a multi-variant scheme accepts
#[derive(Clone, Copy, Debug)]
pub struct IdentSpec {
    /// Canonical tags, without `$` decoration (`2a`)
    pub idents: &'static [&'static str],
    /// Alternate spellings mapped to canonical tags (`sha256` to `1`)
    pub aliases: &'static [(&'static str, &'static str)],
    /// Tag used when none is requested
    pub default: &'static str,
}

impl IdentSpec {
    /// Resolves a requested tag, accepting canonical tags, their `$tag$` wire form, and aliases
    pub fn resolve(&self, handler: &str, ident: Option<&str>) -> Result<&'static str, CryptError> {
        let ident = match ident {
            Some(i) => i,
            None => return Ok(self.default),
        };

        let bare = ident.trim_matches('$');

        if let Some(found) = self.idents.iter().find(|i| **i == bare) {
            return Ok(found);
        }

        if let Some((_, target)) = self.aliases.iter().find(|(alias, _)| *alias == bare) {
            return Ok(target);
        }

        Err(CryptError::unsupported(
            handler,
            format!("unknown identifier {:?}", ident),
        ))
    }
}
