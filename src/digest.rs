use crate::error::CryptError;

use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

/// The message digests the bundled handlers are built from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DigestKind {
    /// MD5 (legacy formats only)
    Md5,
    /// SHA-1
    Sha1,
    /// SHA-224
    Sha224,
    /// SHA-256
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

macro_rules! with_digest {
    ($kind:expr, $d:ident => $body:expr) => {
        match $kind {
            DigestKind::Md5 => {
                type $d = Md5;
                $body
            }
            DigestKind::Sha1 => {
                type $d = Sha1;
                $body
            }
            DigestKind::Sha224 => {
                type $d = Sha224;
                $body
            }
            DigestKind::Sha256 => {
                type $d = Sha256;
                $body
            }
            DigestKind::Sha384 => {
                type $d = Sha384;
                $body
            }
            DigestKind::Sha512 => {
                type $d = Sha512;
                $body
            }
        }
    };
}

impl DigestKind {
    /// Looks up a digest by name. Any spelling accepted by [`norm_digest_name`] works.
    pub fn from_name(name: &str) -> Option<Self> {
        match norm_digest_name(name).as_str() {
            "md5" => Some(DigestKind::Md5),
            "sha-1" => Some(DigestKind::Sha1),
            "sha-224" => Some(DigestKind::Sha224),
            "sha-256" => Some(DigestKind::Sha256),
            "sha-384" => Some(DigestKind::Sha384),
            "sha-512" => Some(DigestKind::Sha512),
            _ => None,
        }
    }

    /// The IANA hash name (`sha-256`)
    pub fn iana_name(self) -> &'static str {
        match self {
            DigestKind::Md5 => "md5",
            DigestKind::Sha1 => "sha-1",
            DigestKind::Sha224 => "sha-224",
            DigestKind::Sha256 => "sha-256",
            DigestKind::Sha384 => "sha-384",
            DigestKind::Sha512 => "sha-512",
        }
    }

    /// Size of the digest output, in bytes
    pub fn output_size(self) -> usize {
        with_digest!(self, D => <D as Digest>::output_size())
    }

    /// Hashes `data` in one shot
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        with_digest!(self, D => D::digest(data).to_vec())
    }

    /// HMAC of `msg` keyed with `key`
    pub fn hmac(self, key: &[u8], msg: &[u8]) -> Result<Vec<u8>, CryptError> {
        with_digest!(self, D => {
            let mut mac = match <Hmac<D> as Mac>::new_from_slice(key) {
                Ok(m) => m,
                Err(_) => {
                    return Err(CryptError::UnsupportedParameter(String::from(
                        "HMAC key has an invalid length",
                    )))
                }
            };
            mac.update(msg);
            Ok(mac.finalize().into_bytes().to_vec())
        })
    }

    /// PBKDF1: `H(secret || salt)`, re-hashed until `rounds` applications have been made
    pub fn pbkdf1(self, secret: &[u8], salt: &[u8], rounds: u32) -> Vec<u8> {
        with_digest!(self, D => {
            let mut hasher = D::new();
            hasher.update(secret);
            hasher.update(salt);
            let mut result = hasher.finalize();

            for _ in 1..rounds {
                result = D::digest(&result);
            }

            result.to_vec()
        })
    }

    /// PBKDF2-HMAC producing `len` bytes
    pub fn pbkdf2(self, secret: &[u8], salt: &[u8], rounds: u32, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        with_digest!(self, D => pbkdf2::pbkdf2_hmac::<D>(secret, salt, rounds, &mut out));
        out
    }
}

/// Normalizes a hash algorithm name to its IANA form, accepting the spellings found in the
/// wild: `SHA256`, `sha2_256`, `SCRAM-SHA-1-PLUS`, `sha1`, `md-5`.
pub fn norm_digest_name(name: &str) -> String {
    let mut name = name.trim().to_ascii_lowercase().replace('_', "-");

    if let Some(rest) = name.strip_prefix("scram-") {
        name = rest.to_string();
    }

    if let Some(rest) = name.strip_suffix("-plus") {
        name = rest.to_string();
    }

    if let Some(rest) = name.strip_prefix("sha2-") {
        name = format!("sha-{}", rest);
    }

    if let Some(i) = name.find(|c: char| c.is_ascii_digit()) {
        let (prefix, digits) = name.split_at(i);
        if !prefix.is_empty()
            && !prefix.ends_with('-')
            && prefix.bytes().all(|b| b.is_ascii_alphabetic())
            && digits.bytes().all(|b| b.is_ascii_digit())
        {
            name = format!("{}-{}", prefix, digits);
        }
    }

    if name == "md-5" {
        name = String::from("md5");
    }

    name
}
