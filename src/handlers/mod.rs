//! The bundled password hash handlers. [`builtin`] materializes one by name; the
//! [`Registry`](crate::Registry) calls it lazily so only the schemes actually used are ever
//! constructed.

pub mod bcrypt;
mod bcrypt_sha256;
mod digests;
mod fshp;
mod md5_crypt;
mod pbkdf2;
mod scram;

pub use bcrypt::Bcrypt;
pub use bcrypt_sha256::BcryptSha256;
pub use digests::{HexDigest, Plaintext, PostgresMd5, PrefixWrapper};
pub use fshp::Fshp;
pub use md5_crypt::Md5Crypt;
pub use pbkdf2::Pbkdf2;
pub use scram::{Scram, ScramRecord, DEFAULT_ALGS as SCRAM_DEFAULT_ALGS};

use crate::digest::DigestKind;
use crate::handler::Handler;

use std::sync::Arc;

/// Names [`builtin`] can materialize, sorted
pub const BUILTIN_NAMES: &[&str] = &[
    "apr_md5_crypt",
    "bcrypt",
    "bcrypt_sha256",
    "fshp",
    "hex_md5",
    "hex_sha1",
    "hex_sha256",
    "hex_sha512",
    "ldap_hex_md5",
    "ldap_hex_sha1",
    "md5_crypt",
    "pbkdf2_sha1",
    "pbkdf2_sha256",
    "pbkdf2_sha512",
    "plaintext",
    "postgres_md5",
    "roundup_plaintext",
    "scram",
];

/// Constructs the bundled handler registered under `name`. The bcrypt handlers share one
/// process-wide instance, so its backends are probed at most once.
pub fn builtin(name: &str) -> Option<Arc<dyn Handler>> {
    let handler: Arc<dyn Handler> = match name {
        "apr_md5_crypt" => Arc::new(Md5Crypt::apr_md5_crypt()),
        "bcrypt" => bcrypt::shared(),
        "bcrypt_sha256" => Arc::new(BcryptSha256::new()),
        "fshp" => Arc::new(Fshp),
        "hex_md5" => Arc::new(HexDigest::new("hex_md5", DigestKind::Md5)),
        "hex_sha1" => Arc::new(HexDigest::new("hex_sha1", DigestKind::Sha1)),
        "hex_sha256" => Arc::new(HexDigest::new("hex_sha256", DigestKind::Sha256)),
        "hex_sha512" => Arc::new(HexDigest::new("hex_sha512", DigestKind::Sha512)),
        "ldap_hex_md5" => Arc::new(PrefixWrapper::new(
            "ldap_hex_md5",
            "{MD5}",
            Arc::new(HexDigest::new("hex_md5", DigestKind::Md5)),
        )),
        "ldap_hex_sha1" => Arc::new(PrefixWrapper::new(
            "ldap_hex_sha1",
            "{SHA}",
            Arc::new(HexDigest::new("hex_sha1", DigestKind::Sha1)),
        )),
        "md5_crypt" => Arc::new(Md5Crypt::md5_crypt()),
        "pbkdf2_sha1" => Arc::new(Pbkdf2::sha1()),
        "pbkdf2_sha256" => Arc::new(Pbkdf2::sha256()),
        "pbkdf2_sha512" => Arc::new(Pbkdf2::sha512()),
        "plaintext" => Arc::new(Plaintext::new()),
        "postgres_md5" => Arc::new(PostgresMd5::new()),
        "roundup_plaintext" => Arc::new(PrefixWrapper::new(
            "roundup_plaintext",
            "{plaintext}",
            Arc::new(Plaintext::new()),
        )),
        "scram" => Arc::new(Scram),
        _ => return None,
    };

    Some(handler)
}
