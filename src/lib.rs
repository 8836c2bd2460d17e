#![deny(missing_docs)]

//! A library for hashing and verifying passwords under a configurable policy, in the style of
//! the classic Unix `crypt(3)` family and its descendants. Each supported scheme (bcrypt,
//! bcrypt-sha256, SCRAM, PBKDF2, MD5-crypt, FSHP and a handful of legacy digests) is a
//! [`Handler`] that knows how to parse, render, configure and compute its own hash strings. A
//! [`CryptContext`] ties a set of handlers together under a [`Policy`], so an application can
//! accept every hash format it has ever stored while only ever producing the one it currently
//! trusts.
//!
//! Schemes with more than one available implementation (bcrypt can be computed by the `bcrypt`
//! crate, the `pwhash` crate, or a built-in fallback) pick one lazily the first time they are
//! used. Each candidate is run against a battery of known-answer tests first, so a backend
//! with a known defect is either worked around or refused outright.
//!
//! # Usage
//!
//! To use crypt-context, add the following to your Cargo.toml:
//!
//! ```toml
//! [dependencies]
//! crypt-context = "0.1.0"
//! ```
//!
//! The third-party bcrypt engines are behind the `backend-bcrypt` and `backend-pwhash`
//! features, both on by default. The slower built-in bcrypt engine is only used when the
//! `CRYPT_CONTEXT_BUILTIN_BCRYPT` environment variable is set to a true value.
//!
//! The crate logs through [tracing](https://docs.rs/tracing) and never installs a subscriber
//! of its own.
//!
//! # Examples
//!
//! Hash a password, then verify the hash:
//!
//! ```rust
//! use crypt_context::{CallOptions, CryptContext, Policy};
//!
//! let context = CryptContext::new(Policy::from_pairs([
//!     ("schemes", "pbkdf2_sha256"),
//!     ("pbkdf2_sha256.default_rounds", "1000"),
//! ])?)?;
//!
//! let hash = context.hash("password", &CallOptions::new())?;
//! assert!(context.verify("password", &hash, &CallOptions::new())?);
//! assert!(!context.verify("wrong", &hash, &CallOptions::new())?);
//! # Ok::<(), crypt_context::CryptError>(())
//! ```
//!
//! Load a policy from INI text (or, with [`Policy::from_path`], an INI file):
//!
//! ```rust
//! use crypt_context::{CryptContext, Handler, Policy};
//!
//! let policy = Policy::from_ini_str(
//!     "[passlib]\n\
//!      schemes = md5_crypt, scram\n\
//!      deprecated = md5_crypt\n\
//!      scram.default_rounds = 1000\n\
//!      admin.scram.default_rounds = 2000\n",
//!     None,
//! )?;
//!
//! let context = CryptContext::new(policy)?;
//! assert_eq!(context.schemes(), vec!["md5_crypt", "scram"]);
//! assert_eq!(context.lookup(None, None)?.name(), "scram");
//! # Ok::<(), crypt_context::CryptError>(())
//! ```
//!
//! Migrate users off a deprecated scheme as they log in:
//!
//! ```rust
//! use crypt_context::{CallOptions, CryptContext, Policy};
//!
//! let context = CryptContext::new(Policy::from_pairs([
//!     ("schemes", "md5_crypt, pbkdf2_sha512"),
//!     ("deprecated", "md5_crypt"),
//!     ("pbkdf2_sha512.default_rounds", "1000"),
//! ])?)?;
//!
//! let stored = "$1$3azHgidD$SrJPt7B.9rekpmwJwtON31";
//! assert!(context.needs_rehash(stored, &CallOptions::new())?);
//!
//! let (verified, replacement) = context.verify_and_update("password", stored, &CallOptions::new())?;
//! assert!(verified);
//!
//! let replacement = replacement.unwrap();
//! assert_eq!(context.identify_name(&replacement), Some("pbkdf2_sha512"));
//! # Ok::<(), crypt_context::CryptError>(())
//! ```
//!
//! Choose explicit settings for one hash:
//!
//! ```rust
//! use crypt_context::{CallOptions, CryptContext, Policy, Settings};
//!
//! let context = CryptContext::new(Policy::from_pairs([("schemes", "bcrypt")])?)?;
//!
//! let options = CallOptions::new().settings(Settings::new().rounds(5).ident("2a"));
//! let hash = context.hash("password", &options)?;
//!
//! assert!(hash.starts_with("$2a$05$"));
//! assert!(context.verify("password", &hash, &CallOptions::new())?);
//! # Ok::<(), crypt_context::CryptError>(())
//! ```
//!
//! Use a handler directly, without a policy:
//!
//! ```rust
//! use crypt_context::handlers::Pbkdf2;
//! use crypt_context::{ContextKwds, Handler, Secret, Settings};
//!
//! let pbkdf2 = Pbkdf2::sha256();
//! let settings = Settings::new().rounds(1000).raw_salt(b"saltysaltysalt");
//!
//! let hash = pbkdf2.hash(Secret::from("password"), &settings, &ContextKwds::new())?;
//! assert!(hash.starts_with("$pbkdf2-sha256$1000$"));
//! assert!(pbkdf2.verify(Secret::from("password"), &hash, &ContextKwds::new())?);
//! # Ok::<(), crypt_context::CryptError>(())
//! ```
//!
//! Register a custom handler so policies can name it:
//!
//! ```rust
//! use crypt_context::handlers::HexDigest;
//! use crypt_context::{DigestKind, PolicyBuilder, Registry};
//! use std::sync::Arc;
//!
//! let registry = Registry::new();
//! registry.register(Arc::new(HexDigest::new("site_sha512", DigestKind::Sha512)), false)?;
//!
//! let policy = PolicyBuilder::with_registry(&registry)
//!     .schemes(["md5_crypt", "site_sha512"])
//!     .build()?;
//!
//! assert_eq!(policy.default_scheme(None), Some("site_sha512"));
//! # Ok::<(), crypt_context::CryptError>(())
//! ```

pub mod backend;
mod context;
mod digest;
mod encoding;
mod error;
mod handler;
pub mod handlers;
mod lexer;
mod params;
mod policy;
mod registry;

pub use context::{CallOptions, CryptContext};
pub use digest::DigestKind;
pub use error::{CryptError, Result};
pub use handler::{
    consteq, require_context, rounds_below_target, Checksum, ContextKwds, Handler, HandlerInfo,
    HashRecord, Secret, Settings,
};
pub use params::{
    IdentSpec, RoundsCost, RoundsPolicy, RoundsSpec, Salt, SaltCharset, SaltSpec, VaryRounds,
};
pub use policy::{Policy, PolicyBuilder, PolicyKey, PolicyValue, DEFAULT_SECTION};
pub use registry::{validate_handler_name, Registry};
