//! The bcrypt family (`$2$`, `$2a$`, `$2x$`, `$2y$`, `$2b$`).
//!
//! Checksums are computed by whichever backend the handler's [`Negotiator`] selects. The probe
//! battery in `battery` characterizes that backend once, and [`Bcrypt`] consults the frozen
//! [`BcryptCapabilities`] on every call to route around missing variants and known bugs.

mod backends;
mod battery;

pub use backends::{default_backends, BcryptCrateBackend, BuiltinBackend, PwhashBackend, BUILTIN_ENV_VAR};
pub use battery::BcryptCapabilities;

use crate::backend::{Backend, BackendFailure, Negotiator};
use crate::encoding::{self, BCRYPT64_CHARS};
use crate::error::{CryptError, Result};
use crate::handler::{
    rounds_below_target, Checksum, ContextKwds, Handler, HandlerInfo, HashRecord, Secret,
    Settings,
};
use crate::lexer::{parse_fixed_width, TokenizedHash};
use crate::params::{IdentSpec, RoundsCost, RoundsSpec, Salt, SaltCharset, SaltSpec};

use once_cell::sync::Lazy;
use std::borrow::Cow;
use std::sync::Arc;

const NAME: &str = "bcrypt";

/// bcrypt only uses the first 72 bytes of a secret
pub const MAX_SECRET_LEN: usize = 72;

const SALT_CHARS: usize = 22;
const CHECKSUM_CHARS: usize = 31;

pub(crate) const BCRYPT_ROUNDS: RoundsSpec = RoundsSpec {
    min: 4,
    max: 31,
    default: Some(12),
    cost: RoundsCost::Log2,
};

pub(crate) const BCRYPT_SALT: SaltSpec = SaltSpec {
    min_size: SALT_CHARS,
    max_size: SALT_CHARS,
    default_size: SALT_CHARS,
    charset: SaltCharset::Text(BCRYPT64_CHARS),
    repair_padding: true,
};

const BCRYPT_IDENTS: IdentSpec = IdentSpec {
    idents: &["2", "2a", "2x", "2y", "2b"],
    aliases: &[],
    default: "2b",
};

const INFO: HandlerInfo = HandlerInfo {
    name: NAME,
    setting_kwds: &["salt", "salt_size", "rounds", "ident", "truncate_error"],
    context_kwds: &[],
    rounds: Some(BCRYPT_ROUNDS),
    salt: Some(BCRYPT_SALT),
    ident: Some(BCRYPT_IDENTS),
};

static SHARED: Lazy<Arc<Bcrypt>> = Lazy::new(|| Arc::new(Bcrypt::new()));

/// The process-wide bcrypt handler. Backend negotiation happens at most once for it, no
/// matter how many registries or wrapping handlers use it.
pub fn shared() -> Arc<Bcrypt> {
    Arc::clone(&SHARED)
}

/// The bcrypt password hash
#[derive(Debug)]
pub struct Bcrypt {
    negotiator: Negotiator<BcryptCapabilities>,
}

impl Bcrypt {
    /// Create a handler that negotiates among the default backends
    pub fn new() -> Self {
        Self::with_backends(default_backends())
    }

    /// Create a handler that negotiates among `backends`, in order
    pub fn with_backends(backends: Vec<Arc<dyn Backend>>) -> Self {
        Self {
            negotiator: Negotiator::new(NAME, backends, battery::bcrypt_battery),
        }
    }

    /// Name of the active backend, selecting one first if necessary
    pub fn backend(&self) -> Result<&'static str> {
        Ok(self.negotiator.active()?.name())
    }

    /// Switches to the named backend, or re-runs selection over every candidate when `name`
    /// is `None`. The current backend is kept if the requested one can't be used.
    pub fn set_backend(&self, name: Option<&str>) -> Result<&'static str> {
        Ok(self.negotiator.select(name)?.name())
    }

    /// Whether the named backend is usable, without switching to it
    pub fn has_backend(&self, name: &str) -> bool {
        self.negotiator.has_backend(name)
    }

    /// Names of every candidate backend, in preference order
    pub fn backend_names(&self) -> Vec<&'static str> {
        self.negotiator.backend_names()
    }

    /// Flags the probe battery recorded for the active backend
    pub fn capabilities(&self) -> Result<BcryptCapabilities> {
        Ok(self.negotiator.active()?.capabilities().clone())
    }

    /// How many times a backend has been probed
    pub fn probe_count(&self) -> usize {
        self.negotiator.probe_count()
    }

    /// Computes the 31-character checksum of `secret` for the given ident, cost and salt.
    /// Shared with handlers that feed a pre-hashed secret through bcrypt.
    pub(crate) fn raw_checksum(
        &self,
        secret: &[u8],
        ident: &str,
        rounds: u32,
        salt: &str,
    ) -> Result<String> {
        if secret.contains(&0) {
            return Err(CryptError::ForbiddenSecretContent(
                "bcrypt secrets must not contain NUL bytes",
            ));
        }

        let active = self.negotiator.active()?;
        let caps = active.capabilities();

        let mut key = Cow::Borrowed(secret);

        let effective = match ident {
            "2x" => {
                return Err(CryptError::unsupported(
                    NAME,
                    "$2x$ hashes are recognized but not supported",
                ))
            }
            "2b" if caps.lacks_2b => caps.fallback_ident,
            "2y" if caps.lacks_2y => caps.fallback_ident,
            "2" if caps.lacks_2 => {
                // $2$ appends no NUL, which repeating the secret out to 72 bytes reproduces
                if !key.is_empty() {
                    key = Cow::Owned(key.iter().copied().cycle().take(MAX_SECRET_LEN).collect());
                }
                caps.fallback_ident
            }
            other => other,
        };

        if effective == "2a" && caps.has_2a_wraparound_bug && key.len() >= 255 {
            key = Cow::Owned(key[..MAX_SECRET_LEN].to_vec());
        }

        let config = format!("${}${:02}${}", effective, rounds, salt);

        let output = match active.raw_compute(&key, &config) {
            Ok(o) => o,
            Err(BackendFailure::Unsupported(msg)) => {
                return Err(CryptError::unsupported(NAME, msg));
            }
            Err(BackendFailure::Failed(msg)) => {
                return Err(CryptError::BackendContractViolation {
                    backend: active.name(),
                    detail: msg,
                });
            }
        };

        let checksum = match output.strip_prefix(config.as_str()) {
            Some(c) if c.len() == CHECKSUM_CHARS && encoding::is_in_charset(c, BCRYPT64_CHARS) => c,
            _ => {
                return Err(CryptError::BackendContractViolation {
                    backend: active.name(),
                    detail: format!("unexpected output for config {:?}", config),
                })
            }
        };

        Ok(checksum.to_string())
    }
}

impl Default for Bcrypt {
    fn default() -> Self {
        Self::new()
    }
}

fn ident_of(hash: &str) -> Option<&str> {
    let rest = hash.strip_prefix('$')?;
    let (ident, _) = rest.split_once('$')?;
    Some(ident)
}

impl Handler for Bcrypt {
    fn info(&self) -> &HandlerInfo {
        &INFO
    }

    fn identify(&self, hash: &str) -> bool {
        match ident_of(hash) {
            Some(ident) => BCRYPT_IDENTS.idents.contains(&ident),
            None => false,
        }
    }

    fn parse(&self, hash: &str) -> Result<HashRecord> {
        let tokens = TokenizedHash::tokenize(NAME, hash)?;

        if !BCRYPT_IDENTS.idents.contains(&tokens.ident) {
            return Err(CryptError::malformed(NAME, "unknown identifier"));
        }

        tokens.expect_fields(NAME, 2)?;

        let rounds = parse_fixed_width(NAME, tokens.fields[0], 2, "rounds")?;
        if !(BCRYPT_ROUNDS.min..=BCRYPT_ROUNDS.max).contains(&rounds) {
            return Err(CryptError::malformed(NAME, "rounds out of range"));
        }

        let data = tokens.fields[1];
        if !encoding::is_in_charset(data, BCRYPT64_CHARS) {
            return Err(CryptError::malformed(NAME, "invalid characters in salt or checksum"));
        }

        let (salt, checksum) = match data.len() {
            SALT_CHARS => (data, None),
            n if n == SALT_CHARS + CHECKSUM_CHARS => {
                let (s, c) = data.split_at(SALT_CHARS);
                (s, Some(c))
            }
            _ => return Err(CryptError::malformed(NAME, "wrong size salt or checksum")),
        };

        let (_, salt) = encoding::bcrypt64_repair_with_warning(NAME, "salt", salt);
        let checksum = checksum.map(|c| {
            let (_, c) = encoding::bcrypt64_repair_with_warning(NAME, "checksum", c);
            Checksum::Text(c)
        });

        Ok(HashRecord {
            ident: Some(tokens.ident.to_string()),
            rounds: Some(rounds),
            salt: Some(Salt::Text(salt)),
            checksum,
            ..HashRecord::default()
        })
    }

    fn render(&self, record: &HashRecord) -> Result<String> {
        let ident = record.ident.as_deref().unwrap_or(BCRYPT_IDENTS.default);
        let mut out = format!(
            "${}${:02}${}",
            ident,
            record.rounds_value(NAME)?,
            record.salt_text(NAME)?
        );

        match &record.checksum {
            Some(Checksum::Text(c)) => out.push_str(c),
            Some(_) => return Err(CryptError::unsupported(NAME, "checksum must be text")),
            None => (),
        }

        Ok(out)
    }

    fn compute(
        &self,
        secret: Secret<'_>,
        config: &HashRecord,
        _context: &ContextKwds,
    ) -> Result<Checksum> {
        let ident = config.ident.as_deref().unwrap_or(BCRYPT_IDENTS.default);
        let checksum = self.raw_checksum(
            secret.as_bytes(),
            ident,
            config.rounds_value(NAME)?,
            config.salt_text(NAME)?,
        )?;

        Ok(Checksum::Text(checksum))
    }

    fn hash(&self, secret: Secret<'_>, settings: &Settings, context: &ContextKwds) -> Result<String> {
        if settings.truncate_error == Some(true) && secret.len() > MAX_SECRET_LEN {
            return Err(CryptError::ForbiddenSecretContent(
                "secret is longer than the 72 bytes bcrypt uses",
            ));
        }

        let mut record = self.configure(settings)?;
        record.checksum = Some(self.compute(secret, &record, context)?);
        self.render(&record)
    }

    fn needs_update(&self, hash: &str, settings: &Settings) -> Result<bool> {
        let record = self.parse(hash)?;

        // Hashes with padding bits set only verify on lenient implementations
        if self.render(&record)? != hash {
            return Ok(true);
        }

        let target = BCRYPT_IDENTS.resolve(NAME, settings.ident.as_deref())?;
        if record.ident.as_deref() != Some(target) {
            return Ok(true);
        }

        Ok(rounds_below_target(&INFO, &record, settings))
    }
}

#[cfg(test)]
mod tests {
    use super::battery::{eight_bit_bug_hash, wraparound_bug_hash, wraparound_secret, EIGHT_BIT_SECRET};
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wraps the built-in engine to imitate the defects found in real bcrypt libraries
    #[derive(Default)]
    struct FakeBackend {
        name: &'static str,
        lacks_2b: bool,
        wraparound_bug: bool,
        eight_bit_bug_idents: &'static [&'static str],
        serialize: bool,
        calls: AtomicUsize,
    }

    impl FakeBackend {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                ..Self::default()
            }
        }
    }

    impl Backend for FakeBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        fn load(&self) -> std::result::Result<crate::backend::Capabilities, BackendFailure> {
            Ok(crate::backend::Capabilities {
                serialize_calls: self.serialize,
            })
        }

        fn raw_compute(
            &self,
            secret: &[u8],
            config: &str,
        ) -> std::result::Result<String, BackendFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if self.lacks_2b && config.starts_with("$2b$") {
                return Err(BackendFailure::Unsupported(String::from("no $2b$")));
            }

            let ident = &config[1..config.find("$0").unwrap_or(3)];
            if secret == EIGHT_BIT_SECRET && self.eight_bit_bug_idents.contains(&ident) {
                return Ok(eight_bit_bug_hash(ident));
            }

            if self.wraparound_bug && config.starts_with("$2a$") && secret.len() >= 255 {
                if secret == wraparound_secret() {
                    return Ok(wraparound_bug_hash("2a"));
                }
                // An 8-bit key length of zero makes the key schedule read the first byte forever
                return BuiltinBackend::enabled().raw_compute(&[secret[0]; 72], config);
            }

            BuiltinBackend::enabled().raw_compute(secret, config)
        }
    }

    fn handler_over(backend: FakeBackend) -> (Bcrypt, Arc<FakeBackend>) {
        let backend = Arc::new(backend);
        let handler = Bcrypt::with_backends(vec![Arc::clone(&backend) as Arc<dyn Backend>]);
        (handler, backend)
    }

    fn builtin_handler() -> Bcrypt {
        Bcrypt::with_backends(vec![Arc::new(BuiltinBackend::enabled())])
    }

    const CTX: &ContextKwds = &ContextKwds::new();

    #[test]
    fn test_reference_hashes_verify() {
        let handler = builtin_handler();

        let vectors: &[(&[u8], &str)] = &[
            (b"test", "$2a$04$5BJqKfqMQvV7nS.yUguNcueVirQqDBGaLXSqj.rs.pZPlNR0UX/HK"),
            (b"test", "$2$04$5BJqKfqMQvV7nS.yUguNcuRfMMOXK0xPWavM7pOzjEi5ze5T1k8/S"),
            (b"", "$2a$06$DCq7YPn5Rq63x1Lad4cll.TV4S6ytwfsfvkgY8jIucDrjc8deX1s."),
            (b"U*U", "$2a$05$CCCCCCCCCCCCCCCCCCCCC.E5YPO9kmyuRGyh0XouQYb4YMJKvyOeW"),
            (b"\xd1\x91", "$2a$05$6bNw2HLQYeqHYyBfLMsv/OUcZd0LKP39b87nBw3.S2tVZSqiQX6eu"),
        ];

        for (secret, hash) in vectors {
            assert!(handler.identify(hash));
            assert!(handler.verify(Secret::using(secret), hash, CTX).unwrap(), "{}", hash);
            assert!(!handler.verify(Secret::from("wrong"), hash, CTX).unwrap());
        }
    }

    #[test]
    fn test_hash_and_verify() {
        let handler = builtin_handler();

        let hash = handler
            .hash(Secret::from("password"), &Settings::new().rounds(4), CTX)
            .unwrap();

        assert!(hash.starts_with("$2b$04$"));
        assert_eq!(hash.len(), 60);
        assert!(handler.verify(Secret::from("password"), &hash, CTX).unwrap());
        assert!(!handler.verify(Secret::from("Password"), &hash, CTX).unwrap());
        assert_eq!(handler.backend().unwrap(), "builtin");

        let hash = handler
            .hash(Secret::from("password"), &Settings::new().rounds(4).ident("$2y$"), CTX)
            .unwrap();
        assert!(hash.starts_with("$2y$04$"));
        assert!(handler.verify(Secret::from("password"), &hash, CTX).unwrap());
    }

    #[test]
    fn test_parse_and_render() {
        let handler = Bcrypt::with_backends(Vec::new());
        let hash = "$2a$04$5BJqKfqMQvV7nS.yUguNcueVirQqDBGaLXSqj.rs.pZPlNR0UX/HK";

        let record = handler.parse(hash).unwrap();
        assert_eq!(record.ident.as_deref(), Some("2a"));
        assert_eq!(record.rounds, Some(4));
        assert_eq!(record.salt_text(NAME).unwrap(), "5BJqKfqMQvV7nS.yUguNcu");
        assert_eq!(handler.render(&record).unwrap(), hash);

        let config = handler.parse("$2b$12$5BJqKfqMQvV7nS.yUguNcu").unwrap();
        assert!(config.checksum.is_none());

        assert!(handler.parse("$2a$4$5BJqKfqMQvV7nS.yUguNcueVirQqDBGaLXSqj.rs.pZPlNR0UX/HK").is_err());
        assert!(handler.parse("$2a$03$5BJqKfqMQvV7nS.yUguNcueVirQqDBGaLXSqj.rs.pZPlNR0UX/HK").is_err());
        assert!(handler.parse("$2a$04$5BJqKfqMQvV7nS.yUguNcueVirQqDBGaLXSqj.rs.pZPlNR0UX/H").is_err());
        assert!(handler.parse("$2a$04$5BJqKfqMQvV7nS.yUguNcueVirQqDBGaLXSqj.rs.pZPlNR0UX/H!").is_err());
        assert!(handler.parse("$2c$04$5BJqKfqMQvV7nS.yUguNcueVirQqDBGaLXSqj.rs.pZPlNR0UX/HK").is_err());

        assert!(!handler.identify("$1$abc$def"));
        assert!(!handler.identify("2a$04$"));
        assert!(handler.identify("$2x$04$garbage"));
    }

    #[test]
    fn test_normhash_repairs_padding_bits() {
        let handler = Bcrypt::with_backends(Vec::new());

        let bad_salt = "$2a$04$5BJqKfqMQvV7nS.yUguNcveVirQqDBGaLXSqj.rs.pZPlNR0UX/HK";
        let good = "$2a$04$5BJqKfqMQvV7nS.yUguNcueVirQqDBGaLXSqj.rs.pZPlNR0UX/HK";
        assert_eq!(handler.normhash(bad_salt).unwrap(), good);

        let bad_checksum = "$2a$04$5BJqKfqMQvV7nS.yUguNcueVirQqDBGaLXSqj.rs.pZPlNR0UX/HL";
        assert_eq!(handler.normhash(bad_checksum).unwrap(), good);

        assert_eq!(handler.normhash("not a bcrypt hash").unwrap(), "not a bcrypt hash");
        assert!(handler.needs_update(bad_salt, &Settings::new().ident("2a").rounds(4)).unwrap());
        assert!(!handler.needs_update(good, &Settings::new().ident("2a").rounds(4)).unwrap());
    }

    #[test]
    fn test_needs_update() {
        let handler = Bcrypt::with_backends(Vec::new());
        let hash = "$2b$04$5BJqKfqMQvV7nS.yUguNcueVirQqDBGaLXSqj.rs.pZPlNR0UX/HK";

        assert!(handler.needs_update(hash, &Settings::new()).unwrap());
        assert!(!handler.needs_update(hash, &Settings::new().rounds(4)).unwrap());
        assert!(handler.needs_update(hash, &Settings::new().rounds(5)).unwrap());
        assert!(handler
            .needs_update(hash, &Settings::new().rounds(4).ident("2y"))
            .unwrap());
    }

    #[test]
    fn test_secret_restrictions() {
        let handler = builtin_handler();
        let settings = Settings::new().rounds(4);

        assert!(matches!(
            handler.hash(Secret::from(b"pass\0word"), &settings, CTX),
            Err(CryptError::ForbiddenSecretContent(_))
        ));

        let long = [b'a'; 73];
        assert!(handler.hash(Secret::from(&long), &settings, CTX).is_ok());
        assert!(matches!(
            handler.hash(Secret::from(&long), &settings.clone().truncate_error(true), CTX),
            Err(CryptError::ForbiddenSecretContent(_))
        ));

        assert!(matches!(
            handler.hash(Secret::from("password"), &settings.ident("2x"), CTX),
            Err(CryptError::UnsupportedParameter(_))
        ));
    }

    #[test]
    fn test_fallback_ident_when_2b_missing() {
        let (handler, _) = handler_over(FakeBackend {
            lacks_2b: true,
            ..FakeBackend::new("no-2b")
        });

        let caps = handler.capabilities().unwrap();
        assert!(caps.lacks_2b);
        assert!(!caps.lacks_2y);
        assert!(caps.lacks_2);
        assert_eq!(caps.fallback_ident, "2a");

        let hash = handler
            .hash(Secret::from("password"), &Settings::new().rounds(4).ident("2b"), CTX)
            .unwrap();
        assert!(hash.starts_with("$2b$04$"));
        assert!(handler.verify(Secret::from("password"), &hash, CTX).unwrap());
        assert!(!handler.verify(Secret::from("passwore"), &hash, CTX).unwrap());

        let builtin = builtin_handler();
        assert!(builtin.verify(Secret::from("password"), &hash, CTX).unwrap());
    }

    #[test]
    fn test_wraparound_bug_is_worked_around() {
        let (handler, _) = handler_over(FakeBackend {
            wraparound_bug: true,
            ..FakeBackend::new("wraparound")
        });

        assert!(handler.capabilities().unwrap().has_2a_wraparound_bug);

        let long = [b'x'; 300];
        let settings = Settings::new()
            .rounds(4)
            .ident("2a")
            .salt("5BJqKfqMQvV7nS.yUguNcu");

        let hash = handler.hash(Secret::from(&long), &settings, CTX).unwrap();
        let truncated = builtin_handler()
            .hash(Secret::from(&long[..72]), &settings, CTX)
            .unwrap();
        assert_eq!(hash, truncated);
        assert!(handler.verify(Secret::from(&long), &hash, CTX).unwrap());
    }

    fn assert_eight_bit_bug_is_fatal(idents: &'static [&'static str]) {
        let (handler, _) = handler_over(FakeBackend {
            eight_bit_bug_idents: idents,
            ..FakeBackend::new("eight-bit")
        });

        match handler.hash(Secret::from("password"), &Settings::new().rounds(4), CTX) {
            Err(CryptError::BackendSecurityDefect { backend, detail }) => {
                assert_eq!(backend, "eight-bit");
                assert!(detail.contains("8-bit"), "{}", detail);
            }
            other => panic!("expected a security defect for {:?}, got {:?}", idents, other),
        }
        assert!(matches!(
            handler.backend(),
            Err(CryptError::NoBackendAvailable { handler: "bcrypt", .. })
        ));
        assert_eq!(handler.probe_count(), 1);
    }

    #[test]
    fn test_eight_bit_bug_is_fatal() {
        assert_eight_bit_bug_is_fatal(&["2a", "2y", "2b"]);
    }

    #[test]
    fn test_eight_bit_bug_in_2y_only_is_fatal() {
        assert_eight_bit_bug_is_fatal(&["2y"]);
    }

    #[test]
    fn test_eight_bit_bug_in_2b_only_is_fatal() {
        assert_eight_bit_bug_is_fatal(&["2b"]);
    }

    #[test]
    fn test_serialized_backend() {
        let (handler, backend) = handler_over(FakeBackend {
            serialize: true,
            ..FakeBackend::new("serial")
        });

        let hash = handler
            .hash(Secret::from("password"), &Settings::new().rounds(4), CTX)
            .unwrap();

        std::thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|| assert!(handler.verify(Secret::from("password"), &hash, CTX).unwrap()));
            }
        });

        assert!(backend.calls.load(Ordering::SeqCst) > 3);
        assert_eq!(handler.probe_count(), 1);
    }

    #[test]
    fn test_backend_selection() {
        let first = Arc::new(FakeBackend::new("first"));
        let second = Arc::new(FakeBackend::new("second"));
        let handler = Bcrypt::with_backends(vec![
            Arc::clone(&first) as Arc<dyn Backend>,
            Arc::clone(&second) as Arc<dyn Backend>,
        ]);

        assert_eq!(handler.backend().unwrap(), "first");
        assert!(handler.has_backend("second"));
        assert_eq!(handler.backend().unwrap(), "first");

        assert_eq!(handler.set_backend(Some("second")).unwrap(), "second");
        assert!(handler.set_backend(Some("missing")).is_err());
        assert_eq!(handler.backend().unwrap(), "second");
        assert_eq!(handler.backend_names(), vec!["first", "second"]);
    }

    #[test]
    fn test_no_backend_available() {
        let handler = Bcrypt::with_backends(vec![Arc::new(BuiltinBackend::new())]);

        temp_env::with_var(BUILTIN_ENV_VAR, None::<&str>, || {
            assert!(matches!(
                handler.hash(Secret::from("password"), &Settings::new().rounds(4), CTX),
                Err(CryptError::NoBackendAvailable { handler: "bcrypt", .. })
            ));
        });
    }

    #[cfg(feature = "backend-bcrypt")]
    #[test]
    fn test_default_backend_order() {
        let handler = Bcrypt::new();
        assert_eq!(handler.backend_names(), vec!["bcrypt", "pwhash", "builtin"]);
        assert_eq!(handler.backend().unwrap(), "bcrypt");

        let caps = handler.capabilities().unwrap();
        assert!(caps.lacks_2);
        assert!(!caps.lacks_2b);
        assert_eq!(caps.fallback_ident, "2b");

        assert!(handler
            .verify(
                Secret::from("test"),
                "$2$04$5BJqKfqMQvV7nS.yUguNcuRfMMOXK0xPWavM7pOzjEi5ze5T1k8/S",
                CTX
            )
            .unwrap());
    }
}
