//! The caller-facing entry point: hash, identify, verify and migrate hashes under a
//! [`Policy`].

use crate::error::{CryptError, Result};
use crate::handler::{ContextKwds, Handler, Secret, Settings};
use crate::policy::Policy;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Per-call choices for [`CryptContext`] operations
///
/// ```rust
/// use crypt_context::{CallOptions, Settings};
///
/// let options = CallOptions::new()
///     .category("admin")
///     .settings(Settings::new().rounds(12));
///
/// assert_eq!(options.category.as_deref(), Some("admin"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    /// Use this scheme instead of the category default (or, for verification, instead of
    /// identifying the hash)
    pub scheme: Option<String>,
    /// User category whose policy applies
    pub category: Option<String>,
    /// Explicit settings, applied over the policy's
    pub settings: Settings,
    /// Runtime values required by some schemes (such as `user` for `postgres_md5`)
    pub context: ContextKwds,
}

impl CallOptions {
    /// Options that defer to the policy for everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects the scheme explicitly
    pub fn scheme(mut self, scheme: &str) -> Self {
        self.scheme = Some(scheme.to_string());
        self
    }

    /// Selects the user category
    pub fn category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    /// Sets explicit hash settings
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Adds a context keyword
    pub fn context_kwd(mut self, key: &str, value: &str) -> Self {
        self.context.insert(key.to_string(), value.to_string());
        self
    }
}

/// Hashes and verifies secrets according to a [`Policy`]. Immutable once created, so it can
/// be shared between threads freely.
///
/// ```rust
/// use crypt_context::{CallOptions, CryptContext, Policy};
///
/// let context = CryptContext::new(Policy::from_pairs([
///     ("schemes", "md5_crypt, pbkdf2_sha256"),
///     ("deprecated", "md5_crypt"),
///     ("pbkdf2_sha256.default_rounds", "1000"),
/// ])?)?;
///
/// let hash = context.hash("password123", &CallOptions::new())?;
/// assert_eq!(context.identify_name(&hash), Some("pbkdf2_sha256"));
/// assert!(context.verify("password123", &hash, &CallOptions::new())?);
/// assert!(!context.needs_rehash(&hash, &CallOptions::new())?);
/// # Ok::<(), crypt_context::CryptError>(())
/// ```
#[derive(Debug)]
pub struct CryptContext {
    policy: Policy,
}

impl CryptContext {
    /// Create a context. The policy must name at least one scheme.
    pub fn new(policy: Policy) -> Result<Self> {
        if policy.schemes().is_empty() {
            return Err(CryptError::NoSchemesConfigured);
        }

        Ok(Self { policy })
    }

    /// Create a context from INI text or a path to an INI file
    pub fn from_source(source: &str) -> Result<Self> {
        Self::new(Policy::from_source(source)?)
    }

    /// The policy this context applies
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Scheme names in configured order
    pub fn schemes(&self) -> Vec<&'static str> {
        self.policy.schemes()
    }

    /// Finds a configured handler by name, or the category's default handler. Only the
    /// policy's schemes are searched, never the registry.
    pub fn lookup(&self, scheme: Option<&str>, category: Option<&str>) -> Result<&Arc<dyn Handler>> {
        let name = match scheme {
            Some(s) => s,
            None => match self.policy.default_scheme(category) {
                Some(s) => s,
                None => return Err(CryptError::NoSchemesConfigured),
            },
        };

        match self.policy.handler(name) {
            Some(h) => Ok(h),
            None => Err(CryptError::UnknownAlgorithm(format!(
                "{} is not configured in this context",
                name
            ))),
        }
    }

    /// Settings for a new hash: the caller's over the policy's, with rounds resolved
    /// through the policy's bounds
    fn hash_settings(&self, handler: &dyn Handler, options: &CallOptions) -> Result<Settings> {
        let info = handler.info();
        let category = options.category.as_deref();

        let defaults = self.policy.settings_for(info, category)?;
        let mut settings = options.settings.clone().merged_over(&defaults);

        if let Some(spec) = &info.rounds {
            let rounds = self.policy.rounds_policy(info.name, category)?;
            settings.rounds = rounds.resolve(spec, settings.rounds);
        }

        Ok(settings)
    }

    /// Settings an existing hash is measured against by [`needs_rehash`](Self::needs_rehash)
    fn target_settings(&self, handler: &dyn Handler, options: &CallOptions) -> Result<Settings> {
        let info = handler.info();
        let category = options.category.as_deref();

        let defaults = self.policy.settings_for(info, category)?;
        let mut settings = options.settings.clone().merged_over(&defaults);

        if let (Some(spec), None) = (&info.rounds, settings.rounds) {
            let rounds = self.policy.rounds_policy(info.name, category)?;

            // Randomized defaults have no single target, so only the minimum is enforced
            settings.rounds = match (rounds.min_rounds, rounds.default_rounds, rounds.vary_rounds) {
                (Some(min), _, _) => Some(min),
                (None, Some(default), None) => Some(default),
                (None, Some(_), Some(_)) => Some(spec.min),
                (None, None, _) => None,
            };
        }

        Ok(settings)
    }

    /// Hashes `secret` with the chosen (or default) scheme
    pub fn hash<'s, S: Into<Secret<'s>>>(&self, secret: S, options: &CallOptions) -> Result<String> {
        let handler = self.lookup(options.scheme.as_deref(), options.category.as_deref())?;
        let settings = self.hash_settings(handler.as_ref(), options)?;

        debug!(handler = handler.name(), rounds = ?settings.rounds, "hashing secret");
        handler.hash(secret.into(), &settings, &options.context)
    }

    /// Renders a configuration string (salt and cost, no checksum) for the chosen scheme
    pub fn genconfig(&self, options: &CallOptions) -> Result<String> {
        let handler = self.lookup(options.scheme.as_deref(), options.category.as_deref())?;
        let settings = self.hash_settings(handler.as_ref(), options)?;

        handler.genconfig(&settings)
    }

    /// The handler for `hash`, checking the most recently configured schemes first
    pub fn identify(&self, hash: &str) -> Option<&Arc<dyn Handler>> {
        if hash.is_empty() {
            return None;
        }

        self.policy.handlers().find(|h| h.identify(hash))
    }

    /// The name of the scheme that produced `hash`
    pub fn identify_name(&self, hash: &str) -> Option<&'static str> {
        self.identify(hash).map(|h| h.name())
    }

    /// Like [`identify`](Self::identify), but failing for unrecognized hashes
    pub fn identify_required(&self, hash: &str) -> Result<&Arc<dyn Handler>> {
        match self.identify(hash) {
            Some(h) => Ok(h),
            None => Err(CryptError::UnidentifiedHash),
        }
    }

    fn handler_for(&self, hash: &str, options: &CallOptions) -> Result<&Arc<dyn Handler>> {
        match options.scheme.as_deref() {
            Some(s) => self.lookup(Some(s), None),
            None => self.identify_required(hash),
        }
    }

    /// Checks `secret` against `hash`. A mismatch or an empty hash is `Ok(false)`.
    ///
    /// If the category has a minimum verify time, the call takes at least that long whatever
    /// the outcome, errors included.
    pub fn verify<'s, S: Into<Secret<'s>>>(&self, secret: S, hash: &str, options: &CallOptions) -> Result<bool> {
        let start = Instant::now();
        let result = self.verify_unpadded(secret.into(), hash, options);

        let floor = self.policy.min_verify_time(options.category.as_deref());
        pad_to(start, floor);

        result
    }

    fn verify_unpadded(&self, secret: Secret<'_>, hash: &str, options: &CallOptions) -> Result<bool> {
        if hash.is_empty() {
            return Ok(false);
        }

        let handler = self.handler_for(hash, options)?;
        handler.verify(secret, hash, &options.context)
    }

    /// Verifies `secret` and, if it matches a hash that should be replaced, hashes it again
    /// with the category's default scheme. Returns the verification result and the
    /// replacement hash, if any.
    pub fn verify_and_update<'s, S: Into<Secret<'s>>>(
        &self,
        secret: S,
        hash: &str,
        options: &CallOptions,
    ) -> Result<(bool, Option<String>)> {
        let secret = secret.into();

        if !self.verify(secret, hash, options)? {
            return Ok((false, None));
        }

        if !self.needs_rehash(hash, options)? {
            return Ok((true, None));
        }

        let rehash_options = CallOptions {
            scheme: None,
            ..options.clone()
        };

        Ok((true, Some(self.hash(secret, &rehash_options)?)))
    }

    /// Whether `hash` should be replaced: its scheme is deprecated in the category, or it was
    /// made with weaker parameters than the policy now asks for
    pub fn needs_rehash(&self, hash: &str, options: &CallOptions) -> Result<bool> {
        let handler = self.handler_for(hash, options)?;

        if self.policy.is_deprecated(handler.name(), options.category.as_deref()) {
            debug!(handler = handler.name(), "hash uses a deprecated scheme");
            return Ok(true);
        }

        let settings = self.target_settings(handler.as_ref(), options)?;
        handler.needs_update(hash, &settings)
    }

    /// Canonicalizes `hash` through the handler that identifies it. Unrecognized strings are
    /// returned unchanged.
    pub fn normhash(&self, hash: &str) -> Result<String> {
        match self.identify(hash) {
            Some(h) => h.normhash(hash),
            None => Ok(hash.to_string()),
        }
    }
}

fn pad_to(start: Instant, floor: Duration) {
    let elapsed = start.elapsed();
    if elapsed < floor {
        thread::sleep(floor - elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyBuilder;

    fn legacy_context() -> CryptContext {
        let policy = Policy::from_pairs([
            ("schemes", "md5_crypt, pbkdf2_sha256"),
            ("deprecated", "md5_crypt"),
            ("pbkdf2_sha256.default_rounds", "1000"),
        ])
        .unwrap();

        CryptContext::new(policy).unwrap()
    }

    fn rounds_of(context: &CryptContext, hash: &str) -> Option<u32> {
        context.identify_required(hash).unwrap().parse(hash).unwrap().rounds
    }

    #[test]
    fn test_requires_schemes() {
        let policy = PolicyBuilder::new().build().unwrap();
        assert!(matches!(CryptContext::new(policy), Err(CryptError::NoSchemesConfigured)));
    }

    #[test]
    fn test_hash_with_default_scheme() {
        let context = legacy_context();
        let options = CallOptions::new();

        let hash = context.hash("password123", &options).unwrap();
        assert!(hash.starts_with("$pbkdf2-sha256$1000$"));
        assert_eq!(context.identify_name(&hash), Some("pbkdf2_sha256"));
        assert!(context.verify("password123", &hash, &options).unwrap());
        assert!(!context.verify("password124", &hash, &options).unwrap());
        assert!(!context.needs_rehash(&hash, &options).unwrap());
    }

    #[test]
    fn test_legacy_hash_needs_rehash() {
        let context = legacy_context();
        let options = CallOptions::new();

        let legacy = context
            .hash("password123", &CallOptions::new().scheme("md5_crypt"))
            .unwrap();
        assert!(legacy.starts_with("$1$"));
        assert_eq!(context.identify_name(&legacy), Some("md5_crypt"));
        assert!(context.verify("password123", &legacy, &options).unwrap());
        assert!(context.needs_rehash(&legacy, &options).unwrap());

        let known = "$1$3azHgidD$SrJPt7B.9rekpmwJwtON31";
        assert!(context.verify("password", known, &options).unwrap());
        assert!(context.needs_rehash(known, &options).unwrap());
    }

    #[test]
    fn test_verify_and_update() {
        let context = legacy_context();
        let options = CallOptions::new();
        let legacy = context
            .hash("password123", &CallOptions::new().scheme("md5_crypt"))
            .unwrap();

        assert_eq!(context.verify_and_update("wrong", &legacy, &options).unwrap(), (false, None));

        let (verified, replacement) = context.verify_and_update("password123", &legacy, &options).unwrap();
        assert!(verified);
        let replacement = replacement.unwrap();
        assert_eq!(context.identify_name(&replacement), Some("pbkdf2_sha256"));
        assert!(context.verify("password123", &replacement, &options).unwrap());

        assert_eq!(
            context.verify_and_update("password123", &replacement, &options).unwrap(),
            (true, None)
        );
    }

    #[test]
    fn test_lookup() {
        let context = CryptContext::new(
            Policy::from_pairs([
                ("schemes", "hex_md5, hex_sha256, hex_sha1"),
                ("admin.context.default", "hex_sha256"),
            ])
            .unwrap(),
        )
        .unwrap();

        assert_eq!(context.lookup(None, None).unwrap().name(), "hex_sha1");
        assert_eq!(context.lookup(None, Some("admin")).unwrap().name(), "hex_sha256");
        assert_eq!(context.lookup(None, Some("staff")).unwrap().name(), "hex_sha1");
        assert_eq!(context.lookup(Some("hex_md5"), None).unwrap().name(), "hex_md5");
        assert!(matches!(
            context.lookup(Some("md5_crypt"), None),
            Err(CryptError::UnknownAlgorithm(_))
        ));

        let hash = context.hash("password", &CallOptions::new().category("admin")).unwrap();
        assert_eq!(
            hash,
            "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8"
        );
        assert_eq!(context.schemes(), vec!["hex_md5", "hex_sha256", "hex_sha1"]);
    }

    #[test]
    fn test_identify_order() {
        let context = CryptContext::new(Policy::from_pairs([("schemes", "plaintext, hex_md5")]).unwrap()).unwrap();

        let md5 = "5f4dcc3b5aa765d61d8327deb882cf99";
        assert_eq!(context.identify_name(md5), Some("hex_md5"));
        assert_eq!(context.identify_name("password"), Some("plaintext"));
        assert!(context.identify("").is_none());

        assert!(context.verify("password", md5, &CallOptions::new()).unwrap());
        assert!(context
            .verify("password", "password", &CallOptions::new().scheme("plaintext"))
            .unwrap());
        assert!(!context
            .verify("password", md5, &CallOptions::new().scheme("plaintext"))
            .unwrap());

        let reversed = CryptContext::new(Policy::from_pairs([("schemes", "hex_md5, plaintext")]).unwrap()).unwrap();
        assert_eq!(reversed.identify_name(md5), Some("plaintext"));
    }

    #[test]
    fn test_verify_edge_cases() {
        let context = CryptContext::new(Policy::from_pairs([("schemes", "hex_md5")]).unwrap()).unwrap();
        let options = CallOptions::new();

        assert!(!context.verify("password", "", &options).unwrap());
        assert!(matches!(
            context.verify("password", "not a hash", &options),
            Err(CryptError::UnidentifiedHash)
        ));
        assert!(matches!(
            context.identify_required("not a hash"),
            Err(CryptError::UnidentifiedHash)
        ));
        assert!(matches!(
            context.needs_rehash("not a hash", &options),
            Err(CryptError::UnidentifiedHash)
        ));
        assert!(context
            .verify("password", "5F4DCC3B5AA765D61D8327DEB882CF99", &options)
            .unwrap());
    }

    #[test]
    fn test_min_verify_time() {
        let context = CryptContext::new(
            PolicyBuilder::new()
                .schemes(["hex_md5"])
                .min_verify_time(None, 0.05)
                .build()
                .unwrap(),
        )
        .unwrap();

        let options = CallOptions::new();
        let floor = Duration::from_millis(50);
        let md5 = "5f4dcc3b5aa765d61d8327deb882cf99";

        for (secret, hash) in [("password", md5), ("wrong", md5), ("password", "garbage")] {
            let start = Instant::now();
            let _ = context.verify(secret, hash, &options);
            assert!(start.elapsed() >= floor, "{} {}", secret, hash);
        }

        let fast = CryptContext::new(Policy::from_pairs([("schemes", "hex_md5")]).unwrap()).unwrap();
        let start = Instant::now();
        assert!(fast.verify("password", md5, &options).unwrap());
        assert!(start.elapsed() < floor);
    }

    #[test]
    fn test_min_verify_time_by_category() {
        let context = CryptContext::new(
            PolicyBuilder::new()
                .schemes(["hex_md5"])
                .min_verify_time(Some("admin"), 0.05)
                .build()
                .unwrap(),
        )
        .unwrap();

        let md5 = "5f4dcc3b5aa765d61d8327deb882cf99";
        let start = Instant::now();
        assert!(context.verify("password", md5, &CallOptions::new().category("admin")).unwrap());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_policy_rounds() {
        let context = CryptContext::new(
            Policy::from_pairs([
                ("schemes", "pbkdf2_sha256"),
                ("pbkdf2_sha256.min_rounds", "1000"),
                ("pbkdf2_sha256.max_rounds", "1500"),
                ("pbkdf2_sha256.default_rounds", "1200"),
                ("admin.pbkdf2_sha256.default_rounds", "1400"),
            ])
            .unwrap(),
        )
        .unwrap();

        let hash = context.hash("password", &CallOptions::new()).unwrap();
        assert_eq!(rounds_of(&context, &hash), Some(1200));

        let hash = context.hash("password", &CallOptions::new().category("admin")).unwrap();
        assert_eq!(rounds_of(&context, &hash), Some(1400));

        let explicit = |rounds: u32| {
            let options = CallOptions::new().settings(Settings::new().rounds(rounds));
            let hash = context.hash("password", &options).unwrap();
            rounds_of(&context, &hash)
        };
        assert_eq!(explicit(1100), Some(1100));
        assert_eq!(explicit(5000), Some(1500));
        assert_eq!(explicit(10), Some(1000));
    }

    #[test]
    fn test_vary_rounds() {
        let context = CryptContext::new(
            Policy::from_pairs([
                ("schemes", "pbkdf2_sha1"),
                ("pbkdf2_sha1.default_rounds", "1000"),
                ("pbkdf2_sha1.vary_rounds", "10%"),
            ])
            .unwrap(),
        )
        .unwrap();

        for _ in 0..10 {
            let hash = context.hash("password", &CallOptions::new()).unwrap();
            let rounds = rounds_of(&context, &hash).unwrap();
            assert!((900..=1100).contains(&rounds), "{}", rounds);
            assert!(!context.needs_rehash(&hash, &CallOptions::new()).unwrap());
        }
    }

    #[test]
    fn test_needs_rehash_on_raised_rounds() {
        let old = legacy_context();
        let hash = old.hash("password", &CallOptions::new()).unwrap();

        let raised = CryptContext::new(
            Policy::from_pairs([("schemes", "pbkdf2_sha256"), ("pbkdf2_sha256.default_rounds", "2000")]).unwrap(),
        )
        .unwrap();
        assert!(raised.needs_rehash(&hash, &CallOptions::new()).unwrap());

        let min = CryptContext::new(
            Policy::from_pairs([
                ("schemes", "pbkdf2_sha256"),
                ("pbkdf2_sha256.min_rounds", "900"),
                ("pbkdf2_sha256.default_rounds", "2000"),
                ("pbkdf2_sha256.vary_rounds", "10%"),
            ])
            .unwrap(),
        )
        .unwrap();
        assert!(!min.needs_rehash(&hash, &CallOptions::new()).unwrap());

        let raised_min = CryptContext::new(
            Policy::from_pairs([("schemes", "pbkdf2_sha256"), ("pbkdf2_sha256.min_rounds", "1001")]).unwrap(),
        )
        .unwrap();
        assert!(raised_min.needs_rehash(&hash, &CallOptions::new()).unwrap());
    }

    #[test]
    fn test_needs_rehash_on_scram_algs() {
        let context = CryptContext::new(
            Policy::from_pairs([("schemes", "scram"), ("scram.default_rounds", "1000")]).unwrap(),
        )
        .unwrap();

        let hash = context.hash("pencil", &CallOptions::new()).unwrap();
        assert!(!context.needs_rehash(&hash, &CallOptions::new()).unwrap());

        let wider = CryptContext::new(
            Policy::from_pairs([
                ("schemes", "scram"),
                ("scram.default_rounds", "1000"),
                ("scram.algs", "sha-1, sha-256, sha-512, sha-384"),
            ])
            .unwrap(),
        )
        .unwrap();
        assert!(wider.needs_rehash(&hash, &CallOptions::new()).unwrap());
        assert!(wider.verify("pencil", &hash, &CallOptions::new()).unwrap());
    }

    #[test]
    fn test_verify_scram_config_string() {
        let context = CryptContext::new(
            Policy::from_pairs([("schemes", "scram"), ("scram.default_rounds", "1000")]).unwrap(),
        )
        .unwrap();

        let config = context.genconfig(&CallOptions::new()).unwrap();
        assert!(config.starts_with("$scram$1000$"));
        assert!(!context.verify("pencil", &config, &CallOptions::new()).unwrap());
        assert_eq!(
            context.verify_and_update("pencil", &config, &CallOptions::new()).unwrap(),
            (false, None)
        );
    }

    #[test]
    fn test_context_kwds() {
        let context = CryptContext::new(Policy::from_pairs([("schemes", "postgres_md5")]).unwrap()).unwrap();
        let options = CallOptions::new().context_kwd("user", "postgres");

        let hash = context.hash("password", &options).unwrap();
        assert_eq!(hash, "md532e12f215ba27cb750c9e093ce4b5127");
        assert!(context.verify("password", &hash, &options).unwrap());
        assert!(context.hash("password", &CallOptions::new()).is_err());
    }

    #[test]
    fn test_genconfig_and_normhash() {
        let context = CryptContext::new(
            Policy::from_pairs([
                ("schemes", "hex_md5, pbkdf2_sha256"),
                ("pbkdf2_sha256.default_rounds", "1000"),
            ])
            .unwrap(),
        )
        .unwrap();

        let config = context.genconfig(&CallOptions::new()).unwrap();
        assert!(config.starts_with("$pbkdf2-sha256$1000$"));
        assert_eq!(config.matches('$').count(), 3);
        assert!(context.genconfig(&CallOptions::new().scheme("hex_md5")).is_err());

        assert_eq!(
            context.normhash("5F4DCC3B5AA765D61D8327DEB882CF99").unwrap(),
            "5f4dcc3b5aa765d61d8327deb882cf99"
        );
        assert_eq!(context.normhash("not a hash").unwrap(), "not a hash");
    }

    #[test]
    fn test_from_source() {
        let context = CryptContext::from_source(
            "[passlib]\nschemes = hex_sha1, hex_md5\ndeprecated = hex_sha1\n",
        )
        .unwrap();

        let sha1 = "5baa61e4c9b93f3f0682250b6cf8331b7ee68fd8";
        assert!(context.verify("password", sha1, &CallOptions::new()).unwrap());
        assert!(context.needs_rehash(sha1, &CallOptions::new()).unwrap());

        assert!(matches!(
            CryptContext::from_source("[passlib]\nschemes =\n"),
            Err(CryptError::NoSchemesConfigured)
        ));
    }

    #[test]
    fn test_shared_between_threads() {
        let context = Arc::new(legacy_context());
        let hash = context.hash("password123", &CallOptions::new()).unwrap();

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let context = Arc::clone(&context);
                let hash = hash.clone();
                thread::spawn(move || context.verify("password123", &hash, &CallOptions::new()).unwrap())
            })
            .collect();

        for t in threads {
            assert!(t.join().unwrap());
        }
    }
}
