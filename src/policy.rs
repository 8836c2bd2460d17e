//! Declarative configuration for a [`CryptContext`](crate::CryptContext).
//!
//! A policy is built from flat key/value pairs. Keys take the form `[category.]name.option`:
//!
//! * `schemes`, `deprecated`, `default` and `min_verify_time` (name omitted, or given as
//!   `context`) configure the context itself
//! * `bcrypt.default_rounds` sets an option for one scheme
//! * `admin.bcrypt.min_rounds` sets it only for the `admin` category
//! * `default.min_rounds` sets it for every scheme
//!
//! `/` is accepted in place of `.`, and `__` is too when a key contains no `.` at all.
//!
//! ```ini
//! [passlib]
//! schemes = md5_crypt, bcrypt
//! deprecated = md5_crypt
//! bcrypt.default_rounds = 12
//! admin.bcrypt.default_rounds = 14
//! admin.min_verify_time = 0.1
//! ```

use crate::error::{CryptError, Result};
use crate::handler::{Handler, HandlerInfo, Settings};
use crate::params::{RoundsPolicy, VaryRounds};
use crate::registry::{validate_handler_name, Registry};

use ini::Ini;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Section read from INI sources when none is named
pub const DEFAULT_SECTION: &str = "passlib";

const CONTEXT: &str = "context";
const ALL_SCHEMES: &str = "default";

const CONTEXT_OPTIONS: &[&str] = &["schemes", "deprecated", "default", "fallback", "min_verify_time"];

/// A policy option value
#[derive(Clone, Debug, PartialEq)]
pub enum PolicyValue {
    /// An integer, such as a rounds count or salt size
    Int(i64),
    /// A float (`min_verify_time`)
    Float(f64),
    /// Anything else
    Text(String),
    /// A list of names (`schemes`, `deprecated`)
    List(Vec<String>),
}

impl PolicyValue {
    fn as_u32(&self, key: &str) -> Result<u32> {
        let invalid = |reason: String| CryptError::InvalidPolicyValue {
            key: key.to_string(),
            reason,
        };

        match self {
            PolicyValue::Int(i) => match u32::try_from(*i) {
                Ok(v) => Ok(v),
                Err(_) => Err(invalid(format!("{} is out of range", i))),
            },
            other => Err(invalid(format!("expected an integer, got {}", other))),
        }
    }

    fn as_bool(&self, key: &str) -> Result<bool> {
        let parsed = match self {
            PolicyValue::Int(0) => Some(false),
            PolicyValue::Int(1) => Some(true),
            PolicyValue::Text(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "y" => Some(true),
                "false" | "no" | "off" | "n" => Some(false),
                _ => None,
            },
            _ => None,
        };

        match parsed {
            Some(b) => Ok(b),
            None => Err(CryptError::InvalidPolicyValue {
                key: key.to_string(),
                reason: format!("expected a boolean, got {}", self),
            }),
        }
    }

    fn as_text(&self) -> Option<String> {
        match self {
            PolicyValue::Int(i) => Some(i.to_string()),
            PolicyValue::Text(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn as_list(&self) -> Option<Vec<String>> {
        match self {
            PolicyValue::Text(s) => Some(split_comma(s)),
            PolicyValue::List(l) => Some(l.iter().map(|s| s.trim().to_string()).collect()),
            _ => None,
        }
    }
}

impl fmt::Display for PolicyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyValue::Int(i) => write!(f, "{}", i),
            PolicyValue::Float(v) => write!(f, "{}", v),
            PolicyValue::Text(s) => write!(f, "{}", s),
            PolicyValue::List(l) => write!(f, "{}", l.join(", ")),
        }
    }
}

impl From<&str> for PolicyValue {
    fn from(s: &str) -> Self {
        PolicyValue::Text(s.to_string())
    }
}

impl From<String> for PolicyValue {
    fn from(s: String) -> Self {
        PolicyValue::Text(s)
    }
}

impl From<i64> for PolicyValue {
    fn from(i: i64) -> Self {
        PolicyValue::Int(i)
    }
}

impl From<u32> for PolicyValue {
    fn from(i: u32) -> Self {
        PolicyValue::Int(i64::from(i))
    }
}

impl From<f64> for PolicyValue {
    fn from(v: f64) -> Self {
        PolicyValue::Float(v)
    }
}

impl From<Vec<String>> for PolicyValue {
    fn from(l: Vec<String>) -> Self {
        PolicyValue::List(l)
    }
}

fn split_comma(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// A parsed policy key
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct PolicyKey {
    /// Category, or `None` for the default category
    pub category: Option<String>,
    /// Scheme name, `context` for context options, or `default` for every scheme
    pub name: String,
    /// Option name
    pub option: String,
}

impl PolicyKey {
    /// Parses and validates a `[category.]name.option` key
    pub fn parse(key: &str) -> Result<Self> {
        let invalid = |reason: &'static str| CryptError::InvalidPolicyKey {
            key: key.to_string(),
            reason,
        };

        let mut normed: String = key.chars().filter(|c| !c.is_whitespace()).collect();
        if normed.contains('/') {
            normed = normed.replace('/', ".");
        } else if !normed.contains('.') && normed.contains("__") {
            normed = normed.replace("__", ".");
        }

        let parts: Vec<&str> = normed.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid("empty key segment"));
        }

        let (category, name, option) = match parts.as_slice() {
            [option] => (None, CONTEXT, *option),
            [name, option] => (None, *name, *option),
            [category, name, option] => (Some(*category), *name, *option),
            _ => return Err(invalid("keys must have at most two separators")),
        };

        let category = match category {
            Some("default") | None => None,
            Some(c) => Some(c.to_string()),
        };

        if name == CONTEXT {
            if !CONTEXT_OPTIONS.contains(&option) {
                return Err(invalid("unknown context option"));
            }
            if category.is_some() && option == "schemes" {
                return Err(invalid("schemes cannot be set per category"));
            }
        } else if option == "salt" {
            return Err(invalid("salt cannot be set through a policy"));
        }

        Ok(Self {
            category,
            name: name.to_string(),
            option: option.to_string(),
        })
    }

    fn is_context(&self) -> bool {
        self.name == CONTEXT
    }
}

impl fmt::Display for PolicyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(c) = &self.category {
            write!(f, "{}.", c)?;
        }
        write!(f, "{}.{}", self.name, self.option)
    }
}

/// Interprets a value according to where its key puts it: context lists and times are
/// structured, and everything else becomes an integer when it looks like one.
fn coerce_value(key: &PolicyKey, value: PolicyValue) -> Result<PolicyValue> {
    let invalid = |reason: String| CryptError::InvalidPolicyValue {
        key: key.to_string(),
        reason,
    };

    if !key.is_context() {
        return Ok(match value {
            PolicyValue::Text(s) => match s.trim().parse::<i64>() {
                Ok(i) => PolicyValue::Int(i),
                Err(_) => PolicyValue::Text(s.trim().to_string()),
            },
            other => other,
        });
    }

    match key.option.as_str() {
        "schemes" | "deprecated" => match value.as_list() {
            Some(l) => Ok(PolicyValue::List(l)),
            None => Err(invalid(format!("expected a list of scheme names, got {}", value))),
        },

        "min_verify_time" => {
            let secs = match &value {
                PolicyValue::Float(v) => *v,
                PolicyValue::Int(i) => *i as f64,
                PolicyValue::Text(s) => match s.trim().parse::<f64>() {
                    Ok(v) => v,
                    Err(_) => return Err(invalid(format!("expected seconds, got {:?}", s))),
                },
                PolicyValue::List(_) => return Err(invalid(String::from("expected seconds"))),
            };

            if !secs.is_finite() || secs < 0.0 {
                return Err(invalid(format!("{} is not a valid duration", secs)));
            }

            Ok(PolicyValue::Float(secs))
        }

        _ => match value {
            PolicyValue::Text(s) => Ok(PolicyValue::Text(s.trim().to_string())),
            other => Err(invalid(format!("expected a scheme name, got {}", other))),
        },
    }
}

/// Checks the options whose type is fixed, so a bad value fails at build time rather than
/// on first use
fn check_scheme_option(key: &PolicyKey, value: &PolicyValue) -> Result<()> {
    let key_str = key.to_string();

    match key.option.as_str() {
        "min_rounds" | "max_rounds" | "default_rounds" | "rounds" | "salt_size" => {
            value.as_u32(&key_str)?;
        }
        "vary_rounds" | "vary_default_rounds" => {
            vary_rounds_of(&key_str, value)?;
        }
        "truncate_error" | "relaxed" => {
            value.as_bool(&key_str)?;
        }
        "ident" => {
            if value.as_text().is_none() {
                return Err(CryptError::InvalidPolicyValue {
                    key: key_str,
                    reason: String::from("expected an identifier"),
                });
            }
        }
        "algs" => {
            if value.as_list().is_none() {
                return Err(CryptError::InvalidPolicyValue {
                    key: key_str,
                    reason: String::from("expected a list of algorithms"),
                });
            }
        }
        other => debug!(key = key_str.as_str(), "passing through handler option {:?}", other),
    }

    Ok(())
}

fn vary_rounds_of(key: &str, value: &PolicyValue) -> Result<VaryRounds> {
    match value {
        PolicyValue::Int(_) => Ok(VaryRounds::Absolute(value.as_u32(key)?)),
        PolicyValue::Text(s) => s.parse::<VaryRounds>().map_err(|_| CryptError::InvalidPolicyValue {
            key: key.to_string(),
            reason: format!("expected an integer or a percentage, got {:?}", s),
        }),
        other => Err(CryptError::InvalidPolicyValue {
            key: key.to_string(),
            reason: format!("expected an integer or a percentage, got {}", other),
        }),
    }
}

/// Options that belong to one category
#[derive(Clone, Debug, Default)]
struct CategoryPolicy {
    fallback: Option<String>,
    deprecated: Option<BTreeSet<String>>,
    min_verify_time: Option<Duration>,
}

enum SchemeRef {
    Name(String),
    Handler(Arc<dyn Handler>),
}

/// Builds a [`Policy`] programmatically
///
/// ```rust
/// use crypt_context::PolicyBuilder;
///
/// let policy = PolicyBuilder::new()
///     .schemes(["md5_crypt", "pbkdf2_sha256"])
///     .deprecated(None, ["md5_crypt"])
///     .option(None, "pbkdf2_sha256", "default_rounds", 1000u32)
///     .build()
///     .unwrap();
///
/// assert_eq!(policy.default_scheme(None), Some("pbkdf2_sha256"));
/// assert!(policy.is_deprecated("md5_crypt", None));
/// ```
pub struct PolicyBuilder<'r> {
    registry: &'r Registry,
    schemes: Vec<SchemeRef>,
    entries: Vec<(String, PolicyValue)>,
}

impl PolicyBuilder<'static> {
    /// Create a builder that resolves scheme names against the global registry
    pub fn new() -> Self {
        Self::with_registry(Registry::global())
    }
}

impl Default for PolicyBuilder<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'r> PolicyBuilder<'r> {
    /// Create a builder that resolves scheme names against `registry`
    pub fn with_registry(registry: &'r Registry) -> Self {
        Self {
            registry,
            schemes: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Sets the scheme list by name, replacing any schemes given before. The last scheme is
    /// the default for new hashes.
    pub fn schemes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.schemes = names
            .into_iter()
            .map(|n| SchemeRef::Name(n.as_ref().to_string()))
            .collect();
        self
    }

    /// Appends a handler object to the scheme list. The handler does not need to be in the
    /// registry.
    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.schemes.push(SchemeRef::Handler(handler));
        self
    }

    /// Marks schemes as deprecated in a category (`None` for the default category)
    pub fn deprecated<I, S>(self, category: Option<&str>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = names.into_iter().map(|n| n.as_ref().to_string()).collect();
        self.context_option(category, "deprecated", PolicyValue::List(names))
    }

    /// Chooses the scheme used for new hashes in a category
    pub fn default_scheme(self, category: Option<&str>, name: &str) -> Self {
        self.context_option(category, "default", PolicyValue::from(name))
    }

    /// Sets the minimum time, in seconds, a verification in the category may take
    pub fn min_verify_time(self, category: Option<&str>, seconds: f64) -> Self {
        self.context_option(category, "min_verify_time", PolicyValue::Float(seconds))
    }

    /// Sets an option for one scheme (or for all of them, with the scheme name `default`)
    pub fn option<V: Into<PolicyValue>>(
        mut self,
        category: Option<&str>,
        scheme: &str,
        option: &str,
        value: V,
    ) -> Self {
        let key = match category {
            Some(c) => format!("{}.{}.{}", c, scheme, option),
            None => format!("{}.{}", scheme, option),
        };
        self.entries.push((key, value.into()));
        self
    }

    /// Adds a raw key/value pair, exactly as it would appear in a configuration file
    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.entries.push((key.to_string(), PolicyValue::from(value)));
        self
    }

    fn context_option(mut self, category: Option<&str>, option: &str, value: PolicyValue) -> Self {
        let key = match category {
            Some(c) => format!("{}.{}.{}", c, CONTEXT, option),
            None => format!("{}.{}", CONTEXT, option),
        };
        self.entries.push((key, value));
        self
    }

    /// Validates everything and resolves scheme names into handlers
    pub fn build(self) -> Result<Policy> {
        let mut schemes = self.schemes;
        let mut contexts: BTreeMap<Option<String>, BTreeMap<String, PolicyValue>> = BTreeMap::new();
        let mut options: BTreeMap<(Option<String>, String), BTreeMap<String, PolicyValue>> =
            BTreeMap::new();

        for (raw_key, value) in self.entries {
            let key = PolicyKey::parse(&raw_key)?;
            let value = coerce_value(&key, value)?;

            if key.is_context() {
                if key.option == "schemes" {
                    if let Some(names) = value.as_list() {
                        schemes = names.into_iter().map(SchemeRef::Name).collect();
                    }
                    continue;
                }

                let option = match key.option.as_str() {
                    "fallback" => String::from("default"),
                    other => other.to_string(),
                };
                contexts.entry(key.category).or_default().insert(option, value);
            } else {
                check_scheme_option(&key, &value)?;
                options
                    .entry((key.category, key.name))
                    .or_default()
                    .insert(key.option, value);
            }
        }

        let mut handlers: Vec<Arc<dyn Handler>> = Vec::with_capacity(schemes.len());
        for scheme in schemes {
            let handler = match scheme {
                SchemeRef::Name(name) => self.registry.resolve(&name)?,
                SchemeRef::Handler(h) => {
                    if let Err(e) = validate_handler_name(h.name()) {
                        return Err(CryptError::InvalidPolicyValue {
                            key: String::from("schemes"),
                            reason: e.to_string(),
                        });
                    }
                    h
                }
            };

            if handlers.iter().any(|h| h.name() == handler.name()) {
                return Err(CryptError::InvalidPolicyValue {
                    key: String::from("schemes"),
                    reason: format!("multiple handlers named {:?}", handler.name()),
                });
            }

            handlers.push(handler);
        }

        let known = |name: &str| handlers.iter().any(|h| h.name() == name);

        let mut categories: BTreeMap<Option<String>, CategoryPolicy> = BTreeMap::new();
        for (category, values) in contexts {
            let key_for = |option: &str| match &category {
                Some(c) => format!("{}.{}.{}", c, CONTEXT, option),
                None => format!("{}.{}", CONTEXT, option),
            };

            let mut entry = CategoryPolicy::default();

            if let Some(value) = values.get("default") {
                let name = value.as_text().unwrap_or_default();
                if !known(&name) {
                    return Err(CryptError::InvalidPolicyValue {
                        key: key_for("default"),
                        reason: format!("{:?} is not one of the configured schemes", name),
                    });
                }
                entry.fallback = Some(name);
            }

            if let Some(value) = values.get("deprecated") {
                let names = value.as_list().unwrap_or_default();
                if let Some(unknown) = names.iter().find(|n| !known(n)) {
                    return Err(CryptError::InvalidPolicyValue {
                        key: key_for("deprecated"),
                        reason: format!("{:?} is not one of the configured schemes", unknown),
                    });
                }
                entry.deprecated = Some(names.into_iter().collect());
            }

            if let Some(PolicyValue::Float(secs)) = values.get("min_verify_time") {
                entry.min_verify_time = Some(Duration::from_secs_f64(*secs));
            }

            categories.insert(category, entry);
        }

        let default = categories.entry(None).or_default();
        if default.fallback.is_none() {
            default.fallback = handlers.last().map(|h| h.name().to_string());
        }
        if default.deprecated.is_none() {
            default.deprecated = Some(BTreeSet::new());
        }
        if default.min_verify_time.is_none() {
            default.min_verify_time = Some(Duration::ZERO);
        }

        for (category, _) in options.keys() {
            categories.entry(category.clone()).or_default();
        }

        let policy = Policy {
            handlers,
            categories,
            options,
        };

        for category in policy.categories.keys() {
            let category = category.as_deref();
            if let Some(fallback) = policy.default_scheme(category) {
                if policy.is_deprecated(fallback, category) {
                    return Err(CryptError::InvalidPolicyValue {
                        key: String::from("deprecated"),
                        reason: format!(
                            "the default scheme {:?} cannot be deprecated{}",
                            fallback,
                            category.map(|c| format!(" in category {:?}", c)).unwrap_or_default()
                        ),
                    });
                }
            }
        }

        Ok(policy)
    }
}

/// A validated, immutable policy
pub struct Policy {
    /// In configured order; identification walks it backwards
    handlers: Vec<Arc<dyn Handler>>,
    categories: BTreeMap<Option<String>, CategoryPolicy>,
    options: BTreeMap<(Option<String>, String), BTreeMap<String, PolicyValue>>,
}

impl Policy {
    /// Builds a policy from raw key/value pairs, resolving schemes through the global registry
    ///
    /// ```rust
    /// use crypt_context::Policy;
    ///
    /// let policy = Policy::from_pairs([
    ///     ("schemes", "md5_crypt, bcrypt"),
    ///     ("bcrypt__default_rounds", "10"),
    /// ])
    /// .unwrap();
    ///
    /// assert_eq!(policy.schemes(), vec!["md5_crypt", "bcrypt"]);
    /// assert_eq!(policy.default_scheme(None), Some("bcrypt"));
    /// ```
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        pairs
            .into_iter()
            .fold(PolicyBuilder::new(), |b, (k, v)| b.set(k.as_ref(), v.as_ref()))
            .build()
    }

    /// Builds a policy from one section (by default `passlib`) of INI text
    pub fn from_ini_str(text: &str, section: Option<&str>) -> Result<Self> {
        let ini = match Ini::load_from_str(text) {
            Ok(i) => i,
            Err(e) => return Err(CryptError::ConfigSource(e.to_string())),
        };

        Self::from_ini(&ini, section)
    }

    /// Builds a policy from one section (by default `passlib`) of an INI file
    pub fn from_path<P: AsRef<Path>>(path: P, section: Option<&str>) -> Result<Self> {
        let path = path.as_ref();
        let ini = match Ini::load_from_file(path) {
            Ok(i) => i,
            Err(e) => {
                return Err(CryptError::ConfigSource(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        Self::from_ini(&ini, section)
    }

    fn from_ini(ini: &Ini, section: Option<&str>) -> Result<Self> {
        let section = section.unwrap_or(DEFAULT_SECTION);
        let properties = match ini.section(Some(section)) {
            Some(p) => p,
            None => {
                return Err(CryptError::ConfigSource(format!(
                    "no [{}] section",
                    section
                )))
            }
        };

        Self::from_pairs(properties.iter())
    }

    /// Treats `source` as INI text if it spans several lines and as a file path otherwise
    pub fn from_source(source: &str) -> Result<Self> {
        if source.contains('\n') {
            Self::from_ini_str(source, None)
        } else {
            Self::from_path(source, None)
        }
    }

    /// Builds a policy from a list of sources. Layering several sources over one another is
    /// not supported, so exactly one must be given.
    pub fn from_sources(sources: &[&str]) -> Result<Self> {
        match sources {
            [] => Err(CryptError::ConfigSource(String::from("no policy sources given"))),
            [source] => Self::from_source(source),
            _ => Err(CryptError::UnsupportedParameter(String::from(
                "policy layering: combining several policy sources is not supported",
            ))),
        }
    }

    /// Scheme names in configured order
    pub fn schemes(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Handlers in identification order: the most recently configured first
    pub fn handlers(&self) -> impl Iterator<Item = &Arc<dyn Handler>> {
        self.handlers.iter().rev()
    }

    /// The configured handler named `name`
    pub fn handler(&self, name: &str) -> Option<&Arc<dyn Handler>> {
        self.handlers.iter().find(|h| h.name() == name)
    }

    fn category(&self, category: Option<&str>) -> Option<&CategoryPolicy> {
        match category {
            Some(c) => self.categories.get(&Some(c.to_string())),
            None => None,
        }
    }

    fn default_category(&self) -> Option<&CategoryPolicy> {
        self.categories.get(&None)
    }

    /// Scheme used for new hashes in `category`, falling back to the default category
    pub fn default_scheme(&self, category: Option<&str>) -> Option<&str> {
        self.category(category)
            .and_then(|c| c.fallback.as_deref())
            .or_else(|| self.default_category().and_then(|c| c.fallback.as_deref()))
    }

    /// Whether hashes made by `scheme` should be replaced when seen in `category`
    pub fn is_deprecated(&self, scheme: &str, category: Option<&str>) -> bool {
        let deprecated = self
            .category(category)
            .and_then(|c| c.deprecated.as_ref())
            .or_else(|| self.default_category().and_then(|c| c.deprecated.as_ref()));

        match deprecated {
            Some(d) => d.contains(scheme),
            None => false,
        }
    }

    /// The minimum time a verification in `category` may take
    pub fn min_verify_time(&self, category: Option<&str>) -> Duration {
        self.category(category)
            .and_then(|c| c.min_verify_time)
            .or_else(|| self.default_category().and_then(|c| c.min_verify_time))
            .unwrap_or(Duration::ZERO)
    }

    /// Named categories that have any configuration of their own, sorted
    pub fn categories(&self) -> Vec<&str> {
        self.categories.keys().filter_map(|c| c.as_deref()).collect()
    }

    /// Options for `scheme` in `category`. Later layers win: options for every scheme, then
    /// the category's options for every scheme, then options for this scheme, then the
    /// category's options for this scheme.
    pub fn get_options(&self, scheme: &str, category: Option<&str>) -> BTreeMap<String, PolicyValue> {
        let category = category.map(String::from);
        let layers = [
            (None, ALL_SCHEMES),
            (category.clone(), ALL_SCHEMES),
            (None, scheme),
            (category, scheme),
        ];

        let mut merged = BTreeMap::new();
        for (category, name) in layers {
            if let Some(opts) = self.options.get(&(category, name.to_string())) {
                merged.extend(opts.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }

        merged
    }

    /// Rounds bounds and default for `scheme` in `category`. A bare `rounds` option acts as
    /// `default_rounds`.
    pub fn rounds_policy(&self, scheme: &str, category: Option<&str>) -> Result<RoundsPolicy> {
        let options = self.get_options(scheme, category);
        let get_u32 = |key: &str| -> Result<Option<u32>> {
            match options.get(key) {
                Some(v) => Ok(Some(v.as_u32(key)?)),
                None => Ok(None),
            }
        };

        let vary_rounds = match options
            .get("vary_rounds")
            .or_else(|| options.get("vary_default_rounds"))
        {
            Some(v) => Some(vary_rounds_of("vary_rounds", v)?),
            None => None,
        };

        Ok(RoundsPolicy {
            min_rounds: get_u32("min_rounds")?,
            max_rounds: get_u32("max_rounds")?,
            default_rounds: get_u32("default_rounds")?.or(get_u32("rounds")?),
            vary_rounds,
        })
    }

    /// Default settings for a handler in `category`, limited to the settings the handler
    /// accepts. Rounds are left to [`rounds_policy`](Self::rounds_policy).
    pub fn settings_for(&self, info: &HandlerInfo, category: Option<&str>) -> Result<Settings> {
        let options = self.get_options(info.name, category);
        let mut settings = Settings::new();

        for (option, value) in &options {
            let accepted = info.accepts_setting(option) || option == "relaxed";
            if !accepted {
                continue;
            }

            match option.as_str() {
                "salt_size" => settings.salt_size = Some(value.as_u32(option)? as usize),
                "ident" => settings.ident = value.as_text(),
                "algs" => settings.algs = value.as_list(),
                "truncate_error" => settings.truncate_error = Some(value.as_bool(option)?),
                "relaxed" => settings.relaxed = value.as_bool(option)?,
                _ => (),
            }
        }

        Ok(settings)
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("schemes", &self.schemes())
            .field("categories", &self.categories)
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestKind;
    use crate::handlers::HexDigest;

    fn key(category: Option<&str>, name: &str, option: &str) -> PolicyKey {
        PolicyKey {
            category: category.map(String::from),
            name: name.to_string(),
            option: option.to_string(),
        }
    }

    #[test]
    fn test_key_grammar() {
        assert_eq!(PolicyKey::parse("schemes").unwrap(), key(None, "context", "schemes"));
        assert_eq!(PolicyKey::parse("bcrypt.min_rounds").unwrap(), key(None, "bcrypt", "min_rounds"));
        assert_eq!(
            PolicyKey::parse("admin.bcrypt.min_rounds").unwrap(),
            key(Some("admin"), "bcrypt", "min_rounds")
        );
        assert_eq!(
            PolicyKey::parse("default.bcrypt.min_rounds").unwrap(),
            key(None, "bcrypt", "min_rounds")
        );
        assert_eq!(
            PolicyKey::parse(" admin / bcrypt / min_rounds ").unwrap(),
            key(Some("admin"), "bcrypt", "min_rounds")
        );
        assert_eq!(
            PolicyKey::parse("admin__context__deprecated").unwrap(),
            key(Some("admin"), "context", "deprecated")
        );
        assert_eq!(
            PolicyKey::parse("admin.min_verify_time").unwrap(),
            key(None, "admin", "min_verify_time")
        );
        assert_eq!(
            PolicyKey::parse("admin.context.min_verify_time").unwrap(),
            key(Some("admin"), "context", "min_verify_time")
        );
        assert_eq!(PolicyKey::parse("a.b__c").unwrap(), key(None, "a", "b__c"));

        for bad in ["a.b.c.d", "bcrypt..min_rounds", "", ".schemes", "admin.schemes.", "unknown_context_option"] {
            assert!(
                matches!(PolicyKey::parse(bad), Err(CryptError::InvalidPolicyKey { .. })),
                "{:?}",
                bad
            );
        }

        assert!(matches!(
            PolicyKey::parse("admin.context.schemes"),
            Err(CryptError::InvalidPolicyKey { reason, .. }) if reason.contains("per category")
        ));
        assert!(matches!(
            PolicyKey::parse("bcrypt.salt"),
            Err(CryptError::InvalidPolicyKey { .. })
        ));
    }

    #[test]
    fn test_value_coercion() {
        let ctx = |opt: &str| key(None, "context", opt);
        let opt = key(None, "bcrypt", "min_rounds");

        assert_eq!(
            coerce_value(&ctx("schemes"), "a, b,,c ".into()).unwrap(),
            PolicyValue::List(vec![String::from("a"), String::from("b"), String::from("c")])
        );
        assert_eq!(
            coerce_value(&ctx("min_verify_time"), "0.5".into()).unwrap(),
            PolicyValue::Float(0.5)
        );
        assert_eq!(
            coerce_value(&ctx("min_verify_time"), PolicyValue::Int(2)).unwrap(),
            PolicyValue::Float(2.0)
        );
        assert!(coerce_value(&ctx("min_verify_time"), "-1".into()).is_err());
        assert!(coerce_value(&ctx("min_verify_time"), "soon".into()).is_err());
        assert_eq!(
            coerce_value(&ctx("default"), " bcrypt ".into()).unwrap(),
            PolicyValue::from("bcrypt")
        );

        assert_eq!(coerce_value(&opt, " 12 ".into()).unwrap(), PolicyValue::Int(12));
        assert_eq!(coerce_value(&opt, "10%".into()).unwrap(), PolicyValue::from("10%"));
        assert_eq!(coerce_value(&opt, PolicyValue::Float(1.5)).unwrap(), PolicyValue::Float(1.5));
    }

    #[test]
    fn test_schemes_and_default() {
        let policy = Policy::from_pairs([("schemes", "md5_crypt, hex_sha256, pbkdf2_sha256")]).unwrap();

        assert_eq!(policy.schemes(), vec!["md5_crypt", "hex_sha256", "pbkdf2_sha256"]);
        assert_eq!(
            policy.handlers().map(|h| h.name()).collect::<Vec<_>>(),
            vec!["pbkdf2_sha256", "hex_sha256", "md5_crypt"]
        );
        assert_eq!(policy.default_scheme(None), Some("pbkdf2_sha256"));
        assert_eq!(policy.default_scheme(Some("nobody")), Some("pbkdf2_sha256"));
        assert_eq!(policy.min_verify_time(None), Duration::ZERO);
        assert!(!policy.is_deprecated("md5_crypt", None));
        assert!(policy.categories().is_empty());
        assert!(policy.handler("hex_sha256").is_some());
        assert!(policy.handler("bcrypt").is_none());

        let explicit = Policy::from_pairs([
            ("schemes", "md5_crypt, hex_sha256"),
            ("default", "md5_crypt"),
            ("admin.context.fallback", "hex_sha256"),
        ])
        .unwrap();
        assert_eq!(explicit.default_scheme(None), Some("md5_crypt"));
        assert_eq!(explicit.default_scheme(Some("admin")), Some("hex_sha256"));
        assert_eq!(explicit.categories(), vec!["admin"]);
    }

    #[test]
    fn test_scheme_resolution_errors() {
        assert!(matches!(
            Policy::from_pairs([("schemes", "md5_crypt, no_such_hash")]),
            Err(CryptError::UnknownAlgorithm(_))
        ));
        assert!(matches!(
            Policy::from_pairs([("schemes", "md5_crypt, md5-crypt")]),
            Err(CryptError::InvalidPolicyValue { .. })
        ));
        assert!(matches!(
            Policy::from_pairs([("schemes", "md5_crypt"), ("default", "bcrypt")]),
            Err(CryptError::InvalidPolicyValue { .. })
        ));
        assert!(matches!(
            Policy::from_pairs([("schemes", "md5_crypt"), ("deprecated", "hex_md5")]),
            Err(CryptError::InvalidPolicyValue { .. })
        ));
        assert!(matches!(
            Policy::from_pairs([("schemes", "md5_crypt, hex_md5"), ("deprecated", "hex_md5")]),
            Err(CryptError::InvalidPolicyValue { reason, .. }) if reason.contains("cannot be deprecated")
        ));
        assert!(matches!(
            Policy::from_pairs([("schemes", "md5_crypt"), ("md5_crypt.default_rounds", "many")]),
            Err(CryptError::InvalidPolicyValue { .. })
        ));
        assert!(matches!(
            Policy::from_pairs([("schemes", "md5_crypt"), ("md5_crypt.vary_rounds", "ten%")]),
            Err(CryptError::InvalidPolicyValue { .. })
        ));
    }

    #[test]
    fn test_deprecation_by_category() {
        let policy = PolicyBuilder::new()
            .schemes(["md5_crypt", "hex_sha256", "pbkdf2_sha256"])
            .deprecated(None, ["md5_crypt"])
            .deprecated(Some("admin"), ["md5_crypt", "hex_sha256"])
            .min_verify_time(Some("admin"), 0.25)
            .build()
            .unwrap();

        assert!(policy.is_deprecated("md5_crypt", None));
        assert!(!policy.is_deprecated("hex_sha256", None));
        assert!(policy.is_deprecated("hex_sha256", Some("admin")));
        assert!(!policy.is_deprecated("hex_sha256", Some("staff")));
        assert_eq!(policy.min_verify_time(Some("admin")), Duration::from_millis(250));
        assert_eq!(policy.min_verify_time(Some("staff")), Duration::ZERO);
    }

    #[test]
    fn test_get_options_layering() {
        let policy = Policy::from_pairs([
            ("schemes", "pbkdf2_sha256, md5_crypt"),
            ("default.min_rounds", "1"),
            ("default.salt_size", "4"),
            ("admin.default.min_rounds", "2"),
            ("pbkdf2_sha256.min_rounds", "3"),
            ("pbkdf2_sha256.default_rounds", "5"),
            ("admin.pbkdf2_sha256.default_rounds", "7"),
        ])
        .unwrap();

        let opts = policy.get_options("pbkdf2_sha256", None);
        assert_eq!(opts["min_rounds"], PolicyValue::Int(3));
        assert_eq!(opts["default_rounds"], PolicyValue::Int(5));
        assert_eq!(opts["salt_size"], PolicyValue::Int(4));

        let opts = policy.get_options("pbkdf2_sha256", Some("admin"));
        assert_eq!(opts["min_rounds"], PolicyValue::Int(3));
        assert_eq!(opts["default_rounds"], PolicyValue::Int(7));

        let opts = policy.get_options("md5_crypt", Some("admin"));
        assert_eq!(opts["min_rounds"], PolicyValue::Int(2));
        assert!(!opts.contains_key("default_rounds"));

        assert_eq!(policy.categories(), vec!["admin"]);
    }

    #[test]
    fn test_rounds_policy_and_settings() {
        let policy = Policy::from_pairs([
            ("schemes", "scram, bcrypt"),
            ("bcrypt.min_rounds", "10"),
            ("bcrypt.max_rounds", "14"),
            ("bcrypt.vary_rounds", "10%"),
            ("bcrypt.rounds", "12"),
            ("bcrypt.ident", "2a"),
            ("bcrypt.truncate_error", "true"),
            ("scram.algs", "sha-1, sha-512"),
            ("scram.vary_default_rounds", "100"),
            ("scram.salt_size", "16"),
            ("scram.ident", "ignored"),
        ])
        .unwrap();

        assert_eq!(
            policy.rounds_policy("bcrypt", None).unwrap(),
            RoundsPolicy {
                min_rounds: Some(10),
                max_rounds: Some(14),
                default_rounds: Some(12),
                vary_rounds: Some(VaryRounds::Percent(10)),
            }
        );
        assert_eq!(
            policy.rounds_policy("scram", None).unwrap().vary_rounds,
            Some(VaryRounds::Absolute(100))
        );

        let bcrypt = policy.handler("bcrypt").unwrap();
        let settings = policy.settings_for(bcrypt.info(), None).unwrap();
        assert_eq!(settings.ident.as_deref(), Some("2a"));
        assert_eq!(settings.truncate_error, Some(true));
        assert_eq!(settings.rounds, None);

        let scram = policy.handler("scram").unwrap();
        let settings = policy.settings_for(scram.info(), None).unwrap();
        assert_eq!(settings.algs, Some(vec![String::from("sha-1"), String::from("sha-512")]));
        assert_eq!(settings.salt_size, Some(16));
        assert_eq!(settings.ident, None);
    }

    #[test]
    fn test_builder_accepts_unregistered_handlers() {
        let registry = Registry::empty();
        let custom: Arc<dyn Handler> = Arc::new(HexDigest::new("site_sha256", DigestKind::Sha256));

        let policy = PolicyBuilder::with_registry(&registry)
            .handler(Arc::clone(&custom))
            .option(None, "site_sha256", "note", "kept")
            .build()
            .unwrap();

        assert_eq!(policy.schemes(), vec!["site_sha256"]);
        assert_eq!(policy.default_scheme(None), Some("site_sha256"));
        assert_eq!(
            policy.get_options("site_sha256", None)["note"],
            PolicyValue::from("kept")
        );

        assert!(matches!(
            PolicyBuilder::with_registry(&registry).schemes(["md5_crypt"]).build(),
            Err(CryptError::UnknownAlgorithm(_))
        ));

        let bad_name: Arc<dyn Handler> = Arc::new(HexDigest::new("Bad-Name", DigestKind::Sha256));
        assert!(PolicyBuilder::with_registry(&registry).handler(bad_name).build().is_err());
    }

    #[test]
    fn test_empty_policy() {
        let policy = PolicyBuilder::new().build().unwrap();
        assert!(policy.schemes().is_empty());
        assert_eq!(policy.default_scheme(None), None);
    }

    const INI: &str = "\
[other]
schemes = hex_md5

[passlib]
schemes = md5_crypt, pbkdf2_sha256
deprecated = md5_crypt
pbkdf2_sha256.default_rounds = 1000
admin.pbkdf2_sha256.default_rounds = 2000
admin.context.min_verify_time = 0.1
";

    #[test]
    fn test_ini_sources() {
        let policy = Policy::from_ini_str(INI, None).unwrap();
        assert_eq!(policy.schemes(), vec!["md5_crypt", "pbkdf2_sha256"]);
        assert!(policy.is_deprecated("md5_crypt", None));
        assert_eq!(policy.min_verify_time(Some("admin")), Duration::from_millis(100));
        assert_eq!(
            policy.rounds_policy("pbkdf2_sha256", Some("admin")).unwrap().default_rounds,
            Some(2000)
        );

        let other = Policy::from_ini_str(INI, Some("other")).unwrap();
        assert_eq!(other.schemes(), vec!["hex_md5"]);

        assert!(matches!(
            Policy::from_ini_str(INI, Some("missing")),
            Err(CryptError::ConfigSource(_))
        ));

        let from_text = Policy::from_source(INI).unwrap();
        assert_eq!(from_text.schemes(), policy.schemes());
    }

    #[test]
    fn test_file_sources() {
        let path = std::env::temp_dir().join(format!("crypt-context-policy-{}.ini", std::process::id()));
        std::fs::write(&path, INI).unwrap();

        let path_str = path.to_str().unwrap();
        let policy = Policy::from_path(&path, None).unwrap();
        assert_eq!(policy.default_scheme(None), Some("pbkdf2_sha256"));
        assert_eq!(Policy::from_source(path_str).unwrap().schemes(), policy.schemes());
        assert_eq!(Policy::from_sources(&[path_str]).unwrap().schemes(), policy.schemes());

        assert!(matches!(
            Policy::from_sources(&[path_str, INI]),
            Err(CryptError::UnsupportedParameter(_))
        ));
        assert!(matches!(Policy::from_sources(&[]), Err(CryptError::ConfigSource(_))));

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(Policy::from_path(&path, None), Err(CryptError::ConfigSource(_))));
    }
}
