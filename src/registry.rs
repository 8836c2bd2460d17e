//! Name to handler resolution.
//!
//! A [`Registry`] holds explicitly registered handlers and, unless created with
//! [`Registry::empty`], falls back to constructing the bundled handlers on first lookup.
//! [`Registry::global`] is the process-wide instance policies resolve scheme names against.

use crate::error::{CryptError, Result};
use crate::handler::Handler;
use crate::handlers;

use once_cell::sync::Lazy;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Names that have a meaning of their own in policy keys and so can never name a handler
const RESERVED_NAMES: &[&str] = &["all", "auto", "context", "default", "none", "onload", "policy"];

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::new);

/// Checks that `name` is usable as a handler name: `[a-z0-9_]+`, not starting with `_`, and
/// not reserved
pub fn validate_handler_name(name: &str) -> Result<()> {
    let well_formed = !name.is_empty()
        && !name.starts_with('_')
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');

    if !well_formed || RESERVED_NAMES.contains(&name) {
        return Err(CryptError::InvalidHandlerName(name.to_string()));
    }

    Ok(())
}

/// Lowercases a name and treats `-` as `_`, warning if that changed anything
fn normalize_name(name: &str) -> String {
    let normed = name.trim().to_ascii_lowercase().replace('-', "_");
    if normed != name {
        warn!(requested = name, normalized = normed.as_str(), "handler name normalized");
    }

    normed
}

fn same_handler(a: &Arc<dyn Handler>, b: &Arc<dyn Handler>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const u8, Arc::as_ptr(b) as *const u8)
}

/// A set of named handlers
pub struct Registry {
    handlers: RwLock<BTreeMap<String, Arc<dyn Handler>>>,
    load_builtins: bool,
}

impl Registry {
    /// Create a registry that lazily constructs the bundled handlers
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(BTreeMap::new()),
            load_builtins: true,
        }
    }

    /// Create a registry containing only what is explicitly registered
    pub fn empty() -> Self {
        Self {
            handlers: RwLock::new(BTreeMap::new()),
            load_builtins: false,
        }
    }

    /// The process-wide registry
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    /// Registers `handler` under its own name. Registering a different handler under a taken
    /// name fails unless `overwrite` is set; registering the same handler again is a no-op.
    pub fn register(&self, handler: Arc<dyn Handler>, overwrite: bool) -> Result<()> {
        let name = handler.name();
        validate_handler_name(name)?;

        let mut registered = self.handlers.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = registered.get(name) {
            if same_handler(existing, &handler) {
                return Ok(());
            }

            if !overwrite {
                return Err(CryptError::DuplicateHandler(name.to_string()));
            }

            warn!(handler = name, "overriding previously registered handler");
        }

        info!(handler = name, "registered password hash handler");
        registered.insert(name.to_string(), handler);

        Ok(())
    }

    /// Looks up a handler by name, constructing a bundled one if nothing is registered under
    /// it. Lookup ignores case and treats `-` and `_` alike.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Handler>> {
        let name = normalize_name(name);

        {
            let registered = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(h) = registered.get(&name) {
                return Ok(Arc::clone(h));
            }
        }

        if !self.load_builtins {
            return Err(CryptError::UnknownAlgorithm(name));
        }

        let mut registered = self.handlers.write().unwrap_or_else(PoisonError::into_inner);

        // Another caller may have loaded it while the read lock was released
        if let Some(h) = registered.get(&name) {
            return Ok(Arc::clone(h));
        }

        match handlers::builtin(&name) {
            Some(h) => {
                debug!(handler = name.as_str(), "loaded bundled handler");
                registered.insert(name, Arc::clone(&h));
                Ok(h)
            }
            None => Err(CryptError::UnknownAlgorithm(name)),
        }
    }

    /// Whether `name` is registered or can be loaded, without loading it
    pub fn has(&self, name: &str) -> bool {
        let name = normalize_name(name);

        let registered = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        registered.contains_key(&name)
            || (self.load_builtins && handlers::BUILTIN_NAMES.contains(&name.as_str()))
    }

    /// Every name that [`resolve`](Self::resolve) would accept, sorted
    pub fn list_known(&self) -> Vec<String> {
        let registered = self.handlers.read().unwrap_or_else(PoisonError::into_inner);

        let mut names: BTreeSet<String> = registered.keys().cloned().collect();
        if self.load_builtins {
            names.extend(handlers::BUILTIN_NAMES.iter().map(|n| n.to_string()));
        }

        names.into_iter().collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Registry")
            .field("registered", &registered.keys().collect::<Vec<_>>())
            .field("load_builtins", &self.load_builtins)
            .finish()
    }
}
