//! Selection among interchangeable implementations of one algorithm.
//!
//! A [`Negotiator`] owns an ordered list of candidate [`Backend`]s. On first use it loads
//! each candidate in turn and runs the handler's probe battery against it; the first
//! candidate that loads and passes becomes the active backend and the capability flags the
//! battery produced are frozen alongside it. Probing happens under a write lock, so
//! concurrent first uses coalesce into a single run.

use crate::error::{CryptError, Result};
use crate::handler::consteq;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// What a backend reports about itself once loaded
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// The backend's hashing routine is not thread-safe; calls through it must be serialized
    pub serialize_calls: bool,
}

/// Why a backend call produced no output
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendFailure {
    /// The backend does not implement the requested variant or parameter
    Unsupported(String),
    /// The backend failed for any other reason
    Failed(String),
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendFailure::Unsupported(msg) => write!(f, "unsupported: {}", msg),
            BackendFailure::Failed(msg) => write!(f, "failed: {}", msg),
        }
    }
}

/// One concrete implementation of an algorithm's checksum computation
pub trait Backend: Send + Sync {
    /// Short, unique name (`bcrypt`, `builtin`)
    fn name(&self) -> &'static str;

    /// Checks that the backend can be used in this process
    fn load(&self) -> std::result::Result<Capabilities, BackendFailure>;

    /// Computes a full hash string for `secret` under the configuration string `config`
    fn raw_compute(&self, secret: &[u8], config: &str)
        -> std::result::Result<String, BackendFailure>;
}

/// Result of checking a backend against a reference hash
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The backend reproduced the reference hash
    Match,
    /// The backend produced a different hash
    NoMatch,
    /// The backend does not implement the variant the reference hash uses
    Unsupported,
}

/// What a probe battery concluded about a candidate
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict<C> {
    /// Use this backend with the given capability flags
    Accept(C),
    /// Skip this backend and try the next candidate
    Reject(String),
}

/// A probe battery. Returning an error marks the handler unavailable; returning
/// [`Verdict::Reject`] moves on to the next candidate.
pub type Battery<C> = fn(&Prober<'_>) -> Result<Verdict<C>>;

fn call_backend(
    backend: &dyn Backend,
    lock: Option<&Mutex<()>>,
    secret: &[u8],
    config: &str,
) -> std::result::Result<String, BackendFailure> {
    match lock {
        Some(lock) => {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            backend.raw_compute(secret, config)
        }
        None => backend.raw_compute(secret, config),
    }
}

/// Handed to a probe battery so it can exercise a candidate backend
pub struct Prober<'a> {
    backend: &'a dyn Backend,
    lock: Option<&'a Mutex<()>>,
}

impl Prober<'_> {
    /// Name of the backend under test
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Computes `secret` under `config` and compares the result with `expected`
    pub fn probe(&self, secret: &[u8], config: &str, expected: &str) -> Result<ProbeOutcome> {
        match call_backend(self.backend, self.lock, secret, config) {
            Ok(output) => {
                if consteq(output.as_bytes(), expected.as_bytes()) {
                    Ok(ProbeOutcome::Match)
                } else {
                    Ok(ProbeOutcome::NoMatch)
                }
            }

            Err(BackendFailure::Unsupported(msg)) => {
                debug!(backend = self.backend.name(), config, "probe unsupported: {}", msg);
                Ok(ProbeOutcome::Unsupported)
            }

            Err(BackendFailure::Failed(msg)) => Err(CryptError::BackendContractViolation {
                backend: self.backend.name(),
                detail: msg,
            }),
        }
    }
}

/// The backend a negotiator settled on, with its frozen capability flags
pub struct ActiveBackend<C> {
    backend: Arc<dyn Backend>,
    capabilities: C,
    lock: Option<Mutex<()>>,
}

impl<C> ActiveBackend<C> {
    /// Name of the backend
    pub fn name(&self) -> &'static str {
        self.backend.name()
    }

    /// Flags recorded by the probe battery
    pub fn capabilities(&self) -> &C {
        &self.capabilities
    }

    /// Calls the backend, serialized if the backend asked for it
    pub fn raw_compute(
        &self,
        secret: &[u8],
        config: &str,
    ) -> std::result::Result<String, BackendFailure> {
        call_backend(self.backend.as_ref(), self.lock.as_ref(), secret, config)
    }
}

impl<C: fmt::Debug> fmt::Debug for ActiveBackend<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveBackend")
            .field("name", &self.backend.name())
            .field("capabilities", &self.capabilities)
            .field("serialized", &self.lock.is_some())
            .finish()
    }
}

enum State<C> {
    Unselected,
    Ready(Arc<ActiveBackend<C>>),
    Unavailable(String),
}

/// Per-handler backend selection state machine
pub struct Negotiator<C> {
    handler: &'static str,
    candidates: Vec<Arc<dyn Backend>>,
    battery: Battery<C>,
    state: RwLock<State<C>>,
    probes: AtomicUsize,
}

impl<C> Negotiator<C> {
    /// Create a negotiator that tries `candidates` in order
    pub fn new(handler: &'static str, candidates: Vec<Arc<dyn Backend>>, battery: Battery<C>) -> Self {
        Self {
            handler,
            candidates,
            battery,
            state: RwLock::new(State::Unselected),
            probes: AtomicUsize::new(0),
        }
    }

    /// Returns the active backend, selecting one first if none has been chosen yet
    pub fn active(&self) -> Result<Arc<ActiveBackend<C>>> {
        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            match &*state {
                State::Ready(active) => return Ok(Arc::clone(active)),
                State::Unavailable(reason) => return Err(self.unavailable(reason)),
                State::Unselected => (),
            }
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        // Another caller may have finished probing while this one waited for the lock
        match &*state {
            State::Ready(active) => return Ok(Arc::clone(active)),
            State::Unavailable(reason) => return Err(self.unavailable(reason)),
            State::Unselected => (),
        }

        match self.negotiate(None) {
            Ok(active) => {
                *state = State::Ready(Arc::clone(&active));
                Ok(active)
            }
            Err(err) => {
                *state = State::Unavailable(err.to_string());
                Err(err)
            }
        }
    }

    /// Switches to the named backend, or re-runs selection over all candidates when `name`
    /// is `None`. If the requested backend can't be used, the current selection is kept.
    pub fn select(&self, name: Option<&str>) -> Result<Arc<ActiveBackend<C>>> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let active = self.negotiate(name)?;
        *state = State::Ready(Arc::clone(&active));
        Ok(active)
    }

    /// Whether the named backend would load and pass the probe battery. Does not change the
    /// current selection.
    pub fn has_backend(&self, name: &str) -> bool {
        if self.active_name() == Some(name) {
            return true;
        }

        self.negotiate(Some(name)).is_ok()
    }

    /// Name of the active backend, without triggering selection
    pub fn active_name(&self) -> Option<&'static str> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            State::Ready(active) => Some(active.name()),
            _ => None,
        }
    }

    /// Names of all candidates, in preference order
    pub fn backend_names(&self) -> Vec<&'static str> {
        self.candidates.iter().map(|b| b.name()).collect()
    }

    /// How many times the probe battery has run
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    fn unavailable(&self, reason: &str) -> CryptError {
        CryptError::NoBackendAvailable {
            handler: self.handler,
            reason: reason.to_string(),
        }
    }

    fn negotiate(&self, only: Option<&str>) -> Result<Arc<ActiveBackend<C>>> {
        if let Some(name) = only {
            if !self.candidates.iter().any(|b| b.name() == name) {
                return Err(CryptError::unsupported(
                    self.handler,
                    format!("unknown backend {:?}", name),
                ));
            }
        }

        let mut reasons = Vec::new();

        for backend in self.candidates.iter().filter(|b| only.map_or(true, |n| b.name() == n)) {
            let capabilities = match backend.load() {
                Ok(c) => c,
                Err(failure) => {
                    debug!(handler = self.handler, backend = backend.name(), "backend not loaded: {}", failure);
                    reasons.push(format!("{}: {}", backend.name(), failure));
                    continue;
                }
            };

            let lock = if capabilities.serialize_calls {
                Some(Mutex::new(()))
            } else {
                None
            };

            self.probes.fetch_add(1, Ordering::SeqCst);

            let prober = Prober {
                backend: backend.as_ref(),
                lock: lock.as_ref(),
            };

            match (self.battery)(&prober)? {
                Verdict::Accept(flags) => {
                    info!(handler = self.handler, backend = backend.name(), "selected backend");
                    return Ok(Arc::new(ActiveBackend {
                        backend: Arc::clone(backend),
                        capabilities: flags,
                        lock,
                    }));
                }

                Verdict::Reject(reason) => {
                    warn!(handler = self.handler, backend = backend.name(), "backend rejected: {}", reason);
                    reasons.push(format!("{}: {}", backend.name(), reason));
                }
            }
        }

        let reason = if reasons.is_empty() {
            String::from("no candidate backends")
        } else {
            reasons.join("; ")
        };

        Err(self.unavailable(&reason))
    }
}

impl<C: fmt::Debug> fmt::Debug for Negotiator<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut s = f.debug_struct("Negotiator");
        s.field("handler", &self.handler)
            .field("candidates", &self.backend_names());

        match &*state {
            State::Unselected => s.field("state", &"unselected"),
            State::Ready(active) => s.field("state", active),
            State::Unavailable(reason) => s.field("unavailable", reason),
        };

        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[derive(Clone, Debug, Default, PartialEq, Eq)]
    struct ToyCaps {
        lacks_v2: bool,
    }

    /// Hashes by appending the reversed secret to the config
    #[derive(Default)]
    struct ToyBackend {
        name: &'static str,
        loadable: bool,
        broken: bool,
        insecure: bool,
        supports_v2: bool,
        serialize: bool,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        overlaps: AtomicUsize,
    }

    impl ToyBackend {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                loadable: true,
                supports_v2: true,
                ..Self::default()
            }
        }
    }

    impl Backend for ToyBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        fn load(&self) -> std::result::Result<Capabilities, BackendFailure> {
            if !self.loadable {
                return Err(BackendFailure::Unsupported(String::from("not installed")));
            }

            Ok(Capabilities {
                serialize_calls: self.serialize,
            })
        }

        fn raw_compute(
            &self,
            secret: &[u8],
            config: &str,
        ) -> std::result::Result<String, BackendFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_millis(2));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if config.starts_with("$v2$") && !self.supports_v2 {
                return Err(BackendFailure::Unsupported(String::from("no v2")));
            }

            if config == "$garbage$" {
                return Err(BackendFailure::Failed(String::from("exploded")));
            }

            let mut digest: Vec<u8> = secret.iter().rev().copied().collect();
            if self.broken {
                digest.push(b'!');
            }
            if self.insecure && secret == b"forged" {
                return Ok(String::from("$v1$real"));
            }

            Ok(format!("{}{}", config, String::from_utf8_lossy(&digest)))
        }
    }

    fn toy_battery(prober: &Prober<'_>) -> Result<Verdict<ToyCaps>> {
        if prober.probe(b"test", "$v1$", "$v1$tset")? != ProbeOutcome::Match {
            return Ok(Verdict::Reject(String::from("failed self test")));
        }

        if prober.probe(b"forged", "$v1$", "$v1$real")? == ProbeOutcome::Match {
            return Err(CryptError::BackendSecurityDefect {
                backend: prober.backend_name(),
                detail: String::from("accepts forged secrets"),
            });
        }

        let lacks_v2 = match prober.probe(b"test", "$v2$", "$v2$tset")? {
            ProbeOutcome::Match => false,
            ProbeOutcome::Unsupported => true,
            ProbeOutcome::NoMatch => {
                return Err(CryptError::BackendContractViolation {
                    backend: prober.backend_name(),
                    detail: String::from("v2 self test failed"),
                })
            }
        };

        Ok(Verdict::Accept(ToyCaps { lacks_v2 }))
    }

    fn negotiator(backends: Vec<Arc<ToyBackend>>) -> Negotiator<ToyCaps> {
        let candidates = backends
            .into_iter()
            .map(|b| b as Arc<dyn Backend>)
            .collect();
        Negotiator::new("toy", candidates, toy_battery)
    }

    #[test]
    fn test_selects_first_loadable_candidate() {
        let missing = Arc::new(ToyBackend {
            loadable: false,
            ..ToyBackend::new("missing")
        });
        let limited = Arc::new(ToyBackend {
            supports_v2: false,
            ..ToyBackend::new("limited")
        });
        let full = Arc::new(ToyBackend::new("full"));

        let n = negotiator(vec![missing, limited, full]);
        assert_eq!(n.active_name(), None);

        let active = n.active().unwrap();
        assert_eq!(active.name(), "limited");
        assert_eq!(active.capabilities(), &ToyCaps { lacks_v2: true });
        assert_eq!(n.probe_count(), 1);

        let again = n.active().unwrap();
        assert_eq!(again.name(), "limited");
        assert_eq!(n.probe_count(), 1);
        assert_eq!(n.backend_names(), vec!["missing", "limited", "full"]);
    }

    #[test]
    fn test_failed_self_test_skips_candidate() {
        let broken = Arc::new(ToyBackend {
            broken: true,
            ..ToyBackend::new("broken")
        });
        let full = Arc::new(ToyBackend::new("full"));

        let n = negotiator(vec![broken, full]);
        let active = n.active().unwrap();
        assert_eq!(active.name(), "full");
        assert_eq!(active.capabilities(), &ToyCaps { lacks_v2: false });
        assert_eq!(n.probe_count(), 2);
    }

    #[test]
    fn test_nothing_loads() {
        let missing = Arc::new(ToyBackend {
            loadable: false,
            ..ToyBackend::new("missing")
        });

        let n = negotiator(vec![missing]);
        assert!(matches!(
            n.active(),
            Err(CryptError::NoBackendAvailable { handler: "toy", .. })
        ));
        assert!(matches!(
            n.active(),
            Err(CryptError::NoBackendAvailable { handler: "toy", .. })
        ));
        assert_eq!(n.probe_count(), 0);

        let empty = negotiator(vec![]);
        assert!(matches!(
            empty.active(),
            Err(CryptError::NoBackendAvailable { .. })
        ));
    }

    #[test]
    fn test_security_defect_is_fatal() {
        let insecure = Arc::new(ToyBackend {
            insecure: true,
            ..ToyBackend::new("insecure")
        });
        let full = Arc::new(ToyBackend::new("full"));

        let n = negotiator(vec![insecure, full]);
        assert!(matches!(
            n.active(),
            Err(CryptError::BackendSecurityDefect {
                backend: "insecure",
                ..
            })
        ));

        match n.active() {
            Err(CryptError::NoBackendAvailable { handler, reason }) => {
                assert_eq!(handler, "toy");
                assert!(reason.contains("security defect"));
            }
            other => panic!("expected NoBackendAvailable, got {:?}", other.map(|a| a.name())),
        }

        assert_eq!(n.probe_count(), 1);
    }

    #[test]
    fn test_explicit_selection() {
        let limited = Arc::new(ToyBackend {
            supports_v2: false,
            ..ToyBackend::new("limited")
        });
        let insecure = Arc::new(ToyBackend {
            insecure: true,
            ..ToyBackend::new("insecure")
        });
        let full = Arc::new(ToyBackend::new("full"));

        let n = negotiator(vec![limited, insecure, full]);
        assert_eq!(n.active().unwrap().name(), "limited");

        let switched = n.select(Some("full")).unwrap();
        assert_eq!(switched.name(), "full");
        assert_eq!(n.active().unwrap().capabilities(), &ToyCaps { lacks_v2: false });

        assert!(n.select(Some("nonexistent")).is_err());
        assert!(n.select(Some("insecure")).is_err());
        assert_eq!(n.active().unwrap().name(), "full");

        assert!(n.has_backend("full"));
        assert!(n.has_backend("limited"));
        assert!(!n.has_backend("insecure"));
        assert_eq!(n.active_name(), Some("full"));

        assert_eq!(n.select(None).unwrap().name(), "limited");
    }

    #[test]
    fn test_backend_failure_during_probe_is_contract_violation() {
        let full = ToyBackend::new("full");
        let prober = Prober {
            backend: &full,
            lock: None,
        };

        assert!(matches!(
            prober.probe(b"x", "$garbage$", "whatever"),
            Err(CryptError::BackendContractViolation { backend: "full", .. })
        ));
        assert_eq!(
            prober.probe(b"x", "$v1$", "$v1$y").unwrap(),
            ProbeOutcome::NoMatch
        );
    }

    #[test]
    fn test_concurrent_first_use_probes_once() {
        let full = Arc::new(ToyBackend::new("full"));
        let n = negotiator(vec![full]);
        let barrier = Barrier::new(2);

        thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        n.active().map(|a| a.name())
                    })
                })
                .collect();

            for handle in handles {
                assert_eq!(handle.join().unwrap().unwrap(), "full");
            }
        });

        assert_eq!(n.probe_count(), 1);
    }

    #[test]
    fn test_serialized_backend_never_overlaps() {
        let unsafe_backend = Arc::new(ToyBackend {
            serialize: true,
            ..ToyBackend::new("unsafe")
        });
        let n = negotiator(vec![Arc::clone(&unsafe_backend)]);
        let active = n.active().unwrap();

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..5 {
                        assert_eq!(active.raw_compute(b"abc", "$v1$").unwrap(), "$v1$cba");
                    }
                });
            }
        });

        assert_eq!(unsafe_backend.overlaps.load(Ordering::SeqCst), 0);
        assert!(unsafe_backend.calls.load(Ordering::SeqCst) >= 20);
    }
}
