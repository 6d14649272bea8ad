//! Single-flight gate around the wallet signature request
//!
//! Concurrent prompts against one wallet are unreliable and confusing, so
//! the signing capability is an exclusively owned resource. The gate is an
//! owned lock: a permit is acquired before a signature request and released
//! by drop on every exit path, never by a flag.

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone)]
pub struct SigningGate {
    inner: Arc<Mutex<()>>,
}

/// Exclusive right to prompt the wallet; releases on drop
pub struct SigningPermit {
    _guard: OwnedMutexGuard<()>,
}

impl SigningGate {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(())),
        }
    }

    /// Acquire the permit if no signature request is in flight
    pub fn try_acquire(&self) -> Option<SigningPermit> {
        self.inner
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| SigningPermit { _guard: guard })
    }

    /// Whether a signature request is currently in flight
    pub fn is_busy(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

impl Default for SigningGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquisition_fails_while_held() {
        let gate = SigningGate::new();
        let permit = gate.try_acquire().expect("gate starts free");
        assert!(gate.try_acquire().is_none());
        assert!(gate.is_busy());
        drop(permit);
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn permit_releases_on_every_exit_path() {
        let gate = SigningGate::new();

        // Success path
        {
            let _permit = gate.try_acquire().unwrap();
        }
        assert!(!gate.is_busy());

        // Error path
        let result: Result<(), ()> = (|| {
            let _permit = gate.try_acquire().unwrap();
            Err(())
        })();
        assert!(result.is_err());
        assert!(!gate.is_busy());
    }
}
