use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

// Single upstream credential picked for one request
#[derive(Clone)]
pub struct Credential {
    pub slot: usize, // 1-based configuration slot
    secret: String,
}

impl Credential {
    pub fn new(slot: usize, secret: impl Into<String>) -> Self {
        Self {
            slot,
            secret: secret.into(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    // Short non-reversible id, safe to log
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.secret.as_bytes());
        format!("{:x}", digest)[..8].to_string()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("slot", &self.slot)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Round-robin selection over the configured upstream credentials.
///
/// The pool is rebuilt from the slots on every call, so blank slots never
/// take a turn. The counter only advances when a credential is handed out.
pub struct KeyRotator {
    slots: Vec<Option<String>>,
    current: AtomicUsize,
}

impl KeyRotator {
    pub fn new(slots: Vec<Option<String>>) -> Self {
        let rotator = Self {
            slots,
            current: AtomicUsize::new(0),
        };

        let pool = rotator.pool();
        if pool.is_empty() {
            tracing::warn!("No upstream credentials configured, chat requests will get 503");
        } else {
            tracing::info!(credentials = pool.len(), "Key rotator initialized");
            for credential in &pool {
                tracing::info!(slot = credential.slot, key_id = %credential.fingerprint(), "Credential loaded");
            }
        }

        rotator
    }

    // Configured, non-blank credentials in slot order
    pub fn pool(&self) -> Vec<Credential> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                slot.as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| Credential::new(i + 1, s))
            })
            .collect()
    }

    // Get next credential (round-robin)
    pub fn next(&self) -> Option<Credential> {
        let mut pool = self.pool();
        if pool.is_empty() {
            return None;
        }

        // fetch_add wraps on overflow
        let idx = self.current.fetch_add(1, Ordering::Relaxed) % pool.len();
        Some(pool.swap_remove(idx))
    }

    pub fn position(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }
}
