//! Revocable local references for staged files.

use std::collections::HashSet;
use std::sync::Mutex;

use uuid::Uuid;

const SCHEME: &str = "blob:chatdeck/";

/// Issues and tracks ephemeral locators.
///
/// A locator only means something while it is live in the registry that
/// issued it.
#[derive(Debug, Default)]
pub struct LocatorRegistry {
    live: Mutex<HashSet<String>>,
}

impl LocatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh locator.
    pub fn create(&self) -> String {
        let locator = format!("{SCHEME}{}", Uuid::new_v4());
        self.lock().insert(locator.clone());
        locator
    }

    /// Release a locator. Returns false if it was not live.
    pub fn revoke(&self, locator: &str) -> bool {
        self.lock().remove(locator)
    }

    pub fn is_live(&self, locator: &str) -> bool {
        self.lock().contains(locator)
    }

    pub fn live_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        // The set stays consistent even if a holder panicked
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_revoke() {
        let registry = LocatorRegistry::new();
        let locator = registry.create();
        assert!(locator.starts_with(SCHEME));
        assert!(registry.is_live(&locator));

        assert!(registry.revoke(&locator));
        assert!(!registry.is_live(&locator));
        assert!(!registry.revoke(&locator));
        assert_eq!(registry.live_count(), 0);
    }
}
