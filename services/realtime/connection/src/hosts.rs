//! Realtime host selection with fallback rotation.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;
use tracing::{info, warn};

/// Chooses the host for each connection attempt
#[derive(Debug, Clone)]
pub struct HostSelector {
    primary: String,
    fallbacks: Vec<String>,
    used: HashSet<String>,
    current: String,
}

impl HostSelector {
    /// Create a selector; fallbacks are shuffled once here
    pub fn new(primary: impl Into<String>, fallbacks: &[String], seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut fallbacks = fallbacks.to_vec();
        fallbacks.shuffle(&mut rng);

        let primary = primary.into();
        Self {
            current: primary.clone(),
            primary,
            fallbacks,
            used: HashSet::new(),
        }
    }

    /// Host for the current or next attempt
    pub fn current(&self) -> &str {
        &self.current
    }

    /// Fallback hosts in the order they will be tried
    pub fn fallbacks(&self) -> &[String] {
        &self.fallbacks
    }

    /// Pick the host for a new attempt, rotating when asked to
    pub fn select(&mut self, use_fallback: bool) -> &str {
        if use_fallback {
            self.used.insert(self.current.clone());
            let next = self
                .fallbacks
                .iter()
                .find(|host| !self.used.contains(*host))
                .cloned();
            match next {
                Some(host) => {
                    info!("Switching to fallback host {}", host);
                    self.current = host;
                }
                None => warn!("No unused fallback hosts left, staying on {}", self.current),
            }
        }
        &self.current
    }

    /// Connection established on the current host
    pub fn confirm(&mut self) {
        self.used.clear();
    }

    /// Go back to the primary host
    pub fn reset(&mut self) {
        self.used.clear();
        self.current = self.primary.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fallbacks() -> Vec<String> {
        ["a.example", "b.example", "c.example"]
            .iter()
            .map(|h| h.to_string())
            .collect()
    }

    #[test]
    fn test_seeded_shuffle_is_stable() {
        let one = HostSelector::new("primary", &fallbacks(), Some(7));
        let two = HostSelector::new("primary", &fallbacks(), Some(7));
        assert_eq!(one.fallbacks(), two.fallbacks());
        assert_eq!(one.fallbacks().len(), 3);
    }

    #[test]
    fn test_rotation_and_exhaustion() {
        let mut hosts = HostSelector::new("primary", &fallbacks(), Some(1));
        let order = hosts.fallbacks().to_vec();

        assert_eq!(hosts.select(false), "primary");
        assert_eq!(hosts.select(true), order[0]);
        assert_eq!(hosts.select(true), order[1]);
        assert_eq!(hosts.select(true), order[2]);
        // Exhausted: stay on the last one.
        assert_eq!(hosts.select(true), order[2]);
    }

    #[test]
    fn test_confirm_and_reset() {
        let mut hosts = HostSelector::new("primary", &fallbacks(), Some(1));
        let order = hosts.fallbacks().to_vec();

        hosts.select(true);
        hosts.confirm();
        // The host being left is always marked used.
        assert_eq!(hosts.select(true), order[1]);

        hosts.reset();
        assert_eq!(hosts.current(), "primary");
        assert_eq!(hosts.select(true), order[0]);
    }

    #[test]
    fn test_no_fallbacks() {
        let mut hosts = HostSelector::new("primary", &[], None);
        assert_eq!(hosts.select(true), "primary");
    }
}
