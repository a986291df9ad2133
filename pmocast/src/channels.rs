use std::collections::BTreeSet;

use tracing::debug;

use crate::errors::{CastError, CastResult};

/// Namespaces the application registered on the current session.
///
/// Sending on a namespace that was never added fails with
/// `ChannelNotFound`; there is no implicit registration on first send.
#[derive(Debug, Default)]
pub struct ChannelManager {
    namespaces: BTreeSet<String>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the namespace was not registered yet.
    pub fn add(&mut self, namespace: &str) -> CastResult<bool> {
        let namespace = validate(namespace)?;
        let added = self.namespaces.insert(namespace.to_string());
        debug!(namespace, added, "Message channel registered");
        Ok(added)
    }

    pub fn remove(&mut self, namespace: &str) -> bool {
        self.namespaces.remove(namespace.trim())
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.namespaces.contains(namespace.trim())
    }

    pub fn ensure(&self, namespace: &str) -> CastResult<()> {
        if self.contains(namespace) {
            Ok(())
        } else {
            Err(CastError::ChannelNotFound(namespace.to_string()))
        }
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces.iter().cloned().collect()
    }

    /// Drops every registration, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.namespaces.len();
        self.namespaces.clear();
        count
    }
}

fn validate(namespace: &str) -> CastResult<&str> {
    let trimmed = namespace.trim();
    if trimmed.is_empty() {
        return Err(CastError::invalid_parameter("namespace must not be empty"));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "urn:x-cast:com.example.chat";

    #[test]
    fn add_is_idempotent() {
        let mut channels = ChannelManager::new();
        assert!(channels.add(NS).unwrap());
        assert!(!channels.add(NS).unwrap());
        assert_eq!(channels.namespaces(), vec![NS.to_string()]);
    }

    #[test]
    fn unknown_namespace_is_not_found() {
        let channels = ChannelManager::new();
        assert_eq!(
            channels.ensure(NS),
            Err(CastError::ChannelNotFound(NS.to_string()))
        );
    }

    #[test]
    fn empty_namespace_is_invalid() {
        let mut channels = ChannelManager::new();
        assert!(matches!(
            channels.add("  "),
            Err(CastError::InvalidParameter(_))
        ));
    }

    #[test]
    fn clear_and_remove() {
        let mut channels = ChannelManager::new();
        channels.add(NS).unwrap();
        channels.add("urn:x-cast:other").unwrap();
        assert!(channels.remove(NS));
        assert!(!channels.remove(NS));
        assert_eq!(channels.clear(), 1);
        assert!(!channels.contains("urn:x-cast:other"));
    }
}
