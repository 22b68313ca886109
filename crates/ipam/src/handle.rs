//! Handle bookkeeping
//!
//! A [`Handle`] counts how many addresses one consumer holds in each block,
//! so release only has to visit the blocks listed here.

use crate::engine::Ipam;
use crate::error::{IpamError, StoreError};
use crate::store::IpamStore;
use crds::{IPAMHandle, IPAMHandleSpec};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Record name for a handle id.
///
/// Ids that already are valid DNS-1123 subdomains are used as-is; anything
/// else is sanitized and suffixed with a digest of the original id.
pub fn handle_name(handle_id: &str) -> String {
    if is_dns_subdomain(handle_id) {
        return handle_id.to_string();
    }

    let mut sanitized: String = handle_id
        .chars()
        .map(|c| match c.to_ascii_lowercase() {
            c @ ('a'..='z' | '0'..='9') => c,
            _ => '-',
        })
        .take(200)
        .collect();
    sanitized = sanitized.trim_matches('-').to_string();

    let digest = Sha256::digest(handle_id.as_bytes());
    let suffix: String = digest[..4].iter().map(|b| format!("{:02x}", b)).collect();
    if sanitized.is_empty() {
        format!("handle-{}", suffix)
    } else {
        format!("{}-{}", sanitized, suffix)
    }
}

fn is_dns_subdomain(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 253
        && s.split('.').all(|label| {
            !label.is_empty()
                && label.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        })
}

#[derive(Debug, Clone)]
pub struct Handle {
    resource: IPAMHandle,
}

impl Handle {
    /// Fresh, unsaved handle with no blocks
    pub fn new(handle_id: &str) -> Self {
        Self {
            resource: IPAMHandle::new(
                &handle_name(handle_id),
                IPAMHandleSpec {
                    handle_id: handle_id.to_string(),
                    blocks: BTreeMap::new(),
                },
            ),
        }
    }

    pub fn from_resource(resource: IPAMHandle) -> Self {
        Self { resource }
    }

    pub fn resource(&self) -> &IPAMHandle {
        &self.resource
    }

    pub fn handle_id(&self) -> &str {
        &self.resource.spec.handle_id
    }

    /// Per-block counts, ordered by block name
    pub fn blocks(&self) -> &BTreeMap<String, u32> {
        &self.resource.spec.blocks
    }

    pub fn count(&self, block: &str) -> u32 {
        self.blocks().get(block).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.blocks().values().map(|n| u64::from(*n)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.resource.spec.blocks.is_empty()
    }

    pub fn increment(&mut self, block: &str) {
        *self.resource.spec.blocks.entry(block.to_string()).or_insert(0) += 1;
    }

    /// Subtract `n` from the block's count, dropping the entry at zero.
    /// Returns how much was actually subtracted.
    pub fn decrement(&mut self, block: &str, n: u32) -> u32 {
        let blocks = &mut self.resource.spec.blocks;
        let Some(current) = blocks.get_mut(block) else {
            return 0;
        };
        let taken = n.min(*current);
        *current -= taken;
        if *current == 0 {
            blocks.remove(block);
        }
        taken
    }
}

impl<S: IpamStore> Ipam<S> {
    /// Count one more address for `handle_id` in `block`, creating the
    /// handle record on first use.
    pub(crate) async fn increment_handle(&self, handle_id: &str, block: &str) -> Result<(), IpamError> {
        let name = handle_name(handle_id);
        for attempt in 1..=self.config.max_retries {
            let result = match self.store.get_handle(&name).await {
                Ok(resource) => {
                    let mut handle = Handle::from_resource(resource);
                    handle.increment(block);
                    self.store.update_handle(handle.resource()).await.map(|_| ())
                }
                Err(StoreError::NotFound(_)) => {
                    let mut handle = Handle::new(handle_id);
                    handle.increment(block);
                    self.store.create_handle(handle.resource()).await.map(|_| ())
                }
                Err(e) => return Err(e.into()),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(StoreError::Conflict(_) | StoreError::AlreadyExists(_) | StoreError::NotFound(_)) => {
                    debug!("Handle {} changed while incrementing (attempt {}), retrying", handle_id, attempt);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(IpamError::MaxRetries(format!("incrementing handle {} for block {}", handle_id, block)))
    }

    /// Take `n` addresses off `handle_id`'s count for `block`, deleting the
    /// handle once it holds nothing.
    pub(crate) async fn decrement_handle(&self, handle_id: &str, block: &str, n: u32) -> Result<(), IpamError> {
        let name = handle_name(handle_id);
        for attempt in 1..=self.config.max_retries {
            let mut handle = match self.store.get_handle(&name).await {
                Ok(resource) => Handle::from_resource(resource),
                Err(StoreError::NotFound(_)) => {
                    warn!("Handle {} not found while releasing {} address(es) in block {}", handle_id, n, block);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            let taken = handle.decrement(block, n);
            if taken < n {
                warn!("Handle {} recorded {} address(es) in block {}, released {}", handle_id, taken, block, n);
            }
            let result = if handle.is_empty() {
                self.store.delete_handle(handle.resource()).await
            } else {
                self.store.update_handle(handle.resource()).await.map(|_| ())
            };

            match result {
                Ok(()) | Err(StoreError::NotFound(_)) => return Ok(()),
                Err(StoreError::Conflict(_)) => {
                    debug!("Handle {} changed while decrementing (attempt {}), retrying", handle_id, attempt);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(IpamError::MaxRetries(format!("decrementing handle {} for block {}", handle_id, block)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_handle_ids_are_kept() {
        assert_eq!(handle_name("pod-web-0"), "pod-web-0");
        assert_eq!(handle_name("kube-system.coredns"), "kube-system.coredns");
    }

    #[test]
    fn test_invalid_handle_ids_are_sanitized_and_distinct() {
        let a = handle_name("default/Web_0");
        let b = handle_name("default/web-0");
        assert!(a.starts_with("default-web-0-"));
        assert!(is_dns_subdomain(&a));
        assert_ne!(a, b);
        assert_eq!(a, handle_name("default/Web_0"));

        assert!(handle_name("///").starts_with("handle-"));
        assert!(handle_name(&"x/".repeat(300)).len() <= 253);
    }

    #[test]
    fn test_increment_and_decrement() {
        let mut h = Handle::new("pod-a");
        assert!(h.is_empty());

        h.increment("b1");
        h.increment("b1");
        h.increment("b2");
        assert_eq!(h.count("b1"), 2);
        assert_eq!(h.total(), 3);

        assert_eq!(h.decrement("b1", 1), 1);
        assert_eq!(h.count("b1"), 1);
        assert_eq!(h.decrement("b1", 5), 1);
        assert!(!h.blocks().contains_key("b1"));
        assert_eq!(h.decrement("missing", 1), 0);

        h.decrement("b2", 1);
        assert!(h.is_empty());
    }

    #[test]
    fn test_record_keeps_original_id() {
        let h = Handle::new("ns/pod");
        assert_eq!(h.handle_id(), "ns/pod");
        assert_ne!(h.resource().metadata.name.as_deref(), Some("ns/pod"));
    }
}
