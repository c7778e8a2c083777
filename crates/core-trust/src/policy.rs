use crate::anchor::AnchorStore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where server trust comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "kebab-case")]
pub enum TrustPolicy {
    /// Platform root store.
    SystemDefault,
    /// Exactly one CA read from a PEM file; platform roots are never consulted.
    PinnedAnchor(PathBuf),
    /// Every CA of a PEM bundle.
    PinnedSet(PathBuf),
}

impl TrustPolicy {
    pub fn store(&self) -> AnchorStore {
        match self {
            TrustPolicy::SystemDefault => AnchorStore::native(),
            TrustPolicy::PinnedAnchor(p) => AnchorStore::single(p.clone()),
            TrustPolicy::PinnedSet(p) => AnchorStore::bundle(p.clone()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TrustPolicy::SystemDefault => "system-default",
            TrustPolicy::PinnedAnchor(_) => "pinned-anchor",
            TrustPolicy::PinnedSet(_) => "pinned-set",
        }
    }
}

/// How client-presented chains are judged.
///
/// `NoClientAuth` accepts any chain without inspecting it. It is only sound
/// when the peer is the local service on loopback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientAuthPolicy {
    #[default]
    NoClientAuth,
    RequirePinned,
}
