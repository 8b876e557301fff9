// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Canonicalization of node identities.
//!
//! Agents resend their node descriptor whenever they like, and proxies forward descriptors of
//! other processes. The registry makes sure every structurally-equal descriptor resolves to one
//! stored `Arc<NodeIdentity>`, so batches and sinks can group by that instance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::errors::InterceptorError;
use crate::node::{NodeIdentity, NodeKey};

/// A registered node: its canonical key and the stored instance.
#[derive(Debug, Clone)]
pub struct CanonicalNode {
    pub key: NodeKey,
    pub node: Arc<NodeIdentity>,
}

#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: Mutex<HashMap<NodeKey, Arc<NodeIdentity>>>,
}

impl NodeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored instance for `candidate`, registering it first if no
    /// structurally-equal node is known yet.
    pub fn canonicalize(&self, candidate: NodeIdentity) -> Result<CanonicalNode, InterceptorError> {
        let key = candidate
            .canonical_key()
            .map_err(InterceptorError::NodeEncoding)?;

        #[allow(clippy::expect_used)]
        let mut nodes = self.nodes.lock().expect("lock poisoned");
        let node = nodes
            .entry(key.clone())
            .or_insert_with(|| {
                debug!("Registered new node {candidate}");
                Arc::new(candidate)
            })
            .clone();

        Ok(CanonicalNode { key, node })
    }

    /// Returns the instance stored under `node.key`, putting `node.node` back if the key was
    /// evicted since `node` was resolved.
    pub fn reinstate(&self, node: &CanonicalNode) -> Arc<NodeIdentity> {
        #[allow(clippy::expect_used)]
        let mut nodes = self.nodes.lock().expect("lock poisoned");
        Arc::clone(
            nodes
                .entry(node.key.clone())
                .or_insert_with(|| Arc::clone(&node.node)),
        )
    }

    #[must_use]
    pub fn get(&self, key: &NodeKey) -> Option<Arc<NodeIdentity>> {
        #[allow(clippy::expect_used)]
        let nodes = self.nodes.lock().expect("lock poisoned");
        nodes.get(key).cloned()
    }

    /// Forgets a node. A later descriptor with the same content registers a fresh instance.
    pub fn evict(&self, key: &NodeKey) -> Option<Arc<NodeIdentity>> {
        #[allow(clippy::expect_used)]
        let mut nodes = self.nodes.lock().expect("lock poisoned");
        nodes.remove(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        let nodes = self.nodes.lock().expect("lock poisoned");
        nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
