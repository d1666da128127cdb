//! Recursive reference resolution
//!
//! Walks a prompt's references depth first through the parser cache. The
//! ordered chain of identities on the current path is threaded through the
//! walk; a reference back into that chain becomes a recursive-reference
//! error instead of another descent.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::ParserCache;
use crate::errors::ResolutionError;
use crate::identity::ContentId;
use crate::kind::PromptKind;
use crate::parser::{HeaderMetadata, Reference};
use crate::provider::ParseOptions;

/// Default limit on reference nesting
pub const DEFAULT_MAX_DEPTH: usize = 16;

/// One node of a resolved reference tree
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedPrompt {
    pub identity: ContentId,
    pub kind: Option<PromptKind>,
    /// The reference that led here; `None` for the root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HeaderMetadata>,
    /// Whether this source settled cleanly
    pub settled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResolutionError>,
    /// References left unexplored because of the depth limit
    pub truncated: bool,
    pub children: Vec<ResolvedPrompt>,
}

impl ResolvedPrompt {
    fn failed(identity: ContentId, reference: Option<Reference>, error: ResolutionError) -> Self {
        Self {
            identity,
            kind: None,
            reference,
            metadata: None,
            settled: false,
            error: Some(error),
            truncated: false,
            children: Vec::new(),
        }
    }

    /// Every referenced identity below this node, depth first, without duplicates
    pub fn all_references(&self) -> Vec<ContentId> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.collect_references(&mut seen, &mut out);
        out
    }

    fn collect_references(&self, seen: &mut HashSet<ContentId>, out: &mut Vec<ContentId>) {
        for child in &self.children {
            if seen.insert(child.identity.clone()) {
                out.push(child.identity.clone());
            }
            child.collect_references(seen, out);
        }
    }

    /// Every error in the tree, depth first, without duplicates
    pub fn errors(&self) -> Vec<ResolutionError> {
        let mut out: Vec<ResolutionError> = Vec::new();
        self.collect_errors(&mut out);
        out
    }

    fn collect_errors(&self, out: &mut Vec<ResolutionError>) {
        if let Some(error) = &self.error
            && !out.iter().any(|e| e.equals(error))
        {
            out.push(error.clone());
        }
        for child in &self.children {
            child.collect_errors(out);
        }
    }

    /// First error in depth-first order
    pub fn top_error(&self) -> Option<ResolutionError> {
        if let Some(error) = &self.error {
            return Some(error.clone());
        }
        self.children.iter().find_map(ResolvedPrompt::top_error)
    }

    /// Number of nodes in the tree, this one included
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(ResolvedPrompt::node_count).sum::<usize>()
    }
}

/// Resolves reference trees through a shared [`ParserCache`]
pub struct ReferenceResolver {
    cache: Arc<ParserCache>,
    options: ParseOptions,
    max_depth: usize,
}

impl ReferenceResolver {
    pub fn new(cache: Arc<ParserCache>, options: ParseOptions) -> Self {
        Self {
            cache,
            options,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Resolve `identity` and everything it references
    pub async fn resolve(&self, identity: &ContentId) -> ResolvedPrompt {
        info!(%identity, max_depth = self.max_depth, "Resolving references");
        let tree = self.resolve_node(identity.clone(), None, Vec::new()).await;
        info!(
            %identity,
            nodes = tree.node_count(),
            errors = tree.errors().len(),
            "References resolved"
        );
        tree
    }

    fn resolve_node(
        &self,
        identity: ContentId,
        reference: Option<Reference>,
        mut chain: Vec<ContentId>,
    ) -> BoxFuture<'_, ResolvedPrompt> {
        Box::pin(async move {
            debug!(%identity, depth = chain.len(), "ReferenceResolver::resolve_node: called");
            chain.push(identity.clone());

            let parser = self.cache.get_parser(&identity, &self.options);
            let settled = parser.settled().await;
            let mut node = ResolvedPrompt {
                identity,
                kind: parser.kind(),
                reference,
                metadata: parser.header().map(|h| h.metadata().clone()),
                settled,
                error: parser.error_condition(),
                truncated: false,
                children: Vec::new(),
            };
            if node.error.is_some() {
                return node;
            }

            let references = parser.references();
            if chain.len() > self.max_depth {
                node.truncated = !references.is_empty();
                return node;
            }

            for reference in references {
                let target = reference.identity.clone();
                if chain.contains(&target) {
                    let mut cycle = chain.clone();
                    cycle.push(target.clone());
                    debug!(%target, "ReferenceResolver::resolve_node: recursion detected");
                    let error = ResolutionError::recursive_reference(target.clone(), cycle);
                    node.children
                        .push(ResolvedPrompt::failed(target, Some(reference), error));
                    continue;
                }
                let child = self.resolve_node(target, Some(reference), chain.clone()).await;
                node.children.push(child);
            }
            node
        })
    }
}
