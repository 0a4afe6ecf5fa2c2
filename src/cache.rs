//! The cross-run fingerprint cache.
//!
//! One text record per node that has completed a successful build:
//!
//! ```text
//! <primary-product-path>
//!   <fingerprint> <source-path>
//! ```
//!
//! Continuation lines carry two leading spaces; anything else starts the
//! next record.  Loading is best-effort: a record that is malformed, that
//! names a product no recipe produces any more, or whose source-path list
//! no longer matches the node's declaration is discarded with a log line,
//! never an error.

use crate::canon::canon_path;
use crate::fingerprint::Fingerprint;
use crate::graph::NodeId;
use crate::make::Session;
use anyhow::Context;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Write records for every node reachable from `targets` through
/// source-producer edges (cyclic edges included, each node visited once)
/// that has a snapshot and whose action did not fail this session.
pub fn save(session: &Session, targets: &[NodeId], path: &Path) -> anyhow::Result<()> {
    let graph = &session.graph;
    let mut w = BufWriter::new(
        File::create(path).with_context(|| format!("create {}", path.display()))?,
    );
    let mut visited = vec![false; graph.node_count()];
    let mut stack: Vec<NodeId> = targets.to_vec();
    while let Some(id) = stack.pop() {
        if visited[id.index()] {
            continue;
        }
        visited[id.index()] = true;
        let node = graph.node(id);
        for source in node.sources() {
            if let Some(producer) = graph.file(source.file).producer {
                stack.push(producer);
            }
        }
        let Some(snapshot) = &node.snapshot else { continue };
        if session.node_failed(id) {
            // Leave no record so the next invocation retries this recipe.
            debug!("not caching failed recipe {}", graph.primary_product(id));
            continue;
        }
        writeln!(w, "{}", graph.primary_product(id))?;
        for (source, fingerprint) in node.sources().iter().zip(snapshot) {
            writeln!(w, "  {} {}", fingerprint.encode(), graph.path(source.file))?;
        }
    }
    w.flush()?;
    Ok(())
}

/// Seed node snapshots from a cache file written by an earlier session,
/// so the first `make` can short-circuit when content truly is unchanged.
/// A missing or unreadable cache is not an error.
pub fn load(session: &mut Session, path: &Path) -> anyhow::Result<()> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            warn!("ignoring unreadable cache {}: {}", path.display(), err);
            return Ok(());
        }
    };

    let mut record: Option<PendingRecord> = None;
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("  ") {
            match &mut record {
                Some(record) => record.source_line(rest),
                None => warn!("cache continuation line without a record: {:?}", line),
            }
        } else {
            install(session, record.take());
            record = Some(PendingRecord::new(line));
        }
    }
    install(session, record.take());
    Ok(())
}

/// A record being accumulated line by line during load.
struct PendingRecord {
    product: String,
    sources: Vec<(String, Fingerprint)>,
    valid: bool,
}

impl PendingRecord {
    fn new(product: &str) -> PendingRecord {
        PendingRecord {
            product: product.to_string(),
            sources: Vec::new(),
            valid: !product.is_empty(),
        }
    }

    fn source_line(&mut self, rest: &str) {
        let Some((encoded, path)) = rest.split_once(' ') else {
            self.valid = false;
            return;
        };
        match Fingerprint::decode(encoded) {
            Some(fp) if !path.is_empty() => self.sources.push((path.to_string(), fp)),
            _ => self.valid = false,
        }
    }
}

fn install(session: &mut Session, record: Option<PendingRecord>) {
    let Some(record) = record else { return };
    if !record.valid {
        warn!("discarding malformed cache record for {:?}", record.product);
        return;
    }
    let graph = &mut session.graph;
    let Some(node_id) = graph.producer_of(&record.product) else {
        debug!(
            "discarding cache record for unknown product {}",
            record.product
        );
        return;
    };
    let declared = graph.node(node_id).sources();
    let matches = declared.len() == record.sources.len()
        && declared
            .iter()
            .zip(&record.sources)
            .all(|(d, (cached, _))| graph.path(d.file) == canon_path(cached));
    if !matches {
        debug!(
            "discarding stale cache record for {} (source list changed)",
            record.product
        );
        return;
    }
    let fingerprints = record.sources.into_iter().map(|(_, fp)| fp).collect();
    graph.node_mut(node_id).snapshot = Some(fingerprints);
    debug!("seeded snapshot for {} from cache", record.product);
}
