//! The build graph: files, the recipe nodes that produce them, and the
//! session-scoped registry tying canonical paths to both.

use crate::canon::canon_path;
use crate::fingerprint::Fingerprint;
use anyhow::bail;
use rustc_hash::FxHashMap;
use std::fmt;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct FileId(usize);
impl FileId {
    pub(crate) fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct NodeId(usize);
impl NodeId {
    pub(crate) fn index(&self) -> usize {
        self.0
    }
}

/// One registered path.  `producer` is the node whose products include the
/// path, or None when the path is a plain leaf reference.
#[derive(Debug)]
pub struct File {
    pub name: String,
    pub producer: Option<NodeId>,
}

/// How changes to a source are detected.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Track {
    /// Only appearance or disappearance of the file counts as a change.
    Presence,
    /// The file contents are digested and compared.
    Contents,
}

/// A source declaration on a node.
#[derive(Debug, Copy, Clone)]
pub struct Source {
    pub file: FileId,
    pub track: Track,
}

/// A diagnostic record attached to a failing recipe.  The engine only
/// aggregates and forwards these; it never interprets them.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub message: String,
    pub file: Option<String>,
    pub line: Option<usize>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{}:{}: {}", file, line, self.message),
            (Some(file), None) => write!(f, "{}: {}", file, self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

/// Sources a recipe reported while running, to be folded into its node
/// before the next attempt of the fixed-point loop.  This is how TeX-like
/// tools grow their dependency list after a pass.
#[derive(Debug, Default)]
pub struct Discovered {
    pub sources: Vec<(String, Track)>,
}

/// Capability interface for collaborator-supplied build actions.
pub trait Recipe {
    /// Rebuild this node's products.
    fn run(&mut self) -> anyhow::Result<Discovered>;

    /// Structured records describing the most recent failure.
    fn diagnostics(&self) -> Vec<Diagnostic> {
        Vec::new()
    }
}

/// External command invocation: argv plus additive environment overrides.
#[derive(Debug, Clone)]
pub struct Command {
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Pipe variant: stdout is captured into the primary product.
    pub capture_stdout: bool,
}

impl Command {
    /// A command trusted to write its declared products itself.
    pub fn shell(argv: Vec<String>) -> Command {
        Command {
            argv,
            env: Vec::new(),
            capture_stdout: false,
        }
    }

    /// A command whose stdout becomes the primary product.
    pub fn pipe(argv: Vec<String>) -> Command {
        Command {
            argv,
            env: Vec::new(),
            capture_stdout: true,
        }
    }

    pub fn env(mut self, key: &str, value: &str) -> Command {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }
}

/// What a node does when it must rebuild.
pub enum Action {
    /// No action: the file must already exist on disk.
    Leaf,
    /// Spawn an external command.
    Command(Command),
    /// A collaborator-supplied recipe.
    Custom(Box<dyn Recipe>),
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Leaf => write!(f, "Leaf"),
            Action::Command(c) => f.debug_tuple("Command").field(c).finish(),
            Action::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// A build-graph vertex: products, ordered sources, and the fingerprints
/// of those sources as of the last successful build.
#[derive(Debug)]
pub struct Node {
    pub(crate) products: Vec<FileId>,
    pub(crate) sources: Vec<Source>,
    /// Source fingerprints as of the last successful build, positionally
    /// aligned with `sources`; None if never successfully built.
    pub snapshot: Option<Vec<Fingerprint>>,
    /// Allow the very first build attempt to run even when sources are
    /// missing, for recipes that generate their own inputs on the first
    /// pass (a TeX compiler and its .aux file, for example).
    pub bootstrap: bool,
    pub(crate) action: Action,
}

impl Node {
    pub fn products(&self) -> &[FileId] {
        &self.products
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// The first-declared product, the node's identity for diagnostics
    /// and cache keys.
    pub fn primary(&self) -> FileId {
        self.products[0]
    }

    pub fn action(&self) -> &Action {
        &self.action
    }
}

/// The dependency graph and path registry for one build session.
/// No ambient global state: two sessions never share nodes.
#[derive(Debug, Default)]
pub struct Graph {
    files: Vec<File>,
    nodes: Vec<Node>,
    by_path: FxHashMap<String, FileId>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    /// Look up or create the registry entry for a path.  At most one entry
    /// exists per canonical path, so recipes naming the same dependency
    /// share it.
    pub fn file_id(&mut self, path: &str) -> FileId {
        let canon = canon_path(path);
        match self.by_path.get(&canon) {
            Some(&id) => id,
            None => {
                let id = FileId(self.files.len());
                self.files.push(File {
                    name: canon.clone(),
                    producer: None,
                });
                self.by_path.insert(canon, id);
                id
            }
        }
    }

    /// Look up a path without registering it.
    pub fn lookup(&self, path: &str) -> Option<FileId> {
        self.by_path.get(&canon_path(path)).copied()
    }

    pub fn file(&self, id: FileId) -> &File {
        &self.files[id.index()]
    }

    pub fn path(&self, id: FileId) -> &str {
        &self.files[id.index()].name
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// The node producing a path, if any recipe declared it as a product.
    pub fn producer_of(&self, path: &str) -> Option<NodeId> {
        self.lookup(path).and_then(|id| self.file(id).producer)
    }

    pub fn primary_product(&self, id: NodeId) -> &str {
        self.path(self.node(id).primary())
    }

    /// Register a node producing `products`.  The first entry is the
    /// primary product; a path may have at most one producer.
    pub fn add_node(&mut self, action: Action, products: &[&str]) -> anyhow::Result<NodeId> {
        if products.is_empty() {
            bail!("a recipe needs at least one product");
        }
        let id = NodeId(self.nodes.len());
        let mut ids = Vec::with_capacity(products.len());
        for name in products {
            let fid = self.file_id(name);
            if ids.contains(&fid) {
                bail!("duplicate product {}", self.path(fid));
            }
            if let Some(other) = self.files[fid.index()].producer {
                bail!(
                    "{} is already produced by the recipe for {}",
                    self.path(fid),
                    self.primary_product(other)
                );
            }
            ids.push(fid);
        }
        for &fid in &ids {
            self.files[fid.index()].producer = Some(id);
        }
        self.nodes.push(Node {
            products: ids,
            sources: Vec::new(),
            snapshot: None,
            bootstrap: false,
            action,
        });
        Ok(id)
    }

    /// A node with no sources whose only requirement is that its file
    /// already exists on disk.
    pub fn add_leaf(&mut self, path: &str) -> anyhow::Result<NodeId> {
        self.add_node(Action::Leaf, &[path])
    }

    /// Declare a source.  Declaring the same path twice is a no-op (the
    /// same file may be mentioned many times in one document); a second
    /// declaration may upgrade presence tracking to content tracking but
    /// never downgrades it.
    pub fn add_source(&mut self, node: NodeId, path: &str, track: Track) {
        let fid = self.file_id(path);
        let n = &mut self.nodes[node.index()];
        if let Some(existing) = n.sources.iter_mut().find(|s| s.file == fid) {
            if track == Track::Contents {
                existing.track = track;
            }
            return;
        }
        n.sources.push(Source { file: fid, track });
        if let Some(snapshot) = &mut n.snapshot {
            // Keep the snapshot positionally aligned.  The new source
            // reads as absent-at-last-build, so its appearance triggers
            // a rebuild.
            snapshot.push(Fingerprint::NoSuchFile);
        }
    }

    pub fn remove_source(&mut self, node: NodeId, path: &str) {
        let Some(fid) = self.lookup(path) else { return };
        let n = &mut self.nodes[node.index()];
        if let Some(pos) = n.sources.iter().position(|s| s.file == fid) {
            n.sources.remove(pos);
            if let Some(snapshot) = &mut n.snapshot {
                if pos < snapshot.len() {
                    snapshot.remove(pos);
                }
            }
        }
    }

    pub fn set_bootstrap(&mut self, node: NodeId, on: bool) {
        self.nodes[node.index()].bootstrap = on;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_identity_stable() {
        let mut graph = Graph::new();
        let a = graph.file_id("chapter/../main.tex");
        let b = graph.file_id("main.tex");
        let c = graph.file_id("./main.tex");
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(graph.lookup("main.tex"), Some(a));
        assert_eq!(graph.lookup("other.tex"), None);
    }

    #[test]
    fn one_producer_per_product() {
        let mut graph = Graph::new();
        graph
            .add_node(Action::Command(Command::shell(vec!["true".into()])), &["out.pdf"])
            .unwrap();
        let err = graph
            .add_node(Action::Command(Command::shell(vec!["true".into()])), &["./out.pdf"])
            .unwrap_err();
        assert!(err.to_string().contains("already produced"));
    }

    #[test]
    fn products_must_not_be_empty() {
        let mut graph = Graph::new();
        assert!(graph.add_node(Action::Leaf, &[]).is_err());
        assert!(graph
            .add_node(Action::Leaf, &["x", "x"])
            .unwrap_err()
            .to_string()
            .contains("duplicate product"));
    }

    #[test]
    fn add_source_dedupes_and_upgrades() {
        let mut graph = Graph::new();
        let node = graph
            .add_node(Action::Command(Command::shell(vec!["true".into()])), &["out"])
            .unwrap();
        graph.add_source(node, "in.tex", Track::Presence);
        graph.add_source(node, "./in.tex", Track::Contents);
        graph.add_source(node, "in.tex", Track::Presence);
        let sources = graph.node(node).sources();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].track, Track::Contents);
    }

    #[test]
    fn snapshot_stays_aligned_with_sources() {
        let mut graph = Graph::new();
        let node = graph
            .add_node(Action::Command(Command::shell(vec!["true".into()])), &["out"])
            .unwrap();
        graph.add_source(node, "a", Track::Contents);
        graph.node_mut(node).snapshot = Some(vec![Fingerprint::Present]);

        graph.add_source(node, "b", Track::Contents);
        assert_eq!(
            graph.node(node).snapshot.as_deref(),
            Some(&[Fingerprint::Present, Fingerprint::NoSuchFile][..])
        );

        graph.remove_source(node, "a");
        assert_eq!(graph.node(node).sources().len(), 1);
        assert_eq!(
            graph.node(node).snapshot.as_deref(),
            Some(&[Fingerprint::NoSuchFile][..])
        );
    }

    #[test]
    fn leaf_is_its_own_producer() {
        let mut graph = Graph::new();
        let leaf = graph.add_leaf("main.tex").unwrap();
        assert_eq!(graph.producer_of("main.tex"), Some(leaf));
        assert_eq!(graph.primary_product(leaf), "main.tex");
    }
}
