//! The recursive make algorithm: depth-first dependency making, cycle
//! pruning, and the bounded fixed-point loop that reruns a recipe until
//! its sources stop changing.
//!
//! Cyclic source declarations are expected here, not an error: a
//! bibliography step depends on a file the main compiler both reads and
//! rewrites.  A producer found mid-make is skipped for the current
//! attempt and revisited on the next one; the loop converges when a
//! node's source fingerprints match the snapshot taken before its last
//! action, and gives up after a bounded number of attempts.

use crate::fingerprint::Fingerprint;
use crate::graph::{Action, Diagnostic, Discovered, Graph, NodeId, Source, Track};
use crate::process;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// Retry bound for the fixed-point search.
pub const DEFAULT_PATIENCE: usize = 5;

/// What a successful `make` did.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Outcome {
    /// Everything was already up to date.
    Unchanged,
    /// At least one action ran somewhere below the target.
    Changed,
}

/// Structured failure from `make`: the root failing node, a message, and
/// the diagnostic records collected from its recipe.  The failing node is
/// preserved across propagation so the top-level caller reports the true
/// root cause rather than a cascade.
#[derive(Debug)]
pub struct MakeError {
    pub node: NodeId,
    /// Primary product path of the failing node.
    pub primary: String,
    pub message: String,
    pub diagnostics: Vec<Diagnostic>,
}

impl fmt::Display for MakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "while making {}: {}", self.primary, self.message)
    }
}

impl std::error::Error for MakeError {}

/// One build session: the graph plus the transient make state.  Exactly
/// one `make` call tree may be active at a time; the in-progress set is
/// scoped to the session, not shared between sessions.
pub struct Session {
    pub graph: Graph,
    patience: usize,
    in_progress: Vec<bool>,
    failed: Vec<bool>,
    actions_run: usize,
}

impl Session {
    pub fn new(graph: Graph) -> Session {
        Session::with_patience(graph, DEFAULT_PATIENCE)
    }

    pub fn with_patience(graph: Graph, patience: usize) -> Session {
        Session {
            graph,
            patience,
            in_progress: Vec::new(),
            failed: Vec::new(),
            actions_run: 0,
        }
    }

    /// Number of build actions executed so far in this session.
    pub fn actions_run(&self) -> usize {
        self.actions_run
    }

    /// Did this node's own action fail the last time it was made?
    pub(crate) fn node_failed(&self, id: NodeId) -> bool {
        self.failed.get(id.index()).copied().unwrap_or(false)
    }

    fn grow_state(&mut self) {
        let n = self.graph.node_count();
        if self.in_progress.len() < n {
            self.in_progress.resize(n, false);
            self.failed.resize(n, false);
        }
    }

    /// Recursively bring `target` up to date.  With `force`, actions run
    /// at least once even if fingerprints match; force propagates into
    /// dependency makes and is dropped after a node's first execution.
    pub fn make(&mut self, target: NodeId, force: bool) -> Result<Outcome, MakeError> {
        self.grow_state();
        // A node already being made on this call stack is a true cycle in
        // the caller, not a recoverable condition.
        assert!(
            !self.in_progress[target.index()],
            "make() re-entered for {}",
            self.graph.primary_product(target)
        );
        self.in_progress[target.index()] = true;
        let result = self.make_node(target, force);
        self.in_progress[target.index()] = false;
        match &result {
            Ok(_) => self.failed[target.index()] = false,
            Err(err) if err.node == target => self.failed[target.index()] = true,
            Err(_) => {}
        }
        result
    }

    fn make_node(&mut self, id: NodeId, mut force: bool) -> Result<Outcome, MakeError> {
        if let Action::Leaf = self.graph.node(id).action() {
            return self.make_leaf(id);
        }

        debug!(
            "making {} from {}",
            self.graph.primary_product(id),
            self.source_names(id)
        );

        let mut outcome = Outcome::Unchanged;
        let mut attempts_pruned = 0;

        for attempt in 0..self.patience {
            // Make our sources first.
            let sources: Vec<Source> = self.graph.node(id).sources().to_vec();
            let mut pruned_cycle = false;
            for source in &sources {
                let Some(producer) = self.graph.file(source.file).producer else {
                    continue;
                };
                if self.in_progress[producer.index()] {
                    // Cyclic declaration, an artifact of multi-pass tools.
                    // Skip for this attempt and assume unchanged for now;
                    // the next attempt will see the settled contents.
                    debug!(
                        "while making {}: cyclic dependency on {} (pruned)",
                        self.graph.primary_product(id),
                        self.graph.path(source.file)
                    );
                    pruned_cycle = true;
                    continue;
                }
                if let Outcome::Changed = self.make(producer, force)? {
                    outcome = Outcome::Changed;
                }
            }
            if pruned_cycle {
                attempts_pruned += 1;
            }

            // Fingerprint every source as it stands right now.
            let fingerprints = self.fingerprint_sources(id, &sources)?;
            let first_build = self.graph.node(id).snapshot.is_none();

            // A missing source means there is nothing sensible to build
            // from -- unless this recipe bootstraps its own inputs on the
            // very first pass.
            if let Some(pos) = fingerprints.iter().position(|fp| fp.missing()) {
                if !(attempt == 0 && first_build && self.graph.node(id).bootstrap) {
                    debug!(
                        "while making {}: {} does not exist, nothing to do",
                        self.graph.primary_product(id),
                        self.graph.path(sources[pos].file)
                    );
                    return Ok(outcome);
                }
            }

            let up_to_date = !force
                && !first_build
                && self.graph.node(id).snapshot.as_deref() == Some(fingerprints.as_slice())
                && !self.products_missing(id);
            if up_to_date {
                debug!("no reason to remake {}", self.graph.primary_product(id));
                return Ok(outcome);
            }

            // Run the action.  The snapshot records the sources exactly as
            // read before the action, and is only committed on success.
            self.actions_run += 1;
            let discovered = self.run_action(id)?;
            self.graph.node_mut(id).snapshot = Some(fingerprints);
            for (path, track) in discovered.sources {
                self.graph.add_source(id, &path, track);
            }
            outcome = Outcome::Changed;
            force = false;
        }

        // The fixed point never arrived.  Distinguish a recipe whose
        // dependency cycle was pruned on every attempt from one whose
        // contents kept changing.
        let primary = self.graph.primary_product(id).to_string();
        let message = if attempts_pruned == self.patience {
            format!(
                "gave up after {} attempts with a dependency cycle still unresolved",
                self.patience
            )
        } else {
            format!("contents do not settle after {} attempts", self.patience)
        };
        Err(MakeError {
            node: id,
            primary,
            message,
            diagnostics: self.action_diagnostics(id),
        })
    }

    /// A leaf cannot fabricate its file: existence is the condition.
    fn make_leaf(&mut self, id: NodeId) -> Result<Outcome, MakeError> {
        let path = self.graph.primary_product(id);
        if Path::new(path).exists() {
            Ok(Outcome::Unchanged)
        } else {
            Err(MakeError {
                node: id,
                primary: path.to_string(),
                message: "required input file does not exist".to_string(),
                diagnostics: Vec::new(),
            })
        }
    }

    fn fingerprint_sources(
        &self,
        id: NodeId,
        sources: &[Source],
    ) -> Result<Vec<Fingerprint>, MakeError> {
        let mut fingerprints = Vec::with_capacity(sources.len());
        for source in sources {
            let path = self.graph.path(source.file);
            let fp = match source.track {
                Track::Contents => Fingerprint::of_contents(path).map_err(|err| MakeError {
                    node: id,
                    primary: self.graph.primary_product(id).to_string(),
                    message: format!("reading {}: {}", path, err),
                    diagnostics: Vec::new(),
                })?,
                Track::Presence => Fingerprint::of_presence(path),
            };
            fingerprints.push(fp);
        }
        Ok(fingerprints)
    }

    fn products_missing(&self, id: NodeId) -> bool {
        self.graph
            .node(id)
            .products()
            .iter()
            .any(|&f| !Path::new(self.graph.path(f)).exists())
    }

    fn run_action(&mut self, id: NodeId) -> Result<Discovered, MakeError> {
        let primary = self.graph.primary_product(id).to_string();
        match &mut self.graph.node_mut(id).action {
            Action::Leaf => unreachable!("leaves run no action"),
            Action::Command(command) => {
                info!("running: {}", command.argv.join(" "));
                let capture = command.capture_stdout.then(|| primary.clone());
                match process::run_command(command, capture.as_deref()) {
                    Ok(()) => Ok(Discovered::default()),
                    Err(err) => Err(MakeError {
                        node: id,
                        primary,
                        message: format!("execution of {} failed: {:#}", command.program(), err),
                        diagnostics: Vec::new(),
                    }),
                }
            }
            Action::Custom(recipe) => match recipe.run() {
                Ok(discovered) => Ok(discovered),
                Err(err) => {
                    let diagnostics = recipe.diagnostics();
                    Err(MakeError {
                        node: id,
                        primary,
                        message: format!("{:#}", err),
                        diagnostics,
                    })
                }
            },
        }
    }

    fn action_diagnostics(&self, id: NodeId) -> Vec<Diagnostic> {
        match self.graph.node(id).action() {
            Action::Custom(recipe) => recipe.diagnostics(),
            _ => Vec::new(),
        }
    }

    fn source_names(&self, id: NodeId) -> String {
        self.graph
            .node(id)
            .sources()
            .iter()
            .map(|s| self.graph.path(s.file))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Remove this node's products from disk if present.  Does not
    /// recurse; cleaning a whole pipeline is the driver's job, node by
    /// node.  Leaves are inputs and are never removed.
    pub fn clean(&self, id: NodeId) {
        if let Action::Leaf = self.graph.node(id).action() {
            return;
        }
        for &fid in self.graph.node(id).products() {
            let path = self.graph.path(fid);
            if Path::new(path).exists() {
                info!("removing {}", path);
                if let Err(err) = std::fs::remove_file(path) {
                    warn!("removing {}: {}", path, err);
                }
            }
        }
    }
}
