//! Builds the graph from a parsed manifest.

use crate::graph::{Action, Command, Graph};
use crate::parse::{self, Manifest};
use anyhow::{anyhow, bail, Context};

#[derive(Debug)]
pub struct Loaded {
    pub graph: Graph,
    /// Product paths named by `default` statements, in order.
    pub defaults: Vec<String>,
}

/// Read and parse a manifest file, then construct its graph.
pub fn read(path: &str) -> anyhow::Result<Loaded> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path))?;
    let manifest = parse::parse(&text).map_err(|err| anyhow!("{}: {}", path, err))?;
    from_manifest(manifest)
}

pub fn from_manifest(manifest: Manifest) -> anyhow::Result<Loaded> {
    let mut graph = Graph::new();
    for path in &manifest.leaves {
        graph
            .add_leaf(path)
            .with_context(|| format!("leaf {}", path))?;
    }
    for stanza in manifest.stanzas {
        let Some(argv) = stanza.command else {
            bail!("stanza at line {} has no run or pipe command", stanza.line);
        };
        let mut command = if stanza.pipe {
            Command::pipe(argv)
        } else {
            Command::shell(argv)
        };
        command.env = stanza.env;
        let products: Vec<&str> = stanza.products.iter().map(String::as_str).collect();
        let node = graph
            .add_node(Action::Command(command), &products)
            .with_context(|| format!("stanza at line {}", stanza.line))?;
        for (source, track) in &stanza.sources {
            graph.add_source(node, source, *track);
        }
        if stanza.bootstrap {
            graph.set_bootstrap(node, true);
        }
    }
    Ok(Loaded {
        graph,
        defaults: manifest.defaults,
    })
}
