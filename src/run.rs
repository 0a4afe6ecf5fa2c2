//! Command-line driver: loads a manifest, makes the requested targets,
//! and persists the fingerprint cache between invocations.

use crate::cache;
use crate::graph::NodeId;
use crate::load;
use crate::make::{Outcome, Session};
use anyhow::{anyhow, bail};
use std::path::Path;

const DEFAULT_MANIFEST: &str = "build.settle";
const DEFAULT_CACHE: &str = ".settle.cache";

#[derive(argh::FromArgs)]
/// incremental builder for multi-pass document pipelines
struct Args {
    /// manifest file [default=build.settle]
    #[argh(option, short = 'f', default = "DEFAULT_MANIFEST.to_string()")]
    file: String,

    /// chdir before running
    #[argh(option, short = 'C')]
    chdir: Option<String>,

    /// fingerprint cache file [default=.settle.cache]
    #[argh(option, default = "DEFAULT_CACHE.to_string()")]
    cache: String,

    /// run build actions even if targets look up to date
    #[argh(switch)]
    force: bool,

    /// remove produced files instead of building
    #[argh(switch)]
    clean: bool,

    /// targets to make (product paths) [default: manifest `default` entries]
    #[argh(positional)]
    targets: Vec<String>,
}

pub fn run() -> anyhow::Result<i32> {
    let args: Args = argh::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(dir) = &args.chdir {
        std::env::set_current_dir(dir).map_err(|err| anyhow!("chdir {}: {}", dir, err))?;
    }

    let load::Loaded { graph, defaults } = load::read(&args.file)?;
    let mut session = Session::new(graph);

    if args.clean {
        for id in session.graph.node_ids() {
            session.clean(id);
        }
        return Ok(0);
    }

    let names = if args.targets.is_empty() {
        defaults
    } else {
        args.targets.clone()
    };
    if names.is_empty() {
        bail!("no target specified and no default in {}", args.file);
    }
    let mut targets: Vec<NodeId> = Vec::new();
    for name in &names {
        let id = session
            .graph
            .producer_of(name)
            .ok_or_else(|| anyhow!("no recipe produces {}", name))?;
        targets.push(id);
    }

    let cache_path = Path::new(&args.cache);
    cache::load(&mut session, cache_path)?;

    let mut changed = false;
    for &target in &targets {
        match session.make(target, args.force) {
            Ok(Outcome::Changed) => changed = true,
            Ok(Outcome::Unchanged) => {}
            Err(err) => {
                eprintln!("settle: error: {}", err);
                for diagnostic in &err.diagnostics {
                    eprintln!("settle: {}", diagnostic);
                }
                // The failed node has no cache record, so the next
                // invocation retries it.
                cache::save(&session, &targets, cache_path)?;
                return Ok(1);
            }
        }
    }
    cache::save(&session, &targets, cache_path)?;

    if changed {
        println!("settle: ran {} actions, now up to date", session.actions_run());
    } else {
        println!("settle: no work to do");
    }
    Ok(0)
}
