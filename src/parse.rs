//! Parses the build manifest, a line-oriented description of recipes:
//!
//! ```text
//! # build the document, then extract its table of contents
//! leaf main.tex
//! make doc.pdf doc.aux : +main.tex +doc.aux
//!   bootstrap
//!   env TEXINPUTS=.:style
//!   run pdflatex -interaction=batchmode main.tex
//! make toc.txt : +doc.pdf
//!   pipe extract-toc doc.pdf
//! default doc.pdf
//! ```
//!
//! A `+` prefix marks a source as content-tracked; unprefixed sources are
//! tracked by presence only.  Tokens split on whitespace; there is no
//! quoting.

use crate::graph::Track;
use std::fmt;

#[derive(Debug)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

pub type ParseResult<T> = Result<T, ParseError>;

fn err<T>(line: usize, message: impl Into<String>) -> ParseResult<T> {
    Err(ParseError {
        line,
        message: message.into(),
    })
}

#[derive(Debug, Default)]
pub struct Manifest {
    pub stanzas: Vec<Stanza>,
    pub leaves: Vec<String>,
    /// Product paths named by `default` statements, in order.
    pub defaults: Vec<String>,
}

/// One `make` stanza: a recipe declaration.
#[derive(Debug)]
pub struct Stanza {
    pub line: usize,
    pub products: Vec<String>,
    pub sources: Vec<(String, Track)>,
    pub command: Option<Vec<String>>,
    /// Pipe variant: capture stdout into the primary product.
    pub pipe: bool,
    pub env: Vec<(String, String)>,
    pub bootstrap: bool,
}

pub fn parse(text: &str) -> ParseResult<Manifest> {
    let mut manifest = Manifest::default();
    let mut current: Option<Stanza> = None;
    for (idx, raw) in text.lines().enumerate() {
        let lineno = idx + 1;
        let indented = raw.starts_with(' ') || raw.starts_with('\t');
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if indented {
            match &mut current {
                Some(stanza) => body_line(stanza, line, lineno)?,
                None => return err(lineno, "indented line outside a make stanza"),
            }
            continue;
        }
        if let Some(done) = current.take() {
            manifest.stanzas.push(done);
        }
        let mut words = line.split_whitespace();
        match words.next() {
            Some("make") => current = Some(header(words, lineno)?),
            Some("leaf") => match (words.next(), words.next()) {
                (Some(path), None) => manifest.leaves.push(path.to_string()),
                _ => return err(lineno, "leaf takes exactly one path"),
            },
            Some("default") => match (words.next(), words.next()) {
                (Some(path), None) => manifest.defaults.push(path.to_string()),
                _ => return err(lineno, "default takes exactly one product path"),
            },
            Some(other) => return err(lineno, format!("unknown statement {:?}", other)),
            None => unreachable!("blank lines are skipped"),
        }
    }
    if let Some(done) = current.take() {
        manifest.stanzas.push(done);
    }
    Ok(manifest)
}

fn header<'a>(words: impl Iterator<Item = &'a str>, lineno: usize) -> ParseResult<Stanza> {
    let mut products = Vec::new();
    let mut sources = Vec::new();
    let mut seen_colon = false;
    for word in words {
        if word == ":" {
            if seen_colon {
                return err(lineno, "more than one ':' in make line");
            }
            seen_colon = true;
        } else if seen_colon {
            match word.strip_prefix('+') {
                Some(path) => sources.push((path.to_string(), Track::Contents)),
                None => sources.push((word.to_string(), Track::Presence)),
            }
        } else {
            products.push(word.to_string());
        }
    }
    if !seen_colon {
        return err(lineno, "make line needs a ':' between products and sources");
    }
    if products.is_empty() {
        return err(lineno, "make line names no products");
    }
    Ok(Stanza {
        line: lineno,
        products,
        sources,
        command: None,
        pipe: false,
        env: Vec::new(),
        bootstrap: false,
    })
}

fn body_line(stanza: &mut Stanza, line: &str, lineno: usize) -> ParseResult<()> {
    let mut words = line.split_whitespace();
    match words.next() {
        Some(cmd @ ("run" | "pipe")) => {
            if stanza.command.is_some() {
                return err(lineno, "stanza already has a command");
            }
            let argv: Vec<String> = words.map(str::to_string).collect();
            if argv.is_empty() {
                return err(lineno, format!("{} needs a command line", cmd));
            }
            stanza.command = Some(argv);
            stanza.pipe = cmd == "pipe";
        }
        Some("env") => match (words.next(), words.next()) {
            (Some(pair), None) => match pair.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    stanza.env.push((key.to_string(), value.to_string()));
                }
                _ => return err(lineno, "env takes KEY=VALUE"),
            },
            _ => return err(lineno, "env takes exactly one KEY=VALUE"),
        },
        Some("bootstrap") => {
            if words.next().is_some() {
                return err(lineno, "bootstrap takes no arguments");
            }
            stanza.bootstrap = true;
        }
        Some(other) => return err(lineno, format!("unknown directive {:?}", other)),
        None => unreachable!("blank lines are skipped"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = "\
# a two-stage document build
leaf main.tex
make doc.pdf doc.aux : +main.tex +doc.aux refs.bib
  bootstrap
  env TEXINPUTS=.:style
  run pdflatex -interaction=batchmode main.tex

make toc.txt : +doc.pdf
  pipe extract-toc doc.pdf
default doc.pdf
";

    #[test]
    fn parses_the_example() {
        let manifest = parse(EXAMPLE).unwrap();
        assert_eq!(manifest.leaves, vec!["main.tex"]);
        assert_eq!(manifest.defaults, vec!["doc.pdf"]);
        assert_eq!(manifest.stanzas.len(), 2);

        let doc = &manifest.stanzas[0];
        assert_eq!(doc.products, vec!["doc.pdf", "doc.aux"]);
        assert_eq!(
            doc.sources,
            vec![
                ("main.tex".to_string(), Track::Contents),
                ("doc.aux".to_string(), Track::Contents),
                ("refs.bib".to_string(), Track::Presence),
            ]
        );
        assert!(doc.bootstrap);
        assert!(!doc.pipe);
        assert_eq!(doc.env, vec![("TEXINPUTS".to_string(), ".:style".to_string())]);
        assert_eq!(
            doc.command.as_deref(),
            Some(&["pdflatex".to_string(), "-interaction=batchmode".into(), "main.tex".into()][..])
        );

        let toc = &manifest.stanzas[1];
        assert!(toc.pipe);
        assert_eq!(toc.line, 8);
    }

    #[test]
    fn errors_carry_line_numbers() {
        let err = parse("make out :\n  dance\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.to_string().contains("unknown directive"));

        let err = parse("\n\n  run true\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("outside a make stanza"));
    }

    #[test]
    fn make_line_must_have_colon_and_products() {
        assert!(parse("make out\n").unwrap_err().message.contains("':'"));
        assert!(parse("make : in\n").unwrap_err().message.contains("no products"));
        assert!(parse("make a : b : c\n").unwrap_err().message.contains("more than one"));
    }

    #[test]
    fn one_command_per_stanza() {
        let text = "make out :\n  run true\n  pipe cat x\n";
        let err = parse(text).unwrap_err();
        assert!(err.message.contains("already has a command"));
    }

    #[test]
    fn env_needs_key_value() {
        let err = parse("make out :\n  env NOEQUALS\n").unwrap_err();
        assert!(err.message.contains("KEY=VALUE"));
        let err = parse("make out :\n  env =v\n").unwrap_err();
        assert!(err.message.contains("KEY=VALUE"));
    }

    #[test]
    fn comments_and_blanks_are_ignored_inside_stanzas() {
        let text = "make out : in\n  # just a note\n\n  run true\n";
        let manifest = parse(text).unwrap();
        assert_eq!(manifest.stanzas.len(), 1);
        assert!(manifest.stanzas[0].command.is_some());
    }

    #[test]
    fn unknown_statement_is_rejected() {
        let err = parse("build out : in\n").unwrap_err();
        assert!(err.message.contains("unknown statement"));
    }
}
