//! jconf option files: newline-delimited option streams that splice into the
//! command line.
//!
//! A jconf file holds the same flags the command line accepts, one or more
//! per line, with `#` comments. `-C <path>` (or `--config <path>`) includes
//! another file recursively, resolved relative to the including file.
//! Section headers `-AM`, `-LM`, `-SR`, `-GLOBAL` re-target options to a
//! named engine submodule; this tool drives a single engine, so sections are
//! validated and their options accumulate into the one configuration.

use log::{debug, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JconfError {
    #[error("cannot read jconf file {0}: {1}")]
    Unreadable(PathBuf, std::io::Error),

    #[error("include cycle via {0}")]
    IncludeCycle(PathBuf),

    #[error("missing filename after {0} in {1}")]
    MissingIncludeArg(String, PathBuf),

    #[error("unterminated quote in {0}")]
    UnterminatedQuote(PathBuf),
}

const SECTION_HEADERS: [&str; 4] = ["-AM", "-LM", "-SR", "-GLOBAL"];

/// Expand a jconf file into an argument vector ready to splice into the
/// command-line parser.
pub fn expand_file(path: &Path) -> Result<Vec<String>, JconfError> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    expand_into(path, &mut seen, &mut out)?;
    Ok(out)
}

fn expand_into(
    path: &Path,
    seen: &mut HashSet<PathBuf>,
    out: &mut Vec<String>,
) -> Result<(), JconfError> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !seen.insert(canonical.clone()) {
        return Err(JconfError::IncludeCycle(canonical));
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| JconfError::Unreadable(path.to_path_buf(), e))?;
    debug!("reading jconf: {}", path.display());

    let tokens = tokenize(&text, path)?;
    let mut iter = tokens.into_iter().peekable();
    while let Some(token) = iter.next() {
        if token == "-C" || token == "--config" {
            let target = iter
                .next()
                .ok_or_else(|| JconfError::MissingIncludeArg(token.clone(), path.to_path_buf()))?;
            let mut target_path = PathBuf::from(&target);
            if target_path.is_relative() {
                if let Some(parent) = path.parent() {
                    target_path = parent.join(target_path);
                }
            }
            expand_into(&target_path, seen, out)?;
        } else if is_section_header(&token) {
            // single-engine tool: note the section and carry on
            let name = iter.peek().cloned().unwrap_or_default();
            warn!(
                "jconf section {} {} applies to a single engine here; options accumulate globally",
                token, name
            );
            if !name.is_empty() && !name.starts_with('-') {
                iter.next();
            }
        } else {
            out.push(token);
        }
    }
    seen.remove(&canonical);
    Ok(())
}

fn is_section_header(token: &str) -> bool {
    SECTION_HEADERS.contains(&token)
}

/// Split a jconf body into tokens: whitespace separated, `#` to end of line
/// is a comment, double quotes group a token with spaces.
fn tokenize(text: &str, path: &Path) -> Result<Vec<String>, JconfError> {
    let mut tokens = Vec::new();
    for line in text.lines() {
        let mut current = String::new();
        let mut in_quote = false;
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '#' if !in_quote => break,
                '"' => {
                    if in_quote {
                        tokens.push(std::mem::take(&mut current));
                        in_quote = false;
                    } else {
                        in_quote = true;
                    }
                }
                c if c.is_whitespace() && !in_quote => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            }
        }
        if in_quote {
            return Err(JconfError::UnterminatedQuote(path.to_path_buf()));
        }
        if !current.is_empty() {
            tokens.push(current);
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn expands_options_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "a.jconf",
            "# capture settings\n--lv 3000 --zc 45\n--headmargin 400   # trailing comment\n",
        );
        let args = expand_file(&path).unwrap();
        assert_eq!(args, vec!["--lv", "3000", "--zc", "45", "--headmargin", "400"]);
    }

    #[test]
    fn resolves_relative_includes() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "inner.jconf", "--zc 70\n");
        let outer = write_file(dir.path(), "outer.jconf", "--lv 1 -C inner.jconf --lv 2\n");
        let args = expand_file(&outer).unwrap();
        assert_eq!(args, vec!["--lv", "1", "--zc", "70", "--lv", "2"]);
    }

    #[test]
    fn include_cycle_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "x.jconf", "-C y.jconf\n");
        let y = write_file(dir.path(), "y.jconf", "-C x.jconf\n");
        assert!(matches!(expand_file(&y), Err(JconfError::IncludeCycle(_))));
    }

    #[test]
    fn quoted_tokens_keep_spaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "q.jconf", "--filename \"out dir/take\"\n");
        let args = expand_file(&path).unwrap();
        assert_eq!(args, vec!["--filename", "out dir/take"]);
    }

    #[test]
    fn section_headers_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "s.jconf", "-GLOBAL\n--lv 900\n-AM am1\n--zc 30\n");
        let args = expand_file(&path).unwrap();
        assert_eq!(args, vec!["--lv", "900", "--zc", "30"]);
    }
}
