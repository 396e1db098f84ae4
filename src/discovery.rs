//! Discovery of import sites across Go packages.
//!
//! Package enumeration shells out to `go list -json`; import scanning is
//! line-oriented over each file's `import` declarations. Positions are
//! reported 1-based (editor convention) and converted to the LSP's
//! zero-based space by the caller.

use std::process::Command;
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

/// A Go package as reported by `go list -json`.
#[derive(Debug, Clone, Deserialize)]
pub struct Package {
    #[serde(rename = "ImportPath")]
    pub import_path: String,
    #[serde(rename = "Dir")]
    pub dir: String,
    #[serde(rename = "GoFiles", default)]
    pub go_files: Vec<String>,
}

/// One file where the target import path occurs.
#[derive(Debug, Clone)]
pub struct ImportHit {
    /// Absolute path of the file.
    pub file: String,
    /// 1-based line of the import spec.
    pub line: u32,
    /// 1-based column of the alias identifier, or of the path literal when
    /// the import is unaliased.
    pub column: u32,
    /// Effective alias: the declared one, or the inferred default.
    pub alias: String,
}

impl ImportHit {
    /// `file:line` string for human-readable reporting.
    pub fn location(&self) -> String {
        format!("{}:{}", self.file, self.line)
    }
}

/// The position and alias of an import spec within one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpec {
    pub line: u32,
    pub column: u32,
    pub alias: Option<String>,
}

/// Enumerate packages matching the given patterns via `go list -json`.
pub fn list_packages(patterns: &[String]) -> Result<Vec<Package>> {
    let patterns = if patterns.is_empty() {
        &["./...".to_string()][..]
    } else {
        patterns
    };

    let output = Command::new("go")
        .arg("list")
        .arg("-json")
        .args(patterns)
        .output()
        .context("failed to run go list")?;

    if !output.status.success() {
        bail!(
            "go list failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    // go list emits a stream of concatenated JSON objects, one per package.
    let stdout = String::from_utf8(output.stdout).context("go list output is not valid UTF-8")?;
    let mut packages = Vec::new();
    for package in serde_json::Deserializer::from_str(&stdout).into_iter::<Package>() {
        packages.push(package.context("failed to decode package")?);
    }

    Ok(packages)
}

/// Flatten packages into absolute Go source file paths.
pub fn go_files_from_packages(packages: &[Package]) -> Vec<String> {
    let mut files = Vec::new();
    for package in packages {
        for go_file in &package.go_files {
            files.push(format!("{}/{}", package.dir, go_file));
        }
    }
    files
}

/// Find every file under the given patterns that imports `import_path`.
///
/// Files that fail to read or scan are skipped. Aliases fall back to the
/// inferred default when the import is unaliased.
pub fn find_imports(patterns: &[String], import_path: &str) -> Result<Vec<ImportHit>> {
    let packages = list_packages(patterns).context("failed to list packages")?;
    let files = go_files_from_packages(&packages);

    let mut hits = Vec::new();
    for file in files {
        let content = match std::fs::read_to_string(&file) {
            Ok(content) => content,
            Err(e) => {
                debug!("Skipping unreadable file {}: {}", file, e);
                continue;
            }
        };

        let Some(spec) = find_import_in_content(&content, import_path) else {
            continue;
        };

        let alias = spec
            .alias
            .unwrap_or_else(|| infer_default_alias(import_path));

        hits.push(ImportHit {
            file,
            line: spec.line,
            column: spec.column,
            alias,
        });
    }

    Ok(hits)
}

fn single_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\s*import\s+(?:([A-Za-z_][A-Za-z0-9_]*|\.)\s+)?"([^"]+)""#)
            .expect("invalid single import regex")
    })
}

fn block_entry_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\s*(?:([A-Za-z_][A-Za-z0-9_]*|\.)\s+)?"([^"]+)""#)
            .expect("invalid block entry regex")
    })
}

fn block_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*import\s*\(").expect("invalid block open regex"))
}

/// Locate the import spec for `import_path` within file content.
///
/// Handles the single-spec form (`import alias "path"`) and parenthesized
/// blocks. Generated files (carrying the standard `Code generated ... DO
/// NOT EDIT` marker) are excluded entirely. Returns the position of the
/// alias identifier when present, otherwise of the path literal.
pub fn find_import_in_content(content: &str, import_path: &str) -> Option<ImportSpec> {
    if is_generated(content) {
        return None;
    }

    let mut in_block = false;

    for (idx, line) in content.split('\n').enumerate() {
        let line_no = idx as u32 + 1;

        if in_block {
            if line.trim_start().starts_with(')') {
                in_block = false;
                continue;
            }
            if let Some(spec) = match_import_entry(block_entry_re(), line, line_no, import_path) {
                return Some(spec);
            }
            continue;
        }

        if block_open_re().is_match(line) {
            in_block = true;
            // A one-line block like `import ( "fmt" )` is not produced by
            // gofmt; block entries are expected on their own lines.
            continue;
        }

        if let Some(spec) = match_import_entry(single_import_re(), line, line_no, import_path) {
            return Some(spec);
        }
    }

    None
}

fn match_import_entry(
    re: &Regex,
    line: &str,
    line_no: u32,
    import_path: &str,
) -> Option<ImportSpec> {
    let caps = re.captures(line)?;
    let path = caps.get(2)?;
    if path.as_str() != import_path {
        return None;
    }

    match caps.get(1) {
        Some(alias) => Some(ImportSpec {
            line: line_no,
            column: alias.start() as u32 + 1,
            alias: Some(alias.as_str().to_string()),
        }),
        None => Some(ImportSpec {
            line: line_no,
            // start() is the byte offset just past the opening quote,
            // which equals the quote's 1-based column.
            column: path.start() as u32,
            alias: None,
        }),
    }
}

/// True for files carrying the standard generated-code marker.
fn is_generated(content: &str) -> bool {
    content
        .lines()
        .any(|line| line.contains("Code generated") && line.contains("DO NOT EDIT"))
}

/// Derive the default alias for an import path: its last path segment.
/// Degenerate paths (empty, trailing separator) yield an empty string.
pub fn infer_default_alias(import_path: &str) -> String {
    import_path
        .split('/')
        .next_back()
        .unwrap_or("")
        .to_string()
}

/// Resolve CLI pattern arguments, defaulting to the whole module tree.
pub fn default_patterns(args: &[String]) -> Vec<String> {
    if args.is_empty() {
        vec!["./...".to_string()]
    } else {
        args.to_vec()
    }
}
