//! Import graph of a script plugin.
//!
//! Starting from the entry script, every file reachable through a static
//! `import "<relative path>"` statement is parsed and tracked. Import paths
//! that are not relative (library modules, pinned instances) are leaves and
//! are not descended into.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;
use std::ops::Range;
use std::path::{Path, PathBuf};

use graft_kernel::plugin::{Generation, PluginError, PluginResult};
use rhai::Engine;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::specifier::clean;

/// Extension added to import paths that have none.
pub const SCRIPT_EXTENSION: &str = "rhai";

/// One static import statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportStatement {
    /// Path literal as written.
    pub specifier: String,
    /// 1-based line of the statement.
    pub line: usize,
    /// Byte range of the literal's content in the source.
    pub span: Range<usize>,
    /// Resolved file, for relative imports.
    pub target: Option<PathBuf>,
    /// Generation the edge was last qualified with.
    pub generation: Generation,
}

impl ImportStatement {
    /// Specifier qualified with the edge's generation, `./util?v=7`.
    pub fn effective_specifier(&self) -> String {
        if self.generation == Generation::INITIAL {
            self.specifier.clone()
        } else {
            format!("{}?v={}", self.specifier, self.generation)
        }
    }
}

/// Parsed form of one tracked file.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub path: PathBuf,
    /// Hex sha256 of the content the file was parsed from.
    pub hash: String,
    pub imports: Vec<ImportStatement>,
}

/// `dependant` imports the file through `dependant.imports[statement]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependantEdge {
    pub dependant: PathBuf,
    pub statement: usize,
}

/// Forward and reverse import maps rooted at one entry file.
#[derive(Debug, Clone)]
pub struct ImportGraph {
    entry: PathBuf,
    files: HashMap<PathBuf, ParsedFile>,
    dependants: HashMap<PathBuf, Vec<DependantEdge>>,
}

impl ImportGraph {
    /// Parse `entry` and everything it transitively imports.
    pub fn build(engine: &Engine, entry: &Path) -> PluginResult<Self> {
        let entry = clean(entry);
        let files = parse_closure(engine, vec![entry.clone()], &HashMap::new())?;

        let mut graph = Self {
            entry,
            files,
            dependants: HashMap::new(),
        };
        graph.rebuild_dependants();
        debug!(
            "Built import graph for {:?}: {} files",
            graph.entry,
            graph.files.len()
        );
        Ok(graph)
    }

    pub fn entry(&self) -> &Path {
        &self.entry
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    pub fn file(&self, path: &Path) -> Option<&ParsedFile> {
        self.files.get(path)
    }

    /// Tracked files, entry first, the rest sorted.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut rest: Vec<PathBuf> = self
            .files
            .keys()
            .filter(|p| **p != self.entry)
            .cloned()
            .collect();
        rest.sort();
        let mut all = Vec::with_capacity(rest.len() + 1);
        all.push(self.entry.clone());
        all.extend(rest);
        all
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Files that directly import `path`.
    pub fn dependants_of(&self, path: &Path) -> &[DependantEdge] {
        self.dependants.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Import statement an edge refers to.
    pub fn statement(&self, edge: &DependantEdge) -> Option<&ImportStatement> {
        self.files
            .get(&edge.dependant)
            .and_then(|f| f.imports.get(edge.statement))
    }

    /// Qualify an edge with a generation.
    pub fn stamp(&mut self, edge: &DependantEdge, generation: Generation) {
        if let Some(statement) = self
            .files
            .get_mut(&edge.dependant)
            .and_then(|f| f.imports.get_mut(edge.statement))
        {
            statement.generation = generation;
        }
    }

    /// Tracked files whose content on disk no longer matches what was parsed.
    /// Unreadable files count as changed.
    pub fn changed_files(&self) -> Vec<PathBuf> {
        let mut changed: Vec<PathBuf> = self
            .files
            .values()
            .filter(|f| match std::fs::read(&f.path) {
                Ok(bytes) => content_hash(&bytes) != f.hash,
                Err(_) => true,
            })
            .map(|f| f.path.clone())
            .collect();
        changed.sort();
        changed
    }

    /// Re-parse one file and replace only the edges it originates.
    ///
    /// Files it newly imports are parsed and tracked; files no longer
    /// reachable from the entry are dropped and returned. On a parse failure
    /// the graph is left as it was.
    pub fn refresh(&mut self, engine: &Engine, path: &Path) -> PluginResult<Vec<PathBuf>> {
        let path = clean(path);
        if !self.files.contains_key(&path) {
            return Err(PluginError::Other(format!(
                "{} is not part of the import graph of {}",
                path.display(),
                self.entry.display()
            )));
        }

        let mut known = self.files.clone();
        known.remove(&path);
        let staged = parse_closure(engine, vec![path.clone()], &known)?;

        if let Some(old) = self.files.get(&path) {
            for target in old.imports.iter().filter_map(|i| i.target.as_ref()) {
                if let Some(edges) = self.dependants.get_mut(target) {
                    edges.retain(|e| e.dependant != path);
                }
            }
        }

        for (file, parsed) in staged {
            for (index, import) in parsed.imports.iter().enumerate() {
                if let Some(target) = &import.target {
                    self.dependants.entry(target.clone()).or_default().push(DependantEdge {
                        dependant: file.clone(),
                        statement: index,
                    });
                }
            }
            self.files.insert(file, parsed);
        }

        Ok(self.prune())
    }

    /// Drop files not reachable from the entry.
    fn prune(&mut self) -> Vec<PathBuf> {
        let mut reachable = HashSet::new();
        let mut queue = VecDeque::from([self.entry.clone()]);
        while let Some(file) = queue.pop_front() {
            if !reachable.insert(file.clone()) {
                continue;
            }
            if let Some(parsed) = self.files.get(&file) {
                queue.extend(parsed.imports.iter().filter_map(|i| i.target.clone()));
            }
        }

        let removed: Vec<PathBuf> = self
            .files
            .keys()
            .filter(|p| !reachable.contains(*p))
            .cloned()
            .collect();

        if !removed.is_empty() {
            for file in &removed {
                self.files.remove(file);
            }
            self.rebuild_dependants();
            debug!("Dropped {} unreachable files from {:?}", removed.len(), self.entry);
        }
        removed
    }

    fn rebuild_dependants(&mut self) {
        self.dependants.clear();
        for parsed in self.files.values() {
            for (index, import) in parsed.imports.iter().enumerate() {
                if let Some(target) = &import.target {
                    self.dependants.entry(target.clone()).or_default().push(DependantEdge {
                        dependant: parsed.path.clone(),
                        statement: index,
                    });
                }
            }
        }
    }

    /// Indented tree of the graph, edges shown with their effective
    /// specifiers. Files reached twice are marked instead of expanded.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.entry.display());
        let mut seen = HashSet::new();
        self.render_file(&self.entry, 0, &mut seen, &mut out);
        out
    }

    fn render_file(&self, path: &Path, depth: usize, seen: &mut HashSet<PathBuf>, out: &mut String) {
        let Some(parsed) = self.files.get(path) else {
            return;
        };
        if !seen.insert(path.to_path_buf()) {
            return;
        }
        for import in &parsed.imports {
            let indent = "  ".repeat(depth + 1);
            match &import.target {
                Some(target) => {
                    let repeat = if seen.contains(target) { " (seen)" } else { "" };
                    let _ = writeln!(
                        out,
                        "{indent}{} -> {}{repeat}",
                        import.effective_specifier(),
                        target.display()
                    );
                    self.render_file(target, depth + 1, seen, out);
                }
                None => {
                    let _ = writeln!(out, "{indent}{} (external)", import.specifier);
                }
            }
        }
    }
}

/// Parse `roots` and every file they transitively import that is not in
/// `known`.
fn parse_closure(
    engine: &Engine,
    roots: Vec<PathBuf>,
    known: &HashMap<PathBuf, ParsedFile>,
) -> PluginResult<HashMap<PathBuf, ParsedFile>> {
    let mut parsed = HashMap::new();
    let mut queue = VecDeque::from(roots);

    while let Some(file) = queue.pop_front() {
        if parsed.contains_key(&file) || known.contains_key(&file) {
            continue;
        }
        let parsed_file = parse_file(engine, &file)?;
        for import in &parsed_file.imports {
            if let Some(target) = &import.target {
                if !target.is_file() {
                    return Err(PluginError::ResolutionFailure(format!(
                        "{} (imported from {}:{})",
                        import.specifier,
                        file.display(),
                        import.line
                    )));
                }
                queue.push_back(target.clone());
            }
        }
        parsed.insert(file, parsed_file);
    }

    Ok(parsed)
}

/// Read, syntax-check and scan one file.
pub fn parse_file(engine: &Engine, path: &Path) -> PluginResult<ParsedFile> {
    let bytes = std::fs::read(path).map_err(|e| PluginError::ParseFailure {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let source = String::from_utf8_lossy(&bytes);

    engine
        .compile(source.as_ref())
        .map_err(|e| PluginError::ParseFailure {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let imports = scan_imports(&source)
        .into_iter()
        .map(|(specifier, span, line)| ImportStatement {
            target: resolve_import(Some(path), &specifier),
            specifier,
            line,
            span,
            generation: Generation::INITIAL,
        })
        .collect();

    Ok(ParsedFile {
        path: path.to_path_buf(),
        hash: content_hash(&bytes),
        imports,
    })
}

/// Hex sha256 of a file's content.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// File an import path refers to, for relative (`./`, `../`) and absolute
/// paths. Relative paths resolve against the importing file's directory, or
/// the working directory when there is no importer.
pub fn resolve_import(importer: Option<&Path>, specifier: &str) -> Option<PathBuf> {
    let relative = specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier == "."
        || specifier == "..";

    let path = if relative {
        let base = match importer.and_then(Path::parent) {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir().ok()?,
        };
        base.join(specifier)
    } else if Path::new(specifier).is_absolute() {
        PathBuf::from(specifier)
    } else {
        return None;
    };

    let path = if path.extension().is_some() {
        path
    } else {
        path.with_extension(SCRIPT_EXTENSION)
    };
    Some(clean(&path))
}

/// Static `import "<literal>"` statements in Rhai source, skipping comments
/// and string contents. Yields the unescaped literal, its byte span and its
/// line.
pub fn scan_imports(source: &str) -> Vec<(String, Range<usize>, usize)> {
    let bytes = source.as_bytes();
    let mut imports = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'/') => i = skip_line(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block(bytes, i),
            b'"' => i = skip_string(bytes, i, b'"'),
            b'`' => i = skip_string(bytes, i, b'`'),
            b'\'' => i = skip_string(bytes, i, b'\''),
            c if is_ident_start(c) => {
                let start = i;
                while i < bytes.len() && is_ident(bytes[i]) {
                    i += 1;
                }
                if &bytes[start..i] != b"import" {
                    continue;
                }
                let mut j = skip_trivia(bytes, i);
                if bytes.get(j) != Some(&b'"') {
                    continue;
                }
                j += 1;
                let content_start = j;
                let mut literal = String::new();
                while j < bytes.len() && bytes[j] != b'"' {
                    if bytes[j] == b'\\' && j + 1 < bytes.len() {
                        literal.push(bytes[j + 1] as char);
                        j += 2;
                    } else {
                        let ch = source[j..].chars().next().unwrap_or('\u{fffd}');
                        literal.push(ch);
                        j += ch.len_utf8();
                    }
                }
                let line = source[..start].matches('\n').count() + 1;
                imports.push((literal, content_start..j.min(bytes.len()), line));
                i = j + 1;
            }
            _ => i += 1,
        }
    }

    imports
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

fn skip_line(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
    }
    i
}

/// Rhai block comments nest.
fn skip_block(bytes: &[u8], mut i: usize) -> usize {
    let mut depth = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return i;
            }
        } else {
            i += 1;
        }
    }
    i
}

fn skip_string(bytes: &[u8], mut i: usize, quote: u8) -> usize {
    i += 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    i
}

fn skip_trivia(bytes: &[u8], mut i: usize) -> usize {
    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        match (bytes.get(i), bytes.get(i + 1)) {
            (Some(b'/'), Some(b'/')) => i = skip_line(bytes, i),
            (Some(b'/'), Some(b'*')) => i = skip_block(bytes, i),
            _ => return i,
        }
    }
}
