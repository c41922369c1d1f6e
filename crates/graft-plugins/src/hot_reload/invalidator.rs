//! Cache-generation invalidation.
//!
//! A change to a file invalidates the file itself and, transitively, every
//! file on an import path from the entry down to it. Each edge on those paths
//! is re-qualified with the new generation; files off those paths keep their
//! cached modules.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use graft_kernel::plugin::Generation;
use tracing::debug;

use super::graph::{DependantEdge, ImportGraph};

/// Result of one invalidation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    pub generation: Generation,
    /// Files the pass started from.
    pub changed: Vec<PathBuf>,
    /// Dependants reached by propagation, in the order they were reached.
    pub rewritten: Vec<PathBuf>,
    /// Edges re-qualified with `generation`.
    pub edges: Vec<DependantEdge>,
}

impl Invalidation {
    /// Every file that must be evaluated fresh: changed files and rewritten
    /// dependants, without duplicates.
    pub fn touched(&self) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        self.changed
            .iter()
            .chain(self.rewritten.iter())
            .filter(|p| seen.insert((*p).clone()))
            .cloned()
            .collect()
    }

    /// Whether propagation reached `path`.
    pub fn touches(&self, path: &Path) -> bool {
        self.changed.iter().any(|p| p == path) || self.rewritten.iter().any(|p| p == path)
    }
}

/// Walks the dependant map of an [`ImportGraph`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Invalidator;

impl Invalidator {
    /// Propagate a change in `changed` up to the entry, stamping every edge
    /// on the way with `generation`. Each file is expanded at most once.
    pub fn invalidate(
        graph: &mut ImportGraph,
        changed: &[PathBuf],
        generation: Generation,
    ) -> Invalidation {
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut queue: VecDeque<PathBuf> = VecDeque::new();
        let mut origins = Vec::new();

        for file in changed {
            if graph.contains(file) && visited.insert(file.clone()) {
                origins.push(file.clone());
                queue.push_back(file.clone());
            }
        }

        let mut rewritten = Vec::new();
        let mut edges = Vec::new();

        while let Some(file) = queue.pop_front() {
            let dependants = graph.dependants_of(&file).to_vec();
            for edge in dependants {
                graph.stamp(&edge, generation);
                if visited.insert(edge.dependant.clone()) {
                    rewritten.push(edge.dependant.clone());
                    queue.push_back(edge.dependant.clone());
                }
                edges.push(edge);
            }
        }

        debug!(
            "Generation {}: {} changed, {} dependants, {} edges",
            generation,
            origins.len(),
            rewritten.len(),
            edges.len()
        );

        Invalidation {
            generation,
            changed: origins,
            rewritten,
            edges,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhai::Engine;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    /// `A -> B -> C`, `A -> D -> C`, `A -> E`, plus an unrelated `F`.
    fn diamond(dir: &Path) -> (ImportGraph, [PathBuf; 5]) {
        let a = write(dir, "a.rhai", "import \"./b\" as b;\nimport \"./d\" as d;\nimport \"./e\" as e;\n");
        let b = write(dir, "b.rhai", "import \"./c\" as c;\n");
        let c = write(dir, "c.rhai", "fn v() { 1 }\n");
        let d = write(dir, "d.rhai", "import \"./c\" as c;\n");
        let e = write(dir, "e.rhai", "fn w() { 2 }\n");
        write(dir, "f.rhai", "import \"./c\" as c;\n");
        let graph = ImportGraph::build(&Engine::new(), &a).unwrap();
        (graph, [a, b, c, d, e])
    }

    #[test]
    fn change_propagates_to_every_ancestor_once() {
        let dir = TempDir::new().unwrap();
        let (mut graph, [a, b, c, d, e]) = diamond(dir.path());

        let inv = Invalidator::invalidate(&mut graph, &[c.clone()], Generation(5));

        let mut rewritten = inv.rewritten.clone();
        rewritten.sort();
        assert_eq!(rewritten, vec![a.clone(), b.clone(), d.clone()]);
        assert_eq!(inv.touched().len(), 4);
        assert!(!inv.touches(&e));
        // b->c, d->c, a->b, a->d
        assert_eq!(inv.edges.len(), 4);
    }

    #[test]
    fn only_edges_on_affected_paths_are_qualified() {
        let dir = TempDir::new().unwrap();
        let (mut graph, [a, b, c, d, e]) = diamond(dir.path());

        Invalidator::invalidate(&mut graph, &[c.clone()], Generation(5));

        let specs = |file: &Path| -> Vec<String> {
            graph
                .file(file)
                .unwrap()
                .imports
                .iter()
                .map(|i| i.effective_specifier())
                .collect()
        };
        assert_eq!(specs(&b), vec!["./c?v=5"]);
        assert_eq!(specs(&d), vec!["./c?v=5"]);
        assert_eq!(specs(&a), vec!["./b?v=5", "./d?v=5", "./e"]);
        assert!(specs(&e).is_empty());
        assert!(specs(&c).is_empty());
    }

    #[test]
    fn entry_change_touches_only_the_entry() {
        let dir = TempDir::new().unwrap();
        let (mut graph, [a, ..]) = diamond(dir.path());

        let inv = Invalidator::invalidate(&mut graph, &[a.clone()], Generation(2));

        assert_eq!(inv.touched(), vec![a]);
        assert!(inv.edges.is_empty());
    }

    #[test]
    fn untracked_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        let (mut graph, _) = diamond(dir.path());

        let inv = Invalidator::invalidate(&mut graph, &[dir.path().join("f.rhai")], Generation(3));

        assert!(inv.touched().is_empty());
    }

    #[test]
    fn overlapping_changes_are_deduplicated() {
        let dir = TempDir::new().unwrap();
        let (mut graph, [a, b, c, ..]) = diamond(dir.path());

        let inv = Invalidator::invalidate(&mut graph, &[c.clone(), b.clone(), c.clone(), a.clone()], Generation(4));

        assert_eq!(inv.changed, vec![c, b, a]);
        let touched = inv.touched();
        let unique: HashSet<_> = touched.iter().collect();
        assert_eq!(unique.len(), touched.len());
        assert_eq!(touched.len(), 4);
    }
}
