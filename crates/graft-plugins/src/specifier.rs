//! Plugin specifier normalization.
//!
//! Local sources (`file:` specifiers, `./` or `../` paths, and plain paths
//! that exist on disk) are rewritten to `file:<path>` with a forward-slash
//! path relative to the plugins root, which is how the fetcher expects to be
//! handed local packages. Registry specifiers such as `pkg-a`,
//! `pkg-a@^1.2.0` or `@scope/pkg` pass through untouched.

use std::path::{Component, Path, PathBuf};

/// Prefix marking a local-file specifier.
pub const FILE_PREFIX: &str = "file:";

/// Converts specifiers into their installable form for one plugins root.
#[derive(Debug, Clone)]
pub struct SpecifierNormalizer {
    root: PathBuf,
    base_dir: PathBuf,
}

impl SpecifierNormalizer {
    /// Relative specifiers resolve against the process working directory.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::with_base_dir(root, base_dir)
    }

    /// Relative specifiers resolve against `base_dir`.
    pub fn with_base_dir(root: impl AsRef<Path>, base_dir: impl AsRef<Path>) -> Self {
        let base_dir = clean(base_dir.as_ref());
        let root = clean(&base_dir.join(root.as_ref()));
        Self { root, base_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalize one specifier.
    pub fn normalize(&self, specifier: &str) -> String {
        if let Some(path) = specifier.strip_prefix(FILE_PREFIX) {
            return self.local(path);
        }

        if specifier.starts_with('.') || self.exists_locally(specifier) {
            return self.local(specifier);
        }

        specifier.to_string()
    }

    /// Normalize a batch, preserving order.
    pub fn normalize_all<S: AsRef<str>>(&self, specifiers: &[S]) -> Vec<String> {
        specifiers
            .iter()
            .map(|s| self.normalize(s.as_ref()))
            .collect()
    }

    /// Whether the specifier names local files once normalized.
    pub fn is_local(specifier: &str) -> bool {
        specifier.starts_with(FILE_PREFIX)
    }

    fn exists_locally(&self, specifier: &str) -> bool {
        !specifier.is_empty() && std::fs::metadata(self.base_dir.join(specifier)).is_ok()
    }

    fn local(&self, path: &str) -> String {
        let absolute = clean(&self.base_dir.join(path));
        format!("{FILE_PREFIX}{}", to_posix(&relative_to(&absolute, &self.root)))
    }
}

/// Lexically resolve `.` and `..` components without touching the disk.
pub(crate) fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Path of `target` as seen from the directory `base`. Both are expected to
/// be absolute and cleaned.
fn relative_to(target: &Path, base: &Path) -> PathBuf {
    let target: Vec<Component<'_>> = target.components().collect();
    let base: Vec<Component<'_>> = base.components().collect();

    let shared = target
        .iter()
        .zip(base.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in shared..base.len() {
        out.push("..");
    }
    for component in &target[shared..] {
        out.push(component.as_os_str());
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

fn to_posix(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn normalizer(base: &Path) -> SpecifierNormalizer {
        SpecifierNormalizer::with_base_dir("plugins", base)
    }

    #[test]
    fn registry_specifiers_pass_through() {
        let dir = TempDir::new().unwrap();
        let n = normalizer(dir.path());

        assert_eq!(n.normalize("pkg-a"), "pkg-a");
        assert_eq!(n.normalize("pkg-a@^1.2.0"), "pkg-a@^1.2.0");
        assert_eq!(n.normalize("@scope/pkg"), "@scope/pkg");
    }

    #[test]
    fn relative_marker_is_rebased_onto_root() {
        let dir = TempDir::new().unwrap();
        let n = normalizer(dir.path());

        assert_eq!(n.normalize("./local/pkg-b"), "file:../local/pkg-b");
        assert_eq!(n.normalize("../elsewhere"), "file:../../elsewhere");
    }

    #[test]
    fn file_prefix_is_rebased_onto_root() {
        let dir = TempDir::new().unwrap();
        let n = normalizer(dir.path());

        assert_eq!(n.normalize("file:local/pkg-b"), "file:../local/pkg-b");
        assert_eq!(n.normalize("file:plugins/vendored"), "file:vendored");

        let absolute = dir.path().join("abs/pkg-c");
        assert_eq!(
            n.normalize(&format!("file:{}", absolute.display())),
            "file:../abs/pkg-c"
        );
    }

    #[test]
    fn existing_unmarked_path_is_treated_as_local() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("devplugin")).unwrap();
        let n = normalizer(dir.path());

        assert_eq!(n.normalize("devplugin"), "file:../devplugin");
        assert_eq!(n.normalize("notthere"), "notthere");
    }

    #[test]
    fn batch_preserves_order() {
        let dir = TempDir::new().unwrap();
        let n = normalizer(dir.path());

        let out = n.normalize_all(&["pkg-a", "./b", "file:c"]);
        assert_eq!(out, vec!["pkg-a", "file:../b", "file:../c"]);
        assert!(SpecifierNormalizer::is_local(&out[1]));
        assert!(!SpecifierNormalizer::is_local(&out[0]));
    }

    #[test]
    fn clean_collapses_dots() {
        assert_eq!(clean(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(clean(Path::new("a/../../b")), PathBuf::from("../b"));
    }
}
