use std::path::{Component, Path, PathBuf};

use crate::TransferError;

/// Maps device-side filenames into a local working directory.
///
/// The agent reports paths relative to (or absolute under) its bundle
/// `root`. A filename is accepted only if, once resolved against `root`, it
/// is still strictly inside `root`; it is then re-rooted under
/// `working_dir`.
///
/// Resolution is purely lexical: device paths do not exist on this host.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    working_dir: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: normalize(&root.into()),
            working_dir: working_dir.into(),
        }
    }

    /// Device-side root the agent's filenames are relative to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local directory receiving the files.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Returns `filename` expressed relative to the root.
    ///
    /// Rejects:
    /// - Paths that resolve to the root itself
    /// - Parent directory traversal out of the root (`../../etc/passwd`)
    /// - Absolute paths outside the root
    pub fn relative(&self, filename: &str) -> Result<PathBuf, TransferError> {
        let candidate = normalize(&self.root.join(filename));

        let rel = candidate
            .strip_prefix(&self.root)
            .map_err(|_| TransferError::SuspiciousPath(filename.to_string()))?;

        let escapes = rel.components().next().is_none()
            || rel.is_absolute()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(TransferError::SuspiciousPath(filename.to_string()));
        }

        Ok(rel.to_path_buf())
    }

    /// Returns the local destination for `filename` without touching disk.
    pub fn destination(&self, filename: &str) -> Result<PathBuf, TransferError> {
        Ok(self.working_dir.join(self.relative(filename)?))
    }

    /// Returns the local destination for `filename`, creating missing
    /// parent directories.
    pub async fn resolve(&self, filename: &str) -> Result<PathBuf, TransferError> {
        let dest = self.destination(filename)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(dest)
    }
}

/// Lexically normalizes a path: drops `.`, folds `name/..`.
///
/// `..` at the filesystem root stays at the root; leading `..` of a relative
/// path is kept.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> PathResolver {
        PathResolver::new("/A/B", "/out/B")
    }

    #[test]
    fn absolute_filename_under_root() {
        let dest = resolver().destination("/A/B/x/y.bin").unwrap();
        assert_eq!(dest, PathBuf::from("/out/B/x/y.bin"));
    }

    #[test]
    fn relative_filename() {
        let dest = resolver().destination("Frameworks/Foo.framework/Foo").unwrap();
        assert_eq!(dest, PathBuf::from("/out/B/Frameworks/Foo.framework/Foo"));
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        let err = resolver().destination("../../etc/passwd").unwrap_err();
        assert!(matches!(err, TransferError::SuspiciousPath(_)));
    }

    #[test]
    fn rejects_nested_traversal() {
        assert!(resolver().destination("x/../../../etc/passwd").is_err());
    }

    #[test]
    fn rejects_absolute_outside_root() {
        assert!(resolver().destination("/etc/passwd").is_err());
    }

    #[test]
    fn rejects_sibling_with_common_prefix() {
        assert!(resolver().destination("/A/Bogus/x").is_err());
    }

    #[test]
    fn rejects_root_itself() {
        assert!(resolver().destination("/A/B").is_err());
        assert!(resolver().destination("").is_err());
        assert!(resolver().destination(".").is_err());
    }

    #[test]
    fn folds_harmless_dot_segments() {
        let dest = resolver().destination("./x/../x/./y.bin").unwrap();
        assert_eq!(dest, PathBuf::from("/out/B/x/y.bin"));
    }

    #[test]
    fn detour_back_into_root_is_accepted() {
        let dest = resolver().destination("x/../../B/z").unwrap();
        assert_eq!(dest, PathBuf::from("/out/B/z"));
    }

    #[test]
    fn normalize_keeps_root_on_excess_parents() {
        assert_eq!(normalize(Path::new("/a/../../b")), PathBuf::from("/b"));
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
    }

    #[tokio::test]
    async fn resolve_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new("/var/App.app", dir.path().join("App.app"));

        let dest = resolver.resolve("/var/App.app/sub/dir/file.bin").await.unwrap();
        assert_eq!(dest, dir.path().join("App.app/sub/dir/file.bin"));
        assert!(dir.path().join("App.app/sub/dir").is_dir());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn resolve_rejects_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new("/var/App.app", dir.path().join("App.app"));

        assert!(resolver.resolve("../evil/file").await.is_err());
        assert!(!dir.path().join("App.app").exists());
        assert!(!dir.path().join("evil").exists());
    }
}
