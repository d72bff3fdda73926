use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directories inside a project that hold environments or caches, never sources.
const PROJECT_FORBIDDEN: &[&str] = &[".git", ".venv", "venv", "__pycache__", ".tox"];

/// Per-user interpreter and package installs, relative to the home directory.
const HOME_FORBIDDEN: &[&str] = &[".pyenv", ".local/lib", ".cache/pip", ".conda"];

/// Keeps edits inside the project root and out of environment directories.
#[derive(Debug, Clone)]
pub struct WorkspaceGuard {
    /// Canonical project root
    workspace_root: PathBuf,
    /// Canonical paths to forbidden directories
    forbidden_paths: Vec<PathBuf>,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("Path is outside workspace: {path} (workspace: {workspace})")]
    OutsideWorkspace { path: PathBuf, workspace: PathBuf },

    #[error("Path is in forbidden directory: {path} (forbidden: {forbidden})")]
    ForbiddenPath { path: PathBuf, forbidden: PathBuf },

    #[error("Failed to canonicalize {path}: {source}")]
    Canonicalize {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn canonicalize(path: &Path) -> Result<PathBuf, SafetyError> {
    path.canonicalize().map_err(|source| SafetyError::Canonicalize {
        path: path.to_path_buf(),
        source,
    })
}

impl WorkspaceGuard {
    /// Create a guard for `workspace_root` (canonicalized, so symlinks resolve).
    pub fn new(workspace_root: impl AsRef<Path>) -> Result<Self, SafetyError> {
        let workspace_root = canonicalize(workspace_root.as_ref())?;

        let mut forbidden_paths: Vec<PathBuf> = PROJECT_FORBIDDEN
            .iter()
            .filter_map(|dir| workspace_root.join(dir).canonicalize().ok())
            .collect();

        if let Some(home) = home::home_dir() {
            forbidden_paths.extend(
                HOME_FORBIDDEN
                    .iter()
                    .filter_map(|dir| home.join(dir).canonicalize().ok())
                    // A project living under one of these still has to be editable.
                    .filter(|dir| !workspace_root.starts_with(dir)),
            );
        }

        Ok(Self {
            workspace_root,
            forbidden_paths,
        })
    }

    /// Check if a path is safe to edit.
    ///
    /// Returns the canonicalized absolute path if safe. Relative paths resolve
    /// against the workspace root.
    pub fn validate_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, SafetyError> {
        let path = path.as_ref();
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        };

        let canonical = canonicalize(&absolute)?;
        self.check_canonical(&canonical)?;
        Ok(canonical)
    }

    /// Re-validate a previously-validated canonical path right before a write.
    pub fn revalidate(&self, path: &Path) -> Result<PathBuf, SafetyError> {
        let canonical = canonicalize(path)?;
        self.check_canonical(&canonical)?;
        Ok(canonical)
    }

    /// Path of a validated canonical file relative to the workspace root.
    pub fn relative(&self, canonical: &Path) -> PathBuf {
        canonical
            .strip_prefix(&self.workspace_root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| canonical.to_path_buf())
    }

    fn check_canonical(&self, canonical: &Path) -> Result<(), SafetyError> {
        if !canonical.starts_with(&self.workspace_root) {
            return Err(SafetyError::OutsideWorkspace {
                path: canonical.to_path_buf(),
                workspace: self.workspace_root.clone(),
            });
        }

        for forbidden in &self.forbidden_paths {
            if canonical.starts_with(forbidden) {
                return Err(SafetyError::ForbiddenPath {
                    path: canonical.to_path_buf(),
                    forbidden: forbidden.clone(),
                });
            }
        }

        Ok(())
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Create a guard with custom forbidden paths (for testing).
    #[cfg(test)]
    pub fn with_forbidden(
        workspace_root: impl AsRef<Path>,
        forbidden: Vec<PathBuf>,
    ) -> Result<Self, SafetyError> {
        let workspace_root = canonicalize(workspace_root.as_ref())?;
        Ok(Self {
            workspace_root,
            forbidden_paths: forbidden,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_validate_path_inside_workspace() {
        let temp_dir = tempfile::tempdir().unwrap();
        let workspace = temp_dir.path();
        let guard = WorkspaceGuard::new(workspace).unwrap();

        let file = workspace.join("pkg/app.py");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, b"").unwrap();

        let canonical = guard.validate_path(&file).unwrap();
        assert_eq!(guard.relative(&canonical), PathBuf::from("pkg/app.py"));
    }

    #[test]
    fn test_validate_path_outside_workspace() {
        let temp_dir = tempfile::tempdir().unwrap();
        let workspace = temp_dir.path().join("workspace");
        fs::create_dir_all(&workspace).unwrap();
        let guard = WorkspaceGuard::new(&workspace).unwrap();

        let outside = temp_dir.path().join("outside.py");
        fs::write(&outside, b"").unwrap();

        let result = guard.validate_path(&outside);
        assert!(matches!(result, Err(SafetyError::OutsideWorkspace { .. })));

        let result = guard.validate_path("../outside.py");
        assert!(matches!(result, Err(SafetyError::OutsideWorkspace { .. })));
    }

    #[test]
    fn test_virtualenv_is_forbidden() {
        let temp_dir = tempfile::tempdir().unwrap();
        let workspace = temp_dir.path();
        let site = workspace.join(".venv/lib/site-packages");
        fs::create_dir_all(&site).unwrap();
        fs::write(site.join("dep.py"), b"").unwrap();

        let guard = WorkspaceGuard::new(workspace).unwrap();
        let result = guard.validate_path(".venv/lib/site-packages/dep.py");
        assert!(matches!(result, Err(SafetyError::ForbiddenPath { .. })));
    }

    #[test]
    fn test_validate_path_forbidden() {
        let temp_dir = tempfile::tempdir().unwrap();
        let workspace = temp_dir.path();
        let forbidden = workspace.join("vendored");
        fs::create_dir_all(&forbidden).unwrap();

        let guard = WorkspaceGuard::with_forbidden(workspace, vec![forbidden.canonicalize().unwrap()])
            .unwrap();

        let file = forbidden.join("lib.py");
        fs::write(&file, b"").unwrap();

        let result = guard.validate_path(&file);
        assert!(matches!(result, Err(SafetyError::ForbiddenPath { .. })));
    }

    #[test]
    fn test_missing_file_fails_canonicalize() {
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = WorkspaceGuard::new(temp_dir.path()).unwrap();
        assert!(matches!(
            guard.validate_path("missing.py"),
            Err(SafetyError::Canonicalize { .. })
        ));
    }

    #[test]
    #[cfg(unix)]
    fn test_validate_symlink_escape() {
        use std::os::unix::fs::symlink;

        let temp_dir = tempfile::tempdir().unwrap();
        let workspace = temp_dir.path().join("workspace");
        fs::create_dir_all(&workspace).unwrap();

        let outside = temp_dir.path().join("outside.py");
        fs::write(&outside, b"").unwrap();

        let link = workspace.join("escape.py");
        symlink(&outside, &link).unwrap();

        let guard = WorkspaceGuard::new(&workspace).unwrap();
        let result = guard.validate_path(&link);

        assert!(matches!(result, Err(SafetyError::OutsideWorkspace { .. })));
    }
}
