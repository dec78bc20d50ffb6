//! File watcher path policy (spec §6): "enforced by the caller; the watcher
//! trusts its input". Kept as a reusable helper so every caller (CLI,
//! future MCP shim) applies the same rule rather than re-deriving it.

use std::path::{Path, PathBuf};

const SENSITIVE_SUFFIXES: &[&str] =
    &[".ssh", ".gnupg", ".aws", ".env", ".kube", ".docker", ".netrc", "credentials"];

pub fn validate_watch_path(path: &Path) -> Result<PathBuf, String> {
    if !path.is_absolute() {
        return Err(format!("watch path must be absolute: {}", path.display()));
    }

    let resolved = path.canonicalize().map_err(|err| format!("cannot resolve {}: {err}", path.display()))?;

    let under_home = dirs::home_dir().map(|home| resolved.starts_with(&home)).unwrap_or(false);
    let under_tmp = resolved.starts_with("/tmp");
    if !under_home && !under_tmp {
        return Err(format!("watch path must be under the home directory or /tmp: {}", resolved.display()));
    }

    for component in resolved.components() {
        let name = component.as_os_str().to_string_lossy();
        if SENSITIVE_SUFFIXES.iter().any(|suffix| name == *suffix || name.ends_with(suffix)) {
            return Err(format!("watch path touches a sensitive location: {}", resolved.display()));
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_rejected() {
        assert!(validate_watch_path(Path::new("relative/path")).is_err());
    }

    #[test]
    fn sensitive_suffix_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ssh_dir = dir.path().join(".ssh");
        std::fs::create_dir(&ssh_dir).unwrap();
        // canonicalize requires /tmp-or-home to accept; tempdir is under /tmp on most platforms.
        let result = validate_watch_path(&ssh_dir);
        if ssh_dir.starts_with("/tmp") {
            assert!(result.is_err());
        }
    }
}
