//! Control socket location and permissions

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

const IPC_SOCKET_NAME: &str = "spanscope.sock";

/// Default control socket path
///
/// Uses the per-user runtime directory when the platform has one, otherwise a
/// `spanscope` directory under local data that only the owner can enter.
pub fn default_ipc_socket_path() -> Result<PathBuf> {
    if let Some(runtime_dir) = dirs::runtime_dir().filter(|dir| dir.is_dir()) {
        return Ok(runtime_dir.join(IPC_SOCKET_NAME));
    }

    let dir = dirs::data_local_dir()
        .context("Could not determine local data directory")?
        .join("spanscope");
    std::fs::create_dir_all(&dir).context("Failed to create socket directory")?;
    restrict_mode(&dir, 0o700)?;

    Ok(dir.join(IPC_SOCKET_NAME))
}

/// Make a bound socket readable and writable by its owner only
pub fn restrict_to_owner(socket_path: &Path) -> Result<()> {
    if socket_path.exists() {
        restrict_mode(socket_path, 0o600)?;
    }
    Ok(())
}

#[cfg(unix)]
fn restrict_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_socket_path() {
        let path = default_ipc_socket_path().unwrap();
        assert_eq!(path.file_name().unwrap(), IPC_SOCKET_NAME);
        assert!(path.is_absolute());
    }

    #[cfg(unix)]
    #[test]
    fn test_restrict_to_owner() {
        use std::os::unix::fs::PermissionsExt;

        let file = tempfile::NamedTempFile::new().unwrap();
        restrict_to_owner(file.path()).unwrap();

        let mode = std::fs::metadata(file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_missing_socket_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        assert!(restrict_to_owner(&dir.path().join("absent.sock")).is_ok());
    }
}
