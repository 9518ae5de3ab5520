//! # Key File Permissions
//!
//! Private keys must be owner read/write only. Every key write is followed by
//! an explicit chmod and a read-back; a filesystem that ignores the mode is a
//! fatal error, not a warning.

use super::error::CertificateError;
use crate::constants::{CERTIFICATE_MODE, PRIVATE_KEY_MODE};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::{debug, error};

/// Set `0600` on `path` and verify it took effect
///
/// # Errors
///
/// Returns [`CertificateError::InsecurePermissions`] when the mode cannot be
/// set or the read-back still grants group/other access.
pub async fn secure_private_key(path: &Path) -> Result<(), CertificateError> {
    let mut perms = tokio::fs::metadata(path)
        .await
        .map_err(CertificateError::io(path))?
        .permissions();
    perms.set_mode(PRIVATE_KEY_MODE);
    if let Err(e) = tokio::fs::set_permissions(path, perms).await {
        error!("Failed to restrict {}: {}", path.display(), e);
        return Err(CertificateError::InsecurePermissions {
            path: path.to_path_buf(),
            mode: current_mode(path).await.unwrap_or(0),
        });
    }
    verify_private_key(path).await
}

/// Check that `path` grants nothing to group or other
///
/// # Errors
///
/// Returns [`CertificateError::InsecurePermissions`] otherwise.
pub async fn verify_private_key(path: &Path) -> Result<(), CertificateError> {
    let mode = current_mode(path).await.map_err(CertificateError::io(path))?;
    if mode & 0o077 != 0 {
        error!(
            "Private key {} has mode {:o} after chmod",
            path.display(),
            mode
        );
        return Err(CertificateError::InsecurePermissions {
            path: path.to_path_buf(),
            mode,
        });
    }
    debug!("Verified owner-only permissions on {}", path.display());
    Ok(())
}

/// Certificates are public; make them world-readable
///
/// # Errors
///
/// Returns [`CertificateError::Io`] when the mode cannot be set.
pub async fn set_certificate_mode(path: &Path) -> Result<(), CertificateError> {
    let mut perms = tokio::fs::metadata(path)
        .await
        .map_err(CertificateError::io(path))?
        .permissions();
    perms.set_mode(CERTIFICATE_MODE);
    tokio::fs::set_permissions(path, perms)
        .await
        .map_err(CertificateError::io(path))
}

async fn current_mode(path: &Path) -> std::io::Result<u32> {
    Ok(tokio::fs::metadata(path).await?.permissions().mode() & 0o777)
}
