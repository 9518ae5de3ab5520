//! # Certificate Pipeline Error Types

use super::CertificatePhase;
use crate::controller::executor::ExecError;
use crate::controller::parser::MalformedOutputError;
use std::path::PathBuf;
use thiserror::Error;

/// Step of leaf issuance that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningStage {
    KeyGeneration,
    Csr,
    Sign,
    SanVerification,
}

impl SigningStage {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningStage::KeyGeneration => "key_generation",
            SigningStage::Csr => "csr",
            SigningStage::Sign => "sign",
            SigningStage::SanVerification => "san_verification",
        }
    }
}

#[derive(Debug, Error)]
pub enum CertificateError {
    /// `CAGenerationError`
    #[error("CA generation failed for '{common_name}': {message}")]
    CaGeneration { common_name: String, message: String },
    /// `CertificateSigningError`
    #[error("leaf '{name}' failed at {}: {message}", stage.as_str())]
    Signing {
        name: String,
        stage: SigningStage,
        message: String,
    },
    /// `ConfigValidationError`: no reload was issued
    #[error("configuration validation failed for service '{service}': {message}")]
    ConfigValidation { service: String, message: String },
    /// Validation passed but the reload command failed
    #[error("reload failed for service '{service}': {message}")]
    Reload { service: String, message: String },
    /// `InsecurePermissionsError`
    #[error("private key {} has mode {mode:o}, expected owner-only access", path.display())]
    InsecurePermissions { path: PathBuf, mode: u32 },
    #[error("invalid certificate request: {0}")]
    InvalidRequest(String),
    #[error("certificate phase cannot move from {from} to {to}")]
    InvalidTransition {
        from: CertificatePhase,
        to: CertificatePhase,
    },
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("stored certificate metadata is unreadable: {0}")]
    Metadata(#[from] MalformedOutputError),
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CertificateError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| CertificateError::Io { path, source }
    }

    /// Stable reason label for metrics and logs
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateError::CaGeneration { .. } => "ca_generation",
            CertificateError::Signing { .. } => "certificate_signing",
            CertificateError::ConfigValidation { .. } => "config_validation",
            CertificateError::Reload { .. } => "reload_failed",
            CertificateError::InsecurePermissions { .. } => "insecure_permissions",
            CertificateError::InvalidRequest(_) => "invalid_request",
            CertificateError::InvalidTransition { .. } => "invalid_transition",
            CertificateError::Exec(e) => e.as_str(),
            CertificateError::Metadata(_) => "malformed_output",
            CertificateError::Io { .. } => "io",
        }
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            CertificateError::Exec(e) => e.is_transient(),
            CertificateError::Reload { .. } | CertificateError::Io { .. } => true,
            _ => false,
        }
    }

    /// Operator-facing hint for permanent failures
    #[must_use]
    pub fn remediation(&self) -> String {
        match self {
            CertificateError::CaGeneration { .. } => {
                "Check that the openssl binary works and the certificate store directory is writable".to_string()
            }
            CertificateError::Signing { stage, .. } => match stage {
                SigningStage::SanVerification => {
                    "Check that every subject alternative name is a valid DNS name or IP literal".to_string()
                }
                _ => "Check that the CA key is readable and matches the CA certificate".to_string(),
            },
            CertificateError::ConfigValidation { service, .. } => format!(
                "Fix the configuration of '{service}'; the previous certificate files were restored and no reload was sent"
            ),
            CertificateError::InsecurePermissions { path, .. } => format!(
                "Ensure the filesystem holding {} supports POSIX permissions and the process owns the file",
                path.display()
            ),
            other => other.to_string(),
        }
    }
}
