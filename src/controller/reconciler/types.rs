//! # Reconciler Types
//!
//! The [`Reconciler`] context shared by every reconcile, destroy and plan call.

use super::commands::KindCommands;
use super::error::ReconcilerError;
use crate::config::ReconcilerConfig;
use crate::controller::certificates::{CertificatePipeline, ReloadHook};
use crate::controller::executor::classify::diagnostic;
use crate::controller::executor::{
    ExecOptions, ExecutionResult, Outcome, OutcomeClassifier, ProcessExecutor,
};
use crate::controller::resource::{ResourceKey, ResourceKind};
use crate::controller::secrets::SecretBundle;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, Semaphore};
use tracing::debug;

/// Reconciler context
///
/// Holds no resource state between calls: every pass starts from a fresh
/// describe.
pub struct Reconciler {
    pub(crate) executor: Arc<dyn ProcessExecutor>,
    pub(crate) config: ReconcilerConfig,
    pub(crate) classifier: OutcomeClassifier,
    pub(crate) commands: HashMap<ResourceKind, KindCommands>,
    pub(crate) certificates: CertificatePipeline,
    pub(crate) reload_hooks: BTreeMap<String, ReloadHook>,
    /// One async mutex per `(kind, name)`, created on first use
    identity_locks: Mutex<HashMap<ResourceKey, Arc<AsyncMutex<()>>>>,
    /// Bounds `reconcile_all` fan-out
    pub(crate) permits: Arc<Semaphore>,
}

/// Held identity lock; drops the map entry once nobody else refers to it
pub(crate) struct IdentityGuard<'a> {
    locks: &'a Mutex<HashMap<ResourceKey, Arc<AsyncMutex<()>>>>,
    key: ResourceKey,
    lock: Arc<AsyncMutex<()>>,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdentityGuard<'_> {
    fn drop(&mut self) {
        drop(self.held.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and this guard are the only owners when no caller waits
        let unshared = locks
            .get(&self.key)
            .is_some_and(|entry| Arc::ptr_eq(entry, &self.lock) && Arc::strong_count(entry) == 2);
        if unshared {
            locks.remove(&self.key);
        }
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("kinds", &self.commands.keys().collect::<Vec<_>>())
            .field("certificates", &self.certificates)
            .field("reload_hooks", &self.reload_hooks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Build a reconciler with the built-in command templates
    ///
    /// # Errors
    ///
    /// [`ReconcilerError::Config`] for an invalid marker regex or a zero
    /// concurrency limit.
    pub fn new(
        executor: Arc<dyn ProcessExecutor>,
        config: ReconcilerConfig,
    ) -> Result<Self, ReconcilerError> {
        let classifier = OutcomeClassifier::new(&config.error_marker, &config.not_found_marker)
            .map_err(|e| ReconcilerError::Config(format!("invalid output marker: {e}")))?;
        if config.max_concurrent_reconciliations == 0 {
            return Err(ReconcilerError::Config(
                "MAX_CONCURRENT_RECONCILIATIONS must be at least 1".to_string(),
            ));
        }

        let commands = [ResourceKind::Vm, ResourceKind::SecretBundle]
            .into_iter()
            .filter_map(|kind| KindCommands::defaults_for(kind).map(|c| (kind, c)))
            .collect();
        let certificates = CertificatePipeline::new(
            Arc::clone(&executor),
            classifier.clone(),
            config.openssl_bin.clone(),
            config.cert_store_dir.clone(),
        )
        .with_timeout(config.command_timeout());
        let permits = Arc::new(Semaphore::new(config.max_concurrent_reconciliations));

        Ok(Self {
            executor,
            config,
            classifier,
            commands,
            certificates,
            reload_hooks: BTreeMap::new(),
            identity_locks: Mutex::new(HashMap::new()),
            permits,
        })
    }

    /// Replace the command templates for `kind`
    ///
    /// # Errors
    ///
    /// [`ReconcilerError::Config`] for `Certificate`, which is driven by the
    /// certificate pipeline rather than a CLI.
    pub fn with_commands(
        mut self,
        kind: ResourceKind,
        commands: KindCommands,
    ) -> Result<Self, ReconcilerError> {
        if kind == ResourceKind::Certificate {
            return Err(ReconcilerError::Config(
                "certificates take no command overrides".to_string(),
            ));
        }
        self.commands.insert(kind, commands);
        Ok(self)
    }

    #[must_use]
    pub fn with_reload_hook(mut self, hook: ReloadHook) -> Self {
        self.reload_hooks.insert(hook.name.clone(), hook);
        self
    }

    #[must_use]
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    #[must_use]
    pub fn certificates(&self) -> &CertificatePipeline {
        &self.certificates
    }

    pub(crate) fn kind_commands(&self, key: &ResourceKey) -> Result<&KindCommands, ReconcilerError> {
        self.commands
            .get(&key.kind)
            .ok_or_else(|| ReconcilerError::InvalidSpec {
                key: key.clone(),
                message: format!("no commands configured for kind {}", key.kind),
            })
    }

    pub(crate) fn exec_options(&self) -> ExecOptions {
        ExecOptions::with_timeout(self.config.command_timeout())
            .max_output_bytes(self.config.max_output_bytes)
    }

    /// Serialise work on one identity; held for a whole reconcile or destroy
    pub(crate) async fn lock_identity(&self, key: &ResourceKey) -> IdentityGuard<'_> {
        let lock = {
            let mut locks = self
                .identity_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        if lock.try_lock().is_err() {
            debug!("Waiting for in-flight operation on {}", key);
        }
        let held = Arc::clone(&lock).lock_owned().await;
        IdentityGuard {
            locks: &self.identity_locks,
            key: key.clone(),
            lock,
            held: Some(held),
        }
    }

    /// Identities with a lock entry, held or awaited
    #[cfg(test)]
    pub(crate) fn tracked_identities(&self) -> usize {
        self.identity_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run a mutating command and require logical success
    ///
    /// Diagnostics are passed through `bundle`'s redaction before they reach
    /// the error.
    pub(crate) async fn apply(
        &self,
        key: &ResourceKey,
        action: &'static str,
        program: &str,
        args: &[String],
        opts: &ExecOptions,
        bundle: Option<&SecretBundle>,
    ) -> Result<ExecutionResult, ReconcilerError> {
        let result = self.executor.run(program, args, opts).await?;
        let message = match self.classifier.classify(&result) {
            Outcome::Succeeded => return Ok(result),
            Outcome::NotFound => diagnostic(&result),
            Outcome::Failed { message, .. } => message,
        };
        let message = match bundle {
            Some(bundle) => bundle.redact(&message),
            None => message,
        };
        Err(ReconcilerError::ExternalCommandFailed {
            key: key.clone(),
            action,
            program: program.to_string(),
            exit_code: result.exit_code,
            message,
        })
    }
}
