//! Write and operation gates
//!
//! `WriteController` is consulted before every destructive action;
//! `OperationController` is shared by all channel threads and the backup
//! thread so one registered disruption halts the whole storage system.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::error;

use crate::error::{Result, StoreError};

/// Gate for writes and destructive file actions
pub trait WriteController: Send + Sync {
    /// Fails if the storage must not be written at all
    fn validate_is_writable(&self) -> Result<()>;

    fn is_file_cleanup_enabled(&self) -> bool;

    fn is_file_deletion_enabled(&self) -> bool;

    fn is_backup_enabled(&self) -> bool;
}

/// Switchable write controller, everything enabled by default
#[derive(Debug)]
pub struct SwitchableWriteController {
    writable: AtomicBool,
    file_cleanup: AtomicBool,
    file_deletion: AtomicBool,
    backup: AtomicBool,
}

impl Default for SwitchableWriteController {
    fn default() -> Self {
        Self {
            writable: AtomicBool::new(true),
            file_cleanup: AtomicBool::new(true),
            file_deletion: AtomicBool::new(true),
            backup: AtomicBool::new(true),
        }
    }
}

impl SwitchableWriteController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_writable(&self, enabled: bool) {
        self.writable.store(enabled, Ordering::SeqCst);
    }

    pub fn set_file_cleanup_enabled(&self, enabled: bool) {
        self.file_cleanup.store(enabled, Ordering::SeqCst);
    }

    pub fn set_file_deletion_enabled(&self, enabled: bool) {
        self.file_deletion.store(enabled, Ordering::SeqCst);
    }

    pub fn set_backup_enabled(&self, enabled: bool) {
        self.backup.store(enabled, Ordering::SeqCst);
    }
}

impl WriteController for SwitchableWriteController {
    fn validate_is_writable(&self) -> Result<()> {
        if self.writable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::ProcessingDisabled(
                "storage is not writable".to_string(),
            ))
        }
    }

    fn is_file_cleanup_enabled(&self) -> bool {
        self.writable.load(Ordering::SeqCst) && self.file_cleanup.load(Ordering::SeqCst)
    }

    fn is_file_deletion_enabled(&self) -> bool {
        self.writable.load(Ordering::SeqCst) && self.file_deletion.load(Ordering::SeqCst)
    }

    fn is_backup_enabled(&self) -> bool {
        self.backup.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Operation Controller
// =============================================================================

/// Shared processing switch and disruption registry
#[derive(Debug)]
pub struct OperationController {
    processing_enabled: AtomicBool,
    shutdown_requested: AtomicBool,
    disruptions: Mutex<Vec<String>>,
}

impl Default for OperationController {
    fn default() -> Self {
        Self {
            processing_enabled: AtomicBool::new(true),
            shutdown_requested: AtomicBool::new(false),
            disruptions: Mutex::new(Vec::new()),
        }
    }
}

impl OperationController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_processing_enabled(&self) -> bool {
        self.processing_enabled.load(Ordering::SeqCst)
    }

    /// Error describing the first disruption if processing is disabled
    pub fn validate_processing_enabled(&self) -> Result<()> {
        if self.check_processing_enabled() {
            return Ok(());
        }
        let reason = self
            .disruptions
            .lock()
            .first()
            .cloned()
            .unwrap_or_else(|| "processing deactivated".to_string());
        Err(StoreError::ProcessingDisabled(reason))
    }

    /// Record a fatal error and stop all processing
    pub fn register_disruption(&self, error: &StoreError) {
        error!(%error, "storage disruption, deactivating processing");
        self.disruptions.lock().push(error.to_string());
        self.processing_enabled.store(false, Ordering::SeqCst);
    }

    pub fn deactivate_processing(&self) {
        self.processing_enabled.store(false, Ordering::SeqCst);
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn disruptions(&self) -> Vec<String> {
        self.disruptions.lock().clone()
    }

    pub fn has_disruptions(&self) -> bool {
        !self.disruptions.lock().is_empty()
    }
}
