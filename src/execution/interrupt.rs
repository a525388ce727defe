//! Process-level interrupt handling.
//!
//! Ctrl+C terminates the process immediately. Workers are not drained and
//! in-flight external processes are not waited for; reruns rely on checkpoints.

use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::error::exit_codes;

static INTERRUPT_HANDLER: OnceLock<bool> = OnceLock::new();

/// Install the exit-on-interrupt handler once per process. Returns whether
/// this crate's handler is the active one.
pub fn install_interrupt_handler() -> bool {
    *INTERRUPT_HANDLER.get_or_init(|| {
        match ctrlc::set_handler(|| {
            warn!("Interrupt received, terminating immediately");
            std::process::exit(exit_codes::INTERRUPTED);
        }) {
            Ok(()) => true,
            Err(e) => {
                debug!("Interrupt handler not installed: {}", e);
                false
            }
        }
    })
}
