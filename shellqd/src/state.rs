//! Shared application state for the control API.

use shellq::active::ActiveJobSlot;
use shellq::cancel::CancelSignal;

/// Handles the API shares with the worker. Cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub cancel: CancelSignal,
    pub active: ActiveJobSlot,
}

impl AppState {
    pub fn new(cancel: CancelSignal, active: ActiveJobSlot) -> Self {
        Self { cancel, active }
    }
}
