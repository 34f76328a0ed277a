use std::sync::{Arc, Mutex, PoisonError};

use crate::error::Result;

/// Something that can be started and stopped on demand.
pub trait StreamControl: Send + Sync {
    fn start_stream(&self) -> Result<()>;
    fn stop_stream(&self) -> Result<()>;
}

/// Starts streaming when the first viewer arrives and stops it when the
/// last one leaves. A start that failed is retried by the next viewer to
/// join.
pub struct ViewerGate<C: StreamControl> {
    control: Arc<C>,
    state: Mutex<GateState>,
}

#[derive(Default)]
struct GateState {
    viewers: usize,
    started: bool,
}

impl<C: StreamControl + 'static> ViewerGate<C> {
    pub fn new(control: Arc<C>) -> Arc<Self> {
        Arc::new(Self {
            control,
            state: Mutex::new(GateState::default()),
        })
    }

    pub fn join(self: &Arc<Self>) -> ViewerTicket<C> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.viewers += 1;
        if !state.started {
            log::info!("viewer connected ({} watching), starting stream", state.viewers);
            match self.control.start_stream() {
                Ok(()) => state.started = true,
                Err(e) => log::warn!("could not start stream: {}", e),
            }
        }
        ViewerTicket {
            gate: Some(self.clone()),
        }
    }

    pub fn viewers(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).viewers
    }

    fn leave(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.viewers = state.viewers.saturating_sub(1);
        if state.viewers == 0 && state.started {
            log::info!("last viewer left, stopping stream");
            state.started = false;
            if let Err(e) = self.control.stop_stream() {
                log::warn!("could not stop stream: {}", e);
            }
        }
    }
}

/// A viewer's place in the gate. Dropping it leaves.
pub struct ViewerTicket<C: StreamControl + 'static> {
    gate: Option<Arc<ViewerGate<C>>>,
}

impl<C: StreamControl + 'static> Drop for ViewerTicket<C> {
    fn drop(&mut self) {
        if let Some(gate) = self.gate.take() {
            gate.leave();
        }
    }
}
