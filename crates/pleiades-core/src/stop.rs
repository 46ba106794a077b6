//! Cooperative stop signal shared by the pipeline tasks
//!
//! A single [`StopHandle`] broadcasts the stop request; any number of
//! [`StopSignal`] clones observe it. Once fired the signal stays fired.

use std::sync::Arc;

use tokio::sync::watch;

/// Create a connected stop handle and signal
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx: Arc::new(tx) }, StopSignal { rx })
}

/// Sending side of the stop signal
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Request every observer to stop
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// Whether stop has been requested
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Create another observer of this handle
    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving side of the stop signal
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// Whether stop has been requested
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once stop has been requested.
    ///
    /// Also resolves when every [`StopHandle`] has been dropped, since nothing
    /// could fire the signal afterwards.
    pub async fn stopped(&mut self) {
        // wait_for checks the current value first, so an already-fired signal
        // resolves immediately
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}
