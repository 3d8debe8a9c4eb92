//! Dispatcher thread for the decoupled model

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::debug;

use super::pipeline::{Pipeline, RawFrame};
use crate::stop::StopSignal;

/// How often an idle dispatcher checks the stop signal
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Spawn the thread that verifies and delivers queued frames.
///
/// Exits when stopped or when every producer has gone, delivering whatever is
/// already queued first. Returns the number of frames handled.
pub(super) fn spawn_dispatcher(
    rx: Receiver<RawFrame>,
    pipeline: Arc<Pipeline>,
    stop: StopSignal,
) -> io::Result<JoinHandle<u64>> {
    thread::Builder::new()
        .name("skai-dispatcher".to_string())
        .spawn(move || {
            let mut handled = 0u64;
            while !stop.is_set() {
                match rx.recv_timeout(STOP_POLL_INTERVAL) {
                    Ok(frame) => {
                        pipeline.deliver(frame);
                        handled += 1;
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }

            for frame in rx.try_iter() {
                pipeline.deliver(frame);
                handled += 1;
            }
            debug!(handled, "Dispatcher exiting");
            handled
        })
}
