//! OS signal bridging for process graphs.
//!
//! This module wires delivery of OS signals to the close protocol: each
//! bridge constructor returns a fresh process that is driven to close the
//! first time one of the requested signals arrives. Using that process as a
//! parent cascades shutdown across an entire tree on signal.
//!
//! On Unix the caller picks the exact signal set via
//! [`tokio::signal::unix::SignalKind`]; signals outside the set are left
//! alone. [`Process::with_ctrl_c`] is the cross-platform convenience for
//! the common interrupt-only case.

use tracing::{debug, warn};

use crate::process::Process;

#[cfg(unix)]
use crate::error::{Error, Result};

impl Process {
    /// Creates a process that closes when any of the given Unix signals is
    /// delivered to this program.
    ///
    /// The process is parented to [`Process::background`] so nothing drives
    /// it to close except signal delivery or an explicit close. The
    /// listener stands down once the process has begun closing by any
    /// means.
    ///
    /// # Errors
    ///
    /// Returns a signal error if any handler registration fails.
    ///
    /// # Example
    /// ```no_run
    /// # async fn demo() -> proc_graph::Result<()> {
    /// use proc_graph::Process;
    /// use tokio::signal::unix::SignalKind;
    ///
    /// let root = Process::with_signals([SignalKind::interrupt(), SignalKind::terminate()])?;
    /// root.closed().wait().await;
    /// # Ok(())
    /// # }
    /// ```
    #[cfg(unix)]
    pub fn with_signals<I>(signals: I) -> Result<Process>
    where
        I: IntoIterator<Item = tokio::signal::unix::SignalKind>,
    {
        use tokio::signal::unix::signal;

        let process = Process::with_parent(&Process::background());
        let mut streams = Vec::new();
        for kind in signals {
            let stream = signal(kind).map_err(|err| {
                Error::signal_with_source(
                    format!(
                        "failed to register handler for signal {}",
                        kind.as_raw_value()
                    ),
                    err,
                )
            })?;
            streams.push(stream);
        }

        let handle = process.clone();
        tokio::spawn(async move {
            if streams.is_empty() {
                return;
            }
            let closing = handle.closing();
            let delivered =
                futures::future::select_all(streams.iter_mut().map(|stream| Box::pin(stream.recv())));
            tokio::select! {
                _ = delivered => {
                    debug!(process_id = handle.id(), "signal received, closing process");
                    let _ = handle.close().await;
                }
                () = closing.wait() => {
                    // Closed by other means; stop listening.
                }
            }
        });

        Ok(process)
    }

    /// Creates a process that closes on Ctrl-C (SIGINT on Unix, the console
    /// interrupt event on Windows).
    ///
    /// Handler registration happens on the listener task; if it fails the
    /// failure is logged and the returned process simply will not be
    /// signal-closed.
    #[must_use]
    pub fn with_ctrl_c() -> Process {
        let process = Process::with_parent(&Process::background());
        let handle = process.clone();
        tokio::spawn(async move {
            let closing = handle.closing();
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    match result {
                        Ok(()) => {
                            debug!(process_id = handle.id(), "ctrl-c received, closing process");
                            let _ = handle.close().await;
                        }
                        Err(err) => {
                            warn!(error = %err, "ctrl-c handler registration failed");
                        }
                    }
                }
                () = closing.wait() => {}
            }
        });
        process
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessState;
    use std::time::Duration;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_with_signals_registers_cleanly() {
        use tokio::signal::unix::SignalKind;

        let result = tokio::time::timeout(Duration::from_secs(5), async {
            let process =
                Process::with_signals([SignalKind::hangup()]).expect("handler registration");
            assert_eq!(process.state(), ProcessState::Open);

            // Closing the process by hand retires the listener task.
            process.close().await.expect("clean close");
            assert_eq!(process.state(), ProcessState::Closed);
        })
        .await;

        assert!(result.is_ok(), "Test timed out after 5 seconds");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_with_signals_empty_set_stays_open() {
        let result = tokio::time::timeout(Duration::from_secs(5), async {
            let process = Process::with_signals(std::iter::empty()).expect("no registration");
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert_eq!(process.state(), ProcessState::Open);
        })
        .await;

        assert!(result.is_ok(), "Test timed out after 5 seconds");
    }

    #[tokio::test]
    async fn test_with_ctrl_c_stays_open_until_closed() {
        let result = tokio::time::timeout(Duration::from_secs(5), async {
            let process = Process::with_ctrl_c();
            assert_eq!(process.state(), ProcessState::Open);
            process.close().await.expect("clean close");
        })
        .await;

        assert!(result.is_ok(), "Test timed out after 5 seconds");
    }
}
