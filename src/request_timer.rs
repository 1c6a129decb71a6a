/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-client request timer driving liveness signalling.
//!
//! A timer is armed when a request of the client enters processing and disarmed when the
//! client's request retires. If it expires first, the replica has failed to order the request in
//! time (on a backup this points at a silent or faulty primary) and the timeout handler is
//! invoked with the view that was current when the timer was armed. Arming a running timer
//! restarts it.
//!
//! Each timer is an owned task: a thread spawned lazily on first arm, driven entirely through a
//! control channel, exiting when the owning client state is dropped.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::types::basic::{ClientId, ViewNumber};

/// Supplies the current request timeout duration.
///
/// Read every time a timer is armed, so a future view-change module can lengthen the timeout
/// dynamically. Today it returns the configured constant.
pub(crate) type TimeoutProvider = Arc<dyn Fn() -> Duration + Send + Sync>;

/// Invoked when a request timer expires, with the view captured at arming time.
pub(crate) type TimeoutHandler = Arc<dyn Fn(ClientId, ViewNumber) + Send + Sync>;

enum TimerCommand {
    Start(ViewNumber),
    Stop,
}

/// Handle to one client's timer task.
pub(crate) struct RequestTimer {
    client: ClientId,
    control: Mutex<Option<Sender<TimerCommand>>>,
    timeout_provider: TimeoutProvider,
    timeout_handler: TimeoutHandler,
}

impl RequestTimer {
    pub(crate) fn new(
        client: ClientId,
        timeout_provider: TimeoutProvider,
        timeout_handler: TimeoutHandler,
    ) -> RequestTimer {
        RequestTimer {
            client,
            control: Mutex::new(None),
            timeout_provider,
            timeout_handler,
        }
    }

    /// Arm the timer, capturing `view` now. If the timer is already running it is restarted with
    /// a fresh deadline.
    pub(crate) fn start(&self, view: ViewNumber) {
        let mut control = self.control.lock().unwrap();
        let sender = control.get_or_insert_with(|| self.spawn());
        if sender.send(TimerCommand::Start(view)).is_err() {
            // The task exited (the process is shutting down); arming is moot.
            *control = None;
        }
    }

    /// Disarm the timer if it has not already expired or been stopped.
    pub(crate) fn stop(&self) {
        if let Some(sender) = &*self.control.lock().unwrap() {
            let _ = sender.send(TimerCommand::Stop);
        }
    }

    fn spawn(&self) -> Sender<TimerCommand> {
        let (sender, receiver) = mpsc::channel();
        let client = self.client;
        let timeout_provider = self.timeout_provider.clone();
        let timeout_handler = self.timeout_handler.clone();

        thread::spawn(move || {
            let mut armed: Option<(ViewNumber, Instant)> = None;
            loop {
                let command = match armed {
                    None => match receiver.recv() {
                        Ok(command) => command,
                        Err(_) => return,
                    },
                    Some((view, deadline)) => {
                        let now = Instant::now();
                        if now >= deadline {
                            fire(client, view, &timeout_handler);
                            armed = None;
                            continue;
                        }
                        match receiver.recv_timeout(deadline - now) {
                            Ok(command) => command,
                            Err(RecvTimeoutError::Timeout) => {
                                fire(client, view, &timeout_handler);
                                armed = None;
                                continue;
                            }
                            Err(RecvTimeoutError::Disconnected) => return,
                        }
                    }
                };
                match command {
                    TimerCommand::Start(view) => {
                        armed = Some((view, Instant::now() + timeout_provider()))
                    }
                    TimerCommand::Stop => armed = None,
                }
            }
        });

        sender
    }
}

fn fire(client: ClientId, view: ViewNumber, timeout_handler: &TimeoutHandler) {
    log::warn!("request timer expired: client={} view={}", client, view);
    timeout_handler(client, view);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::Receiver;
    use std::time::Duration;

    fn test_timer(timeout: Duration) -> (RequestTimer, Receiver<(ClientId, ViewNumber)>) {
        let (fired, firings) = mpsc::channel();
        let fired = Mutex::new(fired);
        let timer = RequestTimer::new(
            ClientId::new(1),
            Arc::new(move || timeout),
            Arc::new(move |client, view| {
                let _ = fired.lock().unwrap().send((client, view));
            }),
        );
        (timer, firings)
    }

    #[test]
    fn expiry_reports_the_view_captured_at_arming_time() {
        let (timer, firings) = test_timer(Duration::from_millis(20));
        timer.start(ViewNumber::new(4));
        let (client, view) = firings.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(client, ClientId::new(1));
        assert_eq!(view, ViewNumber::new(4));
        // Expiry disarms; there is no second firing.
        assert!(firings.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn stopping_prevents_the_firing() {
        let (timer, firings) = test_timer(Duration::from_millis(50));
        timer.start(ViewNumber::init());
        timer.stop();
        assert!(firings.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn restarting_replaces_the_armed_view_and_deadline() {
        let (timer, firings) = test_timer(Duration::from_millis(60));
        timer.start(ViewNumber::new(0));
        thread::sleep(Duration::from_millis(30));
        timer.start(ViewNumber::new(1));
        thread::sleep(Duration::from_millis(40));
        // The restart pushed the first deadline out; nothing has fired yet.
        assert!(firings.try_recv().is_err());
        let (_, view) = firings.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(view, ViewNumber::new(1));
    }
}
