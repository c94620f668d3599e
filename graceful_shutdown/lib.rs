use std::sync::{Arc, Mutex};

use tokio::select;
use tokio::signal::ctrl_c;
use tokio::sync::watch;
use tokio::task::JoinHandle;

type ShutdownOp = Box<dyn FnOnce() + Send>;

/// One-shot fan-out of a shutdown signal to any number of waiting consumers
/// and registered cleanup ops.
pub struct GracefulShutdown {
    // Flips to true exactly once, when shutdown starts.
    started_tx: watch::Sender<bool>,
    // Held so the sender always has a receiver; a send into a watch channel
    // with no receivers is dropped instead of stored.
    started_rx: watch::Receiver<bool>,
    ops: Mutex<OpList>,
}

struct OpList {
    fired: bool,
    ops: Vec<ShutdownOp>,
}

#[derive(Clone, Debug)]
pub struct GracefulShutdownConsumer(watch::Receiver<bool>);

impl GracefulShutdown {
    pub fn new() -> GracefulShutdown {
        let (started_tx, started_rx) = watch::channel(false);

        GracefulShutdown {
            started_tx,
            started_rx,
            ops: Mutex::new(OpList {
                fired: false,
                ops: Vec::new(),
            }),
        }
    }

    pub fn consumer(&self) -> GracefulShutdownConsumer {
        GracefulShutdownConsumer(self.started_rx.clone())
    }

    pub fn shutting_down(&self) -> bool {
        *self.started_rx.borrow()
    }

    /// Register a cleanup op to run exactly once when shutdown starts. An op
    /// registered after the shutdown broadcast runs immediately instead.
    pub fn on_shutdown<F: FnOnce() + Send + 'static>(&self, op: F) {
        let mut list = self.ops.lock().unwrap();
        if list.fired {
            drop(list);
            op();
        } else {
            list.ops.push(Box::new(op));
        }
    }

    /// Broadcast the shutdown signal. Wakes every consumer and runs every
    /// registered op. Calling this more than once has no further effect.
    pub fn shutdown(&self) {
        let ops = {
            let mut list = self.ops.lock().unwrap();
            if list.fired {
                return;
            }
            list.fired = true;
            std::mem::take(&mut list.ops)
        };

        self.started_tx.send(true).ok();

        for op in ops {
            op();
        }
    }

    /// Broadcast shutdown when the process receives ctrl-c. The task exits on
    /// its own if shutdown is started some other way first.
    pub fn listen_for_ctrl_c(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        let mut consumer = self.consumer();
        tokio::spawn(async move {
            select! {
                _ = ctrl_c() => this.shutdown(),
                _ = consumer.wait_for_shutdown() => {}
            };
        })
    }
}

impl Default for GracefulShutdown {
    fn default() -> GracefulShutdown {
        GracefulShutdown::new()
    }
}

impl GracefulShutdownConsumer {
    pub fn shutting_down(&mut self) -> bool {
        *self.0.borrow()
    }

    pub async fn wait_for_shutdown(&mut self) -> () {
        loop {
            if *self.0.borrow() {
                return;
            }

            match self.0.changed().await {
                Ok(_) => {
                    if *self.0.borrow() == true {
                        return;
                    }
                }
                // Sender closed, which means we're shutting down.
                Err(_) => return,
            }
        }
    }
}
