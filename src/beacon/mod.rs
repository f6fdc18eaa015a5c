//! Best-effort delivery path for reports sent while the client is tearing down.
//!
//! Requests issued from feed tasks die with those tasks when the session is torn
//! down. The beacon owns a dedicated worker thread with its own runtime, so a
//! report enqueued during unload keeps travelling after every feed task is gone.
//! Enqueueing never blocks and never waits for delivery; failures are logged and
//! dropped.

use std::{
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};

use crate::{api::FeedApi, models::WatchReport};

enum BeaconCommand {
    Deliver {
        report: WatchReport,
        token: Option<String>,
    },
    Shutdown,
}

struct BeaconInner {
    sender: mpsc::Sender<BeaconCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for BeaconInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            // Queued reports are drained before the shutdown marker is reached.
            if let Err(err) = self.sender.send(BeaconCommand::Shutdown) {
                error!("Failed to send shutdown to beacon thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join beacon thread: {join_err:?}");
            }
        }
    }
}

#[derive(Clone)]
pub struct Beacon {
    inner: Arc<BeaconInner>,
}

impl Beacon {
    /// `api` should not share a connection pool with the feed's client: pooled
    /// connections belong to the runtime that opened them.
    pub fn new(api: Arc<dyn FeedApi>, timeout: Duration) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::channel::<BeaconCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let worker = thread::Builder::new()
            .name("reelfeed-beacon".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to build beacon runtime")));
                        return;
                    }
                };

                if ready_tx.send(Ok(())).is_err() {
                    error!("Beacon owner dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        BeaconCommand::Deliver { report, token } => {
                            let delivery = runtime.block_on(async {
                                let request = api.report_watch(&report, token.as_deref());
                                tokio::time::timeout(timeout, request).await
                            });
                            match delivery {
                                Ok(Ok(_)) => {
                                    info!(
                                        "Beacon delivered {}s for item {}",
                                        report.watched_seconds, report.item_id
                                    );
                                }
                                Ok(Err(err)) => {
                                    warn!(
                                        "Beacon delivery failed for item {}: {err:#}",
                                        report.item_id
                                    );
                                }
                                Err(_) => {
                                    warn!("Beacon delivery timed out for item {}", report.item_id);
                                }
                            }
                        }
                        BeaconCommand::Shutdown => break,
                    }
                }

                info!("Beacon thread shutting down");
            })
            .context("failed to spawn beacon worker thread")?;

        ready_rx
            .recv()
            .context("beacon worker exited before signaling readiness")??;

        Ok(Self {
            inner: Arc::new(BeaconInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    /// Hand a report to the worker. Returns as soon as it is queued.
    pub fn send(&self, report: WatchReport, token: Option<String>) -> Result<()> {
        self.inner
            .sender
            .send(BeaconCommand::Deliver { report, token })
            .map_err(|_| anyhow!("beacon worker is gone"))
    }
}
