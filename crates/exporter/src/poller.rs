//! Stick polling thread
//!
//! All USB work runs on a dedicated OS thread so blocking transfers never
//! stall the Tokio runtime serving metrics. The thread owns the
//! [`DeviceContext`] and every [`Stick`]; the runtime talks to it through an
//! async channel bridge and reads results from the shared
//! [`Readings`](crate::metrics::Readings) table.

use crate::config::{FailurePolicy, PollSettings};
use crate::metrics::SharedReadings;
use anyhow::{Result, anyhow};
use async_channel::{Receiver, Sender, TryRecvError, bounded, unbounded};
use driver::{DeviceContext, Stick, UsbBus};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How often the thread checks for commands while waiting for the next poll
const COMMAND_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Commands from the runtime to the poller thread
#[derive(Debug)]
pub enum PollCommand {
    /// Release all sticks, close the USB context and exit
    Shutdown,
}

/// Events from the poller thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    /// Sticks are initialized and the first round of readings is in
    Ready { found: usize, live: usize },
    /// A stick failed and was released; the others keep running
    StickRetired { index: usize, reason: String },
    /// The poller stopped because of an error
    Failed { reason: String },
}

/// Runtime side of the poller bridge
#[derive(Clone)]
pub struct PollerBridge {
    command_tx: Sender<PollCommand>,
    event_rx: Receiver<PollEvent>,
}

impl PollerBridge {
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(PollCommand::Shutdown)
            .await
            .map_err(|_| anyhow!("Poller thread has already exited"))
    }

    /// Next event, or `None` once the poller thread has exited
    pub async fn next_event(&self) -> Option<PollEvent> {
        self.event_rx.recv().await.ok()
    }
}

/// Thread side of the poller bridge
pub struct PollerEnd {
    command_rx: Receiver<PollCommand>,
    event_tx: Sender<PollEvent>,
}

impl PollerEnd {
    fn shutdown_requested(&self) -> bool {
        match self.command_rx.try_recv() {
            Ok(PollCommand::Shutdown) => true,
            Err(TryRecvError::Closed) => true,
            Err(TryRecvError::Empty) => false,
        }
    }

    fn emit(&self, event: PollEvent) {
        if self.event_tx.send_blocking(event).is_err() {
            debug!("Poll event dropped, runtime side is gone");
        }
    }
}

/// Create the channel pair connecting the runtime and the poller thread
pub fn create_poller_bridge() -> (PollerBridge, PollerEnd) {
    let (command_tx, command_rx) = bounded(4);
    let (event_tx, event_rx) = unbounded();

    (
        PollerBridge {
            command_tx,
            event_rx,
        },
        PollerEnd {
            command_rx,
            event_tx,
        },
    )
}

/// Spawn the poller thread on the system USB context
pub fn spawn_poller(
    settings: PollSettings,
    readings: SharedReadings,
    end: PollerEnd,
) -> std::io::Result<JoinHandle<Result<()>>> {
    thread::Builder::new()
        .name("stick-poller".to_string())
        .spawn(move || {
            let context = match DeviceContext::open() {
                Ok(context) => context,
                Err(e) => {
                    end.emit(PollEvent::Failed {
                        reason: e.to_string(),
                    });
                    return Err(e.into());
                }
            };
            run(context, &settings, &readings, &end)
        })
}

/// Poll the sticks of `context` until shutdown or a fatal failure
///
/// The context is closed on return, after every stick has been released.
pub fn run<B: UsbBus>(
    context: DeviceContext<B>,
    settings: &PollSettings,
    readings: &SharedReadings,
    end: &PollerEnd,
) -> Result<()> {
    let result = poll_sticks(&context, settings, readings, end);
    context.close();

    match &result {
        Ok(()) => info!("Poller stopped"),
        Err(e) => {
            error!("Poller failed: {:#}", e);
            end.emit(PollEvent::Failed {
                reason: format!("{:#}", e),
            });
        }
    }
    result
}

fn poll_sticks<B: UsbBus>(
    context: &DeviceContext<B>,
    settings: &PollSettings,
    readings: &SharedReadings,
    end: &PollerEnd,
) -> Result<()> {
    let found = context.catalog().count()?;
    if found == 0 {
        return Err(anyhow!("No sticks found"));
    }
    info!("Found {} stick(s)", found);
    readings.write().reset(found);

    let mut sticks: Vec<Option<Stick<'_, B::Handle>>> = Vec::with_capacity(found);
    for index in 0..found {
        match context.open_stick(index) {
            Ok(stick) => sticks.push(Some(stick)),
            Err(e) => match settings.on_failure {
                FailurePolicy::Abort => {
                    let what = format!("Stick {} unusable", index);
                    return Err(anyhow::Error::new(e).context(what));
                }
                FailurePolicy::Retire => {
                    warn!(stick = index, "Retiring stick: {}", e);
                    end.emit(PollEvent::StickRetired {
                        index,
                        reason: e.to_string(),
                    });
                    sticks.push(None);
                }
            },
        }
    }

    poll_round(&mut sticks, settings, readings, end)?;
    end.emit(PollEvent::Ready {
        found,
        live: live_count(&sticks),
    });

    let interval = settings.interval();
    let mut next_poll = Instant::now() + interval;

    loop {
        if end.shutdown_requested() {
            debug!("Shutdown requested");
            break;
        }

        let now = Instant::now();
        if now >= next_poll {
            poll_round(&mut sticks, settings, readings, end)?;
            next_poll += interval;
            if next_poll < now {
                // Reads took longer than the interval; don't try to catch up
                next_poll = now + interval;
            }
            continue;
        }

        thread::sleep(COMMAND_CHECK_INTERVAL.min(next_poll - now));
    }

    for stick in sticks.iter_mut().flatten() {
        stick.release();
    }
    Ok(())
}

/// Read every live stick once
fn poll_round<H: driver::StickIo>(
    sticks: &mut [Option<Stick<'_, H>>],
    settings: &PollSettings,
    readings: &SharedReadings,
    end: &PollerEnd,
) -> Result<()> {
    for slot in sticks.iter_mut() {
        let Some(stick) = slot.as_mut() else {
            continue;
        };
        let index = stick.index();

        match stick.sample(settings.offset_for(index)) {
            Ok(sample) => {
                debug!(stick = index, celsius = sample.celsius, "Polled stick");
                readings.write().record(index, sample);
            }
            Err(e) => match settings.on_failure {
                FailurePolicy::Abort => {
                    let what = format!("Stick {} read failed", index);
                    return Err(anyhow::Error::new(e).context(what));
                }
                FailurePolicy::Retire => {
                    warn!(stick = index, "Retiring stick after read failure: {}", e);
                    readings.write().clear(index);
                    if let Some(mut stick) = slot.take() {
                        stick.release();
                    }
                    end.emit(PollEvent::StickRetired {
                        index,
                        reason: e.to_string(),
                    });
                }
            },
        }
    }

    if live_count(sticks) == 0 {
        return Err(anyhow!("No usable sticks left"));
    }
    Ok(())
}

fn live_count<H: driver::StickIo>(sticks: &[Option<Stick<'_, H>>]) -> usize {
    sticks.iter().filter(|s| s.is_some()).count()
}
