//! Dedicated thread running the event handler, and the handle used to
//! command it from elsewhere
//!
//! The thread alternates between invoking the handler and waiting up to one
//! poll interval for commands. Commands are therefore applied between
//! handler invocations, never during one.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use tracing::{error, info};

use super::{Mode, SharedStatus, Spll, SpllControl};
use crate::error::SpllError;
use crate::peripheral::{OscillatorDriver, SpllPeripheral};

type Reply = Sender<Result<(), SpllError>>;

enum Command {
    SetMode(Mode, Reply),
    SetPhaseShift(i32, Reply),
    EnablePtracker(usize, bool, Reply),
    SetAux(usize, bool, Reply),
    Shutdown,
}

/// Cloneable handle for commanding a running core
#[derive(Clone)]
pub struct SpllClient {
    tx: Sender<Command>,
    status: Arc<SharedStatus>,
}

impl SpllClient {
    fn request(&self, make: impl FnOnce(Reply) -> Command) -> Result<(), SpllError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(make(reply_tx))
            .map_err(|_| SpllError::Disconnected)?;
        reply_rx.recv().map_err(|_| SpllError::Disconnected)?
    }

    /// Ask the handler thread to exit after its current iteration
    pub fn shutdown(&self) -> Result<(), SpllError> {
        self.tx
            .send(Command::Shutdown)
            .map_err(|_| SpllError::Disconnected)
    }
}

impl SpllControl for SpllClient {
    fn set_mode(&mut self, mode: Mode) -> Result<(), SpllError> {
        self.request(|r| Command::SetMode(mode, r))
    }

    fn set_phase_shift(&mut self, units: i32) -> Result<(), SpllError> {
        self.request(|r| Command::SetPhaseShift(units, r))
    }

    fn enable_ptracker(&mut self, channel: usize, enable: bool) -> Result<(), SpllError> {
        self.request(|r| Command::EnablePtracker(channel, enable, r))
    }

    fn set_aux_enabled(&mut self, output: usize, enable: bool) -> Result<(), SpllError> {
        self.request(|r| Command::SetAux(output, enable, r))
    }

    fn status(&self) -> Arc<SharedStatus> {
        self.status.clone()
    }
}

/// A core running on its own thread
pub struct SpllRunner {
    handle: JoinHandle<()>,
    client: SpllClient,
}

impl SpllRunner {
    /// Bring up the oscillator, then start the handler thread in `mode`.
    ///
    /// Fails without spawning anything if the oscillator does not answer.
    pub fn spawn<P, O>(
        mut spll: Spll<P>,
        osc: &mut O,
        mode: Mode,
        poll_interval: Duration,
    ) -> Result<Self, SpllError>
    where
        P: SpllPeripheral + Send + 'static,
        O: OscillatorDriver + ?Sized,
    {
        osc.initialize()?;
        info!("Oscillator initialized");

        spll.set_mode(mode)?;

        let (tx, rx) = unbounded();
        let client = SpllClient {
            tx,
            status: spll.status(),
        };

        let handle = thread::Builder::new()
            .name("softpll".to_owned())
            .spawn(move || run(spll, rx, poll_interval))
            .map_err(|e| {
                error!("Failed to spawn SoftPLL thread: {e}");
                SpllError::Disconnected
            })?;

        Ok(Self { handle, client })
    }

    pub fn client(&self) -> SpllClient {
        self.client.clone()
    }

    /// Stop the handler thread and wait for it to exit
    pub fn join(self) -> Result<(), String> {
        // The thread may already be gone if every client was dropped
        let _ = self.client.shutdown();
        self.handle
            .join()
            .map_err(|_| "SoftPLL thread panicked".to_owned())
    }
}

fn run<P: SpllPeripheral>(mut spll: Spll<P>, rx: Receiver<Command>, poll_interval: Duration) {
    #[cfg(feature = "affinity")]
    pin_thread();

    info!("SoftPLL handler running");
    loop {
        spll.handle_irq();

        let cmd = match rx.recv_timeout(poll_interval) {
            Ok(cmd) => cmd,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if !apply(&mut spll, cmd) {
            break;
        }
        // Apply anything else already queued before the next handler call
        while let Ok(cmd) = rx.try_recv() {
            if !apply(&mut spll, cmd) {
                info!("SoftPLL handler stopped");
                return;
            }
        }
    }
    info!("SoftPLL handler stopped");
}

/// Returns false on shutdown
fn apply<P: SpllPeripheral>(spll: &mut Spll<P>, cmd: Command) -> bool {
    let (result, reply) = match cmd {
        Command::SetMode(mode, reply) => (spll.set_mode(mode), reply),
        Command::SetPhaseShift(units, reply) => (spll.set_phase_shift(units), reply),
        Command::EnablePtracker(ch, en, reply) => (spll.enable_ptracker(ch, en), reply),
        Command::SetAux(out, en, reply) => (spll.set_aux_enabled(out, en), reply),
        Command::Shutdown => return false,
    };
    // The requester may have given up waiting
    let _ = reply.send(result);
    true
}

/// Pin the handler to the first core and raise its priority, where the
/// platform allows it
#[cfg(feature = "affinity")]
fn pin_thread() {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    if let Some(core) = core_ids.first() {
        core_affinity::set_for_current(*core);
    }
    let _ = thread_priority::set_current_thread_priority(thread_priority::ThreadPriority::Max);
}
