//! The engine thread: the only place the controller is touched while the
//! driver runs.

use crate::controller::Controller;
use crate::dispatch::FrameDispatcher;
use crate::transport::{InboundMessage, LinkStatus};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Work for the engine thread, such as an edit typed at the console.
pub type Command = Box<dyn FnOnce(&mut Controller) + Send>;

pub const MIN_TICK_HZ: u32 = 10;
pub const MAX_TICK_HZ: u32 = 120;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub tick_hz: u32,
    pub blackout_on_exit: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            tick_hz: 30,
            blackout_on_exit: true,
        }
    }
}

pub struct Runtime {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Controller>,
}

impl Runtime {
    /// Starts the engine thread. Each pass applies queued input in arrival
    /// order, runs queued commands, renders one frame, hands it to the
    /// dispatcher and sleeps until the next tick is due.
    pub fn spawn(
        mut controller: Controller,
        inbound: Receiver<InboundMessage>,
        commands: Receiver<Command>,
        mut dispatcher: FrameDispatcher,
        status: Arc<LinkStatus>,
        options: RuntimeOptions,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let period = Duration::from_secs(1) / options.tick_hz.clamp(MIN_TICK_HZ, MAX_TICK_HZ);

        let handle = thread::Builder::new().name("apc-engine".into()).spawn(move || {
            let start = Instant::now();
            let mut next = start;
            while !stop_flag.load(Ordering::SeqCst) {
                for message in inbound.try_iter() {
                    controller.apply_message(&message.bytes, message.received);
                }
                for command in commands.try_iter() {
                    command(&mut controller);
                }
                if status.take_resync() | controller.take_resync() {
                    dispatcher.invalidate();
                }

                controller.tick(start.elapsed());
                dispatcher.dispatch(controller.frame(), controller.side_leds());

                next += period;
                let now = Instant::now();
                if next > now {
                    thread::sleep(next - now);
                } else {
                    // Running late: don't try to catch up on missed ticks.
                    next = now;
                }
            }

            if options.blackout_on_exit {
                dispatcher.blackout(Duration::from_millis(500));
            }
            log::debug!("engine stopped, {} batches dropped", dispatcher.dropped_batches());
            controller
        })?;

        Ok(Self { stop, handle })
    }

    /// Flag that ends the engine loop after the tick in progress.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops the engine and hands the controller back. Dropping the
    /// dispatcher closes the output queue, which lets the sender drain and
    /// exit.
    pub fn stop(self) -> thread::Result<Controller> {
        self.stop.store(true, Ordering::SeqCst);
        self.handle.join()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ColorEncoding;
    use crate::dispatch::{self, FrameSender};
    use crate::transport::{ConnectionState, MemoryTransport};
    use crossbeam_channel::{bounded, unbounded};

    #[test]
    fn presses_reach_the_device_and_blackout_on_stop() {
        let device = MemoryTransport::new();
        let status = Arc::new(LinkStatus::default());
        let (batch_tx, batch_rx) = dispatch::queue(8);
        let sender = FrameSender::spawn(
            Box::new(device.connector()),
            batch_rx,
            Arc::clone(&status),
            Duration::from_millis(10),
        )
        .unwrap();

        let (in_tx, in_rx) = bounded(64);
        let (cmd_tx, cmd_rx) = unbounded::<Command>();
        let runtime = Runtime::spawn(
            Controller::with_builtins(),
            in_rx,
            cmd_rx,
            FrameDispatcher::new(ColorEncoding::Palette, 256, batch_tx),
            Arc::clone(&status),
            RuntimeOptions {
                tick_hz: 100,
                blackout_on_exit: true,
            },
        )
        .unwrap();

        in_tx.send(InboundMessage::new(&[0x90, 5, 127])).unwrap();
        cmd_tx
            .send(Box::new(|c: &mut Controller| c.set_tempo(100.0).unwrap()))
            .unwrap();

        let red = vec![0x96, 5, 5];
        let deadline = Instant::now() + Duration::from_secs(5);
        while !device.sent().contains(&red) {
            assert!(Instant::now() < deadline, "press never reached the device");
            thread::sleep(Duration::from_millis(5));
        }

        let controller = runtime.stop().unwrap();
        sender.join().unwrap();
        assert_eq!(controller.store().globals().tempo_bpm, 100.0);
        assert_eq!(status.state(), ConnectionState::Closed);
        // The last message for pad 5 turns it off.
        let last = device.sent().into_iter().rev().find(|m| m[1] == 5).unwrap();
        assert_eq!(last, vec![0x90, 5, 0]);
    }
}
