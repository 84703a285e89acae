//! Turns frames into wire batches and gets them to the device.
//!
//! [`FrameDispatcher`] runs on the engine thread. It diffs each frame
//! against what the device last accepted, encodes at most
//! `max_messages_per_tick` changes and pushes them as one batch onto a
//! bounded queue. [`FrameSender`] owns the transport on its own thread and
//! drains that queue.

use crate::codec::{self, ColorEncoding};
use crate::controls::{PAD_COUNT, SIDE_COUNT, SideButton};
use crate::lights::{FrameCommand, SideLed};
use crate::transport::{ConnectionState, Connector, LinkStatus, Transport};
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError, bounded};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const SLOTS: usize = PAD_COUNT + SIDE_COUNT;

/// All messages produced by one tick, sent together or not at all.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    pub tick: u64,
    pub messages: Vec<Vec<u8>>,
}

pub fn queue(depth: usize) -> (Sender<Batch>, Receiver<Batch>) {
    bounded(depth.max(1))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Nothing differed from the device.
    Idle,
    Queued { messages: usize, deferred: usize },
    /// Queue full; the same changes will be retried next tick.
    Dropped,
}

/// What the device is believed to show for one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Shown {
    Pad(FrameCommand),
    Side(SideLed),
}

pub struct FrameDispatcher {
    encoding: ColorEncoding,
    max_messages: usize,
    queue: Sender<Batch>,
    // Pads first, then side buttons. `None` means unknown and always resent.
    baseline: [Option<Shown>; SLOTS],
    cursor: usize,
    tick: u64,
    dropped: u64,
}

impl FrameDispatcher {
    pub fn new(encoding: ColorEncoding, max_messages_per_tick: usize, queue: Sender<Batch>) -> Self {
        Self {
            encoding,
            max_messages: max_messages_per_tick.max(1),
            queue,
            baseline: [None; SLOTS],
            cursor: 0,
            tick: 0,
            dropped: 0,
        }
    }

    /// Forgets what the device shows, so the next dispatch resends everything.
    pub fn invalidate(&mut self) {
        self.baseline = [None; SLOTS];
    }

    pub fn dropped_batches(&self) -> u64 {
        self.dropped
    }

    pub fn dispatch(&mut self, frame: &[FrameCommand; PAD_COUNT], side: &[SideLed; SIDE_COUNT]) -> Dispatch {
        self.tick += 1;
        let wanted = |slot: usize| -> Option<Shown> {
            if slot < PAD_COUNT {
                let cmd = frame[slot];
                // All dark pads look alike on the wire.
                let cmd = if cmd.is_dark() { FrameCommand::off(cmd.index) } else { cmd };
                Some(Shown::Pad(cmd))
            } else {
                let button = SideButton::ALL[slot - PAD_COUNT];
                button.has_light().then_some(Shown::Side(side[slot - PAD_COUNT]))
            }
        };

        let mut changed = Vec::new();
        let mut deferred = 0;
        for k in 0..SLOTS {
            let slot = (self.cursor + k) % SLOTS;
            let Some(shown) = wanted(slot) else { continue };
            if self.baseline[slot] == Some(shown) {
                continue;
            }
            if changed.len() < self.max_messages {
                changed.push((slot, shown));
            } else {
                deferred += 1;
            }
        }
        if changed.is_empty() {
            return Dispatch::Idle;
        }

        let messages: Vec<Vec<u8>> = changed
            .iter()
            .map(|(slot, shown)| match shown {
                Shown::Pad(cmd) => codec::encode(cmd, self.encoding),
                Shown::Side(led) => codec::encode_side(SideButton::ALL[slot - PAD_COUNT], *led).to_vec(),
            })
            .collect();
        let count = messages.len();
        match self.queue.try_send(Batch {
            tick: self.tick,
            messages,
        }) {
            Ok(()) => {
                for &(slot, shown) in &changed {
                    self.baseline[slot] = Some(shown);
                }
                if deferred > 0 {
                    // Start after the last slot sent so nothing starves.
                    if let Some(&(last, _)) = changed.last() {
                        self.cursor = (last + 1) % SLOTS;
                    }
                    log::trace!("tick {}: {count} sent, {deferred} deferred", self.tick);
                }
                Dispatch::Queued {
                    messages: count,
                    deferred,
                }
            }
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                log::debug!("tick {}: output queue full, batch dropped", self.tick);
                Dispatch::Dropped
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped += 1;
                log::debug!("tick {}: sender gone, batch dropped", self.tick);
                Dispatch::Dropped
            }
        }
    }

    /// Queues one batch that turns every light off, waiting up to `timeout`
    /// for room. Not subject to the per-tick budget.
    pub fn blackout(&mut self, timeout: Duration) -> bool {
        self.tick += 1;
        let mut messages: Vec<Vec<u8>> = crate::controls::GridIndex::all()
            .map(|index| codec::encode(&FrameCommand::off(index), self.encoding))
            .collect();
        messages.extend(
            SideButton::ALL
                .iter()
                .filter(|b| b.has_light())
                .map(|&b| codec::encode_side(b, SideLed::Off).to_vec()),
        );
        match self.queue.send_timeout(
            Batch {
                tick: self.tick,
                messages,
            },
            timeout,
        ) {
            Ok(()) => {
                self.invalidate();
                true
            }
            Err(SendTimeoutError::Timeout(_)) | Err(SendTimeoutError::Disconnected(_)) => {
                log::warn!("couldn't queue blackout frame");
                false
            }
        }
    }
}

/// Sender thread. Writes whole batches to the transport, marks the link
/// lost on the first failed write and reconnects through `connector` at
/// most once per `retry`. The transport's own state is polled once per
/// `retry` as well, so an unplugged device is noticed even when the grid
/// is static and nothing is being written. Exits once the queue is closed
/// and drained.
pub struct FrameSender {
    handle: JoinHandle<()>,
}

impl FrameSender {
    pub fn spawn(
        mut connector: Box<dyn Connector>,
        batches: Receiver<Batch>,
        status: Arc<LinkStatus>,
        retry: Duration,
    ) -> std::io::Result<Self> {
        let handle = thread::Builder::new().name("apc-sender".into()).spawn(move || {
            let mut transport: Option<Box<dyn Transport>> = None;
            let mut last_attempt: Option<Instant> = None;
            let mut last_check = Instant::now();
            loop {
                if transport.is_some() && last_check.elapsed() >= retry {
                    last_check = Instant::now();
                    if let Some(reason) = transport.as_ref().and_then(|t| gone(t.state())) {
                        log::warn!("device went away: {reason}");
                        status.set(ConnectionState::Lost(reason));
                        transport = None;
                    }
                }

                if transport.is_none() && last_attempt.is_none_or(|at| at.elapsed() >= retry) {
                    last_attempt = Some(Instant::now());
                    match connector.connect() {
                        Ok(t) => {
                            status.set(ConnectionState::Connected);
                            transport = Some(t);
                        }
                        Err(e) => {
                            log::debug!("connect failed: {e}");
                            status.set(ConnectionState::Lost(e.to_string()));
                        }
                    }
                }

                let batch = match batches.recv_timeout(retry) {
                    Ok(batch) => batch,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                };
                let Some(out) = transport.as_mut() else {
                    log::trace!("no device, tick {} discarded", batch.tick);
                    continue;
                };
                for message in &batch.messages {
                    if let Err(e) = out.send(message) {
                        status.set(ConnectionState::Lost(e.to_string()));
                        transport = None;
                        break;
                    }
                }
            }
            status.set(ConnectionState::Closed);
        })?;
        Ok(Self { handle })
    }

    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

fn gone(state: ConnectionState) -> Option<String> {
    match state {
        ConnectionState::Connected => None,
        ConnectionState::Lost(reason) => Some(reason),
        ConnectionState::Closed => Some("port closed".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::GridIndex;
    use crate::lights::Rgb;
    use crate::transport::MemoryTransport;

    fn dark() -> [FrameCommand; PAD_COUNT] {
        GridIndex::array(FrameCommand::off)
    }

    fn lit(frame: &mut [FrameCommand; PAD_COUNT], i: usize, rgb: Rgb) {
        frame[i].rgb = rgb;
        frame[i].brightness = 100;
    }

    const SIDE_OFF: [SideLed; SIDE_COUNT] = [SideLed::Off; SIDE_COUNT];

    #[test]
    fn first_dispatch_sends_everything_then_only_changes() {
        let (tx, rx) = queue(4);
        let mut dispatcher = FrameDispatcher::new(ColorEncoding::Palette, 256, tx);
        let mut frame = dark();

        // 64 pads plus 16 lit side buttons.
        assert_eq!(
            dispatcher.dispatch(&frame, &SIDE_OFF),
            Dispatch::Queued { messages: 80, deferred: 0 }
        );
        assert_eq!(dispatcher.dispatch(&frame, &SIDE_OFF), Dispatch::Idle);

        lit(&mut frame, 5, Rgb::new(255, 0, 0));
        assert_eq!(
            dispatcher.dispatch(&frame, &SIDE_OFF),
            Dispatch::Queued { messages: 1, deferred: 0 }
        );
        rx.try_recv().unwrap();
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.messages, vec![vec![0x96, 5, 5]]);
    }

    #[test]
    fn dark_variants_are_not_resent() {
        let (tx, _rx) = queue(4);
        let mut dispatcher = FrameDispatcher::new(ColorEncoding::Palette, 256, tx);
        let mut frame = dark();
        dispatcher.dispatch(&frame, &SIDE_OFF);
        frame[3].rgb = Rgb::WHITE;
        assert_eq!(dispatcher.dispatch(&frame, &SIDE_OFF), Dispatch::Idle);
    }

    #[test]
    fn budget_rotates_so_nothing_starves() {
        let (tx, rx) = queue(16);
        let mut dispatcher = FrameDispatcher::new(ColorEncoding::Palette, 30, tx);
        let frame = dark();
        let mut seen = Vec::new();
        for _ in 0..3 {
            dispatcher.dispatch(&frame, &SIDE_OFF);
            seen.extend(rx.try_recv().unwrap().messages);
        }
        assert_eq!(seen.len(), 80);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 80);
        assert_eq!(dispatcher.dispatch(&frame, &SIDE_OFF), Dispatch::Idle);
    }

    #[test]
    fn full_queue_keeps_changes_for_later() {
        let (tx, rx) = queue(1);
        let mut dispatcher = FrameDispatcher::new(ColorEncoding::Palette, 256, tx);
        let mut frame = dark();
        dispatcher.dispatch(&frame, &SIDE_OFF);

        lit(&mut frame, 9, Rgb::new(0, 0, 255));
        assert_eq!(dispatcher.dispatch(&frame, &SIDE_OFF), Dispatch::Dropped);
        assert_eq!(dispatcher.dropped_batches(), 1);

        rx.try_recv().unwrap();
        assert_eq!(
            dispatcher.dispatch(&frame, &SIDE_OFF),
            Dispatch::Queued { messages: 1, deferred: 0 }
        );
        assert_eq!(rx.try_recv().unwrap().messages[0][1], 9);
    }

    #[test]
    fn invalidate_forces_full_resend() {
        let (tx, _rx) = queue(4);
        let mut dispatcher = FrameDispatcher::new(ColorEncoding::Sysex, 256, tx);
        let frame = dark();
        dispatcher.dispatch(&frame, &SIDE_OFF);
        dispatcher.invalidate();
        assert_eq!(
            dispatcher.dispatch(&frame, &SIDE_OFF),
            Dispatch::Queued { messages: 80, deferred: 0 }
        );
    }

    #[test]
    fn side_leds_are_diffed() {
        let (tx, rx) = queue(4);
        let mut dispatcher = FrameDispatcher::new(ColorEncoding::Palette, 256, tx);
        let frame = dark();
        let mut side = SIDE_OFF;
        dispatcher.dispatch(&frame, &side);
        rx.try_recv().unwrap();

        side[SideButton::Scene1.slot()] = SideLed::Blink;
        side[SideButton::Shift.slot()] = SideLed::On;
        dispatcher.dispatch(&frame, &side);
        assert_eq!(rx.try_recv().unwrap().messages, vec![vec![0x90, 0x70, 2]]);
    }

    #[test]
    fn sender_reconnects_after_loss() {
        let device = MemoryTransport::new();
        let status = Arc::new(LinkStatus::default());
        let (tx, rx) = queue(8);
        let sender = FrameSender::spawn(
            Box::new(device.connector()),
            rx,
            Arc::clone(&status),
            Duration::from_millis(10),
        )
        .unwrap();

        let batch = |tick, note| Batch {
            tick,
            messages: vec![vec![0x90, note, 1]],
        };
        tx.send(batch(1, 1)).unwrap();
        wait_for(|| device.sent().len() == 1);
        assert_eq!(status.state(), ConnectionState::Connected);
        assert!(status.take_resync());

        device.set_failing(true);
        tx.send(batch(2, 2)).unwrap();
        wait_for(|| matches!(status.state(), ConnectionState::Lost(_)));

        device.set_failing(false);
        wait_for(|| status.state() == ConnectionState::Connected);
        assert!(status.take_resync());
        tx.send(batch(3, 3)).unwrap();
        wait_for(|| device.sent().len() == 2);

        drop(tx);
        sender.join().unwrap();
        assert_eq!(status.state(), ConnectionState::Closed);
        assert_eq!(device.sent(), vec![vec![0x90, 1, 1], vec![0x90, 3, 1]]);
    }

    #[test]
    fn sender_notices_a_closed_port_without_traffic() {
        let device = MemoryTransport::new();
        let status = Arc::new(LinkStatus::default());
        let (tx, rx) = queue(8);
        let sender = FrameSender::spawn(
            Box::new(device.connector()),
            rx,
            Arc::clone(&status),
            Duration::from_millis(10),
        )
        .unwrap();

        tx.send(Batch {
            tick: 1,
            messages: vec![vec![0x90, 1, 1]],
        })
        .unwrap();
        wait_for(|| device.sent().len() == 1);
        assert!(status.take_resync());

        // Static grid: nothing more is queued while the device goes away.
        device.set_refusing(true);
        device.close();
        wait_for(|| matches!(status.state(), ConnectionState::Lost(_)));
        assert!(!status.take_resync());

        device.set_refusing(false);
        wait_for(|| status.state() == ConnectionState::Connected);
        assert!(status.take_resync());

        drop(tx);
        sender.join().unwrap();
        assert_eq!(device.sent().len(), 1);
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn blackout_queues_all_off() {
        let (tx, rx) = queue(1);
        let mut dispatcher = FrameDispatcher::new(ColorEncoding::Palette, 8, tx);
        assert!(dispatcher.blackout(Duration::from_millis(10)));
        // Nobody is draining, so the second one times out.
        assert!(!dispatcher.blackout(Duration::from_millis(10)));

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.messages.len(), 80);
        assert!(batch.messages.iter().all(|m| m[2] == 0));
        assert!(rx.try_recv().is_err());
    }
}
