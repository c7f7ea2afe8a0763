//! Driving an engine from the async loop: the tick clock and the one-shot request path.

use std::time::{Duration, Instant};

use anyhow::bail;
use pico_core::{Engine, Status, Transport};
use tokio::io::AsyncRead;

use crate::cli;
use crate::link::FrameReader;
use crate::registers::ReplySlot;

pub fn tick_interval(tick_ms: u64) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(Duration::from_millis(tick_ms.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}

/// Whole-millisecond clock for `Engine::tick`. Only the milliseconds handed out are consumed,
/// so the sub-millisecond remainder of each reading carries into the next.
pub struct TickClock {
    last: Instant,
}

impl TickClock {
    pub fn starting_at(last: Instant) -> Self {
        Self { last }
    }

    pub fn elapsed(&mut self) -> u32 {
        self.elapsed_at(Instant::now())
    }

    pub fn elapsed_at(&mut self, now: Instant) -> u32 {
        let ms = now.saturating_duration_since(self.last).as_millis();
        let ms = u32::try_from(ms).unwrap_or(u32::MAX);
        self.last += Duration::from_millis(u64::from(ms));
        ms
    }
}

/// Run the engine until the reply slot is filled by a response or a timeout.
pub async fn await_reply<T, R>(
    engine: &mut Engine<T>,
    reader: &mut FrameReader<R>,
    slot: &ReplySlot,
    tick_ms: u64,
) -> anyhow::Result<(Status, Vec<u8>)>
where
    T: Transport,
    R: AsyncRead + Unpin,
{
    let mut interval = tick_interval(tick_ms);
    let mut clock = TickClock::starting_at(Instant::now());
    loop {
        if let Some(outcome) = slot.take() {
            return Ok(outcome);
        }
        tokio::select! {
            frame = reader.next_frame() => match frame? {
                Some(f) => engine.receive(&f),
                None => bail!("link closed before response"),
            },
            _ = interval.tick() => engine.tick(clock.elapsed()),
        }
    }
}

/// What `get`/`set` prints: the payload as hex on ack, an error naming the reason otherwise.
pub fn outcome(id: u8, status: Status, payload: &[u8]) -> anyhow::Result<String> {
    match status {
        Status::NoError => Ok(cli::to_hex(payload)),
        Status::NackReceived => {
            let reason = payload
                .first()
                .map(|&c| Status::from_code(c).to_string())
                .unwrap_or_else(|| "no reason given".to_string());
            bail!("request {} rejected: {}", id, reason)
        }
        other => bail!("request {} failed: {}", id, other),
    }
}
