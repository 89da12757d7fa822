//! Fixed-cadence buffer exchange loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use adad_protocol::{BufferExchange, DeviceId, Direction, InstanceId};

use crate::instance::{InstanceShared, InstanceState};
use crate::io::{SampleSink, SampleSource};

/// Everything a worker thread owns for its lifetime.
pub(crate) struct WorkerContext {
    pub device: DeviceId,
    pub instance: InstanceId,
    pub direction: Direction,
    pub samples_per_buffer: usize,
    pub cadence: Duration,
    pub exchange: Arc<dyn BufferExchange>,
    pub shared: Arc<InstanceShared>,
    pub source: Option<Box<dyn SampleSource>>,
    pub sink: Option<Box<dyn SampleSink>>,
}

/// Body of an instance worker thread.
///
/// One buffer moves per cadence tick while the instance is `Running`; a
/// paused instance keeps the cadence without touching data. The deadline
/// advances by exactly one cadence per cycle, so a slow exchange shortens
/// the following park instead of shifting the schedule.
pub(crate) fn run(mut ctx: WorkerContext) {
    debug!(
        device = %ctx.device,
        instance = %ctx.instance,
        samples = ctx.samples_per_buffer,
        cadence = ?ctx.cadence,
        "exchange worker up"
    );

    let mut buffer = vec![0i16; ctx.samples_per_buffer.max(1)];
    let mut deadline = Instant::now() + ctx.cadence;

    loop {
        match ctx.shared.current_state() {
            InstanceState::Running => exchange_once(&mut ctx, &mut buffer),
            InstanceState::Paused => {}
            _ => break,
        }
        if !ctx.shared.park_until(deadline) {
            break;
        }
        deadline += ctx.cadence;
    }

    debug!(device = %ctx.device, instance = %ctx.instance, "exchange worker down");
}

/// Services both legs of one cadence tick. Output devices pull playback from
/// the engine first; input devices then push a fresh capture buffer.
fn exchange_once(ctx: &mut WorkerContext, buffer: &mut [i16]) {
    if ctx.direction.has_playback() {
        match ctx.exchange.read_buffer(ctx.device, ctx.instance, buffer) {
            Ok(moved) => {
                let moved = moved.min(buffer.len());
                if moved > 0 {
                    if let Some(sink) = ctx.sink.as_mut() {
                        sink.push(&buffer[..moved]);
                    }
                }
                if moved < buffer.len() {
                    ctx.shared.note_short_transfer();
                }
            }
            Err(err) => {
                ctx.shared.note_transfer_error();
                warn!(device = %ctx.device, instance = %ctx.instance, %err, "playback read failed");
            }
        }
    }

    if ctx.direction.has_capture() {
        match ctx.source.as_mut() {
            Some(source) => source.pull(buffer),
            None => buffer.fill(0),
        }
        match ctx.exchange.write_buffer(ctx.device, ctx.instance, buffer) {
            Ok(moved) if moved < buffer.len() => ctx.shared.note_short_transfer(),
            Ok(_) => {}
            Err(err) => {
                ctx.shared.note_transfer_error();
                warn!(device = %ctx.device, instance = %ctx.instance, %err, "capture write failed");
            }
        }
    }

    ctx.shared.note_cycle();
}
