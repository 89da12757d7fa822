//! Tone loopback over the device protocol.
//!
//! Registers two devices against one in-process engine: a "microphone"
//! whose driver synthesizes a sine tone, and a "speaker" whose driver
//! meters what it is asked to play. The engine pipeline between them is a
//! ring buffer, so the tone captured from the first device is what the
//! second one plays. Run with `RUST_LOG=debug` to watch the registry and
//! the exchange workers talk.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use parking_lot::Mutex;
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use tracing::info;
use tracing_subscriber::EnvFilter;

use adad_host::{DeviceRegistry, EnginePipeline};
use adad_protocol::{
    AudioDeviceDescriptor, BufferExchange, ControlChannel, DeviceError, DeviceId, Direction,
    InstanceId,
};
use adad_sdk::{
    DeviceDriver, DeviceRuntime, LevelMeterSink, LevelProbe, SampleSink, SampleSource, SineSource,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Tone loopback over application-defined audio devices")]
struct Cli {
    /// Sampling rate shared by both devices
    #[arg(long, default_value_t = 16_000)]
    rate: i32,

    /// Channels per frame
    #[arg(long, default_value_t = 1)]
    channels: i32,

    /// Exchange cadence in milliseconds
    #[arg(long, default_value_t = 60)]
    ms: i32,

    /// How long to stream before shutting down
    #[arg(long, default_value_t = 3)]
    seconds: u64,

    /// Tone frequency fed into the microphone device
    #[arg(long, default_value_t = 440.0)]
    tone: f32,

    /// Tone amplitude as a fraction of full scale
    #[arg(long, default_value_t = 0.3)]
    amplitude: f32,
}

/// Ring buffer standing in for the engine's audio core. Capture lands in
/// the buffer, playback drains it. Overruns and underruns surface as
/// partial transfers, which the workers count but tolerate.
struct LoopbackPipeline {
    producer: Mutex<HeapProducer<i16>>,
    consumer: Mutex<HeapConsumer<i16>>,
}

impl LoopbackPipeline {
    fn new(capacity: usize) -> Self {
        let (producer, consumer) = HeapRb::<i16>::new(capacity).split();
        Self {
            producer: Mutex::new(producer),
            consumer: Mutex::new(consumer),
        }
    }
}

impl EnginePipeline for LoopbackPipeline {
    fn accept_capture(
        &self,
        _device: DeviceId,
        _instance: InstanceId,
        samples: &[i16],
    ) -> Result<usize, DeviceError> {
        Ok(self.producer.lock().push_slice(samples))
    }

    fn provide_playback(
        &self,
        _device: DeviceId,
        _instance: InstanceId,
        samples: &mut [i16],
    ) -> Result<usize, DeviceError> {
        Ok(self.consumer.lock().pop_slice(samples))
    }
}

struct ToneDriver {
    frequency_hz: f32,
    sampling_rate: u32,
    amplitude: f32,
}

impl DeviceDriver for ToneDriver {
    fn open_source(&self) -> Box<dyn SampleSource> {
        Box::new(SineSource::new(
            self.frequency_hz,
            self.sampling_rate,
            self.amplitude,
        ))
    }
}

struct MeterDriver {
    probe: LevelProbe,
}

impl DeviceDriver for MeterDriver {
    fn open_sink(&self) -> Box<dyn SampleSink> {
        Box::new(LevelMeterSink::new(self.probe.clone()))
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let args = Cli::parse();

    let mic_descriptor = AudioDeviceDescriptor {
        sampling_rate: args.rate,
        ms_per_buffer: args.ms,
        channels: args.channels,
        direction: Direction::Input,
        is_adad: true,
        name: "loopback tone mic".into(),
        ..Default::default()
    };
    let speaker_descriptor = AudioDeviceDescriptor {
        direction: Direction::Output,
        name: "loopback meter speaker".into(),
        ..mic_descriptor.clone()
    };

    let samples_per_buffer = mic_descriptor.samples_per_buffer();
    let pipeline = Arc::new(LoopbackPipeline::new(samples_per_buffer * 8));
    let registry = Arc::new(DeviceRegistry::new(pipeline));
    let runtime = Arc::new(DeviceRuntime::new(registry.clone() as Arc<dyn BufferExchange>));
    let probe = LevelProbe::default();

    let mic = registry
        .register(mic_descriptor.clone(), runtime.clone() as Arc<dyn ControlChannel>)
        .context("registering the microphone device")?;
    runtime.add_device(
        mic,
        mic_descriptor,
        Arc::new(ToneDriver {
            frequency_hz: args.tone,
            sampling_rate: args.rate.max(1) as u32,
            amplitude: args.amplitude,
        }),
    );

    let speaker = registry
        .register(speaker_descriptor.clone(), runtime.clone() as Arc<dyn ControlChannel>)
        .context("registering the speaker device")?;
    runtime.add_device(
        speaker,
        speaker_descriptor,
        Arc::new(MeterDriver {
            probe: probe.clone(),
        }),
    );

    let mic_instance = registry
        .create_instance(mic)
        .context("creating the microphone instance")?;
    let speaker_instance = registry
        .create_instance(speaker)
        .context("creating the speaker instance")?;

    registry.start(mic, mic_instance)?;
    registry.start(speaker, speaker_instance)?;
    info!(%mic, %speaker, samples_per_buffer, "loopback streaming");

    for second in 1..=args.seconds {
        thread::sleep(Duration::from_secs(1));
        println!("t+{second}s  speaker level {:>5} / {}", probe.level(), i16::MAX);
    }

    registry.stop(mic, mic_instance)?;
    registry.stop(speaker, speaker_instance)?;

    for (label, instance) in [("mic", mic_instance), ("speaker", speaker_instance)] {
        if let Some(stats) = runtime.instance_stats(instance) {
            println!(
                "{label}: {} buffers exchanged, {} short, {} failed",
                stats.buffers_exchanged, stats.short_transfers, stats.transfer_errors
            );
        }
    }

    registry.destroy_instance(mic, mic_instance)?;
    registry.destroy_instance(speaker, speaker_instance)?;
    registry.unregister(mic)?;
    registry.unregister(speaker)?;
    runtime.shutdown();

    Ok(())
}
