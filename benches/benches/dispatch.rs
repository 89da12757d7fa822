use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};

use adad_host::{DeviceRegistry, SilentPipeline};
use adad_protocol::{
    AudioDeviceDescriptor, BufferExchange, ControlChannel, CtlOp, DeviceId, Direction, InstanceId,
};

struct ObligingChannel;

impl ControlChannel for ObligingChannel {
    fn control(
        &self,
        _device: DeviceId,
        _instance: Option<InstanceId>,
        op: CtlOp,
        _extra: usize,
    ) -> i32 {
        match op {
            CtlOp::CreateInstance => 1,
            _ => 0,
        }
    }
}

fn descriptor() -> AudioDeviceDescriptor {
    AudioDeviceDescriptor {
        sampling_rate: 16_000,
        ms_per_buffer: 60,
        channels: 1,
        direction: Direction::Both,
        ..Default::default()
    }
}

fn wired_registry() -> (DeviceRegistry, DeviceId, InstanceId) {
    let registry = DeviceRegistry::new(Arc::new(SilentPipeline));
    let device = registry
        .register(descriptor(), Arc::new(ObligingChannel))
        .expect("register");
    let instance = registry.create_instance(device).expect("create instance");
    (registry, device, instance)
}

fn registry_hot_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(60);

    group.bench_function("read_960_samples", |b| {
        let (registry, device, instance) = wired_registry();
        let mut buffer = vec![0i16; 960];

        b.iter(|| {
            registry
                .read_buffer(device, instance, &mut buffer)
                .expect("read");
        });
    });

    group.bench_function("write_960_samples", |b| {
        let (registry, device, instance) = wired_registry();
        let buffer = vec![0i16; 960];

        b.iter(|| {
            registry
                .write_buffer(device, instance, &buffer)
                .expect("write");
        });
    });

    group.bench_function("pause_resume_dispatch", |b| {
        let (registry, device, instance) = wired_registry();

        b.iter(|| {
            registry.pause(device, instance).expect("pause");
            registry.resume(device, instance).expect("resume");
        });
    });

    group.finish();
}

criterion_group!(benches, registry_hot_paths);
criterion_main!(benches);
