//! Handle registry and control dispatch for application-defined devices.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use adad_protocol::{
    AudioDeviceDescriptor, BufferExchange, ControlChannel, CtlOp, DeviceError, DeviceId,
    InstanceId, RESULT_OK,
};

use crate::pipeline::EnginePipeline;

struct DeviceEntry {
    descriptor: AudioDeviceDescriptor,
    control: Arc<dyn ControlChannel>,
}

struct InstanceBinding {
    device: DeviceId,
}

#[derive(Default)]
struct Tables {
    devices: HashMap<DeviceId, Arc<DeviceEntry>>,
    instances: HashMap<InstanceId, InstanceBinding>,
    next_device: i16,
}

impl Tables {
    /// Hands out the next free device handle. Handles are monotonic and only
    /// wrap around once the 16-bit space is exhausted, so a freed handle is
    /// not promptly reused.
    fn allocate_device_id(&mut self) -> Result<DeviceId, DeviceError> {
        if self.devices.len() >= i16::MAX as usize {
            return Err(DeviceError::General);
        }
        loop {
            let raw = if self.next_device >= 1 {
                self.next_device
            } else {
                1
            };
            self.next_device = if raw >= i16::MAX { 1 } else { raw + 1 };
            if let Some(id) = DeviceId::new(raw) {
                if !self.devices.contains_key(&id) {
                    return Ok(id);
                }
            }
        }
    }

    /// Resolves a (device, instance) pair: device first, then instance, then
    /// ownership.
    fn resolve_pair(
        &self,
        device: DeviceId,
        instance: InstanceId,
    ) -> Result<&Arc<DeviceEntry>, DeviceError> {
        let entry = self
            .devices
            .get(&device)
            .ok_or(DeviceError::InvalidDeviceId)?;
        let binding = self
            .instances
            .get(&instance)
            .ok_or(DeviceError::InvalidInstanceId)?;
        if binding.device != device {
            return Err(DeviceError::InvalidCombinedId);
        }
        Ok(entry)
    }
}

/// Engine-side handle registry.
///
/// Devices and their instances live in one table behind a single mutex. The
/// lock covers table lookups only; it is never held across a control-channel
/// callback or a pipeline call, so applications are free to call back into
/// the registry from inside their control handler.
pub struct DeviceRegistry {
    pipeline: Arc<dyn EnginePipeline>,
    tables: Mutex<Tables>,
}

impl DeviceRegistry {
    /// Creates a registry forwarding sample traffic to `pipeline`.
    pub fn new(pipeline: Arc<dyn EnginePipeline>) -> Self {
        Self {
            pipeline,
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Registers a device and assigns it a fresh positive handle.
    ///
    /// The descriptor is validated first; the control callback is not
    /// consulted, so a freshly registered device has no instances.
    pub fn register(
        &self,
        descriptor: AudioDeviceDescriptor,
        control: Arc<dyn ControlChannel>,
    ) -> Result<DeviceId, DeviceError> {
        descriptor.validate()?;
        let mut tables = self.tables.lock();
        let device = tables.allocate_device_id()?;
        info!(
            %device,
            name = %descriptor.name,
            direction = ?descriptor.direction,
            rate = descriptor.sampling_rate,
            cadence_ms = descriptor.ms_per_buffer,
            "audio device registered"
        );
        tables
            .devices
            .insert(device, Arc::new(DeviceEntry { descriptor, control }));
        Ok(device)
    }

    /// Registers a device from its JSON descriptor payload.
    pub fn register_json(
        &self,
        json: &str,
        control: Arc<dyn ControlChannel>,
    ) -> Result<DeviceId, DeviceError> {
        let descriptor = AudioDeviceDescriptor::from_json(json).map_err(|err| {
            debug!(%err, "rejecting unparseable device descriptor");
            DeviceError::InvalidConfiguration
        })?;
        self.register(descriptor, control)
    }

    /// Removes a device. Instances still alive are destroyed through the
    /// device's control channel first; their handles are gone once this
    /// returns, whatever the application answered.
    pub fn unregister(&self, device: DeviceId) -> Result<(), DeviceError> {
        let (entry, orphans) = {
            let mut tables = self.tables.lock();
            let entry = tables
                .devices
                .remove(&device)
                .ok_or(DeviceError::InvalidDeviceId)?;
            let orphans: Vec<InstanceId> = tables
                .instances
                .iter()
                .filter(|(_, binding)| binding.device == device)
                .map(|(id, _)| *id)
                .collect();
            for id in &orphans {
                tables.instances.remove(id);
            }
            (entry, orphans)
        };

        for id in orphans {
            let rc = entry.control.control(device, Some(id), CtlOp::DestroyInstance, 0);
            if rc != i32::from(RESULT_OK) {
                warn!(%device, instance = %id, rc, "forced destroy refused during unregister");
            }
        }
        info!(%device, "audio device unregistered");
        Ok(())
    }

    /// Asks the device to create an instance and binds the returned id.
    ///
    /// The id comes back over the control channel while the table lock is
    /// released, so it is re-validated before binding; an id that cannot be
    /// bound is destroyed again rather than leaked.
    pub fn create_instance(&self, device: DeviceId) -> Result<InstanceId, DeviceError> {
        let entry = self.device_entry(device)?;
        let rc = entry.control.control(device, None, CtlOp::CreateInstance, 0);
        let id = instance_id_from_rc(rc)?;

        let conflict = {
            let mut tables = self.tables.lock();
            if !tables.devices.contains_key(&device) {
                Some(DeviceError::InvalidDeviceId)
            } else if tables.instances.contains_key(&id) {
                Some(DeviceError::General)
            } else {
                tables.instances.insert(id, InstanceBinding { device });
                None
            }
        };

        match conflict {
            None => {
                info!(%device, instance = %id, "instance created");
                Ok(id)
            }
            Some(err) => {
                warn!(%device, instance = %id, %err, "unbindable instance rolled back");
                let rc = entry.control.control(device, Some(id), CtlOp::DestroyInstance, 0);
                if rc != i32::from(RESULT_OK) {
                    warn!(%device, instance = %id, rc, "rollback destroy refused");
                }
                Err(err)
            }
        }
    }

    /// Destroys an instance and releases its handle.
    ///
    /// The handle is unbound before the control channel is consulted, so it
    /// is free again even when the application's teardown reports a failure;
    /// that failure is still propagated.
    pub fn destroy_instance(
        &self,
        device: DeviceId,
        instance: InstanceId,
    ) -> Result<(), DeviceError> {
        let entry = {
            let mut tables = self.tables.lock();
            tables.resolve_pair(device, instance)?;
            tables.instances.remove(&instance);
            match tables.devices.get(&device) {
                Some(entry) => Arc::clone(entry),
                None => return Err(DeviceError::InvalidDeviceId),
            }
        };

        let rc = entry
            .control
            .control(device, Some(instance), CtlOp::DestroyInstance, 0);
        info!(%device, %instance, "instance destroyed");
        match DeviceError::from_code(rc) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Starts the instance's exchange worker.
    pub fn start(&self, device: DeviceId, instance: InstanceId) -> Result<(), DeviceError> {
        self.dispatch(device, instance, CtlOp::Start)
    }

    /// Stops the instance's exchange worker and waits for it to wind down.
    pub fn stop(&self, device: DeviceId, instance: InstanceId) -> Result<(), DeviceError> {
        self.dispatch(device, instance, CtlOp::Stop)
    }

    /// Suspends sample movement while keeping the worker on cadence.
    pub fn pause(&self, device: DeviceId, instance: InstanceId) -> Result<(), DeviceError> {
        self.dispatch(device, instance, CtlOp::Pause)
    }

    /// Resumes sample movement after a pause.
    pub fn resume(&self, device: DeviceId, instance: InstanceId) -> Result<(), DeviceError> {
        self.dispatch(device, instance, CtlOp::Resume)
    }

    /// Returns a stopped instance to its just-created state.
    pub fn reset(&self, device: DeviceId, instance: InstanceId) -> Result<(), DeviceError> {
        self.dispatch(device, instance, CtlOp::Reset)
    }

    /// Stop followed by start in one request.
    pub fn restart(&self, device: DeviceId, instance: InstanceId) -> Result<(), DeviceError> {
        self.dispatch(device, instance, CtlOp::Restart)
    }

    /// Device owning the given instance.
    pub fn resolve_instance(&self, instance: InstanceId) -> Result<DeviceId, DeviceError> {
        self.tables
            .lock()
            .instances
            .get(&instance)
            .map(|binding| binding.device)
            .ok_or(DeviceError::InvalidInstanceId)
    }

    /// Checks that `instance` exists and is owned by `device`.
    pub fn resolve_device_and_instance(
        &self,
        device: DeviceId,
        instance: InstanceId,
    ) -> Result<(), DeviceError> {
        self.tables
            .lock()
            .resolve_pair(device, instance)
            .map(|_| ())
    }

    /// Descriptor the device was registered with.
    pub fn descriptor(&self, device: DeviceId) -> Result<AudioDeviceDescriptor, DeviceError> {
        self.device_entry(device).map(|entry| entry.descriptor.clone())
    }

    /// Handles of every registered device, in ascending order.
    pub fn device_ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.tables.lock().devices.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered devices.
    pub fn device_count(&self) -> usize {
        self.tables.lock().devices.len()
    }

    /// Number of bound instances across all devices.
    pub fn instance_count(&self) -> usize {
        self.tables.lock().instances.len()
    }

    fn device_entry(&self, device: DeviceId) -> Result<Arc<DeviceEntry>, DeviceError> {
        self.tables
            .lock()
            .devices
            .get(&device)
            .cloned()
            .ok_or(DeviceError::InvalidDeviceId)
    }

    fn dispatch(
        &self,
        device: DeviceId,
        instance: InstanceId,
        op: CtlOp,
    ) -> Result<(), DeviceError> {
        let entry = {
            let tables = self.tables.lock();
            Arc::clone(tables.resolve_pair(device, instance)?)
        };
        debug!(%device, %instance, ?op, "dispatching control operation");
        let rc = entry.control.control(device, Some(instance), op, 0);
        match DeviceError::from_code(rc) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

impl BufferExchange for DeviceRegistry {
    fn write_buffer(
        &self,
        device: DeviceId,
        instance: InstanceId,
        samples: &[i16],
    ) -> Result<usize, DeviceError> {
        {
            let tables = self.tables.lock();
            tables.resolve_pair(device, instance)?;
        }
        let accepted = self.pipeline.accept_capture(device, instance, samples)?;
        if accepted < samples.len() {
            debug!(%device, %instance, accepted, offered = samples.len(), "partial capture transfer");
        }
        Ok(accepted)
    }

    fn read_buffer(
        &self,
        device: DeviceId,
        instance: InstanceId,
        samples: &mut [i16],
    ) -> Result<usize, DeviceError> {
        {
            let tables = self.tables.lock();
            tables.resolve_pair(device, instance)?;
        }
        let produced = self.pipeline.provide_playback(device, instance, samples)?;
        if produced < samples.len() {
            debug!(%device, %instance, produced, requested = samples.len(), "partial playback transfer");
        }
        Ok(produced)
    }
}

fn instance_id_from_rc(rc: i32) -> Result<InstanceId, DeviceError> {
    if rc < 0 {
        return Err(DeviceError::from_code(rc).unwrap_or(DeviceError::General));
    }
    i16::try_from(rc)
        .ok()
        .and_then(InstanceId::new)
        .ok_or(DeviceError::General)
}

/// Drives a registry with an arbitrary operation stream, replying to create
/// requests with a rotating mix of good and bad ids. Panics only if the
/// tables diverge from the straightforward model kept alongside.
#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_registry_ops(data: &[u8]) {
    use std::sync::atomic::{AtomicI32, Ordering};

    use adad_protocol::Direction;

    use crate::pipeline::SilentPipeline;

    struct ScriptedReplies {
        created: AtomicI32,
    }

    impl ControlChannel for ScriptedReplies {
        fn control(
            &self,
            _device: DeviceId,
            _instance: Option<InstanceId>,
            op: CtlOp,
            _extra: usize,
        ) -> i32 {
            if op != CtlOp::CreateInstance {
                return 0;
            }
            let n = self.created.fetch_add(1, Ordering::Relaxed);
            match n % 7 {
                0 => -4,
                1 => 0,
                2 => i32::from(i16::MAX) + 10,
                3 => 1 + n % 3,
                _ => 1 + n % 30_000,
            }
        }
    }

    let registry = DeviceRegistry::new(Arc::new(SilentPipeline));
    let channel: Arc<dyn ControlChannel> = Arc::new(ScriptedReplies {
        created: AtomicI32::new(0),
    });
    let mut devices: Vec<DeviceId> = Vec::new();
    let mut instances: Vec<(DeviceId, InstanceId)> = Vec::new();
    let mut buffer = [0i16; 64];

    let mut bytes = data.iter().copied();
    while let Some(op) = bytes.next() {
        let arg = usize::from(bytes.next().unwrap_or(0));
        match op % 8 {
            0 => {
                let descriptor = AudioDeviceDescriptor {
                    sampling_rate: 8_000,
                    ms_per_buffer: 5,
                    channels: 1,
                    direction: Direction::Both,
                    ..AudioDeviceDescriptor::default()
                };
                if let Ok(device) = registry.register(descriptor, Arc::clone(&channel)) {
                    devices.push(device);
                }
            }
            1 if !devices.is_empty() => {
                let device = devices.remove(arg % devices.len());
                let _ = registry.unregister(device);
                instances.retain(|(owner, _)| *owner != device);
            }
            2 if !devices.is_empty() => {
                let device = devices[arg % devices.len()];
                if let Ok(instance) = registry.create_instance(device) {
                    instances.push((device, instance));
                }
            }
            3 if !instances.is_empty() => {
                let (device, instance) = instances.remove(arg % instances.len());
                let _ = registry.destroy_instance(device, instance);
            }
            4 if !instances.is_empty() => {
                let (device, instance) = instances[arg % instances.len()];
                let _ = registry.start(device, instance);
            }
            5 if !instances.is_empty() => {
                let (device, instance) = instances[arg % instances.len()];
                let _ = registry.stop(device, instance);
            }
            6 if !instances.is_empty() => {
                let (device, instance) = instances[arg % instances.len()];
                let _ = registry.write_buffer(device, instance, &buffer);
            }
            7 if !instances.is_empty() => {
                let (device, instance) = instances[arg % instances.len()];
                let _ = registry.read_buffer(device, instance, &mut buffer);
            }
            _ => {}
        }
    }

    assert_eq!(registry.device_count(), devices.len());
    assert_eq!(registry.instance_count(), instances.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::pipeline::SilentPipeline;
    use adad_protocol::Direction;

    struct AgreeableChannel;

    impl ControlChannel for AgreeableChannel {
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
            direction: Direction::Input,
            ..Default::default()
        }
    }

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(Arc::new(SilentPipeline))
    }

    #[test]
    fn handles_start_at_one_and_stay_monotonic() {
        let registry = registry();
        let a = registry.register(descriptor(), Arc::new(AgreeableChannel)).unwrap();
        let b = registry.register(descriptor(), Arc::new(AgreeableChannel)).unwrap();
        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 2);

        registry.unregister(a).unwrap();
        let c = registry.register(descriptor(), Arc::new(AgreeableChannel)).unwrap();
        assert_eq!(c.get(), 3);
        assert_eq!(registry.device_count(), 2);
    }

    #[test]
    fn register_validates_the_descriptor() {
        let registry = registry();

        let mut bad = descriptor();
        bad.sampling_rate = 0;
        assert_eq!(
            registry.register(bad, Arc::new(AgreeableChannel)),
            Err(DeviceError::InvalidConfiguration)
        );

        let mut bad = descriptor();
        bad.direction = Direction::Unknown;
        assert_eq!(
            registry.register(bad, Arc::new(AgreeableChannel)),
            Err(DeviceError::InvalidConfiguration)
        );
        assert_eq!(registry.device_count(), 0);
    }

    #[test]
    fn register_json_accepts_the_wire_shape() {
        let registry = registry();
        let device = registry
            .register_json(
                r#"{"samplingRate":16000,"msPerBuffer":60,"channels":1,"direction":1,"name":"mic"}"#,
                Arc::new(AgreeableChannel),
            )
            .unwrap();
        assert_eq!(registry.descriptor(device).unwrap().name, "mic");

        assert_eq!(
            registry.register_json("not json", Arc::new(AgreeableChannel)),
            Err(DeviceError::InvalidConfiguration)
        );
        assert_eq!(
            registry.register_json("{}", Arc::new(AgreeableChannel)),
            Err(DeviceError::InvalidConfiguration)
        );
    }

    #[test]
    fn scripted_op_streams_keep_the_tables_in_step() {
        fuzz_registry_ops(&[]);
        fuzz_registry_ops(&[0, 0, 2, 0, 2, 1, 4, 0, 6, 0, 3, 0, 1, 0]);
        // long enough that the reply script reaches its well-formed ids
        fuzz_registry_ops(&[
            0, 0, 0, 0, 2, 0, 2, 1, 2, 0, 2, 0, 2, 1, 4, 0, 6, 0, 7, 0, 5, 0, 3, 0, 1, 1, 1, 0,
        ]);
    }

    #[test]
    fn instance_rc_mapping_covers_the_edges() {
        assert!(instance_id_from_rc(1).is_ok());
        assert!(instance_id_from_rc(i32::from(i16::MAX)).is_ok());
        assert_eq!(instance_id_from_rc(0), Err(DeviceError::General));
        assert_eq!(
            instance_id_from_rc(i32::from(i16::MAX) + 1),
            Err(DeviceError::General)
        );
        assert_eq!(
            instance_id_from_rc(-6),
            Err(DeviceError::InvalidOperation)
        );
        assert_eq!(instance_id_from_rc(-99), Err(DeviceError::General));
    }
}
