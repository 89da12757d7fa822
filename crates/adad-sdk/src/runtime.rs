//! Device runtime answering the engine's control channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use adad_protocol::{
    AudioDeviceDescriptor, BufferExchange, ControlChannel, CtlOp, DeviceError, DeviceId,
    InstanceId, RESULT_OK,
};

use crate::instance::{DeviceInstance, InstanceState, InstanceStats};
use crate::io::DeviceDriver;

/// Process-wide source of instance ids.
///
/// Instance ids come from a single counter shared by every device in the
/// process, so an id observed by the engine is never reused while another
/// instance holding it is alive in the same runtime.
static NEXT_INSTANCE_ID: AtomicU32 = AtomicU32::new(0);

fn allocate_instance_id<T>(live: &HashMap<InstanceId, T>) -> Option<InstanceId> {
    for _ in 0..i16::MAX as u32 {
        let raw = (NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed) % i16::MAX as u32) + 1;
        if let Some(id) = InstanceId::new(raw as i16) {
            if !live.contains_key(&id) {
                return Some(id);
            }
        }
    }
    None
}

struct DeviceProfile {
    descriptor: AudioDeviceDescriptor,
    driver: Arc<dyn DeviceDriver>,
}

struct InstanceEntry {
    device: DeviceId,
    cell: Arc<Mutex<DeviceInstance>>,
}

#[derive(Default)]
struct RuntimeState {
    devices: HashMap<DeviceId, DeviceProfile>,
    instances: HashMap<InstanceId, InstanceEntry>,
}

/// Application-side device runtime.
///
/// Registers as the [`ControlChannel`] for any number of devices and owns
/// their instances. The runtime lock covers only the lookup tables; instance
/// operations, including worker joins, run outside it so one device's stop
/// never stalls another's.
pub struct DeviceRuntime {
    exchange: Arc<dyn BufferExchange>,
    state: Mutex<RuntimeState>,
}

impl DeviceRuntime {
    /// Creates a runtime whose workers move samples through `exchange`.
    pub fn new(exchange: Arc<dyn BufferExchange>) -> Self {
        Self {
            exchange,
            state: Mutex::new(RuntimeState::default()),
        }
    }

    /// Makes a device available to this runtime under the handle the engine
    /// assigned at registration. Re-adding a handle replaces its profile;
    /// existing instances keep the endpoints they were built with.
    pub fn add_device(
        &self,
        device: DeviceId,
        descriptor: AudioDeviceDescriptor,
        driver: Arc<dyn DeviceDriver>,
    ) {
        info!(%device, direction = ?descriptor.direction, "device added to runtime");
        self.state
            .lock()
            .devices
            .insert(device, DeviceProfile { descriptor, driver });
    }

    /// Forgets a device and destroys any of its instances still alive.
    /// Returns `false` when the handle was never added.
    pub fn remove_device(&self, device: DeviceId) -> bool {
        let (known, stragglers) = {
            let mut state = self.state.lock();
            let known = state.devices.remove(&device).is_some();
            let ids: Vec<InstanceId> = state
                .instances
                .iter()
                .filter(|(_, entry)| entry.device == device)
                .map(|(id, _)| *id)
                .collect();
            let cells: Vec<_> = ids
                .into_iter()
                .filter_map(|id| state.instances.remove(&id).map(|entry| entry.cell))
                .collect();
            (known, cells)
        };
        for cell in stragglers {
            let _ = cell.lock().destroy();
        }
        if known {
            info!(%device, "device removed from runtime");
        }
        known
    }

    /// Destroys every instance and forgets every device.
    pub fn shutdown(&self) {
        let cells: Vec<_> = {
            let mut state = self.state.lock();
            state.devices.clear();
            state
                .instances
                .drain()
                .map(|(_, entry)| entry.cell)
                .collect()
        };
        let count = cells.len();
        for cell in cells {
            let _ = cell.lock().destroy();
        }
        if count > 0 {
            info!(instances = count, "runtime shut down");
        }
    }

    /// Lifecycle state of an instance, if it is still alive.
    pub fn instance_state(&self, instance: InstanceId) -> Option<InstanceState> {
        let cell = self.instance_cell(instance)?;
        let state = cell.lock().state();
        Some(state)
    }

    /// Transfer counters of an instance, if it is still alive.
    pub fn instance_stats(&self, instance: InstanceId) -> Option<InstanceStats> {
        let cell = self.instance_cell(instance)?;
        let stats = cell.lock().stats();
        Some(stats)
    }

    /// Number of devices added to the runtime.
    pub fn device_count(&self) -> usize {
        self.state.lock().devices.len()
    }

    /// Number of live instances across all devices.
    pub fn instance_count(&self) -> usize {
        self.state.lock().instances.len()
    }

    fn instance_cell(&self, instance: InstanceId) -> Option<Arc<Mutex<DeviceInstance>>> {
        self.state
            .lock()
            .instances
            .get(&instance)
            .map(|entry| Arc::clone(&entry.cell))
    }

    fn create_instance(&self, device: DeviceId) -> Result<InstanceId, DeviceError> {
        let mut state = self.state.lock();
        let profile = state
            .devices
            .get(&device)
            .ok_or(DeviceError::InvalidDeviceId)?;
        let id = allocate_instance_id(&state.instances).ok_or(DeviceError::General)?;
        let instance = DeviceInstance::new(
            device,
            id,
            &profile.descriptor,
            Arc::clone(&self.exchange),
            Arc::clone(&profile.driver),
        );
        state.instances.insert(
            id,
            InstanceEntry {
                device,
                cell: Arc::new(Mutex::new(instance)),
            },
        );
        info!(%device, instance = %id, "instance created");
        Ok(id)
    }

    fn destroy_instance(
        &self,
        device: DeviceId,
        instance: Option<InstanceId>,
    ) -> Result<(), DeviceError> {
        let id = instance.ok_or(DeviceError::InvalidInstanceId)?;
        let cell = {
            let mut state = self.state.lock();
            let entry = state
                .instances
                .get(&id)
                .ok_or(DeviceError::InvalidInstanceId)?;
            if entry.device != device {
                return Err(DeviceError::InvalidCombinedId);
            }
            match state.instances.remove(&id) {
                Some(entry) => entry.cell,
                None => return Err(DeviceError::InvalidInstanceId),
            }
        };
        let result = cell.lock().destroy();
        info!(%device, instance = %id, "instance destroyed");
        result
    }

    fn with_instance(
        &self,
        device: DeviceId,
        instance: Option<InstanceId>,
        op: impl FnOnce(&mut DeviceInstance) -> Result<(), DeviceError>,
    ) -> Result<(), DeviceError> {
        let id = instance.ok_or(DeviceError::InvalidInstanceId)?;
        let cell = {
            let state = self.state.lock();
            let entry = state
                .instances
                .get(&id)
                .ok_or(DeviceError::InvalidInstanceId)?;
            if entry.device != device {
                return Err(DeviceError::InvalidCombinedId);
            }
            Arc::clone(&entry.cell)
        };
        let result = op(&mut cell.lock());
        result
    }

    fn rc(result: Result<(), DeviceError>) -> i32 {
        match result {
            Ok(()) => i32::from(RESULT_OK),
            Err(err) => i32::from(err.code()),
        }
    }
}

impl ControlChannel for DeviceRuntime {
    fn control(
        &self,
        device: DeviceId,
        instance: Option<InstanceId>,
        op: CtlOp,
        _extra: usize,
    ) -> i32 {
        debug!(%device, ?instance, ?op, "control request");
        match op {
            CtlOp::CreateInstance => match self.create_instance(device) {
                Ok(id) => i32::from(id.get()),
                Err(err) => i32::from(err.code()),
            },
            CtlOp::DestroyInstance => Self::rc(self.destroy_instance(device, instance)),
            CtlOp::Start => Self::rc(self.with_instance(device, instance, DeviceInstance::start)),
            CtlOp::Stop => Self::rc(self.with_instance(device, instance, DeviceInstance::stop)),
            CtlOp::Pause => Self::rc(self.with_instance(device, instance, DeviceInstance::pause)),
            CtlOp::Resume => Self::rc(self.with_instance(device, instance, DeviceInstance::resume)),
            CtlOp::Reset => Self::rc(self.with_instance(device, instance, DeviceInstance::reset)),
            CtlOp::Restart => {
                Self::rc(self.with_instance(device, instance, DeviceInstance::restart))
            }
        }
    }
}

impl Drop for DeviceRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
