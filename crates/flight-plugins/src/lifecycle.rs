use crate::{PluginError, Result};
use device_registry::DeviceHandle;
use parking_lot::{Condvar, Mutex, RwLock};
use std::fmt;
use tracing::{debug, warn};

/// Error type returned by lifecycle hooks.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Lifecycle position of a [`Plugin`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginState {
    Constructed,
    Initialized,
    Enabled,
    Disabled,
    Deinitialized,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PluginState::Constructed => "constructed",
            PluginState::Initialized => "initialized",
            PluginState::Enabled => "enabled",
            PluginState::Disabled => "disabled",
            PluginState::Deinitialized => "deinitialized",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleStage {
    Initialize,
    Enable,
    Disable,
    Deinitialize,
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleStage::Initialize => "initialize",
            LifecycleStage::Enable => "enable",
            LifecycleStage::Disable => "disable",
            LifecycleStage::Deinitialize => "deinitialize",
        };
        f.write_str(s)
    }
}

/// The private half of a capability plugin.
///
/// `enable` may register message handlers and timers on the device; `disable` must
/// release everything `enable` registered.
pub trait PluginImpl: Send + Sync + 'static {
    const NAME: &'static str;

    fn new(device: DeviceHandle) -> Self
    where
        Self: Sized;

    fn init(&mut self) -> Result<(), HookError> {
        Ok(())
    }

    fn enable(&mut self) -> Result<(), HookError>;

    fn disable(&mut self) -> Result<(), HookError>;

    fn deinit(&mut self) -> Result<(), HookError> {
        Ok(())
    }
}

struct Gate {
    state: PluginState,
    in_flight: usize,
}

struct Slot<I> {
    /// Last hook that actually ran. Lags `Gate::state` while a shutdown drains.
    stage: PluginState,
    imp: I,
}

/// Lifecycle holder binding one exclusively owned implementation to one device.
///
/// Construction runs initialize and enable; [`shutdown`](Self::shutdown) or drop runs
/// disable and deinitialize. Operations go through [`with_enabled`](Self::with_enabled),
/// which fails with [`PluginError::NotEnabled`] outside the enabled window.
///
/// A shutdown closes the gate first, so later operations fail at once, then waits for
/// operations already admitted (a command in flight is awaited to its end) before the
/// disable hook runs. Nothing on the admission path blocks behind a pending shutdown.
pub struct Plugin<I: PluginImpl> {
    device: DeviceHandle,
    gate: Mutex<Gate>,
    idle: Condvar,
    slot: RwLock<Slot<I>>,
}

impl<I: PluginImpl> Plugin<I> {
    pub fn new(device: &DeviceHandle) -> Result<Self> {
        Self::with_impl(device, I::new(device.clone()))
    }

    /// Attach an already built implementation.
    pub fn with_impl(device: &DeviceHandle, mut imp: I) -> Result<Self> {
        let failed = |stage, e: HookError| PluginError::Lifecycle {
            plugin: I::NAME,
            stage,
            reason: e.to_string(),
        };

        imp.init().map_err(|e| failed(LifecycleStage::Initialize, e))?;
        if let Err(e) = imp.enable() {
            if let Err(cleanup) = imp.deinit() {
                warn!(plugin = I::NAME, device = %device.id(), error = %cleanup, "deinitialize after failed enable");
            }
            return Err(failed(LifecycleStage::Enable, e));
        }
        debug!(plugin = I::NAME, device = %device.id(), "plugin enabled");

        Ok(Self {
            device: device.clone(),
            gate: Mutex::new(Gate {
                state: PluginState::Enabled,
                in_flight: 0,
            }),
            idle: Condvar::new(),
            slot: RwLock::new(Slot {
                stage: PluginState::Enabled,
                imp,
            }),
        })
    }

    pub fn state(&self) -> PluginState {
        self.gate.lock().state
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    /// Run `op` against the implementation if the plugin is enabled.
    pub fn with_enabled<R>(&self, op: impl FnOnce(&I) -> R) -> Result<R> {
        {
            let mut gate = self.gate.lock();
            if gate.state != PluginState::Enabled {
                return Err(PluginError::NotEnabled {
                    plugin: I::NAME,
                    state: gate.state,
                });
            }
            gate.in_flight += 1;
        }
        let _admitted = Admitted(self);
        // No writer can be queued here: shutdown takes the write lock only after
        // every admitted operation has left.
        let slot = self.slot.read();
        Ok(op(&slot.imp))
    }

    /// Disable and deinitialize now. Later calls do nothing; failures are logged.
    ///
    /// Must not be called from inside an operation of the same plugin.
    pub fn shutdown(&self) {
        {
            let mut gate = self.gate.lock();
            if gate.state == PluginState::Enabled {
                gate.state = PluginState::Disabled;
            }
            while gate.in_flight > 0 {
                self.idle.wait(&mut gate);
            }
        }

        let mut slot = self.slot.write();
        if slot.stage == PluginState::Enabled {
            slot.stage = PluginState::Disabled;
            if let Err(e) = slot.imp.disable() {
                warn!(plugin = I::NAME, device = %self.device.id(), error = %e, "disable failed");
            }
        }
        if slot.stage == PluginState::Disabled {
            slot.stage = PluginState::Deinitialized;
            if let Err(e) = slot.imp.deinit() {
                warn!(plugin = I::NAME, device = %self.device.id(), error = %e, "deinitialize failed");
            }
            self.gate.lock().state = PluginState::Deinitialized;
            debug!(plugin = I::NAME, device = %self.device.id(), "plugin deinitialized");
        }
    }
}

/// Releases one admission when an operation ends, including by unwinding.
struct Admitted<'a, I: PluginImpl>(&'a Plugin<I>);

impl<I: PluginImpl> Drop for Admitted<'_, I> {
    fn drop(&mut self) {
        let mut gate = self.0.gate.lock();
        gate.in_flight -= 1;
        if gate.in_flight == 0 {
            self.0.idle.notify_all();
        }
    }
}

impl<I: PluginImpl> Drop for Plugin<I> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<I: PluginImpl> fmt::Debug for Plugin<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &I::NAME)
            .field("device", &self.device.id())
            .field("state", &self.state())
            .finish()
    }
}
