use crate::lifecycle::{HookError, Plugin, PluginImpl, PluginState};
use crate::{CommandResult, Result};
use device_registry::{DeviceHandle, HandlerId};
use link_transport::{Command, MissionItem, Payload, PayloadKind};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Index of the last reached item out of the uploaded total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionProgress {
    pub current: u32,
    pub total: u32,
}

impl MissionProgress {
    pub fn is_finished(&self) -> bool {
        self.total > 0 && self.current >= self.total
    }
}

type ProgressObserver = Arc<dyn Fn(MissionProgress) + Send + Sync>;

#[derive(Default)]
struct Shared {
    progress: Mutex<Option<MissionProgress>>,
    observer: Mutex<Option<ProgressObserver>>,
}

pub(crate) struct MissionImpl {
    device: DeviceHandle,
    shared: Arc<Shared>,
    handler: Option<HandlerId>,
}

impl PluginImpl for MissionImpl {
    const NAME: &'static str = "mission";

    fn new(device: DeviceHandle) -> Self {
        Self {
            device,
            shared: Arc::new(Shared::default()),
            handler: None,
        }
    }

    fn enable(&mut self) -> std::result::Result<(), HookError> {
        let shared = Arc::clone(&self.shared);
        self.handler = Some(self.device.register_handler(
            PayloadKind::MissionProgress,
            move |payload| {
                if let Payload::MissionProgress { current, total } = payload {
                    let progress = MissionProgress {
                        current: *current,
                        total: *total,
                    };
                    *shared.progress.lock() = Some(progress);
                    let observer = shared.observer.lock().clone();
                    if let Some(observer) = observer {
                        observer(progress);
                    }
                }
            },
        ));
        Ok(())
    }

    fn disable(&mut self) -> std::result::Result<(), HookError> {
        if let Some(id) = self.handler.take() {
            self.device.unregister_handler(id);
        }
        *self.shared.observer.lock() = None;
        Ok(())
    }
}

impl MissionImpl {
    fn upload(&self, items: Vec<MissionItem>) -> CommandResult {
        let total = match u32::try_from(items.len()) {
            Ok(0) | Err(_) => return CommandResult::InvalidArgument,
            Ok(n) => n,
        };
        let result = CommandResult::from(self.device.call(Command::MissionUpload { items }));
        if result.is_success() {
            *self.shared.progress.lock() = Some(MissionProgress { current: 0, total });
        }
        info!(device = %self.device.id(), items = total, %result, "mission upload");
        result
    }

    fn issue(&self, command: Command) -> CommandResult {
        let name = command.name();
        let result = CommandResult::from(self.device.call(command));
        debug!(device = %self.device.id(), command = name, %result, "mission command");
        result
    }
}

/// Upload and fly a list of waypoints.
///
/// Progress reports arrive on the delivery thread; the observer registered with
/// [`subscribe_progress`](Self::subscribe_progress) must only record or signal, not
/// issue commands.
pub struct Mission {
    plugin: Plugin<MissionImpl>,
}

impl Mission {
    pub fn new(device: &DeviceHandle) -> Result<Self> {
        Ok(Self {
            plugin: Plugin::new(device)?,
        })
    }

    pub fn state(&self) -> PluginState {
        self.plugin.state()
    }

    pub fn shutdown(&self) {
        self.plugin.shutdown();
    }

    /// Replace the mission on the device. An empty list, or one longer than `u32::MAX`
    /// items, is rejected locally.
    pub fn upload_mission(&self, items: Vec<MissionItem>) -> Result<CommandResult> {
        self.plugin.with_enabled(|m| m.upload(items))
    }

    /// Start or resume the uploaded mission.
    pub fn start_mission(&self) -> Result<CommandResult> {
        self.plugin.with_enabled(|m| m.issue(Command::MissionStart))
    }

    pub fn pause_mission(&self) -> Result<CommandResult> {
        self.plugin.with_enabled(|m| m.issue(Command::MissionPause))
    }

    pub fn subscribe_progress<F>(&self, observer: F) -> Result<()>
    where
        F: Fn(MissionProgress) + Send + Sync + 'static,
    {
        self.plugin
            .with_enabled(|m| *m.shared.observer.lock() = Some(Arc::new(observer)))
    }

    pub fn progress(&self) -> Result<Option<MissionProgress>> {
        self.plugin.with_enabled(|m| *m.shared.progress.lock())
    }

    pub fn mission_finished(&self) -> Result<bool> {
        self.plugin.with_enabled(|m| {
            m.shared
                .progress
                .lock()
                .is_some_and(|p| p.is_finished())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::harness;
    use crate::PluginError;
    use link_transport::{AckCode, CameraAction};

    fn waypoint(lat: f64) -> MissionItem {
        MissionItem {
            latitude_deg: lat,
            longitude_deg: 8.545,
            relative_altitude_m: 10.0,
            speed_m_s: 5.0,
            is_fly_through: false,
            gimbal_pitch_deg: 0.0,
            gimbal_yaw_deg: 0.0,
            camera_action: CameraAction::None,
        }
    }

    #[test]
    fn empty_upload_is_rejected_locally() {
        let h = harness();
        let mission = Mission::new(&h.device).unwrap();
        assert_eq!(
            mission.upload_mission(Vec::new()).unwrap(),
            CommandResult::InvalidArgument
        );
        assert!(h.remote.try_recv().is_none());
    }

    #[test]
    fn progress_reaches_the_observer_and_finishes() {
        let h = harness();
        let mission = Mission::new(&h.device).unwrap();

        let responder = h.answer_next(AckCode::Accepted);
        let items = vec![waypoint(47.398), waypoint(47.399)];
        assert_eq!(mission.upload_mission(items).unwrap(), CommandResult::Success);
        assert!(matches!(responder.join().unwrap(), Command::MissionUpload { items } if items.len() == 2));
        assert_eq!(
            mission.progress().unwrap(),
            Some(MissionProgress { current: 0, total: 2 })
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        mission
            .subscribe_progress(move |p| s.lock().push(p.current))
            .unwrap();
        h.emit(Payload::MissionProgress { current: 1, total: 2 });
        h.settle();
        assert!(!mission.mission_finished().unwrap());
        h.emit(Payload::MissionProgress { current: 2, total: 2 });
        h.settle();
        assert!(mission.mission_finished().unwrap());
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn every_operation_fails_fast_after_shutdown() {
        let h = harness();
        let mission = Mission::new(&h.device).unwrap();
        mission.shutdown();

        let commands: [fn(&Mission) -> Result<CommandResult>; 2] =
            [Mission::start_mission, Mission::pause_mission];
        for call in commands {
            assert!(matches!(
                call(&mission),
                Err(PluginError::NotEnabled { plugin: "mission", .. })
            ));
        }
        assert!(mission.upload_mission(vec![waypoint(47.398)]).is_err());
        assert!(mission.subscribe_progress(|_| {}).is_err());
        assert!(mission.progress().is_err());
        assert!(mission.mission_finished().is_err());
        assert!(h.remote.try_recv().is_none());
    }
}
