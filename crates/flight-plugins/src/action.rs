use crate::lifecycle::{HookError, Plugin, PluginImpl, PluginState};
use crate::{CommandResult, Result};
use device_registry::DeviceHandle;
use link_transport::Command;
use parking_lot::Mutex;
use tracing::info;

pub const DEFAULT_TAKEOFF_ALTITUDE_M: f32 = 2.5;

pub(crate) struct ActionImpl {
    device: DeviceHandle,
    takeoff_altitude_m: Mutex<f32>,
}

impl PluginImpl for ActionImpl {
    const NAME: &'static str = "action";

    fn new(device: DeviceHandle) -> Self {
        Self {
            device,
            takeoff_altitude_m: Mutex::new(DEFAULT_TAKEOFF_ALTITUDE_M),
        }
    }

    fn enable(&mut self) -> std::result::Result<(), HookError> {
        Ok(())
    }

    fn disable(&mut self) -> std::result::Result<(), HookError> {
        Ok(())
    }
}

impl ActionImpl {
    fn issue(&self, command: Command) -> CommandResult {
        let name = command.name();
        let result = CommandResult::from(self.device.call(command));
        info!(device = %self.device.id(), command = name, %result, "action");
        result
    }
}

/// One-shot vehicle commands.
///
/// Every method blocks until the device returns a terminal result or the session's
/// command timeout (with retries) expires. Commands to the same device never overlap,
/// including commands issued through other plugins. No telemetry precondition is
/// checked here; callers gate commands themselves (see [`CommandSequence`](crate::CommandSequence)).
pub struct Action {
    plugin: Plugin<ActionImpl>,
}

impl Action {
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

    pub fn arm(&self) -> Result<CommandResult> {
        self.plugin.with_enabled(|a| a.issue(Command::Arm))
    }

    pub fn disarm(&self) -> Result<CommandResult> {
        self.plugin.with_enabled(|a| a.issue(Command::Disarm))
    }

    /// Stop the motors immediately, in the air or not.
    pub fn kill(&self) -> Result<CommandResult> {
        self.plugin.with_enabled(|a| a.issue(Command::Kill))
    }

    /// Climb to the configured [`takeoff_altitude`](Self::takeoff_altitude).
    pub fn takeoff(&self) -> Result<CommandResult> {
        self.plugin.with_enabled(|a| {
            let altitude_m = *a.takeoff_altitude_m.lock();
            a.issue(Command::Takeoff { altitude_m })
        })
    }

    pub fn land(&self) -> Result<CommandResult> {
        self.plugin.with_enabled(|a| a.issue(Command::Land))
    }

    pub fn return_to_launch(&self) -> Result<CommandResult> {
        self.plugin.with_enabled(|a| a.issue(Command::ReturnToLaunch))
    }

    pub fn transition_to_fixedwing(&self) -> Result<CommandResult> {
        self.plugin
            .with_enabled(|a| a.issue(Command::TransitionToFixedwing))
    }

    pub fn transition_to_multicopter(&self) -> Result<CommandResult> {
        self.plugin
            .with_enabled(|a| a.issue(Command::TransitionToMulticopter))
    }

    /// Altitude used by later [`takeoff`](Self::takeoff) calls, relative to home.
    pub fn set_takeoff_altitude(&self, altitude_m: f32) -> Result<CommandResult> {
        self.plugin.with_enabled(|a| {
            if !altitude_m.is_finite() || altitude_m <= 0.0 {
                return CommandResult::InvalidArgument;
            }
            *a.takeoff_altitude_m.lock() = altitude_m;
            CommandResult::Success
        })
    }

    pub fn takeoff_altitude(&self) -> Result<f32> {
        self.plugin.with_enabled(|a| *a.takeoff_altitude_m.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::harness;
    use crate::PluginError;
    use link_transport::AckCode;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn reports_the_specific_result() {
        let h = harness();
        let action = Action::new(&h.device).unwrap();

        let responder = h.answer_next(AckCode::TemporarilyRejected);
        assert_eq!(action.arm().unwrap(), CommandResult::Busy);
        assert_eq!(responder.join().unwrap(), Command::Arm);

        let responder = h.answer_next(AckCode::Denied);
        assert_eq!(action.transition_to_fixedwing().unwrap(), CommandResult::CommandDenied);
        responder.join().unwrap();

        assert_eq!(action.land().unwrap(), CommandResult::Timeout);
    }

    #[test]
    fn takeoff_uses_the_configured_altitude() {
        let h = harness();
        let action = Action::new(&h.device).unwrap();
        assert_eq!(action.takeoff_altitude().unwrap(), DEFAULT_TAKEOFF_ALTITUDE_M);
        assert_eq!(
            action.set_takeoff_altitude(-3.0).unwrap(),
            CommandResult::InvalidArgument
        );
        assert_eq!(action.set_takeoff_altitude(12.0).unwrap(), CommandResult::Success);

        let responder = h.answer_next(AckCode::Accepted);
        assert_eq!(action.takeoff().unwrap(), CommandResult::Success);
        assert_eq!(
            responder.join().unwrap(),
            Command::Takeoff { altitude_m: 12.0 }
        );
    }

    #[test]
    fn plugins_on_one_device_share_the_command_gate() {
        let h = harness();
        let first = Arc::new(Action::new(&h.device).unwrap());
        let second = Arc::new(Action::new(&h.device).unwrap());

        let remote = h.remote.clone();
        let responder = thread::spawn(move || {
            for _ in 0..2 {
                let frame = remote.recv(Duration::from_secs(2)).unwrap();
                thread::sleep(Duration::from_millis(40));
                assert!(remote.try_recv().is_none(), "two commands pending at once");
                if let link_transport::Payload::Command { token, .. } = frame.payload {
                    remote
                        .emit(
                            frame.device,
                            link_transport::Payload::CommandAck {
                                token,
                                code: AckCode::Accepted,
                            },
                        )
                        .unwrap();
                }
            }
        });

        let a = {
            let first = Arc::clone(&first);
            thread::spawn(move || first.arm())
        };
        let b = {
            let second = Arc::clone(&second);
            thread::spawn(move || second.kill())
        };
        assert_eq!(a.join().unwrap().unwrap(), CommandResult::Success);
        assert_eq!(b.join().unwrap().unwrap(), CommandResult::Success);
        responder.join().unwrap();
    }

    #[test]
    fn every_command_fails_fast_after_shutdown() {
        let h = harness();
        let action = Action::new(&h.device).unwrap();
        action.shutdown();
        let calls: [fn(&Action) -> Result<CommandResult>; 8] = [
            Action::arm,
            Action::disarm,
            Action::kill,
            Action::takeoff,
            Action::land,
            Action::return_to_launch,
            Action::transition_to_fixedwing,
            Action::transition_to_multicopter,
        ];
        for call in calls {
            assert!(matches!(
                call(&action),
                Err(PluginError::NotEnabled { plugin: "action", .. })
            ));
        }
        assert!(action.takeoff_altitude().is_err());
        assert!(h.remote.try_recv().is_none());
    }
}
