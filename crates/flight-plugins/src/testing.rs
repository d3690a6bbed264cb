//! Shared fixtures for unit tests: a session fed by a mock link whose remote half is
//! scripted by the test.

use device_registry::{DeviceHandle, Session, SessionConfig};
use link_transport::{
    AckCode, Command, DeviceId, MockDevice, MockLink, Payload, VehicleKind,
};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub(crate) const DEVICE: DeviceId = DeviceId(1);

pub(crate) struct Harness {
    pub session: Session,
    pub device: DeviceHandle,
    pub remote: MockDevice,
}

impl Harness {
    /// Push a payload from the remote side as if the vehicle sent it.
    pub fn emit(&self, payload: Payload) {
        self.remote.emit(DEVICE, payload).unwrap();
    }

    /// Answer the next command with `code` on a background thread.
    pub fn answer_next(&self, code: AckCode) -> JoinHandle<Command> {
        let remote = self.remote.clone();
        thread::spawn(move || loop {
            let frame = remote.recv(Duration::from_secs(2)).unwrap();
            if let Payload::Command { token, command } = frame.payload {
                remote
                    .emit(DEVICE, Payload::CommandAck { token, code })
                    .unwrap();
                return command;
            }
        })
    }

    /// Wait briefly for the delivery thread to drain what was emitted so far.
    pub fn settle(&self) {
        thread::sleep(Duration::from_millis(60));
    }
}

pub(crate) fn harness() -> Harness {
    harness_with_timeout(150)
}

/// Like [`harness`] with a different per-attempt command timeout.
pub(crate) fn harness_with_timeout(command_timeout_ms: u64) -> Harness {
    let config = SessionConfig {
        command_timeout_ms,
        command_retries: 0,
        liveness_timeout_ms: 60_000,
        ..SessionConfig::default()
    };
    let session = Session::new(config).unwrap();
    let (link, remote) = MockLink::pair("plugin-test");
    session.add_endpoint(Arc::new(link)).unwrap();
    remote
        .emit(
            DEVICE,
            Payload::Heartbeat {
                vehicle: VehicleKind::Vtol,
            },
        )
        .unwrap();
    let device = session.wait_for_device(Duration::from_secs(2)).unwrap();
    Harness {
        session,
        device,
        remote,
    }
}
