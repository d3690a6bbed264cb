use crate::{DeviceId, Endpoint, Frame, Payload, Result, TransportError};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// In-process link. Each pair is independent; the [`MockDevice`] half plays the
/// vehicle side.
pub struct MockLink {
    name: String,
    inbound: Receiver<Frame>,
    outbound: Sender<Frame>,
}

/// The device-facing half of a [`MockLink`]. Cheap to clone.
#[derive(Clone)]
pub struct MockDevice {
    to_client: Sender<Frame>,
    from_client: Receiver<Frame>,
}

impl MockLink {
    pub fn pair(name: &str) -> (MockLink, MockDevice) {
        let (to_client, inbound) = channel::unbounded();
        let (outbound, from_client) = channel::unbounded();
        (
            MockLink {
                name: format!("mock://{name}"),
                inbound,
                outbound,
            },
            MockDevice {
                to_client,
                from_client,
            },
        )
    }
}

impl Endpoint for MockLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn recv(&self, timeout: Duration) -> Result<Frame> {
        self.inbound.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => TransportError::Timeout,
            RecvTimeoutError::Disconnected => TransportError::Closed,
        })
    }

    fn send(&self, frame: &Frame) -> Result<()> {
        self.outbound
            .send(frame.clone())
            .map_err(|_| TransportError::Closed)
    }
}

impl MockDevice {
    /// Deliver a frame to the client side.
    pub fn inject(&self, frame: Frame) -> Result<()> {
        self.to_client
            .send(frame)
            .map_err(|_| TransportError::Closed)
    }

    pub fn emit(&self, device: DeviceId, payload: Payload) -> Result<()> {
        self.inject(Frame::new(device, payload))
    }

    /// Wait for the next frame the client sent.
    pub fn recv(&self, timeout: Duration) -> Result<Frame> {
        self.from_client.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => TransportError::Timeout,
            RecvTimeoutError::Disconnected => TransportError::Closed,
        })
    }

    pub fn try_recv(&self) -> Option<Frame> {
        self.from_client.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VehicleKind;

    #[test]
    fn frames_flow_both_ways() -> anyhow::Result<()> {
        let (link, device) = MockLink::pair("t");
        assert_eq!(link.name(), "mock://t");

        device.emit(
            DeviceId(42),
            Payload::Heartbeat {
                vehicle: VehicleKind::Multicopter,
            },
        )?;
        let frame = link.recv(Duration::from_millis(100))?;
        assert_eq!(frame.device, DeviceId(42));

        link.send(&Frame::new(DeviceId(42), Payload::RequestVersion))?;
        let out = device.recv(Duration::from_millis(100))?;
        assert_eq!(out.payload, Payload::RequestVersion);
        assert!(device.try_recv().is_none());
        Ok(())
    }

    #[test]
    fn dropping_the_device_closes_the_link() {
        let (link, device) = MockLink::pair("t");
        assert_eq!(
            link.recv(Duration::from_millis(5)).err(),
            Some(TransportError::Timeout)
        );
        drop(device);
        assert_eq!(
            link.recv(Duration::from_millis(5)).err(),
            Some(TransportError::Closed)
        );
    }
}
