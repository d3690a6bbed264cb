use crate::{Endpoint, Result, TransportError};
use core::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

/// Default port a ground-side client listens on.
pub const DEFAULT_UDP_PORT: u16 = 14540;

/// Parsed connection string, e.g. `udp://:14540` or `udp://127.0.0.1:14550`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TransportSpec {
    Udp { bind: SocketAddr },
}

impl TransportSpec {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| TransportError::InvalidSpec(format!("missing scheme in '{raw}'")))?;
        match scheme {
            "udp" => {
                let (host, port) = rest.rsplit_once(':').ok_or_else(|| {
                    TransportError::InvalidSpec(format!("missing port in '{raw}'"))
                })?;
                let port: u16 = port
                    .parse()
                    .map_err(|_| TransportError::InvalidSpec(format!("bad port in '{raw}'")))?;
                let ip = if host.is_empty() {
                    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
                } else {
                    host.trim_start_matches('[')
                        .trim_end_matches(']')
                        .parse()
                        .map_err(|_| TransportError::InvalidSpec(format!("bad host in '{raw}'")))?
                };
                Ok(TransportSpec::Udp {
                    bind: SocketAddr::new(ip, port),
                })
            }
            other => Err(TransportError::InvalidSpec(format!(
                "unknown scheme '{other}'"
            ))),
        }
    }
}

impl Default for TransportSpec {
    fn default() -> Self {
        TransportSpec::Udp {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_UDP_PORT),
        }
    }
}

impl fmt::Display for TransportSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportSpec::Udp { bind } => write!(f, "udp://{bind}"),
        }
    }
}

/// Open an endpoint for a connection string.
///
/// Errors are terminal for that endpoint: an invalid string yields
/// [`TransportError::InvalidSpec`], an occupied port [`TransportError::PortInUse`].
pub fn open(raw: &str) -> Result<Arc<dyn Endpoint>> {
    let spec = TransportSpec::parse(raw)?;
    open_spec(&spec)
}

pub fn open_spec(spec: &TransportSpec) -> Result<Arc<dyn Endpoint>> {
    match spec {
        #[cfg(feature = "udp")]
        TransportSpec::Udp { bind } => {
            let link = crate::udp::UdpLink::bind(*bind)?;
            Ok(Arc::new(link))
        }
        #[cfg(not(feature = "udp"))]
        TransportSpec::Udp { .. } => Err(TransportError::Unsupported("udp feature not enabled")),
    }
}
