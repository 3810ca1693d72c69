use crate::domain::{PortProbe, ServiceAddress};
use crate::error::PortAllocationError;
use rand::seq::SliceRandom;
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::ops::RangeInclusive;
use std::time::Duration;
use tracing::debug;

/// Coordinator port range used for the event bus.
pub const COORDINATOR_PORT_RANGE: RangeInclusive<u16> = 2181..=2681;
/// Broker port range used for the event bus.
pub const BROKER_PORT_RANGE: RangeInclusive<u16> = 9092..=9592;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(100);

/// Finds a TCP port in `range` that can currently be bound on every interface.
///
/// Candidates are tried in random order, each at most once, so a fully
/// occupied range fails instead of looping. The listener is dropped before
/// returning; another process may still grab the port before the caller
/// uses it.
pub fn find_free_port(range: RangeInclusive<u16>) -> Result<u16, PortAllocationError> {
    let (min, max) = (*range.start(), *range.end());
    if range.is_empty() {
        return Err(PortAllocationError::EmptyRange { min, max });
    }

    let mut candidates: Vec<u16> = range.collect();
    candidates.shuffle(&mut rand::thread_rng());

    for port in candidates {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)) {
            Ok(listener) => {
                drop(listener);
                debug!("Porta livre encontrada: {port}");
                return Ok(port);
            }
            Err(e) => debug!("Porta {port} ocupada: {e}"),
        }
    }

    Err(PortAllocationError::Exhausted { min, max })
}

/// Plain TCP connect probe.
#[derive(Debug, Default, Clone)]
pub struct TcpPortProbe;

impl PortProbe for TcpPortProbe {
    fn is_open(&self, addr: &ServiceAddress) -> bool {
        match addr.to_socket_addr() {
            Ok(socket_addr) => TcpStream::connect_timeout(&socket_addr, CONNECT_TIMEOUT).is_ok(),
            Err(_) => false,
        }
    }
}
