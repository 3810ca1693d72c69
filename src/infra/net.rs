use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use tracing::{debug, warn};

/// Best guess at an address of this machine that containers can reach.
///
/// Asks the kernel which source address it would use to reach a public
/// address; connecting a UDP socket sends nothing. Falls back to loopback.
pub fn non_local_address() -> IpAddr {
    let guess = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip());

    match guess {
        Ok(ip) if !ip.is_loopback() && !ip.is_unspecified() => {
            debug!("Endereço não-local detectado: {ip}");
            ip
        }
        Ok(ip) => {
            warn!("Nenhum endereço não-local encontrado ({ip}), usando loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
        Err(e) => {
            warn!("Falha ao determinar interface principal: {e}. Usando loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_local_address_is_never_unspecified() {
        assert!(!non_local_address().is_unspecified());
    }
}
