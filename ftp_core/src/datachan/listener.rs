//! Wire-format helpers for `PORT`/`PASV` (RFC 959) and `EPRT`/`EPSV`
//! (RFC 2428) arguments and replies.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::error::ProtocolError;

/// Parses a `PORT h1,h2,h3,h4,p1,p2` argument into a socket address.
pub fn parse_port(arg: &str) -> Result<SocketAddr, ProtocolError> {
    let parts: Vec<&str> = arg.split(',').collect();
    if parts.len() != 6 {
        return Err(ProtocolError::InvalidArguments("PORT".into()));
    }
    let mut nums = [0u16; 6];
    for (i, p) in parts.iter().enumerate() {
        nums[i] = p.trim().parse().map_err(|_| ProtocolError::InvalidArguments("PORT".into()))?;
    }
    if nums.iter().take(4).any(|&n| n > 255) {
        return Err(ProtocolError::InvalidArguments("PORT".into()));
    }
    let ip = Ipv4Addr::new(nums[0] as u8, nums[1] as u8, nums[2] as u8, nums[3] as u8);
    let port = (nums[4] << 8) | nums[5];
    Ok(SocketAddr::new(IpAddr::V4(ip), port))
}

/// Formats a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply body.
pub fn format_pasv_reply(ip: Ipv4Addr, port: u16) -> String {
    let octets = ip.octets();
    let p1 = port >> 8;
    let p2 = port & 0xff;
    format!(
        "Entering Passive Mode ({},{},{},{},{},{})",
        octets[0], octets[1], octets[2], octets[3], p1, p2
    )
}

/// Parses an `EPRT |1|h|p|` or `EPRT |2|h|p|` argument (RFC 2428).
pub fn parse_eprt(arg: &str) -> Result<SocketAddr, ProtocolError> {
    let delim = arg.chars().next().ok_or_else(|| ProtocolError::InvalidArguments("EPRT".into()))?;
    let parts: Vec<&str> = arg.trim_matches(delim).split(delim).collect();
    if parts.len() != 3 {
        return Err(ProtocolError::InvalidArguments("EPRT".into()));
    }
    let ip: IpAddr = parts[1].parse().map_err(|_| ProtocolError::InvalidArguments("EPRT".into()))?;
    let port: u16 = parts[2].parse().map_err(|_| ProtocolError::InvalidArguments("EPRT".into()))?;
    Ok(SocketAddr::new(ip, port))
}

/// Formats a `229 Entering Extended Passive Mode (|||p|)` reply body (RFC
/// 2428: host is omitted, only the port is returned).
pub fn format_epsv_reply(port: u16) -> String {
    format!("Entering Extended Passive Mode (|||{port}|)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_port_roundtrip() {
        let addr = parse_port("127,0,0,1,19,136").unwrap();
        assert_eq!(addr, SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 5000));
    }

    #[test]
    fn format_pasv_reply_matches_rfc_shape() {
        let s = format_pasv_reply(Ipv4Addr::new(10, 0, 0, 1), 5001);
        assert_eq!(s, "Entering Passive Mode (10,0,0,1,19,137)");
    }

    #[test]
    fn parse_eprt_ipv4() {
        let addr = parse_eprt("|1|132.235.1.2|6275|").unwrap();
        assert_eq!(addr, SocketAddr::new(IpAddr::V4(Ipv4Addr::new(132, 235, 1, 2)), 6275));
    }

    #[test]
    fn format_epsv_reply_omits_host() {
        assert_eq!(format_epsv_reply(6275), "Entering Extended Passive Mode (|||6275|)");
    }
}
