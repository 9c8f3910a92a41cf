use std::net::IpAddr;
use std::str::FromStr;

use ip_network::IpNetwork;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid CIDR {0:?}")]
pub struct SubnetError(pub String);

/// CIDR block whose members may submit metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedSubnet(IpNetwork);

impl TrustedSubnet {
    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.0, addr) {
            (IpNetwork::V4(net), IpAddr::V6(ip)) => {
                ip.to_ipv4_mapped().is_some_and(|v4| net.contains(v4))
            }
            (net, ip) => net.contains(ip),
        }
    }
}

impl FromStr for TrustedSubnet {
    type Err = SubnetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IpNetwork::from_str(s.trim())
            .map(TrustedSubnet)
            .map_err(|_| SubnetError(s.to_string()))
    }
}

impl std::fmt::Display for TrustedSubnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_contains_v4() {
        let net: TrustedSubnet = "192.168.1.0/24".parse().unwrap();
        assert!(net.contains(ip("192.168.1.77")));
        assert!(!net.contains(ip("192.168.2.1")));
        assert!(net.contains(ip("::ffff:192.168.1.5")));
        assert!(!net.contains(ip("fe80::1")));
    }

    #[test]
    fn test_edge_prefixes() {
        let all: TrustedSubnet = "0.0.0.0/0".parse().unwrap();
        assert!(all.contains(ip("8.8.8.8")));
        let host: TrustedSubnet = "10.0.0.1/32".parse().unwrap();
        assert!(host.contains(ip("10.0.0.1")));
        assert!(!host.contains(ip("10.0.0.2")));
    }

    #[test]
    fn test_contains_v6() {
        let net: TrustedSubnet = "fd00::/8".parse().unwrap();
        assert!(net.contains(ip("fd12:3456::1")));
        assert!(!net.contains(ip("fe80::1")));
        assert!(!net.contains(ip("10.0.0.1")));
    }

    #[test]
    fn test_parse_errors() {
        assert!("192.168.1.0".parse::<TrustedSubnet>().is_err());
        assert!("192.168.1.0/33".parse::<TrustedSubnet>().is_err());
        assert!("nonsense/8".parse::<TrustedSubnet>().is_err());
        assert_eq!(
            "10.0.0.0/8".parse::<TrustedSubnet>().unwrap().to_string(),
            "10.0.0.0/8"
        );
    }
}
