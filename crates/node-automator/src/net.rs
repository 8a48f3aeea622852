//! Bootstrap address selection.

use std::net::IpAddr;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressClass {
    Loopback,
    LinkLocal,
    Private,
    Public,
}

pub fn classify(addr: IpAddr) -> AddressClass {
    match addr {
        IpAddr::V4(v4) => {
            // 0.0.0.0 is never reachable from outside the node
            if v4.is_loopback() || v4.is_unspecified() {
                AddressClass::Loopback
            } else if v4.is_link_local() {
                AddressClass::LinkLocal
            } else if v4.is_private() {
                AddressClass::Private
            } else {
                AddressClass::Public
            }
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return classify(IpAddr::V4(mapped));
            }
            if v6.is_loopback() || v6.is_unspecified() {
                AddressClass::Loopback
            } else if v6.is_unicast_link_local() {
                AddressClass::LinkLocal
            } else if v6.is_unique_local() {
                AddressClass::Private
            } else {
                AddressClass::Public
            }
        }
    }
}

/// Parse provider-reported addresses, skipping anything that is not an IP.
pub fn parse_addresses(raw: &[String]) -> Vec<IpAddr> {
    raw.iter()
        .filter_map(|s| match s.trim().parse::<IpAddr>() {
            Ok(addr) => Some(addr),
            Err(_) => {
                warn!(address = %s, "ignoring unparseable address");
                None
            }
        })
        .collect()
}

/// Pick the address to bootstrap through.
///
/// Loopback and link-local addresses are discarded. A single remaining
/// candidate is used as is; otherwise the first non-private one wins, and
/// with no such candidate nothing is selected.
pub fn select_bootstrap_address(addrs: &[IpAddr]) -> Option<IpAddr> {
    let candidates: Vec<IpAddr> = addrs
        .iter()
        .copied()
        .filter(|a| {
            !matches!(
                classify(*a),
                AddressClass::Loopback | AddressClass::LinkLocal
            )
        })
        .collect();

    if let [only] = candidates.as_slice() {
        return Some(*only);
    }
    candidates
        .into_iter()
        .find(|a| classify(*a) != AddressClass::Private)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ips(raw: &[&str]) -> Vec<IpAddr> {
        raw.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn classifies_v4() {
        assert_eq!(classify("127.0.0.1".parse().unwrap()), AddressClass::Loopback);
        assert_eq!(classify("169.254.10.1".parse().unwrap()), AddressClass::LinkLocal);
        assert_eq!(classify("10.1.2.3".parse().unwrap()), AddressClass::Private);
        assert_eq!(classify("172.20.0.1".parse().unwrap()), AddressClass::Private);
        assert_eq!(classify("192.168.1.1".parse().unwrap()), AddressClass::Private);
        assert_eq!(classify("203.0.113.5".parse().unwrap()), AddressClass::Public);
    }

    #[test]
    fn classifies_v6() {
        assert_eq!(classify("::1".parse().unwrap()), AddressClass::Loopback);
        assert_eq!(classify("fe80::1".parse().unwrap()), AddressClass::LinkLocal);
        assert_eq!(classify("fd00::5".parse().unwrap()), AddressClass::Private);
        assert_eq!(classify("2001:db8::1".parse().unwrap()), AddressClass::Public);
        assert_eq!(classify("::ffff:10.0.0.1".parse().unwrap()), AddressClass::Private);
    }

    #[test]
    fn prefers_public_over_private() {
        let addrs = ips(&["127.0.0.1", "169.254.0.9", "10.0.0.4", "203.0.113.5"]);
        assert_eq!(select_bootstrap_address(&addrs), Some("203.0.113.5".parse().unwrap()));
    }

    #[test]
    fn single_private_is_used() {
        let addrs = ips(&["10.0.0.4"]);
        assert_eq!(select_bootstrap_address(&addrs), Some("10.0.0.4".parse().unwrap()));

        let addrs = ips(&["127.0.0.1", "10.0.0.4"]);
        assert_eq!(select_bootstrap_address(&addrs), Some("10.0.0.4".parse().unwrap()));
    }

    #[test]
    fn only_local_addresses_select_nothing() {
        assert_eq!(select_bootstrap_address(&ips(&["127.0.0.1", "169.254.1.1"])), None);
        assert_eq!(select_bootstrap_address(&[]), None);
    }

    #[test]
    fn several_private_select_nothing() {
        assert_eq!(select_bootstrap_address(&ips(&["10.0.0.4", "192.168.0.2"])), None);
    }

    #[test]
    fn first_public_wins() {
        let addrs = ips(&["198.51.100.1", "10.0.0.4", "203.0.113.5"]);
        assert_eq!(select_bootstrap_address(&addrs), Some("198.51.100.1".parse().unwrap()));
    }

    #[test]
    fn unparseable_addresses_are_skipped() {
        let raw = vec!["203.0.113.5".to_string(), "not-an-ip".to_string(), " 10.0.0.1 ".to_string()];
        assert_eq!(parse_addresses(&raw), ips(&["203.0.113.5", "10.0.0.1"]));
    }
}
