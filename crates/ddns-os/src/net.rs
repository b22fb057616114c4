//! IPv4 address classification
//!
//! Bit-mask predicates the update logic uses to decide whether an
//! address is worth publishing.

use std::net::Ipv4Addr;

const CLASS_A_NET: u32 = 0xff00_0000;
const CLASS_B_NET: u32 = 0xffff_0000;

/// 10.0.0.0/8, 172.16.0.0/12 or 192.168.0.0/16
pub fn is_private(addr: Ipv4Addr) -> bool {
    let bits = u32::from(addr);
    (bits & CLASS_A_NET) == 0x0a00_0000
        || (bits & 0xfff0_0000) == 0xac10_0000
        || (bits & CLASS_B_NET) == 0xc0a8_0000
}

/// 169.254.0.0/16
pub fn is_link_local(addr: Ipv4Addr) -> bool {
    (u32::from(addr) & CLASS_B_NET) == 0xa9fe_0000
}

/// 127.0.0.0/8
pub fn is_loopback(addr: Ipv4Addr) -> bool {
    (u32::from(addr) & CLASS_A_NET) == 0x7f00_0000
}

/// 0.0.0.0/8
pub fn is_zero_net(addr: Ipv4Addr) -> bool {
    (u32::from(addr) & CLASS_A_NET) == 0
}

/// Whether `addr` could be someone's public address
///
/// Rejects every range above.
pub fn is_publishable(addr: Ipv4Addr) -> bool {
    !(is_private(addr) || is_link_local(addr) || is_loopback(addr) || is_zero_net(addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn private_ranges() {
        assert!(is_private(ip("10.1.2.3")));
        assert!(is_private(ip("172.16.0.1")));
        assert!(is_private(ip("172.31.255.255")));
        assert!(!is_private(ip("172.32.0.1")));
        assert!(is_private(ip("192.168.1.1")));
        assert!(!is_private(ip("192.169.1.1")));
    }

    #[test]
    fn special_ranges() {
        assert!(is_link_local(ip("169.254.10.20")));
        assert!(is_loopback(ip("127.0.0.1")));
        assert!(is_zero_net(ip("0.1.2.3")));
        assert!(!is_zero_net(ip("1.0.0.0")));
    }

    #[test]
    fn publishable_addresses() {
        assert!(is_publishable(ip("203.0.113.5")));
        assert!(!is_publishable(ip("192.168.0.10")));
        assert!(!is_publishable(ip("127.0.0.53")));
    }
}
