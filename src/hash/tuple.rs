//! 5-tuple packet fingerprint.
//!
//! The 5-tuple of a packet is its source IP, source port, destination IP,
//! destination port and IP protocol number. The fingerprint is an IEEE
//! CRC-32 over a fixed 37-byte encoding of those fields, so equal tuples
//! always produce equal keys.

use std::net::IpAddr;

/// Computes the 32-bit fingerprint of a packet 5-tuple.
///
/// Addresses are normalized to their 16-byte form before hashing, with
/// IPv4 embedded as IPv4-mapped IPv6 (`::ffff:a.b.c.d`). An IPv4 address
/// and its mapped IPv6 form therefore fingerprint identically, while
/// native IPv6 addresses can never collide with IPv4 ones. Ports are
/// encoded big-endian.
///
/// The caller widens the result to `u64` for table lookup; the upper
/// 32 bits stay zero.
pub fn fingerprint(
    src_ip: IpAddr,
    src_port: u16,
    dst_ip: IpAddr,
    dst_port: u16,
    proto: u8,
) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&to_16_bytes(src_ip));
    hasher.update(&to_16_bytes(dst_ip));
    hasher.update(&src_port.to_be_bytes());
    hasher.update(&dst_port.to_be_bytes());
    hasher.update(&[proto]);
    hasher.finalize()
}

fn to_16_bytes(ip: IpAddr) -> [u8; 16] {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}
