//! PSK generation and URL advertisement.

use std::net::IpAddr;

use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::Result;

pub const PSK_BYTES: usize = 16;
pub const PSK_ID_HINT: &str = "openpgp-skt";
const SCHEMA: &str = "OPENPGP+SKT";

/// The pre-shared key: 16 random octets and their uppercase-hex form,
/// both derived from the same draw. Immutable after creation; zeroized
/// on drop.
pub struct Psk {
    bytes: Zeroizing<[u8; PSK_BYTES]>,
    hex: Zeroizing<String>,
}

impl Psk {
    /// Draws a fresh PSK from a cryptographic RNG.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; PSK_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let hex = hex::encode_upper(bytes);
        Ok(Psk { bytes: Zeroizing::new(bytes), hex: Zeroizing::new(hex) })
    }

    /// The raw secret bytes, as handed to the TLS-PSK credential
    /// callback.
    pub fn secret(&self) -> &[u8; PSK_BYTES] {
        &self.bytes
    }

    /// The 32-character uppercase-hex identity shown to the user.
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

/// Builds the fixed-grammar advertisement URL:
/// `OPENPGP+SKT://<32 hex-upper>@<host>:<port>`, bracketing IPv6 hosts.
pub fn format_url(psk_hex: &str, addr: IpAddr, port: u16) -> String {
    match addr {
        IpAddr::V4(v4) => format!("{SCHEMA}://{psk_hex}@{v4}:{port}"),
        IpAddr::V6(v6) => format!("{SCHEMA}://{psk_hex}@[{v6}]:{port}"),
    }
}

/// Parses a previously-formatted URL back into its parts. Used only by
/// the URL round-trip property test; the server never needs to parse
/// its own advertisement.
#[cfg(test)]
pub fn parse_url(url: &str) -> Option<(String, String, u16)> {
    let rest = url.strip_prefix(&format!("{SCHEMA}://"))?;
    let (psk_hex, rest) = rest.split_once('@')?;
    let (host, port) = rest.rsplit_once(':')?;
    let host = host.strip_prefix('[').and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    let port: u16 = port.parse().ok()?;
    Some((psk_hex.to_string(), host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    #[test]
    fn psk_is_32_uppercase_hex_chars() {
        let psk = Psk::generate().unwrap();
        assert_eq!(psk.hex().len(), 32);
        assert!(psk.hex().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn two_psks_differ() {
        let a = Psk::generate().unwrap();
        let b = Psk::generate().unwrap();
        assert_ne!(a.secret(), b.secret());
    }

    quickcheck! {
        fn url_round_trips_v4(bytes: [u8; 16], port: u16) -> bool {
            let hex = hex::encode_upper(bytes);
            let addr: IpAddr = [10u8, 0, 0, 1].into();
            let url = format_url(&hex, addr, port);
            match parse_url(&url) {
                Some((h, host, p)) => h == hex && host == "10.0.0.1" && p == port,
                None => false,
            }
        }

        fn url_round_trips_v6(bytes: [u8; 16], port: u16) -> bool {
            let hex = hex::encode_upper(bytes);
            let addr: IpAddr = std::net::Ipv6Addr::LOCALHOST.into();
            let url = format_url(&hex, addr, port);
            match parse_url(&url) {
                Some((h, host, p)) => h == hex && host == "::1" && p == port,
                None => false,
            }
        }
    }
}
