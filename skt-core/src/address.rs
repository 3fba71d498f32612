//! Address selection.
//!
//! Enumerates local interfaces and chooses one non-loopback, up
//! interface address to bind the listener to. Mirrors
//! `session_status_choose_address()` in the original implementation,
//! which walked `getifaddrs(3)` picking the first entry that was
//! neither loopback nor administratively down; `if-addrs` gives us the
//! enumeration portably, but exposes neither `ifa_flags` nor `IFF_UP`,
//! so the up/down check itself falls back to a direct `getifaddrs(3)`
//! call on Unix (see `is_up` below).

use std::net::IpAddr;

use crate::error::{Error, Result};

/// An address chosen to bind the listener to, plus the interface name
/// it came from (used only for logging).
#[derive(Debug, Clone)]
pub struct ChosenAddress {
    pub addr: IpAddr,
    pub interface: String,
}

/// Picks the first non-loopback, up interface address in enumeration
/// order. Tie-breaking richer than "first" (preferring RFC1918, Wi-Fi
/// over Ethernet, etc.) is an explicit non-goal.
pub fn choose() -> Result<ChosenAddress> {
    let ifaces = if_addrs::get_if_addrs().map_err(Error::Io)?;
    for iface in ifaces {
        if iface.is_loopback() {
            log::trace!("skipping {}: loopback", iface.name);
            continue;
        }
        if !is_up(&iface.name) {
            log::trace!("skipping {}: administratively down", iface.name);
            continue;
        }
        log::trace!("candidate {}: {}", iface.name, iface.ip());
        return Ok(ChosenAddress { addr: iface.ip(), interface: iface.name });
    }
    Err(Error::NoUsableAddress)
}

/// Whether the named interface currently carries `IFF_UP`. `if-addrs`
/// only reports `name`/`addr`, with no up/down flag, so this asks the
/// kernel directly via the same `getifaddrs(3)` call the original used.
/// An interface this can't find, or a platform without the syscall, is
/// treated as up: the set of addresses `if-addrs` already enumerated is
/// the only other signal available, and refusing to bind at all would
/// be worse than a narrowly mistaken "up".
#[cfg(unix)]
fn is_up(name: &str) -> bool {
    use std::ffi::CStr;

    let mut head: *mut libc::ifaddrs = std::ptr::null_mut();
    if unsafe { libc::getifaddrs(&mut head) } != 0 {
        return true;
    }

    let mut found = false;
    let mut up = true;
    let mut cursor = head;
    while !cursor.is_null() {
        let entry = unsafe { &*cursor };
        if !entry.ifa_name.is_null() {
            let entry_name = unsafe { CStr::from_ptr(entry.ifa_name) }.to_string_lossy();
            if entry_name == name {
                found = true;
                up = entry.ifa_flags as i32 & libc::IFF_UP != 0;
                break;
            }
        }
        cursor = entry.ifa_next;
    }
    unsafe { libc::freeifaddrs(head) };
    !found || up
}

#[cfg(not(unix))]
fn is_up(_name: &str) -> bool {
    true
}
