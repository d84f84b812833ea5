//! CAN 接口状态检查
//!
//! 使用 ioctl 检查 Linux 网络接口是否存在且已启动（UP 状态）。
//! 只读操作，不需要 root 或 CAP_NET_ADMIN。

use crate::{CanDeviceError, CanDeviceErrorKind, CanError};
use libc::{AF_INET, IFF_UP, SIOCGIFFLAGS, SOCK_DGRAM, if_nametoindex, ifreq};
use std::ffi::CString;
use std::io;
use tracing::trace;

/// ifr_name 为 IFNAMSIZ = 16 字节（含结尾 NUL）
const MAX_IFACE_NAME_LEN: usize = 15;

/// socket 描述符守卫
struct FdGuard(libc::c_int);

impl Drop for FdGuard {
    fn drop(&mut self) {
        if self.0 >= 0 {
            unsafe { libc::close(self.0) };
        }
    }
}

fn invalid_name(message: String) -> CanError {
    CanError::Device(CanDeviceError::new(CanDeviceErrorKind::InvalidFrame, message))
}

/// 检查 CAN 接口是否存在且已启动
///
/// - `Ok(true)`: 存在且 IFF_UP
/// - `Ok(false)`: 存在但 DOWN
/// - `Err(CanError::Device(NotFound))`: 接口不存在
/// - `Err(CanError::Io)`: socket/ioctl 失败
pub fn check_interface_status(interface: &str) -> Result<bool, CanError> {
    if interface.is_empty() || interface.len() > MAX_IFACE_NAME_LEN {
        return Err(invalid_name(format!(
            "Interface name '{}' must be 1..={} characters long",
            interface, MAX_IFACE_NAME_LEN
        )));
    }

    let c_iface = CString::new(interface)
        .map_err(|e| invalid_name(format!("Invalid interface name: {}", e)))?;

    let ifindex = unsafe { if_nametoindex(c_iface.as_ptr()) };
    if ifindex == 0 {
        let errno = io::Error::last_os_error();
        return Err(CanError::Device(CanDeviceError::new(
            CanDeviceErrorKind::NotFound,
            format!(
                "CAN interface '{}' does not exist ({}). Please create it first:\n  sudo ip link add dev {} type can",
                interface, errno, interface
            ),
        )));
    }

    let mut ifr: ifreq = unsafe { std::mem::zeroed() };
    for (dst, src) in ifr.ifr_name.iter_mut().zip(c_iface.as_bytes_with_nul()) {
        *dst = *src as libc::c_char;
    }

    let sockfd = unsafe { libc::socket(AF_INET, SOCK_DGRAM, 0) };
    if sockfd < 0 {
        return Err(CanError::Io(io::Error::last_os_error()));
    }
    let _guard = FdGuard(sockfd);

    let result = unsafe { libc::ioctl(sockfd, SIOCGIFFLAGS, &mut ifr as *mut ifreq) };
    if result < 0 {
        return Err(CanError::Io(io::Error::last_os_error()));
    }

    // ifru_flags 是 ifr_ifru union 的第一个字段
    let flags = unsafe { *(std::ptr::addr_of!(ifr.ifr_ifru) as *const libc::c_short) };
    let is_up = (flags as i32 & IFF_UP) != 0;

    trace!(
        "Interface '{}' status: {}",
        interface,
        if is_up { "UP" } else { "DOWN" }
    );
    Ok(is_up)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_interface_suggests_creation() {
        match check_interface_status("can999") {
            Err(CanError::Device(e)) => {
                assert_eq!(e.kind, CanDeviceErrorKind::NotFound);
                assert!(e.message.contains("does not exist"));
                assert!(e.message.contains("ip link add"));
            },
            other => panic!("Expected Device error, got: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_names() {
        assert!(matches!(
            check_interface_status("can0\0"),
            Err(CanError::Device(_))
        ));
        assert!(matches!(
            check_interface_status(&"a".repeat(20)),
            Err(CanError::Device(_))
        ));
        assert!(matches!(check_interface_status(""), Err(CanError::Device(_))));
    }

    #[test]
    fn test_loopback_is_up() {
        // lo 在所有 Linux 系统上都存在
        if let Ok(up) = check_interface_status("lo") {
            assert!(up);
        }
    }
}
