//! HCI user-channel socket
//!
//! Gives the host exclusive access to a controller on Linux. The device must
//! be down (`hciconfig hciX down`) before the channel can be bound.

use crate::error::HciError;
use crate::hci::transport::Transport;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

// Bluetooth socket constants
const AF_BLUETOOTH: i32 = 31;
const BTPROTO_HCI: i32 = 1;
const HCI_CHANNEL_USER: u16 = 1;

/// Largest H4 frame the controller can hand us (ACL with a 1021 byte buffer
/// plus headers fits comfortably).
const MAX_FRAME_LEN: usize = 4096;

/// Represents an HCI socket bound to the user channel
#[derive(Debug)]
pub struct HciSocket {
    fd: RawFd,
}

// Define the sockaddr_hci structure
#[repr(C)]
struct SockaddrHci {
    hci_family: libc::sa_family_t,
    hci_dev: u16,
    hci_channel: u16,
}

impl HciSocket {
    /// Opens the user channel of controller `dev_id` (0 for hci0)
    pub fn open(dev_id: u16) -> Result<Self, HciError> {
        let fd = unsafe {
            libc::socket(
                AF_BLUETOOTH,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                BTPROTO_HCI,
            )
        };

        if fd < 0 {
            return Err(HciError::SocketError(std::io::Error::last_os_error()));
        }

        let addr = SockaddrHci {
            hci_family: AF_BLUETOOTH as libc::sa_family_t,
            hci_dev: dev_id,
            hci_channel: HCI_CHANNEL_USER,
        };

        let result = unsafe {
            libc::bind(
                fd,
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<SockaddrHci>() as libc::socklen_t,
            )
        };

        if result < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(HciError::BindError(err));
        }

        Ok(HciSocket { fd })
    }

    /// Waits up to `timeout` for one H4 frame. `Ok(None)` on timeout.
    pub fn read_frame(&self, timeout: Duration) -> Result<Option<Vec<u8>>, HciError> {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
        let ready = unsafe { libc::poll(&mut pfd, 1, millis) };
        if ready < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(HciError::ReceiveError(err));
        }
        if ready == 0 {
            return Ok(None);
        }

        let mut buffer = vec![0u8; MAX_FRAME_LEN];
        let bytes_read = unsafe {
            libc::read(
                self.fd,
                buffer.as_mut_ptr() as *mut libc::c_void,
                buffer.len(),
            )
        };

        if bytes_read < 0 {
            return Err(HciError::ReceiveError(std::io::Error::last_os_error()));
        }
        if bytes_read == 0 {
            return Err(HciError::InvalidPacketFormat);
        }

        buffer.truncate(bytes_read as usize);
        Ok(Some(buffer))
    }
}

impl Transport for HciSocket {
    fn send(&self, frame: &[u8]) -> Result<(), HciError> {
        match unsafe { libc::write(self.fd, frame.as_ptr() as *const libc::c_void, frame.len()) } {
            -1 => Err(HciError::SendError(std::io::Error::last_os_error())),
            _ => Ok(()),
        }
    }
}

impl AsRawFd for HciSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for HciSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
