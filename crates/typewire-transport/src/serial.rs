//! Serial line (UART) devices.
//!
//! The line is put in raw 8N1 mode with no flow control. Reads use a short
//! inter-byte timeout (`VMIN = 0`, `VTIME = 1`) so that a reader notices a
//! [`Device::close`](crate::Device::close) within roughly 100 ms instead of
//! blocking forever on a silent line.

use std::fs::OpenOptions;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use tracing::info;

use crate::error::{Result, TransportError};
use crate::traits::StreamDevice;

/// Default line speed.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Open `path` as a raw serial line at `baud`.
pub fn open(path: impl AsRef<Path>, baud: u32) -> Result<StreamDevice> {
    let path = path.as_ref();
    let speed = baud_constant(baud)?;

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(path)
        .map_err(|source| TransportError::Open {
            path: path.to_path_buf(),
            source,
        })?;

    let fd = file.as_raw_fd();
    configure_raw(fd, speed).map_err(|source| TransportError::Configure {
        path: path.to_path_buf(),
        source,
    })?;

    info!(?path, baud, "opened serial line");
    Ok(StreamDevice::from_tty(file, path.display().to_string()))
}

fn configure_raw(fd: libc::c_int, speed: libc::speed_t) -> std::io::Result<()> {
    // SAFETY: `termios` is plain old data; zeroed is a valid initial value and
    // is fully overwritten by `tcgetattr` before use.
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };

    // SAFETY: `fd` is an open descriptor owned by the caller and `tio` is a
    // valid writable pointer.
    if unsafe { libc::tcgetattr(fd, &mut tio) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    // SAFETY: `tio` was initialised by `tcgetattr` above.
    unsafe {
        libc::cfmakeraw(&mut tio);
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }

    tio.c_cflag |= libc::CLOCAL | libc::CREAD;
    tio.c_cflag &= !(libc::CSTOPB | libc::PARENB);
    tio.c_cc[libc::VMIN] = 0;
    tio.c_cc[libc::VTIME] = 1;

    // SAFETY: `fd` is open and `tio` is a fully initialised termios value.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: `fd` is open; flushing stale input is harmless.
    unsafe {
        libc::tcflush(fd, libc::TCIFLUSH);
    }
    Ok(())
}

fn baud_constant(baud: u32) -> Result<libc::speed_t> {
    let speed = match baud {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        other => return Err(TransportError::UnsupportedBaud(other)),
    };
    Ok(speed)
}
