use core::time::Duration;
use std::io::{self, ErrorKind};

mod rt;
pub mod time;

pub use rt::*;

#[cfg(target_family = "unix")]
mod sys {
	pub use std::os::fd::{AsRawFd, RawFd};

	pub use libc::{poll, pollfd as Poll, POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT};

	pub fn as_raw<T: AsRawFd>(t: &T) -> RawFd {
		t.as_raw_fd()
	}
}

#[cfg(target_family = "windows")]
mod sys {
	pub use std::os::windows::io::AsRawSocket as AsRawFd;

	pub use windows_sys::Win32::Networking::WinSock::{
		WSAPoll as poll, POLLERR, POLLHUP, POLLNVAL, POLLRDNORM as POLLIN, POLLWRNORM as POLLOUT, SOCKET as RawFd, WSAPOLLFD as Poll,
	};

	pub fn as_raw<T: AsRawFd>(t: &T) -> RawFd {
		t.as_raw_socket() as _
	}
}

pub use sys::AsRawFd;
use sys::*;
use tun_util::error::*;

fn as_timeout(t: Option<Duration>) -> i32 {
	t.and_then(|d| d.as_millis().try_into().ok()).unwrap_or(-1)
}

/// Readiness of a single file descriptor after a call to [`wait`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Ready {
	pub read: bool,
	pub write: bool,
}

/// Waits for a single file descriptor to become readable and/or writable, up to `timeout`.
///
/// This is the cooperative scheduling primitive the rest of the workspace builds on: the
/// transport session waits on the UDP socket, and the origin bridge waits on the TCP socket
/// it opens per request. Neither needs to multiplex across sockets, since each caller only
/// ever waits on the one it owns.
pub fn wait<T: AsRawFd>(socket: &T, want: Ready, timeout: Option<Duration>) -> Result<Ready> {
	let mut events = 0;

	if want.read {
		events |= POLLIN;
	}

	if want.write {
		events |= POLLOUT;
	}

	let mut fd = Poll { fd: as_raw(socket), events, revents: 0 };

	let ret = unsafe { poll(&mut fd, 1, as_timeout(timeout)) };

	let n: i32 = ret.try_into().map_err(|_| log::error!("poll() failed: {}", io::Error::last_os_error()))?;

	if n == 0 {
		return Ok(Ready::default());
	}

	if fd.revents & (POLLERR | POLLNVAL) != 0 {
		log::error!("Socket error while polling");
		return Err(());
	}

	Ok(Ready {
		read: fd.revents & (POLLIN | POLLHUP) != 0,
		write: fd.revents & POLLOUT != 0,
	})
}

/// Classifies a raw `isize` return value from a blocking syscall into a neutral result,
/// treating `WouldBlock` as "no data yet" rather than an error.
pub fn ret_to_err(val: isize) -> Result<Option<usize>> {
	match TryInto::<usize>::try_into(val) {
		Ok(n) => Ok(Some(n)),
		Err(_) => {
			let err = io::Error::last_os_error();

			if matches!(err.kind(), ErrorKind::WouldBlock) {
				return Ok(None);
			}

			log::error!("I/O operation failed: {err}");
			Err(())
		}
	}
}
