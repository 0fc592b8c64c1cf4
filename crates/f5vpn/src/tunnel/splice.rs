//! Zero-copy byte pump between two file descriptors, driven by fd
//! readiness instead of a GLib main loop (spec.md §4.4 "byte-stream
//! wiring"). `splice(2)` moves bytes between a pipe and anything pollable
//! without round-tripping through userspace; the three outcomes the
//! original's `splice_fds`/`splice_write_ready` handlers distinguish map
//! onto three branches here: progress, `EAGAIN` (wait for the writable end
//! instead of the readable one), and `EINVAL` (some kernels can't splice
//! into a tty — fall back to `read`+`write` permanently for that pair).

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use tokio::io::unix::AsyncFd;

const SPLICE_CHUNK: usize = 4096;

/// Pumps bytes from `from` to `to` until EOF or an unrecoverable error.
/// Consumes both `AsyncFd`s: the pump owns the fds for its own lifetime,
/// same as the original's long-lived `g_unix_fd_add` handlers.
pub async fn pump(from: AsyncFd<OwnedFd>, to: AsyncFd<OwnedFd>) -> std::io::Result<()> {
	match splice_loop(&from, &to).await {
		Ok(()) => Ok(()),
		Err(SpliceError::Unsupported) => fallback_read_write(&from, &to).await,
		Err(SpliceError::Io(e)) => Err(e),
	}
}

enum SpliceError {
	/// `EINVAL`: this fd pair can't be spliced (e.g. pipe-to-tty on some
	/// kernels); caller should fall back to read/write.
	Unsupported,
	Io(std::io::Error),
}

async fn splice_loop(from: &AsyncFd<OwnedFd>, to: &AsyncFd<OwnedFd>) -> Result<(), SpliceError> {
	loop {
		let mut guard = from.readable().await.map_err(SpliceError::Io)?;
		let from_fd = from.as_raw_fd();
		let to_fd = to.as_raw_fd();

		let attempt = guard.try_io(|_| raw_splice(from_fd, to_fd));
		let n = match attempt {
			Ok(result) => result,
			Err(_would_block) => continue,
		};

		match n {
			Ok(0) => return Ok(()),
			Ok(_) => continue,
			Err(e) if e.raw_os_error() == Some(libc::EINVAL) => return Err(SpliceError::Unsupported),
			Err(e) if e.raw_os_error() == Some(libc::EAGAIN) => {
				// The read side was ready but the write side wasn't; wait for
				// `to` to become writable before retrying.
				let mut write_guard = to.writable().await.map_err(SpliceError::Io)?;
				match write_guard.try_io(|_| raw_splice(from_fd, to_fd)) {
					Ok(Ok(0)) => return Ok(()),
					Ok(Ok(_)) => continue,
					Ok(Err(e)) if e.raw_os_error() == Some(libc::EINVAL) => return Err(SpliceError::Unsupported),
					Ok(Err(e)) => return Err(SpliceError::Io(e)),
					Err(_would_block) => continue,
				}
			}
			Err(e) => return Err(SpliceError::Io(e)),
		}
	}
}

fn raw_splice(from: RawFd, to: RawFd) -> std::io::Result<usize> {
	let n = unsafe { libc::splice(from, std::ptr::null_mut(), to, std::ptr::null_mut(), SPLICE_CHUNK, libc::SPLICE_F_NONBLOCK | libc::SPLICE_F_MOVE) };
	if n < 0 {
		return Err(std::io::Error::last_os_error());
	}
	Ok(n as usize)
}

async fn fallback_read_write(from: &AsyncFd<OwnedFd>, to: &AsyncFd<OwnedFd>) -> std::io::Result<()> {
	let mut buf = [0u8; SPLICE_CHUNK];
	loop {
		let n = loop {
			let mut guard = from.readable().await?;
			match guard.try_io(|inner| read_fd(inner.as_raw_fd(), &mut buf)) {
				Ok(result) => break result?,
				Err(_would_block) => continue,
			}
		};
		if n == 0 {
			return Ok(());
		}

		let mut written = 0;
		while written < n {
			let wrote = loop {
				let mut guard = to.writable().await?;
				match guard.try_io(|inner| write_fd(inner.as_raw_fd(), &buf[written..n])) {
					Ok(result) => break result?,
					Err(_would_block) => continue,
				}
			};
			written += wrote;
		}
	}
}

fn read_fd(fd: RawFd, buf: &mut [u8]) -> std::io::Result<usize> {
	let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
	if n < 0 {
		return Err(std::io::Error::last_os_error());
	}
	Ok(n as usize)
}

fn write_fd(fd: RawFd, buf: &[u8]) -> std::io::Result<usize> {
	let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
	if n < 0 {
		return Err(std::io::Error::last_os_error());
	}
	Ok(n as usize)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn make_nonblocking_pipe() -> (OwnedFd, OwnedFd) {
		let (read, write) = nix::unistd::pipe().unwrap();
		for fd in [read.as_raw_fd(), write.as_raw_fd()] {
			unsafe {
				let flags = libc::fcntl(fd, libc::F_GETFL, 0);
				libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
			}
		}
		(read, write)
	}

	#[tokio::test]
	async fn pumps_bytes_between_two_pipes_then_stops_on_eof() {
		let (src_read, src_write) = make_nonblocking_pipe();
		let (dst_read, dst_write) = make_nonblocking_pipe();

		unsafe {
			let n = libc::write(src_write.as_raw_fd(), b"hello".as_ptr() as *const _, 5);
			assert_eq!(n, 5);
		}
		drop(src_write);

		let from = AsyncFd::new(src_read).unwrap();
		let to = AsyncFd::new(dst_write).unwrap();
		pump(from, to).await.unwrap();

		let mut buf = [0u8; 16];
		let n = unsafe { libc::read(dst_read.as_raw_fd(), buf.as_mut_ptr() as *mut _, buf.len()) };
		assert_eq!(n, 5);
		assert_eq!(&buf[..5], b"hello");
	}
}
