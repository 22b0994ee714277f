//! Readiness multiplexing across endpoints
//!
//! [`select`] waits until at least one endpoint has data to read. Endpoints
//! holding bytes in user space (a partially consumed WebSocket message, for
//! instance) are ready without touching the kernel, so their presence turns
//! the wait into a poll.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use sockudo_relay::{Endpoint, select};
//!
//! let mut endpoints: [&mut dyn Endpoint; 2] = [&mut a, &mut b];
//! for index in select(&mut endpoints, Some(Duration::from_secs(1))) {
//!     let token = endpoints[index].read_token(b"\n", None, true)?;
//! }
//! ```

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::time::Duration;

use crate::stream::Endpoint;

const READ_EVENTS: libc::c_short = libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;
const WRITE_EVENTS: libc::c_short = libc::POLLOUT | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;

/// Indices of the endpoints that can be read without blocking
///
/// Invalid endpoints are skipped. The result keeps the order of `endpoints`
/// and is empty on timeout, on interruption and on poll failure.
pub fn select(endpoints: &mut [&mut dyn Endpoint], timeout: Option<Duration>) -> Vec<usize> {
    let candidates: Vec<usize> = (0..endpoints.len()).collect();
    select_among(endpoints, &candidates, timeout)
}

/// First ready endpoint, if any
pub fn select_first(
    endpoints: &mut [&mut dyn Endpoint],
    timeout: Option<Duration>,
) -> Option<usize> {
    select(endpoints, timeout).into_iter().next()
}

/// [`select`] restricted to the given indices
///
/// Indices out of range or repeated are ignored. The result is in ascending
/// index order.
pub fn select_among(
    endpoints: &mut [&mut dyn Endpoint],
    candidates: &[usize],
    timeout: Option<Duration>,
) -> Vec<usize> {
    let mut indices: Vec<usize> = candidates
        .iter()
        .copied()
        .filter(|&i| i < endpoints.len())
        .collect();
    indices.sort_unstable();
    indices.dedup();

    let mut owners = Vec::with_capacity(indices.len());
    let mut fds = Vec::with_capacity(indices.len());
    let mut any_buffered = false;

    for index in indices {
        let endpoint = &mut *endpoints[index];
        if !endpoint.is_valid() {
            continue;
        }
        let buffered = endpoint.buffered() > 0;
        any_buffered |= buffered;
        // Buffered endpoints without a descriptor still count as ready
        let fd = endpoint.read_fd().map_or(-1, |fd| fd.as_raw_fd());
        owners.push((index, buffered));
        fds.push(libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        });
    }

    if owners.is_empty() {
        return Vec::new();
    }

    let timeout = if any_buffered {
        Some(Duration::ZERO)
    } else {
        timeout
    };

    if let Err(e) = poll(&mut fds, timeout) {
        if e.kind() == io::ErrorKind::Interrupted {
            tracing::debug!("select interrupted");
        } else {
            tracing::error!(error = %e, "select failed");
        }
        return Vec::new();
    }

    owners
        .iter()
        .zip(&fds)
        .filter(|((_, buffered), pfd)| *buffered || pfd.revents & READ_EVENTS != 0)
        .map(|((index, _), _)| *index)
        .collect()
}

/// Wait until `fd` is readable
pub(crate) fn poll_readable(fd: BorrowedFd<'_>, timeout: Option<Duration>) -> bool {
    poll_one(fd, libc::POLLIN, READ_EVENTS, timeout)
}

/// Wait until `fd` is writable
pub(crate) fn poll_writable(fd: BorrowedFd<'_>, timeout: Option<Duration>) -> bool {
    poll_one(fd, libc::POLLOUT, WRITE_EVENTS, timeout)
}

fn poll_one(
    fd: BorrowedFd<'_>,
    events: libc::c_short,
    ready: libc::c_short,
    timeout: Option<Duration>,
) -> bool {
    let mut fds = [libc::pollfd {
        fd: fd.as_raw_fd(),
        events,
        revents: 0,
    }];
    match poll(&mut fds, timeout) {
        Ok(n) => n > 0 && fds[0].revents & ready != 0,
        Err(e) => {
            if e.kind() != io::ErrorKind::Interrupted {
                tracing::error!(error = %e, "poll failed");
            }
            false
        }
    }
}

fn poll(fds: &mut [libc::pollfd], timeout: Option<Duration>) -> io::Result<usize> {
    // SAFETY: `fds` is a valid, exclusively borrowed slice of pollfd structs
    // and its length is passed alongside it.
    let n = unsafe {
        libc::poll(
            fds.as_mut_ptr(),
            fds.len() as libc::nfds_t,
            timeout_millis(timeout),
        )
    };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// Convert a timeout to poll(2) milliseconds
///
/// `None` is -1 (forever). Sub-millisecond waits round up so they still wait.
fn timeout_millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) if d.is_zero() => 0,
        Some(d) => {
            let millis = d.as_nanos().div_ceil(1_000_000);
            millis.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}
