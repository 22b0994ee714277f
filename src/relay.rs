//! Data relays between endpoints
//!
//! - [`dump`] copies one way, block by block
//! - [`cat`] copies both ways, token by token, until both directions end
//! - [`cat_raw`] is `cat` with block reads instead of token reads
//!
//! Directions are [`Route`]s of indices into a shared endpoint slice, so one
//! endpoint may serve as the input of one direction and the output of the
//! other (a single socket echoed back to itself, for instance).

use std::time::Duration;

use crate::error::Result;
use crate::multiplex::select_among;
use crate::stream::Endpoint;

/// One direction of a relay: bytes read from `input` are written to `output`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Index of the endpoint read from
    pub input: usize,
    /// Index of the endpoint written to
    pub output: usize,
}

impl Route {
    /// Create a route
    pub const fn new(input: usize, output: usize) -> Self {
        Self { input, output }
    }
}

/// Copy from `source` to `destination` until either side stops
///
/// Each step waits up to `timeout` for both sides, reads at most
/// `block_size` bytes and writes exactly those bytes. Returns the number of
/// bytes delivered.
pub fn dump<S, D>(
    source: &mut S,
    destination: &mut D,
    block_size: usize,
    timeout: Option<Duration>,
) -> usize
where
    S: Endpoint + ?Sized,
    D: Endpoint + ?Sized,
{
    let mut buffer = vec![0u8; block_size.max(1)];
    let mut dumped = 0;

    while source.can_read(timeout) && destination.can_write(timeout) {
        let read = match source.read_raw(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(error = %e, "dump source failed");
                break;
            }
        };
        if let Err(e) = destination.write_all_raw(&buffer[..read]) {
            tracing::debug!(error = %e, "dump destination failed");
            break;
        }
        dumped += read;
    }

    tracing::debug!(bytes = dumped, "dump finished");
    dumped
}

/// Relay tokens in both directions until neither can continue
///
/// Each round waits up to `timeout` on the inputs of the directions still
/// alive, then moves one token (delimiter included) from every ready input
/// to its output. A direction ends when its input or output becomes invalid.
/// Returns the bytes moved along `a` and along `b`.
///
/// # Panics
///
/// Panics if a route index is out of range for `endpoints`.
pub fn cat(
    endpoints: &mut [&mut dyn Endpoint],
    a: Route,
    b: Route,
    delimiters: &[u8],
    timeout: Option<Duration>,
) -> (usize, usize) {
    relay(endpoints, [a, b], timeout, Chunking::Token(delimiters))
}

/// [`cat`] between two distinct endpoints: `a` to `b`, and `b` to `a`
pub fn cat_pair<'a>(
    a: &'a mut dyn Endpoint,
    b: &'a mut dyn Endpoint,
    delimiters: &[u8],
    timeout: Option<Duration>,
) -> (usize, usize) {
    let mut endpoints: [&mut dyn Endpoint; 2] = [a, b];
    cat(
        &mut endpoints,
        Route::new(0, 1),
        Route::new(1, 0),
        delimiters,
        timeout,
    )
}

/// [`cat`] moving up to `block_size` bytes per read instead of tokens
///
/// # Panics
///
/// Panics if a route index is out of range for `endpoints`.
pub fn cat_raw(
    endpoints: &mut [&mut dyn Endpoint],
    a: Route,
    b: Route,
    block_size: usize,
    timeout: Option<Duration>,
) -> (usize, usize) {
    relay(endpoints, [a, b], timeout, Chunking::Block(block_size.max(1)))
}

#[derive(Clone, Copy)]
enum Chunking<'d> {
    Token(&'d [u8]),
    Block(usize),
}

impl Chunking<'_> {
    fn read(self, input: &mut dyn Endpoint) -> Result<Vec<u8>> {
        match self {
            Chunking::Token(delimiters) => input.read_token(delimiters, None, true),
            Chunking::Block(size) => {
                let mut block = vec![0u8; size];
                let n = input.read_raw(&mut block)?;
                block.truncate(n);
                Ok(block)
            }
        }
    }
}

fn relay(
    endpoints: &mut [&mut dyn Endpoint],
    routes: [Route; 2],
    timeout: Option<Duration>,
    chunking: Chunking<'_>,
) -> (usize, usize) {
    for route in routes {
        assert!(
            route.input < endpoints.len() && route.output < endpoints.len(),
            "route {:?} out of range for {} endpoints",
            route,
            endpoints.len()
        );
    }

    let mut moved = [0usize; 2];
    loop {
        let alive = routes.map(|route| {
            endpoints[route.input].is_valid() && endpoints[route.output].is_valid()
        });
        if !alive.iter().any(|&a| a) {
            break;
        }

        let inputs: Vec<usize> = (0..2)
            .filter(|&d| alive[d])
            .map(|d| routes[d].input)
            .collect();

        for input in select_among(endpoints, &inputs, timeout) {
            // One read per ready input per round
            let Some(direction) = (0..2).find(|&d| alive[d] && routes[d].input == input) else {
                continue;
            };
            let route = routes[direction];
            let chunk = match chunking.read(&mut *endpoints[input]) {
                Ok(chunk) if !chunk.is_empty() => chunk,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(error = %e, input, "relay input ended");
                    continue;
                }
            };
            match endpoints[route.output].write_all_raw(&chunk) {
                Ok(()) => moved[direction] += chunk.len(),
                Err(e) => {
                    tracing::debug!(error = %e, output = route.output, "relay output ended")
                }
            }
        }
    }

    tracing::debug!(a = moved[0], b = moved[1], "relay finished");
    (moved[0], moved[1])
}
