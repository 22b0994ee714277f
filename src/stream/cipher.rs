//! Transparent encryption over any endpoint
//!
//! [`CipherStream`] runs every outgoing byte through one keystream and every
//! incoming byte through another. Both keystreams advance with the data, so
//! the two peers must start with mirrored keys and nonces.

use std::os::fd::BorrowedFd;

use super::Endpoint;
use crate::error::Result;

/// A symmetric stream cipher state
pub trait Cipher {
    /// Encrypt or decrypt `data` in place, advancing the keystream
    fn apply(&mut self, data: &mut [u8]);
}

#[cfg(feature = "cipher")]
impl Cipher for chacha20::ChaCha20 {
    fn apply(&mut self, data: &mut [u8]) {
        chacha20::cipher::StreamCipher::apply_keystream(self, data);
    }
}

/// Endpoint that encrypts writes and decrypts reads
#[derive(Debug)]
pub struct CipherStream<E, C> {
    inner: E,
    encrypt: C,
    decrypt: C,
    scratch: Vec<u8>,
}

impl<E: Endpoint, C: Cipher> CipherStream<E, C> {
    /// Wrap `inner` with one cipher state per direction
    pub fn new(inner: E, encrypt: C, decrypt: C) -> Self {
        Self {
            inner,
            encrypt,
            decrypt,
            scratch: Vec::new(),
        }
    }

    /// Get a reference to the inner endpoint
    pub fn get_ref(&self) -> &E {
        &self.inner
    }

    /// Unwrap the inner endpoint
    pub fn into_inner(self) -> E {
        self.inner
    }
}

#[cfg(feature = "cipher")]
impl<E: Endpoint> CipherStream<E, chacha20::ChaCha20> {
    /// ChaCha20 in both directions under one key
    ///
    /// The peer must swap `send_nonce` and `recv_nonce`.
    pub fn chacha20(inner: E, key: [u8; 32], send_nonce: [u8; 12], recv_nonce: [u8; 12]) -> Self {
        use chacha20::cipher::KeyIvInit;

        let encrypt = chacha20::ChaCha20::new(&key.into(), &send_nonce.into());
        let decrypt = chacha20::ChaCha20::new(&key.into(), &recv_nonce.into());
        Self::new(inner, encrypt, decrypt)
    }
}

impl<E: Endpoint, C: Cipher> Endpoint for CipherStream<E, C> {
    fn is_valid(&mut self) -> bool {
        self.inner.is_valid()
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.inner.read_raw(buf)?;
        self.decrypt.apply(&mut buf[..n]);
        Ok(n)
    }

    fn write_raw(&mut self, buf: &[u8]) -> Result<usize> {
        // The keystream has already advanced, so the whole block must go out
        self.scratch.clear();
        self.scratch.extend_from_slice(buf);
        self.encrypt.apply(&mut self.scratch);
        let result = self.inner.write_all_raw(&self.scratch);
        self.scratch.clear();
        result.map(|()| buf.len())
    }

    fn read_fd(&self) -> Option<BorrowedFd<'_>> {
        self.inner.read_fd()
    }

    fn write_fd(&self) -> Option<BorrowedFd<'_>> {
        self.inner.write_fd()
    }

    fn buffered(&self) -> usize {
        self.inner.buffered()
    }
}
