//! Protected storage for session secrets
//!
//! Backed by `secstr::SecVec`, which locks the pages where the platform allows
//! it and zeroes them on drop.

use secstr::SecVec;
use subtle::ConstantTimeEq;

/// Secret bytes (PIN tokens, decrypted session material)
///
/// `Debug` never prints the contents and equality is constant time.
#[derive(Clone)]
pub struct SecBytes {
    inner: SecVec<u8>,
}

impl SecBytes {
    /// Take ownership of `data`
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            inner: SecVec::from(data),
        }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(data.to_vec())
    }

    /// Borrow the secret; keep the borrow short
    pub fn as_slice(&self) -> &[u8] {
        self.inner.unsecure()
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite the contents with zeros ahead of drop
    pub fn wipe(&mut self) {
        self.inner.zero_out();
    }
}

impl core::fmt::Debug for SecBytes {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SecBytes")
            .field("len", &self.len())
            .field("data", &"<redacted>")
            .finish()
    }
}

impl PartialEq for SecBytes {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice().ct_eq(other.as_slice()).into()
    }
}

impl Eq for SecBytes {}
