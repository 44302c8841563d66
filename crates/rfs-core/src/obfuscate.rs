//! Reversible payload obfuscation for data at rest
//!
//! Stored file contents are XORed with a single-byte key so that files in the
//! storage root are not plain copies of what clients uploaded. This is an
//! obfuscation step only: the key is fixed and public, anyone with access to
//! the storage root can undo it, and it provides no confidentiality.

use crate::DEFAULT_OBFUSCATION_KEY;

/// Symmetric byte-wise XOR transform.
///
/// Applying the transform twice restores the original bytes, so the same
/// call is used when persisting a WRITE and when serving a GET.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Obfuscator {
    key: u8,
}

impl Obfuscator {
    pub fn new(key: u8) -> Self {
        Self { key }
    }

    /// Transform `data` in place.
    pub fn apply(&self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            *byte ^= self.key;
        }
    }

    pub fn key(&self) -> u8 {
        self.key
    }
}

impl Default for Obfuscator {
    fn default() -> Self {
        Self::new(DEFAULT_OBFUSCATION_KEY)
    }
}
