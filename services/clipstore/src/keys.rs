//! Object key derivation.
//!
//! Format: `{prefix}{random}.mp4` where the prefix is the classification
//! (`wide/`, `tall/`, `other/`) or empty when the upload was not classified,
//! and `random` is 32 random bytes in unpadded URL-safe base64.

use crate::classifier::Classification;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

const KEY_ENTROPY_BYTES: usize = 32;
const KEY_EXTENSION: &str = ".mp4";

/// Source of key randomness
pub trait RandomSource: Send + Sync {
    fn fill(&self, dest: &mut [u8]);
}

/// Operating system CSPRNG
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&self, dest: &mut [u8]) {
        OsRng.fill_bytes(dest);
    }
}

impl<R: RandomSource + ?Sized> RandomSource for Box<R> {
    fn fill(&self, dest: &mut [u8]) {
        (**self).fill(dest)
    }
}

/// Namespace segment for a classification
pub fn key_prefix(classification: Option<Classification>) -> &'static str {
    match classification {
        Some(Classification::Wide) => "wide/",
        Some(Classification::Tall) => "tall/",
        Some(Classification::Other) => "other/",
        None => "",
    }
}

pub struct KeyDeriver<R = OsRandom> {
    random: R,
}

impl KeyDeriver<OsRandom> {
    pub fn new() -> Self {
        Self { random: OsRandom }
    }
}

impl Default for KeyDeriver<OsRandom> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RandomSource> KeyDeriver<R> {
    pub fn with_source(random: R) -> Self {
        Self { random }
    }

    /// Build a fresh object key. Collisions are not checked; 256 bits of
    /// entropy make them negligible.
    pub fn derive_key(&self, classification: Option<Classification>) -> String {
        let mut bytes = [0u8; KEY_ENTROPY_BYTES];
        self.random.fill(&mut bytes);

        format!(
            "{}{}{}",
            key_prefix(classification),
            URL_SAFE_NO_PAD.encode(bytes),
            KEY_EXTENSION
        )
    }
}
