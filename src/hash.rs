//! Keyed hashing for the demultiplexing tables.
//!
//! Implements SipHash-2-4 from:
//!
//! > SipHash: a fast short-input PRF, Jean-Philippe Aumasson and Daniel J. Bernstein
//!
//! A keyed PRF keeps bucket placement and derived sequence numbers unpredictable for a remote
//! peer, which would otherwise get to choose hash collisions or guess initial sequence numbers.
use core::hash::{BuildHasher, Hash, Hasher};

// Yes, that's the initial values.
const IV: [&[u8; 8]; 4] = [
    b"somepseu",
    b"dorandom",
    b"lygenera",
    b"tedbytes"];

/// The secret key from which all hashers of an endpoint are derived.
#[derive(Clone, Copy, Debug)]
pub struct HashState {
    k0: u64,
    k1: u64,
}

/// Raw SipHash-2-4 over whole 64-bit words.
///
/// Used directly where the input has a fixed layout, such as sequence number derivation from a
/// connection tuple.
#[derive(Clone)]
pub(crate) struct SipState {
    v0: u64,
    v1: u64,
    v2: u64,
    v3: u64,
}

/// A buffering [`Hasher`] over SipHash-2-4.
///
/// [`Hasher`]: https://doc.rust-lang.org/core/hash/trait.Hasher.html
#[derive(Clone)]
pub struct SipHasher24 {
    state: SipState,
    buffer: [u8; 8],
    buffered: usize,
    len: u64,
}

impl HashState {
    /// Create the state from a 128-bit secret key.
    ///
    /// The caller is responsible for the quality of the key. Predictable keys void the
    /// adversarial guarantees of the connection tables.
    pub fn from_secret_key_bytes(key: [u8; 16]) -> Self {
        let mut k0 = [0; 8];
        let mut k1 = [0; 8];
        k0.copy_from_slice(&key[..8]);
        k1.copy_from_slice(&key[8..]);

        HashState {
            k0: u64::from_le_bytes(k0),
            k1: u64::from_le_bytes(k1),
        }
    }

    /// Create a state with key material from the standard library's randomized hasher.
    ///
    /// Spares the caller an extra dependency for randomness when running on a host.
    #[cfg(feature = "std")]
    pub fn from_std_hash() -> Self {
        use std::collections::hash_map::RandomState;
        use std::hash::BuildHasher;

        let source = RandomState::new();
        let derive = |tag: u64| {
            let mut hasher = source.build_hasher();
            hasher.write_u64(tag);
            hasher.finish()
        };

        HashState {
            k0: derive(0),
            k1: derive(1),
        }
    }

    /// Hash a single value.
    pub fn hash_one<H: Hash>(&self, value: H) -> u64 {
        let mut hasher = self.build_hasher();
        value.hash(&mut hasher);
        hasher.finish()
    }

    pub(crate) fn word_state(&self) -> SipState {
        SipState::init(self.k0, self.k1)
    }
}

impl BuildHasher for HashState {
    type Hasher = SipHasher24;

    fn build_hasher(&self) -> SipHasher24 {
        SipHasher24 {
            state: self.word_state(),
            buffer: [0; 8],
            buffered: 0,
            len: 0,
        }
    }
}

impl SipState {
    const SIP_C: usize = 2;
    const SIP_D: usize = 4;

    fn init(k0: u64, k1: u64) -> Self {
        SipState {
            v0: u64::from_be_bytes(*IV[0]) ^ k0,
            v1: u64::from_be_bytes(*IV[1]) ^ k1,
            v2: u64::from_be_bytes(*IV[2]) ^ k0,
            v3: u64::from_be_bytes(*IV[3]) ^ k1,
        }
    }

    fn round(&mut self) {
        self.v0 = self.v0.wrapping_add(self.v1);
        self.v1 = self.v1.rotate_left(13);
        self.v1 ^= self.v0;
        self.v0 = self.v0.rotate_left(32);
        self.v2 = self.v2.wrapping_add(self.v3);
        self.v3 = self.v3.rotate_left(16);
        self.v3 ^= self.v2;
        self.v0 = self.v0.wrapping_add(self.v3);
        self.v3 = self.v3.rotate_left(21);
        self.v3 ^= self.v0;
        self.v2 = self.v2.wrapping_add(self.v1);
        self.v1 = self.v1.rotate_left(17);
        self.v1 ^= self.v2;
        self.v2 = self.v2.rotate_left(32);
    }

    /// Process a single portion of the message.
    pub(crate) fn absorb(&mut self, m: u64) {
        self.v3 ^= m;
        (0..Self::SIP_C).for_each(|_| self.round());
        self.v0 ^= m;
    }

    pub(crate) fn finalize(mut self) -> u64 {
        self.v2 ^= 0xff;
        (0..Self::SIP_D).for_each(|_| self.round());
        self.v0 ^ self.v1 ^ self.v2 ^ self.v3
    }
}

impl Hasher for SipHasher24 {
    fn write(&mut self, mut bytes: &[u8]) {
        self.len = self.len.wrapping_add(bytes.len() as u64);

        if self.buffered > 0 {
            let take = (8 - self.buffered).min(bytes.len());
            self.buffer[self.buffered..self.buffered + take]
                .copy_from_slice(&bytes[..take]);
            self.buffered += take;
            bytes = &bytes[take..];

            if self.buffered < 8 {
                return;
            }

            self.state.absorb(u64::from_le_bytes(self.buffer));
            self.buffered = 0;
        }

        let mut chunks = bytes.chunks_exact(8);
        for chunk in &mut chunks {
            let mut word = [0; 8];
            word.copy_from_slice(chunk);
            self.state.absorb(u64::from_le_bytes(word));
        }

        let rest = chunks.remainder();
        self.buffer[..rest.len()].copy_from_slice(rest);
        self.buffered = rest.len();
    }

    fn finish(&self) -> u64 {
        let mut state = self.state.clone();

        // The final block carries the message length modulo 256 in its top byte.
        let mut last = [0; 8];
        last[..self.buffered].copy_from_slice(&self.buffer[..self.buffered]);
        last[7] = self.len as u8;

        state.absorb(u64::from_le_bytes(last));
        state.finalize()
    }
}
