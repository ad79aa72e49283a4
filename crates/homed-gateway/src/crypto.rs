//! DH handshake and AES-128-CBC stream cipher.
//!
//! The 32-bit Diffie–Hellman exchange is not cryptographically strong — it
//! exists purely to match the wire behavior of already-deployed gateways and
//! must be implemented exactly as specified, including the u32 truncation
//! on every modular exponentiation result. Modular exponentiation itself is
//! done with arbitrary-precision arithmetic (`num-bigint`) so the
//! `(base * base) mod p` squaring step never overflows a native integer,
//! even though every input and output fits in 32 bits.

use aes::Aes128;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use md5::{Digest, Md5};
use num_bigint::BigUint;
use num_traits::Zero;
use rand::Rng;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Length in bytes of the raw, unframed DH preamble the gateway sends first.
pub const PREAMBLE_LEN: usize = 12;
/// Length in bytes of the server's raw public-key reply.
pub const SERVER_PUBLIC_LEN: usize = 4;

/// The `(prime, generator, clientPublic)` triple read from the first 12
/// bytes of a new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhPreamble {
    pub p: u32,
    pub g: u32,
    pub client_public: u32,
}

impl DhPreamble {
    /// Parse the raw 12-byte preamble: three big-endian u32s.
    pub fn parse(bytes: &[u8; PREAMBLE_LEN]) -> Self {
        Self {
            p: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            g: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            client_public: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        }
    }
}

/// `base^exp mod modulus`, truncated to a u32. Panics never: a zero modulus
/// is treated as "no reduction" (result 0), matching `BigUint`'s own
/// behavior for `modpow` with a zero modulus being nonsensical input from a
/// malicious/buggy gateway — callers treat `p == 0` as a handshake failure
/// before reaching this function.
fn modpow_u32(base: u32, exp: u32, modulus: u32) -> u32 {
    if modulus.is_zero() {
        return 0;
    }
    let base = BigUint::from(base);
    let exp = BigUint::from(exp);
    let modulus = BigUint::from(modulus);
    let result = base.modpow(&exp, &modulus);
    // `result < modulus <= u32::MAX`, so this truncation is exact, not lossy.
    let digits = result.to_u32_digits();
    digits.first().copied().unwrap_or(0)
}

/// The server's half of the handshake: a freshly chosen 31-bit secret `s`,
/// the public value `B = g^s mod p` to send back to the gateway, and the
/// shared secret `S = A^s mod p` used to derive the cipher key.
pub struct ServerHandshake {
    pub server_public: u32,
    pub shared_secret: u32,
}

/// Perform the server side of the handshake for a given preamble and
/// server secret exponent `s`. `s` is normally drawn via [`random_secret`];
/// it is a parameter here so tests can pin it.
pub fn server_handshake(preamble: &DhPreamble, s: u32) -> ServerHandshake {
    ServerHandshake {
        server_public: modpow_u32(preamble.g, s, preamble.p),
        shared_secret: modpow_u32(preamble.client_public, s, preamble.p),
    }
}

/// Draw a random 31-bit secret exponent.
pub fn random_secret() -> u32 {
    rand::rng().random_range(0..=0x7fff_ffffu32)
}

/// Derive the AES-128 key and IV from the DH shared secret: `key =
/// md5(S_be4)`, `iv = md5(key)`.
pub fn derive_key_iv(shared_secret: u32) -> ([u8; 16], [u8; 16]) {
    let mut key_hasher = Md5::new();
    key_hasher.update(shared_secret.to_be_bytes());
    let key: [u8; 16] = key_hasher.finalize().into();

    let mut iv_hasher = Md5::new();
    iv_hasher.update(key);
    let iv: [u8; 16] = iv_hasher.finalize().into();

    (key, iv)
}

/// Errors from the AES-128-CBC cipher.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("key/IV must be exactly 16 bytes, got key={key_len} iv={iv_len}")]
    BadKeyMaterial { key_len: usize, iv_len: usize },
    #[error("ciphertext is not a multiple of the 16-byte block size")]
    UnalignedCiphertext,
    #[error("block cipher padding error: {0}")]
    Padding(String),
}

/// A stateful per-connection AES-128-CBC cipher with manual zero padding.
/// No PKCS#7: the plaintext is
/// right-padded with `0x00` bytes to the next 16-byte boundary before
/// encryption, and decryption strips trailing `0x00` bytes from the
/// decrypted block. This means a plaintext ending in a real `0x00` byte
/// cannot round-trip unambiguously — that is an accepted property of the
/// wire format, not a bug in this implementation.
pub struct StreamCipher {
    key: [u8; 16],
    iv: [u8; 16],
}

impl StreamCipher {
    /// Construct a cipher from raw key/IV bytes. Rejects anything other
    /// than 16-byte key and IV (AES-128 block size).
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self, CipherError> {
        if key.len() != 16 || iv.len() != 16 {
            return Err(CipherError::BadKeyMaterial {
                key_len: key.len(),
                iv_len: iv.len(),
            });
        }
        let mut k = [0u8; 16];
        let mut i = [0u8; 16];
        k.copy_from_slice(key);
        i.copy_from_slice(iv);
        Ok(Self { key: k, iv: i })
    }

    /// Construct a cipher directly from a DH shared secret.
    pub fn from_shared_secret(shared_secret: u32) -> Self {
        let (key, iv) = derive_key_iv(shared_secret);
        // `derive_key_iv` always produces 16-byte arrays; this cannot fail.
        Self::new(&key, &iv).expect("md5 digests are always 16 bytes")
    }

    /// Encrypt `plaintext`, right-padding with `0x00` to a 16-byte boundary
    /// first. Returns ciphertext whose length is always a multiple of 16.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut buf = plaintext.to_vec();
        let pad_len = (16 - (buf.len() % 16)) % 16;
        buf.resize(buf.len() + pad_len, 0);

        let enc = Aes128CbcEnc::new(&self.key.into(), &self.iv.into());
        // `buf` is already block-aligned, so `NoPadding` just encrypts it
        // in place without adding a further padding block.
        enc.encrypt_padded_vec_mut::<NoPadding>(&buf)
    }

    /// Decrypt `ciphertext` and strip trailing `0x00` bytes left over from
    /// the manual zero padding applied on encrypt.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
            return Err(CipherError::UnalignedCiphertext);
        }
        let dec = Aes128CbcDec::new(&self.key.into(), &self.iv.into());
        let mut decrypted = dec
            .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
            .map_err(|e| CipherError::Padding(e.to_string()))?;

        while decrypted.last() == Some(&0) {
            decrypted.pop();
        }
        Ok(decrypted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_derives_symmetric_shared_secret() {
        // p=23, g=5, A=8, s=6 (test seam) => B=8.
        let preamble = DhPreamble { p: 23, g: 5, client_public: 8 };
        let hs = server_handshake(&preamble, 6);
        assert_eq!(hs.server_public, 8);

        // The shared secret must be symmetric: A^s mod p == B^a mod p for
        // the client secret `a` that produced A = g^a mod p (a = 6 here,
        // since 5^6 mod 23 = 8 too) — for any (p, g, s1, s2), the
        // server-side derivation must yield g^(s1*s2) mod p.
        let client_side = modpow_u32(8, 6, 23); // A^s mod p
        let symmetric_check = modpow_u32(5, 6 * 6, 23); // g^(a*s) mod p
        assert_eq!(hs.shared_secret, client_side);
        assert_eq!(hs.shared_secret, symmetric_check);
    }

    #[test]
    fn shared_secret_is_commutative_in_exponents() {
        let p = 104_729u32; // a larger prime, still fits in u32
        let g = 5u32;
        for (s1, s2) in [(3u32, 11u32), (100, 200), (1, 1), (7, 7)] {
            let a_public = modpow_u32(g, s1, p);
            let b_public = modpow_u32(g, s2, p);
            let shared_from_a_side = modpow_u32(b_public, s1, p);
            let shared_from_b_side = modpow_u32(a_public, s2, p);
            assert_eq!(shared_from_a_side, shared_from_b_side);
        }
    }

    #[test]
    fn preamble_parses_big_endian_u32s() {
        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&23u32.to_be_bytes());
        bytes[4..8].copy_from_slice(&5u32.to_be_bytes());
        bytes[8..12].copy_from_slice(&8u32.to_be_bytes());
        let preamble = DhPreamble::parse(&bytes);
        assert_eq!(preamble, DhPreamble { p: 23, g: 5, client_public: 8 });
    }

    #[test]
    fn encrypt_decrypt_round_trips_without_trailing_zero() {
        let cipher = StreamCipher::from_shared_secret(2);
        let plaintext = br#"{"uniqueId":"c-1","token":"t-1"}"#;
        let ciphertext = cipher.encrypt(plaintext);
        assert_eq!(ciphertext.len() % 16, 0);
        let decrypted = cipher.decrypt(&ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn cipher_rejects_bad_key_material_lengths() {
        assert!(StreamCipher::new(&[0u8; 15], &[0u8; 16]).is_err());
        assert!(StreamCipher::new(&[0u8; 16], &[0u8; 8]).is_err());
    }

    #[test]
    fn decrypt_rejects_unaligned_ciphertext() {
        let cipher = StreamCipher::from_shared_secret(42);
        assert!(matches!(
            cipher.decrypt(&[1, 2, 3]),
            Err(CipherError::UnalignedCiphertext)
        ));
    }

    #[test]
    fn key_and_iv_derivation_is_deterministic() {
        let (k1, iv1) = derive_key_iv(2);
        let (k2, iv2) = derive_key_iv(2);
        assert_eq!(k1, k2);
        assert_eq!(iv1, iv2);
        assert_ne!(k1, iv1, "key and iv must differ for non-degenerate hashes");
    }
}
