use crate::{Error, Result};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;

pub const MAGIC: [u8; 4] = *b"serc";
pub const ENVELOPE_VERSION: u8 = 1;
pub const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = MAGIC.len() + 1 + SALT_LEN + NONCE_LEN;

// Argon2id cost parameters: 64 MiB, 3 passes, 4 lanes.
const KDF_MEMORY_KIB: u32 = 65536;
const KDF_ITERATIONS: u32 = 3;
const KDF_PARALLELISM: u32 = 4;

/// Authenticated encryption envelope for archive blobs.
///
/// Layout: `MAGIC(4) || VERSION(1) || SALT(16) || NONCE(12) ||
/// CIPHERTEXT+TAG`. The header is bound to the ciphertext as associated
/// data, so any alteration of magic, version or salt fails authentication
/// along with payload tampering. The key is derived once per process from
/// the passphrase and the repository salt recorded in the index; version 1
/// pins Argon2id + ChaCha20-Poly1305.
pub struct Envelope {
    cipher: ChaCha20Poly1305,
    salt: [u8; SALT_LEN],
}

impl Envelope {
    pub fn new(passphrase: &str, salt: [u8; SALT_LEN]) -> Result<Self> {
        let key = derive_key(passphrase, &salt)?;
        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
            salt,
        })
    }

    pub fn generate_salt() -> [u8; SALT_LEN] {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        salt
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut AeadOsRng);

        let mut envelope = Vec::with_capacity(HEADER_LEN + plaintext.len() + TAG_LEN);
        envelope.extend_from_slice(&MAGIC);
        envelope.push(ENVELOPE_VERSION);
        envelope.extend_from_slice(&self.salt);
        envelope.extend_from_slice(&nonce);

        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: &envelope[..HEADER_LEN],
                },
            )
            .map_err(|e| Error::Crypto(e.to_string()))?;

        envelope.extend_from_slice(&ciphertext);
        Ok(envelope)
    }

    pub fn decrypt(&self, envelope: &[u8]) -> Result<Vec<u8>> {
        if envelope.len() < HEADER_LEN + TAG_LEN {
            return Err(Error::Integrity("envelope truncated".to_string()));
        }
        let (header, ciphertext) = envelope.split_at(HEADER_LEN);

        if header[..MAGIC.len()] != MAGIC {
            return Err(Error::Integrity("bad envelope magic".to_string()));
        }
        let version = header[MAGIC.len()];
        if version != ENVELOPE_VERSION {
            return Err(Error::Crypto(format!(
                "unsupported envelope version: {version}"
            )));
        }
        let salt = &header[MAGIC.len() + 1..MAGIC.len() + 1 + SALT_LEN];
        if salt != self.salt {
            return Err(Error::Crypto(
                "envelope salt does not match this repository".to_string(),
            ));
        }
        let nonce = Nonce::from_slice(&header[HEADER_LEN - NONCE_LEN..]);

        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad: header,
                },
            )
            .map_err(|_| Error::Integrity("envelope authentication failed".to_string()))
    }
}

fn derive_key(passphrase: &str, salt: &[u8; SALT_LEN]) -> Result<[u8; 32]> {
    let params = argon2::Params::new(KDF_MEMORY_KIB, KDF_ITERATIONS, KDF_PARALLELISM, Some(32))
        .map_err(|e| Error::Crypto(e.to_string()))?;
    let argon2 = argon2::Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        params,
    );

    let mut key = [0u8; 32];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| Error::Crypto(e.to_string()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> Envelope {
        Envelope::new("correct horse battery staple", [7u8; SALT_LEN]).unwrap()
    }

    #[test]
    fn roundtrip() {
        let envelope = envelope();
        let plaintext = b"Hello, serac!";
        let sealed = envelope.encrypt(plaintext).unwrap();
        let opened = envelope.decrypt(&sealed).unwrap();
        assert_eq!(plaintext.to_vec(), opened);
    }

    #[test]
    fn fresh_nonce_per_encryption() {
        let envelope = envelope();
        let a = envelope.encrypt(b"same bytes").unwrap();
        let b = envelope.encrypt(b"same bytes").unwrap();
        assert_ne!(a, b);
        assert_eq!(envelope.decrypt(&a).unwrap(), envelope.decrypt(&b).unwrap());
    }

    #[test]
    fn any_flipped_bit_fails_authentication() {
        let envelope = envelope();
        let sealed = envelope.encrypt(b"tamper target").unwrap();

        for pos in [0, 4, 10, HEADER_LEN, sealed.len() - 1] {
            let mut tampered = sealed.clone();
            tampered[pos] ^= 0x01;
            assert!(
                matches!(
                    envelope.decrypt(&tampered),
                    Err(Error::Integrity(_)) | Err(Error::Crypto(_))
                ),
                "bit flip at {pos} went undetected"
            );
        }
    }

    #[test]
    fn wrong_passphrase_fails() {
        let sealed = envelope().encrypt(b"secret").unwrap();
        let other = Envelope::new("wrong passphrase", [7u8; SALT_LEN]).unwrap();
        assert!(matches!(other.decrypt(&sealed), Err(Error::Integrity(_))));
    }

    #[test]
    fn foreign_salt_is_rejected() {
        let sealed = envelope().encrypt(b"secret").unwrap();
        let other = Envelope::new("correct horse battery staple", [9u8; SALT_LEN]).unwrap();
        assert!(matches!(other.decrypt(&sealed), Err(Error::Crypto(_))));
    }

    #[test]
    fn truncated_envelope_is_rejected() {
        let envelope = envelope();
        let sealed = envelope.encrypt(b"short").unwrap();
        assert!(envelope.decrypt(&sealed[..HEADER_LEN]).is_err());
        assert!(envelope.decrypt(b"serc").is_err());
    }
}
