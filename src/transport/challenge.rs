//! RSA challenge-response for OPER.
//!
//! The server sends the ciphertext of a random token, base64-encoded and
//! split across numeric 740 lines. We decrypt with the oper's private key
//! (RSA-OAEP over SHA-1), hash the plaintext and answer with the
//! base64-encoded digest. A failure here is not fatal: the bot keeps
//! running un-opered.

use base64::prelude::{BASE64_STANDARD, Engine as _};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Oaep, RsaPrivateKey};
use sha1::{Digest, Sha1};
use std::path::Path;
use thiserror::Error;

/// Challenge failures.
#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("failed to read key file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse key file: {0}")]
    Key(String),
    #[error("base64 decode failed: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("decrypt failed: {0}")]
    Crypto(String),
}

/// Accumulates challenge ciphertext fragments against a loaded key.
pub struct Challenge {
    key: RsaPrivateKey,
    fragments: String,
}

impl Challenge {
    /// Load an RSA private key from an unencrypted PKCS#8 or PKCS#1 PEM
    /// file.
    pub fn load(keyfile: &Path) -> Result<Self, ChallengeError> {
        let pem = std::fs::read_to_string(keyfile)?;
        let key = match RsaPrivateKey::from_pkcs8_pem(&pem) {
            Ok(key) => key,
            Err(pkcs8_err) => RsaPrivateKey::from_pkcs1_pem(&pem)
                .map_err(|pkcs1_err| ChallengeError::Key(format!("{pkcs8_err}; {pkcs1_err}")))?,
        };
        Ok(Challenge {
            key,
            fragments: String::new(),
        })
    }

    /// Append one ciphertext fragment from a challenge-text line.
    pub fn push(&mut self, fragment: &str) {
        self.fragments.push_str(fragment);
    }

    /// Decrypt the accumulated ciphertext and produce the retort.
    pub fn finalise(self) -> Result<String, ChallengeError> {
        let cipher = BASE64_STANDARD.decode(self.fragments.as_bytes())?;
        let plain = self
            .key
            .decrypt(Oaep::new::<Sha1>(), &cipher)
            .map_err(|e| ChallengeError::Crypto(e.to_string()))?;
        Ok(BASE64_STANDARD.encode(Sha1::digest(&plain)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPublicKey;
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};

    #[test]
    fn challenge_round_trip() {
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let public = RsaPublicKey::from(&key);

        let token = b"random challenge token";
        let cipher = public.encrypt(&mut rng, Oaep::new::<Sha1>(), token).unwrap();
        let encoded = BASE64_STANDARD.encode(&cipher);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oper.pem");
        let pem = key.to_pkcs8_pem(LineEnding::LF).unwrap();
        std::fs::write(&path, pem.as_bytes()).unwrap();

        let mut challenge = Challenge::load(&path).unwrap();
        let (front, back) = encoded.split_at(encoded.len() / 2);
        challenge.push(front);
        challenge.push(back);

        let retort = challenge.finalise().unwrap();
        assert_eq!(retort, BASE64_STANDARD.encode(Sha1::digest(token)));
    }

    #[test]
    fn load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oper.pem");
        std::fs::write(&path, "not a key").unwrap();
        assert!(matches!(
            Challenge::load(&path),
            Err(ChallengeError::Key(_))
        ));
    }
}
