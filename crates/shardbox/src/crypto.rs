//! per-node secure channel
//!
//! - x25519 static diffie-hellman between the orchestrator and a node
//! - hkdf-sha256 turns the shared secret into a session key
//! - chacha20poly1305 with a random nonce prepended to every ciphertext

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{Error, Result};

/// private, public and session key length
pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

const KEYPAIR_INFO: &[u8] = b"shardbox:keypair:v1";
const SESSION_INFO: &[u8] = b"shardbox:session:v1";

/// asymmetric key pair, private half wiped on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyPair {
    pub private_key: Vec<u8>,
    pub public_key: Vec<u8>,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &hex::encode(&self.public_key))
            .finish_non_exhaustive()
    }
}

/// symmetric key shared with exactly one node
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey(Vec<u8>);

impl SessionKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// pluggable crypto backend
pub trait Crypto: Send + Sync {
    /// random key pair, or a deterministic one when `seed` is given
    fn key_pair(&self, seed: Option<&[u8]>) -> Result<KeyPair>;

    /// same inputs always give the same session key
    fn session_key(&self, private_key: &[u8], public_key: &[u8]) -> Result<SessionKey>;

    fn encrypt(&self, plaintext: &[u8], session_key: &SessionKey) -> Result<Vec<u8>>;

    fn decrypt(&self, ciphertext: &[u8], session_key: &SessionKey) -> Result<Vec<u8>>;
}

/// x25519 + hkdf-sha256 + chacha20poly1305
#[derive(Clone, Copy, Debug, Default)]
pub struct X25519Crypto;

/// generate random bytes
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

fn key_array(bytes: &[u8], err: fn(usize) -> Error) -> Result<[u8; KEY_LEN]> {
    bytes.try_into().map_err(|_| err(bytes.len()))
}

fn cipher(session_key: &SessionKey) -> Result<ChaCha20Poly1305> {
    let key = session_key.as_bytes();
    if key.len() != KEY_LEN {
        return Err(Error::InvalidSessionKey(key.len()));
    }
    ChaCha20Poly1305::new_from_slice(key).map_err(|_| Error::InvalidSessionKey(key.len()))
}

impl Crypto for X25519Crypto {
    fn key_pair(&self, seed: Option<&[u8]>) -> Result<KeyPair> {
        let secret = match seed {
            Some(seed) => {
                let mut bytes = [0u8; KEY_LEN];
                Hkdf::<Sha256>::new(None, seed)
                    .expand(KEYPAIR_INFO, &mut bytes)
                    .map_err(|_| Error::KeyDerivationFailed)?;
                let secret = x25519_dalek::StaticSecret::from(bytes);
                bytes.zeroize();
                secret
            }
            None => x25519_dalek::StaticSecret::random_from_rng(rand::thread_rng()),
        };
        let public = x25519_dalek::PublicKey::from(&secret);

        Ok(KeyPair {
            private_key: secret.to_bytes().to_vec(),
            public_key: public.as_bytes().to_vec(),
        })
    }

    fn session_key(&self, private_key: &[u8], public_key: &[u8]) -> Result<SessionKey> {
        let mut private = key_array(private_key, Error::InvalidPrivateKey)?;
        let public = key_array(public_key, Error::InvalidPublicKey)?;

        let secret = x25519_dalek::StaticSecret::from(private);
        private.zeroize();
        let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(public));
        if !shared.was_contributory() {
            return Err(Error::SessionKeyNotGenerated);
        }

        let mut key = vec![0u8; KEY_LEN];
        Hkdf::<Sha256>::new(None, shared.as_bytes())
            .expand(SESSION_INFO, &mut key)
            .map_err(|_| Error::KeyDerivationFailed)?;

        Ok(SessionKey(key))
    }

    fn encrypt(&self, plaintext: &[u8], session_key: &SessionKey) -> Result<Vec<u8>> {
        let cipher = cipher(session_key)?;
        let nonce: [u8; NONCE_LEN] = random_bytes();

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::EncryptionFailed)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    fn decrypt(&self, ciphertext: &[u8], session_key: &SessionKey) -> Result<Vec<u8>> {
        let cipher = cipher(session_key)?;
        if ciphertext.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::InvalidCiphertext(ciphertext.len()));
        }

        let (nonce, body) = ciphertext.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| Error::DecryptionFailed)
    }
}
