use crate::error::{Error, Result};
use crate::extensions::KeyIdentifier;
use der::pem::LineEnding;
use der::{Decode, Encode};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use spki::SubjectPublicKeyInfoOwned;
use std::fmt;
use tracing::debug;

pub const MIN_KEY_LENGTH_BITS: usize = 2048;
pub const MAX_KEY_LENGTH_BITS: usize = 8192;
pub const MAX_PUBLIC_EXPONENT: u64 = (1 << 33) - 1;
pub const DEFAULT_PUBLIC_EXPONENT: u64 = 65537;
pub const DEFAULT_KEY_LENGTH_BITS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyParams {
    pub public_exponent: u64,
    pub key_length_bits: usize,
}

impl KeyParams {
    pub fn new(public_exponent: u64, key_length_bits: usize) -> Self {
        Self {
            public_exponent,
            key_length_bits,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.key_length_bits < MIN_KEY_LENGTH_BITS {
            return Err(Error::KeyGeneration(format!(
                "key length {} is below the {}-bit minimum",
                self.key_length_bits, MIN_KEY_LENGTH_BITS
            )));
        }
        if self.key_length_bits > MAX_KEY_LENGTH_BITS {
            return Err(Error::KeyGeneration(format!(
                "key length {} exceeds the {}-bit maximum",
                self.key_length_bits, MAX_KEY_LENGTH_BITS
            )));
        }
        if self.public_exponent < 3 || self.public_exponent % 2 == 0 {
            return Err(Error::KeyGeneration(format!(
                "public exponent {} must be odd and at least 3",
                self.public_exponent
            )));
        }
        if self.public_exponent > MAX_PUBLIC_EXPONENT {
            return Err(Error::KeyGeneration(format!(
                "public exponent {} exceeds {}",
                self.public_exponent, MAX_PUBLIC_EXPONENT
            )));
        }
        Ok(())
    }
}

impl Default for KeyParams {
    fn default() -> Self {
        Self::new(DEFAULT_PUBLIC_EXPONENT, DEFAULT_KEY_LENGTH_BITS)
    }
}

/// RSA key pair. The private half never leaves this type except as PEM.
#[derive(Clone)]
pub struct KeyPair {
    private_key: RsaPrivateKey,
}

impl KeyPair {
    pub fn generate(public_exponent: u64, key_length_bits: usize) -> Result<Self> {
        Self::generate_with(&KeyParams::new(public_exponent, key_length_bits))
    }

    pub fn generate_with(params: &KeyParams) -> Result<Self> {
        params.validate()?;

        let mut rng = rand::thread_rng();
        let exponent = BigUint::from(params.public_exponent);
        let private_key = RsaPrivateKey::new_with_exp(&mut rng, params.key_length_bits, &exponent)
            .map_err(|e| Error::KeyGeneration(e.to_string()))?;

        debug!(
            bits = params.key_length_bits,
            exponent = params.public_exponent,
            "generated RSA key pair"
        );
        Ok(Self { private_key })
    }

    /// Accepts PKCS#1 ("RSA PRIVATE KEY") or PKCS#8 ("PRIVATE KEY") PEM.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let private_key = match RsaPrivateKey::from_pkcs1_pem(pem) {
            Ok(key) => key,
            Err(_) => RsaPrivateKey::from_pkcs8_pem(pem)?,
        };
        Ok(Self { private_key })
    }

    /// Unencrypted PKCS#1 PEM.
    pub fn private_key_pem(&self) -> Result<String> {
        let pem = self.private_key.to_pkcs1_pem(LineEnding::LF)?;
        Ok(pem.to_string())
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.private_key.to_public_key()
    }

    pub fn public_key_info(&self) -> Result<SubjectPublicKeyInfoOwned> {
        let der = self.public_key().to_public_key_der()?;
        Ok(SubjectPublicKeyInfoOwned::from_der(der.as_bytes())?)
    }

    pub fn key_identifier(&self) -> Result<KeyIdentifier> {
        Ok(KeyIdentifier::from_public_key_info(&self.public_key_info()?))
    }

    pub fn key_length_bits(&self) -> usize {
        self.private_key.size() * 8
    }

    pub fn public_exponent(&self) -> BigUint {
        self.private_key.e().clone()
    }

    /// True when `info` carries this pair's public key.
    pub fn matches(&self, info: &SubjectPublicKeyInfoOwned) -> Result<bool> {
        Ok(self.public_key_info()?.to_der()? == info.to_der()?)
    }

    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("bits", &self.key_length_bits())
            .finish_non_exhaustive()
    }
}
