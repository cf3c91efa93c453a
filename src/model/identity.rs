use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub type HmacSha256 = Hmac<Sha256>;

/// Number of digits in a national identity number.
pub const IDENTITY_LENGTH: usize = 12;

/// Length of a hex-encoded fingerprint.
pub const FINGERPRINT_LENGTH: usize = 64;

/// The identity number did not consist of exactly [`IDENTITY_LENGTH`] ASCII digits.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
#[error("Identity number must be exactly {IDENTITY_LENGTH} digits")]
pub struct InvalidFormat;

/// A validated national identity number.
///
/// The digits are wiped from memory when this is dropped. Has no `Display` or
/// `Serialize`, and `Debug` is redacted, so the raw number only leaves this
/// type through [`Fingerprinter::fingerprint`].
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct IdentityNumber(String);

impl IdentityNumber {
    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl FromStr for IdentityNumber {
    type Err = InvalidFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == IDENTITY_LENGTH && s.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidFormat)
        }
    }
}

impl TryFrom<String> for IdentityNumber {
    type Error = InvalidFormat;

    fn try_from(mut s: String) -> Result<Self, Self::Error> {
        let parsed = s.parse();
        s.zeroize();
        parsed
    }
}

impl Debug for IdentityNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("IdentityNumber(<redacted>)")
    }
}

/// One-way identifier standing in for an [`IdentityNumber`] in storage and logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computes fingerprints as the hex-encoded HMAC-SHA256 of the identity digits
/// under a server-held secret.
#[derive(Clone)]
pub struct Fingerprinter {
    key: Vec<u8>,
}

impl Fingerprinter {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: secret.to_vec(),
        }
    }

    pub fn fingerprint(&self, identity: &IdentityNumber) -> Fingerprint {
        let mut hmac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size");
        hmac.update(identity.as_bytes());
        Fingerprint(HEXLOWER.encode(&hmac.finalize().into_bytes()))
    }
}

impl Drop for Fingerprinter {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}
