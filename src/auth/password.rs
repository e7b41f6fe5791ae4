/// Password Hashing and Verification
///
/// PBKDF2-HMAC-SHA512 with a fresh 128-bit salt per hash. Stored hashes are
/// `$`-separated strings in one of two layouts:
/// - legacy:  `iterations$salt$digest` (algorithm implied)
/// - current: `pbkdf2-sha512$iterations$salt$digest`
///
/// The salt field's text is fed to the KDF as-is and the digest is hex.

use std::fmt;
use std::str::FromStr;

use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha512;
use subtle::ConstantTimeEq;

const SALT_BYTES: usize = 16;
const DIGEST_BYTES: usize = 64;
/// Upper bound accepted when parsing a stored hash.
const MAX_ITERATIONS: u32 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Pbkdf2Sha512,
}

impl HashAlgorithm {
    pub fn tag(&self) -> &'static str {
        match self {
            HashAlgorithm::Pbkdf2Sha512 => "pbkdf2-sha512",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "pbkdf2-sha512" => Some(HashAlgorithm::Pbkdf2Sha512),
            _ => None,
        }
    }
}

/// Why a stored hash string could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashFormatError {
    #[error("expected 3 or 4 fields, found {0}")]
    FieldCount(usize),
    #[error("unsupported hash algorithm '{0}'")]
    UnknownAlgorithm(String),
    #[error("invalid iteration count")]
    InvalidIterations,
    #[error("empty salt")]
    EmptySalt,
    #[error("digest is not a 64-byte hex string")]
    InvalidDigest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashParams {
    pub iterations: u32,
    pub salt: String,
    pub digest: Vec<u8>,
}

/// A parsed password hash. The layout is decided once, by field count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedHash {
    /// `iterations$salt$digest`
    Legacy(HashParams),
    /// `algorithm$iterations$salt$digest`
    Tagged {
        algorithm: HashAlgorithm,
        params: HashParams,
    },
}

impl EncodedHash {
    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            EncodedHash::Legacy(_) => HashAlgorithm::Pbkdf2Sha512,
            EncodedHash::Tagged { algorithm, .. } => *algorithm,
        }
    }

    pub fn params(&self) -> &HashParams {
        match self {
            EncodedHash::Legacy(params) => params,
            EncodedHash::Tagged { params, .. } => params,
        }
    }
}

fn parse_params(iterations: &str, salt: &str, digest: &str) -> Result<HashParams, HashFormatError> {
    let iterations: u32 = iterations
        .parse()
        .map_err(|_| HashFormatError::InvalidIterations)?;
    if iterations == 0 || iterations > MAX_ITERATIONS {
        return Err(HashFormatError::InvalidIterations);
    }

    if salt.is_empty() {
        return Err(HashFormatError::EmptySalt);
    }

    let digest = hex::decode(digest).map_err(|_| HashFormatError::InvalidDigest)?;
    if digest.len() != DIGEST_BYTES {
        return Err(HashFormatError::InvalidDigest);
    }

    Ok(HashParams {
        iterations,
        salt: salt.to_string(),
        digest,
    })
}

impl FromStr for EncodedHash {
    type Err = HashFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split('$').collect();
        match fields.as_slice() {
            [iterations, salt, digest] => {
                Ok(EncodedHash::Legacy(parse_params(iterations, salt, digest)?))
            }
            [tag, iterations, salt, digest] => {
                let algorithm = HashAlgorithm::from_tag(tag)
                    .ok_or_else(|| HashFormatError::UnknownAlgorithm(tag.to_string()))?;
                Ok(EncodedHash::Tagged {
                    algorithm,
                    params: parse_params(iterations, salt, digest)?,
                })
            }
            other => Err(HashFormatError::FieldCount(other.len())),
        }
    }
}

impl fmt::Display for EncodedHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self.params();
        if let EncodedHash::Tagged { algorithm, .. } = self {
            write!(f, "{}$", algorithm.tag())?;
        }
        write!(
            f,
            "{}${}${}",
            params.iterations,
            params.salt,
            hex::encode(&params.digest)
        )
    }
}

fn derive(plaintext: &str, salt: &str, iterations: u32) -> [u8; DIGEST_BYTES] {
    let mut out = [0u8; DIGEST_BYTES];
    pbkdf2_hmac::<Sha512>(plaintext.as_bytes(), salt.as_bytes(), iterations, &mut out);
    out
}

/// Derives and checks password hashes at a fixed iteration count
#[derive(Debug, Clone, Copy)]
pub struct CredentialHasher {
    iterations: u32,
}

impl CredentialHasher {
    pub fn new(iterations: u32) -> Self {
        Self { iterations }
    }

    /// Hash with a fresh random salt, in the tagged layout.
    pub fn hash(&self, plaintext: &str) -> EncodedHash {
        let mut salt = [0u8; SALT_BYTES];
        OsRng.fill_bytes(&mut salt);
        self.hash_with_salt(plaintext, &hex::encode(salt))
    }

    /// Deterministic for a given salt and iteration count.
    pub fn hash_with_salt(&self, plaintext: &str, salt: &str) -> EncodedHash {
        let digest = derive(plaintext, salt, self.iterations);
        EncodedHash::Tagged {
            algorithm: HashAlgorithm::Pbkdf2Sha512,
            params: HashParams {
                iterations: self.iterations,
                salt: salt.to_string(),
                digest: digest.to_vec(),
            },
        }
    }

    /// Re-derive with the stored salt and iteration count and compare in
    /// constant time.
    pub fn verify(&self, plaintext: &str, encoded: &EncodedHash) -> bool {
        let params = encoded.params();
        let derived = match encoded.algorithm() {
            HashAlgorithm::Pbkdf2Sha512 => derive(plaintext, &params.salt, params.iterations),
        };
        derived[..].ct_eq(&params.digest[..]).into()
    }

    /// Like `verify`, but from the stored string; malformed input is `false`.
    pub fn verify_encoded(&self, plaintext: &str, stored: &str) -> bool {
        match stored.parse::<EncodedHash>() {
            Ok(encoded) => self.verify(plaintext, &encoded),
            Err(e) => {
                tracing::debug!(error = %e, "Stored password hash is malformed");
                false
            }
        }
    }
}
