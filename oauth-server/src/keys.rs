//! Asymmetric key handling: the server signing key and client key pairs

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use log::info;
use openssl::bn::{BigNum, BigNumContext};
use openssl::ec::{EcGroup, EcKey};
use openssl::nid::Nid;
use openssl::pkey::{HasPublic, Id, PKey, PKeyRef};
use openssl::rsa::Rsa;
use rand::distributions::{Alphanumeric, DistString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use utoipa::ToSchema;

const RSA_KEY_BITS: u32 = 2048;
const EC_COORDINATE_LEN: i32 = 32;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),
    #[error("Failed to read key file: {0}")]
    Io(#[from] std::io::Error),
    #[error("JWT key error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("Invalid PEM: {0}")]
    InvalidPem(String),
    #[error("Unsupported key: {0}")]
    Unsupported(String),
}

/// Asymmetric key families accepted for signing
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    /// ECDSA over P-256, signs ES256
    #[default]
    Ecdsa,
    /// RSA 2048 bits or more, signs RS256
    Rsa,
}

impl KeyAlgorithm {
    pub fn jwt_algorithm(&self) -> Algorithm {
        match self {
            KeyAlgorithm::Ecdsa => Algorithm::ES256,
            KeyAlgorithm::Rsa => Algorithm::RS256,
        }
    }
}

/// Freshly generated key pair, PKCS#8 private and SPKI public PEM
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub algorithm: KeyAlgorithm,
    pub private_pem: String,
    pub public_pem: String,
}

/// Public key registered by a client to sign its JWT-bearer assertions
#[derive(Debug, Clone, PartialEq)]
pub struct ClientPublicKey {
    pub algorithm: KeyAlgorithm,
    pub pem: String,
}

impl ClientPublicKey {
    /// Parses and validates a stored PEM, detecting its algorithm
    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        let algorithm = validate_public_pem(pem)?;
        Ok(Self {
            algorithm,
            pem: pem.to_string(),
        })
    }

    pub fn decoding_key(&self) -> Result<DecodingKey, KeyError> {
        let key = match self.algorithm {
            KeyAlgorithm::Ecdsa => DecodingKey::from_ec_pem(self.pem.as_bytes())?,
            KeyAlgorithm::Rsa => DecodingKey::from_rsa_pem(self.pem.as_bytes())?,
        };
        Ok(key)
    }
}

/// Generates a key pair for a client; the private half is never persisted
pub fn generate_key_pair(algorithm: KeyAlgorithm) -> Result<KeyPair, KeyError> {
    let pkey = match algorithm {
        KeyAlgorithm::Ecdsa => {
            let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
            PKey::from_ec_key(EcKey::generate(&group)?)?
        }
        KeyAlgorithm::Rsa => PKey::from_rsa(Rsa::generate(RSA_KEY_BITS)?)?,
    };
    Ok(KeyPair {
        algorithm,
        private_pem: pem_string(pkey.private_key_to_pem_pkcs8()?)?,
        public_pem: pem_string(pkey.public_key_to_pem()?)?,
    })
}

/// Checks a caller-supplied PEM public key: EC P-256 or RSA of at least 2048 bits
pub fn validate_public_pem(pem: &str) -> Result<KeyAlgorithm, KeyError> {
    let pkey = PKey::public_key_from_pem(pem.as_bytes())
        .map_err(|_| KeyError::InvalidPem("not a PEM encoded public key".to_string()))?;
    algorithm_of(&pkey)
}

fn algorithm_of<T: HasPublic>(pkey: &PKeyRef<T>) -> Result<KeyAlgorithm, KeyError> {
    match pkey.id() {
        Id::EC => {
            let curve = pkey.ec_key()?.group().curve_name();
            if curve != Some(Nid::X9_62_PRIME256V1) {
                return Err(KeyError::Unsupported(
                    "only the P-256 curve is supported for EC keys".to_string(),
                ));
            }
            Ok(KeyAlgorithm::Ecdsa)
        }
        Id::RSA => {
            if pkey.bits() < RSA_KEY_BITS {
                return Err(KeyError::Unsupported(format!(
                    "RSA keys must be at least {RSA_KEY_BITS} bits"
                )));
            }
            Ok(KeyAlgorithm::Rsa)
        }
        _ => Err(KeyError::Unsupported(
            "only EC and RSA keys are supported".to_string(),
        )),
    }
}

fn pem_string(bytes: Vec<u8>) -> Result<String, KeyError> {
    String::from_utf8(bytes).map_err(|e| KeyError::InvalidPem(e.to_string()))
}

/// Random alphanumeric string used for client ids and secrets
pub fn random_string(len: usize) -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), len)
}

/// Hex encoded SHA-256 digest under which client secrets are stored
pub fn hash_secret(secret: &str) -> String {
    format!("{:x}", Sha256::digest(secret.as_bytes()))
}

/// Compares a presented secret with a stored digest in constant time
pub fn verify_secret(secret: &str, digest: &str) -> bool {
    let presented = hash_secret(secret);
    presented.as_bytes().ct_eq(digest.as_bytes()).into()
}

/// Public half of the signing key as published on the JWKS endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Jwk {
    pub kty: String,
    pub kid: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// Holds the server signing key used for every issued token
pub struct KeyManager {
    algorithm: KeyAlgorithm,
    key_id: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    jwk: Jwk,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("algorithm", &self.algorithm)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl KeyManager {
    /// Loads the signing key from `path` when given, otherwise generates one
    pub fn new(path: Option<&str>, algorithm: KeyAlgorithm) -> Result<Self, KeyError> {
        match path {
            Some(path) => {
                let pem = std::fs::read_to_string(path)?;
                let manager = Self::from_private_pem(&pem)?;
                info!(
                    "Loaded {:?} signing key from {} (kid={})",
                    manager.algorithm, path, manager.key_id
                );
                Ok(manager)
            }
            None => {
                let manager = Self::generate(algorithm)?;
                info!(
                    "Generated ephemeral {:?} signing key (kid={})",
                    manager.algorithm, manager.key_id
                );
                Ok(manager)
            }
        }
    }

    pub fn generate(algorithm: KeyAlgorithm) -> Result<Self, KeyError> {
        let pair = generate_key_pair(algorithm)?;
        Self::from_private_pem(&pair.private_pem)
    }

    /// Builds the manager from a PKCS#8 or traditional PEM private key
    pub fn from_private_pem(pem: &str) -> Result<Self, KeyError> {
        let pkey = PKey::private_key_from_pem(pem.as_bytes())
            .map_err(|_| KeyError::InvalidPem("not a PEM encoded private key".to_string()))?;
        let algorithm = algorithm_of(&pkey)?;

        let private_pem = pkey.private_key_to_pem_pkcs8()?;
        let public_pem = pkey.public_key_to_pem()?;
        let (encoding_key, decoding_key) = match algorithm {
            KeyAlgorithm::Ecdsa => (
                EncodingKey::from_ec_pem(&private_pem)?,
                DecodingKey::from_ec_pem(&public_pem)?,
            ),
            KeyAlgorithm::Rsa => (
                EncodingKey::from_rsa_pem(&private_pem)?,
                DecodingKey::from_rsa_pem(&public_pem)?,
            ),
        };

        let key_id = URL_SAFE_NO_PAD.encode(Sha256::digest(pkey.public_key_to_der()?));
        let jwk = build_jwk(&pkey, algorithm, &key_id)?;

        Ok(Self {
            algorithm,
            key_id,
            encoding_key,
            decoding_key,
            jwk,
        })
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    pub fn jwks(&self) -> JwkSet {
        JwkSet {
            keys: vec![self.jwk.clone()],
        }
    }
}

fn build_jwk<T: HasPublic>(
    pkey: &PKeyRef<T>,
    algorithm: KeyAlgorithm,
    key_id: &str,
) -> Result<Jwk, KeyError> {
    let mut jwk = Jwk {
        kty: String::new(),
        kid: key_id.to_string(),
        key_use: "sig".to_string(),
        alg: format!("{:?}", algorithm.jwt_algorithm()),
        crv: None,
        x: None,
        y: None,
        n: None,
        e: None,
    };
    match algorithm {
        KeyAlgorithm::Ecdsa => {
            let ec = pkey.ec_key()?;
            let mut ctx = BigNumContext::new()?;
            let mut x = BigNum::new()?;
            let mut y = BigNum::new()?;
            ec.public_key()
                .affine_coordinates(ec.group(), &mut x, &mut y, &mut ctx)?;
            jwk.kty = "EC".to_string();
            jwk.crv = Some("P-256".to_string());
            jwk.x = Some(URL_SAFE_NO_PAD.encode(x.to_vec_padded(EC_COORDINATE_LEN)?));
            jwk.y = Some(URL_SAFE_NO_PAD.encode(y.to_vec_padded(EC_COORDINATE_LEN)?));
        }
        KeyAlgorithm::Rsa => {
            let rsa = pkey.rsa()?;
            jwk.kty = "RSA".to_string();
            jwk.n = Some(URL_SAFE_NO_PAD.encode(rsa.n().to_vec()));
            jwk.e = Some(URL_SAFE_NO_PAD.encode(rsa.e().to_vec()));
        }
    }
    Ok(jwk)
}
