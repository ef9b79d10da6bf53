//! Secure Remote Password (SRP-6a) as spoken by Cognito user pools.
//!
//! Cognito's `USER_SRP_AUTH` flow never sends the password. The client sends
//! its public ephemeral `A`, the pool answers with `B`, a salt and a secret
//! block, and the client proves knowledge of the password with an HMAC over
//! the secret block keyed by the shared session key.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use num_bigint::BigUint;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// 3072-bit MODP group from RFC 3526.
const N_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AAAC42DAD33170D04507A33A85521ABDF1CBA64",
    "ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7",
    "ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6B",
    "F12FFA06D98A0864D87602733EC86A64521F2B18177B200C",
    "BBE117577A615D6C770988C0BAD946E208E24FA074E5AB31",
    "43DB5BFCE0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF",
);
const G_HEX: &str = "2";
const INFO_BITS: &[u8] = b"Caldera Derived Key";

/// Timestamp format Cognito expects in the password claim, e.g.
/// `Wed Apr 3 09:05:07 UTC 2024` (day of month without padding).
pub const TIMESTAMP_FORMAT: &str = "%a %b %-d %H:%M:%S UTC %Y";

/// Parameters of a `PASSWORD_VERIFIER` challenge.
#[derive(Debug, Clone)]
pub struct PasswordVerifier {
    pub user_id_for_srp: String,
    pub salt: String,
    pub srp_b: String,
    pub secret_block: String,
}

/// Challenge responses proving knowledge of the password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordClaim {
    pub username: String,
    pub timestamp: String,
    pub secret_block: String,
    pub signature: String,
}

pub struct SrpClient {
    pool_name: String,
    n: BigUint,
    g: BigUint,
    k: BigUint,
    small_a: BigUint,
    large_a: BigUint,
}

impl SrpClient {
    /// Start a handshake with a fresh random ephemeral secret.
    pub fn new(pool_name: &str) -> Result<Self> {
        let mut bytes = [0u8; 128];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::with_secret(pool_name, BigUint::from_bytes_be(&bytes))
    }

    /// Start a handshake with a caller-chosen ephemeral secret.
    pub fn with_secret(pool_name: &str, secret: BigUint) -> Result<Self> {
        let n = group_prime()?;
        let g = hex_to_big(G_HEX)?;
        let k = hex_to_big(&hex_hash(&format!("00{}0{}", N_HEX, G_HEX))?)?;
        let small_a = secret % &n;
        let large_a = g.modpow(&small_a, &n);
        if &large_a % &n == BigUint::default() {
            return Err(Error::auth("Safety check for A failed"));
        }
        Ok(Self {
            pool_name: pool_name.to_string(),
            n,
            g,
            k,
            small_a,
            large_a,
        })
    }

    /// Public ephemeral value, sent as `SRP_A`.
    pub fn srp_a(&self) -> String {
        self.large_a.to_str_radix(16)
    }

    /// Answer a `PASSWORD_VERIFIER` challenge.
    pub fn password_claim(
        &self,
        challenge: &PasswordVerifier,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<PasswordClaim> {
        let key = self.authentication_key(
            &challenge.user_id_for_srp,
            password,
            &challenge.srp_b,
            &challenge.salt,
        )?;
        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();

        let secret_block = STANDARD
            .decode(&challenge.secret_block)
            .map_err(|e| Error::auth_from("Invalid SECRET_BLOCK in challenge", e))?;

        let mut message = Vec::new();
        message.extend_from_slice(self.pool_name.as_bytes());
        message.extend_from_slice(challenge.user_id_for_srp.as_bytes());
        message.extend_from_slice(&secret_block);
        message.extend_from_slice(timestamp.as_bytes());

        let signature = STANDARD.encode(hmac_sha256(&key, &message));

        Ok(PasswordClaim {
            username: challenge.user_id_for_srp.clone(),
            timestamp,
            secret_block: challenge.secret_block.clone(),
            signature,
        })
    }

    fn authentication_key(
        &self,
        user_id: &str,
        password: &str,
        server_b: &str,
        salt: &str,
    ) -> Result<Vec<u8>> {
        let b = hex_to_big(server_b)?;
        if &b % &self.n == BigUint::default() {
            return Err(Error::auth("Safety check for B failed"));
        }

        let u = hex_to_big(&hex_hash(&format!(
            "{}{}",
            pad_hex(&self.large_a),
            pad_hex(&b)
        ))?)?;
        if u == BigUint::default() {
            return Err(Error::auth("U cannot be zero"));
        }

        let user_password = format!("{}{}:{}", self.pool_name, user_id, password);
        let user_password_hash = sha256_hex(user_password.as_bytes());
        let x = hex_to_big(&hex_hash(&format!(
            "{}{}",
            pad_hex_str(salt),
            user_password_hash
        ))?)?;

        // (B - k * g^x) mod N, kept non-negative
        let kgx = (&self.k * self.g.modpow(&x, &self.n)) % &self.n;
        let base = ((&b % &self.n) + &self.n - kgx) % &self.n;
        let s = base.modpow(&(&self.small_a + &u * &x), &self.n);

        Ok(compute_hkdf(
            &hex_bytes(&pad_hex(&s))?,
            &hex_bytes(&pad_hex(&u))?,
        ))
    }
}

pub(crate) fn group_prime() -> Result<BigUint> {
    hex_to_big(N_HEX)
}

type HmacSha256 = Hmac<Sha256>;

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hex_bytes(hex_str: &str) -> Result<Vec<u8>> {
    hex::decode(hex_str).map_err(|e| Error::auth_from(format!("Invalid hex value '{}'", hex_str), e))
}

/// SHA-256 of the bytes a hex string encodes, as hex.
pub(crate) fn hex_hash(hex_str: &str) -> Result<String> {
    Ok(sha256_hex(&hex_bytes(hex_str)?))
}

pub(crate) fn hex_to_big(hex_str: &str) -> Result<BigUint> {
    BigUint::parse_bytes(hex_str.as_bytes(), 16)
        .ok_or_else(|| Error::auth(format!("Invalid hex value '{}'", hex_str)))
}

/// Hex encoding with an even number of digits and a clear sign bit, the
/// form Cognito hashes big integers in.
pub fn pad_hex(value: &BigUint) -> String {
    pad_hex_str(&value.to_str_radix(16))
}

pub fn pad_hex_str(hex_str: &str) -> String {
    if hex_str.len() % 2 == 1 {
        format!("0{}", hex_str)
    } else if hex_str.starts_with(|c: char| "89ABCDEFabcdef".contains(c)) {
        format!("00{}", hex_str)
    } else {
        hex_str.to_string()
    }
}

/// Single-block HKDF-SHA256, truncated to 16 bytes.
pub fn compute_hkdf(ikm: &[u8], salt: &[u8]) -> Vec<u8> {
    let prk = hmac_sha256(salt, ikm);
    let mut info = INFO_BITS.to_vec();
    info.push(1);
    let mut okm = hmac_sha256(&prk, &info);
    okm.truncate(16);
    okm
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn repeat_hex(pattern: &str, times: usize) -> BigUint {
        hex_to_big(&pattern.repeat(times)).unwrap()
    }

    #[test]
    fn test_pad_hex() {
        assert_eq!(pad_hex_str("abc"), "0abc");
        assert_eq!(pad_hex_str("8f"), "008f");
        assert_eq!(pad_hex_str("7f"), "7f");
        assert_eq!(pad_hex(&BigUint::from(255u32)), "00ff");
    }

    #[test]
    fn test_multiplier_parameter() {
        let client = SrpClient::with_secret("abc123", BigUint::from(7u32)).unwrap();
        assert_eq!(
            client.k.to_str_radix(16),
            "538282c4354742d7cbbde2359fcf67f9f5b3a6b08791e5011b43b8a5b66d9ee6"
        );
    }

    #[test]
    fn test_srp_a_matches_ephemeral_secret() {
        let client =
            SrpClient::with_secret("abc123", repeat_hex("1234567890abcdef", 16)).unwrap();
        let a = client.srp_a();
        assert_eq!(a.len(), 768);
        assert!(a.starts_with("87ef46e6f23037298b68c9527f88af1c"));
    }

    #[test]
    fn test_random_clients_differ() {
        let first = SrpClient::new("abc123").unwrap();
        let second = SrpClient::new("abc123").unwrap();
        assert_ne!(first.srp_a(), second.srp_a());
    }

    #[test]
    fn test_timestamp_format() {
        let now = Utc.with_ymd_and_hms(2024, 4, 3, 9, 5, 7).unwrap();
        assert_eq!(
            now.format(TIMESTAMP_FORMAT).to_string(),
            "Wed Apr 3 09:05:07 UTC 2024"
        );
        let now = Utc.with_ymd_and_hms(2024, 4, 17, 16, 23, 0).unwrap();
        assert_eq!(
            now.format(TIMESTAMP_FORMAT).to_string(),
            "Wed Apr 17 16:23:00 UTC 2024"
        );
    }

    #[test]
    fn test_group_prime_is_the_3072_bit_modp_prime() {
        let n = group_prime().unwrap();
        assert_eq!(n.bits(), 3072);
        assert_eq!(pad_hex(&n).len(), 770);
        assert!(n.to_str_radix(16).ends_with("ffffffffffffffff"));
    }

    #[test]
    fn test_hkdf_length() {
        assert_eq!(compute_hkdf(b"input", b"salt").len(), 16);
    }

    #[test]
    fn test_password_claim_signature() {
        let client =
            SrpClient::with_secret("abc123", repeat_hex("1234567890abcdef", 16)).unwrap();

        // B = k * g^12345 + g^b for a fixed server secret b
        let n = group_prime().unwrap();
        let g = BigUint::from(2u32);
        let server_secret = repeat_hex("fedcba0987654321", 8);
        let b = (&client.k * g.modpow(&BigUint::from(12345u32), &n) + g.modpow(&server_secret, &n))
            % &n;

        let challenge = PasswordVerifier {
            user_id_for_srp: "3b5f1c2d-user".to_string(),
            salt: "9a1f0e".to_string(),
            srp_b: b.to_str_radix(16),
            secret_block: "c2VjcmV0LWJsb2NrLWJ5dGVz".to_string(),
        };

        let key = client
            .authentication_key("3b5f1c2d-user", "hunter2", &challenge.srp_b, "9a1f0e")
            .unwrap();
        assert_eq!(hex::encode(&key), "eac1dffc882fb9760b05ff643ad67477");

        let now = Utc.with_ymd_and_hms(2024, 4, 3, 9, 5, 7).unwrap();
        let claim = client.password_claim(&challenge, "hunter2", now).unwrap();
        assert_eq!(claim.username, "3b5f1c2d-user");
        assert_eq!(claim.timestamp, "Wed Apr 3 09:05:07 UTC 2024");
        assert_eq!(claim.secret_block, "c2VjcmV0LWJsb2NrLWJ5dGVz");
        assert_eq!(
            claim.signature,
            "24bGxqCt4TxQx80fV1r84KuSTuTOttSpdLImULc/ghY="
        );
    }

    #[test]
    fn test_zero_b_is_rejected() {
        let client = SrpClient::with_secret("abc123", BigUint::from(7u32)).unwrap();
        let challenge = PasswordVerifier {
            user_id_for_srp: "user".to_string(),
            salt: "00".to_string(),
            srp_b: N_HEX.to_string(),
            secret_block: String::new(),
        };
        let err = client
            .password_claim(&challenge, "pw", Utc::now())
            .unwrap_err();
        assert!(err.is_auth());
    }
}
