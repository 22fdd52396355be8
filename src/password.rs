/// Password hashing — Argon2id behind a narrow hash/verify surface
use crate::error::{ServiceError, ServiceResult};
use argon2::{
    password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use rand::Rng;

/// Hash a plaintext password with a fresh salt
pub fn hash(password: &str) -> ServiceResult<String> {
    let salt = SaltString::generate(&mut rand::thread_rng());

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ServiceError::Internal(format!("Password hashing failed: {}", e)))
}

/// Verify a plaintext password against a stored hash
pub fn verify(password: &str, stored_hash: &str) -> ServiceResult<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| ServiceError::Internal(format!("Corrupt password hash: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Random throwaway password used when an administrator overwrites an
/// account's credential; the holder must replace it via token
pub fn random() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();

    (0..32)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hashed = hash("s3cret-pass").unwrap();

        assert!(verify("s3cret-pass", &hashed).unwrap());
        assert!(!verify("wrong-pass", &hashed).unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        assert_ne!(hash("same").unwrap(), hash("same").unwrap());
    }

    #[test]
    fn test_corrupt_hash_is_internal_error() {
        assert!(verify("anything", "not-a-phc-string").is_err());
    }

    #[test]
    fn test_random_password_shape() {
        let p = random();
        assert_eq!(p.len(), 32);
        assert!(p.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
