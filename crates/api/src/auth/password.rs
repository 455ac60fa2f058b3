//! Password hashing with Argon2 and the password policy

use argon2::{
    password_hash::{
        rand_core::{OsRng, RngCore},
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
    },
    Argon2,
};

const SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?/~`";

/// Hash a password using Argon2id
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hashing(e.to_string()))
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| PasswordError::InvalidHash(e.to_string()))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Validate password strength
pub fn validate_password_strength(password: &str) -> Result<(), PasswordValidationError> {
    if password.len() < 12 {
        return Err(PasswordValidationError::TooShort);
    }

    if password.len() > 128 {
        return Err(PasswordValidationError::TooLong);
    }

    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(PasswordValidationError::MissingLowercase);
    }

    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(PasswordValidationError::MissingUppercase);
    }

    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(PasswordValidationError::MissingDigit);
    }

    if !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
        return Err(PasswordValidationError::MissingSpecialChar);
    }

    if is_common_password(password) {
        return Err(PasswordValidationError::TooCommon);
    }

    Ok(())
}

fn is_common_password(password: &str) -> bool {
    const COMMON_PASSWORDS: &[&str] = &[
        "password123!",
        "password1234!",
        "password@123",
        "password#123",
        "p@ssw0rd1234",
        "welcome123!",
        "welcome@1234",
        "qwerty12345!",
        "admin@123456",
        "helpdesk123!",
        "support123!",
        "changeme123!",
        "letmein1234!",
    ];

    COMMON_PASSWORDS.contains(&password.to_lowercase().as_str())
}

/// Generate a random password that satisfies [`validate_password_strength`].
///
/// Used when an administrator regenerates a password for another account.
pub fn generate_compliant_password() -> String {
    const LOWER: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
    const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
    const DIGITS: &[u8] = b"23456789";
    const SPECIAL: &[u8] = b"!@#$%^&*-_=+";
    const LENGTH: usize = 20;

    let mut rng = OsRng;
    let mut pick = |set: &[u8]| set[(rng.next_u32() as usize) % set.len()];

    // One of each required class, the rest from the union
    let mut chars = vec![pick(LOWER), pick(UPPER), pick(DIGITS), pick(SPECIAL)];
    let all: Vec<u8> = [LOWER, UPPER, DIGITS, SPECIAL].concat();
    while chars.len() < LENGTH {
        chars.push(pick(&all));
    }

    // Fisher-Yates so the required classes are not always in front
    for i in (1..chars.len()).rev() {
        let j = (OsRng.next_u32() as usize) % (i + 1);
        chars.swap(i, j);
    }

    chars.into_iter().map(char::from).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Password hashing failed: {0}")]
    Hashing(String),
    #[error("Invalid password hash: {0}")]
    InvalidHash(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PasswordValidationError {
    #[error("Password must be at least 12 characters")]
    TooShort,
    #[error("Password must be at most 128 characters")]
    TooLong,
    #[error("Password must contain at least one lowercase letter")]
    MissingLowercase,
    #[error("Password must contain at least one uppercase letter")]
    MissingUppercase,
    #[error("Password must contain at least one digit")]
    MissingDigit,
    #[error("Password must contain at least one special character (!@#$%^&*)")]
    MissingSpecialChar,
    #[error("This password is too common - please choose a unique password")]
    TooCommon,
}
