//! User registration and credential verification.
//!
//! Hashes are argon2id PHC strings with a fresh salt per call; nothing
//! outside this module ever sees one.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use parlor_store::{Database, StoreError, User};
use thiserror::Error;

use super::now_seconds;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("user already exists")]
    AlreadyExists,

    #[error("user not found")]
    NotFound,

    #[error("password mismatch")]
    PasswordMismatch,

    #[error("failed to hash password: {0}")]
    Hash(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
    pub nickname: String,
}

pub fn register_user(
    db: &Database,
    user_id: &str,
    nickname: &str,
    password: &str,
) -> Result<(), AuthError> {
    if db.user_exists(user_id)? {
        return Err(AuthError::AlreadyExists);
    }
    let password_hash = hash_password(password)?;
    db.insert_user(&User {
        user_id: user_id.to_owned(),
        nickname: nickname.to_owned(),
        password_hash,
        created_at: now_seconds(),
    })?;
    Ok(())
}

pub fn login_user(db: &Database, user_id: &str, password: &str) -> Result<AuthUser, AuthError> {
    let user = db.get_user(user_id)?.ok_or(AuthError::NotFound)?;
    verify_password(password, &user.password_hash)?;
    Ok(AuthUser {
        user_id: user.user_id,
        nickname: user.nickname,
    })
}

pub fn user_exists(db: &Database, user_id: &str) -> Result<bool, AuthError> {
    Ok(db.user_exists(user_id)?)
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

fn verify_password(password: &str, password_hash: &str) -> Result<(), AuthError> {
    let parsed =
        PasswordHash::new(password_hash).map_err(|e| AuthError::Hash(e.to_string()))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| AuthError::PasswordMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(dir.path().join("test.db")).unwrap();
        (db, dir)
    }

    #[test]
    fn register_then_login() {
        let (db, _dir) = test_db();
        register_user(&db, "alice", "Alice", "pw").unwrap();

        let user = login_user(&db, "alice", "pw").unwrap();
        assert_eq!(user.user_id, "alice");
        assert_eq!(user.nickname, "Alice");
    }

    #[test]
    fn register_twice_conflicts() {
        let (db, _dir) = test_db();
        register_user(&db, "alice", "Alice", "pw").unwrap();
        assert!(matches!(
            register_user(&db, "alice", "Alice2", "pw2"),
            Err(AuthError::AlreadyExists)
        ));
    }

    #[test]
    fn wrong_password_and_unknown_user_are_distinct() {
        let (db, _dir) = test_db();
        register_user(&db, "alice", "Alice", "pw").unwrap();

        assert!(matches!(
            login_user(&db, "alice", "nope"),
            Err(AuthError::PasswordMismatch)
        ));
        assert!(matches!(
            login_user(&db, "bob", "pw"),
            Err(AuthError::NotFound)
        ));
    }

    #[test]
    fn stored_hash_is_salted_and_opaque() {
        let (db, _dir) = test_db();
        register_user(&db, "alice", "Alice", "pw").unwrap();
        register_user(&db, "bob", "Bob", "pw").unwrap();

        let alice = db.get_user("alice").unwrap().unwrap();
        let bob = db.get_user("bob").unwrap().unwrap();
        assert_ne!(alice.password_hash, bob.password_hash);
        assert!(alice.password_hash.starts_with("$argon2"));
    }

    #[test]
    fn exists() {
        let (db, _dir) = test_db();
        assert!(!user_exists(&db, "alice").unwrap());
        register_user(&db, "alice", "Alice", "pw").unwrap();
        assert!(user_exists(&db, "alice").unwrap());
    }
}
