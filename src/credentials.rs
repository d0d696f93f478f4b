use std::sync::Arc;

use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::{Params, Pbkdf2};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use rand_core::OsRng;
use tokio::sync::OnceCell;

use crate::clock::Clock;
use crate::err::Error;
use crate::models::{NewAccount, Role, UserAccount};
use crate::store::AccountStore;

pub const MIN_PASSWORD_LEN: usize = 6;
pub const DEFAULT_HASH_ROUNDS: u32 = 100_000;

/// Salted PBKDF2-SHA256 hash in PHC string form. Runs on the blocking pool.
pub async fn hash_password(plaintext: &str, rounds: u32) -> Result<String, Error> {
    let plaintext = plaintext.to_owned();
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        let params = Params {
            rounds,
            output_length: 32,
        };
        Pbkdf2
            .hash_password_customized(plaintext.as_bytes(), None, None, params, salt.as_salt())
            .map(|hash| hash.to_string())
    })
    .await?
    .map_err(Error::from)
}

/// Compares through the hasher's own verifier. A hash that does not parse
/// counts as a mismatch.
pub async fn verify_password(plaintext: &str, hash: &str) -> Result<bool, Error> {
    let plaintext = plaintext.to_owned();
    let hash = hash.to_owned();
    let matches = tokio::task::spawn_blocking(move || match PasswordHash::new(&hash) {
        Ok(parsed) => Pbkdf2
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok(),
        Err(err) => {
            log::error!("Stored password hash is unreadable: {}", err);
            false
        }
    })
    .await?;
    Ok(matches)
}

/// Account registration and password checks.
pub struct Credentials {
    accounts: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
    rounds: u32,
    /// Hash of a random secret, verified against when a username is unknown
    /// so that lookup misses cost as much as wrong passwords.
    decoy: OnceCell<String>,
}

impl Credentials {
    pub fn new(accounts: Arc<dyn AccountStore>, clock: Arc<dyn Clock>, rounds: u32) -> Self {
        Self {
            accounts,
            clock,
            rounds,
            decoy: OnceCell::new(),
        }
    }

    async fn decoy_hash(&self) -> Result<&str, Error> {
        let hash = self
            .decoy
            .get_or_try_init(|| async move {
                let secret: String = thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(32)
                    .map(char::from)
                    .collect();
                hash_password(&secret, self.rounds).await
            })
            .await?;
        Ok(hash.as_str())
    }

    pub async fn create_user(
        &self,
        username: &str,
        password: &str,
        role: Role,
    ) -> Result<UserAccount, Error> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(Error::validation("Username and password are required"));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(Error::validation(format!(
                "Password must be at least {} characters long",
                MIN_PASSWORD_LEN
            )));
        }

        let password_hash = hash_password(password, self.rounds).await?;
        let created = self
            .accounts
            .insert_account(NewAccount {
                username: username.to_string(),
                password_hash,
                role,
                created_at: self.clock.now_utc(),
            })
            .await?;

        match created {
            Some(user) => {
                log::info!("Registered {} account `{}`", user.role.as_str(), user.username);
                Ok(user)
            }
            None => Err(Error::Conflict {
                message: "Username already exists".to_string(),
            }),
        }
    }

    /// The account when `password` matches, `None` otherwise. Callers must
    /// not distinguish an unknown username from a wrong password.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<UserAccount>, Error> {
        let user = match self.accounts.find_account(username.trim()).await? {
            Some(user) => user,
            None => {
                verify_password(password, self.decoy_hash().await?).await?;
                return Ok(None);
            }
        };
        if verify_password(password, &user.password_hash).await? {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }

    /// Seeds the `admin` account when no admin exists yet.
    pub async fn ensure_admin(&self, password: &str) -> Result<bool, Error> {
        if self.accounts.count_admins().await? > 0 {
            return Ok(false);
        }
        match self.create_user("admin", password, Role::Admin).await {
            Ok(_) => Ok(true),
            Err(Error::Conflict { .. }) => {
                log::warn!("No admin account exists but the `admin` username is taken");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::store::MemoryStore;

    const ROUNDS: u32 = 1_000;

    fn credentials() -> Credentials {
        Credentials::new(Arc::new(MemoryStore::new()), Arc::new(SystemClock), ROUNDS)
    }

    #[tokio::test]
    async fn hashes_are_salted_and_verifiable() {
        let a = hash_password("hunter22", ROUNDS).await.unwrap();
        let b = hash_password("hunter22", ROUNDS).await.unwrap();
        assert_ne!(a, b);
        assert!(!a.contains("hunter22"));
        assert!(verify_password("hunter22", &a).await.unwrap());
        assert!(!verify_password("hunter23", &a).await.unwrap());
        assert!(!verify_password("hunter22", "not a phc string").await.unwrap());
    }

    #[tokio::test]
    async fn rejects_short_passwords_and_duplicates() {
        let creds = credentials();
        assert!(matches!(
            creds.create_user("teacher1", "12345", Role::Teacher).await,
            Err(Error::ValidationError { .. })
        ));

        let user = creds.create_user("teacher1", "123456", Role::Teacher).await.unwrap();
        assert_eq!(user.role, Role::Teacher);
        assert_ne!(user.password_hash, "123456");

        assert!(matches!(
            creds.create_user("teacher1", "abcdefg", Role::Admin).await,
            Err(Error::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn authenticate_hides_which_part_failed() {
        let creds = credentials();
        creds.create_user("teacher1", "correct-horse", Role::Teacher).await.unwrap();

        assert!(creds.authenticate("nobody", "correct-horse").await.unwrap().is_none());
        assert!(creds.authenticate("teacher1", "wrong").await.unwrap().is_none());
        let user = creds.authenticate("teacher1", "correct-horse").await.unwrap().unwrap();
        assert_eq!(user.username, "teacher1");
    }

    #[tokio::test]
    async fn unknown_usernames_still_pay_for_a_verify() {
        let creds = credentials();
        assert!(creds.decoy.get().is_none());

        assert!(creds.authenticate("nobody", "correct-horse").await.unwrap().is_none());
        let decoy = creds.decoy.get().cloned().unwrap();
        assert!(decoy.contains(&format!("i={}", ROUNDS)));

        // The decoy is built once and reused.
        assert!(creds.authenticate("ghost", "other").await.unwrap().is_none());
        assert_eq!(creds.decoy.get().unwrap(), &decoy);
    }

    async fn time_failures(creds: &Credentials, username: &str) -> std::time::Duration {
        let started = std::time::Instant::now();
        for _ in 0..3 {
            assert!(creds.authenticate(username, "wrong").await.unwrap().is_none());
        }
        started.elapsed()
    }

    #[tokio::test]
    async fn login_failures_cost_about_the_same() {
        let creds = Credentials::new(Arc::new(MemoryStore::new()), Arc::new(SystemClock), 20_000);
        creds.create_user("teacher1", "correct-horse", Role::Teacher).await.unwrap();
        creds.authenticate("warmup", "x").await.unwrap();

        let unknown = time_failures(&creds, "nobody").await;
        let wrong_password = time_failures(&creds, "teacher1").await;
        assert!(unknown * 4 > wrong_password, "{:?} vs {:?}", unknown, wrong_password);
    }

    #[tokio::test]
    async fn usernames_are_trimmed_at_login_too() {
        let creds = credentials();
        creds.create_user(" alice ", "correct-horse", Role::Teacher).await.unwrap();

        let user = creds.authenticate(" alice ", "correct-horse").await.unwrap().unwrap();
        assert_eq!(user.username, "alice");
        assert!(creds.authenticate("alice", "correct-horse").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn admin_is_seeded_once() {
        let creds = credentials();
        assert!(creds.ensure_admin("admin123").await.unwrap());
        assert!(!creds.ensure_admin("admin123").await.unwrap());
        assert!(creds.authenticate("admin", "admin123").await.unwrap().is_some());
    }
}
