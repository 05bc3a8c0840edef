// ABOUTME: Credential chain construction.
// ABOUTME: Turns a credential set into the ordered strategies offered during one handshake.

use super::error::{Error, Result};
use super::keyboard::Responder;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use russh::keys::{PrivateKey, decode_secret_key};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Authentication material for one client.
///
/// Empty strings are treated the same as absent values.
#[derive(Clone, Default)]
pub struct Credentials {
    pub password: Option<String>,
    pub passwords: Vec<String>,
    /// Base64-encoded key material, or a path to a key file.
    pub private_key: Option<String>,
    pub key_passphrase: Option<String>,
    pub challenge_answers: HashMap<String, String>,
    /// Used to expand a leading `~` in `private_key` paths.
    pub home_dir: Option<PathBuf>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("passwords", &self.passwords.len())
            .field("private_key", &self.private_key.is_some())
            .field("challenge_answers", &self.challenge_answers.len())
            .field("home_dir", &self.home_dir)
            .finish()
    }
}

impl Credentials {
    /// All password candidates: the single password first, then the list in order.
    pub fn password_candidates(&self) -> Vec<String> {
        self.password
            .iter()
            .filter(|p| !p.is_empty())
            .chain(self.passwords.iter())
            .cloned()
            .collect()
    }
}

/// One method offered to the server during a handshake.
pub enum AuthStrategy {
    PublicKey(Arc<PrivateKey>),
    PasswordRetry(PasswordRetry),
    KeyboardInteractive(Responder),
}

impl AuthStrategy {
    /// SSH method name, as it appears on the wire.
    pub fn method(&self) -> &'static str {
        match self {
            AuthStrategy::PublicKey(_) => "publickey",
            AuthStrategy::PasswordRetry(_) => "password",
            AuthStrategy::KeyboardInteractive(_) => "keyboard-interactive",
        }
    }
}

impl fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthStrategy::PublicKey(key) => f
                .debug_tuple("PublicKey")
                .field(&key.algorithm().as_str())
                .finish(),
            AuthStrategy::PasswordRetry(retry) => f
                .debug_struct("PasswordRetry")
                .field("budget", &retry.budget())
                .field("cursor", &retry.cursor)
                .finish(),
            AuthStrategy::KeyboardInteractive(Responder::Password(_)) => {
                f.write_str("KeyboardInteractive(Password)")
            }
            AuthStrategy::KeyboardInteractive(Responder::Answers(answers)) => f
                .debug_tuple("KeyboardInteractive")
                .field(&format_args!("Answers({})", answers.len()))
                .finish(),
        }
    }
}

/// Password method retried once per candidate, in order.
///
/// The cursor advances on every draw whatever the outcome, so a strategy is only
/// good for one handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordRetry {
    candidates: Vec<String>,
    cursor: usize,
}

impl PasswordRetry {
    pub fn new(candidates: Vec<String>) -> Self {
        Self {
            candidates,
            cursor: 0,
        }
    }

    /// Number of attempts this strategy may make.
    pub fn budget(&self) -> usize {
        self.candidates.len()
    }

    /// Draw the next candidate, or `None` once the budget is spent.
    pub fn next_candidate(&mut self) -> Option<&str> {
        let candidate = self.candidates.get(self.cursor)?;
        self.cursor += 1;
        Some(candidate.as_str())
    }
}

/// Build the ordered strategy list for one handshake.
///
/// Order: public key, retryable password over every candidate, one
/// keyboard-interactive per candidate answering with that password, then
/// keyboard-interactive by question lookup. Any key failure aborts the build.
pub fn build_auth_methods(credentials: &Credentials) -> Result<Vec<AuthStrategy>> {
    let mut strategies = Vec::new();

    if let Some(key) = credentials.private_key.as_deref().filter(|k| !k.is_empty()) {
        let key = load_private_key(
            key,
            credentials.key_passphrase.as_deref(),
            credentials.home_dir.as_deref(),
        )?;
        strategies.push(AuthStrategy::PublicKey(Arc::new(key)));
    }

    let candidates = credentials.password_candidates();
    if !candidates.is_empty() {
        strategies.push(AuthStrategy::PasswordRetry(PasswordRetry::new(
            candidates.clone(),
        )));
    }
    strategies.extend(
        candidates
            .into_iter()
            .map(|password| AuthStrategy::KeyboardInteractive(Responder::Password(password))),
    );

    if !credentials.challenge_answers.is_empty() {
        strategies.push(AuthStrategy::KeyboardInteractive(Responder::Answers(
            credentials.challenge_answers.clone(),
        )));
    }

    tracing::debug!(
        "built {} auth strategies: {:?}",
        strategies.len(),
        strategies.iter().map(|s| s.method()).collect::<Vec<_>>()
    );
    Ok(strategies)
}

/// Resolve and parse a private key, decrypting with `passphrase` when non-empty.
pub fn load_private_key(
    key: &str,
    passphrase: Option<&str>,
    home_dir: Option<&Path>,
) -> Result<PrivateKey> {
    let material = resolve_key_material(key, home_dir)?;
    let text = String::from_utf8(material)
        .map_err(|_| Error::KeyParse("key material is not valid UTF-8".to_string()))?;
    let passphrase = passphrase.filter(|p| !p.is_empty());
    decode_secret_key(&text, passphrase).map_err(|e| Error::KeyParse(e.to_string()))
}

/// Key bytes from inline base64, falling back to reading `key` as a file path.
pub fn resolve_key_material(key: &str, home_dir: Option<&Path>) -> Result<Vec<u8>> {
    if let Ok(bytes) = BASE64.decode(key.trim()) {
        return Ok(bytes);
    }
    let path = expand_home(key, home_dir);
    std::fs::read(&path).map_err(|source| Error::KeyRead { path, source })
}

/// Expand a leading `~` against `home_dir`. Other paths are returned unchanged.
pub fn expand_home(raw: &str, home_dir: Option<&Path>) -> PathBuf {
    match home_dir {
        Some(home) if raw == "~" => home.to_path_buf(),
        Some(home) => match raw.strip_prefix("~/") {
            Some(rest) => home.join(rest),
            None => PathBuf::from(raw),
        },
        None => PathBuf::from(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/fixtures/id_ed25519"
    ));
    const ENCRYPTED_KEY: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/fixtures/id_ed25519_encrypted"
    ));

    fn methods(strategies: &[AuthStrategy]) -> Vec<&'static str> {
        strategies.iter().map(|s| s.method()).collect()
    }

    #[test]
    fn empty_credentials_build_empty_chain() {
        let strategies = build_auth_methods(&Credentials::default()).unwrap();
        assert!(strategies.is_empty());
    }

    #[test]
    fn chain_order_is_key_password_interactive_answers() {
        let credentials = Credentials {
            password: Some("first".to_string()),
            passwords: vec!["second".to_string(), "third".to_string()],
            private_key: Some(BASE64.encode(KEY)),
            challenge_answers: HashMap::from([("Token:".to_string(), "123".to_string())]),
            ..Default::default()
        };

        let strategies = build_auth_methods(&credentials).unwrap();
        assert_eq!(
            methods(&strategies),
            vec![
                "publickey",
                "password",
                "keyboard-interactive",
                "keyboard-interactive",
                "keyboard-interactive",
                "keyboard-interactive",
            ]
        );

        let AuthStrategy::PasswordRetry(retry) = &strategies[1] else {
            panic!("expected password retry, got {:?}", strategies[1]);
        };
        assert_eq!(retry.budget(), 3);

        let fixed: Vec<_> = strategies[2..5]
            .iter()
            .map(|s| match s {
                AuthStrategy::KeyboardInteractive(Responder::Password(p)) => p.as_str(),
                other => panic!("unexpected strategy {:?}", other),
            })
            .collect();
        assert_eq!(fixed, vec!["first", "second", "third"]);

        assert!(matches!(
            &strategies[5],
            AuthStrategy::KeyboardInteractive(Responder::Answers(_))
        ));
    }

    #[test]
    fn empty_password_is_not_a_candidate() {
        let credentials = Credentials {
            password: Some(String::new()),
            passwords: vec!["only".to_string()],
            ..Default::default()
        };
        assert_eq!(credentials.password_candidates(), vec!["only".to_string()]);
    }

    #[test]
    fn password_retry_advances_until_budget_spent() {
        let mut retry = PasswordRetry::new(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(retry.next_candidate(), Some("a"));
        assert_eq!(retry.next_candidate(), Some("b"));
        assert_eq!(retry.next_candidate(), None);
        assert_eq!(retry.budget(), 2);
    }

    #[test]
    fn base64_key_resolves_without_filesystem() {
        let encoded = BASE64.encode(KEY);
        // A home dir that does not exist proves nothing is read from disk.
        let bytes = resolve_key_material(&encoded, Some(Path::new("/nonexistent"))).unwrap();
        assert_eq!(bytes, KEY.as_bytes());
    }

    #[test]
    fn non_base64_falls_back_to_home_relative_path() {
        let home = tempfile::tempdir().unwrap();
        std::fs::create_dir(home.path().join(".ssh")).unwrap();
        std::fs::write(home.path().join(".ssh/id_ed25519"), KEY).unwrap();

        let bytes = resolve_key_material("~/.ssh/id_ed25519", Some(home.path())).unwrap();
        assert_eq!(bytes, KEY.as_bytes());
    }

    #[test]
    fn missing_key_file_is_a_read_error() {
        let err = resolve_key_material("/nonexistent/key/path", None).unwrap_err();
        assert!(
            matches!(err, Error::KeyRead { ref path, .. } if path == Path::new("/nonexistent/key/path"))
        );
    }

    #[test]
    fn expand_home_only_touches_leading_tilde() {
        let home = Path::new("/home/ops");
        assert_eq!(expand_home("~", Some(home)), PathBuf::from("/home/ops"));
        assert_eq!(
            expand_home("~/.ssh/id_rsa", Some(home)),
            PathBuf::from("/home/ops/.ssh/id_rsa")
        );
        assert_eq!(
            expand_home("/keys/~backup", Some(home)),
            PathBuf::from("/keys/~backup")
        );
        assert_eq!(
            expand_home("~/.ssh/id_rsa", None),
            PathBuf::from("~/.ssh/id_rsa")
        );
    }

    #[test]
    fn unencrypted_key_parses() {
        let key = load_private_key(&BASE64.encode(KEY), None, None).unwrap();
        assert_eq!(key.algorithm().as_str(), "ssh-ed25519");
    }

    #[test]
    fn encrypted_key_needs_the_right_passphrase() {
        let encoded = BASE64.encode(ENCRYPTED_KEY);
        assert!(load_private_key(&encoded, Some("opensesame"), None).is_ok());

        let err = load_private_key(&encoded, Some("wrong"), None).unwrap_err();
        assert!(matches!(err, Error::KeyParse(_)));
    }

    #[test]
    fn bad_key_aborts_chain_build() {
        let credentials = Credentials {
            password: Some("pw".to_string()),
            private_key: Some(BASE64.encode("not a key")),
            ..Default::default()
        };
        let err = build_auth_methods(&credentials).unwrap_err();
        assert!(matches!(err, Error::KeyParse(_)));
    }
}
