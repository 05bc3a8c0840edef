// ABOUTME: Client configuration: target, credential set, and session options.
// ABOUTME: Handles defaults, validation, and YAML loading with secret indirection.

mod secret;
mod target;

pub use secret::{SecretValue, resolve_secret_map};
pub use target::Target;

use crate::error::{
    ConfigNotFoundSnafu, InvalidConfigSnafu, ReadConfigSnafu, Result, YamlSnafu,
};
use crate::ssh::{Credentials, DialSettings};
use secret::{deserialize_secret_list, deserialize_secret_map, deserialize_secret_opt};
use serde::Deserialize;
use snafu::{ResultExt, ensure};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "sshman.yml";
pub const CONFIG_FILENAME_ALT: &str = "sshman.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".sshman/config.yml";

pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_USERNAME: &str = "root";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_LANG: &str = "zh_CN.UTF-8";

/// Everything needed to reach and authenticate against one host.
///
/// The credential fields are read once per connection attempt and never
/// mutated by the client.
#[derive(Clone, Deserialize)]
pub struct ClientConfig {
    /// Display name. Informational only.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub hostname: String,

    /// Dialed in preference to `hostname` when set.
    #[serde(default)]
    pub ip: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default, deserialize_with = "deserialize_secret_opt")]
    pub password: Option<String>,

    #[serde(default, deserialize_with = "deserialize_secret_list")]
    pub passwords: Vec<String>,

    /// Base64 key material or a key file path (`~` expands to `home_dir`).
    #[serde(default, alias = "key", deserialize_with = "deserialize_secret_opt")]
    pub private_key: Option<String>,

    #[serde(default, deserialize_with = "deserialize_secret_opt")]
    pub key_passphrase: Option<String>,

    /// Keyboard-interactive answers keyed by exact question text.
    #[serde(default, alias = "qas", deserialize_with = "deserialize_secret_map")]
    pub challenge_answers: HashMap<String, String>,

    /// Allocate a pseudo-terminal for one-shot commands (like `ssh -tt`).
    #[serde(default, alias = "pseudo")]
    pub pseudo_terminal: bool,

    /// Per-attempt dial timeout.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Variables set on every session. Merged over the defaults.
    #[serde(default = "default_env", deserialize_with = "deserialize_env")]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub home_dir: Option<PathBuf>,

    /// Upper bound for one-shot commands. Unbounded when unset.
    #[serde(default, with = "humantime_serde")]
    pub command_timeout: Option<Duration>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_env() -> HashMap<String, String> {
    HashMap::from([("LANG".to_string(), DEFAULT_LANG.to_string())])
}

fn deserialize_env<'de, D>(deserializer: D) -> std::result::Result<HashMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let mut env = default_env();
    env.extend(deserialize_secret_map(deserializer)?);
    Ok(env)
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("name", &self.name)
            .field("hostname", &self.hostname)
            .field("ip", &self.ip)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("passwords", &self.passwords.len())
            .field("private_key", &self.private_key.is_some())
            .field("challenge_answers", &self.challenge_answers.len())
            .field("pseudo_terminal", &self.pseudo_terminal)
            .field("timeout", &self.timeout)
            .field("env", &self.env)
            .field("home_dir", &self.home_dir)
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl ClientConfig {
    /// Defaults for every field, dialing `ip`.
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            hostname: String::new(),
            ip: ip.into(),
            port: DEFAULT_PORT,
            username: default_username(),
            password: None,
            passwords: Vec::new(),
            private_key: None,
            key_passphrase: None,
            challenge_answers: HashMap::new(),
            pseudo_terminal: false,
            timeout: DEFAULT_TIMEOUT,
            env: default_env(),
            home_dir: None,
            command_timeout: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn passwords<I, S>(mut self, passwords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.passwords = passwords.into_iter().map(Into::into).collect();
        self
    }

    pub fn private_key(mut self, key: impl Into<String>) -> Self {
        self.private_key = Some(key.into());
        self
    }

    pub fn key_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.key_passphrase = Some(passphrase.into());
        self
    }

    pub fn challenge_answer(mut self, question: impl Into<String>, answer: impl Into<String>) -> Self {
        self.challenge_answers.insert(question.into(), answer.into());
        self
    }

    pub fn pseudo_terminal(mut self, pseudo: bool) -> Self {
        self.pseudo_terminal = pseudo;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn home_dir(mut self, home: impl Into<PathBuf>) -> Self {
        self.home_dir = Some(home.into());
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Apply a parsed command-line target over this config.
    pub fn with_target(mut self, target: &Target) -> Self {
        self.ip = target.host.clone();
        if let Some(port) = target.port {
            self.port = port;
        }
        if let Some(user) = &target.user {
            self.username = user.clone();
        }
        self
    }

    /// Host that will be dialed: `ip` when set, otherwise `hostname`.
    pub fn address(&self) -> &str {
        if self.ip.is_empty() {
            &self.hostname
        } else {
            &self.ip
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.address().is_empty(),
            InvalidConfigSnafu {
                reason: "either ip or hostname is required"
            }
        );
        ensure!(
            self.port != 0,
            InvalidConfigSnafu {
                reason: "port must be non-zero"
            }
        );
        ensure!(
            !self.username.is_empty(),
            InvalidConfigSnafu {
                reason: "username cannot be empty"
            }
        );
        ensure!(
            !self.timeout.is_zero(),
            InvalidConfigSnafu {
                reason: "timeout must be non-zero"
            }
        );
        Ok(())
    }

    /// The credential set used to build authentication strategies.
    pub fn credentials(&self) -> Credentials {
        Credentials {
            password: self.password.clone(),
            passwords: self.passwords.clone(),
            private_key: self.private_key.clone(),
            key_passphrase: self.key_passphrase.clone(),
            challenge_answers: self.challenge_answers.clone(),
            home_dir: self.home_dir.clone(),
        }
    }

    pub fn dial_settings(&self) -> DialSettings {
        DialSettings::new(self.address(), self.port, self.timeout)
    }

    /// Parse only. A file may omit the host when a target supplies it, so
    /// `validate` runs once every override is applied.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context(YamlSnafu)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).context(ReadConfigSnafu { path })?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        ConfigNotFoundSnafu { dir }.fail()
    }
}
