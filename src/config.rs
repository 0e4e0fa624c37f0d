use failure::{Error, ResultExt};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub general: General,
    #[serde(default)]
    pub timing: Timing,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config, Error> {
        let path = path.as_ref();
        debug!("Reading config from {}", path.display());

        let contents = fs::read_to_string(path)
            .with_context(|_| format!("Unable to read {}", path.display()))?;
        let cfg = toml::from_str(&contents).context("Invalid config file")?;

        Ok(cfg)
    }

    pub fn example() -> Config {
        Config {
            general: General {
                base_url: String::from("http://localhost:8059"),
                username: Some(String::from("admin")),
                password: None,
            },
            timing: Timing::default(),
        }
    }

    pub fn as_toml(&self) -> Result<String, Error> {
        let toml = toml::to_string_pretty(self)?;
        Ok(toml)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct General {
    /// Where the buildrone server lives.
    pub base_url: String,
    /// The username to log in with, if the server doesn't already recognise
    /// us. Prompted for when missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// How long the various timed transitions last, in milliseconds.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Timing {
    /// How long a failed key request shows "Failed" before reverting.
    pub failure_cooldown_ms: u64,
    /// How long a freshly issued key stays on screen.
    pub exposure_window_ms: u64,
    pub copy_toast_ms: u64,
    /// How long a login error replaces the "Login" button text.
    pub login_error_ms: u64,
}

impl Timing {
    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_millis(self.failure_cooldown_ms)
    }

    pub fn exposure_window(&self) -> Duration {
        Duration::from_millis(self.exposure_window_ms)
    }

    pub fn copy_toast(&self) -> Duration {
        Duration::from_millis(self.copy_toast_ms)
    }

    pub fn login_error(&self) -> Duration {
        Duration::from_millis(self.login_error_ms)
    }
}

impl Default for Timing {
    fn default() -> Timing {
        Timing {
            failure_cooldown_ms: 3000,
            exposure_window_ms: 60_000,
            copy_toast_ms: 5000,
            login_error_ms: 4000,
        }
    }
}
