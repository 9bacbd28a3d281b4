use std::path::PathBuf;

use anyhow::{Context, Result};
use url::Url;

const DEFAULT_BASE_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: Url,
    pub login_url: Url,
    /// `NAME=value` pair seeded into the cookie jar before the first request.
    pub session_cookie: Option<String>,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let base = std::env::var("CHATROOM_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());
        let base_url = Url::parse(base.trim_end_matches('/'))
            .with_context(|| format!("Invalid CHATROOM_BASE_URL: {}", base))?;

        let login_url = match std::env::var("CHATROOM_LOGIN_URL") {
            Ok(raw) => Url::parse(&raw)
                .with_context(|| format!("Invalid CHATROOM_LOGIN_URL: {}", raw))?,
            Err(_) => default_login_url(&base_url)?,
        };

        let session_cookie = std::env::var("CHATROOM_SESSION_COOKIE")
            .ok()
            .filter(|c| !c.trim().is_empty());

        Ok(Self {
            base_url,
            login_url,
            session_cookie,
            data_dir: data_dir()?,
        })
    }

    /// Configuration pointing at an arbitrary backend, used by tests and tools.
    pub fn for_base_url(base: &str) -> Result<Self> {
        let base_url = Url::parse(base.trim_end_matches('/'))
            .with_context(|| format!("Invalid base URL: {}", base))?;
        Ok(Self {
            login_url: default_login_url(&base_url)?,
            base_url,
            session_cookie: None,
            data_dir: std::env::temp_dir().join("chatroom"),
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chatroom.db")
    }
}

fn default_login_url(base_url: &Url) -> Result<Url> {
    let raw = format!(
        "{}/oauth2/authorization/google",
        base_url.as_str().trim_end_matches('/')
    );
    Url::parse(&raw).context("Failed to derive login URL from base URL")
}

fn data_dir() -> Result<PathBuf> {
    let root = match std::env::var("XDG_DATA_HOME") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => {
            let home = std::env::var("HOME").context("Neither XDG_DATA_HOME nor HOME is set")?;
            PathBuf::from(home).join(".local/share")
        }
    };
    Ok(root.join("chatroom"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_url_derived_from_base() {
        let config = Config::for_base_url("http://example.test:8080/").unwrap();
        assert_eq!(config.base_url.as_str(), "http://example.test:8080/");
        assert_eq!(
            config.login_url.as_str(),
            "http://example.test:8080/oauth2/authorization/google"
        );
        assert!(config.db_path().ends_with("chatroom.db"));
    }

    #[test]
    fn test_rejects_garbage_base_url() {
        assert!(Config::for_base_url("not a url").is_err());
    }
}
