use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{info, warn};
use reqwest::blocking::Client;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Result, ScraperError};
use crate::extractor::PageSource;

/// One live browser-like session: an HTTP client with a shared cookie jar.
/// Not thread-safe by design; the run loop owns it exclusively.
pub struct Session {
    client: Client,
    jar: Arc<Jar>,
    base_url: Url,
}

impl Session {
    fn build(base_url: Url, user_agent: &str, timeout: Duration) -> Result<Self> {
        let jar = Arc::new(Jar::default());

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        if let Ok(ua) = HeaderValue::from_str(user_agent) {
            headers.insert(USER_AGENT, ua);
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .cookie_provider(jar.clone())
            .build()?;

        Ok(Session {
            client,
            jar,
            base_url,
        })
    }
}

impl PageSource for Session {
    fn get_page(&self, url: &str) -> Result<(String, u16)> {
        let resp = self.client.get(url).send()?;
        let status = resp.status().as_u16();
        let body = resp.text()?;
        Ok((body, status))
    }
}

/// Owns the single session: authentication, cookie persistence and reuse.
pub struct SessionManager {
    base_url: Url,
    login_url: String,
    probe_url: String,
    username: String,
    password: String,
    cookies_file: PathBuf,
    user_agent: String,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
    session: Option<Session>,
}

impl SessionManager {
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ScraperError::Auth(format!("invalid base URL '{}': {e}", config.base_url)))?;

        Ok(SessionManager {
            base_url,
            login_url: config.login_url(),
            probe_url: config.online_users_url(),
            username: config.username.clone(),
            password: config.password.clone(),
            cookies_file: config.cookies_file.clone(),
            user_agent: config.user_agent.clone(),
            timeout: config.page_timeout,
            max_retries: config.max_retries.max(1),
            retry_delay: config.retry_delay,
            session: None,
        })
    }

    /// Return a live, authenticated session. An existing session is reused
    /// if it still answers as logged-in; otherwise cookies from disk are
    /// tried before a fresh form login.
    pub fn acquire(&mut self) -> Result<&Session> {
        if let Some(session) = self.session.take() {
            if self.probe(&session) {
                self.session = Some(session);
            } else {
                info!("Existing session no longer live, re-authenticating.");
            }
        }

        if self.session.is_none() {
            self.session = Some(self.connect()?);
        }
        Ok(self.session.as_ref().expect("session populated above"))
    }

    /// Drop the current session so the next `acquire` re-authenticates.
    pub fn invalidate(&mut self) {
        if self.session.take().is_some() {
            info!("Session invalidated.");
        }
    }

    fn connect(&self) -> Result<Session> {
        let session = Session::build(self.base_url.clone(), &self.user_agent, self.timeout)?;

        if load_cookie_file(&self.cookies_file, &session.jar, &self.base_url)?
            && self.probe(&session)
        {
            info!("Cookie authentication successful.");
            return Ok(session);
        }

        self.login(&session)?;
        Ok(session)
    }

    /// A members-only page must not bounce the session to the login form.
    fn probe(&self, session: &Session) -> bool {
        match session.client.get(&self.probe_url).send() {
            Ok(resp) => resp.status().is_success() && !resp.url().path().contains("login"),
            Err(e) => {
                warn!("Session probe failed: {e}");
                false
            }
        }
    }

    /// Form login with linear backoff on transient network failures.
    /// Rejected credentials fail immediately; retry exhaustion is fatal.
    fn login(&self, session: &Session) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.submit_login(session) {
                Ok(true) => {
                    info!("Login successful for {}.", self.username);
                    if let Err(e) = save_cookie_file(&self.cookies_file, &session.jar, &self.base_url) {
                        warn!("Could not persist session cookies: {e}");
                    }
                    return Ok(());
                }
                Ok(false) => {
                    return Err(ScraperError::Auth(
                        "credentials rejected by the login form".to_string(),
                    ))
                }
                Err(e) if attempt < self.max_retries => {
                    warn!("Login attempt {attempt} failed: {e}");
                    thread::sleep(self.retry_delay * attempt);
                }
                Err(e) => {
                    return Err(ScraperError::Auth(format!(
                        "login failed after {attempt} attempts: {e}"
                    )))
                }
            }
        }
    }

    fn submit_login(&self, session: &Session) -> Result<bool> {
        // Load the form page first so the server sets its pre-login cookies.
        session
            .client
            .get(&self.login_url)
            .send()?
            .error_for_status()
            .map_err(|e| ScraperError::Network(e.to_string()))?;

        let resp = session
            .client
            .post(&self.login_url)
            .form(&[
                ("nick", self.username.as_str()),
                ("pass", self.password.as_str()),
            ])
            .send()?;

        // A successful login redirects away from the login page.
        Ok(resp.status().is_success() && !resp.url().path().contains("login"))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedCookie {
    name: String,
    value: String,
}

fn save_cookie_file(path: &Path, jar: &Jar, base_url: &Url) -> Result<()> {
    let Some(header) = jar.cookies(base_url) else {
        return Ok(());
    };

    let cookies: Vec<SavedCookie> = header
        .to_str()
        .unwrap_or("")
        .split("; ")
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            Some(SavedCookie {
                name: name.to_string(),
                value: value.to_string(),
            })
        })
        .collect();

    let json = serde_json::to_string_pretty(&cookies)?;
    fs::write(path, json)?;
    info!("Saved {} session cookie(s) to {:?}", cookies.len(), path);
    Ok(())
}

fn load_cookie_file(path: &Path, jar: &Jar, base_url: &Url) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }

    let content = fs::read_to_string(path)?;
    let cookies: Vec<SavedCookie> = match serde_json::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            warn!("Ignoring malformed cookie file {:?}: {e}", path);
            return Ok(false);
        }
    };
    if cookies.is_empty() {
        return Ok(false);
    }

    for cookie in &cookies {
        jar.add_cookie_str(
            &format!("{}={}; Path=/", cookie.name, cookie.value),
            base_url,
        );
    }
    info!("Loaded {} cookie(s) from {:?}", cookies.len(), path);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        let url = Url::parse("https://damadam.pk/").unwrap();

        let jar = Jar::default();
        jar.add_cookie_str("sessionid=abc123; Path=/", &url);
        jar.add_cookie_str("csrftoken=xyz; Path=/", &url);
        save_cookie_file(&path, &jar, &url).unwrap();

        let restored = Jar::default();
        assert!(load_cookie_file(&path, &restored, &url).unwrap());
        let header = restored.cookies(&url).unwrap();
        let header = header.to_str().unwrap();
        assert!(header.contains("sessionid=abc123"));
        assert!(header.contains("csrftoken=xyz"));
    }

    #[test]
    fn missing_cookie_file_is_not_an_error() {
        let url = Url::parse("https://damadam.pk/").unwrap();
        let jar = Jar::default();
        let loaded = load_cookie_file(Path::new("does-not-exist.json"), &jar, &url).unwrap();
        assert!(!loaded);
    }

    #[test]
    fn malformed_cookie_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        fs::write(&path, "not json at all").unwrap();

        let url = Url::parse("https://damadam.pk/").unwrap();
        let jar = Jar::default();
        let loaded = load_cookie_file(&path, &jar, &url).unwrap();
        assert!(!loaded);
    }
}
