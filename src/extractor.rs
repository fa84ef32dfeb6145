use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local};
use log::warn;
use scraper::{ElementRef, Html, Selector};

use crate::error::{Result, ScraperError};

/// Source of fetched pages. The live implementation is
/// [`crate::session::Session`]; tests substitute canned pages.
pub trait PageSource {
    /// Fetch a URL through the session, returning the body and HTTP status.
    fn get_page(&self, url: &str) -> Result<(String, u16)>;
}

/// Raw field values scraped off a profile page. Everything is an
/// unprocessed string (empty = absent on the page); the normalizer owns
/// all coercion.
#[derive(Debug, Clone)]
pub struct RawProfile {
    pub nickname: String,
    pub profile_link: String,
    pub fetched_at: DateTime<Local>,
    pub intro: String,
    pub city: String,
    pub gender: String,
    pub married: String,
    pub age: String,
    pub joined: String,
    pub followers: String,
    pub posts: String,
    pub image: String,
}

impl RawProfile {
    pub fn new(
        nickname: impl Into<String>,
        profile_link: impl Into<String>,
        fetched_at: DateTime<Local>,
    ) -> Self {
        RawProfile {
            nickname: nickname.into(),
            profile_link: profile_link.into(),
            fetched_at,
            intro: String::new(),
            city: String::new(),
            gender: String::new(),
            married: String::new(),
            age: String::new(),
            joined: String::new(),
            followers: String::new(),
            posts: String::new(),
            image: String::new(),
        }
    }
}

pub struct Extractor {
    base_url: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl Extractor {
    pub fn new(base_url: &str, max_retries: u32, retry_delay: Duration) -> Self {
        Extractor {
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries: max_retries.max(1),
            retry_delay,
        }
    }

    pub fn profile_url(&self, nickname: &str) -> String {
        format!("{}/users/{}/", self.base_url, urlencoding::encode(nickname))
    }

    /// Fetch one profile page and parse its fields. Transient failures
    /// (network errors, 403/429, missing profile heading) are retried up to
    /// `max_retries` with `retry_delay` between attempts; exhaustion yields
    /// `ScraperError::Fetch` so the run loop can skip and continue.
    pub fn fetch<S: PageSource>(&self, session: &S, nickname: &str) -> Result<RawProfile> {
        let url = self.profile_url(nickname);
        let mut last_error = String::new();

        for attempt in 1..=self.max_retries {
            if attempt > 1 {
                thread::sleep(self.retry_delay);
            }

            match session.get_page(&url) {
                Ok((body, status)) => {
                    if status == 403 || status == 429 {
                        warn!("Blocked at {url}: status {status} (attempt {attempt})");
                        last_error = format!("blocked with status {status}");
                        continue;
                    }
                    if !(200..300).contains(&status) {
                        warn!("Unexpected status {status} for {url} (attempt {attempt})");
                        last_error = format!("unexpected status {status}");
                        continue;
                    }
                    match Self::parse_profile(&body, nickname, &url) {
                        Some(raw) => return Ok(raw),
                        None => {
                            warn!("Profile heading missing for {nickname} (attempt {attempt})");
                            last_error = "profile heading not found".to_string();
                        }
                    }
                }
                Err(e) => {
                    warn!("Request failed for {nickname} (attempt {attempt}): {e}");
                    last_error = e.to_string();
                }
            }
        }

        Err(ScraperError::Fetch {
            nickname: nickname.to_string(),
            attempts: self.max_retries,
            reason: last_error,
        })
    }

    /// Scrape the online-users page for a live worklist, deduplicated in
    /// page order.
    pub fn discover_online<S: PageSource>(&self, session: &S) -> Result<Vec<String>> {
        let url = format!("{}/online_kon/", self.base_url);
        let (body, status) = session.get_page(&url)?;
        if !(200..300).contains(&status) {
            return Err(ScraperError::Network(format!(
                "online users page returned status {status}"
            )));
        }

        let document = Html::parse_document(&body);
        let selector = Selector::parse("li bdi").unwrap();

        let mut users = Vec::new();
        for element in document.select(&selector) {
            let name = element.text().collect::<String>().trim().to_string();
            if !name.is_empty() && !users.contains(&name) {
                users.push(name);
            }
        }
        Ok(users)
    }

    /// Parse the known fields by structural location. Returns None when the
    /// profile heading is absent, which marks the page as not ready.
    fn parse_profile(html: &str, nickname: &str, url: &str) -> Option<RawProfile> {
        let document = Html::parse_document(html);

        // Readiness marker: the profile heading.
        let heading = Selector::parse("h1").unwrap();
        document
            .select(&heading)
            .find(|h| !h.text().collect::<String>().trim().is_empty())?;

        let mut raw = RawProfile::new(nickname, url, Local::now());

        let intro = Selector::parse(".ow span.nos").unwrap();
        if let Some(elem) = document.select(&intro).next() {
            raw.intro = element_text(&elem);
        }

        // Labelled fields are a <b>Label:</b> followed by a sibling <span>.
        let labels = Selector::parse("b").unwrap();
        for elem in document.select(&labels) {
            let label = element_text(&elem);
            let Some(value) = following_span(&elem) else {
                continue;
            };
            if label.starts_with("City:") {
                raw.city = value;
            } else if label.starts_with("Gender:") {
                raw.gender = value;
            } else if label.starts_with("Married:") {
                raw.married = value;
            } else if label.starts_with("Age:") {
                raw.age = value;
            } else if label.starts_with("Joined:") {
                raw.joined = value;
            }
        }

        let followers = Selector::parse("span.cl.sp.clb").unwrap();
        if let Some(elem) = document.select(&followers).next() {
            raw.followers = element_text(&elem);
        }

        let posts = Selector::parse("a[href*='/profile/public/'] button div").unwrap();
        if let Some(elem) = document.select(&posts).next() {
            raw.posts = element_text(&elem);
        }

        let image = Selector::parse("img[src*='avatar-imgs']").unwrap();
        if let Some(elem) = document.select(&image).next() {
            if let Some(src) = elem.value().attr("src") {
                raw.image = src.to_string();
            }
        }

        Some(raw)
    }
}

fn element_text(elem: &ElementRef) -> String {
    elem.text().collect::<Vec<_>>().join(" ").trim().to_string()
}

/// First <span> sibling after a field label, stopping at the next label.
fn following_span(elem: &ElementRef) -> Option<String> {
    for sibling in elem.next_siblings() {
        if let Some(sib) = ElementRef::wrap(sibling) {
            match sib.value().name() {
                "span" => return Some(element_text(&sib)),
                "b" => return None,
                _ => {}
            }
        }
    }
    None
}
