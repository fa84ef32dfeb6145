use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate, NaiveTime};
use log::debug;
use regex::Regex;
use url::Url;

use crate::error::{Result, ScraperError};
use crate::extractor::RawProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
    Unknown,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Unknown => "",
        }
    }
}

/// One capture event in canonical form. `nickname` plus `capture_date`
/// identify the event; `nickname` alone is the dedup key in the remote
/// store.
#[derive(Debug, Clone)]
pub struct ProfileRecord {
    pub nickname: String,
    pub tags: BTreeSet<String>,
    pub city: String,
    pub gender: Gender,
    pub married: Option<bool>,
    pub age: Option<u32>,
    pub join_year: Option<i32>,
    pub followers: u64,
    pub posts: u64,
    pub profile_link: Url,
    pub image_link: Option<Url>,
    pub intro: String,
    pub capture_date: NaiveDate,
    pub capture_time: NaiveTime,
}

impl ProfileRecord {
    pub fn date_string(&self) -> String {
        self.capture_date.format("%d-%b-%Y").to_string()
    }

    pub fn time_string(&self) -> String {
        self.capture_time.format("%I:%M %p").to_string()
    }

    pub fn married_string(&self) -> &'static str {
        match self.married {
            Some(true) => "Yes",
            Some(false) => "No",
            None => "",
        }
    }

    pub fn tags_string(&self) -> String {
        self.tags.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

pub struct Normalizer {
    number_regex: Regex,
    whitespace_regex: Regex,
}

impl Normalizer {
    pub fn new() -> Self {
        Normalizer {
            number_regex: Regex::new(r"\d+").unwrap(),
            whitespace_regex: Regex::new(r"\s+").unwrap(),
        }
    }

    /// Coerce a raw scrape into a `ProfileRecord`. Optional fields that fail
    /// to parse end up absent; only a missing nickname or an unparseable
    /// profile link fail the whole record.
    pub fn normalize(&self, raw: &RawProfile) -> Result<ProfileRecord> {
        let nickname = raw.nickname.trim().to_string();
        if nickname.is_empty() {
            return Err(ScraperError::Validation {
                nickname: String::new(),
                reason: "missing nickname".to_string(),
            });
        }

        let profile_link =
            Url::parse(&raw.profile_link).map_err(|e| ScraperError::Validation {
                nickname: nickname.clone(),
                reason: format!("bad profile link '{}': {e}", raw.profile_link),
            })?;

        let capture_date = raw.fetched_at.date_naive();
        let capture_time = raw.fetched_at.time();

        let image_link = match raw.image.trim() {
            "" => None,
            src => match Url::parse(src) {
                Ok(u) => Some(u),
                Err(_) => {
                    debug!("Discarding unparseable image link for {nickname}: {src}");
                    None
                }
            },
        };

        Ok(ProfileRecord {
            nickname,
            tags: BTreeSet::new(),
            city: self.clean_text(&raw.city),
            gender: self.parse_gender(&raw.gender),
            married: self.parse_married(&raw.married),
            age: self.first_number(&raw.age).map(|n| n as u32),
            join_year: self.parse_join_year(&raw.joined, capture_date),
            followers: self.first_number(&raw.followers).unwrap_or(0),
            posts: self.first_number(&raw.posts).unwrap_or(0),
            profile_link,
            image_link,
            intro: self.clean_text(&raw.intro),
            capture_date,
            capture_time,
        })
    }

    /// Trim, fold whitespace, strip `+` and non-breaking spaces, and map
    /// the site's placeholder values to empty.
    pub fn clean_text(&self, text: &str) -> String {
        let text = text
            .trim()
            .replace('\u{a0}', " ")
            .replace('+', "")
            .replace('\n', " ");

        let placeholders = ["not set", "no set", "no city", "n/a", "none", "null"];
        if placeholders.contains(&text.to_lowercase().as_str()) {
            return String::new();
        }

        self.whitespace_regex
            .replace_all(&text, " ")
            .trim()
            .to_string()
    }

    fn first_number(&self, text: &str) -> Option<u64> {
        self.number_regex
            .find(text)
            .and_then(|m| m.as_str().parse().ok())
    }

    fn parse_gender(&self, text: &str) -> Gender {
        match self.clean_text(text).to_lowercase().as_str() {
            "male" | "m" | "boy" => Gender::Male,
            "female" | "f" | "girl" => Gender::Female,
            _ => Gender::Unknown,
        }
    }

    fn parse_married(&self, text: &str) -> Option<bool> {
        match self.clean_text(text).to_lowercase().as_str() {
            "yes" | "married" => Some(true),
            "no" | "single" | "unmarried" => Some(false),
            _ => None,
        }
    }

    /// The site shows either a join year ("2017") or an age-of-account
    /// figure ("5 years ago"). Values under 100 are read relative to the
    /// capture date.
    fn parse_join_year(&self, text: &str, capture_date: NaiveDate) -> Option<i32> {
        let n = self.first_number(text)? as i32;
        let current_year = capture_date.year();
        if (1990..=current_year).contains(&n) {
            Some(n)
        } else if n < 100 {
            Some(current_year - n)
        } else {
            None
        }
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    fn raw(nickname: &str) -> RawProfile {
        let fetched_at = Local.with_ymd_and_hms(2025, 6, 1, 14, 30, 0).unwrap();
        RawProfile::new(
            nickname,
            format!("https://damadam.pk/users/{nickname}/"),
            fetched_at,
        )
    }

    #[test]
    fn missing_optional_fields_normalize_to_absent() {
        let normalizer = Normalizer::new();
        let record = normalizer.normalize(&raw("alice")).unwrap();

        assert_eq!(record.nickname, "alice");
        assert_eq!(record.age, None);
        assert_eq!(record.join_year, None);
        assert_eq!(record.married, None);
        assert_eq!(record.gender, Gender::Unknown);
        assert_eq!(record.followers, 0);
        assert_eq!(record.posts, 0);
        assert!(record.image_link.is_none());
    }

    #[test]
    fn missing_nickname_fails_validation() {
        let normalizer = Normalizer::new();
        let result = normalizer.normalize(&raw("  "));
        assert!(matches!(result, Err(ScraperError::Validation { .. })));
    }

    #[test]
    fn bad_profile_link_fails_validation() {
        let normalizer = Normalizer::new();
        let mut profile = raw("bob");
        profile.profile_link = "not a url".to_string();
        let result = normalizer.normalize(&profile);
        assert!(matches!(result, Err(ScraperError::Validation { .. })));
    }

    #[test]
    fn counters_parse_from_free_text() {
        let normalizer = Normalizer::new();
        let mut profile = raw("carol");
        profile.followers = "150 followers".to_string();
        profile.posts = "42".to_string();
        profile.age = "Age: 23 years".to_string();

        let record = normalizer.normalize(&profile).unwrap();
        assert_eq!(record.followers, 150);
        assert_eq!(record.posts, 42);
        assert_eq!(record.age, Some(23));
    }

    #[test]
    fn gender_and_married_coerce_to_domain() {
        let normalizer = Normalizer::new();
        let mut profile = raw("dave");
        profile.gender = " Male ".to_string();
        profile.married = "No".to_string();

        let record = normalizer.normalize(&profile).unwrap();
        assert_eq!(record.gender, Gender::Male);
        assert_eq!(record.married, Some(false));

        profile.gender = "Female".to_string();
        profile.married = "something else".to_string();
        let record = normalizer.normalize(&profile).unwrap();
        assert_eq!(record.gender, Gender::Female);
        assert_eq!(record.married, None);
    }

    #[test]
    fn join_year_handles_years_and_years_ago() {
        let normalizer = Normalizer::new();
        let capture = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();

        assert_eq!(normalizer.parse_join_year("2017", capture), Some(2017));
        assert_eq!(normalizer.parse_join_year("5 years ago", capture), Some(2020));
        assert_eq!(normalizer.parse_join_year("", capture), None);
        assert_eq!(normalizer.parse_join_year("998", capture), None);
    }

    #[test]
    fn clean_text_strips_placeholders_and_noise() {
        let normalizer = Normalizer::new();
        assert_eq!(normalizer.clean_text("Not set"), "");
        assert_eq!(normalizer.clean_text("no city"), "");
        assert_eq!(normalizer.clean_text("  Lahore\u{a0}+ "), "Lahore");
        assert_eq!(normalizer.clean_text("a\n b   c"), "a b c");
    }

    #[test]
    fn capture_date_and_time_format_like_the_sheet() {
        let normalizer = Normalizer::new();
        let record = normalizer.normalize(&raw("erin")).unwrap();
        assert_eq!(record.date_string(), "01-Jun-2025");
        assert_eq!(record.time_string(), "02:30 PM");
    }
}
