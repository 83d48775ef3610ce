//! ICS feed fetching and decoding.
//!
//! A syntactically valid feed with zero events is a terminal success
//! (`FeedOutcome::Empty`), not an error: it means "we checked; the room has
//! no bookings" and must not trigger the renderer fallback.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use icalendar::parser::{read_calendar, unfold};

/// One event as decoded from a feed, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEvent {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub title: String,
    pub location: String,
}

/// Outcome of a successful fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedOutcome {
    Events(Vec<FeedEvent>),
    Empty,
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Http(reqwest::StatusCode),

    #[error("response is not an iCalendar document (content-type: {0})")]
    NotCalendar(String),

    #[error("calendar parse error: {0}")]
    Parse(String),
}

impl FeedError {
    /// Transient errors are worth retrying; structural ones are not.
    fn is_transient(&self) -> bool {
        match self {
            FeedError::Network(_) => true,
            FeedError::Http(status) => status.is_server_error(),
            FeedError::NotCalendar(_) | FeedError::Parse(_) => false,
        }
    }
}

/// Delays before the first and second retry.
const RETRY_BACKOFF: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(3)];

/// HTTP client wrapper for ICS feeds.
#[derive(Debug, Clone)]
pub struct IcsFetcher {
    client: reqwest::Client,
    local_offset: FixedOffset,
}

impl IcsFetcher {
    pub fn new(timeout: Duration, local_offset: FixedOffset) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            local_offset,
        })
    }

    /// Fetch and decode a feed, retrying transient failures twice with
    /// backoff before giving up.
    pub async fn fetch(&self, url: &str) -> Result<FeedOutcome, FeedError> {
        let mut attempt = 0usize;
        loop {
            match self.fetch_once(url).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient() && attempt < RETRY_BACKOFF.len() => {
                    tracing::debug!(url, attempt, error = %e, "transient feed error, retrying");
                    tokio::time::sleep(RETRY_BACKOFF[attempt]).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<FeedOutcome, FeedError> {
        let resp = self
            .client
            .get(url)
            .header("Accept", "text/calendar, text/plain, */*;q=0.1")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FeedError::Http(status));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = resp.text().await?;

        let looks_like_ics = body.trim_start().to_uppercase().starts_with("BEGIN:VCALENDAR");
        if !looks_like_ics && !content_type.contains("text/calendar") {
            return Err(FeedError::NotCalendar(content_type));
        }

        decode_ics(&body, self.local_offset)
    }
}

/// Decode an iCalendar document into feed events.
pub fn decode_ics(body: &str, local_offset: FixedOffset) -> Result<FeedOutcome, FeedError> {
    let unfolded = unfold(body);
    let calendar = read_calendar(&unfolded).map_err(|e| FeedError::Parse(e.to_string()))?;

    let mut events = Vec::new();
    for component in &calendar.components {
        if component.name != "VEVENT" {
            continue;
        }
        let Some(start_prop) = component.find_prop("DTSTART") else {
            continue;
        };
        let Some(start) = parse_ics_datetime(start_prop.val.as_ref(), local_offset) else {
            continue;
        };
        let end = component
            .find_prop("DTEND")
            .and_then(|p| parse_ics_datetime(p.val.as_ref(), local_offset))
            .unwrap_or(start);
        let title = component
            .find_prop("SUMMARY")
            .map(|p| p.val.to_string())
            .unwrap_or_default();
        let location = component
            .find_prop("LOCATION")
            .map(|p| p.val.to_string())
            .unwrap_or_default();

        events.push(FeedEvent {
            start,
            end,
            title,
            location,
        });
    }

    if events.is_empty() {
        Ok(FeedOutcome::Empty)
    } else {
        Ok(FeedOutcome::Events(events))
    }
}

/// Parse the datetime shapes that occur in published feeds. Values without
/// zone information are interpreted in the configured local offset so every
/// stored timestamp is offset-aware.
fn parse_ics_datetime(value: &str, local_offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    let v = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(v) {
        return Some(dt);
    }

    if let Some(stripped) = v.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(stripped, "%Y%m%dT%H%M%S").ok()?;
        return Some(Utc.from_utc_datetime(&naive).fixed_offset());
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(v, "%Y%m%dT%H%M%S") {
        return local_offset.from_local_datetime(&naive).single();
    }

    // Date-only values (all-day events) start at local midnight.
    if let Ok(date) = NaiveDate::parse_from_str(v, "%Y%m%d") {
        let naive = date.and_hms_opt(0, 0, 0)?;
        return local_offset.from_local_datetime(&naive).single();
    }

    None
}
