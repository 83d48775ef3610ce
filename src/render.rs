//! Headless-browser fallback extractor.
//!
//! Published calendar pages that require client-side rendering are driven
//! through headless Chrome. The page's own XHR traffic is intercepted and
//! any JSON response carrying calendar items is decoded; the DOM itself is
//! never scraped.
//!
//! Browser instances are pooled up to a configured cap. A checkout covers a
//! single page load; instances that crash or outlive the watchdog are
//! closed instead of being returned, so one bad page cannot poison the
//! pool.

use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventResponseReceived, GetResponseBodyParams,
};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;

use crate::ics::FeedEvent;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("browser error: {0}")]
    Browser(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("render watchdog expired")]
    Watchdog,

    #[error("page produced no calendar data")]
    NoCalendarData,
}

/// How long to keep collecting XHR responses after navigation.
const COLLECT_WINDOW: Duration = Duration::from_secs(20);

/// Collection stops early once the network has been quiet this long.
const NETWORK_IDLE: Duration = Duration::from_secs(2);

struct PooledBrowser {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

impl PooledBrowser {
    async fn launch() -> Result<Self, RenderError> {
        let config = BrowserConfig::builder()
            .build()
            .map_err(RenderError::Browser)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::Browser(e.to_string()))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        Ok(Self {
            browser,
            handler_task,
        })
    }

    async fn close(mut self) {
        let _ = self.browser.close().await;
        self.handler_task.abort();
    }
}

/// Capped pool of headless browser instances.
pub struct RendererPool {
    slots: Semaphore,
    idle: Mutex<Vec<PooledBrowser>>,
    watchdog: Duration,
    local_offset: FixedOffset,
}

impl RendererPool {
    pub fn new(capacity: usize, watchdog: Duration, local_offset: FixedOffset) -> Arc<Self> {
        Arc::new(Self {
            slots: Semaphore::new(capacity.max(1)),
            idle: Mutex::new(Vec::new()),
            watchdog,
            local_offset,
        })
    }

    /// Render one calendar page and return the events its XHR traffic
    /// exposed. Bounded by the pool cap and the per-checkout watchdog.
    pub async fn render(&self, url: &str) -> Result<Vec<FeedEvent>, RenderError> {
        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| RenderError::Browser("pool closed".into()))?;

        let pooled = match self.idle.lock().await.pop() {
            Some(pooled) => pooled,
            None => PooledBrowser::launch().await?,
        };

        match tokio::time::timeout(self.watchdog, capture(&pooled.browser, url, self.local_offset))
            .await
        {
            Ok(Ok(events)) => {
                self.idle.lock().await.push(pooled);
                Ok(events)
            }
            Ok(Err(e)) => {
                // A failed instance is discarded, never returned.
                pooled.close().await;
                Err(e)
            }
            Err(_) => {
                tracing::warn!(url, "render watchdog expired, closing instance");
                pooled.close().await;
                Err(RenderError::Watchdog)
            }
        }
    }

}

/// Navigate and harvest calendar-item JSON from intercepted responses.
async fn capture(
    browser: &Browser,
    url: &str,
    local_offset: FixedOffset,
) -> Result<Vec<FeedEvent>, RenderError> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| RenderError::Browser(e.to_string()))?;

    page.execute(EnableParams::default())
        .await
        .map_err(|e| RenderError::Browser(e.to_string()))?;
    let mut responses = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(|e| RenderError::Browser(e.to_string()))?;

    page.goto(url)
        .await
        .map_err(|e| RenderError::Navigation(e.to_string()))?;

    let mut events = Vec::new();
    let mut saw_calendar_response = false;
    let deadline = tokio::time::Instant::now() + COLLECT_WINDOW;

    loop {
        let wait = deadline
            .saturating_duration_since(tokio::time::Instant::now())
            .min(NETWORK_IDLE);
        if wait.is_zero() {
            break;
        }
        let Ok(Some(event)) = tokio::time::timeout(wait, responses.next()).await else {
            // Quiet network or window exhausted: the SPA has settled.
            break;
        };
        if !is_calendar_endpoint(&event.response.url) {
            continue;
        }
        let request_id = event.request_id.clone();
        let body = match page.execute(GetResponseBodyParams::new(request_id)).await {
            Ok(resp) => resp.result.body,
            Err(_) => continue,
        };
        let Ok(json) = serde_json::from_str::<Value>(&body) else {
            continue;
        };
        saw_calendar_response = true;
        collect_calendar_items(&json, local_offset, &mut events);
    }

    let _ = page.close().await;

    if events.is_empty() && !saw_calendar_response {
        return Err(RenderError::NoCalendarData);
    }
    Ok(events)
}

/// The published-calendar SPA fetches items through its service endpoint.
fn is_calendar_endpoint(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.contains("service.svc")
        && (lower.contains("getitem") || lower.contains("publishedcalendar"))
}

/// Walk a response body and append every object that looks like a calendar
/// item. The envelope shape varies between endpoints, so the walk is
/// structural rather than path-based.
fn collect_calendar_items(value: &Value, local_offset: FixedOffset, out: &mut Vec<FeedEvent>) {
    match value {
        Value::Object(map) => {
            if let Some(event) = calendar_item_to_event(map, local_offset) {
                out.push(event);
                return;
            }
            for child in map.values() {
                collect_calendar_items(child, local_offset, out);
            }
        }
        Value::Array(items) => {
            for child in items {
                collect_calendar_items(child, local_offset, out);
            }
        }
        _ => {}
    }
}

fn calendar_item_to_event(
    map: &serde_json::Map<String, Value>,
    local_offset: FixedOffset,
) -> Option<FeedEvent> {
    let is_item = map
        .get("__type")
        .and_then(Value::as_str)
        .map(|t| t.starts_with("CalendarItem"))
        .unwrap_or(false)
        || (map.contains_key("Start") && map.contains_key("Subject"));
    if !is_item {
        return None;
    }

    let start = parse_item_datetime(map.get("Start")?.as_str()?, local_offset)?;
    let end = map
        .get("End")
        .and_then(Value::as_str)
        .and_then(|v| parse_item_datetime(v, local_offset))
        .unwrap_or(start);
    let title = map
        .get("Subject")
        .or_else(|| map.get("Title"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let location = map
        .get("Location")
        .and_then(|loc| loc.get("DisplayName"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Some(FeedEvent {
        start,
        end,
        title,
        location,
    })
}

fn parse_item_datetime(value: &str, local_offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt);
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S").ok()?;
    local_offset.from_local_datetime(&naive).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(2 * 3600).unwrap()
    }

    #[test]
    fn test_calendar_endpoint_heuristic() {
        assert!(is_calendar_endpoint(
            "https://outlook.example.com/owa/service.svc?action=GetItem"
        ));
        assert!(is_calendar_endpoint(
            "https://outlook.example.com/owa/service.svc?action=FindItem&app=PublishedCalendar"
        ));
        assert!(!is_calendar_endpoint("https://outlook.example.com/owa/logo.png"));
        assert!(!is_calendar_endpoint("https://outlook.example.com/service.svc?action=GetFolder"));
    }

    #[test]
    fn test_collects_items_from_nested_envelope() {
        let body = json!({
            "Body": {
                "ResponseMessages": {
                    "Items": [{
                        "RootFolder": {
                            "Items": [
                                {
                                    "__type": "CalendarItem:#Exchange",
                                    "Start": "2026-03-02T08:00:00+02:00",
                                    "End": "2026-03-02T10:00:00+02:00",
                                    "Subject": "Functional programming (FP)",
                                    "Location": {"DisplayName": "Sala 479"}
                                },
                                {"__type": "Folder:#Exchange", "Name": "Calendar"}
                            ]
                        }
                    }]
                }
            }
        });
        let mut events = Vec::new();
        collect_calendar_items(&body, offset(), &mut events);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Functional programming (FP)");
        assert_eq!(events[0].location, "Sala 479");
    }

    #[test]
    fn test_item_detected_by_shape_without_type_tag() {
        let body = json!([{"Start": "2026-03-02T08:00:00Z", "Subject": "Bare item"}]);
        let mut events = Vec::new();
        collect_calendar_items(&body, offset(), &mut events);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Bare item");
        assert_eq!(events[0].start, events[0].end);
    }

    #[test]
    fn test_naive_item_datetime_gets_local_offset() {
        let dt = parse_item_datetime("2026-03-02T08:00:00", offset()).unwrap();
        assert_eq!(dt.offset().local_minus_utc(), 2 * 3600);
    }

    #[test]
    fn test_non_items_ignored() {
        let body = json!({"Subject": "has subject but no start"});
        let mut events = Vec::new();
        collect_calendar_items(&body, offset(), &mut events);
        assert!(events.is_empty());
    }
}
