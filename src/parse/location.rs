//! Location normalization: raw location strings into a canonical
//! building/room pair.
//!
//! Two shapes occur in the feeds: a room mailbox address
//! (`utcn_room_ac_bar_bt-503@campus.example`) and free text
//! ("UTCN - AC Bar - Sala BT 503"). Both reduce to the same normalized
//! room code so the merger can index by room.

use std::sync::LazyLock;

use regex::Regex;

/// Structured fields extracted from a raw location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedLocation {
    pub room: String,
    pub building: String,
}

/// Building aliases, matched longest-first so qualified names win over
/// short codes. The `ambiguous` flag marks tokens that also occur as a
/// generic institution nickname; those only count when the room text
/// confirms them.
struct BuildingAlias {
    alias: &'static str,
    canonical: &'static str,
    ambiguous: bool,
}

const BUILDING_ALIASES: &[BuildingAlias] = &[
    BuildingAlias { alias: "memorandumului", canonical: "Memorandumului", ambiguous: false },
    BuildingAlias { alias: "dorobantilor", canonical: "Dorobantilor", ambiguous: false },
    BuildingAlias { alias: "observatorului", canonical: "Observatorului", ambiguous: false },
    BuildingAlias { alias: "baritiu", canonical: "Baritiu", ambiguous: false },
    BuildingAlias { alias: "memo", canonical: "Memorandumului", ambiguous: false },
    BuildingAlias { alias: "daic", canonical: "DAIC", ambiguous: false },
    BuildingAlias { alias: "doro", canonical: "Dorobantilor", ambiguous: false },
    BuildingAlias { alias: "obs", canonical: "Observatorului", ambiguous: false },
    // "bar" also shows up inside unrelated words and institution tags.
    BuildingAlias { alias: "bar", canonical: "Baritiu", ambiguous: true },
];

/// Room prefixes that pin down the building when an alias alone is
/// ambiguous.
const ROOM_PREFIX_BUILDINGS: &[(&str, &str)] = &[("BT", "Baritiu"), ("S", "Baritiu")];

// Mailbox form: local part like `utcn_room_ac_bar_bt-503`.
static MAILBOX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+_room_(?:[a-z0-9]+_)?([a-z]+)_([a-z0-9.\-]+)$").unwrap()
});

// "Sala BT 503", "Room 479", "sala 26b".
static NAMED_ROOM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:sala|room)\s+([a-z]{0,3}\s*-?\s*[0-9]+[a-z]?(?:\.[0-9]+)?)").unwrap()
});

// Fallback: any room-shaped numeric token; the last one in the string wins.
static NUMERIC_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([a-z]{0,3}[0-9]{1,3}[a-z]?(?:\.[0-9]{1,2})?)\b").unwrap()
});

static BT_ROOM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^bt[-_ ]?([0-9])([0-9]{2})$").unwrap());

static S_ROOM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^s([0-9])([0-9])$").unwrap());

static P_ROOM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^p0?([0-9]+)$").unwrap());

static PLAIN_ROOM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:[a-z]+[0-9]+(?:\.[0-9]+)?|[0-9]{1,3}[a-z]?)$").unwrap()
});

/// Parse a raw location into building and room. Total: unparseable input
/// yields empty fields, never an error.
pub fn parse_location(raw: &str) -> ParsedLocation {
    let text = raw.trim();
    if text.is_empty() {
        return ParsedLocation::default();
    }

    if let Some(idx) = text.find('@') {
        let local = text[..idx].to_ascii_lowercase();
        if let Some(caps) = MAILBOX_RE.captures(&local) {
            return ParsedLocation {
                room: normalize_room(caps.get(2).unwrap().as_str()),
                building: lookup_building(caps.get(1).unwrap().as_str()),
            };
        }
    }

    let room = find_room_in_text(text);
    let building = find_building_in_text(text, &room);
    ParsedLocation { room, building }
}

/// Normalize a raw room token into its display code.
///
/// `bt-503` -> `BT5.03`, `s42` -> `S4.2`, `p03` -> `P03`, `26b` -> `26B`.
pub fn normalize_room(token: &str) -> String {
    let t = token.trim().replace(' ', "");
    if t.is_empty() {
        return String::new();
    }
    if let Some(caps) = BT_ROOM_RE.captures(&t) {
        return format!("BT{}.{}", &caps[1], &caps[2]);
    }
    if let Some(caps) = S_ROOM_RE.captures(&t) {
        return format!("S{}.{}", &caps[1], &caps[2]);
    }
    if let Some(caps) = P_ROOM_RE.captures(&t) {
        let n: u32 = caps[1].parse().unwrap_or(0);
        return format!("P{n:02}");
    }
    if PLAIN_ROOM_RE.is_match(&t) {
        return t.to_uppercase();
    }
    String::new()
}

fn find_room_in_text(text: &str) -> String {
    if let Some(caps) = NAMED_ROOM_RE.captures(text) {
        let room = normalize_room(caps.get(1).unwrap().as_str());
        if !room.is_empty() {
            return room;
        }
    }
    // Last numeric token wins: in "AC Bar 2 - Sala 103" the trailing token
    // is the room, not the street number.
    let mut last = String::new();
    for caps in NUMERIC_TOKEN_RE.captures_iter(text) {
        let room = normalize_room(caps.get(1).unwrap().as_str());
        if !room.is_empty() {
            last = room;
        }
    }
    last
}

fn find_building_in_text(text: &str, room: &str) -> String {
    let lower = text.to_ascii_lowercase();
    for alias in BUILDING_ALIASES {
        if !contains_token(&lower, alias.alias) {
            continue;
        }
        if alias.ambiguous && !room_confirms(room, alias.canonical) {
            continue;
        }
        return alias.canonical.to_string();
    }
    // No alias matched; the room code alone may identify the building.
    for (prefix, building) in ROOM_PREFIX_BUILDINGS {
        if room.starts_with(prefix) {
            return building.to_string();
        }
    }
    String::new()
}

/// Canonicalize an explicit building token (e.g. a catalog column). No
/// ambiguity gating: the caller asserts the token names a building.
pub fn canonical_building(token: &str) -> String {
    let lower = token.trim().to_ascii_lowercase();
    if lower.is_empty() {
        return String::new();
    }
    for alias in BUILDING_ALIASES {
        if alias.alias == lower {
            return alias.canonical.to_string();
        }
    }
    token.trim().to_string()
}

fn lookup_building(code: &str) -> String {
    let lower = code.to_ascii_lowercase();
    for alias in BUILDING_ALIASES {
        if alias.alias == lower {
            return alias.canonical.to_string();
        }
    }
    code.to_uppercase()
}

/// Whole-token containment so "bar" does not match inside "barometer".
fn contains_token(haystack: &str, needle: &str) -> bool {
    haystack.split(|c: char| !c.is_ascii_alphanumeric()).any(|tok| tok == needle)
}

fn room_confirms(room: &str, building: &str) -> bool {
    ROOM_PREFIX_BUILDINGS
        .iter()
        .any(|(prefix, b)| *b == building && room.starts_with(prefix))
}
