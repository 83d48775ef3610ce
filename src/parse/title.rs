//! Title normalization: free-form calendar titles into structured fields.
//!
//! Parsing is total and idempotent: any input yields a `ParsedTitle`, and
//! re-parsing a canonical title reproduces the same fields. All patterns are
//! whitespace-tolerant; more specific (longer, qualified) matches win over
//! compact forms.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Structured fields extracted from a raw event title.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTitle {
    pub subject: String,
    pub display_title: String,
    pub professor: String,
    pub group_display: String,
}

impl ParsedTitle {
    /// Normalized full title: re-parsing this string is a no-op.
    pub fn canonical(&self) -> String {
        let mut parts = vec![self.subject.as_str()];
        if !self.professor.is_empty() {
            parts.push(&self.professor);
        }
        if !self.group_display.is_empty() {
            parts.push(&self.group_display);
        }
        parts.join(" - ")
    }
}

/// Learned abbreviation table: "Functional programming (FP) - ..." teaches
/// `FP -> Functional Programming`, so later short titles like "FP 479" can
/// be expanded. Persisted between runs as part of the artifact directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AbbrevMap {
    map: BTreeMap<String, String>,
}

static LEARN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z][A-Za-z\s.\-]*?)\s*\(([A-Z]{2,6})\)").unwrap()
});

static SHORT_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z]{2,6})\b").unwrap());

impl AbbrevMap {
    /// Learn a mapping from a full-form title. Returns true when a new
    /// abbreviation was added. Existing mappings are never overwritten so
    /// one odd title cannot clobber an established expansion.
    pub fn learn(&mut self, raw_title: &str) -> bool {
        let Some(caps) = LEARN_RE.captures(raw_title) else {
            return false;
        };
        let name = title_case(caps.get(1).unwrap().as_str());
        let abbrev = caps.get(2).unwrap().as_str().to_string();
        if name.is_empty() || self.map.contains_key(&abbrev) {
            return false;
        }
        self.map.insert(abbrev, name);
        true
    }

    /// Expand a leading abbreviation token, if known. "FP 479" becomes
    /// "Functional Programming 479"; unknown codes pass through unchanged.
    pub fn expand(&self, text: &str) -> Option<String> {
        let caps = SHORT_CODE_RE.captures(text)?;
        let code = caps.get(1).unwrap().as_str();
        let full = self.map.get(code)?;
        Some(format!("{}{}", full, &text[code.len()..]))
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

// Trailing bracket tag like "[In-person]" or "[Online]".
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\[[^\]]*\]\s*$").unwrap());

// Leading institution prefixes: "UTCN - ", "U.T.C.N.:", "UTCN AC - ".
static PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:U\.?T\.?C\.?N\.?)(?:\s+AC)?\s*[-:]\s*").unwrap()
});

// Honorific followed by a name: "Prof. I. Salomie", "dr Adrian Groza".
static HONORIFIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:[Pp]rof|[Dd]r|[Cc]onf|[Ll]ect|[Aa]sist|[Ss]\.?[Ll])\.?\s+[A-Z][A-Za-zăâîșțĂÂÎȘȚ.\-]+(?:\s+[A-Z][A-Za-zăâîșțĂÂÎȘȚ\-]+)*",
    )
    .unwrap()
});

// A dash-separated segment that reads as a person: "R. Slavescu",
// "A. D. Popescu", "Adrian Groza".
static NAME_SEGMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[A-Z]\.(?:\s*[A-Z]\.)?\s*[A-Z][A-Za-zăâîșțĂÂÎȘȚ\-]+|[A-Z][a-zăâîșț\-]+\s+[A-Z][a-zăâîșț\-]+)$",
    )
    .unwrap()
});

static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:[Yy]ear|[Aa]n(?:ul)?)\s*([1-6])\b").unwrap()
});

static GROUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:[Gg]rupa|[Gg]roup|[Ss]eria)\s*([A-Za-z0-9]+)\b").unwrap()
});

// Compact "3A" / "2 B" form, only consulted when no qualified token matched.
static COMPACT_GROUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([1-6])\s?([A-Z])\b").unwrap());

// Leftover separators once tokens have been cut out of the title.
static DANGLING_SEP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\s*[-–|•]\s*)+$|^(?:\s*[-–|•]\s*)+|\(\s*\)").unwrap()
});

static DOUBLED_SEP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*[-–]\s*[-–]\s*|\s*•\s*").unwrap());

static CLAUSE_SEP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+[-–|/]\s+|\s*,\s*").unwrap());

/// Parse a raw calendar title into structured fields.
pub fn parse_title(raw: &str, abbrevs: &AbbrevMap) -> ParsedTitle {
    let mut text = WS_RE.replace_all(raw.trim(), " ").into_owned();
    text = TAG_RE.replace(&text, "").into_owned();
    text = PREFIX_RE.replace(&text, "").into_owned();

    let professor = take_professor(&mut text);
    let group_display = take_group(&mut text);

    let mut subject = tidy(&text);
    if let Some(expanded) = abbrevs.expand(&subject) {
        subject = expanded;
    }

    let display_title = CLAUSE_SEP_RE
        .split(&subject)
        .next()
        .unwrap_or("")
        .trim()
        .to_string();
    let display_title = if display_title.is_empty() {
        subject.clone()
    } else {
        display_title
    };

    ParsedTitle {
        subject,
        display_title,
        professor,
        group_display,
    }
}

/// Extract and remove the professor token. Honorific forms win over bare
/// name-shaped segments; bare names are only accepted in dash-separated
/// segments after the first, where subject words cannot be mistaken for
/// surnames.
fn take_professor(text: &mut String) -> String {
    let honorific = HONORIFIC_RE
        .find(text)
        .map(|m| (m.range(), m.as_str().to_string()));
    if let Some((range, professor)) = honorific {
        text.replace_range(range, "");
        return professor;
    }

    let segments: Vec<&str> = text.split(" - ").collect();
    if segments.len() < 2 {
        return String::new();
    }
    for (i, segment) in segments.iter().enumerate().skip(1) {
        if NAME_SEGMENT_RE.is_match(segment.trim()) {
            let professor = segment.trim().to_string();
            let kept: Vec<&str> = segments
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, s)| *s)
                .collect();
            let joined = kept.join(" - ");
            *text = joined;
            return professor;
        }
    }
    String::new()
}

/// Extract and remove the group/year token, canonicalized as
/// "Year N • Group X" when both parts are present.
fn take_group(text: &mut String) -> String {
    let mut year = String::new();
    let mut group = String::new();

    if let Some((range, value)) = capture_and_range(&YEAR_RE, text, 1) {
        year = value;
        text.replace_range(range, "");
    }
    if let Some((range, value)) = capture_and_range(&GROUP_RE, text, 1) {
        group = value.to_uppercase();
        text.replace_range(range, "");
    }
    if year.is_empty() && group.is_empty() {
        let compact = COMPACT_GROUP_RE.captures(text).map(|caps| {
            (
                caps.get(0).unwrap().range(),
                caps.get(1).unwrap().as_str().to_string(),
                caps.get(2).unwrap().as_str().to_string(),
            )
        });
        if let Some((range, y, g)) = compact {
            year = y;
            group = g;
            text.replace_range(range, "");
        }
    }

    match (year.is_empty(), group.is_empty()) {
        (false, false) => format!("Year {year} • Group {group}"),
        (false, true) => format!("Year {year}"),
        (true, false) => format!("Group {group}"),
        (true, true) => String::new(),
    }
}

/// Run a regex and return the full-match range plus one capture, detached
/// from the haystack so the caller can mutate it.
fn capture_and_range(re: &Regex, text: &str, group: usize) -> Option<(std::ops::Range<usize>, String)> {
    let caps = re.captures(text)?;
    Some((
        caps.get(0).unwrap().range(),
        caps.get(group).unwrap().as_str().to_string(),
    ))
}

/// Collapse whitespace and separator debris left behind by token removal.
fn tidy(text: &str) -> String {
    let mut out = DOUBLED_SEP_RE.replace_all(text, " - ").into_owned();
    loop {
        let next = DANGLING_SEP_RE.replace_all(&out, "").into_owned();
        if next == out {
            break;
        }
        out = next;
    }
    WS_RE.replace_all(out.trim(), " ").into_owned()
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> ParsedTitle {
        parse_title(raw, &AbbrevMap::default())
    }

    #[test]
    fn test_subject_professor_room_form() {
        let t = parse("Functional programming (FP) - R. Slavescu - 40 [In-person]");
        assert_eq!(t.professor, "R. Slavescu");
        assert!(t.subject.starts_with("Functional programming (FP)"));
        assert_eq!(t.display_title, "Functional programming (FP)");
        assert_eq!(t.group_display, "");
    }

    #[test]
    fn test_honorific_professor() {
        let t = parse("Databases - Prof. Ioan Salomie");
        assert_eq!(t.professor, "Prof. Ioan Salomie");
        assert_eq!(t.subject, "Databases");
        assert_eq!(t.display_title, "Databases");
    }

    #[test]
    fn test_honorific_beats_bare_name() {
        let t = parse("Operating systems - Dr. Adrian Colesa - extra");
        assert_eq!(t.professor, "Dr. Adrian Colesa");
    }

    #[test]
    fn test_year_and_group() {
        let t = parse("Computer networks grupa B anul 3");
        assert_eq!(t.group_display, "Year 3 • Group B");
        assert_eq!(t.subject, "Computer networks");
    }

    #[test]
    fn test_english_year_group_forms() {
        let t = parse("Algebra year 2 group A1");
        assert_eq!(t.group_display, "Year 2 • Group A1");
        assert_eq!(t.subject, "Algebra");
    }

    #[test]
    fn test_seria() {
        let t = parse("Fizica seria C");
        assert_eq!(t.group_display, "Group C");
        assert_eq!(t.subject, "Fizica");
    }

    #[test]
    fn test_compact_group_form() {
        let t = parse("Mathematics 3A");
        assert_eq!(t.group_display, "Year 3 • Group A");
        assert_eq!(t.subject, "Mathematics");
    }

    #[test]
    fn test_compact_not_matched_when_qualified_present() {
        let t = parse("Mathematics year 2 3A");
        // Qualified token wins; the compact token stays in the subject.
        assert_eq!(t.group_display, "Year 2");
        assert_eq!(t.subject, "Mathematics 3A");
    }

    #[test]
    fn test_institution_prefix_and_whitespace_runs() {
        let t = parse("UTCN -   Software   engineering  ");
        assert_eq!(t.subject, "Software engineering");
    }

    #[test]
    fn test_display_title_first_clause() {
        let t = parse("Software engineering / Lab");
        assert_eq!(t.subject, "Software engineering / Lab");
        assert_eq!(t.display_title, "Software engineering");
    }

    #[test]
    fn test_passthrough_on_no_match() {
        let t = parse("open day");
        assert_eq!(t.subject, "open day");
        assert_eq!(t.display_title, "open day");
        assert_eq!(t.professor, "");
        assert_eq!(t.group_display, "");
    }

    #[test]
    fn test_empty_title() {
        let t = parse("");
        assert_eq!(t.subject, "");
        assert_eq!(t.display_title, "");
    }

    #[test]
    fn test_idempotent_on_canonical() {
        let inputs = [
            "Functional programming (FP) - R. Slavescu - 40 [In-person]",
            "Computer networks grupa B anul 3",
            "Databases - Prof. Ioan Salomie",
            "Mathematics 3A",
            "open day",
        ];
        let abbrevs = AbbrevMap::default();
        for raw in inputs {
            let first = parse_title(raw, &abbrevs);
            let second = parse_title(&first.canonical(), &abbrevs);
            assert_eq!(first, second, "re-parsing canonical of {raw:?} changed fields");
        }
    }

    #[test]
    fn test_abbrev_learning_and_expansion() {
        let mut abbrevs = AbbrevMap::default();
        assert!(abbrevs.learn("Functional programming (FP) - R. Slavescu - 40"));
        assert!(!abbrevs.learn("Functional programming (FP) - again"));
        assert!(!abbrevs.is_empty());

        let t = parse_title("FP 479", &abbrevs);
        assert_eq!(t.subject, "Functional Programming 479");
        assert_eq!(t.display_title, "Functional Programming 479");
    }

    #[test]
    fn test_unknown_abbreviation_passes_through() {
        let abbrevs = AbbrevMap::default();
        let t = parse_title("GP BT5.05", &abbrevs);
        assert_eq!(t.subject, "GP BT5.05");
    }
}
