/// Card filter behind the board search box.
///
/// A query is split into whitespace-separated terms (double quotes group
/// words); a card must satisfy every term. Plain words match the title, the
/// names of the card's labels, or its due date text. Matching ignores case
/// and accents unless asked otherwise.
///
/// Term syntax: `#name` / `label:name`, `list:id`, `due:any|none|overdue|
/// today|week|future`, `/regex/`, and a leading `-` to negate any term.
use chrono::{DateTime, Datelike, Duration, NaiveDate, SecondsFormat, Utc};
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::types::{BoardLabel, Card};

#[derive(Debug, Clone, Copy, Default)]
pub struct FilterOptions {
    pub case_sensitive: bool,
    /// Treat the whole query as one regular expression over the title.
    pub use_regex: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueFilter {
    Any,
    None,
    Overdue,
    Today,
    Week,
    Future,
}

#[derive(Debug)]
enum FilterTerm {
    Text(String),
    Label(String),
    List(String),
    Due(DueFilter),
    Regex(Regex),
}

#[derive(Debug)]
struct ParsedTerm {
    negate: bool,
    term: FilterTerm,
}

pub struct CardFilter {
    terms: Vec<ParsedTerm>,
    regex_mode: Option<Regex>,
    regex_invalid: bool,
    case_sensitive: bool,
    now: DateTime<Utc>,
    week_start: NaiveDate,
    week_end: NaiveDate,
}

impl CardFilter {
    pub fn compile(raw_query: &str, options: FilterOptions) -> Self {
        Self::compile_at(raw_query, options, Utc::now())
    }

    /// Compile against a fixed clock, for the relative `due:` terms.
    pub fn compile_at(raw_query: &str, options: FilterOptions, now: DateTime<Utc>) -> Self {
        let query = raw_query.trim();
        let today = now.date_naive();
        let week_start = today - Duration::days(today.weekday().num_days_from_monday() as i64);
        let mut filter = Self {
            terms: Vec::new(),
            regex_mode: None,
            regex_invalid: false,
            case_sensitive: options.case_sensitive,
            now,
            week_start,
            week_end: week_start + Duration::days(6),
        };

        if query.is_empty() {
            return filter;
        }

        if options.use_regex {
            match Regex::new(query) {
                Ok(regex) => filter.regex_mode = Some(regex),
                Err(e) => {
                    log::debug!("[corkboard.search] Invalid regex {:?}: {}", query, e);
                    filter.regex_invalid = true;
                }
            }
            return filter;
        }

        filter.terms = split_query_tokens(query)
            .into_iter()
            .filter_map(|token| parse_token(&token, options.case_sensitive))
            .collect();
        filter
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.regex_mode.is_none() && !self.regex_invalid
    }

    /// `labels` are the board's labels, used to resolve the card's label ids.
    pub fn matches(&self, card: &Card, labels: &[BoardLabel]) -> bool {
        if self.regex_invalid {
            return false;
        }
        if let Some(regex) = &self.regex_mode {
            return regex.is_match(&card.title);
        }

        let label_names: Vec<&str> = card
            .labels
            .iter()
            .filter_map(|id| labels.iter().find(|l| &l.id == id))
            .map(|l| l.name.as_str())
            .collect();

        self.terms.iter().all(|parsed| {
            let matched = self.matches_term(&parsed.term, card, &label_names);
            matched != parsed.negate
        })
    }

    fn matches_term(&self, term: &FilterTerm, card: &Card, label_names: &[&str]) -> bool {
        match term {
            FilterTerm::Text(value) => {
                contains_text(&card.title, value, self.case_sensitive)
                    || label_names
                        .iter()
                        .any(|name| contains_text(name, value, self.case_sensitive))
                    || card.due_date.is_some_and(|due| {
                        contains_text(&due_text(due), value, self.case_sensitive)
                    })
            }
            FilterTerm::Label(value) => label_names
                .iter()
                .any(|name| equals_text(name, value, self.case_sensitive)),
            FilterTerm::List(value) => equals_text(&card.list_id, value, self.case_sensitive),
            FilterTerm::Due(mode) => self.matches_due(*mode, card.due_date),
            FilterTerm::Regex(regex) => regex.is_match(&card.title),
        }
    }

    fn matches_due(&self, mode: DueFilter, due: Option<DateTime<Utc>>) -> bool {
        match (mode, due) {
            (DueFilter::None, due) => due.is_none(),
            (_, None) => false,
            (DueFilter::Any, Some(_)) => true,
            (DueFilter::Overdue, Some(due)) => due < self.now,
            (DueFilter::Today, Some(due)) => due.date_naive() == self.now.date_naive(),
            (DueFilter::Week, Some(due)) => {
                let day = due.date_naive();
                day >= self.week_start && day <= self.week_end
            }
            (DueFilter::Future, Some(due)) => due > self.now,
        }
    }
}

/// Due dates are searchable in the text form the store returns them in.
fn due_text(due: DateTime<Utc>) -> String {
    due.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn split_query_tokens(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in input.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
            if !in_quotes && !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            continue;
        }
        if ch.is_whitespace() && !in_quotes {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            continue;
        }
        current.push(ch);
    }

    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn parse_token(raw_token: &str, case_sensitive: bool) -> Option<ParsedTerm> {
    let token = raw_token.trim();
    let (negate, token) = match token.strip_prefix('-') {
        Some(rest) if !rest.is_empty() => (true, rest),
        _ => (false, token),
    };
    if token.is_empty() {
        return None;
    }

    if let Some(name) = token.strip_prefix('#').filter(|name| !name.is_empty()) {
        return Some(ParsedTerm {
            negate,
            term: FilterTerm::Label(normalize_case(name, case_sensitive)),
        });
    }

    if token.len() > 2 && token.starts_with('/') && token.ends_with('/') {
        if let Ok(regex) = Regex::new(&token[1..token.len() - 1]) {
            return Some(ParsedTerm {
                negate,
                term: FilterTerm::Regex(regex),
            });
        }
    }

    // Unknown keys and empty values ("Note:") are searched as plain text.
    if let Some((key_raw, value_raw)) = token
        .split_once(':')
        .filter(|(_, value)| !value.trim().is_empty())
    {
        let value = value_raw.trim();
        let term = match key_raw.to_ascii_lowercase().as_str() {
            "label" | "tag" => Some(FilterTerm::Label(normalize_case(value, case_sensitive))),
            "list" => Some(FilterTerm::List(normalize_case(value, case_sensitive))),
            "due" => parse_due_term(value).map(FilterTerm::Due),
            "re" | "regex" => Regex::new(value).ok().map(FilterTerm::Regex),
            _ => None,
        };
        if let Some(term) = term {
            return Some(ParsedTerm { negate, term });
        }
    }

    Some(ParsedTerm {
        negate,
        term: FilterTerm::Text(normalize_case(token, case_sensitive)),
    })
}

fn parse_due_term(value: &str) -> Option<DueFilter> {
    match value.to_ascii_lowercase().as_str() {
        "any" => Some(DueFilter::Any),
        "none" => Some(DueFilter::None),
        "overdue" => Some(DueFilter::Overdue),
        "today" => Some(DueFilter::Today),
        "week" | "thisweek" => Some(DueFilter::Week),
        "future" | "upcoming" => Some(DueFilter::Future),
        _ => None,
    }
}

/// Lowercase, NFD-decompose and strip combining marks, so "resume" finds
/// "Résumé".
fn normalize_for_search(value: &str) -> String {
    value
        .to_lowercase()
        .nfd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect()
}

fn normalize_case(value: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        value.to_string()
    } else {
        normalize_for_search(value)
    }
}

fn equals_text(left: &str, right: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        left == right
    } else {
        normalize_for_search(left) == normalize_for_search(right)
    }
}

fn contains_text(haystack: &str, needle: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        haystack.contains(needle)
    } else {
        normalize_for_search(haystack).contains(&normalize_for_search(needle))
    }
}
