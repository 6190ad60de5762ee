//! Rule tables for the campus assistant: reply languages, location
//! phrasing, and the fixed replies.

use std::sync::LazyLock;

use regex::Regex;

/// Exact reply used to offer a hand-off to a human agent. Clients match
/// on this text, so it is never translated.
pub const ESCALATION_REPLY: &str =
    "I am unable to answer your question. Would you like to talk to a person?";

/// Substring that marks a generated answer as an escalation.
pub const ESCALATION_MARKER: &str = "Would you like to talk to a person?";

pub const APOLOGY_REPLY: &str = "I'm sorry, I'm having trouble connecting to my brain right now. Please try again in a moment.";

/// Reply language name for a language code. Unknown codes fall back to
/// English.
pub fn language_name(code: &str) -> &'static str {
    match code {
        "hi" => "Hindi",
        "mr" => "Marathi",
        "es" => "Spanish",
        "fr" => "French",
        _ => "English",
    }
}

const LOCATION_TRIGGERS: &[&str] = &["where is", "location of", "find the"];

static LOCATION_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)where is|location of|find the").expect("valid regex"));

/// Place name asked about in a location question, if the message is one.
///
/// Takes the text after the last trigger phrase, without question marks.
pub fn location_query(message: &str) -> Option<String> {
    let lower = message.to_lowercase();
    if !LOCATION_TRIGGERS.iter().any(|t| lower.contains(t)) {
        return None;
    }
    let place = LOCATION_SPLIT
        .split(message)
        .last()?
        .replace('?', "")
        .trim()
        .to_string();
    (!place.is_empty()).then_some(place)
}
