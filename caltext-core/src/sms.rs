//! SMS extraction from event descriptions.
//!
//! A description of the form `SMS:<phones>:<text>` (or with the
//! Cyrillic `СМС` prefix) names the recipients and the message body.
//! Any other shape derives nothing, so the parser is total.

/// Recipients and message text derived from a description.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DerivedSms {
    pub text: String,
    pub phones: Vec<String>,
}

/// Character budget for bodies containing Cyrillic letters.
const CYRILLIC_LIMIT: usize = 70;
/// Character budget for plain bodies.
const LATIN_LIMIT: usize = 160;

/// Derive recipients and text from a raw description.
pub fn parse_description(description: &str) -> DerivedSms {
    let cleaned = description
        .replace("\\;", ";")
        .replace("\\,", ",")
        .replace("\\n", " ")
        .replace("\\\\", "\\")
        .replace("  ", " ")
        .replace('\t', " ");

    let mut parts = cleaned.splitn(3, ':');
    let (Some(prefix), Some(numbers), Some(body)) = (parts.next(), parts.next(), parts.next())
    else {
        return DerivedSms::default();
    };

    let prefix = prefix.to_uppercase();
    if prefix != "SMS" && prefix != "СМС" {
        return DerivedSms::default();
    }

    let phones = numbers
        .split([';', ','])
        .filter_map(|raw| {
            let phone = parse_phone(raw);
            (!phone.is_empty()).then_some(phone)
        })
        .collect();

    DerivedSms {
        text: truncate_body(body),
        phones,
    }
}

/// Normalize a candidate phone number.
///
/// Strips `()`, `-` and spaces, then requires an optional `+` followed
/// by digits. `+7` numbers collapse to the domestic `8` prefix, longer
/// international numbers get the `810` exit code, and anything shorter
/// than four characters is dropped.
pub fn parse_phone(raw: &str) -> String {
    let s: String = raw
        .chars()
        .filter(|c| !matches!(c, '(' | ')' | '-' | ' '))
        .collect();

    let digits = s.strip_prefix('+').unwrap_or(&s);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return String::new();
    }

    if s.len() == 12 && s.starts_with("+7") {
        format!("8{}", &s[2..])
    } else if s.starts_with('+') && s.len() > 12 {
        format!("810{}", &s[1..])
    } else if s.len() >= 4 {
        s
    } else {
        String::new()
    }
}

/// Truncate the body to its character budget, marking the cut with `>`.
fn truncate_body(body: &str) -> String {
    let chars: Vec<char> = body.chars().collect();
    let cyrillic = chars.iter().any(|c| matches!(c, 'А'..='я'));
    let limit = if cyrillic { CYRILLIC_LIMIT } else { LATIN_LIMIT };

    if chars.len() > limit {
        let mut truncated: String = chars[..limit - 1].iter().collect();
        truncated.push('>');
        truncated
    } else {
        body.to_string()
    }
}
