use std::borrow::Cow;

use regex::Regex;

/// Lowercases a cell, allocating only when an uppercase character exists.
pub fn lowercase(input: &str) -> Cow<'_, str> {
    if input.chars().any(char::is_uppercase) {
        Cow::Owned(input.to_lowercase())
    } else {
        Cow::Borrowed(input)
    }
}

/// Uppercases a cell, allocating only when a lowercase character exists.
pub fn uppercase(input: &str) -> Cow<'_, str> {
    if input.chars().any(char::is_lowercase) {
        Cow::Owned(input.to_uppercase())
    } else {
        Cow::Borrowed(input)
    }
}

/// Strips surrounding whitespace; always a borrow of the input slice.
pub fn trim(input: &str) -> Cow<'_, str> {
    Cow::Borrowed(input.trim())
}

/// Trims and collapses interior whitespace runs to single spaces.
pub fn clean(input: &str, trim_ends: bool, normalize_spaces: bool) -> Cow<'_, str> {
    let base = if trim_ends { input.trim() } else { input };
    if !normalize_spaces {
        return Cow::Borrowed(base);
    }
    let mut needs_work = false;
    let mut last_was_space = false;
    for ch in base.chars() {
        let is_space = ch.is_whitespace();
        if is_space && (last_was_space || ch != ' ') {
            needs_work = true;
            break;
        }
        last_was_space = is_space;
    }
    if !needs_work {
        return Cow::Borrowed(base);
    }
    let mut out = String::with_capacity(base.len());
    let mut pending_space = false;
    for ch in base.chars() {
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
        } else {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(ch);
        }
    }
    Cow::Owned(out)
}

/// Replaces every character outside `[A-Za-z0-9\s]` with `replacement`.
/// When `keep_alphanumeric` is false, whitespace is replaced as well.
pub fn remove_special_chars<'a>(
    input: &'a str,
    keep_alphanumeric: bool,
    replacement: &str,
) -> Cow<'a, str> {
    let keep = |ch: char| {
        ch.is_ascii_alphanumeric() || (keep_alphanumeric && ch.is_whitespace())
    };
    if input.chars().all(keep) {
        return Cow::Borrowed(input);
    }
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if keep(ch) {
            out.push(ch);
        } else {
            out.push_str(replacement);
        }
    }
    Cow::Owned(out)
}

/// Returns a substring using character indices to stay UTF-8 safe, clamping
/// at the string end.
pub fn substring(value: &str, start: usize, length: Option<usize>) -> Cow<'_, str> {
    let chars: Vec<(usize, char)> = value.char_indices().collect();
    if start >= chars.len() {
        return Cow::Owned(String::new());
    }
    let start_byte = chars[start].0;
    let end_byte = match length {
        Some(len) => {
            let end_idx = start.saturating_add(len);
            if end_idx >= chars.len() {
                value.len()
            } else {
                chars[end_idx].0
            }
        }
        None => value.len(),
    };
    if start_byte == 0 && end_byte == value.len() {
        Cow::Borrowed(value)
    } else {
        Cow::Borrowed(&value[start_byte..end_byte])
    }
}

/// Regex replacement; `replace_all` already hands the input back as a
/// borrow when the pattern never matches, so this is a thin passthrough
/// that supports `$n` group references in the replacement.
pub fn regex_replace<'a>(value: &'a str, regex: &Regex, replacement: &str) -> Cow<'a, str> {
    regex.replace_all(value, replacement)
}

/// Replaces literal occurrences, optionally case-insensitively. The
/// replacement text is taken verbatim, never as a group reference.
pub fn literal_replace<'a>(
    value: &'a str,
    search: &str,
    replacement: &str,
    case_sensitive: bool,
) -> Cow<'a, str> {
    if search.is_empty() {
        return Cow::Borrowed(value);
    }
    if case_sensitive {
        if value.contains(search) {
            Cow::Owned(value.replace(search, replacement))
        } else {
            Cow::Borrowed(value)
        }
    } else {
        let pattern = format!("(?i){}", regex::escape(search));
        match Regex::new(&pattern) {
            Ok(re) => re.replace_all(value, regex::NoExpand(replacement)),
            Err(_) => Cow::Borrowed(value),
        }
    }
}

/// Formats 10-digit US phone numbers as `(XXX) XXX-XXXX`; anything else
/// passes through unchanged.
pub fn standardize_phone(input: &str) -> Cow<'_, str> {
    let digits: String = input.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 10 {
        Cow::Owned(format!(
            "({}) {}-{}",
            &digits[0..3],
            &digits[3..6],
            &digits[6..10]
        ))
    } else {
        Cow::Borrowed(input)
    }
}

/// Lowercases and trims an email address.
pub fn standardize_email(input: &str) -> Cow<'_, str> {
    let trimmed = input.trim();
    if trimmed.len() == input.len() && trimmed.chars().all(|ch| !ch.is_uppercase()) {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(trimmed.to_lowercase())
    }
}

/// Uppercases the first letter of each whitespace-delimited token,
/// lowercasing the rest. Punctuation inside tokens is preserved.
pub fn standardize_title(input: &str) -> Cow<'_, str> {
    let mut out = String::with_capacity(input.len());
    let mut at_token_start = true;
    for ch in input.chars() {
        if ch.is_whitespace() {
            out.push(ch);
            at_token_start = true;
        } else if at_token_start {
            out.extend(ch.to_uppercase());
            at_token_start = false;
        } else {
            out.extend(ch.to_lowercase());
        }
    }
    if out == input {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(out)
    }
}

/// Uppercases the first character and lowercases the remainder.
pub fn standardize_sentence(input: &str) -> Cow<'_, str> {
    let mut chars = input.chars();
    match chars.next() {
        None => Cow::Borrowed(input),
        Some(first) => {
            let rest: String = chars.as_str().to_lowercase();
            let mut out = String::with_capacity(input.len());
            out.extend(first.to_uppercase());
            out.push_str(&rest);
            if out == input {
                Cow::Borrowed(input)
            } else {
                Cow::Owned(out)
            }
        }
    }
}
