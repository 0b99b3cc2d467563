use codebraid_message::{Message, MessageKind, MessageList};
use codebraid_utils::splitlines_lf;
use regex::Regex;
use std::collections::HashMap;

/// Raw keyword/value pairs an `include` option was given, before the file
/// has been read and sliced.
#[derive(Debug, Clone, Default)]
pub struct IncludeOptions(pub HashMap<String, String>);

/// A resolved `include`: the file has been read and, if a selection keyword
/// was given, sliced down to the requested portion -- grounded on
/// `Include` (`code_chunks.py`). Unlike the original, which inherits from
/// `dict` and mutates the owning chunk's error list as it goes, resolution
/// here is a pure function that returns either a populated `Include` or
/// records its errors in the caller-supplied list, since Rust has no
/// equivalent to reaching back into a partially-constructed owner.
#[derive(Debug, Clone, Default)]
pub struct Include {
    pub code_lines: Vec<String>,
    pub options: IncludeOptions,
}

const START_KEYWORDS: &[&str] = &["start_string", "start_regex", "after_string", "after_regex"];
const END_KEYWORDS: &[&str] = &["before_string", "before_regex", "end_string", "end_regex"];
const RANGE_KEYWORDS: &[&str] = &["lines", "regex"];
const KEYWORDS: &[&str] = &[
    "file",
    "encoding",
    "lines",
    "regex",
    "start_string",
    "start_regex",
    "after_string",
    "after_regex",
    "before_string",
    "before_regex",
    "end_string",
    "end_regex",
];

fn selection_keywords_present<'a>(options: &HashMap<String, String>, set: &[&'a str]) -> Vec<&'a str> {
    set.iter().filter(|k| options.contains_key(**k)).copied().collect()
}

impl Include {
    pub fn resolve(options: HashMap<String, String>, errors: &mut MessageList) -> Include {
        let unknown: Vec<&str> = options.keys().filter(|k| !KEYWORDS.contains(&k.as_str())).map(|s| s.as_str()).collect();
        if !unknown.is_empty() {
            errors.push(Message::new(MessageKind::SourceError, format!("Unknown \"include\" keywords: {}", unknown.join(", "))));
        }

        let start_keywords = selection_keywords_present(&options, START_KEYWORDS);
        let end_keywords = selection_keywords_present(&options, END_KEYWORDS);
        let range_keywords = selection_keywords_present(&options, RANGE_KEYWORDS);
        if (!range_keywords.is_empty() && (!start_keywords.is_empty() || !end_keywords.is_empty()))
            || range_keywords.len() > 1
            || start_keywords.len() > 1
            || end_keywords.len() > 1
        {
            errors.push(Message::new(
                MessageKind::SourceError,
                "Too many keywords for selecting part of an \"include\" file".to_string(),
            ));
        }

        let file = options.get("file").cloned();
        let encoding = options.get("encoding").cloned().unwrap_or_else(|| "utf8".to_string());
        let Some(file) = file else {
            errors.push(Message::new(MessageKind::SourceError, "Missing \"include\" keyword \"file\"".to_string()));
            return Include { code_lines: Vec::new(), options: IncludeOptions(options) };
        };
        if !errors.is_empty() {
            return Include { code_lines: Vec::new(), options: IncludeOptions(options) };
        }

        let path = shellexpand_home(&file);
        let text = match (std::fs::read(&path), encoding.as_str()) {
            (Err(e), _) => {
                let msg = if e.kind() == std::io::ErrorKind::NotFound {
                    format!("Cannot include nonexistent file \"{file}\"")
                } else {
                    format!("Insufficient permissions to access file \"{file}\"")
                };
                errors.push(Message::new(MessageKind::SourceError, msg));
                return Include { code_lines: Vec::new(), options: IncludeOptions(options) };
            }
            (Ok(bytes), "utf8" | "utf-8") => match String::from_utf8(bytes) {
                Ok(s) => s,
                Err(_) => {
                    errors.push(Message::new(
                        MessageKind::SourceError,
                        format!("Cannot decode file \"{file}\" with encoding \"{encoding}\""),
                    ));
                    return Include { code_lines: Vec::new(), options: IncludeOptions(options) };
                }
            },
            (Ok(_), _) => {
                errors.push(Message::new(MessageKind::SourceError, format!("Unknown encoding \"{encoding}\"")));
                return Include { code_lines: Vec::new(), options: IncludeOptions(options) };
            }
        };

        let mut text = text;
        for kw in start_keywords.iter().chain(end_keywords.iter()).chain(range_keywords.iter()) {
            let Some(value) = options.get(*kw) else {
                continue;
            };
            match apply_selection(kw, value, &text) {
                Ok(sliced) => text = sliced,
                Err(msg) => {
                    errors.push(Message::new(MessageKind::SourceError, msg));
                    return Include { code_lines: Vec::new(), options: IncludeOptions(options) };
                }
            }
        }
        let code_lines = splitlines_lf(&text, false);
        Include { code_lines, options: IncludeOptions(options) }
    }
}

fn shellexpand_home(path: &str) -> std::path::PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    std::path::PathBuf::from(path)
}

fn apply_selection(kw: &str, value: &str, text: &str) -> Result<String, String> {
    match kw {
        "lines" => option_lines(value, text),
        "regex" => option_regex(value, text, |_, m| m.as_str().to_string()),
        "start_string" => option_string(value, text, |idx, _| idx, |t, idx| t[idx..].to_string(), "start_string"),
        "start_regex" => option_regex(value, text, |t, m| t[m.start()..].to_string()),
        "after_string" => {
            option_string(value, text, |idx, len| idx + len, |t, idx| t[idx..].to_string(), "after_string")
        }
        "after_regex" => option_regex(value, text, |t, m| t[m.end()..].to_string()),
        "before_string" => option_string(value, text, |idx, _| idx, |t, idx| t[..idx].to_string(), "before_string"),
        "before_regex" => option_regex(value, text, |t, m| t[..m.start()].to_string()),
        "end_string" => {
            option_string(value, text, |idx, len| idx + len, |t, idx| t[..idx].to_string(), "end_string")
        }
        "end_regex" => option_regex(value, text, |t, m| t[..m.end()].to_string()),
        _ => unreachable!("selection keyword list is exhaustive"),
    }
}

fn option_string(
    value: &str,
    text: &str,
    to_index: fn(usize, usize) -> usize,
    slice: fn(&str, usize) -> String,
    name: &str,
) -> Result<String, String> {
    match text.find(value) {
        None => Err(format!("The pattern given by \"include\" option \"{name}\" was not found")),
        Some(idx) => Ok(slice(text, to_index(idx, value.len()))),
    }
}

fn option_regex(value: &str, text: &str, extract: fn(&str, &regex::Match) -> String) -> Result<String, String> {
    let re = Regex::new(&format!("(?s){value}")).map_err(|_| "Invalid regex pattern for \"include\" option".to_string())?;
    match re.find(text) {
        None => Err("The pattern given by an \"include\" regex option was not found".to_string()),
        Some(m) => Ok(extract(text, &m)),
    }
}

fn option_lines(value: &str, text: &str) -> Result<String, String> {
    let value = value.replace(' ', "");
    let invalid = || "Invalid value for \"include\" option \"lines\"".to_string();
    let re = Regex::new(r"^[1-9][0-9]*(?:-(?:[1-9][0-9]*)?)?(?:,[1-9][0-9]*(?:-(?:[1-9][0-9]*)?)?)*$").map_err(|_| invalid())?;
    if !re.is_match(&value) {
        return Err(invalid());
    }
    let text_lines = splitlines_lf(text, false);
    let mut max_line_number = text.matches('\n').count();
    if !text.ends_with('\n') {
        max_line_number += 1;
    }
    let mut indices = std::collections::BTreeSet::new();
    for range in value.split(',') {
        if let Some((start, end)) = range.split_once('-') {
            let start: usize = start.parse().map_err(|_| invalid())?;
            let end = if end.is_empty() { max_line_number } else { end.parse().map_err(|_| invalid())? };
            for n in start - 1..end {
                indices.insert(n);
            }
        } else {
            let n: usize = range.parse().map_err(|_| invalid())?;
            indices.insert(n - 1);
        }
    }
    Ok(indices.into_iter().filter_map(|n| text_lines.get(n)).cloned().collect::<Vec<_>>().join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_option_selects_a_range() {
        let text = "a\nb\nc\nd\n";
        assert_eq!(option_lines("2-3", text).unwrap(), "b\nc");
    }

    #[test]
    fn lines_option_open_range_goes_to_end() {
        let text = "a\nb\nc\n";
        assert_eq!(option_lines("2-", text).unwrap(), "b\nc");
    }

    #[test]
    fn missing_file_keyword_records_error() {
        let mut errors = MessageList::errors();
        let mut options = HashMap::new();
        options.insert("encoding".to_string(), "utf8".to_string());
        let include = Include::resolve(options, &mut errors);
        assert!(include.code_lines.is_empty());
        assert_eq!(errors.len(), 1);
    }
}
