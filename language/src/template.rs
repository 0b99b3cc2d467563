use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("invalid field \"{0}\": need ASCII identifier")]
    InvalidField(String),
    #[error("invalid field \"{field}\": need plain keyword without format specifier \"{spec}\"")]
    FormatSpecifier { field: String, spec: String },
    #[error("unterminated field starting at byte {0}")]
    Unterminated(usize),
    #[error("field \"{0}\" was not found")]
    FieldNotFound(String),
    #[error("field \"{0}\" occurs more than once")]
    FieldRepeated(String),
    #[error("missing value for field \"{0}\"")]
    MissingValue(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    name: String,
    /// Byte range of the whole `{name}` token, including braces.
    start: usize,
    end: usize,
}

/// Scan `template` for `{identifier}` replacement fields, rejecting anything
/// with a format spec (`{x:>10}`) or conversion flag (`{x!r}`), and anything
/// whose field name is not a plain ASCII identifier. Escaped braces (`{{`,
/// `}}`) are skipped, matching `string.Formatter`'s handling of literal text.
fn scan_fields(template: &str) -> Result<Vec<Field>, TemplateError> {
    let bytes = template.as_bytes();
    let mut fields = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'{' if bytes.get(i + 1) == Some(&b'{') => i += 2,
            b'}' if bytes.get(i + 1) == Some(&b'}') => i += 2,
            b'{' => {
                let start = i;
                let close = template[i + 1..]
                    .find('}')
                    .map(|p| i + 1 + p)
                    .ok_or(TemplateError::Unterminated(start))?;
                let inner = &template[i + 1..close];
                let (name_part, spec_part) = match inner.find(':') {
                    Some(p) => (&inner[..p], Some(&inner[p + 1..])),
                    None => (inner, None),
                };
                let (name_part, conversion) = match name_part.find('!') {
                    Some(p) => (&name_part[..p], Some(&name_part[p + 1..])),
                    None => (name_part, None),
                };
                if let Some(spec) = spec_part {
                    return Err(TemplateError::FormatSpecifier {
                        field: name_part.to_string(),
                        spec: spec.to_string(),
                    });
                }
                if let Some(conv) = conversion {
                    return Err(TemplateError::FormatSpecifier {
                        field: name_part.to_string(),
                        spec: format!("!{conv}"),
                    });
                }
                if name_part.is_empty() || !name_part.is_ascii() || !is_ascii_identifier(name_part) {
                    return Err(TemplateError::InvalidField(name_part.to_string()));
                }
                fields.push(Field {
                    name: name_part.to_string(),
                    start,
                    end: close + 1,
                });
                i = close + 1;
            }
            _ => i += 1,
        }
    }
    Ok(fields)
}

fn is_ascii_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate that a template contains only plain ASCII-identifier fields.
pub fn check_template(template: &str) -> Result<(), TemplateError> {
    scan_fields(template).map(|_| ())
}

/// Split `template` around its one occurrence of `{field}`, returning the
/// text before and after (braces and field name removed). Text belonging to
/// other fields is preserved verbatim, including its braces, so later
/// rendering can still fill it in.
pub fn split_template(template: &str, field: &str) -> Result<(String, String), TemplateError> {
    let fields = scan_fields(template)?;
    let mut matches = fields.iter().filter(|f| f.name == field);
    let first = matches.next().ok_or_else(|| TemplateError::FieldNotFound(field.to_string()))?;
    if matches.next().is_some() {
        return Err(TemplateError::FieldRepeated(field.to_string()));
    }
    Ok((template[..first.start].to_string(), template[first.end..].to_string()))
}

/// Render a template by substituting every `{name}` field from `vars`.
/// Mirrors Python's `str.format(**vars)`, used at run time to fill in a
/// run/chunk-wrapper template with the final per-session values.
pub fn render_template(template: &str, vars: &HashMap<&str, String>) -> Result<String, TemplateError> {
    let fields = scan_fields(template)?;
    let mut out = String::with_capacity(template.len());
    let mut cursor = 0;
    for f in &fields {
        out.push_str(&template[cursor..f.start].replace("{{", "{").replace("}}", "}"));
        let value = vars.get(f.name.as_str()).ok_or_else(|| TemplateError::MissingValue(f.name.clone()))?;
        out.push_str(value);
        cursor = f.end;
    }
    out.push_str(&template[cursor..].replace("{{", "{").replace("}}", "}"));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_template_accepts_plain_keywords() {
        check_template("{stdout_start_delim}\n{code}\n{stdout_end_delim}\n").unwrap();
    }

    #[test]
    fn check_template_rejects_format_specifier() {
        let err = check_template("{code:>10}\n").unwrap_err();
        assert!(matches!(err, TemplateError::FormatSpecifier { .. }));
    }

    #[test]
    fn split_template_keeps_other_fields_verbatim() {
        let (before, after) = split_template("{a}\n{code}\n{b}\n", "code").unwrap();
        assert_eq!(before, "{a}\n");
        assert_eq!(after, "\n{b}\n");
    }

    #[test]
    fn split_template_errors_on_missing_field() {
        assert!(matches!(split_template("{a}\n", "code"), Err(TemplateError::FieldNotFound(_))));
    }

    #[test]
    fn render_template_fills_every_field() {
        let mut vars = HashMap::new();
        vars.insert("executable", "python3".to_string());
        vars.insert("source", "chunk.py".to_string());
        let rendered = render_template("{executable} {source}\n", &vars).unwrap();
        assert_eq!(rendered, "python3 chunk.py\n");
    }
}
