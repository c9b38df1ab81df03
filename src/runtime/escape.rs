//! Output escaping strategies.

use crate::diagnostics::TemplateError;

pub const STRATEGIES: [&str; 5] = ["html", "js", "css", "url", "html_attr"];

pub fn escape(input: &str, strategy: &str) -> Result<String, TemplateError> {
    Ok(match strategy {
        "html" => html(input),
        "js" => js(input),
        "css" => css(input),
        "url" => url(input),
        "html_attr" => html_attr(input),
        other => {
            return Err(TemplateError::runtime(format!(
                "Invalid escaping strategy \"{other}\" (valid ones: html, js, url, css, and html_attr)."
            )));
        }
    })
}

pub fn html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            c => out.push(c),
        }
    }
    out
}

pub fn js(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            c if c.is_ascii_alphanumeric() || matches!(c, ',' | '.' | '_') => out.push(c),
            '\\' => out.push_str("\\\\"),
            '/' => out.push_str("\\/"),
            '\x08' => out.push_str("\\b"),
            '\x0C' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_ascii() => out.push_str(&format!("\\x{:02X}", c as u32)),
            c => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{unit:04X}"));
                }
            }
        }
    }
    out
}

pub fn css(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else {
            out.push_str(&format!("\\{:X} ", c as u32));
        }
    }
    out
}

/// RFC 3986 percent-encoding; only unreserved characters pass through.
pub fn url(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

pub fn html_attr(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            c if c.is_ascii_alphanumeric() || matches!(c, ',' | '.' | '-' | '_') => out.push(c),
            '"' => out.push_str("&quot;"),
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c if (c as u32) <= 0x1f && !matches!(c, '\t' | '\n' | '\r') => out.push_str("&#xFFFD;"),
            c if (c as u32) > 0xff => out.push_str(&format!("&#x{:04X};", c as u32)),
            c => out.push_str(&format!("&#x{:02X};", c as u32)),
        }
    }
    out
}
