//! SQL fragment helpers: quoting, literals, column lists and type parsing.

use crate::schema::TablePath;

/// Quotes an identifier, doubling embedded quote characters.
pub fn quote_ident(name: &str, quote: char) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push(quote);
    for ch in name.chars() {
        if ch == quote {
            out.push(quote);
        }
        out.push(ch);
    }
    out.push(quote);
    out
}

/// Quotes each segment of a path that is present.
pub fn quote_path(path: &TablePath, quote: char) -> String {
    let mut parts = Vec::with_capacity(3);
    if let Some(db) = &path.database {
        parts.push(quote_ident(db, quote));
    }
    if let Some(schema) = &path.schema {
        parts.push(quote_ident(schema, quote));
    }
    parts.push(quote_ident(&path.name, quote));
    parts.join(".")
}

/// Single-quoted string literal with `'` doubled.
pub fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `"a", "b"` for a list of column names.
pub fn column_list(columns: &[String], quote: char) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c, quote))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Strips one pair of surrounding quotes (`"x"`, `` `x` ``, `'x'`, `[x]`).
pub fn unquote(name: &str) -> String {
    let trimmed = name.trim();
    let bytes = trimmed.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        let q = first as char;
        if (first == b'"' || first == b'`' || first == b'\'') && first == last {
            let inner = &trimmed[1..trimmed.len() - 1];
            return inner.replace(&format!("{}{}", q, q), &q.to_string());
        }
        if first == b'[' && last == b']' {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.to_string()
}

/// A declared type split into name and arguments: `varchar(255)` -> (`varchar`, [255]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedType {
    pub name: String,
    pub args: Vec<u32>,
    pub unsigned: bool,
}

pub fn parse_type(declared: &str) -> ParsedType {
    let lower = declared.trim().to_ascii_lowercase();
    let unsigned = lower.contains(" unsigned");
    let lower = lower.replace(" unsigned", "").replace(" zerofill", "");
    match lower.find('(') {
        Some(open) => {
            let close = lower.rfind(')').unwrap_or(lower.len());
            let args = lower[open + 1..close.max(open + 1)]
                .split(',')
                .filter_map(|a| a.trim().parse::<u32>().ok())
                .collect();
            let mut name = lower[..open].trim().to_string();
            let rest = lower.get(close + 1..).unwrap_or("").trim();
            if !rest.is_empty() {
                // e.g. `timestamp(3) with time zone`
                name = format!("{} {}", name, rest);
            }
            ParsedType { name, args, unsigned }
        }
        None => ParsedType {
            name: lower.trim().to_string(),
            args: Vec::new(),
            unsigned,
        },
    }
}

/// Returns the text between the parenthesis opening at `open` and its match.
pub fn balanced_parens(text: &str, open: usize) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.get(open) != Some(&b'(') {
        return None;
    }
    let mut depth = 0usize;
    let mut in_string: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match in_string {
            Some(q) if b == q => in_string = None,
            Some(_) => {}
            None => match b {
                b'\'' | b'"' | b'`' => in_string = Some(b),
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&text[open + 1..i]);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

/// Splits on commas that are not nested in parentheses or quotes.
pub fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_string: Option<char> = None;
    let mut start = 0;
    for (i, ch) in text.char_indices() {
        match in_string {
            Some(q) if ch == q => in_string = None,
            Some(_) => {}
            None => match ch {
                '\'' | '"' | '`' => in_string = Some(ch),
                '(' => depth += 1,
                ')' => depth -= 1,
                ',' if depth == 0 => {
                    parts.push(text[start..i].trim());
                    start = i + 1;
                }
                _ => {}
            },
        }
    }
    let last = text[start..].trim();
    if !last.is_empty() {
        parts.push(last);
    }
    parts
}
