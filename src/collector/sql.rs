//! Best-effort table name extraction for recorded queries

const QUOTE_CHARS: &[char] = &['`', '"', '\'', '[', ']'];
const TRAILING_PUNCTUATION: &[char] = &[',', ';', '(', ')'];

/// Return the table referenced by the first `FROM`, `INTO`, `UPDATE`, `TABLE`
/// or `JOIN` keyword that has a following token, or an empty string.
pub fn extract_table_name(query: &str) -> String {
    let tokens: Vec<&str> = query.split_whitespace().collect();

    for (i, token) in tokens.iter().enumerate() {
        let keyword = token.to_ascii_uppercase();
        if matches!(keyword.as_str(), "FROM" | "INTO" | "UPDATE" | "TABLE" | "JOIN") {
            if let Some(next) = tokens.get(i + 1) {
                return clean_table_name(next);
            }
        }
    }

    String::new()
}

/// Strip quoting and trailing punctuation, and drop any schema qualifier
fn clean_table_name(raw: &str) -> String {
    let name = raw
        .trim_matches(QUOTE_CHARS)
        .trim_end_matches(TRAILING_PUNCTUATION);

    let name = match name.rfind('.') {
        Some(dot) if dot + 1 < name.len() => &name[dot + 1..],
        _ => name,
    };

    name.trim_matches(QUOTE_CHARS).to_string()
}
