//! Prompt patterns for console scraping.

/// Suffix of a getty login prompt line, e.g. `ubuntu login:`.
pub const LOGIN_PROMPT_SUFFIX: &str = " login:";

/// Strip the characters a terminal leaves after a prompt.
pub fn trim_line_end(line: &str) -> &str {
    line.trim_end_matches(&['\r', '\n', ' '][..])
}

/// Whether a single console line is a login prompt.
pub fn is_login_prompt(line: &str) -> bool {
    trim_line_end(line).ends_with(LOGIN_PROMPT_SUFFIX)
}

/// Whether any `\n`-separated line of `text` is a login prompt.
pub fn contains_login_prompt(text: &str) -> bool {
    text.split('\n').any(is_login_prompt)
}
