use crate::Result;
use regex::Regex;

/// Translates a shell-style glob into an anchored regular expression.
///
/// The dialect is the classic fnmatch one: `*` matches any run of
/// characters (including separators), `?` matches a single character, and
/// `[...]` matches a character class, with `[!...]` for negation.
/// Everything else matches literally.
pub(crate) fn translate(pattern: &str) -> Result<Regex> {
    let mut regex = String::with_capacity(pattern.len() * 2 + 8);
    regex.push_str("(?s)^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        i += 1;
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '[' => {
                let mut j = i;
                if j < chars.len() && (chars[j] == '!' || chars[j] == ']') {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    // No closing bracket, treat the bracket literally.
                    regex.push_str("\\[");
                } else {
                    let mut class: String = chars[i..j].iter().collect();
                    class = class.replace('\\', "\\\\").replace(']', "\\]");
                    regex.push('[');
                    if let Some(rest) = class.strip_prefix('!') {
                        regex.push('^');
                        regex.push_str(rest);
                    } else if class.starts_with('^') {
                        regex.push('\\');
                        regex.push_str(&class);
                    } else {
                        regex.push_str(&class);
                    }
                    regex.push(']');
                    i = j + 1;
                }
            }
            _ => regex.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex.push('$');
    Regex::new(&regex).map_err(crate::Error::from)
}
