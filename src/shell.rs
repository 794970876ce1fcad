//! POSIX shell word splitting and quoting
//!
//! Used for the `QEMU_RUNNER_FLAGS` / `QEMU_FLAGS` environment variables and
//! for printing dry-run command lines that can be pasted back into a shell.

/// Errors from splitting a shell string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShellError {
    #[error("No closing quotation in: {0}")]
    UnterminatedQuote(String),

    #[error("No escaped character after trailing backslash in: {0}")]
    TrailingEscape(String),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Between,
    Word,
    Single,
    Double,
}

/// Split `input` into words.
///
/// Whitespace separates words. Single quotes keep everything literally,
/// double quotes allow `\"` and `\\` escapes, and a backslash outside quotes
/// escapes the next character. `''` yields an empty word.
pub fn split(input: &str) -> Result<Vec<String>, ShellError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut state = State::Between;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Between | State::Word => match c {
                ' ' | '\t' | '\r' | '\n' => {
                    if state == State::Word {
                        words.push(std::mem::take(&mut current));
                        state = State::Between;
                    }
                }
                '\'' => state = State::Single,
                '"' => state = State::Double,
                '\\' => match chars.next() {
                    Some(escaped) => {
                        current.push(escaped);
                        state = State::Word;
                    }
                    None => return Err(ShellError::TrailingEscape(input.to_string())),
                },
                other => {
                    current.push(other);
                    state = State::Word;
                }
            },
            State::Single => match c {
                '\'' => state = State::Word,
                other => current.push(other),
            },
            State::Double => match c {
                '"' => state = State::Word,
                '\\' => match chars.peek() {
                    Some(&next) if next == '"' || next == '\\' => {
                        current.push(next);
                        chars.next();
                    }
                    Some(_) => current.push('\\'),
                    None => return Err(ShellError::UnterminatedQuote(input.to_string())),
                },
                other => current.push(other),
            },
        }
    }

    match state {
        State::Single | State::Double => Err(ShellError::UnterminatedQuote(input.to_string())),
        State::Word => {
            words.push(current);
            Ok(words)
        }
        State::Between => Ok(words),
    }
}

fn is_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || "@%+=:,./_-".contains(c)
}

/// Quote a single word so a POSIX shell reads it back unchanged.
pub fn quote(word: &str) -> String {
    if word.is_empty() {
        return "''".to_string();
    }
    if word.chars().all(is_safe) {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r#"'"'"'"#))
}

/// Quote every word and join them with single spaces.
pub fn join<I, S>(words: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    words
        .into_iter()
        .map(|w| quote(w.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}
