//! Crontab line parsing.
//!
//! Shape: `<minute> <hour> <weekday> <season> <moon_phase> <callback> [args...] [# job_id]`

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Name of the built-in no-op callback; the `nop` token maps to it.
pub const NOP_CALLBACK: &str = "almanac.nop";

/// One crontab line split into its parts. Fields are not yet resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrontabLine {
    /// Raw minute, hour, weekday, season and moon-phase tokens.
    pub fields: [String; 5],
    /// Callback name after `nop` substitution and `^x` → `X` rewriting.
    pub callback: String,
    pub args: Vec<String>,
    /// Text after the first `#`, if any.
    pub job_id: Option<String>,
    /// Whitespace-normalized line without the `# job_id` suffix.
    pub source: String,
}

impl CrontabLine {
    /// The five time fields joined by single spaces.
    pub fn time_spec(&self) -> String {
        self.fields.join(" ")
    }
}

/// Split a crontab line into time fields, callback, arguments and job id.
pub fn parse_line(line: &str) -> Result<CrontabLine, ParseError> {
    let (body, job_id) = match line.split_once('#') {
        Some((body, comment)) => {
            let id = comment.trim();
            if id.is_empty() {
                return Err(ParseError::MissingJobId {
                    line: line.trim().to_string(),
                });
            }
            (body, Some(id.to_string()))
        }
        None => (line, None),
    };

    let tokens: Vec<&str> = body.split_whitespace().collect();
    if tokens.len() < 6 {
        return Err(ParseError::MalformedLine {
            line: line.trim().to_string(),
        });
    }

    let fields = [
        tokens[0].to_string(),
        tokens[1].to_string(),
        tokens[2].to_string(),
        tokens[3].to_string(),
        tokens[4].to_string(),
    ];
    let callback = if tokens[5] == "nop" {
        NOP_CALLBACK.to_string()
    } else {
        caret_upper(tokens[5])
    };

    Ok(CrontabLine {
        fields,
        callback,
        args: tokens[6..].iter().map(|s| s.to_string()).collect(),
        job_id,
        source: tokens.join(" "),
    })
}

/// Rewrite every `^x` (x lowercase ASCII) to `X`; other carets stay.
pub fn caret_upper(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('^', Some(next)) if next.is_ascii_lowercase() => {
                out.push(next.to_ascii_uppercase());
                chars.next();
            }
            _ => out.push(c),
        }
    }
    out
}
