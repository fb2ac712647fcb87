//! Parser for a single crontab field.
//!
//! Supported forms, checked in this order:
//!
//! | Token     | Values                                             |
//! |-----------|----------------------------------------------------|
//! | `*`       | every value of the range                           |
//! | `a/b`     | `a, a+b, a+2b, …` strictly below the range end     |
//! | `a-b`     | `a..=b`, empty when `b < a`                        |
//! | `a,b,c`   | the listed values                                  |
//! | `a`       | one value                                          |
//!
//! `a` may be `*` in the step form, meaning the start of the range. Any
//! value may be a case-insensitive alias of the field's category.

use std::collections::BTreeSet;

use crate::calendar::Category;
use crate::error::ParseError;

/// Parse `token` into the ascending, duplicate-free values it selects.
///
/// `range` overrides the inclusive bounds and is only accepted for
/// [`Category::Uncategorized`], which has no bounds of its own.
pub fn parse_field(
    token: &str,
    category: Category,
    range: Option<(u32, u32)>,
) -> Result<Vec<u32>, ParseError> {
    let (start, end) = match (category.range(), range) {
        (Some(bounds), None) => bounds,
        (None, Some(bounds)) => bounds,
        _ => return Err(ParseError::InvalidRange { category }),
    };
    let token = token.trim();
    if token.is_empty() {
        return Err(ParseError::EmptyToken { category });
    }
    if start > end {
        return Ok(Vec::new());
    }
    let field = Field {
        category,
        start,
        end,
    };

    if token == "*" {
        return Ok((start..=end).collect());
    }

    let values: BTreeSet<u32> = if let Some((from, step)) = token.split_once('/') {
        let first = if from == "*" { start } else { field.value(from)? };
        let step = match step.trim().parse::<u32>() {
            Ok(0) => {
                return Err(ParseError::ZeroStep {
                    token: token.to_string(),
                })
            }
            Ok(n) => n,
            Err(_) => {
                return Err(ParseError::BadNumber {
                    category,
                    token: step.trim().to_string(),
                })
            }
        };
        // The range end itself is never selected by a step expression.
        (first..end).step_by(step as usize).collect()
    } else if let Some((from, to)) = token.split_once('-') {
        let from = field.value(from)?;
        let to = field.value(to)?;
        (from..=to).collect()
    } else if token.contains(',') {
        token
            .split(',')
            .map(|part| field.value(part))
            .collect::<Result<_, _>>()?
    } else {
        BTreeSet::from([field.value(token)?])
    };

    Ok(values.into_iter().collect())
}

struct Field {
    category: Category,
    start: u32,
    end: u32,
}

impl Field {
    /// Resolve one literal (number or alias) and check it against the bounds.
    fn value(&self, token: &str) -> Result<u32, ParseError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ParseError::EmptyToken {
                category: self.category,
            });
        }
        let value = if token.bytes().all(|b| b.is_ascii_digit()) {
            token.parse::<u32>().unwrap_or(u32::MAX)
        } else {
            self.category
                .alias(token)
                .ok_or_else(|| ParseError::UnknownAlias {
                    category: self.category,
                    token: token.to_string(),
                })?
        };
        if value < self.start || value > self.end {
            return Err(ParseError::OutOfRange {
                category: self.category,
                value,
                min: self.start,
                max: self.end,
            });
        }
        Ok(value)
    }
}
