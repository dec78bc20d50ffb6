//! Cron expression parsing: the `cron` crate expects 6 or 7 whitespace-
//! separated fields (seconds first, year optional); task rows store the
//! conventional 5-field form. Grounded in the field-count normalization
//! helper from `other_examples`' Tauri scheduler (`next_run_time`/padding
//! 5-field expressions out to 7).

use std::str::FromStr;

use cron::Schedule;

/// Normalize a 5, 6 or 7-field cron expression to the 7-field form
/// `cron::Schedule` requires (sec min hour dom month dow year), then parse
/// it. A bare 5-field expression gets a leading `0` seconds field and a
/// trailing `*` year field.
pub fn parse_cron(expr: &str) -> Result<Schedule, String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let normalized = match fields.len() {
        5 => format!("0 {} *", fields.join(" ")),
        6 => format!("{} *", fields.join(" ")),
        7 => fields.join(" "),
        n => return Err(format!("expected 5, 6 or 7 cron fields, got {n}")),
    };
    Schedule::from_str(&normalized).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_expression_parses() {
        assert!(parse_cron("*/5 * * * *").is_ok());
    }

    #[test]
    fn six_field_expression_parses() {
        assert!(parse_cron("0 */5 * * * *").is_ok());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_cron("not a cron expression").is_err());
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        assert!(parse_cron("* * *").is_err());
    }
}
