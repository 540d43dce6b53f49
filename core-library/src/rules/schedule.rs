//! Rule schedules
//!
//! A schedule is either a named preset or a cron expression. Presets fire at
//! 03:00 UTC. Five-field cron expressions get a leading seconds field so
//! they can be handed to the `cron` crate.

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hour at which daily, weekly and monthly presets fire
pub const PRESET_HOUR: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulePreset {
    Daily,
    Hourly,
    Weekly(Weekday),
    Monthly(u32),
    /// Only runs on explicit invocation
    Never,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Schedule {
    Preset(SchedulePreset),
    Cron(String),
}

impl Schedule {
    pub fn daily() -> Self {
        Schedule::Preset(SchedulePreset::Daily)
    }

    pub fn never() -> Self {
        Schedule::Preset(SchedulePreset::Never)
    }

    pub fn is_never(&self) -> bool {
        matches!(self, Schedule::Preset(SchedulePreset::Never))
    }

    /// Six-field cron expression, `None` for `never`
    ///
    /// Two schedules with the same expression share a trigger.
    pub fn cron_expression(&self) -> Option<String> {
        let expr = match self {
            Schedule::Preset(SchedulePreset::Daily) => format!("0 0 {} * * *", PRESET_HOUR),
            Schedule::Preset(SchedulePreset::Hourly) => "0 0 * * * *".to_string(),
            Schedule::Preset(SchedulePreset::Weekly(day)) => {
                format!("0 0 {} * * {}", PRESET_HOUR, day)
            }
            Schedule::Preset(SchedulePreset::Monthly(day)) => {
                format!("0 0 {} {} * *", PRESET_HOUR, day)
            }
            Schedule::Preset(SchedulePreset::Never) => return None,
            Schedule::Cron(expr) => expr.clone(),
        };
        Some(expr)
    }
}

/// Accept a 5-, 6- or 7-field cron expression and return it in the form
/// the `cron` crate parses
pub fn normalize_cron(expr: &str) -> Result<String, String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let normalized = match fields.len() {
        5 => format!("0 {}", fields.join(" ")),
        6 | 7 => fields.join(" "),
        n => {
            return Err(format!(
                "cron expression '{}' has {} fields, expected 5 or 6",
                expr, n
            ))
        }
    };

    cron::Schedule::from_str(&normalized)
        .map_err(|e| format!("invalid cron expression '{}': {}", expr, e))?;
    Ok(normalized)
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Split `name(arg)` into `("name", Some("arg"))`
fn split_call(value: &str) -> Result<(&str, Option<&str>), String> {
    match value.find('(') {
        Some(open) => {
            let inner = value[open + 1..]
                .strip_suffix(')')
                .ok_or_else(|| format!("unbalanced parenthesis in schedule '{}'", value))?;
            Ok((value[..open].trim(), Some(inner.trim())))
        }
        None => Ok((value, None)),
    }
}

impl FromStr for Schedule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        if value.is_empty() {
            return Err("schedule is empty".to_string());
        }

        let lowered = value.to_ascii_lowercase();
        let (name, arg) = split_call(&lowered)?;

        let preset = match (name, arg) {
            ("daily", None) => Some(SchedulePreset::Daily),
            ("hourly", None) => Some(SchedulePreset::Hourly),
            ("never", None) => Some(SchedulePreset::Never),
            ("weekly", None) => Some(SchedulePreset::Weekly(Weekday::Sun)),
            ("weekly", Some(day)) => Some(SchedulePreset::Weekly(
                day.parse::<Weekday>()
                    .map_err(|_| format!("unknown weekday '{}'", day))?,
            )),
            ("monthly", None) => Some(SchedulePreset::Monthly(1)),
            ("monthly", Some(day)) => {
                let day: u32 = day
                    .parse()
                    .map_err(|_| format!("invalid day of month '{}'", day))?;
                if !(1..=31).contains(&day) {
                    return Err(format!("day of month {} is out of range", day));
                }
                Some(SchedulePreset::Monthly(day))
            }
            ("daily" | "hourly" | "never", Some(_)) => {
                return Err(format!("schedule '{}' takes no argument", name))
            }
            _ => None,
        };

        match preset {
            Some(preset) => Ok(Schedule::Preset(preset)),
            None => normalize_cron(value).map(Schedule::Cron),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Preset(SchedulePreset::Daily) => f.write_str("daily"),
            Schedule::Preset(SchedulePreset::Hourly) => f.write_str("hourly"),
            Schedule::Preset(SchedulePreset::Never) => f.write_str("never"),
            Schedule::Preset(SchedulePreset::Weekly(day)) => {
                write!(f, "weekly({})", weekday_name(*day))
            }
            Schedule::Preset(SchedulePreset::Monthly(day)) => write!(f, "monthly({})", day),
            Schedule::Cron(expr) => f.write_str(expr),
        }
    }
}

impl TryFrom<String> for Schedule {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Schedule> for String {
    fn from(schedule: Schedule) -> Self {
        schedule.to_string()
    }
}
