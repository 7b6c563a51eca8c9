use std::{env, fmt::Display, str::FromStr};

use chrono::{NaiveTime, Weekday};
use dotenvy::dotenv;

use crate::rules::{holiday::parse_weekday, worktime::WorkPolicy};

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_addr: String,
    pub access_token_ttl: usize,
    pub refresh_token_ttl: usize,
    pub run_migrations: bool,
    pub log_dir: String,

    // Rate limiting
    pub rate_login_per_min: u32,
    pub rate_refresh_per_min: u32,
    pub rate_protected_per_min: u32,

    pub api_prefix: String,

    // Timecard rules
    pub rounding_unit_min: u32,
    pub day_change_hour: u32,
    pub standard_work_min: i64,
    pub late_night_start: NaiveTime,
    pub late_night_end: NaiveTime,
    pub edit_tolerance_min: i64,
    pub overtime_tolerance_min: i64,
    pub legal_holiday_weekday: Option<Weekday>,
    pub company_holiday_weekdays: Vec<Weekday>,
}

fn required(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} must be set"))
}

fn or_default<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .unwrap_or_else(|e| panic!("Environment misconfigured: {key}={raw} ({e})"))
}

pub(crate) fn parse_clock(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

fn clock_or_default(key: &str, default: &str) -> NaiveTime {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    parse_clock(&raw).unwrap_or_else(|| panic!("Environment misconfigured: {key}={raw}, expected HH:MM"))
}

/// `none` (or an empty value) switches the weekly legal holiday off.
pub(crate) fn parse_weekday_opt(raw: &str) -> Result<Option<Weekday>, String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    parse_weekday(raw)
        .map(Some)
        .ok_or_else(|| format!("unknown weekday '{raw}'"))
}

pub(crate) fn parse_weekday_list(raw: &str) -> Result<Vec<Weekday>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_weekday(s).ok_or_else(|| format!("unknown weekday '{s}'")))
        .collect()
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let day_change_hour: u32 = or_default("DAY_CHANGE_HOUR", "5");
        if day_change_hour > 23 {
            panic!("Environment misconfigured: DAY_CHANGE_HOUR must be 0-23");
        }

        let legal = env::var("LEGAL_HOLIDAY_WEEKDAY").unwrap_or_else(|_| "Sun".to_string());
        let company = env::var("COMPANY_HOLIDAY_WEEKDAYS").unwrap_or_else(|_| "Sat".to_string());

        Self {
            server_addr: required("SERVER_ADDR"),
            database_url: required("DATABASE_URL"),
            jwt_secret: required("JWT_SECRET"),
            access_token_ttl: or_default("ACCESS_TOKEN_TTL", "900"), // default 15 min
            refresh_token_ttl: or_default("REFRESH_TOKEN_TTL", "604800"), // default 7 days
            run_migrations: or_default("RUN_MIGRATIONS", "false"),
            log_dir: env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()),

            rate_login_per_min: or_default("RATE_LOGIN_PER_MIN", "60"),
            rate_refresh_per_min: or_default("RATE_REFRESH_PER_MIN", "30"),
            rate_protected_per_min: or_default("RATE_PROTECTED_PER_MIN", "1000"),

            api_prefix: env::var("API_PREFIX").unwrap_or_else(|_| "/api".to_string()),

            rounding_unit_min: or_default("ROUNDING_UNIT_MIN", "15"),
            day_change_hour,
            standard_work_min: or_default("STANDARD_WORK_MIN", "480"),
            late_night_start: clock_or_default("LATE_NIGHT_START", "22:00"),
            late_night_end: clock_or_default("LATE_NIGHT_END", "05:00"),
            edit_tolerance_min: or_default("EDIT_TOLERANCE_MIN", "0"),
            overtime_tolerance_min: or_default("OVERTIME_TOLERANCE_MIN", "0"),
            legal_holiday_weekday: parse_weekday_opt(&legal)
                .unwrap_or_else(|e| panic!("Environment misconfigured: LEGAL_HOLIDAY_WEEKDAY: {e}")),
            company_holiday_weekdays: parse_weekday_list(&company).unwrap_or_else(|e| {
                panic!("Environment misconfigured: COMPANY_HOLIDAY_WEEKDAYS: {e}")
            }),
        }
    }

    pub fn work_policy(&self) -> WorkPolicy {
        WorkPolicy {
            rounding_unit: self.rounding_unit_min,
            day_change_hour: self.day_change_hour,
            standard_minutes: self.standard_work_min,
            late_night_start: self.late_night_start,
            late_night_end: self.late_night_end,
        }
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Self {
        Config {
            database_url: "mysql://localhost/timecard_test".to_string(),
            jwt_secret: "test-secret".to_string(),
            server_addr: "127.0.0.1:0".to_string(),
            access_token_ttl: 60,
            refresh_token_ttl: 120,
            run_migrations: false,
            log_dir: "logs".to_string(),
            rate_login_per_min: 60,
            rate_refresh_per_min: 30,
            rate_protected_per_min: 1000,
            api_prefix: "/api".to_string(),
            rounding_unit_min: 15,
            day_change_hour: 5,
            standard_work_min: 480,
            late_night_start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            late_night_end: NaiveTime::from_hms_opt(5, 0, 0).unwrap(),
            edit_tolerance_min: 0,
            overtime_tolerance_min: 0,
            legal_holiday_weekday: Some(Weekday::Sun),
            company_holiday_weekdays: vec![Weekday::Sat],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_values() {
        assert_eq!(parse_clock("22:00"), NaiveTime::from_hms_opt(22, 0, 0));
        assert_eq!(parse_clock(" 05:30 "), NaiveTime::from_hms_opt(5, 30, 0));
        assert_eq!(parse_clock("25:00"), None);
    }

    #[test]
    fn weekday_settings() {
        assert_eq!(parse_weekday_opt("Sun"), Ok(Some(Weekday::Sun)));
        assert_eq!(parse_weekday_opt("none"), Ok(None));
        assert_eq!(parse_weekday_opt(""), Ok(None));
        assert!(parse_weekday_opt("Funday").is_err());

        assert_eq!(
            parse_weekday_list("Sat, sun"),
            Ok(vec![Weekday::Sat, Weekday::Sun])
        );
        assert_eq!(parse_weekday_list(""), Ok(vec![]));
        assert!(parse_weekday_list("Sat,Blursday").is_err());
    }

    #[test]
    #[should_panic(expected = "Environment misconfigured: TIMECARD_TEST_BAD_LIMIT=lots")]
    fn malformed_value_names_the_variable() {
        // unique key, no other test reads it
        unsafe { env::set_var("TIMECARD_TEST_BAD_LIMIT", "lots") };
        let _: u32 = or_default("TIMECARD_TEST_BAD_LIMIT", "60");
    }

    #[test]
    fn missing_value_falls_back_to_default() {
        let limit: u32 = or_default("TIMECARD_TEST_UNSET_LIMIT", "60");
        assert_eq!(limit, 60);
    }
}
