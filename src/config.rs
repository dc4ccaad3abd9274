use std::str::FromStr;
use std::time::Duration;

use chrono::{Local, LocalResult, TimeZone, Utc};
use chrono_tz::Tz;
use clap::Parser;

#[derive(Parser, Clone, Debug)]
pub struct CliParams {
    /// Backend endpoint serving the dashboard API
    #[clap(
        long = "endpoint",
        env = "TRADE_BOARD_ENDPOINT",
        default_value = "http://127.0.0.1:5000"
    )]
    pub endpoint: String,

    /// Market price poll interval (e.g., 5s, 30s, 1m)
    #[clap(long = "market-interval", value_name = "DURATION", default_value = "5s")]
    pub market_interval: DurationSpec,

    /// Portfolio/position/trade poll interval (e.g., 10s, 1m)
    #[clap(
        long = "portfolio-interval",
        value_name = "DURATION",
        default_value = "10s"
    )]
    pub portfolio_interval: DurationSpec,

    /// Display timezone for chart labels and trade times (IANA name, or "local")
    #[clap(
        long = "timezone",
        env = "TRADE_BOARD_TZ",
        default_value = "Asia/Shanghai"
    )]
    pub timezone: TimeZoneSpec,

    /// How many recent trades to fetch per refresh
    #[clap(long = "trades-limit", default_value_t = 50)]
    pub trades_limit: usize,

    /// How many recent AI conversations to fetch per refresh
    #[clap(long = "conversations-limit", default_value_t = 20)]
    pub conversations_limit: usize,
}

impl CliParams {
    pub fn base_url(&self) -> String {
        normalize_endpoint(&self.endpoint)
    }

    pub fn display_timezone(&self) -> ConfiguredTimeZone {
        self.timezone.0
    }
}

#[derive(Copy, Clone, Debug)]
pub struct DurationSpec(Duration);

impl DurationSpec {
    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl FromStr for DurationSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_duration_spec(s).map(DurationSpec)
    }
}

fn parse_duration_spec(input: &str) -> Result<Duration, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("duration spec cannot be empty (examples: 5s, 30s, 1m)".to_string());
    }
    let unit_idx = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .ok_or_else(|| "duration spec must end with a unit like s, m, or h".to_string())?;
    if unit_idx == 0 {
        return Err("duration spec must start with a number (examples: 5s, 1m)".to_string());
    }
    let (value_part, unit_part) = trimmed.split_at(unit_idx);
    let value: f64 = value_part
        .parse()
        .map_err(|_| format!("invalid numeric portion `{value_part}` in `{trimmed}`"))?;
    let multiplier = match unit_part.trim().to_lowercase().as_str() {
        "s" | "sec" | "secs" | "second" | "seconds" => 1.0,
        "m" | "min" | "mins" | "minute" | "minutes" => 60.0,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3_600.0,
        other => return Err(format!("unsupported duration unit `{other}` (use s, m, or h)")),
    };
    let seconds = value * multiplier;
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(format!("duration must be positive: `{trimmed}`"));
    }
    Ok(Duration::from_secs_f64(seconds))
}

pub fn normalize_endpoint(value: &str) -> String {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "http://127.0.0.1:5000".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Fixed display timezone for everything the user sees. Wire instants are
/// UTC; converting anywhere but here produces misaligned labels.
#[derive(Copy, Clone, Debug)]
pub enum ConfiguredTimeZone {
    Local,
    Named(Tz),
}

impl ConfiguredTimeZone {
    pub fn format_timestamp(&self, timestamp_ms: i64, fmt: &str) -> Option<String> {
        let utc = match Utc.timestamp_millis_opt(timestamp_ms) {
            LocalResult::Single(dt) => dt,
            _ => return None,
        };
        let formatted = match self {
            ConfiguredTimeZone::Local => utc.with_timezone(&Local).format(fmt).to_string(),
            ConfiguredTimeZone::Named(tz) => utc.with_timezone(tz).format(fmt).to_string(),
        };
        Some(formatted)
    }

    /// Short "HH:MM" label used on chart axes.
    pub fn time_label(&self, timestamp_ms: i64) -> String {
        self.format_timestamp(timestamp_ms, "%H:%M")
            .unwrap_or_else(|| "--:--".to_string())
    }

    pub fn datetime_label(&self, timestamp_ms: i64) -> String {
        self.format_timestamp(timestamp_ms, "%m-%d %H:%M:%S")
            .unwrap_or_else(|| "--".to_string())
    }
}

#[derive(Copy, Clone, Debug)]
pub struct TimeZoneSpec(ConfiguredTimeZone);

impl FromStr for TimeZoneSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("local") {
            return Ok(TimeZoneSpec(ConfiguredTimeZone::Local));
        }
        let tz = trimmed
            .parse::<Tz>()
            .map_err(|_| format!("unknown timezone `{trimmed}` (use an IANA name or `local`)"))?;
        Ok(TimeZoneSpec(ConfiguredTimeZone::Named(tz)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_spec() {
        assert_eq!(parse_duration_spec("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration_spec("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(
            parse_duration_spec("1.5m").unwrap(),
            Duration::from_secs(90)
        );
        assert_eq!(parse_duration_spec("2h").unwrap(), Duration::from_secs(7_200));
        assert!(parse_duration_spec("").is_err());
        assert!(parse_duration_spec("10").is_err());
        assert!(parse_duration_spec("s").is_err());
        assert!(parse_duration_spec("0s").is_err());
        assert!(parse_duration_spec("3d").is_err());
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(
            normalize_endpoint("http://localhost:5000/"),
            "http://localhost:5000"
        );
        assert_eq!(
            normalize_endpoint("  http://host:8080//  "),
            "http://host:8080"
        );
        assert_eq!(normalize_endpoint(""), "http://127.0.0.1:5000");
    }

    #[test]
    fn test_timezone_spec_parses_iana_names() {
        assert!(matches!(
            "Asia/Shanghai".parse::<TimeZoneSpec>(),
            Ok(TimeZoneSpec(ConfiguredTimeZone::Named(_)))
        ));
        assert!(matches!(
            "local".parse::<TimeZoneSpec>(),
            Ok(TimeZoneSpec(ConfiguredTimeZone::Local))
        ));
        assert!("Mars/Olympus".parse::<TimeZoneSpec>().is_err());
    }

    #[test]
    fn test_fixed_timezone_formats_utc_instants() {
        let tz = ConfiguredTimeZone::Named(chrono_tz::Asia::Shanghai);
        // 2024-01-02 04:30:00 UTC is 12:30 in Shanghai.
        assert_eq!(tz.time_label(1_704_169_800_000), "12:30");
        assert_eq!(tz.datetime_label(1_704_169_800_000), "01-02 12:30:00");
    }
}
