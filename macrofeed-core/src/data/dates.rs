//! Calendar helpers: period-code stamping conventions and lenient date parsing.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};

pub const ISO_FORMAT: &str = "%Y-%m-%d";

pub fn to_iso(date: NaiveDate) -> String {
    date.format(ISO_FORMAT).to_string()
}

/// Strict `YYYY-MM-DD`.
pub fn parse_iso(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), ISO_FORMAT).ok()
}

/// Lenient parse covering the shapes providers actually emit.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    if let Some(d) = parse_iso(t) {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(t, fmt) {
            return Some(dt.date());
        }
    }
    for fmt in ["%Y/%m/%d", "%Y%m%d", "%Y.%m.%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(t, fmt) {
            return Some(d);
        }
    }
    // `YYYY-MM` means the first of that month.
    if t.len() == 7 {
        return NaiveDate::parse_from_str(&format!("{t}-01"), ISO_FORMAT).ok();
    }
    None
}

/// December 31 of `year`.
pub fn year_end(year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 12, 31)
}

/// First day of the month after (`year`, `month`); December rolls into
/// January of the next year.
pub fn first_of_following_month(year: i32, month: u32) -> Option<NaiveDate> {
    if !(1..=12).contains(&month) {
        return None;
    }
    if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
}

/// Quarter `q` of `year` stamped on the first day of the month after the
/// quarter ends (Q4 rolls into January of the next year).
pub fn quarter_stamp(year: i32, quarter: u32) -> Option<NaiveDate> {
    if !(1..=4).contains(&quarter) {
        return None;
    }
    first_of_following_month(year, quarter * 3)
}

/// Stamp for a `year`/`period` triple where period is `M##` or `Q#`.
///
/// The period is stamped on the first day of the following month, except
/// when that following month is January: the stamp then stays on December 1
/// of the reference year instead of rolling forward. This differs from
/// [`first_of_following_month`] on purpose.
pub fn triple_period_stamp(year: i32, period: &str) -> Option<NaiveDate> {
    let period = period.trim();
    let month = match period.chars().next()? {
        'M' | 'm' => period[1..].parse::<u32>().ok()?,
        'Q' | 'q' => period[1..].parse::<u32>().ok().filter(|q| (1..=4).contains(q))? * 3,
        _ => return None,
    };
    if !(1..=12).contains(&month) {
        return None;
    }
    if month == 12 {
        NaiveDate::from_ymd_opt(year, 12, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
}

const MONTH_NAMES: [&str; 12] = [
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december",
];

/// Month number for `Jan`, `Sept`, `January` and any other prefix of at
/// least three letters.
fn month_from_name(name: &str) -> Option<u32> {
    let name = name.to_ascii_lowercase();
    if name.len() < 3 {
        return None;
    }
    MONTH_NAMES
        .iter()
        .position(|full| full.starts_with(&name))
        .map(|i| i as u32 + 1)
}

/// `Jan_2020` style token stamped on the first day of the following month.
pub fn month_token_stamp(token: &str) -> Option<NaiveDate> {
    let (mon, year) = token.trim().split_once('_')?;
    let year: i32 = year.parse().ok()?;
    first_of_following_month(year, month_from_name(mon)?)
}

/// Every day from `start` to `end`, both inclusive. Empty when `start > end`.
pub fn calendar(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    let days = (end - start).num_days();
    (0..=days.max(-1)).map(move |offset| start + Duration::days(offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        parse_iso(s).unwrap()
    }

    #[test]
    fn lenient_parse_variants() {
        assert_eq!(parse_date("2024-03-05"), Some(d("2024-03-05")));
        assert_eq!(parse_date("2024-03-05 00:00:00"), Some(d("2024-03-05")));
        assert_eq!(parse_date("2024-03-05T10:00:00Z"), Some(d("2024-03-05")));
        assert_eq!(parse_date("2024/03/05"), Some(d("2024-03-05")));
        assert_eq!(parse_date("20240305"), Some(d("2024-03-05")));
        assert_eq!(parse_date("2024-03"), Some(d("2024-03-01")));
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn following_month_rolls_december() {
        assert_eq!(first_of_following_month(2020, 1), Some(d("2020-02-01")));
        assert_eq!(first_of_following_month(2020, 12), Some(d("2021-01-01")));
        assert_eq!(first_of_following_month(2020, 13), None);
    }

    #[test]
    fn quarters_stamp_after_quarter_end() {
        assert_eq!(quarter_stamp(2020, 1), Some(d("2020-04-01")));
        assert_eq!(quarter_stamp(2020, 3), Some(d("2020-10-01")));
        assert_eq!(quarter_stamp(2020, 4), Some(d("2021-01-01")));
        assert_eq!(quarter_stamp(2020, 5), None);
    }

    #[test]
    fn triple_periods_keep_december_in_reference_year() {
        assert_eq!(triple_period_stamp(2020, "M01"), Some(d("2020-02-01")));
        assert_eq!(triple_period_stamp(2020, "M11"), Some(d("2020-12-01")));
        assert_eq!(triple_period_stamp(2020, "M12"), Some(d("2020-12-01")));
        assert_eq!(triple_period_stamp(2020, "Q1"), Some(d("2020-04-01")));
        assert_eq!(triple_period_stamp(2020, "Q4"), Some(d("2020-12-01")));
        assert_eq!(triple_period_stamp(2020, "M13"), None);
        assert_eq!(triple_period_stamp(2020, "A01"), None);
    }

    #[test]
    fn month_tokens() {
        assert_eq!(month_token_stamp("Jan_2020"), Some(d("2020-02-01")));
        assert_eq!(month_token_stamp("Dec_2020"), Some(d("2021-01-01")));
        assert_eq!(month_token_stamp("Foo_2020"), None);
        assert_eq!(month_token_stamp("Sept_2020"), Some(d("2020-10-01")));
        assert_eq!(month_token_stamp("January_2020"), Some(d("2020-02-01")));
        assert_eq!(month_token_stamp("Ju_2020"), None);
    }

    #[test]
    fn calendar_is_inclusive() {
        let days: Vec<_> = calendar(d("2024-02-27"), d("2024-03-01")).collect();
        assert_eq!(days.len(), 4);
        assert_eq!(days[2], d("2024-02-29"));
        assert_eq!(calendar(d("2024-03-02"), d("2024-03-01")).count(), 0);
    }
}
