use chrono::{DateTime, Duration, Timelike, Utc};

pub const ARCHIVE_BASE_URL: &str = "https://data.gharchive.org";

/// GitHub Archive dump files covering the range, one per day. The first file
/// starts at the hour of `after`; each following day starts at hour 0.
pub fn archive_urls(after: DateTime<Utc>, before: DateTime<Utc>) -> Vec<String> {
    let days_between = (before - after).num_days();
    let first_day = after.date_naive();

    let mut urls = vec![archive_url(&first_day.format("%Y-%m-%d").to_string(), after.hour())];
    for offset in 1..=days_between {
        if let Some(day) = first_day.checked_add_signed(Duration::days(offset)) {
            urls.push(archive_url(&day.format("%Y-%m-%d").to_string(), 0));
        }
    }
    urls
}

fn archive_url(day: &str, hour: u32) -> String {
    format!("{}/{}-{}.json.gz", ARCHIVE_BASE_URL, day, hour)
}
