use std::num::IntErrorKind;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;
use tracing::debug;

use crate::catalog::EventTypeSource;
use crate::params::{CommandParams, QueryParams};

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Bounds applied to a request before anything is sent to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_days_between: i64,
    pub max_output_count: u32,
    /// Server-side wait hint handed to the backend; never enforced locally.
    pub max_millis: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_days_between: 60,
            max_output_count: 20,
            max_millis: 5000,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("could not parse {field} datetime '{value}', expected 'YYYY-MM-DD HH:MM:SS'")]
    UnparseableDate { field: &'static str, value: String },
    #[error("start time {after} is greater than or equal to end time {before}")]
    StartNotBeforeEnd { after: String, before: String },
    #[error("too many days [{days}] between start and end, the maximum is {max}")]
    RangeTooLong { days: i64, max: i64 },
    #[error("could not load the event type list from {origin}: {reason}")]
    CatalogUnavailable { origin: String, reason: String },
    #[error("the event type list from {origin} is empty")]
    CatalogEmpty { origin: String },
    #[error("could not find the event [{0}] in the current list of event types")]
    UnknownEvent(String),
    #[error("output count '{0}' must be a valid number")]
    CountNotNumeric(String),
    #[error("output count {count} must be between 1 and {max}")]
    CountOutOfRange { count: i64, max: u32 },
    /// A whole number too large in magnitude to hold, so out of range as well.
    #[error("output count {value} must be between 1 and {max}")]
    CountOverflow { value: String, max: u32 },
}

pub struct InputValidator<'a> {
    limits: Limits,
    catalog: &'a dyn EventTypeSource,
}

impl<'a> InputValidator<'a> {
    pub fn new(limits: Limits, catalog: &'a dyn EventTypeSource) -> Self {
        Self { limits, catalog }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Run every check in order (dates, event name, count), stopping at the
    /// first failure.
    pub fn validate(&self, params: &CommandParams) -> Result<QueryParams, ValidationError> {
        debug!(component = "validator", action = "start", "Validating arguments");

        let result = self.validate_all(params);
        match &result {
            Ok(_) => debug!(
                component = "validator",
                action = "complete",
                "Supplied arguments are valid"
            ),
            Err(e) => debug!(
                component = "validator",
                action = "complete",
                reason = %e,
                "At least one supplied argument is invalid"
            ),
        }
        result
    }

    pub fn is_valid(&self, params: &CommandParams) -> bool {
        self.validate(params).is_ok()
    }

    fn validate_all(&self, params: &CommandParams) -> Result<QueryParams, ValidationError> {
        let (after, before) = self.validate_date_times(&params.after, &params.before)?;
        let event_name = self.validate_event_name(&params.event_name)?;
        let output_count = self.validate_output_count(&params.output_count)?;

        Ok(QueryParams {
            after,
            before,
            event_name,
            output_count,
        })
    }

    pub fn validate_date_times(
        &self,
        after: &str,
        before: &str,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), ValidationError> {
        let after_time = parse_datetime(after).ok_or_else(|| {
            let e = ValidationError::UnparseableDate {
                field: "after",
                value: after.to_string(),
            };
            debug!(component = "validator", check = "dates", reason = %e, "Date check failed");
            e
        })?;
        let before_time = parse_datetime(before).ok_or_else(|| {
            let e = ValidationError::UnparseableDate {
                field: "before",
                value: before.to_string(),
            };
            debug!(component = "validator", check = "dates", reason = %e, "Date check failed");
            e
        })?;

        if after_time >= before_time {
            let e = ValidationError::StartNotBeforeEnd {
                after: after.trim().to_string(),
                before: before.trim().to_string(),
            };
            debug!(component = "validator", check = "dates", reason = %e, "Date check failed");
            return Err(e);
        }

        let days = (before_time - after_time).num_days();
        if days > self.limits.max_days_between {
            let e = ValidationError::RangeTooLong {
                days,
                max: self.limits.max_days_between,
            };
            debug!(component = "validator", check = "dates", reason = %e, "Date check failed");
            return Err(e);
        }

        debug!(
            component = "validator",
            check = "dates",
            days_between = days,
            "Your after and before times are valid"
        );
        Ok((after_time, before_time))
    }

    /// Look the name up in a freshly fetched catalog and return the catalog's
    /// spelling of it.
    pub fn validate_event_name(&self, event_name: &str) -> Result<String, ValidationError> {
        let origin = self.catalog.describe();
        let catalog = self.catalog.fetch().map_err(|err| {
            let e = ValidationError::CatalogUnavailable {
                origin: origin.clone(),
                reason: err.to_string(),
            };
            debug!(component = "validator", check = "event_name", reason = %e, "Event name check failed");
            e
        })?;

        if catalog.is_empty() {
            let e = ValidationError::CatalogEmpty { origin };
            debug!(component = "validator", check = "event_name", reason = %e, "Event name check failed");
            return Err(e);
        }

        debug!(
            component = "validator",
            check = "event_name",
            origin = %origin,
            event_types = ?catalog.names().collect::<Vec<_>>(),
            "Validating event name against the current event list"
        );

        let Some(resolved) = catalog.resolve(event_name) else {
            let e = ValidationError::UnknownEvent(event_name.to_string());
            debug!(component = "validator", check = "event_name", reason = %e, "Event name check failed");
            return Err(e);
        };

        debug!(
            component = "validator",
            check = "event_name",
            event_name,
            resolved,
            "Your event type is valid"
        );
        Ok(resolved.to_string())
    }

    pub fn validate_output_count(&self, output_count: &str) -> Result<u32, ValidationError> {
        let max = self.limits.max_output_count;
        let count: i64 = output_count.trim().parse().map_err(|err: std::num::ParseIntError| {
            let e = match err.kind() {
                IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => ValidationError::CountOverflow {
                    value: output_count.trim().to_string(),
                    max,
                },
                _ => ValidationError::CountNotNumeric(output_count.to_string()),
            };
            debug!(component = "validator", check = "output_count", reason = %e, "Output count check failed");
            e
        })?;

        let out_of_range = ValidationError::CountOutOfRange { count, max };
        if count <= 0 || count > i64::from(max) {
            debug!(component = "validator", check = "output_count", reason = %out_of_range, "Output count check failed");
            return Err(out_of_range);
        }
        let count = u32::try_from(count).map_err(|_| out_of_range)?;

        debug!(
            component = "validator",
            check = "output_count",
            output_count = count,
            "Your output count is valid"
        );
        Ok(count)
    }
}

/// Parse a calendar timestamp; naive values are taken as UTC.
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(time) = DateTime::parse_from_rfc3339(raw) {
        return Some(time.with_timezone(&Utc));
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}
