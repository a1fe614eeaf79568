use std::str::FromStr;

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;

use crate::{humanize_elapsed, Stage};

/// Format of the server's `creationDate` field (always UTC).
pub const CREATION_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

const MONEY_SCALE: u32 = 2;

/// A render job as reported by the server.
///
/// Money and time fields are for display only; the only field that drives
/// control flow is `stage`.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    id: String,
    /// Position in the fetch response.
    pub number: usize,
    pub name: String,
    pub project_name: Option<String>,
    pub display_name: String,
    pub description: String,
    pub created_at: Option<DateTime<Local>>,
    /// `created_at` rendered relative to the moment the job was built.
    pub created: String,
    pub stage: Stage,
    pub progress: String,
    pub cost_estimation: Decimal,
    pub cost: Decimal,
    /// Milliseconds.
    pub time_estimation: f64,
    /// Milliseconds.
    pub time: f64,
    pub preview_link: String,
}

impl Job {
    /// Builds a job from one element of the `GET /project` response.
    ///
    /// Returns `None` if the element is not an object or has no usable `id`.
    /// Every other field degrades to a default instead of failing.
    pub fn from_payload(raw: &Value, index: usize) -> Option<Self> {
        Self::from_payload_at(raw, index, Utc::now())
    }

    /// Same as [`Job::from_payload`] with an explicit clock.
    pub fn from_payload_at(raw: &Value, index: usize, now: DateTime<Utc>) -> Option<Self> {
        let fields = raw.as_object()?;
        let id = match fields.get("id")? {
            Value::String(id) => id.clone(),
            Value::Number(id) => id.to_string(),
            _ => return None,
        };

        let name = text_field(raw, "name").unwrap_or_default();
        let project_name = text_field(raw, "project");
        let stage = raw
            .get("stage")
            .and_then(Value::as_str)
            .map(Stage::from_server)
            .unwrap_or_default();
        let progress = match raw.get("progress") {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Number(number)) => number.to_string(),
            _ => String::new(),
        };
        let cost_estimation = parse_money(raw.get("costEst"));
        let cost = parse_money(raw.get("cost"));
        let time_estimation = float_field(raw, "timeEst");
        let time = float_field(raw, "time");
        let preview_link = text_field(raw, "preview").unwrap_or_default();

        let created_at = raw
            .get("creationDate")
            .and_then(Value::as_str)
            .and_then(parse_creation_date);
        let created = created_at
            .as_ref()
            .map(|at| humanize_elapsed(at, &now))
            .unwrap_or_else(|| "unknown".to_string());

        let description = format!(
            "Job {index}\nCreated: {created}\nProject: {}\nStage: {stage}\nProgress: {progress}\n\
             Cost Estimation: ${cost_estimation}\nCost: {cost}\nTime Estimation: {time_estimation}\nTime: {time}",
            project_name.as_deref().unwrap_or("-"),
        );

        Some(Self {
            display_name: format!("\"{name}\" {created}"),
            id,
            number: index,
            name,
            project_name,
            description,
            created_at,
            created,
            stage,
            progress,
            cost_estimation,
            cost,
            time_estimation,
            time,
            preview_link,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Parses a money amount quantized to two fractional digits with banker's
/// rounding. Anything unparsable becomes `0.00`.
pub fn parse_money(value: Option<&Value>) -> Decimal {
    let parsed = match value {
        None | Some(Value::Null) => Some(Decimal::ZERO),
        Some(Value::Number(number)) => decimal_from_text(&number.to_string()),
        Some(Value::String(text)) => decimal_from_text(text.trim()),
        Some(_) => None,
    };

    let mut amount = parsed
        .unwrap_or(Decimal::ZERO)
        .round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointNearestEven);
    amount.rescale(MONEY_SCALE);
    amount
}

fn decimal_from_text(text: &str) -> Option<Decimal> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

fn parse_creation_date(text: &str) -> Option<DateTime<Local>> {
    NaiveDateTime::parse_from_str(text, CREATION_DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc().with_timezone(&Local))
}

fn text_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key).and_then(Value::as_str).map(ToOwned::to_owned)
}

fn float_field(raw: &Value, key: &str) -> f64 {
    match raw.get(key) {
        Some(Value::Number(number)) => number.as_f64().unwrap_or(0.0),
        Some(Value::String(text)) => text.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn money_accepts_numbers_and_numeric_strings() {
        assert_eq!(parse_money(Some(&json!(3))).to_string(), "3.00");
        assert_eq!(parse_money(Some(&json!("4.5"))).to_string(), "4.50");
        assert_eq!(parse_money(Some(&json!("1e2"))).to_string(), "100.00");
    }

    #[test]
    fn money_falls_back_to_zero() {
        assert_eq!(parse_money(None).to_string(), "0.00");
        assert_eq!(parse_money(Some(&Value::Null)).to_string(), "0.00");
        assert_eq!(parse_money(Some(&json!("twelve"))).to_string(), "0.00");
        assert_eq!(parse_money(Some(&json!([1, 2]))).to_string(), "0.00");
    }

    #[test]
    fn non_objects_and_missing_ids_are_rejected() {
        assert!(Job::from_payload(&json!("j1"), 0).is_none());
        assert!(Job::from_payload(&json!({"name": "x"}), 0).is_none());
        assert!(Job::from_payload(&json!({"id": null}), 0).is_none());
    }
}
