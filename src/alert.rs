//! Diagnostic alerts extracted from the model's reply
//!
//! Alerts are forwarded to the client exactly as parsed. [`Alert`] is a
//! permissive view used to decide how loudly to log them; nothing is rejected
//! because it does not fit.

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

/// Severity reported by the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertStatus {
    Normal,
    Warning,
    Critical,
    Unknown,
}

impl AlertStatus {
    fn parse(status: &str) -> Self {
        match status.trim().to_ascii_uppercase().as_str() {
            "NORMAL" => Self::Normal,
            "WARNING" => Self::Warning,
            "CRITICAL" => Self::Critical,
            _ => Self::Unknown,
        }
    }
}

/// Typed view of one assessment; every field is optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Alert {
    pub status: Option<String>,
    pub diagnosis: Option<String>,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub symptoms: Vec<String>,
    pub cpr_feedback: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Alert {
    /// Interpret a forwarded value, if it looks like an assessment at all.
    pub fn from_value(value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    pub fn status(&self) -> AlertStatus {
        self.status
            .as_deref()
            .map(AlertStatus::parse)
            .unwrap_or(AlertStatus::Unknown)
    }
}

/// Log a value on its way to the client.
pub fn log_alert(value: &Value) {
    let Some(alert) = Alert::from_value(value) else {
        info!("Forwarding value: {}", value);
        return;
    };

    let diagnosis = alert.diagnosis.as_deref().unwrap_or("-");
    let confidence = alert.confidence.unwrap_or_default();
    match alert.status() {
        AlertStatus::Critical => warn!(
            "CRITICAL: {} (confidence {:.2}, symptoms: {:?}, cpr: {})",
            diagnosis,
            confidence,
            alert.symptoms,
            alert.cpr_feedback.as_deref().unwrap_or("-")
        ),
        status => info!(
            "{:?}: {} (confidence {:.2})",
            status, diagnosis, confidence
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_alert_is_typed() {
        let value = json!({
            "status": "CRITICAL",
            "diagnosis": "Cardiac arrest",
            "confidence": 0.91,
            "symptoms": ["agonal breathing", "unresponsive"],
            "cpr_feedback": "INSTRUCT: START CPR NOW"
        });

        let alert = Alert::from_value(&value).unwrap();
        assert_eq!(alert.status(), AlertStatus::Critical);
        assert_eq!(alert.diagnosis.as_deref(), Some("Cardiac arrest"));
        assert_eq!(alert.symptoms.len(), 2);
        assert_eq!(alert.cpr_feedback.as_deref(), Some("INSTRUCT: START CPR NOW"));
        assert!(alert.extra.is_empty());
    }

    #[test]
    fn test_partial_alert_is_accepted() {
        let value = json!({"status": "warning", "heart_rate": 130});

        let alert = Alert::from_value(&value).unwrap();
        assert_eq!(alert.status(), AlertStatus::Warning);
        assert!(alert.diagnosis.is_none());
        assert!(alert.symptoms.is_empty());
        assert_eq!(alert.extra["heart_rate"], 130);
    }

    #[test]
    fn test_unrecognised_values() {
        assert_eq!(
            Alert::from_value(&json!({"status": "PANIC"})).unwrap().status(),
            AlertStatus::Unknown
        );
        assert!(Alert::from_value(&json!(42)).is_none());
        assert!(Alert::from_value(&json!({"symptoms": 3})).is_none());
    }
}
