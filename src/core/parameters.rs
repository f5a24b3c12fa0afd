use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the parameter added by [`JobParameters::unique`].
pub const RUN_ID_KEY: &str = "run.id";

/// Typed value of a job parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    String(String),
    Long(i64),
    Double(f64),
    Date(DateTime<Utc>),
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::String(value) => write!(f, "{}(string)", value),
            ParameterValue::Long(value) => write!(f, "{}(long)", value),
            ParameterValue::Double(value) => write!(f, "{}(double)", value),
            ParameterValue::Date(value) => write!(f, "{}(date)", value.to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    pub value: ParameterValue,
    /// Identifying parameters distinguish one job instance from another.
    pub identifying: bool,
}

/// Parameters of a job launch.
///
/// The identifying parameters, together with the job name, form the identity
/// of a [`JobInstance`](crate::core::job::JobInstance): launching twice with
/// the same identifying values targets the same instance.
///
/// # Examples
///
/// ```
/// use chunk_batch::core::parameters::JobParameters;
///
/// let parameters = JobParameters::new()
///     .add_string("pick", "RED")
///     .add_long("page.size", 10)
///     .add_non_identifying_string("requested.by", "cron");
///
/// assert_eq!(parameters.job_key(), "page.size=10(long);pick=RED(string)");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameters holding a single random run id, so every launch creates a new instance.
    pub fn unique() -> Self {
        Self::new().add_string(RUN_ID_KEY, &Uuid::new_v4().to_string())
    }

    pub fn add(mut self, key: &str, value: ParameterValue, identifying: bool) -> Self {
        self.parameters
            .insert(key.to_string(), JobParameter { value, identifying });
        self
    }

    pub fn add_string(self, key: &str, value: &str) -> Self {
        self.add(key, ParameterValue::String(value.to_string()), true)
    }

    pub fn add_non_identifying_string(self, key: &str, value: &str) -> Self {
        self.add(key, ParameterValue::String(value.to_string()), false)
    }

    pub fn add_long(self, key: &str, value: i64) -> Self {
        self.add(key, ParameterValue::Long(value), true)
    }

    pub fn add_double(self, key: &str, value: f64) -> Self {
        self.add(key, ParameterValue::Double(value), true)
    }

    pub fn add_date(self, key: &str, value: DateTime<Utc>) -> Self {
        self.add(key, ParameterValue::Date(value), true)
    }

    pub fn get(&self, key: &str) -> Option<&ParameterValue> {
        self.parameters.get(key).map(|parameter| &parameter.value)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(ParameterValue::String(value)) => Some(value),
            _ => None,
        }
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(ParameterValue::Long(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Canonical string of the identifying parameters, sorted by key.
    pub fn job_key(&self) -> String {
        self.parameters
            .iter()
            .filter(|(_, parameter)| parameter.identifying)
            .map(|(key, parameter)| format!("{}={}", key, parameter.value))
            .collect::<Vec<_>>()
            .join(";")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_key_ignores_order_and_non_identifying_values() {
        let first = JobParameters::new()
            .add_string("b", "2")
            .add_long("a", 1)
            .add_non_identifying_string("user", "alice");
        let second = JobParameters::new()
            .add_long("a", 1)
            .add_string("b", "2")
            .add_non_identifying_string("user", "bob");

        assert_eq!(first.job_key(), second.job_key());
        assert_eq!(first.job_key(), "a=1(long);b=2(string)");
    }

    #[test]
    fn values_of_different_types_give_different_keys() {
        let as_long = JobParameters::new().add_long("id", 1);
        let as_string = JobParameters::new().add_string("id", "1");
        assert_ne!(as_long.job_key(), as_string.job_key());
    }

    #[test]
    fn unique_parameters_never_collide() {
        assert_ne!(JobParameters::unique().job_key(), JobParameters::unique().job_key());
    }

    #[test]
    fn typed_getters() {
        let parameters = JobParameters::new().add_string("pick", "RED").add_long("size", 10);
        assert_eq!(parameters.get_string("pick"), Some("RED"));
        assert_eq!(parameters.get_long("size"), Some(10));
        assert_eq!(parameters.get_long("pick"), None);
        assert!(JobParameters::new().job_key().is_empty());
    }
}
