use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::StartupError;

/// A single typed job parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum JobParameter {
    String(String),
    Long(i64),
    Double(f64),
    Date(DateTime<Utc>),
}

impl JobParameter {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Long(_) => "long",
            Self::Double(_) => "double",
            Self::Date(_) => "date",
        }
    }
}

impl fmt::Display for JobParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(value) => write!(f, "{value}"),
            Self::Long(value) => write!(f, "{value}"),
            Self::Double(value) => write!(f, "{value}"),
            Self::Date(value) => write!(f, "{}", value.to_rfc3339()),
        }
    }
}

/// Named parameter bag supplied at job start
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_string(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters
            .insert(name.into(), JobParameter::String(value.into()));
        self
    }

    pub fn add_long(mut self, name: impl Into<String>, value: i64) -> Self {
        self.parameters.insert(name.into(), JobParameter::Long(value));
        self
    }

    pub fn add_double(mut self, name: impl Into<String>, value: f64) -> Self {
        self.parameters
            .insert(name.into(), JobParameter::Double(value));
        self
    }

    pub fn add_date(mut self, name: impl Into<String>, value: DateTime<Utc>) -> Self {
        self.parameters.insert(name.into(), JobParameter::Date(value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&JobParameter> {
        self.parameters.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Read an optional date parameter; a value of another type is invalid
    pub fn get_date(&self, name: &str) -> Result<Option<DateTime<Utc>>, StartupError> {
        match self.parameters.get(name) {
            None => Ok(None),
            Some(JobParameter::Date(value)) => Ok(Some(*value)),
            Some(other) => Err(Self::type_mismatch(name, "date", other)),
        }
    }

    pub fn require_date(&self, name: &str) -> Result<DateTime<Utc>, StartupError> {
        self.get_date(name)?
            .ok_or_else(|| StartupError::MissingParameter {
                name: name.to_string(),
            })
    }

    pub fn get_long(&self, name: &str) -> Result<Option<i64>, StartupError> {
        match self.parameters.get(name) {
            None => Ok(None),
            Some(JobParameter::Long(value)) => Ok(Some(*value)),
            Some(other) => Err(Self::type_mismatch(name, "long", other)),
        }
    }

    pub fn get_string(&self, name: &str) -> Result<Option<&str>, StartupError> {
        match self.parameters.get(name) {
            None => Ok(None),
            Some(JobParameter::String(value)) => Ok(Some(value.as_str())),
            Some(other) => Err(Self::type_mismatch(name, "string", other)),
        }
    }

    /// Deterministic key identifying the job instance these parameters launch
    pub fn instance_key(&self) -> String {
        self.parameters
            .iter()
            .map(|(name, value)| format!("{name}={value}({})", value.type_name()))
            .collect::<Vec<_>>()
            .join(";")
    }

    fn type_mismatch(name: &str, expected: &str, actual: &JobParameter) -> StartupError {
        StartupError::InvalidParameter {
            name: name.to_string(),
            reason: format!("expected {expected}, got {}", actual.type_name()),
        }
    }
}

/// Startup check run before any partition is created
pub trait JobParametersValidator: Send + Sync {
    fn validate(&self, parameters: &JobParameters) -> Result<(), StartupError>;
}

/// Validator requiring a fixed set of parameter names to be present
#[derive(Debug, Clone, Default)]
pub struct RequiredParametersValidator {
    required: Vec<String>,
}

impl RequiredParametersValidator {
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
        }
    }
}

impl JobParametersValidator for RequiredParametersValidator {
    fn validate(&self, parameters: &JobParameters) -> Result<(), StartupError> {
        match self.required.iter().find(|name| !parameters.contains(name)) {
            Some(missing) => Err(StartupError::MissingParameter {
                name: missing.clone(),
            }),
            None => Ok(()),
        }
    }
}
