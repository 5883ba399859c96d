use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::filter::{FilterField, FilterFields, SimpleDate};

macro_rules! entity_id {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

entity_id!(UserId);
entity_id!(FormulationId);
entity_id!(LawnServiceId);
entity_id!(CalibrationLogId);
entity_id!(CalibrationRecordId);

fn require(field: &'static str, value: &str) -> Result<(), ServiceError> {
    if value.trim().is_empty() {
        Err(ServiceError::validation(field, "is required"))
    } else {
        Ok(())
    }
}

/// Unit of measure, keyed by its symbol, e.g. "lb" or "lb/1000sqft".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub symbol: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Unit {
    pub fn validate(&self) -> Result<(), ServiceError> {
        require("symbol", &self.symbol)?;
        require("name", &self.name)
    }
}

/// Product formulation a lawn service applies, e.g. "GRANULE".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Formulation {
    pub id: FormulationId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Formulation {
    pub fn validate(&self) -> Result<(), ServiceError> {
        require("name", &self.name)
    }
}

/// Service type definition carrying the calibration formulas.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LawnService {
    pub id: LawnServiceId,
    pub code: String,
    pub description: String,
    pub formulation_id: FormulationId,
    pub target_calibration_value: f64,
    pub target_calibration_unit: String,
    pub measurement_unit: String,
    pub calibration_function: String,
    #[serde(default)]
    pub differential_calibration_function: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LawnService {
    /// Formula text is stored as given; it is only parsed when logs are read.
    pub fn validate(&self) -> Result<(), ServiceError> {
        LawnServiceFields {
            code: &self.code,
            description: &self.description,
            target_calibration_value: self.target_calibration_value,
            target_calibration_unit: &self.target_calibration_unit,
            measurement_unit: &self.measurement_unit,
            calibration_function: &self.calibration_function,
        }
        .validate()
    }
}

/// Required fields shared by stored and new lawn services.
struct LawnServiceFields<'a> {
    code: &'a str,
    description: &'a str,
    target_calibration_value: f64,
    target_calibration_unit: &'a str,
    measurement_unit: &'a str,
    calibration_function: &'a str,
}

impl LawnServiceFields<'_> {
    fn validate(&self) -> Result<(), ServiceError> {
        require("code", self.code)?;
        require("description", self.description)?;
        require("target_calibration_unit", self.target_calibration_unit)?;
        require("measurement_unit", self.measurement_unit)?;
        require("calibration_function", self.calibration_function)?;
        if self.target_calibration_value.is_finite() && self.target_calibration_value >= 0.0 {
            Ok(())
        } else {
            Err(ServiceError::validation(
                "target_calibration_value",
                "must be a non-negative number",
            ))
        }
    }
}

/// One calibration session.
///
/// `current_calibration` and each record's `calibration` are computed on
/// read and never stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationLog {
    pub id: CalibrationLogId,
    pub user_id: UserId,
    pub lawn_service_id: LawnServiceId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_calibration: Option<f64>,
    #[serde(default)]
    pub records: Vec<CalibrationRecord>,
}

impl CalibrationLog {
    pub fn new(user_id: UserId, lawn_service_id: LawnServiceId, now: DateTime<Utc>) -> Self {
        Self {
            id: CalibrationLogId::generate(),
            user_id,
            lawn_service_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            current_calibration: None,
            records: Vec::new(),
        }
    }
}

/// One measurement within a calibration log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub id: CalibrationRecordId,
    pub calibration_log_id: CalibrationLogId,
    pub measurement_value: f64,
    pub measurement_unit: String,
    pub measurement_area: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub calibration: f64,
}

impl CalibrationRecord {
    pub fn new(
        calibration_log_id: CalibrationLogId,
        measurement_value: f64,
        measurement_unit: impl Into<String>,
        measurement_area: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CalibrationRecordId::generate(),
            calibration_log_id,
            measurement_value,
            measurement_unit: measurement_unit.into(),
            measurement_area,
            created_at: now,
            updated_at: now,
            calibration: 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        validate_measurement(&self.measurement_unit, self.measurement_value)
    }
}

fn validate_measurement(unit: &str, value: f64) -> Result<(), ServiceError> {
    require("units", unit)?;
    if value.is_finite() {
        Ok(())
    } else {
        Err(ServiceError::validation(
            "measurement_value",
            "must be a finite number",
        ))
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewUnit {
    pub symbol: String,
    pub name: String,
}

impl NewUnit {
    pub fn into_unit(self, now: DateTime<Utc>) -> Unit {
        Unit {
            symbol: self.symbol.trim().to_string(),
            name: self.name,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewFormulation {
    pub name: String,
}

impl NewFormulation {
    pub fn validate(&self) -> Result<(), ServiceError> {
        require("name", &self.name)
    }

    pub fn into_formulation(self, now: DateTime<Utc>) -> Formulation {
        Formulation {
            id: FormulationId::generate(),
            name: self.name,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewLawnService {
    pub code: String,
    pub description: String,
    pub formulation_id: FormulationId,
    pub target_calibration_value: f64,
    pub target_calibration_unit: String,
    pub measurement_unit: String,
    pub calibration_function: String,
    #[serde(default)]
    pub differential_calibration_function: String,
}

impl NewLawnService {
    pub fn validate(&self) -> Result<(), ServiceError> {
        LawnServiceFields {
            code: &self.code,
            description: &self.description,
            target_calibration_value: self.target_calibration_value,
            target_calibration_unit: &self.target_calibration_unit,
            measurement_unit: &self.measurement_unit,
            calibration_function: &self.calibration_function,
        }
        .validate()
    }

    pub fn into_lawn_service(self, now: DateTime<Utc>) -> LawnService {
        LawnService {
            id: LawnServiceId::generate(),
            code: self.code,
            description: self.description,
            formulation_id: self.formulation_id,
            target_calibration_value: self.target_calibration_value,
            target_calibration_unit: self.target_calibration_unit,
            measurement_unit: self.measurement_unit,
            calibration_function: self.calibration_function,
            differential_calibration_function: self.differential_calibration_function,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewCalibrationLog {
    pub lawn_service_id: LawnServiceId,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewCalibrationRecord {
    pub measurement_value: f64,
    #[serde(rename = "units")]
    pub measurement_unit: String,
    pub measurement_area: u32,
}

impl NewCalibrationRecord {
    pub fn validate(&self) -> Result<(), ServiceError> {
        validate_measurement(&self.measurement_unit, self.measurement_value)
    }

    pub fn into_record(self, log_id: CalibrationLogId, now: DateTime<Utc>) -> CalibrationRecord {
        CalibrationRecord::new(
            log_id,
            self.measurement_value,
            self.measurement_unit,
            self.measurement_area,
            now,
        )
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct UnitPatch {
    pub name: Option<String>,
}

impl UnitPatch {
    pub fn apply(self, target: &mut Unit) {
        if let Some(name) = self.name {
            target.name = name;
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct FormulationPatch {
    pub name: Option<String>,
}

impl FormulationPatch {
    pub fn apply(self, target: &mut Formulation) {
        if let Some(name) = self.name {
            target.name = name;
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct LawnServicePatch {
    pub code: Option<String>,
    pub description: Option<String>,
    pub formulation_id: Option<FormulationId>,
    pub target_calibration_value: Option<f64>,
    pub target_calibration_unit: Option<String>,
    pub measurement_unit: Option<String>,
    pub calibration_function: Option<String>,
    pub differential_calibration_function: Option<String>,
}

impl LawnServicePatch {
    pub fn apply(self, target: &mut LawnService) {
        if let Some(code) = self.code {
            target.code = code;
        }
        if let Some(description) = self.description {
            target.description = description;
        }
        if let Some(formulation_id) = self.formulation_id {
            target.formulation_id = formulation_id;
        }
        if let Some(value) = self.target_calibration_value {
            target.target_calibration_value = value;
        }
        if let Some(unit) = self.target_calibration_unit {
            target.target_calibration_unit = unit;
        }
        if let Some(unit) = self.measurement_unit {
            target.measurement_unit = unit;
        }
        if let Some(function) = self.calibration_function {
            target.calibration_function = function;
        }
        if let Some(function) = self.differential_calibration_function {
            target.differential_calibration_function = function;
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CalibrationLogPatch {
    pub user_id: Option<UserId>,
    pub lawn_service_id: Option<LawnServiceId>,
}

impl CalibrationLogPatch {
    pub fn apply(self, target: &mut CalibrationLog) {
        if let Some(user_id) = self.user_id {
            target.user_id = user_id;
        }
        if let Some(lawn_service_id) = self.lawn_service_id {
            target.lawn_service_id = lawn_service_id;
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CalibrationRecordPatch {
    pub calibration_log_id: Option<CalibrationLogId>,
    pub measurement_value: Option<f64>,
    pub measurement_unit: Option<String>,
    pub measurement_area: Option<u32>,
}

impl CalibrationRecordPatch {
    pub fn apply(self, target: &mut CalibrationRecord) {
        if let Some(log_id) = self.calibration_log_id {
            target.calibration_log_id = log_id;
        }
        if let Some(value) = self.measurement_value {
            target.measurement_value = value;
        }
        if let Some(unit) = self.measurement_unit {
            target.measurement_unit = unit;
        }
        if let Some(area) = self.measurement_area {
            target.measurement_area = area;
        }
    }
}

/// Query parameters for listing calibration logs. Absent fields do not filter.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CalibrationLogFilter {
    pub user_id: Option<UserId>,
    pub lawn_service_id: Option<LawnServiceId>,
    pub date_from: Option<SimpleDate>,
    pub date_to: Option<SimpleDate>,
}

impl FilterFields for CalibrationLogFilter {
    fn filter_fields(&self) -> Vec<FilterField> {
        vec![
            FilterField::new("user_id", self.user_id.map(|id| id.0.into())),
            FilterField::new("lawn_service_id", self.lawn_service_id.map(|id| id.0.into())),
            FilterField::new("date_from", self.date_from.map(Into::into)).column("created_at"),
            FilterField::new("date_to", self.date_to.map(Into::into)).column("created_at"),
        ]
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CalibrationRecordFilter {
    pub calibration_log_id: Option<CalibrationLogId>,
}

impl FilterFields for CalibrationRecordFilter {
    fn filter_fields(&self) -> Vec<FilterField> {
        vec![FilterField::new(
            "calibration_log_id",
            self.calibration_log_id.map(|id| id.0.into()),
        )]
    }
}
