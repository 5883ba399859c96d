use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::models::{
    CalibrationLog, CalibrationLogFilter, CalibrationLogId, CalibrationRecord,
    CalibrationRecordFilter, CalibrationRecordId, Formulation, FormulationId, LawnService,
    LawnServiceId, Unit,
};

/// Persistence for formulations, lawn services and calibration data.
///
/// `update_*` and `delete_*` return `false` when no row matched. Logs are
/// loaded without their records; soft-deleted logs are never returned.
pub trait Storage {
    fn insert_unit(&mut self, unit: &Unit) -> Result<(), StorageError>;
    fn update_unit(&mut self, unit: &Unit) -> Result<bool, StorageError>;
    fn load_unit(&self, symbol: &str) -> Result<Option<Unit>, StorageError>;
    fn list_units(&self) -> Result<Vec<Unit>, StorageError>;

    fn insert_formulation(&mut self, formulation: &Formulation) -> Result<(), StorageError>;
    fn update_formulation(&mut self, formulation: &Formulation) -> Result<bool, StorageError>;
    fn load_formulation(&self, id: &FormulationId) -> Result<Option<Formulation>, StorageError>;
    fn list_formulations(&self) -> Result<Vec<Formulation>, StorageError>;

    fn insert_lawn_service(&mut self, service: &LawnService) -> Result<(), StorageError>;
    fn update_lawn_service(&mut self, service: &LawnService) -> Result<bool, StorageError>;
    fn load_lawn_service(&self, id: &LawnServiceId) -> Result<Option<LawnService>, StorageError>;
    fn list_lawn_services(&self) -> Result<Vec<LawnService>, StorageError>;

    fn insert_log(&mut self, log: &CalibrationLog) -> Result<(), StorageError>;
    fn update_log(&mut self, log: &CalibrationLog) -> Result<bool, StorageError>;
    fn soft_delete_log(
        &mut self,
        id: &CalibrationLogId,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError>;
    fn load_log(&self, id: &CalibrationLogId) -> Result<Option<CalibrationLog>, StorageError>;
    fn list_logs(&self, filter: &CalibrationLogFilter) -> Result<Vec<CalibrationLog>, StorageError>;

    fn insert_record(&mut self, record: &CalibrationRecord) -> Result<(), StorageError>;
    fn update_record(&mut self, record: &CalibrationRecord) -> Result<bool, StorageError>;
    fn delete_record(&mut self, id: &CalibrationRecordId) -> Result<bool, StorageError>;
    fn load_record(&self, id: &CalibrationRecordId)
        -> Result<Option<CalibrationRecord>, StorageError>;

    /// Records of one log, oldest first; ties keep insertion order.
    fn load_records(&self, log_id: &CalibrationLogId) -> Result<Vec<CalibrationRecord>, StorageError>;
    fn list_records(
        &self,
        filter: &CalibrationRecordFilter,
    ) -> Result<Vec<CalibrationRecord>, StorageError>;
}
