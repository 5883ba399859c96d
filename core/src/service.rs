//! Calibration log use cases on top of a [`Storage`] backend.
//!
//! Reads attach the log's records in creation order and run the
//! [`CalibrationEngine`]; formula problems only ever show up as missing
//! computed values. Everything else (unknown ids, invalid input, storage
//! failures) is returned as a [`ServiceError`].

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::Utc;

use crate::calibration::CalibrationEngine;
use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::models::{
    CalibrationLog, CalibrationLogFilter, CalibrationLogId, CalibrationLogPatch,
    CalibrationRecord, CalibrationRecordFilter, CalibrationRecordId, CalibrationRecordPatch,
    Formulation, FormulationId, FormulationPatch, LawnService, LawnServiceId, LawnServicePatch,
    NewCalibrationLog, NewCalibrationRecord, NewFormulation, NewLawnService, NewUnit, Unit,
    UnitPatch, UserId,
};
use crate::sqlite::SqliteStorage;
use crate::storage::Storage;

type LawnServiceCache = HashMap<LawnServiceId, Option<LawnService>>;

pub struct CalibrationService<S: Storage> {
    storage: S,
    engine: CalibrationEngine,
}

impl CalibrationService<SqliteStorage> {
    /// Open the configured database and use the configured formula budget.
    pub fn open(config: &ServiceConfig) -> Result<Self, ServiceError> {
        config.validate()?;
        let storage = SqliteStorage::open(&config.database.path)?;
        tracing::info!(
            database = %config.database.path,
            timeout_ms = config.evaluation.timeout_ms,
            "calibration service ready"
        );
        Ok(Self::new(
            storage,
            CalibrationEngine::with_timeout(config.evaluation_timeout()),
        ))
    }
}

impl<S: Storage> CalibrationService<S> {
    pub fn new(storage: S, engine: CalibrationEngine) -> Self {
        Self { storage, engine }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn engine(&self) -> &CalibrationEngine {
        &self.engine
    }

    // Units

    pub fn create_unit(&mut self, dto: NewUnit) -> Result<Unit, ServiceError> {
        let unit = dto.into_unit(Utc::now());
        unit.validate()?;
        self.storage.insert_unit(&unit)?;
        tracing::info!(symbol = %unit.symbol, name = %unit.name, "created unit");
        Ok(unit)
    }

    pub fn read_units(&self) -> Result<Vec<Unit>, ServiceError> {
        Ok(self.storage.list_units()?)
    }

    pub fn update_unit(&mut self, symbol: &str, patch: UnitPatch) -> Result<Unit, ServiceError> {
        let mut unit = self
            .storage
            .load_unit(symbol)?
            .ok_or_else(|| ServiceError::not_found("unit", symbol))?;
        patch.apply(&mut unit);
        unit.validate()?;
        unit.updated_at = Utc::now();
        if !self.storage.update_unit(&unit)? {
            return Err(ServiceError::not_found("unit", symbol));
        }
        Ok(unit)
    }

    // Formulations

    pub fn create_formulation(&mut self, dto: NewFormulation) -> Result<Formulation, ServiceError> {
        dto.validate()?;
        let formulation = dto.into_formulation(Utc::now());
        self.storage.insert_formulation(&formulation)?;
        tracing::info!(formulation_id = %formulation.id, name = %formulation.name, "created formulation");
        Ok(formulation)
    }

    pub fn update_formulation(
        &mut self,
        id: &FormulationId,
        patch: FormulationPatch,
    ) -> Result<Formulation, ServiceError> {
        let mut formulation = self
            .storage
            .load_formulation(id)?
            .ok_or_else(|| ServiceError::not_found("formulation", id))?;
        patch.apply(&mut formulation);
        formulation.validate()?;
        formulation.updated_at = Utc::now();
        if !self.storage.update_formulation(&formulation)? {
            return Err(ServiceError::not_found("formulation", id));
        }
        Ok(formulation)
    }

    pub fn read_formulations(&self) -> Result<Vec<Formulation>, ServiceError> {
        Ok(self.storage.list_formulations()?)
    }

    // Lawn services

    pub fn create_lawn_service(&mut self, dto: NewLawnService) -> Result<LawnService, ServiceError> {
        dto.validate()?;
        self.require_formulation(&dto.formulation_id)?;
        let service = dto.into_lawn_service(Utc::now());
        self.storage.insert_lawn_service(&service)?;
        tracing::info!(lawn_service_id = %service.id, code = %service.code, "created lawn service");
        Ok(service)
    }

    /// Formula text is replaced as given; a broken formula only surfaces as
    /// missing values when logs are read.
    pub fn update_lawn_service(
        &mut self,
        id: &LawnServiceId,
        patch: LawnServicePatch,
    ) -> Result<LawnService, ServiceError> {
        let mut service = self
            .storage
            .load_lawn_service(id)?
            .ok_or_else(|| ServiceError::not_found("lawn service", id))?;
        if let Some(formulation_id) = &patch.formulation_id {
            self.require_formulation(formulation_id)?;
        }
        patch.apply(&mut service);
        service.validate()?;
        service.updated_at = Utc::now();
        if !self.storage.update_lawn_service(&service)? {
            return Err(ServiceError::not_found("lawn service", id));
        }
        Ok(service)
    }

    pub fn read_lawn_services(&self) -> Result<Vec<LawnService>, ServiceError> {
        Ok(self.storage.list_lawn_services()?)
    }

    pub fn read_lawn_service(&self, id: &LawnServiceId) -> Result<LawnService, ServiceError> {
        self.storage
            .load_lawn_service(id)?
            .ok_or_else(|| ServiceError::not_found("lawn service", id))
    }

    // Calibration logs

    pub fn create_calibration_log(
        &mut self,
        dto: NewCalibrationLog,
        user_id: UserId,
    ) -> Result<CalibrationLog, ServiceError> {
        self.read_lawn_service(&dto.lawn_service_id)?;
        let log = CalibrationLog::new(user_id, dto.lawn_service_id, Utc::now());
        self.storage.insert_log(&log)?;
        tracing::info!(log_id = %log.id, user_id = %user_id, "created calibration log");
        Ok(log)
    }

    /// One log with its records and computed calibration values.
    pub fn read_calibration_log(&self, id: &CalibrationLogId) -> Result<CalibrationLog, ServiceError> {
        let log = self
            .storage
            .load_log(id)?
            .ok_or_else(|| ServiceError::not_found("calibration log", id))?;
        self.hydrate(log, &mut LawnServiceCache::new())
    }

    /// Every matching log, each with its records and computed values.
    pub fn read_calibration_logs(
        &self,
        filter: &CalibrationLogFilter,
    ) -> Result<Vec<CalibrationLog>, ServiceError> {
        let logs = self.storage.list_logs(filter)?;
        let mut services = LawnServiceCache::new();
        logs.into_iter()
            .map(|log| self.hydrate(log, &mut services))
            .collect()
    }

    pub fn update_calibration_log(
        &mut self,
        id: &CalibrationLogId,
        patch: CalibrationLogPatch,
    ) -> Result<CalibrationLog, ServiceError> {
        let mut log = self
            .storage
            .load_log(id)?
            .ok_or_else(|| ServiceError::not_found("calibration log", id))?;
        if let Some(lawn_service_id) = &patch.lawn_service_id {
            self.read_lawn_service(lawn_service_id)?;
        }
        patch.apply(&mut log);
        log.updated_at = Utc::now();
        if !self.storage.update_log(&log)? {
            return Err(ServiceError::not_found("calibration log", id));
        }
        self.hydrate(log, &mut LawnServiceCache::new())
    }

    /// Soft delete; the log disappears from reads but its rows are kept.
    pub fn delete_calibration_log(&mut self, id: &CalibrationLogId) -> Result<(), ServiceError> {
        if !self.storage.soft_delete_log(id, Utc::now())? {
            return Err(ServiceError::not_found("calibration log", id));
        }
        tracing::info!(log_id = %id, "deleted calibration log");
        Ok(())
    }

    // Calibration records

    pub fn create_calibration_record(
        &mut self,
        log_id: &CalibrationLogId,
        dto: NewCalibrationRecord,
    ) -> Result<CalibrationRecord, ServiceError> {
        dto.validate()?;
        self.require_log(log_id)?;
        let record = dto.into_record(*log_id, Utc::now());
        self.storage.insert_record(&record)?;
        tracing::debug!(record_id = %record.id, log_id = %log_id, "created calibration record");
        Ok(record)
    }

    /// Stored records only; `calibration` is not computed here.
    pub fn read_calibration_records(
        &self,
        filter: &CalibrationRecordFilter,
    ) -> Result<Vec<CalibrationRecord>, ServiceError> {
        Ok(self.storage.list_records(filter)?)
    }

    pub fn update_calibration_record(
        &mut self,
        id: &CalibrationRecordId,
        patch: CalibrationRecordPatch,
    ) -> Result<CalibrationRecord, ServiceError> {
        let mut record = self
            .storage
            .load_record(id)?
            .ok_or_else(|| ServiceError::not_found("calibration record", id))?;
        if let Some(log_id) = &patch.calibration_log_id {
            self.require_log(log_id)?;
        }
        patch.apply(&mut record);
        record.validate()?;
        record.updated_at = Utc::now();
        if !self.storage.update_record(&record)? {
            return Err(ServiceError::not_found("calibration record", id));
        }
        Ok(record)
    }

    pub fn delete_calibration_record(&mut self, id: &CalibrationRecordId) -> Result<(), ServiceError> {
        if !self.storage.delete_record(id)? {
            return Err(ServiceError::not_found("calibration record", id));
        }
        Ok(())
    }

    fn require_formulation(&self, id: &FormulationId) -> Result<(), ServiceError> {
        match self.storage.load_formulation(id)? {
            Some(_) => Ok(()),
            None => Err(ServiceError::not_found("formulation", id)),
        }
    }

    fn require_log(&self, id: &CalibrationLogId) -> Result<(), ServiceError> {
        match self.storage.load_log(id)? {
            Some(_) => Ok(()),
            None => Err(ServiceError::not_found("calibration log", id)),
        }
    }

    fn hydrate(
        &self,
        mut log: CalibrationLog,
        services: &mut LawnServiceCache,
    ) -> Result<CalibrationLog, ServiceError> {
        log.records = self.storage.load_records(&log.id)?;

        let service = match services.entry(log.lawn_service_id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                entry.insert(self.storage.load_lawn_service(&log.lawn_service_id)?)
            }
        };
        match service {
            Some(service) => self.engine.apply(service, &mut log),
            None => tracing::warn!(
                log_id = %log.id,
                lawn_service_id = %log.lawn_service_id,
                "lawn service missing; calibration not computed"
            ),
        }
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, StorageError};
    use crate::filter::SimpleDate;

    fn service() -> CalibrationService<SqliteStorage> {
        CalibrationService::new(
            SqliteStorage::open_in_memory().unwrap(),
            CalibrationEngine::default(),
        )
    }

    fn lawn_service_dto(formulation_id: FormulationId, primary: &str, differential: &str) -> NewLawnService {
        NewLawnService {
            code: "LS01".into(),
            description: "Spring Fertilizer".into(),
            formulation_id,
            target_calibration_value: 0.15,
            target_calibration_unit: "lb/sqft".into(),
            measurement_unit: "lb".into(),
            calibration_function: primary.into(),
            differential_calibration_function: differential.into(),
        }
    }

    fn record(value: f64, area: u32) -> NewCalibrationRecord {
        NewCalibrationRecord {
            measurement_value: value,
            measurement_unit: "lb".into(),
            measurement_area: area,
        }
    }

    /// Service with one lawn service and one log holding the sample records.
    fn seeded(
        primary: &str,
        differential: &str,
    ) -> (CalibrationService<SqliteStorage>, LawnService, CalibrationLog) {
        let mut svc = service();
        let formulation = svc
            .create_formulation(NewFormulation {
                name: "GRANULE".into(),
            })
            .unwrap();
        let lawn_service = svc
            .create_lawn_service(lawn_service_dto(formulation.id, primary, differential))
            .unwrap();
        let log = svc
            .create_calibration_log(
                NewCalibrationLog {
                    lawn_service_id: lawn_service.id,
                },
                UserId::generate(),
            )
            .unwrap();
        svc.create_calibration_record(&log.id, record(10.0, 50)).unwrap();
        svc.create_calibration_record(&log.id, record(15.0, 100)).unwrap();
        (svc, lawn_service, log)
    }

    #[test]
    fn test_read_log_computes_calibration() {
        let (svc, _, log) = seeded(
            "current_amount / current_area",
            "current_amount - previous_amount",
        );
        let read = svc.read_calibration_log(&log.id).unwrap();

        assert!((read.current_calibration.unwrap() - 0.15).abs() < 1e-12);
        let values: Vec<f64> = read.records.iter().map(|r| r.calibration).collect();
        assert_eq!(values, vec![10.0, 5.0]);
    }

    #[test]
    fn test_bad_formulas_do_not_fail_reads() {
        let (svc, _, log) = seeded("last_amount / last_area", "invalid_function +");
        let read = svc.read_calibration_log(&log.id).unwrap();
        assert_eq!(read.current_calibration, None);
        assert!(read.records.iter().all(|r| r.calibration == 0.0));
        assert_eq!(read.records.len(), 2);

        let json = serde_json::to_value(&read).unwrap();
        assert!(json.get("current_calibration").is_none());
        assert_eq!(json["records"][1]["calibration"], serde_json::json!(0.0));
    }

    #[test]
    fn test_repeated_reads_are_identical() {
        let (svc, _, log) = seeded(
            "current_amount / current_area",
            "current_amount - previous_amount",
        );
        let first = svc.read_calibration_log(&log.id).unwrap();
        let second = svc.read_calibration_log(&log.id).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_formula_update_applies_on_next_read() {
        let (mut svc, lawn_service, log) = seeded("current_amount / current_area", "");
        svc.update_lawn_service(
            &lawn_service.id,
            LawnServicePatch {
                calibration_function: Some("first_amount / first_area".into()),
                ..Default::default()
            },
        )
        .unwrap();

        let read = svc.read_calibration_log(&log.id).unwrap();
        assert!((read.current_calibration.unwrap() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_read_logs_applies_to_each_log() {
        let (mut svc, lawn_service, first) = seeded("current_amount / current_area", "");
        let user = UserId::generate();
        let second = svc
            .create_calibration_log(
                NewCalibrationLog {
                    lawn_service_id: lawn_service.id,
                },
                user,
            )
            .unwrap();
        svc.create_calibration_record(&second.id, record(3.0, 10)).unwrap();

        let logs = svc.read_calibration_logs(&CalibrationLogFilter::default()).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].id, first.id);
        assert!((logs[1].current_calibration.unwrap() - 0.3).abs() < 1e-12);

        let mine = svc
            .read_calibration_logs(&CalibrationLogFilter {
                user_id: Some(user),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, second.id);
    }

    #[test]
    fn test_read_logs_with_date_filter() {
        let (svc, _, log) = seeded("current_amount / current_area", "");
        let today = SimpleDate(Utc::now().date_naive());

        let logs = svc
            .read_calibration_logs(&CalibrationLogFilter {
                date_from: Some(today),
                date_to: Some(today),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].id, log.id);

        let tomorrow = SimpleDate(today.0.succ_opt().unwrap());
        let logs = svc
            .read_calibration_logs(&CalibrationLogFilter {
                date_from: Some(tomorrow),
                ..Default::default()
            })
            .unwrap();
        assert!(logs.is_empty());
    }

    #[test]
    fn test_missing_log_is_not_found() {
        let svc = service();
        let err = svc
            .read_calibration_log(&CalibrationLogId::generate())
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { entity: "calibration log", .. }));
    }

    #[test]
    fn test_log_requires_existing_lawn_service() {
        let mut svc = service();
        let err = svc
            .create_calibration_log(
                NewCalibrationLog {
                    lawn_service_id: LawnServiceId::generate(),
                },
                UserId::generate(),
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { entity: "lawn service", .. }));
    }

    #[test]
    fn test_record_requires_existing_log() {
        let mut svc = service();
        let err = svc
            .create_calibration_record(&CalibrationLogId::generate(), record(1.0, 1))
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { entity: "calibration log", .. }));
    }

    #[test]
    fn test_lawn_service_requires_existing_formulation() {
        let mut svc = service();
        let err = svc
            .create_lawn_service(lawn_service_dto(FormulationId::generate(), "1", ""))
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { entity: "formulation", .. }));
    }

    #[test]
    fn test_invalid_input_is_rejected() {
        let mut svc = service();
        let err = svc
            .create_formulation(NewFormulation { name: "".into() })
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation { field: "name", .. }));

        let (mut svc, lawn_service, log) = seeded("current_amount", "");
        let err = svc
            .create_calibration_record(
                &log.id,
                NewCalibrationRecord {
                    measurement_unit: " ".into(),
                    ..record(1.0, 1)
                },
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation { field: "units", .. }));

        let err = svc
            .update_lawn_service(
                &lawn_service.id,
                LawnServicePatch {
                    target_calibration_value: Some(-1.0),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Validation {
                field: "target_calibration_value",
                ..
            }
        ));
    }

    #[test]
    fn test_unparsable_formula_is_accepted() {
        let (mut svc, lawn_service, _) = seeded("current_amount", "");
        let updated = svc
            .update_lawn_service(
                &lawn_service.id,
                LawnServicePatch {
                    calibration_function: Some("current_amount +".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.calibration_function, "current_amount +");
    }

    #[test]
    fn test_duplicate_formulation_is_storage_conflict() {
        let mut svc = service();
        svc.create_formulation(NewFormulation {
            name: "LIQUID".into(),
        })
        .unwrap();
        let err = svc
            .create_formulation(NewFormulation {
                name: "LIQUID".into(),
            })
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Storage(StorageError::Conflict { .. })
        ));
    }

    #[test]
    fn test_soft_delete_hides_log() {
        let (mut svc, _, log) = seeded("current_amount", "");
        svc.delete_calibration_log(&log.id).unwrap();

        assert!(matches!(
            svc.read_calibration_log(&log.id),
            Err(ServiceError::NotFound { .. })
        ));
        assert!(svc
            .read_calibration_logs(&CalibrationLogFilter::default())
            .unwrap()
            .is_empty());
        assert!(matches!(
            svc.delete_calibration_log(&log.id),
            Err(ServiceError::NotFound { .. })
        ));
    }

    #[test]
    fn test_record_update_and_delete() {
        let (mut svc, _, log) = seeded("current_amount / current_area", "");
        let records = svc
            .read_calibration_records(&CalibrationRecordFilter {
                calibration_log_id: Some(log.id),
            })
            .unwrap();
        assert_eq!(records.len(), 2);

        svc.update_calibration_record(
            &records[1].id,
            CalibrationRecordPatch {
                measurement_value: Some(30.0),
                ..Default::default()
            },
        )
        .unwrap();
        let read = svc.read_calibration_log(&log.id).unwrap();
        assert!((read.current_calibration.unwrap() - 0.3).abs() < 1e-12);

        svc.delete_calibration_record(&records[1].id).unwrap();
        let read = svc.read_calibration_log(&log.id).unwrap();
        assert_eq!(read.records.len(), 1);
        assert!((read.current_calibration.unwrap() - 0.2).abs() < 1e-12);

        assert!(matches!(
            svc.delete_calibration_record(&records[1].id),
            Err(ServiceError::NotFound { .. })
        ));
    }

    #[test]
    fn test_update_log_moves_to_other_service() {
        let (mut svc, lawn_service, log) = seeded("current_amount / current_area", "");
        let other = svc
            .create_lawn_service(NewLawnService {
                code: "LS02".into(),
                ..lawn_service_dto(lawn_service.formulation_id, "current_amount", "")
            })
            .unwrap();

        let updated = svc
            .update_calibration_log(
                &log.id,
                CalibrationLogPatch {
                    lawn_service_id: Some(other.id),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.lawn_service_id, other.id);
        assert_eq!(updated.current_calibration, Some(15.0));
    }

    #[test]
    fn test_open_from_config() {
        let mut config = ServiceConfig::default();
        config.database.path = ":memory:".into();
        config.evaluation.timeout_ms = 250;
        let svc = CalibrationService::<SqliteStorage>::open(&config).unwrap();
        assert_eq!(
            svc.engine().evaluator().timeout(),
            std::time::Duration::from_millis(250)
        );
        assert!(svc.read_formulations().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_config_is_a_config_error() {
        let mut config = ServiceConfig::default();
        config.database.path = ":memory:".into();
        config.evaluation.timeout_ms = 0;
        let err = CalibrationService::<SqliteStorage>::open(&config)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ServiceError::Config(ConfigError::Invalid { key: "evaluation.timeout_ms", .. })
        ));
    }

    #[test]
    fn test_unit_lifecycle() {
        let mut svc = service();
        let pound = svc
            .create_unit(NewUnit {
                symbol: "lb".into(),
                name: "pound".into(),
            })
            .unwrap();
        svc.create_unit(NewUnit {
            symbol: "sqft".into(),
            name: "square foot".into(),
        })
        .unwrap();

        let renamed = svc
            .update_unit(
                "lb",
                UnitPatch {
                    name: Some("pounds".into()),
                },
            )
            .unwrap();
        assert_eq!(renamed.name, "pounds");
        assert_eq!(renamed.created_at, pound.created_at);

        let units = svc.read_units().unwrap();
        let names: Vec<_> = units.iter().map(|u| (u.symbol.as_str(), u.name.as_str())).collect();
        assert_eq!(names, vec![("lb", "pounds"), ("sqft", "square foot")]);
    }

    #[test]
    fn test_unit_errors() {
        let mut svc = service();
        let dto = NewUnit {
            symbol: "lb".into(),
            name: "pound".into(),
        };
        svc.create_unit(dto.clone()).unwrap();

        let err = svc.create_unit(dto).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Storage(StorageError::Conflict { entity: "unit", .. })
        ));

        let err = svc
            .create_unit(NewUnit {
                symbol: "oz".into(),
                name: " ".into(),
            })
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation { field: "name", .. }));

        let err = svc.update_unit("kg", UnitPatch::default()).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { entity: "unit", .. }));
    }
}
