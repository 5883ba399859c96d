//! SQLite-backed [`Storage`].
//!
//! Identifiers are stored as hyphenated UUID text and timestamps as
//! fixed-width RFC 3339 UTC text, so `ORDER BY created_at` and the filter
//! bounds compare chronologically.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::StorageError;
use crate::filter::{build_predicate, format_timestamp, parse_timestamp};
use crate::migrations::ensure_schema;
use crate::models::{
    CalibrationLog, CalibrationLogFilter, CalibrationLogId, CalibrationRecord,
    CalibrationRecordFilter, CalibrationRecordId, Formulation, FormulationId, LawnService,
    LawnServiceId, Unit, UserId,
};
use crate::storage::Storage;

const UNIT_COLUMNS: &str = "symbol, name, created_at, updated_at";
const FORMULATION_COLUMNS: &str = "id, name, created_at, updated_at";
const LAWN_SERVICE_COLUMNS: &str = "id, code, description, formulation_id, \
    target_calibration_value, target_calibration_unit, measurement_unit, \
    calibration_function, differential_calibration_function, created_at, updated_at";
const LOG_COLUMNS: &str = "id, user_id, lawn_service_id, created_at, updated_at, deleted_at";
const RECORD_COLUMNS: &str = "id, calibration_log_id, measurement_value, measurement_unit, \
    measurement_area, created_at, updated_at";

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Open (or create) a database file and bring its schema up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path.as_ref())?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(path = %path.as_ref().display(), journal_mode = %mode, "opened database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        ensure_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn ts(value: &DateTime<Utc>) -> String {
    format_timestamp(value)
}

fn parse_id(column: &'static str, value: String) -> Result<Uuid, StorageError> {
    Uuid::parse_str(&value).map_err(|e| StorageError::Corrupt {
        column,
        reason: e.to_string(),
        value,
    })
}

fn parse_time(column: &'static str, value: String) -> Result<DateTime<Utc>, StorageError> {
    parse_timestamp(&value).map_err(|e| StorageError::Corrupt {
        column,
        reason: e.to_string(),
        value,
    })
}

/// Constraint violations become [`StorageError::Conflict`].
fn write_error(entity: &'static str) -> impl FnOnce(rusqlite::Error) -> StorageError {
    move |err| {
        let constraint = matches!(
            &err,
            rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
        );
        if constraint {
            StorageError::Conflict {
                entity,
                reason: err.to_string(),
            }
        } else {
            StorageError::Sqlite(err)
        }
    }
}

struct UnitRow {
    symbol: String,
    name: String,
    created_at: String,
    updated_at: String,
}

impl UnitRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            symbol: row.get(0)?,
            name: row.get(1)?,
            created_at: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }

    fn decode(self) -> Result<Unit, StorageError> {
        Ok(Unit {
            symbol: self.symbol,
            name: self.name,
            created_at: parse_time("units.created_at", self.created_at)?,
            updated_at: parse_time("units.updated_at", self.updated_at)?,
        })
    }
}

struct FormulationRow {
    id: String,
    name: String,
    created_at: String,
    updated_at: String,
}

impl FormulationRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }

    fn decode(self) -> Result<Formulation, StorageError> {
        Ok(Formulation {
            id: FormulationId(parse_id("formulations.id", self.id)?),
            name: self.name,
            created_at: parse_time("formulations.created_at", self.created_at)?,
            updated_at: parse_time("formulations.updated_at", self.updated_at)?,
        })
    }
}

struct LawnServiceRow {
    id: String,
    code: String,
    description: String,
    formulation_id: String,
    target_calibration_value: f64,
    target_calibration_unit: String,
    measurement_unit: String,
    calibration_function: String,
    differential_calibration_function: String,
    created_at: String,
    updated_at: String,
}

impl LawnServiceRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            code: row.get(1)?,
            description: row.get(2)?,
            formulation_id: row.get(3)?,
            target_calibration_value: row.get(4)?,
            target_calibration_unit: row.get(5)?,
            measurement_unit: row.get(6)?,
            calibration_function: row.get(7)?,
            differential_calibration_function: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn decode(self) -> Result<LawnService, StorageError> {
        Ok(LawnService {
            id: LawnServiceId(parse_id("lawn_services.id", self.id)?),
            code: self.code,
            description: self.description,
            formulation_id: FormulationId(parse_id(
                "lawn_services.formulation_id",
                self.formulation_id,
            )?),
            target_calibration_value: self.target_calibration_value,
            target_calibration_unit: self.target_calibration_unit,
            measurement_unit: self.measurement_unit,
            calibration_function: self.calibration_function,
            differential_calibration_function: self.differential_calibration_function,
            created_at: parse_time("lawn_services.created_at", self.created_at)?,
            updated_at: parse_time("lawn_services.updated_at", self.updated_at)?,
        })
    }
}

struct LogRow {
    id: String,
    user_id: String,
    lawn_service_id: String,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

impl LogRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            lawn_service_id: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            deleted_at: row.get(5)?,
        })
    }

    fn decode(self) -> Result<CalibrationLog, StorageError> {
        Ok(CalibrationLog {
            id: CalibrationLogId(parse_id("calibration_logs.id", self.id)?),
            user_id: UserId(parse_id("calibration_logs.user_id", self.user_id)?),
            lawn_service_id: LawnServiceId(parse_id(
                "calibration_logs.lawn_service_id",
                self.lawn_service_id,
            )?),
            created_at: parse_time("calibration_logs.created_at", self.created_at)?,
            updated_at: parse_time("calibration_logs.updated_at", self.updated_at)?,
            deleted_at: self
                .deleted_at
                .map(|v| parse_time("calibration_logs.deleted_at", v))
                .transpose()?,
            current_calibration: None,
            records: Vec::new(),
        })
    }
}

struct RecordRow {
    id: String,
    calibration_log_id: String,
    measurement_value: f64,
    measurement_unit: String,
    measurement_area: u32,
    created_at: String,
    updated_at: String,
}

impl RecordRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            calibration_log_id: row.get(1)?,
            measurement_value: row.get(2)?,
            measurement_unit: row.get(3)?,
            measurement_area: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn decode(self) -> Result<CalibrationRecord, StorageError> {
        Ok(CalibrationRecord {
            id: CalibrationRecordId(parse_id("calibration_records.id", self.id)?),
            calibration_log_id: CalibrationLogId(parse_id(
                "calibration_records.calibration_log_id",
                self.calibration_log_id,
            )?),
            measurement_value: self.measurement_value,
            measurement_unit: self.measurement_unit,
            measurement_area: self.measurement_area,
            created_at: parse_time("calibration_records.created_at", self.created_at)?,
            updated_at: parse_time("calibration_records.updated_at", self.updated_at)?,
            calibration: 0.0,
        })
    }
}

impl SqliteStorage {
    fn query_rows<R, T, P>(
        &self,
        sql: &str,
        params: P,
        read: fn(&Row<'_>) -> rusqlite::Result<R>,
        decode: fn(R) -> Result<T, StorageError>,
    ) -> Result<Vec<T>, StorageError>
    where
        P: rusqlite::Params,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, read)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(decode(row?)?);
        }
        Ok(out)
    }

    fn query_one<R, T, P>(
        &self,
        sql: &str,
        params: P,
        read: fn(&Row<'_>) -> rusqlite::Result<R>,
        decode: fn(R) -> Result<T, StorageError>,
    ) -> Result<Option<T>, StorageError>
    where
        P: rusqlite::Params,
    {
        self.conn
            .query_row(sql, params, read)
            .optional()?
            .map(decode)
            .transpose()
    }
}

impl Storage for SqliteStorage {
    fn insert_unit(&mut self, unit: &Unit) -> Result<(), StorageError> {
        self.conn
            .execute(
                &format!("INSERT INTO units ({UNIT_COLUMNS}) VALUES (?1, ?2, ?3, ?4)"),
                params![unit.symbol, unit.name, ts(&unit.created_at), ts(&unit.updated_at)],
            )
            .map_err(write_error("unit"))?;
        Ok(())
    }

    fn update_unit(&mut self, unit: &Unit) -> Result<bool, StorageError> {
        let changed = self
            .conn
            .execute(
                "UPDATE units SET name = ?2, updated_at = ?3 WHERE symbol = ?1",
                params![unit.symbol, unit.name, ts(&unit.updated_at)],
            )
            .map_err(write_error("unit"))?;
        Ok(changed > 0)
    }

    fn load_unit(&self, symbol: &str) -> Result<Option<Unit>, StorageError> {
        self.query_one(
            &format!("SELECT {UNIT_COLUMNS} FROM units WHERE symbol = ?1"),
            [symbol],
            UnitRow::read,
            UnitRow::decode,
        )
    }

    fn list_units(&self) -> Result<Vec<Unit>, StorageError> {
        self.query_rows(
            &format!("SELECT {UNIT_COLUMNS} FROM units ORDER BY symbol"),
            [],
            UnitRow::read,
            UnitRow::decode,
        )
    }

    fn insert_formulation(&mut self, formulation: &Formulation) -> Result<(), StorageError> {
        self.conn
            .execute(
                "INSERT INTO formulations (id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    formulation.id.to_string(),
                    formulation.name,
                    ts(&formulation.created_at),
                    ts(&formulation.updated_at),
                ],
            )
            .map_err(write_error("formulation"))?;
        Ok(())
    }

    fn update_formulation(&mut self, formulation: &Formulation) -> Result<bool, StorageError> {
        let changed = self
            .conn
            .execute(
                "UPDATE formulations SET name = ?2, updated_at = ?3 WHERE id = ?1",
                params![
                    formulation.id.to_string(),
                    formulation.name,
                    ts(&formulation.updated_at),
                ],
            )
            .map_err(write_error("formulation"))?;
        Ok(changed > 0)
    }

    fn load_formulation(&self, id: &FormulationId) -> Result<Option<Formulation>, StorageError> {
        self.query_one(
            &format!("SELECT {FORMULATION_COLUMNS} FROM formulations WHERE id = ?1"),
            [id.to_string()],
            FormulationRow::read,
            FormulationRow::decode,
        )
    }

    fn list_formulations(&self) -> Result<Vec<Formulation>, StorageError> {
        self.query_rows(
            &format!("SELECT {FORMULATION_COLUMNS} FROM formulations ORDER BY name"),
            [],
            FormulationRow::read,
            FormulationRow::decode,
        )
    }

    fn insert_lawn_service(&mut self, service: &LawnService) -> Result<(), StorageError> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO lawn_services ({LAWN_SERVICE_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    service.id.to_string(),
                    service.code,
                    service.description,
                    service.formulation_id.to_string(),
                    service.target_calibration_value,
                    service.target_calibration_unit,
                    service.measurement_unit,
                    service.calibration_function,
                    service.differential_calibration_function,
                    ts(&service.created_at),
                    ts(&service.updated_at),
                ],
            )
            .map_err(write_error("lawn service"))?;
        Ok(())
    }

    fn update_lawn_service(&mut self, service: &LawnService) -> Result<bool, StorageError> {
        let changed = self
            .conn
            .execute(
                "UPDATE lawn_services SET code = ?2, description = ?3, formulation_id = ?4, \
                 target_calibration_value = ?5, target_calibration_unit = ?6, \
                 measurement_unit = ?7, calibration_function = ?8, \
                 differential_calibration_function = ?9, updated_at = ?10 WHERE id = ?1",
                params![
                    service.id.to_string(),
                    service.code,
                    service.description,
                    service.formulation_id.to_string(),
                    service.target_calibration_value,
                    service.target_calibration_unit,
                    service.measurement_unit,
                    service.calibration_function,
                    service.differential_calibration_function,
                    ts(&service.updated_at),
                ],
            )
            .map_err(write_error("lawn service"))?;
        Ok(changed > 0)
    }

    fn load_lawn_service(&self, id: &LawnServiceId) -> Result<Option<LawnService>, StorageError> {
        self.query_one(
            &format!("SELECT {LAWN_SERVICE_COLUMNS} FROM lawn_services WHERE id = ?1"),
            [id.to_string()],
            LawnServiceRow::read,
            LawnServiceRow::decode,
        )
    }

    fn list_lawn_services(&self) -> Result<Vec<LawnService>, StorageError> {
        self.query_rows(
            &format!("SELECT {LAWN_SERVICE_COLUMNS} FROM lawn_services ORDER BY code"),
            [],
            LawnServiceRow::read,
            LawnServiceRow::decode,
        )
    }

    fn insert_log(&mut self, log: &CalibrationLog) -> Result<(), StorageError> {
        self.conn
            .execute(
                &format!("INSERT INTO calibration_logs ({LOG_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
                params![
                    log.id.to_string(),
                    log.user_id.to_string(),
                    log.lawn_service_id.to_string(),
                    ts(&log.created_at),
                    ts(&log.updated_at),
                    log.deleted_at.as_ref().map(ts),
                ],
            )
            .map_err(write_error("calibration log"))?;
        Ok(())
    }

    fn update_log(&mut self, log: &CalibrationLog) -> Result<bool, StorageError> {
        let changed = self
            .conn
            .execute(
                "UPDATE calibration_logs SET user_id = ?2, lawn_service_id = ?3, updated_at = ?4 \
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![
                    log.id.to_string(),
                    log.user_id.to_string(),
                    log.lawn_service_id.to_string(),
                    ts(&log.updated_at),
                ],
            )
            .map_err(write_error("calibration log"))?;
        Ok(changed > 0)
    }

    fn soft_delete_log(
        &mut self,
        id: &CalibrationLogId,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let changed = self.conn.execute(
            "UPDATE calibration_logs SET deleted_at = ?2, updated_at = ?2 \
             WHERE id = ?1 AND deleted_at IS NULL",
            params![id.to_string(), ts(&at)],
        )?;
        Ok(changed > 0)
    }

    fn load_log(&self, id: &CalibrationLogId) -> Result<Option<CalibrationLog>, StorageError> {
        self.query_one(
            &format!(
                "SELECT {LOG_COLUMNS} FROM calibration_logs WHERE id = ?1 AND deleted_at IS NULL"
            ),
            [id.to_string()],
            LogRow::read,
            LogRow::decode,
        )
    }

    fn list_logs(&self, filter: &CalibrationLogFilter) -> Result<Vec<CalibrationLog>, StorageError> {
        let (clause, params) = build_predicate(filter).to_sql(None, 1);
        self.query_rows(
            &format!(
                "SELECT {LOG_COLUMNS} FROM calibration_logs \
                 WHERE deleted_at IS NULL AND {clause} ORDER BY created_at, rowid"
            ),
            params_from_iter(params.iter()),
            LogRow::read,
            LogRow::decode,
        )
    }

    fn insert_record(&mut self, record: &CalibrationRecord) -> Result<(), StorageError> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO calibration_records ({RECORD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ),
                params![
                    record.id.to_string(),
                    record.calibration_log_id.to_string(),
                    record.measurement_value,
                    record.measurement_unit,
                    record.measurement_area,
                    ts(&record.created_at),
                    ts(&record.updated_at),
                ],
            )
            .map_err(write_error("calibration record"))?;
        Ok(())
    }

    fn update_record(&mut self, record: &CalibrationRecord) -> Result<bool, StorageError> {
        let changed = self
            .conn
            .execute(
                "UPDATE calibration_records SET calibration_log_id = ?2, measurement_value = ?3, \
                 measurement_unit = ?4, measurement_area = ?5, updated_at = ?6 WHERE id = ?1",
                params![
                    record.id.to_string(),
                    record.calibration_log_id.to_string(),
                    record.measurement_value,
                    record.measurement_unit,
                    record.measurement_area,
                    ts(&record.updated_at),
                ],
            )
            .map_err(write_error("calibration record"))?;
        Ok(changed > 0)
    }

    fn delete_record(&mut self, id: &CalibrationRecordId) -> Result<bool, StorageError> {
        let changed = self
            .conn
            .execute("DELETE FROM calibration_records WHERE id = ?1", [id.to_string()])?;
        Ok(changed > 0)
    }

    fn load_record(
        &self,
        id: &CalibrationRecordId,
    ) -> Result<Option<CalibrationRecord>, StorageError> {
        self.query_one(
            &format!("SELECT {RECORD_COLUMNS} FROM calibration_records WHERE id = ?1"),
            [id.to_string()],
            RecordRow::read,
            RecordRow::decode,
        )
    }

    fn load_records(&self, log_id: &CalibrationLogId) -> Result<Vec<CalibrationRecord>, StorageError> {
        self.query_rows(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM calibration_records \
                 WHERE calibration_log_id = ?1 ORDER BY created_at, rowid"
            ),
            [log_id.to_string()],
            RecordRow::read,
            RecordRow::decode,
        )
    }

    fn list_records(
        &self,
        filter: &CalibrationRecordFilter,
    ) -> Result<Vec<CalibrationRecord>, StorageError> {
        let (clause, params) = build_predicate(filter).to_sql(Some("r"), 1);
        let columns = RECORD_COLUMNS
            .split(", ")
            .map(|c| format!("r.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        self.query_rows(
            &format!(
                "SELECT {columns} FROM calibration_records r \
                 JOIN calibration_logs l ON l.id = r.calibration_log_id \
                 WHERE l.deleted_at IS NULL AND {clause} ORDER BY r.created_at, r.rowid"
            ),
            params_from_iter(params.iter()),
            RecordRow::read,
            RecordRow::decode,
        )
    }
}
