//! Attribute-driven query predicates.
//!
//! A filter struct lists its fields through [`FilterFields`]; each present
//! field becomes one or two AND-ed conditions. The column is the explicit
//! mapping if given, else the snake-cased serialization name, else the
//! snake-cased attribute name.
//!
//! Date values are widened to whole days. Attributes whose name has a
//! `from` or `start` word bind a lower bound at the start of the day, `to`
//! or `end` words bind an upper bound at the last nanosecond of the day, and
//! any other date matches the full day.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use rusqlite::types::{ToSql, ToSqlOutput};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Calendar date accepted as `YYYY-MM-DD`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimpleDate(pub NaiveDate);

impl SimpleDate {
    pub fn start_of_day(&self) -> DateTime<Utc> {
        self.0.and_time(NaiveTime::MIN).and_utc()
    }

    pub fn end_of_day(&self) -> DateTime<Utc> {
        self.start_of_day()
            .checked_add_signed(TimeDelta::days(1))
            .map(|next| next - TimeDelta::nanoseconds(1))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl FromStr for SimpleDate {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map(SimpleDate)
    }
}

impl fmt::Display for SimpleDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

/// Fixed-width UTC text form; lexical order matches chronological order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.9fZ").to_string()
}

pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|ts| ts.with_timezone(&Utc))
}

/// Value carried by one filter attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterValue {
    Uuid(Uuid),
    Text(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
    Date(SimpleDate),
    Timestamp(DateTime<Utc>),
}

impl From<Uuid> for FilterValue {
    fn from(v: Uuid) -> Self {
        FilterValue::Uuid(v)
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        FilterValue::Text(v)
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        FilterValue::Integer(v)
    }
}

impl From<u32> for FilterValue {
    fn from(v: u32) -> Self {
        FilterValue::Integer(i64::from(v))
    }
}

impl From<f64> for FilterValue {
    fn from(v: f64) -> Self {
        FilterValue::Real(v)
    }
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        FilterValue::Bool(v)
    }
}

impl From<SimpleDate> for FilterValue {
    fn from(v: SimpleDate) -> Self {
        FilterValue::Date(v)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(v: DateTime<Utc>) -> Self {
        FilterValue::Timestamp(v)
    }
}

/// Metadata and value for one attribute of a filter struct.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterField {
    attribute: &'static str,
    column: Option<&'static str>,
    serde_name: Option<&'static str>,
    value: Option<FilterValue>,
}

impl FilterField {
    pub fn new(attribute: &'static str, value: Option<FilterValue>) -> Self {
        Self {
            attribute,
            column: None,
            serde_name: None,
            value,
        }
    }

    /// Explicit column mapping; takes precedence over every derived name.
    pub fn column(mut self, column: &'static str) -> Self {
        self.column = Some(column);
        self
    }

    pub fn serde_name(mut self, name: &'static str) -> Self {
        self.serde_name = Some(name);
        self
    }

    pub fn column_name(&self) -> String {
        match (self.column, self.serde_name) {
            (Some(column), _) => column.to_string(),
            (None, Some(name)) => to_snake_case(name),
            (None, None) => to_snake_case(self.attribute),
        }
    }

    fn present_value(&self) -> Option<&FilterValue> {
        match &self.value {
            Some(FilterValue::Text(s)) if s.is_empty() => None,
            other => other.as_ref(),
        }
    }
}

/// Implemented by structs that can be turned into a [`Predicate`].
pub trait FilterFields {
    fn filter_fields(&self) -> Vec<FilterField>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Gte,
    Lte,
}

impl Comparison {
    pub fn sql(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Gte => ">=",
            Comparison::Lte => "<=",
        }
    }
}

/// Bound parameter in the storage representation.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Integer(i64),
    Real(f64),
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            SqlParam::Text(v) => v.to_sql(),
            SqlParam::Integer(v) => v.to_sql(),
            SqlParam::Real(v) => v.to_sql(),
        }
    }
}

impl From<DateTime<Utc>> for SqlParam {
    fn from(ts: DateTime<Utc>) -> Self {
        SqlParam::Text(format_timestamp(&ts))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub comparison: Comparison,
    pub value: SqlParam,
}

/// AND-combination of conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    conditions: Vec<Condition>,
}

impl Predicate {
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn push(&mut self, column: impl Into<String>, comparison: Comparison, value: SqlParam) {
        self.conditions.push(Condition {
            column: column.into(),
            comparison,
            value,
        });
    }

    /// Render as SQL with numbered placeholders starting at `?{first}`.
    ///
    /// Column names are prefixed with `qualifier.` when one is given. An
    /// empty predicate renders as `1 = 1`.
    pub fn to_sql(&self, qualifier: Option<&str>, first: usize) -> (String, Vec<SqlParam>) {
        if self.conditions.is_empty() {
            return ("1 = 1".to_string(), Vec::new());
        }
        let clauses: Vec<String> = self
            .conditions
            .iter()
            .enumerate()
            .map(|(i, c)| match qualifier {
                Some(q) => format!("{q}.{} {} ?{}", c.column, c.comparison.sql(), first + i),
                None => format!("{} {} ?{}", c.column, c.comparison.sql(), first + i),
            })
            .collect();
        let params = self.conditions.iter().map(|c| c.value.clone()).collect();
        (clauses.join(" AND "), params)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeRole {
    Lower,
    Upper,
    Exact,
}

fn range_role(attribute: &str) -> RangeRole {
    let snake = to_snake_case(attribute);
    let words: Vec<&str> = snake.split('_').collect();
    if words.iter().any(|w| matches!(*w, "from" | "start")) {
        RangeRole::Lower
    } else if words.iter().any(|w| matches!(*w, "to" | "end")) {
        RangeRole::Upper
    } else {
        RangeRole::Exact
    }
}

fn is_identifier(column: &str) -> bool {
    let mut chars = column.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Build the predicate for every present attribute of `filter`.
pub fn build_predicate<F: FilterFields + ?Sized>(filter: &F) -> Predicate {
    let mut predicate = Predicate::default();

    for field in filter.filter_fields() {
        let Some(value) = field.present_value() else {
            continue;
        };
        let column = field.column_name();
        if !is_identifier(&column) {
            tracing::warn!(attribute = field.attribute, column = %column, "skipping filter field with invalid column name");
            continue;
        }

        match value {
            FilterValue::Date(date) => match range_role(field.attribute) {
                RangeRole::Lower => {
                    predicate.push(column, Comparison::Gte, date.start_of_day().into())
                }
                RangeRole::Upper => predicate.push(column, Comparison::Lte, date.end_of_day().into()),
                RangeRole::Exact => {
                    predicate.push(column.clone(), Comparison::Gte, date.start_of_day().into());
                    predicate.push(column, Comparison::Lte, date.end_of_day().into());
                }
            },
            FilterValue::Timestamp(ts) => {
                let comparison = match range_role(field.attribute) {
                    RangeRole::Lower => Comparison::Gte,
                    RangeRole::Upper => Comparison::Lte,
                    RangeRole::Exact => Comparison::Eq,
                };
                predicate.push(column, comparison, (*ts).into());
            }
            FilterValue::Uuid(id) => {
                predicate.push(column, Comparison::Eq, SqlParam::Text(id.to_string()))
            }
            FilterValue::Text(text) => {
                predicate.push(column, Comparison::Eq, SqlParam::Text(text.clone()))
            }
            FilterValue::Integer(v) => predicate.push(column, Comparison::Eq, SqlParam::Integer(*v)),
            FilterValue::Real(v) => predicate.push(column, Comparison::Eq, SqlParam::Real(*v)),
            FilterValue::Bool(v) => {
                predicate.push(column, Comparison::Eq, SqlParam::Integer(i64::from(*v)))
            }
        }
    }

    predicate
}

/// `DateFrom` → `date_from`, `UserID` → `user_id`.
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev != '_' && (prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower)) {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rusqlite::Connection;

    struct TestFilter {
        date_from: Option<SimpleDate>,
        date_to: Option<SimpleDate>,
        name: Option<String>,
    }

    impl FilterFields for TestFilter {
        fn filter_fields(&self) -> Vec<FilterField> {
            vec![
                FilterField::new("DateFrom", self.date_from.map(Into::into)).column("created_at"),
                FilterField::new("DateTo", self.date_to.map(Into::into)).column("created_at"),
                FilterField::new("Name", self.name.clone().map(Into::into)),
            ]
        }
    }

    fn date(s: &str) -> SimpleDate {
        s.parse().unwrap()
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE test_records (id INTEGER PRIMARY KEY, created_at TEXT NOT NULL, name TEXT NOT NULL);",
        )
        .unwrap();
        let rows = [
            (1, Utc.with_ymd_and_hms(2025, 9, 1, 12, 0, 0).unwrap(), "record1"),
            (2, Utc.with_ymd_and_hms(2025, 9, 2, 12, 0, 0).unwrap(), "record2"),
            (3, Utc.with_ymd_and_hms(2025, 9, 3, 12, 0, 0).unwrap(), "record3"),
            (4, Utc.with_ymd_and_hms(2025, 9, 1, 23, 59, 59).unwrap(), "late"),
            (5, Utc.with_ymd_and_hms(2025, 9, 2, 0, 0, 1).unwrap(), "early"),
        ];
        for (id, ts, name) in rows {
            conn.execute(
                "INSERT INTO test_records (id, created_at, name) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, format_timestamp(&ts), name],
            )
            .unwrap();
        }
        conn
    }

    fn query_ids(conn: &Connection, filter: &TestFilter) -> Vec<i64> {
        let (clause, params) = build_predicate(filter).to_sql(None, 1);
        let sql = format!("SELECT id FROM test_records WHERE {clause} ORDER BY id");
        let mut stmt = conn.prepare(&sql).unwrap();
        let refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
        stmt.query_map(refs.as_slice(), |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<i64>, _>>()
            .unwrap()
    }

    #[test]
    fn test_filter_from_date() {
        let conn = setup();
        let filter = TestFilter {
            date_from: Some(date("2025-09-02")),
            date_to: None,
            name: None,
        };
        // 23:59:59 the day before is excluded, 00:00:01 on the day included.
        assert_eq!(query_ids(&conn, &filter), vec![2, 3, 5]);
    }

    #[test]
    fn test_filter_to_date() {
        let conn = setup();
        let filter = TestFilter {
            date_from: None,
            date_to: Some(date("2025-09-02")),
            name: None,
        };
        assert_eq!(query_ids(&conn, &filter), vec![1, 2, 4, 5]);
    }

    #[test]
    fn test_filter_date_range() {
        let conn = setup();
        let filter = TestFilter {
            date_from: Some(date("2025-09-02")),
            date_to: Some(date("2025-09-02")),
            name: None,
        };
        assert_eq!(query_ids(&conn, &filter), vec![2, 5]);
    }

    #[test]
    fn test_no_filter_matches_everything() {
        let conn = setup();
        let filter = TestFilter {
            date_from: None,
            date_to: None,
            name: None,
        };
        assert!(build_predicate(&filter).is_empty());
        assert_eq!(query_ids(&conn, &filter), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_empty_text_is_absent() {
        let filter = TestFilter {
            date_from: None,
            date_to: None,
            name: Some(String::new()),
        };
        assert!(build_predicate(&filter).is_empty());
    }

    #[test]
    fn test_equality_and_and_combination() {
        let conn = setup();
        let filter = TestFilter {
            date_from: Some(date("2025-09-01")),
            date_to: None,
            name: Some("record2".to_string()),
        };
        let predicate = build_predicate(&filter);
        assert_eq!(predicate.conditions().len(), 2);
        assert_eq!(predicate.conditions()[1].column, "name");
        assert_eq!(query_ids(&conn, &filter), vec![2]);
    }

    #[test]
    fn test_exact_date_matches_full_day() {
        struct OnDay(SimpleDate);
        impl FilterFields for OnDay {
            fn filter_fields(&self) -> Vec<FilterField> {
                vec![FilterField::new("CreatedOn", Some(self.0.into())).column("created_at")]
            }
        }

        let conn = setup();
        let filter = OnDay(date("2025-09-01"));
        let predicate = build_predicate(&filter);
        assert_eq!(predicate.conditions().len(), 2);
        assert_eq!(predicate.conditions()[0].comparison, Comparison::Gte);
        assert_eq!(predicate.conditions()[1].comparison, Comparison::Lte);

        let (clause, params) = predicate.to_sql(None, 1);
        let sql = format!("SELECT id FROM test_records WHERE {clause} ORDER BY id");
        let mut stmt = conn.prepare(&sql).unwrap();
        let refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
        let ids: Vec<i64> = stmt
            .query_map(refs.as_slice(), |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(ids, vec![1, 4]);
    }

    #[test]
    fn test_timestamp_bounds_are_exact() {
        struct Window(DateTime<Utc>);
        impl FilterFields for Window {
            fn filter_fields(&self) -> Vec<FilterField> {
                vec![FilterField::new("window_start", Some(self.0.into())).column("created_at")]
            }
        }
        let ts = Utc.with_ymd_and_hms(2025, 9, 2, 6, 0, 0).unwrap();
        let predicate = build_predicate(&Window(ts));
        assert_eq!(predicate.conditions()[0].comparison, Comparison::Gte);
        assert_eq!(
            predicate.conditions()[0].value,
            SqlParam::Text("2025-09-02T06:00:00.000000000Z".to_string())
        );
    }

    #[test]
    fn test_column_name_precedence() {
        let explicit = FilterField::new("DateFrom", None)
            .column("created_at")
            .serde_name("date_from");
        assert_eq!(explicit.column_name(), "created_at");

        let serde = FilterField::new("LawnService", None).serde_name("lawnServiceId");
        assert_eq!(serde.column_name(), "lawn_service_id");

        let derived = FilterField::new("UserID", None);
        assert_eq!(derived.column_name(), "user_id");
    }

    #[test]
    fn test_range_roles_match_whole_words() {
        assert_eq!(range_role("DateFrom"), RangeRole::Lower);
        assert_eq!(range_role("period_start"), RangeRole::Lower);
        assert_eq!(range_role("date_to"), RangeRole::Upper);
        assert_eq!(range_role("PeriodEnd"), RangeRole::Upper);
        assert_eq!(range_role("total"), RangeRole::Exact);
        assert_eq!(range_role("created_on"), RangeRole::Exact);
    }

    #[test]
    fn test_to_sql_numbering_and_qualifier() {
        let mut predicate = Predicate::default();
        predicate.push("user_id", Comparison::Eq, SqlParam::Text("u".into()));
        predicate.push("created_at", Comparison::Gte, SqlParam::Text("t".into()));
        let (sql, params) = predicate.to_sql(Some("l"), 3);
        assert_eq!(sql, "l.user_id = ?3 AND l.created_at >= ?4");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_day_bounds() {
        let day = date("2025-09-02");
        assert_eq!(format_timestamp(&day.start_of_day()), "2025-09-02T00:00:00.000000000Z");
        assert_eq!(format_timestamp(&day.end_of_day()), "2025-09-02T23:59:59.999999999Z");
        assert_eq!(day.to_string(), "2025-09-02");
        assert!("2025-13-01".parse::<SimpleDate>().is_err());
    }

    #[test]
    fn test_timestamp_text_round_trip() {
        let ts = Utc.with_ymd_and_hms(2025, 9, 2, 0, 0, 1).unwrap();
        assert_eq!(parse_timestamp(&format_timestamp(&ts)).unwrap(), ts);
    }
}
