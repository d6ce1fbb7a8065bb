//! PostgreSQL implementations of the data source and sink
//!
//! Reads go against the warehouse mirror of the EMR; every value reaches the
//! query through a bind parameter. Writes are full-table replacements inside
//! one transaction, since downstream reporting reads whole tables.

use crate::error::{Result, SourceError};
use crate::rows::{
    BillableVisitRow, CallRow, CounselingRow, DemographicsRow, DiagnosisRow, EncounterEventRow,
    EncounterRow, InsuranceSpan, ScreeningRow,
};
use crate::sink::MeasureSink;
use crate::source::{ClinicalDataSource, CodeFilter, IcdMatch, ScreeningTool};
use async_trait::async_trait;
use ccbhc_core::{MeasurementPeriod, Table, Value};
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;

/// Clinical warehouse reader over a shared connection pool
pub struct PgClinicalSource {
    pool: PgPool,
}

impl PgClinicalSource {
    /// Wrap an existing pool
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a new pool. Queries have no intrinsic timeout, so the pool
    /// enforces one at acquisition; a slow warehouse surfaces as a
    /// `Database` error instead of a hang.
    pub async fn connect(url: &str, max_connections: u32, acquire_timeout: Duration) -> Result<Self> {
        tracing::info!(max_connections, "connecting to clinical warehouse");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_score(raw: Option<String>) -> Option<i64> {
    let raw = raw?;
    let trimmed = raw.trim();
    trimmed
        .parse::<i64>()
        .ok()
        .or_else(|| trimmed.parse::<f64>().ok().map(|f| f as i64))
}

fn encounter_row(row: &PgRow) -> Result<EncounterRow> {
    Ok(EncounterRow {
        patient_id: row.try_get("patient_id")?,
        encounter_id: row.try_get("encounter_id")?,
        visit: row.try_get::<NaiveDateTime, _>("visit")?,
        dob: row.try_get::<Option<NaiveDate>, _>("dob")?,
    })
}

fn event_row(row: &PgRow) -> Result<EncounterEventRow> {
    Ok(EncounterEventRow {
        patient_id: row.try_get("patient_id")?,
        encounter_id: row.try_get("encounter_id")?,
        visit: row.try_get::<NaiveDateTime, _>("visit")?,
    })
}

#[async_trait]
impl ClinicalDataSource for PgClinicalSource {
    async fn encounters(&self, period: &MeasurementPeriod) -> Result<Vec<EncounterRow>> {
        let rows = sqlx::query(
            r#"
            SELECT e.PatientId AS patient_id,
                   e.EncounterID AS encounter_id,
                   e.VisitDateTime AS visit,
                   p.DOB AS dob
            FROM tblEncounterSummary e
            LEFT JOIN emr_PatientDetails p ON e.PatientId = p.PatientId
            INNER JOIN ptPatient_Activity a ON e.PatientId = a.PatientID
            WHERE e.VisitDateTime >= $1
            ORDER BY e.PatientId, e.VisitDateTime
            "#,
        )
        .bind(period.start_datetime())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(encounter_row).collect()
    }

    async fn encounters_with_codes(
        &self,
        period: Option<&MeasurementPeriod>,
        codes: &[&str],
    ) -> Result<Vec<EncounterRow>> {
        let codes: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        let rows = match period {
            Some(period) => {
                sqlx::query(
                    r#"
                    SELECT e.PatientId AS patient_id,
                           e.EncounterID AS encounter_id,
                           e.VisitDateTime AS visit,
                           p.DOB AS dob
                    FROM tblEncounterSummary e
                    LEFT JOIN emr_PatientDetails p ON e.PatientId = p.PatientId
                    LEFT JOIN tblEncounterTypeCPTMap m ON e.EncounterTypeId = m.EncounterTypeID
                    INNER JOIN ptPatient_Activity a ON e.PatientId = a.PatientID
                    WHERE m.CPTCode = ANY($1) AND e.VisitDateTime >= $2
                    ORDER BY e.PatientId, e.VisitDateTime
                    "#,
                )
                .bind(&codes)
                .bind(period.start_datetime())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT e.PatientId AS patient_id,
                           e.EncounterID AS encounter_id,
                           e.VisitDateTime AS visit,
                           p.DOB AS dob
                    FROM tblEncounterSummary e
                    LEFT JOIN emr_PatientDetails p ON e.PatientId = p.PatientId
                    LEFT JOIN tblEncounterTypeCPTMap m ON e.EncounterTypeId = m.EncounterTypeID
                    INNER JOIN ptPatient_Activity a ON e.PatientId = a.PatientID
                    WHERE m.CPTCode = ANY($1)
                    ORDER BY e.PatientId, e.VisitDateTime
                    "#,
                )
                .bind(&codes)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(encounter_row).collect()
    }

    async fn diagnoses(&self, filter: &CodeFilter) -> Result<Vec<DiagnosisRow>> {
        if filter.patterns().is_empty() {
            return Ok(Vec::new());
        }
        let clauses: Vec<String> = filter
            .patterns()
            .iter()
            .enumerate()
            .map(|(i, pattern)| match pattern {
                IcdMatch::Prefix(_) => format!("d.ICD10 LIKE ${}", i + 1),
                IcdMatch::Exact(_) => format!("d.ICD10 = ${}", i + 1),
            })
            .collect();
        let sql = format!(
            r#"
            SELECT DISTINCT d.PatientId AS patient_id,
                            e.VisitDateTime AS recorded_at
            FROM Diagnosis d
            LEFT JOIN tblEncounterSummary e ON d.EncounterId = e.EncounterID
            WHERE {}
            "#,
            clauses.join(" OR ")
        );
        let mut query = sqlx::query(&sql);
        for pattern in filter.patterns() {
            query = match pattern {
                IcdMatch::Prefix(prefix) => query.bind(format!("{prefix}%")),
                IcdMatch::Exact(exact) => query.bind(exact.clone()),
            };
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(DiagnosisRow {
                    patient_id: row.try_get("patient_id")?,
                    recorded_at: row.try_get::<Option<NaiveDateTime>, _>("recorded_at")?,
                })
            })
            .collect()
    }

    async fn screenings(
        &self,
        tool: ScreeningTool,
        period: Option<&MeasurementPeriod>,
    ) -> Result<Vec<ScreeningRow>> {
        // Screenings with no resolvable visit date can never satisfy a dated
        // criterion, so the join is inner.
        let (table, score_expr) = match tool {
            ScreeningTool::PhqAdult => ("tblAssessmentToolsPHQA", "s.TotalScore"),
            ScreeningTool::PhqAdolescent => ("tblAssessmentToolsPHQuetions", "s.TotalScore"),
            ScreeningTool::Audit => ("tblAssessmentToolsAudit", "s.TotalScore"),
            ScreeningTool::SocialNeeds => ("DF_SocialNeedsScreeningTool", "NULL"),
        };
        let mut sql = format!(
            r#"
            SELECT s.PatientId AS patient_id,
                   s.EncounterID AS encounter_id,
                   e.VisitDateTime AS visit,
                   CAST({score_expr} AS TEXT) AS score
            FROM {table} s
            INNER JOIN tblEncounterSummary e ON s.EncounterID = e.EncounterID
            "#
        );
        if period.is_some() {
            sql.push_str(" WHERE e.VisitDateTime >= $1");
        }
        sql.push_str(" ORDER BY s.PatientId, e.VisitDateTime");

        let mut query = sqlx::query(&sql);
        if let Some(period) = period {
            query = query.bind(period.start_datetime());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(ScreeningRow {
                    patient_id: row.try_get("patient_id")?,
                    encounter_id: row.try_get("encounter_id")?,
                    visit: row.try_get::<NaiveDateTime, _>("visit")?,
                    score: parse_score(row.try_get::<Option<String>, _>("score")?),
                })
            })
            .collect()
    }

    async fn brief_counseling_encounters(&self) -> Result<Vec<CounselingRow>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT v.PatientID AS patient_id,
                            v.EncounterID AS encounter_id,
                            e.VisitDateTime AS visit
            FROM tblTreatmentPlanCustomtabCustomFieldValues v
            LEFT JOIN tblTreatmentPlanValues tv ON v.OrderSetValueID = tv.OrderSetValueID
            INNER JOIN tblEncounterSummary e ON v.EncounterID = e.EncounterId
            WHERE tv.ValueDescription = $1
            "#,
        )
        .bind("Brief Intervention")
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(CounselingRow {
                    patient_id: row.try_get("patient_id")?,
                    encounter_id: row.try_get("encounter_id")?,
                    visit: row.try_get::<NaiveDateTime, _>("visit")?,
                })
            })
            .collect()
    }

    async fn intake_calls(&self, period: &MeasurementPeriod) -> Result<Vec<CallRow>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT pm.PatientID AS patient_id,
                            pm.ProgramManagementDetailID AS call_id,
                            pm.StartDate AS start_date,
                            p.DOB AS dob
            FROM tblProgramManagementDetails pm
            LEFT JOIN emr_PatientDetails p ON pm.PatientID = p.PatientID
            INNER JOIN ptPatient_Activity a ON pm.PatientID = a.PatientID
            WHERE pm.StartDate IS NOT NULL AND pm.StartDate >= $1
            "#,
        )
        .bind(period.start_datetime())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(CallRow {
                    patient_id: row.try_get("patient_id")?,
                    call_id: row.try_get("call_id")?,
                    start: row.try_get::<NaiveDateTime, _>("start_date")?,
                    dob: row.try_get::<Option<NaiveDate>, _>("dob")?,
                })
            })
            .collect()
    }

    async fn initial_evaluations(
        &self,
        period: &MeasurementPeriod,
    ) -> Result<Vec<EncounterEventRow>> {
        let rows = sqlx::query(
            r#"
            SELECT e.PatientId AS patient_id,
                   e.EncounterId AS encounter_id,
                   e.VisitDateTime AS visit
            FROM tblEncounterSummary e
            WHERE e.EncounterTypeLong LIKE $1 AND e.VisitDateTime >= $2
            ORDER BY e.PatientId, e.VisitDateTime
            "#,
        )
        .bind("Initial Evaluation-1%")
        .bind(period.start_datetime())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(event_row).collect()
    }

    async fn billable_encounters_since(&self, year: i32) -> Result<Vec<BillableVisitRow>> {
        let since = NaiveDate::from_ymd_opt(year, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .ok_or_else(|| SourceError::Decode(format!("invalid lookback year {year}")))?;
        let rows = sqlx::query(
            r#"
            SELECT e.PatientId AS patient_id,
                   e.VisitDateTime AS visit
            FROM tblEncounterSummary e
            LEFT JOIN tblEncounterType t ON e.EncounterTypeId = t.EncounterTypeID
            WHERE t.IsBillable = TRUE AND e.VisitDateTime >= $1
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(BillableVisitRow {
                    patient_id: row.try_get("patient_id")?,
                    visit: row.try_get::<NaiveDateTime, _>("visit")?,
                })
            })
            .collect()
    }

    async fn clinical_services(
        &self,
        period: &MeasurementPeriod,
    ) -> Result<Vec<EncounterEventRow>> {
        let rows = sqlx::query(
            r#"
            SELECT e.PatientId AS patient_id,
                   e.EncounterId AS encounter_id,
                   e.VisitDateTime AS visit
            FROM tblEncounterSummary e
            LEFT JOIN tblEncounterType t ON e.EncounterTypeId = t.EncounterTypeID
            WHERE t.IsBillable = TRUE
              AND t.EncounterType NOT LIKE $1
              AND e.VisitDateTime >= $2
            ORDER BY e.PatientId, e.VisitDateTime
            "#,
        )
        .bind("Initial Evaluation%")
        .bind(period.start_datetime())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(event_row).collect()
    }

    async fn demographics(&self, patient_ids: &[i64]) -> Result<Vec<DemographicsRow>> {
        if patient_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT p.PatientId AS patient_id,
                   p.DOB AS dob,
                   p.EthnicityGroupName AS ethnicity,
                   r.RaceGroupName AS race
            FROM emr_PatientDetails p
            LEFT JOIN emr_PatientRaceGroupTransaction r ON p.PatientId = r.PatientId
            WHERE p.PatientId = ANY($1)
            ORDER BY p.PatientId
            "#,
        )
        .bind(patient_ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(DemographicsRow {
                    patient_id: row.try_get("patient_id")?,
                    dob: row.try_get::<Option<NaiveDate>, _>("dob")?,
                    ethnicity: row.try_get::<Option<String>, _>("ethnicity")?,
                    race: row.try_get::<Option<String>, _>("race")?,
                })
            })
            .collect()
    }

    async fn insurance_spans(&self, patient_ids: &[i64]) -> Result<Vec<InsuranceSpan>> {
        if patient_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT pp.PatientId AS patient_id,
                   pp.EffectiveDate AS start_date,
                   pp.DisenrollmentDate AS end_date,
                   LOWER(pl.PayerPlanName) AS plan
            FROM tblPatientPayers pp
            LEFT JOIN tblPayerPlans pl ON pp.PayerPlanID = pl.PayerPlanID
            WHERE pp.PatientId = ANY($1)
            "#,
        )
        .bind(patient_ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(InsuranceSpan {
                    patient_id: row.try_get("patient_id")?,
                    start: row.try_get::<NaiveDate, _>("start_date")?,
                    end: row.try_get::<Option<NaiveDate>, _>("end_date")?,
                    plan: row
                        .try_get::<Option<String>, _>("plan")?
                        .unwrap_or_default(),
                })
            })
            .collect()
    }
}

/// Column types the sink can create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PgType {
    Bool,
    BigInt,
    Double,
    Text,
    Date,
    Timestamp,
}

impl PgType {
    fn ddl(self) -> &'static str {
        match self {
            PgType::Bool => "BOOLEAN",
            PgType::BigInt => "BIGINT",
            PgType::Double => "DOUBLE PRECISION",
            PgType::Text => "TEXT",
            PgType::Date => "DATE",
            PgType::Timestamp => "TIMESTAMP",
        }
    }

    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(PgType::Bool),
            Value::Int(_) => Some(PgType::BigInt),
            Value::Float(_) => Some(PgType::Double),
            Value::Str(_) => Some(PgType::Text),
            Value::Date(_) => Some(PgType::Date),
            Value::DateTime(_) => Some(PgType::Timestamp),
        }
    }
}

/// Replace-mode report table writer
pub struct PgMeasureSink {
    pool: PgPool,
}

impl PgMeasureSink {
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A column's storage type: the single variant it holds, or TEXT when
    /// rows mix variants (the Medicaid column holds booleans and "Unknown")
    fn column_types(table: &Table) -> Vec<PgType> {
        (0..table.columns().len())
            .map(|idx| {
                let mut inferred: Option<PgType> = None;
                for row in table.rows() {
                    match (inferred, PgType::of(&row[idx])) {
                        (_, None) => {}
                        (None, Some(t)) => inferred = Some(t),
                        (Some(current), Some(t)) if current == t => {}
                        (Some(_), Some(_)) => return PgType::Text,
                    }
                }
                inferred.unwrap_or(PgType::Text)
            })
            .collect()
    }
}

fn valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    value: &Value,
    ty: PgType,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    // A null binds as None of the column's storage type
    match ty {
        PgType::Bool => query.bind(value.as_bool()),
        PgType::BigInt => query.bind(value.as_int()),
        PgType::Double => query.bind(match value {
            Value::Float(f) => Some(*f),
            _ => None,
        }),
        PgType::Date => query.bind(match value {
            Value::Date(d) => Some(*d),
            _ => None,
        }),
        PgType::Timestamp => query.bind(match value {
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        }),
        PgType::Text => query.bind(match value {
            Value::Null => None,
            other => Some(other.to_string()),
        }),
    }
}

#[async_trait]
impl MeasureSink for PgMeasureSink {
    async fn write_table(&self, name: &str, table: &Table) -> Result<()> {
        if !valid_identifier(name) {
            return Err(SourceError::InvalidTableName(name.to_string()));
        }
        for column in table.columns() {
            if !valid_identifier(column) {
                return Err(SourceError::InvalidTableName(column.clone()));
            }
        }

        let types = Self::column_types(table);
        let column_ddl: Vec<String> = table
            .columns()
            .iter()
            .zip(&types)
            .map(|(col, ty)| format!("\"{col}\" {}", ty.ddl()))
            .collect();
        let quoted: Vec<String> = table
            .columns()
            .iter()
            .map(|col| format!("\"{col}\""))
            .collect();
        let placeholders: Vec<String> =
            (1..=table.columns().len()).map(|i| format!("${i}")).collect();
        let insert_sql = format!(
            "INSERT INTO \"{name}\" ({}) VALUES ({})",
            quoted.join(", "),
            placeholders.join(", ")
        );

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS \"{name}\""))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "CREATE TABLE \"{name}\" ({})",
            column_ddl.join(", ")
        ))
        .execute(&mut *tx)
        .await?;
        for row in table.rows() {
            let mut query = sqlx::query(&insert_sql);
            for (value, ty) in row.iter().zip(&types) {
                query = bind_value(query, value, *ty);
            }
            query.execute(&mut *tx).await?;
        }
        tx.commit().await?;

        tracing::info!(table = name, rows = table.len(), "replaced report table");
        Ok(())
    }
}
