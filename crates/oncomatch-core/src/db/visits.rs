//! Visit and medication database operations.

use std::collections::HashSet;

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};

use super::{Database, DbError, DbResult};
use crate::models::{NewMedication, NewVisit, Visit, VisitMedication};

/// Storage format for visit dates.
const DATE_FORMAT: &str = "%Y-%m-%d";

impl Database {
    /// Insert a visit and its medication lines in one transaction.
    ///
    /// Returns the new visit id.
    pub fn insert_visit_with_medications(
        &mut self,
        visit: &NewVisit,
        medications: &[NewMedication],
    ) -> DbResult<i64> {
        let tx = self.transaction()?;
        tx.execute(
            r#"
            INSERT INTO visits (
                vn, hn, visit_date, primary_diagnosis, secondary_diagnoses,
                hpi, doctor_notes, resolved_site_id, import_batch_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                visit.vn,
                visit.hn,
                visit.visit_date.format(DATE_FORMAT).to_string(),
                visit.primary_diagnosis,
                visit.secondary_diagnoses,
                visit.hpi,
                visit.doctor_notes,
                visit.resolved_site_id,
                visit.import_batch_id,
            ],
        )?;
        let visit_id = tx.last_insert_rowid();

        for med in medications {
            tx.execute(
                r#"
                INSERT INTO visit_medications (
                    visit_id, raw_line, parsed_code, parsed_name, quantity, unit, resolved_drug_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    visit_id,
                    med.raw_line,
                    med.parsed_code,
                    med.parsed_name,
                    med.quantity,
                    med.unit,
                    med.resolved_drug_id,
                ],
            )?;
        }

        tx.commit()?;
        Ok(visit_id)
    }

    /// Whether a visit with this VN exists.
    pub fn visit_exists(&self, vn: &str) -> DbResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM visits WHERE vn = ?",
            [vn],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Get a visit by VN.
    pub fn get_visit(&self, vn: &str) -> DbResult<Option<Visit>> {
        self.conn
            .query_row(
                r#"
                SELECT id, vn, hn, visit_date, primary_diagnosis, secondary_diagnoses,
                       hpi, doctor_notes, resolved_site_id, confirmed_protocol_id,
                       confirmed_regimen_id, import_batch_id
                FROM visits
                WHERE vn = ?
                "#,
                [vn],
                |row| {
                    Ok(VisitRow {
                        id: row.get(0)?,
                        vn: row.get(1)?,
                        hn: row.get(2)?,
                        visit_date: row.get(3)?,
                        primary_diagnosis: row.get(4)?,
                        secondary_diagnoses: row.get(5)?,
                        hpi: row.get(6)?,
                        doctor_notes: row.get(7)?,
                        resolved_site_id: row.get(8)?,
                        confirmed_protocol_id: row.get(9)?,
                        confirmed_regimen_id: row.get(10)?,
                        import_batch_id: row.get(11)?,
                    })
                },
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Medication lines of a visit, in insertion order.
    pub fn list_visit_medications(&self, visit_id: i64) -> DbResult<Vec<VisitMedication>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, visit_id, raw_line, parsed_code, parsed_name, quantity, unit, resolved_drug_id
            FROM visit_medications
            WHERE visit_id = ?
            ORDER BY id
            "#,
        )?;

        let rows = stmt.query_map([visit_id], |row| {
            Ok(VisitMedication {
                id: row.get(0)?,
                visit_id: row.get(1)?,
                raw_line: row.get(2)?,
                parsed_code: row.get(3)?,
                parsed_name: row.get(4)?,
                quantity: row.get(5)?,
                unit: row.get(6)?,
                resolved_drug_id: row.get(7)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Cache a resolved site on a visit. Only the first write lands.
    ///
    /// Returns whether this call wrote the value.
    pub fn cache_visit_site(&self, visit_id: i64, site_id: i64) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE visits SET resolved_site_id = ?1 WHERE id = ?2 AND resolved_site_id IS NULL",
            params![site_id, visit_id],
        )?;
        Ok(rows_affected > 0)
    }

    /// Record the reviewer's confirmed protocol/regimen for a visit.
    pub fn confirm_visit(
        &self,
        vn: &str,
        protocol_id: i64,
        regimen_id: Option<i64>,
    ) -> DbResult<()> {
        let rows_affected = self.conn.execute(
            "UPDATE visits SET confirmed_protocol_id = ?1, confirmed_regimen_id = ?2 WHERE vn = ?3",
            params![protocol_id, regimen_id, vn],
        )?;
        if rows_affected == 0 {
            return Err(DbError::NotFound(format!("visit {vn}")));
        }
        Ok(())
    }

    /// Protocol ids confirmed on the patient's other visits.
    pub fn confirmed_protocols_for_patient(
        &self,
        hn: &str,
        excluding_vn: &str,
    ) -> DbResult<HashSet<i64>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT DISTINCT confirmed_protocol_id
            FROM visits
            WHERE hn = ?1 AND vn <> ?2 AND confirmed_protocol_id IS NOT NULL
            "#,
        )?;
        let rows = stmt.query_map(params![hn, excluding_vn], |row| row.get(0))?;
        rows.collect::<Result<HashSet<_>, _>>().map_err(Into::into)
    }
}

/// Intermediate row struct for database mapping.
struct VisitRow {
    id: i64,
    vn: String,
    hn: String,
    visit_date: String,
    primary_diagnosis: String,
    secondary_diagnoses: Option<String>,
    hpi: Option<String>,
    doctor_notes: Option<String>,
    resolved_site_id: Option<i64>,
    confirmed_protocol_id: Option<i64>,
    confirmed_regimen_id: Option<i64>,
    import_batch_id: Option<String>,
}

impl TryFrom<VisitRow> for Visit {
    type Error = DbError;

    fn try_from(row: VisitRow) -> Result<Self, Self::Error> {
        Ok(Visit {
            id: row.id,
            vn: row.vn,
            hn: row.hn,
            visit_date: NaiveDate::parse_from_str(&row.visit_date, DATE_FORMAT)?,
            primary_diagnosis: row.primary_diagnosis,
            secondary_diagnoses: row.secondary_diagnoses,
            hpi: row.hpi,
            doctor_notes: row.doctor_notes,
            resolved_site_id: row.resolved_site_id,
            confirmed_protocol_id: row.confirmed_protocol_id,
            confirmed_regimen_id: row.confirmed_regimen_id,
            import_batch_id: row.import_batch_id,
        })
    }
}
