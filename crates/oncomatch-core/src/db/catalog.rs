//! Reference catalog operations: sites, prefixes, drugs, protocols, regimens.

use std::collections::HashMap;

use rusqlite::{params, OptionalExtension};

use super::{Database, DbResult};
use crate::models::{
    CancerSite, Drug, Icd10PrefixMapping, NameTier, Protocol, ProtocolCandidate,
    ProtocolRegimenLink, Regimen, RegimenDrug, TradeName,
};

impl Database {
    // =========================================================================
    // Sites and ICD-10 prefixes
    // =========================================================================

    /// Insert or update a cancer site.
    pub fn upsert_site(&self, site: &CancerSite) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO cancer_sites (id, code, name_en, name_th, active)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                code = excluded.code,
                name_en = excluded.name_en,
                name_th = excluded.name_th,
                active = excluded.active
            "#,
            params![site.id, site.code, site.name_en, site.name_th, site.active],
        )?;
        Ok(())
    }

    /// Get a site by id.
    pub fn get_site(&self, id: i64) -> DbResult<Option<CancerSite>> {
        self.conn
            .query_row(
                "SELECT id, code, name_en, name_th, active FROM cancer_sites WHERE id = ?",
                [id],
                |row| {
                    Ok(CancerSite {
                        id: row.get(0)?,
                        code: row.get(1)?,
                        name_en: row.get(2)?,
                        name_th: row.get(3)?,
                        active: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// Insert or update an ICD-10 prefix mapping.
    pub fn upsert_prefix_mapping(&self, mapping: &Icd10PrefixMapping) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO icd10_prefix_mappings (prefix, site_id, active)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(prefix) DO UPDATE SET
                site_id = excluded.site_id,
                active = excluded.active
            "#,
            params![mapping.prefix, mapping.site_id, mapping.active],
        )?;
        Ok(())
    }

    /// Site id for an exact, active prefix row.
    pub fn find_active_prefix(&self, prefix: &str) -> DbResult<Option<i64>> {
        self.conn
            .query_row(
                "SELECT site_id FROM icd10_prefix_mappings WHERE prefix = ? AND active = 1",
                [prefix],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    // =========================================================================
    // Drugs and trade names
    // =========================================================================

    /// Insert or update a drug.
    pub fn upsert_drug(&self, drug: &Drug) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO drugs (id, generic_name, category, active)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                generic_name = excluded.generic_name,
                category = excluded.category,
                active = excluded.active
            "#,
            params![drug.id, drug.generic_name, drug.category, drug.active],
        )?;
        Ok(())
    }

    /// Insert or update a trade name.
    pub fn upsert_trade_name(&self, trade_name: &TradeName) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO drug_trade_names (id, drug_id, name, active)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                drug_id = excluded.drug_id,
                name = excluded.name,
                active = excluded.active
            "#,
            params![trade_name.id, trade_name.drug_id, trade_name.name, trade_name.active],
        )?;
        Ok(())
    }

    /// Get drugs by id, in id order. Missing ids are skipped.
    pub fn get_drugs(&self, ids: &[i64]) -> DbResult<Vec<Drug>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, generic_name, category, active FROM drugs WHERE id = ?",
        )?;

        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut drugs = Vec::with_capacity(sorted.len());
        for id in sorted {
            let drug = stmt
                .query_row([id], |row| {
                    Ok(Drug {
                        id: row.get(0)?,
                        generic_name: row.get(1)?,
                        category: row.get(2)?,
                        active: row.get(3)?,
                    })
                })
                .optional()?;
            drugs.extend(drug);
        }
        Ok(drugs)
    }

    /// First active trade name matching `candidate` at `tier`; returns its drug id.
    ///
    /// `candidate` must already be uppercase.
    pub fn find_trade_name_drug(&self, candidate: &str, tier: NameTier) -> DbResult<Option<i64>> {
        let sql = format!(
            r#"
            SELECT t.drug_id
            FROM drug_trade_names t
            JOIN drugs d ON d.id = t.drug_id
            WHERE t.active = 1 AND d.active = 1 AND {}
            ORDER BY t.id
            LIMIT 1
            "#,
            tier_condition(tier, "t.name")
        );
        self.conn
            .query_row(&sql, [candidate], |row| row.get(0))
            .optional()
            .map_err(Into::into)
    }

    /// First active generic name matching `candidate` at `tier`.
    ///
    /// `candidate` must already be uppercase.
    pub fn find_generic_drug(&self, candidate: &str, tier: NameTier) -> DbResult<Option<i64>> {
        let sql = format!(
            r#"
            SELECT d.id
            FROM drugs d
            WHERE d.active = 1 AND {}
            ORDER BY d.id
            LIMIT 1
            "#,
            tier_condition(tier, "d.generic_name")
        );
        self.conn
            .query_row(&sql, [candidate], |row| row.get(0))
            .optional()
            .map_err(Into::into)
    }

    /// All active generic and trade names as (drug id, name).
    pub fn list_active_drug_names(&self) -> DbResult<Vec<(i64, String)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, generic_name FROM drugs WHERE active = 1
            UNION ALL
            SELECT t.drug_id, t.name
            FROM drug_trade_names t
            JOIN drugs d ON d.id = t.drug_id
            WHERE t.active = 1 AND d.active = 1
            "#,
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // =========================================================================
    // Protocols and regimens
    // =========================================================================

    /// Insert or update a protocol.
    pub fn upsert_protocol(&self, protocol: &Protocol) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO protocols (
                id, code, name_en, name_th, protocol_type, treatment_intent, site_id, active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                code = excluded.code,
                name_en = excluded.name_en,
                name_th = excluded.name_th,
                protocol_type = excluded.protocol_type,
                treatment_intent = excluded.treatment_intent,
                site_id = excluded.site_id,
                active = excluded.active
            "#,
            params![
                protocol.id,
                protocol.code,
                protocol.name_en,
                protocol.name_th,
                protocol.protocol_type,
                protocol.treatment_intent,
                protocol.site_id,
                protocol.active,
            ],
        )?;
        Ok(())
    }

    /// Replace the declared stage codes of a protocol.
    pub fn set_protocol_stages(&self, protocol_id: i64, stage_codes: &[&str]) -> DbResult<()> {
        self.conn
            .execute("DELETE FROM protocol_stages WHERE protocol_id = ?", [protocol_id])?;
        for code in stage_codes {
            self.conn.execute(
                "INSERT OR IGNORE INTO protocol_stages (protocol_id, stage_code) VALUES (?1, ?2)",
                params![protocol_id, code.trim().to_uppercase()],
            )?;
        }
        Ok(())
    }

    /// Insert or update a regimen together with its drug list.
    pub fn upsert_regimen(&self, regimen: &Regimen) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO regimens (id, code, name) VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET code = excluded.code, name = excluded.name
            "#,
            params![regimen.id, regimen.code, regimen.name],
        )?;
        self.conn
            .execute("DELETE FROM regimen_drugs WHERE regimen_id = ?", [regimen.id])?;
        for (position, drug) in regimen.drugs.iter().enumerate() {
            self.conn.execute(
                r#"
                INSERT INTO regimen_drugs (regimen_id, drug_id, position, optional)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![regimen.id, drug.drug_id, position as i64, drug.optional],
            )?;
        }
        Ok(())
    }

    /// Link a regimen to a protocol. `link_order` decides scoring tie-breaks.
    pub fn link_protocol_regimen(
        &self,
        protocol_id: i64,
        regimen_id: i64,
        link_order: i64,
        line_of_therapy: Option<i64>,
        is_preferred: bool,
    ) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO protocol_regimens (
                protocol_id, regimen_id, link_order, line_of_therapy, is_preferred
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(protocol_id, regimen_id) DO UPDATE SET
                link_order = excluded.link_order,
                line_of_therapy = excluded.line_of_therapy,
                is_preferred = excluded.is_preferred
            "#,
            params![protocol_id, regimen_id, link_order, line_of_therapy, is_preferred],
        )?;
        Ok(())
    }

    /// Load every active protocol of a site with stages and regimen links.
    ///
    /// Protocols come back in id order, links in link order, regimen drugs in
    /// stored position order.
    pub fn load_site_candidates(&self, site_id: i64) -> DbResult<Vec<ProtocolCandidate>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, code, name_en, name_th, protocol_type, treatment_intent, site_id, active
            FROM protocols
            WHERE site_id = ? AND active = 1
            ORDER BY id
            "#,
        )?;
        let protocols = stmt
            .query_map([site_id], |row| {
                Ok(Protocol {
                    id: row.get(0)?,
                    code: row.get(1)?,
                    name_en: row.get(2)?,
                    name_th: row.get(3)?,
                    protocol_type: row.get(4)?,
                    treatment_intent: row.get(5)?,
                    site_id: row.get(6)?,
                    active: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut regimen_cache: HashMap<i64, Regimen> = HashMap::new();
        let mut candidates = Vec::with_capacity(protocols.len());
        for protocol in protocols {
            let stage_codes = self.protocol_stage_codes(protocol.id)?;
            let regimens = self.protocol_regimen_links(protocol.id, &mut regimen_cache)?;
            candidates.push(ProtocolCandidate {
                protocol,
                stage_codes,
                regimens,
            });
        }
        Ok(candidates)
    }

    fn protocol_stage_codes(&self, protocol_id: i64) -> DbResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT stage_code FROM protocol_stages WHERE protocol_id = ? ORDER BY stage_code",
        )?;
        let rows = stmt.query_map([protocol_id], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn protocol_regimen_links(
        &self,
        protocol_id: i64,
        regimen_cache: &mut HashMap<i64, Regimen>,
    ) -> DbResult<Vec<ProtocolRegimenLink>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT regimen_id, line_of_therapy, is_preferred
            FROM protocol_regimens
            WHERE protocol_id = ?
            ORDER BY link_order, rowid
            "#,
        )?;
        let links: Vec<(i64, Option<i64>, bool)> = stmt
            .query_map([protocol_id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut result = Vec::with_capacity(links.len());
        for (regimen_id, line_of_therapy, is_preferred) in links {
            let regimen = match regimen_cache.get(&regimen_id) {
                Some(regimen) => regimen.clone(),
                None => {
                    let Some(regimen) = self.get_regimen(regimen_id)? else {
                        continue;
                    };
                    regimen_cache.insert(regimen_id, regimen.clone());
                    regimen
                }
            };
            result.push(ProtocolRegimenLink {
                regimen,
                line_of_therapy,
                is_preferred,
            });
        }
        Ok(result)
    }

    /// Get a regimen with its drugs.
    pub fn get_regimen(&self, id: i64) -> DbResult<Option<Regimen>> {
        let regimen = self
            .conn
            .query_row(
                "SELECT id, code, name FROM regimens WHERE id = ?",
                [id],
                |row| Ok(Regimen::new(row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some(mut regimen) = regimen else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT drug_id, optional FROM regimen_drugs WHERE regimen_id = ? ORDER BY position",
        )?;
        regimen.drugs = stmt
            .query_map([id], |row| {
                Ok(RegimenDrug {
                    drug_id: row.get(0)?,
                    optional: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(regimen))
    }
}

/// SQL condition for a name tier. `?1` is the uppercase candidate.
fn tier_condition(tier: NameTier, column: &str) -> String {
    match tier {
        NameTier::Exact => format!("UPPER(TRIM({column})) = ?1"),
        NameTier::Prefix => format!("substr(UPPER(TRIM({column})), 1, length(?1)) = ?1"),
        NameTier::Substring => format!("instr(UPPER({column}), ?1) > 0"),
    }
}
