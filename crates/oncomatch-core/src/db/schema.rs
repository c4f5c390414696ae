//! SQLite schema definition.

/// Complete database schema for oncomatch.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Code Hierarchy
-- ============================================================================

CREATE TABLE IF NOT EXISTS cancer_sites (
    id INTEGER PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    name_en TEXT NOT NULL,
    name_th TEXT,
    active INTEGER NOT NULL DEFAULT 1
);

-- Exact-prefix rows; specificity comes from lookup order, not ranges
CREATE TABLE IF NOT EXISTS icd10_prefix_mappings (
    prefix TEXT PRIMARY KEY,                     -- normalized: no dots, uppercase
    site_id INTEGER NOT NULL REFERENCES cancer_sites(id),
    active INTEGER NOT NULL DEFAULT 1
);

-- ============================================================================
-- Drugs
-- ============================================================================

CREATE TABLE IF NOT EXISTS drugs (
    id INTEGER PRIMARY KEY,
    generic_name TEXT NOT NULL,
    category TEXT NOT NULL DEFAULT '',
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS drug_trade_names (
    id INTEGER PRIMARY KEY,
    drug_id INTEGER NOT NULL REFERENCES drugs(id),
    name TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_drugs_generic ON drugs(generic_name);
CREATE INDEX IF NOT EXISTS idx_trade_names_drug ON drug_trade_names(drug_id);

-- ============================================================================
-- Protocols and Regimens
-- ============================================================================

CREATE TABLE IF NOT EXISTS protocols (
    id INTEGER PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    name_en TEXT NOT NULL,
    name_th TEXT,
    protocol_type TEXT NOT NULL,                 -- treatment, radiation, follow_up, ...
    treatment_intent TEXT,                       -- curative, palliative, concurrent_crt, ...
    site_id INTEGER NOT NULL REFERENCES cancer_sites(id),
    active INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_protocols_site ON protocols(site_id, active);

CREATE TABLE IF NOT EXISTS protocol_stages (
    protocol_id INTEGER NOT NULL REFERENCES protocols(id),
    stage_code TEXT NOT NULL,                    -- uppercase
    PRIMARY KEY (protocol_id, stage_code)
);

CREATE TABLE IF NOT EXISTS regimens (
    id INTEGER PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS regimen_drugs (
    regimen_id INTEGER NOT NULL REFERENCES regimens(id),
    drug_id INTEGER NOT NULL REFERENCES drugs(id),
    position INTEGER NOT NULL,
    optional INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (regimen_id, drug_id)
);

CREATE TABLE IF NOT EXISTS protocol_regimens (
    protocol_id INTEGER NOT NULL REFERENCES protocols(id),
    regimen_id INTEGER NOT NULL REFERENCES regimens(id),
    link_order INTEGER NOT NULL,                 -- tie-break order for scoring
    line_of_therapy INTEGER,
    is_preferred INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (protocol_id, regimen_id)
);

-- ============================================================================
-- Visits
-- ============================================================================

CREATE TABLE IF NOT EXISTS visits (
    id INTEGER PRIMARY KEY,
    vn TEXT NOT NULL UNIQUE,
    hn TEXT NOT NULL,
    visit_date TEXT NOT NULL,                    -- YYYY-MM-DD
    primary_diagnosis TEXT NOT NULL,
    secondary_diagnoses TEXT,                    -- normalized codes joined with '|'
    hpi TEXT,
    doctor_notes TEXT,
    resolved_site_id INTEGER REFERENCES cancer_sites(id),
    confirmed_protocol_id INTEGER REFERENCES protocols(id),
    confirmed_regimen_id INTEGER REFERENCES regimens(id),
    import_batch_id TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_visits_hn ON visits(hn);

CREATE TABLE IF NOT EXISTS visit_medications (
    id INTEGER PRIMARY KEY,
    visit_id INTEGER NOT NULL REFERENCES visits(id) ON DELETE CASCADE,
    raw_line TEXT NOT NULL,
    parsed_code TEXT,
    parsed_name TEXT NOT NULL,
    quantity REAL,
    unit TEXT,
    resolved_drug_id INTEGER REFERENCES drugs(id)
);

CREATE INDEX IF NOT EXISTS idx_visit_medications_visit ON visit_medications(visit_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_valid() {
        let conn = Connection::open_in_memory().unwrap();
        let result = conn.execute_batch(SCHEMA);
        assert!(result.is_ok(), "Schema should be valid SQL: {:?}", result);
    }

    #[test]
    fn test_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        assert!(conn.execute_batch(SCHEMA).is_ok());
    }

    #[test]
    fn test_duplicate_vn_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();

        let insert = "INSERT INTO visits (vn, hn, visit_date, primary_diagnosis) VALUES ('V001', 'H1', '2024-01-01', 'C509')";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }

    #[test]
    fn test_prefix_requires_site() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();

        let result = conn.execute(
            "INSERT INTO icd10_prefix_mappings (prefix, site_id) VALUES ('C50', 99)",
            [],
        );
        assert!(result.is_err());
    }
}
