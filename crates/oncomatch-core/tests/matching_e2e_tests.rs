//! End-to-end tests: import a sheet, then match the imported visits.

use oncomatch_core::db::Database;
use oncomatch_core::formulary::StaticFormulary;
use oncomatch_core::ingest::{self, CellValue, RawSheet};
use oncomatch_core::matching::MatchEngine;
use oncomatch_core::models::{
    CancerSite, Drug, Icd10PrefixMapping, MatchKind, Protocol, Regimen, RegimenDrug, Stage,
    TradeName,
};

const BREAST: i64 = 1;

fn seed_catalog() -> Database {
    let db = Database::open_in_memory().unwrap();

    db.upsert_site(&CancerSite::new(BREAST, "BREAST".into(), "Breast".into()))
        .unwrap();
    db.upsert_prefix_mapping(&Icd10PrefixMapping::new("C50", BREAST)).unwrap();

    db.upsert_drug(&Drug::new(1, "TAMOXIFEN".into(), "hormonal".into()))
        .unwrap();
    db.upsert_drug(&Drug::new(2, "PACLITAXEL".into(), "chemotherapy".into()))
        .unwrap();
    db.upsert_drug(&Drug::new(3, "GEMCITABINE".into(), "chemotherapy".into()))
        .unwrap();
    db.upsert_trade_name(&TradeName::new(1, 1, "Nolvadex".into()))
        .unwrap();

    let mut tam = Regimen::new(10, "TAM".into(), "Tamoxifen".into());
    tam.drugs = vec![RegimenDrug { drug_id: 1, optional: false }];
    db.upsert_regimen(&tam).unwrap();

    let mut pac = Regimen::new(11, "PAC-W".into(), "Weekly paclitaxel".into());
    pac.drugs = vec![RegimenDrug { drug_id: 2, optional: false }];
    db.upsert_regimen(&pac).unwrap();

    db.upsert_protocol(&Protocol::new(1, "BR-HORM".into(), "Breast hormonal".into(), "treatment".into(), BREAST))
        .unwrap();
    db.set_protocol_stages(1, &["I", "II"]).unwrap();
    db.link_protocol_regimen(1, 10, 1, Some(1), true).unwrap();

    db.upsert_protocol(&Protocol::new(2, "BR-CHEMO".into(), "Breast chemotherapy".into(), "treatment".into(), BREAST))
        .unwrap();
    db.set_protocol_stages(2, &["IV"]).unwrap();
    db.link_protocol_regimen(2, 11, 1, Some(1), false).unwrap();

    db.upsert_protocol(&Protocol::new(3, "BR-RT".into(), "Breast radiotherapy".into(), "radiation".into(), BREAST))
        .unwrap();
    db.upsert_protocol(&Protocol::new(4, "BR-FU".into(), "Breast follow-up".into(), "follow_up".into(), BREAST))
        .unwrap();

    db
}

fn text(s: &str) -> CellValue {
    if s.is_empty() {
        CellValue::Empty
    } else {
        CellValue::Text(s.to_string())
    }
}

fn sheet(rows: &[[&str; 6]]) -> RawSheet {
    RawSheet {
        headers: ["HN", "VN", "Visit Date", "Primary Diagnosis", "Secondary Diagnoses", "Medications"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        rows: rows
            .iter()
            .map(|row| row.iter().map(|cell| text(cell)).collect())
            .collect(),
    }
}

#[test]
fn test_early_stage_single_drug_match() {
    let mut db = seed_catalog();
    let summary = ingest::commit(
        &mut db,
        &sheet(&[["H1", "V100", "15/03/2567", "C50.9", "", "D001 - NOLVADEX 20 MG 30 TAB (PO OD)"]]),
    );
    assert_eq!(summary.imported_rows, 1);

    let formulary = StaticFormulary::new();
    let outcome = MatchEngine::new(&db, &formulary).match_visit("V100").unwrap();

    let stage = outcome.stage_inference.as_ref().unwrap();
    assert_eq!(stage.inferred_stage, Stage::Early);

    let top = &outcome.results[0];
    assert_eq!(top.kind, MatchKind::Protocol);
    assert_eq!(top.protocol_code, "BR-HORM");
    assert_eq!(top.best_regimen.as_ref().unwrap().drug_match_ratio, 100);
    assert!(top.score >= 60, "score was {}", top.score);

    assert_eq!(db.get_visit("V100").unwrap().unwrap().resolved_site_id, Some(BREAST));
}

#[test]
fn test_liver_metastasis_inference() {
    let mut db = seed_catalog();
    ingest::commit(
        &mut db,
        &sheet(&[["H1", "V200", "2024-03-15", "C50.9", "C787", "PACLITAXEL 80 MG"]]),
    );

    let formulary = StaticFormulary::new();
    let outcome = MatchEngine::new(&db, &formulary).match_visit("V200").unwrap();

    let stage = outcome.stage_inference.unwrap();
    assert!(stage.has_distant_mets);
    assert_eq!(stage.inferred_stage, Stage::Metastatic);
    assert!(stage.reasons.iter().any(|r| r.contains("liver")));

    assert_eq!(outcome.results[0].protocol_code, "BR-CHEMO");
    assert!(outcome.results[0].stage_match);
}

#[test]
fn test_radiation_without_medications() {
    let mut db = seed_catalog();
    ingest::commit(&mut db, &sheet(&[["H1", "V300", "2024-03-15", "C50.9", "Z51.0", ""]]));

    let formulary = StaticFormulary::new();
    let outcome = MatchEngine::new(&db, &formulary).match_visit("V300").unwrap();
    assert!(!outcome.results.is_empty());

    let radiation = &outcome.results[0];
    assert_eq!(radiation.protocol_code, "BR-RT");

    // Same stage and regimen contributions; only modality differs
    let follow_up = outcome
        .results
        .iter()
        .find(|r| r.protocol_code == "BR-FU")
        .unwrap();
    assert_eq!(radiation.raw_score - follow_up.raw_score, 90.0);
    assert!(outcome.results[1..].iter().all(|r| r.raw_score <= radiation.raw_score - 70.0));
}

#[test]
fn test_duplicate_vn_in_one_import() {
    let mut db = seed_catalog();
    let summary = ingest::commit(
        &mut db,
        &sheet(&[
            ["H1", "V001", "2024-03-15", "C50.9", "", "TAMOXIFEN 20 MG"],
            ["H2", "V001", "2024-03-16", "C50.1", "", ""],
        ]),
    );

    assert_eq!(summary.imported_rows, 1);
    assert_eq!(summary.skipped_rows, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].row_number, 3);
    assert!(summary.errors[0].message.contains("Duplicate VN"));

    // The first row's data survived
    assert_eq!(db.get_visit("V001").unwrap().unwrap().hn, "H1");
}

#[test]
fn test_off_protocol_chemotherapy_sentinel() {
    let mut db = seed_catalog();
    ingest::commit(
        &mut db,
        &sheet(&[["H1", "V400", "2024-03-15", "C50.9", "", "TAMOXIFEN 20 MG\nGEMCITABINE 1000 MG"]]),
    );

    let formulary = StaticFormulary::new();
    let outcome = MatchEngine::new(&db, &formulary).match_visit("V400").unwrap();
    assert!(outcome.has_non_protocol());
    assert_eq!(outcome.results[0].protocol_code, "NON-PROTOCOL");
    assert!(outcome.results[0].explanations[0].contains("GEMCITABINE"));
}

#[test]
fn test_history_bonus_and_idempotence() {
    let mut db = seed_catalog();
    ingest::commit(
        &mut db,
        &sheet(&[
            ["H1", "V500", "2024-03-01", "C50.9", "", "PACLITAXEL 80 MG"],
            ["H1", "V501", "2024-03-08", "C50.9", "", "PACLITAXEL 80 MG"],
        ]),
    );

    let formulary = StaticFormulary::new();
    let before = MatchEngine::new(&db, &formulary).match_visit("V501").unwrap();
    db.confirm_visit("V500", 2, Some(11)).unwrap();

    let engine = MatchEngine::new(&db, &formulary);
    let after = engine.match_visit("V501").unwrap();
    assert_eq!(after, engine.match_visit("V501").unwrap());

    let score_of = |outcome: &oncomatch_core::MatchOutcome| {
        outcome
            .results
            .iter()
            .find(|r| r.protocol_code == "BR-CHEMO")
            .map(|r| r.raw_score)
            .unwrap()
    };
    assert_eq!(score_of(&after) - score_of(&before), 15.0);
}
