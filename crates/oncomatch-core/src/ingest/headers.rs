//! Header alias mapping for imported sheets.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Canonical visit fields a sheet column can map to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Hn,
    Vn,
    VisitDate,
    PrimaryDiagnosis,
    SecondaryDiagnoses,
    Hpi,
    DoctorNotes,
    MedicationsRaw,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Hn => "hn",
            Field::Vn => "vn",
            Field::VisitDate => "visitDate",
            Field::PrimaryDiagnosis => "primaryDiagnosis",
            Field::SecondaryDiagnoses => "secondaryDiagnoses",
            Field::Hpi => "hpi",
            Field::DoctorNotes => "doctorNotes",
            Field::MedicationsRaw => "medicationsRaw",
        }
    }
}

/// Known aliases, already in folded form (see [`fold_header`]).
const ALIASES: &[(Field, &[&str])] = &[
    (Field::Hn, &["hn", "hospitalnumber", "patienthn", "patientid", "เลขhn", "เลขที่ผู้ป่วย"]),
    (Field::Vn, &["vn", "visitnumber", "visitno", "เลขvn", "เลขที่รับบริการ"]),
    (
        Field::VisitDate,
        &["visitdate", "date", "servicedate", "วันที่", "วันที่รับบริการ", "วันที่มารับบริการ"],
    ),
    (
        Field::PrimaryDiagnosis,
        &["primarydiagnosis", "primarydx", "pdx", "diagnosis", "icd10", "การวินิจฉัยหลัก"],
    ),
    (
        Field::SecondaryDiagnoses,
        &["secondarydiagnoses", "secondarydiagnosis", "secondarydx", "sdx", "การวินิจฉัยรอง"],
    ),
    (Field::Hpi, &["hpi", "historyofpresentillness", "presentillness", "ประวัติปัจจุบัน"]),
    (
        Field::DoctorNotes,
        &["doctornotes", "doctornote", "notes", "note", "บันทึกแพทย์"],
    ),
    (
        Field::MedicationsRaw,
        &["medicationsraw", "medications", "medication", "meds", "drugs", "orders", "รายการยา", "ยา"],
    ),
];

/// Lowercase and drop spaces, underscores, dashes and dots.
pub fn fold_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '_' | '-' | '.'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Canonical field for one header, if it is a known alias.
pub fn canonical_field(header: &str) -> Option<Field> {
    let folded = fold_header(header);
    ALIASES
        .iter()
        .find(|(_, aliases)| aliases.contains(&folded.as_str()))
        .map(|(field, _)| *field)
}

/// Column index of each recognized field. The first matching column wins.
pub fn map_headers(headers: &[String]) -> HashMap<Field, usize> {
    let mut columns = HashMap::new();
    for (index, header) in headers.iter().enumerate() {
        if let Some(field) = canonical_field(header) {
            columns.entry(field).or_insert(index);
        }
    }
    columns
}
