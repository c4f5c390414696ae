//! Parsing and checking of recommendation replies.

use oncomatch_core::models::MatchOutcome;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Reply parsing errors.
#[derive(Error, Debug)]
pub enum ResponseError {
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid response format: {0}")]
    InvalidFormat(String),
}

pub type ResponseResult<T> = Result<T, ResponseError>;

/// Structured reply from the recommendation model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationReply {
    pub recommendations: Vec<Recommendation>,
}

/// One recommended protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub protocol_code: String,
    #[serde(default)]
    pub regimen_code: Option<String>,
    #[serde(default)]
    pub rationale: String,
}

/// Problems found when checking a recommendation against the ranking.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplyFlag {
    /// The protocol is not among the ranked results
    UnrankedProtocol,
    /// The regimen differs from the best regimen the engine found
    UnverifiedRegimen,
}

/// A recommendation with its position in the engine's ranking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewedRecommendation {
    pub recommendation: Recommendation,
    /// 1-based rank, None when unranked
    pub rank: Option<usize>,
    pub score: Option<i64>,
    pub flags: Vec<ReplyFlag>,
}

impl ReviewedRecommendation {
    pub fn is_flagged(&self) -> bool {
        !self.flags.is_empty()
    }
}

/// Parse model output into a reply.
///
/// Prose around the JSON object is ignored. Each `{` is tried as the start
/// of the object until one parses; text after the object is ignored.
pub fn parse_recommendation_output(text: &str) -> ResponseResult<RecommendationReply> {
    let mut last_error = None;

    for (start, _) in text.match_indices('{') {
        let mut stream =
            serde_json::Deserializer::from_str(&text[start..]).into_iter::<RecommendationReply>();
        match stream.next() {
            Some(Ok(reply)) => return normalize_reply(reply),
            Some(Err(e)) => last_error = Some(e),
            None => {}
        }
    }

    match last_error {
        Some(e) => Err(ResponseError::JsonParse(e)),
        None => Err(ResponseError::InvalidFormat(
            "No JSON object found in response".into(),
        )),
    }
}

fn normalize_reply(reply: RecommendationReply) -> ResponseResult<RecommendationReply> {
    let recommendations = reply
        .recommendations
        .into_iter()
        .enumerate()
        .map(|(i, rec)| {
            let protocol_code = rec.protocol_code.trim().to_string();
            if protocol_code.is_empty() {
                return Err(ResponseError::InvalidFormat(format!(
                    "Recommendation {} has no protocol_code",
                    i + 1
                )));
            }
            let regimen_code = rec
                .regimen_code
                .map(|code| code.trim().to_string())
                .filter(|code| !code.is_empty());
            Ok(Recommendation {
                protocol_code,
                regimen_code,
                rationale: rec.rationale.trim().to_string(),
            })
        })
        .collect::<ResponseResult<Vec<_>>>()?;

    Ok(RecommendationReply { recommendations })
}

/// Check each recommendation against the outcome it was prompted with.
///
/// Codes compare case-insensitively.
pub fn review_recommendations(
    reply: &RecommendationReply,
    outcome: &MatchOutcome,
) -> Vec<ReviewedRecommendation> {
    reply
        .recommendations
        .iter()
        .map(|rec| {
            let ranked = outcome
                .results
                .iter()
                .enumerate()
                .find(|(_, r)| r.protocol_code.eq_ignore_ascii_case(&rec.protocol_code));

            let mut flags = Vec::new();
            match ranked {
                None => {
                    warn!(vn = %outcome.vn, protocol = %rec.protocol_code, "recommended protocol not in ranking");
                    flags.push(ReplyFlag::UnrankedProtocol);
                }
                Some((_, result)) => {
                    if let Some(regimen_code) = &rec.regimen_code {
                        let best = result.best_regimen.as_ref().map(|b| b.regimen_code.as_str());
                        if !best.is_some_and(|b| b.eq_ignore_ascii_case(regimen_code)) {
                            flags.push(ReplyFlag::UnverifiedRegimen);
                        }
                    }
                }
            }

            ReviewedRecommendation {
                recommendation: rec.clone(),
                rank: ranked.map(|(i, _)| i + 1),
                score: ranked.map(|(_, r)| r.score),
                flags,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use oncomatch_core::models::{MatchKind, MatchResult, ModalityFlags, RegimenSummary};
    use proptest::prelude::*;

    use super::*;

    fn result(code: &str, score: i64, regimen: Option<&str>) -> MatchResult {
        MatchResult {
            kind: MatchKind::Protocol,
            protocol_id: 1,
            protocol_code: code.into(),
            protocol_name: code.into(),
            score,
            raw_score: score as f64,
            best_regimen: regimen.map(|r| RegimenSummary {
                regimen_id: 10,
                regimen_code: r.into(),
                regimen_name: r.into(),
                line_of_therapy: None,
                is_preferred: false,
                matched_drugs: 1,
                total_drugs: 1,
                drug_match_ratio: 100,
            }),
            explanations: Vec::new(),
            stage_match: true,
            modality: ModalityFlags::default(),
            formulary_ratio: None,
        }
    }

    fn outcome() -> MatchOutcome {
        MatchOutcome {
            vn: "V100".into(),
            results: vec![result("BR-HORM", 92, Some("TAM")), result("BR-RT", 40, None)],
            stage_inference: None,
            note: None,
        }
    }

    #[test]
    fn test_parse_reply() {
        let json = r#"{"recommendations":[{"protocol_code":"BR-HORM","regimen_code":"TAM","rationale":"Fits."}]}"#;

        let reply = parse_recommendation_output(json).unwrap();
        assert_eq!(reply.recommendations.len(), 1);
        assert_eq!(reply.recommendations[0].protocol_code, "BR-HORM");
        assert_eq!(reply.recommendations[0].regimen_code.as_deref(), Some("TAM"));
    }

    #[test]
    fn test_parse_reply_with_prose() {
        let text = r#"Based on {the visit} I suggest:
```json
{"recommendations":[{"protocol_code":" BR-RT ","regimen_code":"","rationale":"Radiation code present."}]}
```
Let me know {if} you need more."#;

        let reply = parse_recommendation_output(text).unwrap();
        assert_eq!(reply.recommendations[0].protocol_code, "BR-RT");
        assert_eq!(reply.recommendations[0].regimen_code, None);
    }

    #[test]
    fn test_parse_reply_missing_optional_fields() {
        let reply = parse_recommendation_output(r#"{"recommendations":[{"protocol_code":"BR-FU"}]}"#)
            .unwrap();
        assert_eq!(reply.recommendations[0].regimen_code, None);
        assert_eq!(reply.recommendations[0].rationale, "");
    }

    #[test]
    fn test_parse_reply_errors() {
        assert!(matches!(
            parse_recommendation_output("I cannot help with that."),
            Err(ResponseError::InvalidFormat(_))
        ));
        assert!(matches!(
            parse_recommendation_output(r#"{"recs": []}"#),
            Err(ResponseError::JsonParse(_))
        ));
        assert!(matches!(
            parse_recommendation_output(r#"{"recommendations":[{"protocol_code":"  "}]}"#),
            Err(ResponseError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_review_flags_unranked_protocol() {
        let reply = parse_recommendation_output(
            r#"{"recommendations":[
                {"protocol_code":"br-horm","regimen_code":"tam","rationale":"a"},
                {"protocol_code":"LU-01","regimen_code":null,"rationale":"b"}
            ]}"#,
        )
        .unwrap();

        let reviewed = review_recommendations(&reply, &outcome());
        assert_eq!(reviewed[0].rank, Some(1));
        assert_eq!(reviewed[0].score, Some(92));
        assert!(!reviewed[0].is_flagged());

        assert_eq!(reviewed[1].rank, None);
        assert_eq!(reviewed[1].flags, vec![ReplyFlag::UnrankedProtocol]);
    }

    #[test]
    fn test_review_flags_other_regimen() {
        let reply = parse_recommendation_output(
            r#"{"recommendations":[
                {"protocol_code":"BR-HORM","regimen_code":"AI","rationale":"a"},
                {"protocol_code":"BR-RT","regimen_code":"IMRT","rationale":"b"},
                {"protocol_code":"BR-RT","regimen_code":null,"rationale":"c"}
            ]}"#,
        )
        .unwrap();

        let reviewed = review_recommendations(&reply, &outcome());
        assert_eq!(reviewed[0].flags, vec![ReplyFlag::UnverifiedRegimen]);
        assert_eq!(reviewed[1].flags, vec![ReplyFlag::UnverifiedRegimen]);
        assert_eq!(reviewed[1].rank, Some(2));
        assert!(!reviewed[2].is_flagged());
    }

    proptest! {
        #[test]
        fn prose_without_braces_is_ignored(
            before in "[a-zA-Z0-9 .,:\n]{0,40}",
            after in "[a-zA-Z0-9 .,:\n]{0,40}",
        ) {
            let text = format!(
                r#"{before}{{"recommendations":[{{"protocol_code":"BR-HORM","regimen_code":null,"rationale":"x"}}]}}{after}"#
            );
            let reply = parse_recommendation_output(&text).unwrap();
            prop_assert_eq!(reply.recommendations.len(), 1);
            prop_assert_eq!(&reply.recommendations[0].protocol_code, "BR-HORM");
        }
    }
}
