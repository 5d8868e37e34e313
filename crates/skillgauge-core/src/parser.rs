//! Scoring response parser.
//!
//! Models answer with free-form markdown followed by one trailing ```json
//! block scoring every check. Models also emit draft blocks mid-reasoning,
//! so the last block wins. Parsing is total: whatever the model did, the
//! returned check map covers the full scored vocabulary, falling back to
//! `unclear` per check and an `"UNKNOWN"` risk level.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::taxonomy::scored_check_ids;

/// Verdict for a single check on a single evaluation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckVerdict {
    Pass,
    Fail,
    Unclear,
    Na,
}

impl CheckVerdict {
    fn from_raw(raw: &str) -> Self {
        match raw {
            "pass" => CheckVerdict::Pass,
            "fail" => CheckVerdict::Fail,
            "na" => CheckVerdict::Na,
            // Anything out of vocabulary collapses to unclear.
            _ => CheckVerdict::Unclear,
        }
    }
}

/// One scored check with the model's supporting evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub check_id: String,
    pub result: CheckVerdict,
    pub evidence: String,
    #[serde(default)]
    pub summary: String,
}

impl CheckResult {
    pub fn unclear(check_id: &str, evidence: &str) -> Self {
        Self {
            check_id: check_id.to_string(),
            result: CheckVerdict::Unclear,
            evidence: evidence.to_string(),
            summary: String::new(),
        }
    }

    pub fn not_applicable(check_id: &str, evidence: &str) -> Self {
        Self {
            check_id: check_id.to_string(),
            result: CheckVerdict::Na,
            evidence: evidence.to_string(),
            summary: String::new(),
        }
    }
}

/// Output of [`parse_scoring_response`]: narrative markdown, a total check
/// map over the scored vocabulary and the model's risk rating.
#[derive(Debug, Clone)]
pub struct ParsedScoring {
    pub narrative: String,
    pub checks: BTreeMap<String, CheckResult>,
    pub risk_level: String,
}

#[derive(Deserialize)]
struct RawScoring {
    #[serde(default)]
    checks: BTreeMap<String, RawCheck>,
    #[serde(default)]
    risk_level: Option<String>,
}

#[derive(Deserialize)]
struct RawCheck {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    evidence: String,
    #[serde(default)]
    summary: String,
}

fn json_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```json\s*\n(.*?)\n\s*```").expect("valid json-block regex")
    })
}

/// Flatten a total check map into taxonomy display order (WF, DK, APF, SEC
/// with numeric ordering), the order reports carry.
pub fn checks_in_display_order(mut checks: BTreeMap<String, CheckResult>) -> Vec<CheckResult> {
    scored_check_ids()
        .into_iter()
        .filter_map(|id| checks.remove(id))
        .collect()
}

/// Every check id mapped to `unclear` with the given evidence.
pub fn unclear_for_all(evidence: &str) -> BTreeMap<String, CheckResult> {
    scored_check_ids()
        .into_iter()
        .map(|id| (id.to_string(), CheckResult::unclear(id, evidence)))
        .collect()
}

/// Parse a raw scoring response. Pure and infallible; see module docs for
/// the fallback ladder.
pub fn parse_scoring_response(raw: &str) -> ParsedScoring {
    let Some(block) = json_block_re().find_iter(raw).last() else {
        debug!("no structured scoring block found in response");
        return ParsedScoring {
            narrative: raw.to_string(),
            checks: unclear_for_all("No structured scoring in response"),
            risk_level: "UNKNOWN".to_string(),
        };
    };

    let captures = json_block_re()
        .captures(&raw[block.start()..])
        .expect("find and captures agree");
    let json_str = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    let narrative = raw[..block.start()].trim_end().to_string();

    let decoded: RawScoring = match serde_json::from_str(json_str) {
        Ok(decoded) => decoded,
        Err(err) => {
            // The split point itself is unreliable here, so keep the whole
            // raw text as narrative.
            debug!(error = %err, "scoring block failed to decode");
            return ParsedScoring {
                narrative: raw.to_string(),
                checks: unclear_for_all("JSON parse error in response"),
                risk_level: "UNKNOWN".to_string(),
            };
        }
    };

    let mut checks = BTreeMap::new();
    for id in scored_check_ids() {
        let entry = match decoded.checks.get(id) {
            Some(raw_check) => CheckResult {
                check_id: id.to_string(),
                result: raw_check
                    .result
                    .as_deref()
                    .map(CheckVerdict::from_raw)
                    .unwrap_or(CheckVerdict::Unclear),
                evidence: raw_check.evidence.clone(),
                summary: raw_check.summary.clone(),
            },
            None => CheckResult::unclear(id, "Not scored by model"),
        };
        checks.insert(id.to_string(), entry);
    }

    ParsedScoring {
        narrative,
        checks,
        risk_level: decoded.risk_level.unwrap_or_else(|| "UNKNOWN".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::vocabulary_size;

    fn block(body: &str) -> String {
        format!("```json\n{body}\n```")
    }

    #[test]
    fn missing_block_falls_back_to_unclear() {
        let parsed = parse_scoring_response("just prose, no scoring");
        assert_eq!(parsed.narrative, "just prose, no scoring");
        assert_eq!(parsed.risk_level, "UNKNOWN");
        assert_eq!(parsed.checks.len(), vocabulary_size());
        assert!(parsed
            .checks
            .values()
            .all(|c| c.result == CheckVerdict::Unclear));
        assert_eq!(
            parsed.checks["WF-1"].evidence,
            "No structured scoring in response"
        );
    }

    #[test]
    fn subset_scoring_defaults_rest_to_unclear() {
        let raw = format!(
            "## Analysis\nlooks thin\n\n{}",
            block(
                r#"{"checks": {"WF-1": {"result": "pass", "evidence": "has steps"},
                    "DK-6": {"result": "fail", "evidence": "no caveats", "summary": "gaps"}},
                    "risk_level": "HIGH"}"#
            )
        );
        let parsed = parse_scoring_response(&raw);
        assert_eq!(parsed.narrative, "## Analysis\nlooks thin");
        assert_eq!(parsed.risk_level, "HIGH");
        assert_eq!(parsed.checks.len(), vocabulary_size());
        assert_eq!(parsed.checks["WF-1"].result, CheckVerdict::Pass);
        assert_eq!(parsed.checks["DK-6"].result, CheckVerdict::Fail);
        assert_eq!(parsed.checks["DK-6"].summary, "gaps");
        assert_eq!(parsed.checks["WF-2"].result, CheckVerdict::Unclear);
        assert_eq!(parsed.checks["WF-2"].evidence, "Not scored by model");
    }

    #[test]
    fn last_block_wins() {
        let raw = format!(
            "draft:\n{}\nfinal thoughts\n{}",
            block(r#"{"checks": {"WF-1": {"result": "fail", "evidence": "draft"}}, "risk_level": "LOW"}"#),
            block(r#"{"checks": {"WF-1": {"result": "pass", "evidence": "final"}}, "risk_level": "MEDIUM"}"#),
        );
        let parsed = parse_scoring_response(&raw);
        assert_eq!(parsed.checks["WF-1"].result, CheckVerdict::Pass);
        assert_eq!(parsed.checks["WF-1"].evidence, "final");
        assert_eq!(parsed.risk_level, "MEDIUM");
        assert!(parsed.narrative.contains("final thoughts"));
        assert!(!parsed.narrative.contains("\"result\": \"pass\""));
    }

    #[test]
    fn undecodable_block_keeps_full_raw_as_narrative() {
        let raw = format!("analysis here\n{}", block("{not json at all"));
        let parsed = parse_scoring_response(&raw);
        assert_eq!(parsed.narrative, raw);
        assert_eq!(parsed.risk_level, "UNKNOWN");
        assert_eq!(
            parsed.checks["APF-1"].evidence,
            "JSON parse error in response"
        );
    }

    #[test]
    fn out_of_enum_results_normalize_to_unclear() {
        let raw = block(
            r#"{"checks": {"WF-1": {"result": "PASS", "evidence": ""},
                "WF-2": {"result": "maybe", "evidence": ""},
                "WF-3": {"result": "na", "evidence": "not relevant"}},
                "risk_level": "LOW"}"#,
        );
        let parsed = parse_scoring_response(&raw);
        assert_eq!(parsed.checks["WF-1"].result, CheckVerdict::Unclear);
        assert_eq!(parsed.checks["WF-2"].result, CheckVerdict::Unclear);
        assert_eq!(parsed.checks["WF-3"].result, CheckVerdict::Na);
    }

    #[test]
    fn missing_risk_level_defaults_to_unknown() {
        let raw = block(r#"{"checks": {}}"#);
        let parsed = parse_scoring_response(&raw);
        assert_eq!(parsed.risk_level, "UNKNOWN");
    }

    #[test]
    fn key_set_always_equals_vocabulary() {
        for raw in [
            "no block".to_string(),
            block("{broken"),
            block(r#"{"checks": {"WF-1": {"result": "pass", "evidence": ""}, "ZZ-9": {"result": "pass", "evidence": ""}}, "risk_level": "LOW"}"#),
        ] {
            let parsed = parse_scoring_response(&raw);
            let ids: Vec<&str> = parsed.checks.keys().map(String::as_str).collect();
            let mut expected = crate::taxonomy::scored_check_ids();
            expected.sort_unstable();
            assert_eq!(ids, expected, "vocabulary mismatch for {raw:?}");
        }
    }

    #[test]
    fn display_order_follows_the_taxonomy_not_the_map() {
        let ordered = checks_in_display_order(unclear_for_all("n/a"));
        let ids: Vec<&str> = ordered.iter().map(|c| c.check_id.as_str()).collect();
        assert_eq!(ids, crate::taxonomy::scored_check_ids());
        assert_eq!(ids[0], "WF-1");
        let apf2 = ids.iter().position(|id| *id == "APF-2").unwrap();
        let apf10 = ids.iter().position(|id| *id == "APF-10").unwrap();
        assert!(apf2 < apf10, "groups keep numeric ordering");
    }

    #[test]
    fn verdict_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&CheckVerdict::Na).unwrap(),
            "\"na\""
        );
    }
}
