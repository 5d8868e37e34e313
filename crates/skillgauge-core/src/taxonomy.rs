//! Scored-check taxonomy.
//!
//! A closed, statically enumerated vocabulary of quality checks that every
//! scored evaluation unit is graded against. The vocabulary is fixed at
//! compile time: 29 checks across four groups (workflow, domain knowledge,
//! platform fit, security). The structural best-practice group is scored by
//! an external static linter and is deliberately absent here.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Severity attached to a check definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        write!(f, "{s}")
    }
}

/// Static definition of a single scored check.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CheckDefinition {
    /// Check id in `<GROUP>-<N>` form, e.g. `"WF-1"`.
    pub id: &'static str,
    pub name: &'static str,
    pub severity: Severity,
    pub description: &'static str,
}

/// Check groups in display order, with human-readable group names.
pub const GROUPS: &[(&str, &str)] = &[
    ("WF", "Workflow Quality"),
    ("DK", "Domain Knowledge"),
    ("APF", "Platform Awareness"),
    ("SEC", "Security"),
];

const WF_CHECKS: &[CheckDefinition] = &[
    CheckDefinition {
        id: "WF-1",
        name: "Missing workflow",
        severity: Severity::High,
        description: "Complex task without steps or checklist",
    },
    CheckDefinition {
        id: "WF-2",
        name: "No feedback loop",
        severity: Severity::Medium,
        description: "Missing validate/fix/retry cycle; no handling of empty or partial results",
    },
    CheckDefinition {
        id: "WF-3",
        name: "Wrong degrees of freedom",
        severity: Severity::High,
        description: "Too rigid or too loose instructions",
    },
    CheckDefinition {
        id: "WF-4",
        name: "Missing examples",
        severity: Severity::Medium,
        description: "No input/output examples provided",
    },
    CheckDefinition {
        id: "WF-5",
        name: "No scope detection",
        severity: Severity::Medium,
        description: "Cannot distinguish docs-only / find-only / full pipeline queries",
    },
    CheckDefinition {
        id: "WF-6",
        name: "Linear-only workflow",
        severity: Severity::Medium,
        description: "No branching or conditional logic in workflow steps",
    },
];

const DK_CHECKS: &[CheckDefinition] = &[
    CheckDefinition {
        id: "DK-1",
        name: "Actor selection ambiguity",
        severity: Severity::High,
        description: "Multiple actors for the same task, no selection guidance",
    },
    CheckDefinition {
        id: "DK-2",
        name: "Output variability",
        severity: Severity::Medium,
        description: "Different actors return different data shapes",
    },
    CheckDefinition {
        id: "DK-3",
        name: "Unrealistic expectations",
        severity: Severity::Medium,
        description: "Prompt expects capabilities that actors don't have",
    },
    CheckDefinition {
        id: "DK-4",
        name: "Time-sensitive content",
        severity: Severity::Medium,
        description: "Hardcoded versions or schemas without a maintenance plan",
    },
    CheckDefinition {
        id: "DK-5",
        name: "No scheduling pattern",
        severity: Severity::Medium,
        description: "Only one-shot, no recurring use cases",
    },
    CheckDefinition {
        id: "DK-6",
        name: "Missing domain caveats",
        severity: Severity::High,
        description: "Missing rate limits, GDPR or data availability warnings",
    },
    CheckDefinition {
        id: "DK-7",
        name: "Input correctness validation",
        severity: Severity::High,
        description: "No guidance to verify inputs resolve to the right entities before running paid operations",
    },
    CheckDefinition {
        id: "DK-8",
        name: "Data completeness awareness",
        severity: Severity::Medium,
        description: "No guidance for detecting incomplete data: pagination, truncated results, absent fields",
    },
];

const APF_CHECKS: &[CheckDefinition] = &[
    CheckDefinition {
        id: "APF-1",
        name: "Path resolution",
        severity: Severity::Critical,
        description: "Skill path doesn't work across setups",
    },
    CheckDefinition {
        id: "APF-2",
        name: "Schema drift",
        severity: Severity::High,
        description: "Actor schema changed, skill has stale examples",
    },
    CheckDefinition {
        id: "APF-3",
        name: "Expected tool not available",
        severity: Severity::High,
        description: "Skill assumes a tool (CLI, MCP server) that isn't available",
    },
    CheckDefinition {
        id: "APF-4",
        name: "Input schema gotchas",
        severity: Severity::High,
        description: "Destructive defaults, missing min/max limits",
    },
    CheckDefinition {
        id: "APF-5",
        name: "No resource budgeting",
        severity: Severity::Medium,
        description: "Missing memory, timeout, concurrency or cost guidance",
    },
    CheckDefinition {
        id: "APF-6",
        name: "Run observability",
        severity: Severity::Medium,
        description: "Missing debugging guidance: logs, console",
    },
    CheckDefinition {
        id: "APF-7",
        name: "Output storage confusion",
        severity: Severity::Medium,
        description: "Unclear where results go: dataset vs key-value store vs direct output",
    },
    CheckDefinition {
        id: "APF-8",
        name: "Store search mismatch",
        severity: Severity::Medium,
        description: "Wrong store type or search method for the use case",
    },
    CheckDefinition {
        id: "APF-9",
        name: "Actor metadata ignorance",
        severity: Severity::Low,
        description: "Not using actor README, changelog or maintained status",
    },
    CheckDefinition {
        id: "APF-10",
        name: "Proxy unawareness",
        severity: Severity::Medium,
        description: "Missing proxy configuration guidance for geo-restricted content",
    },
    CheckDefinition {
        id: "APF-11",
        name: "Multi-actor orchestration gap",
        severity: Severity::Medium,
        description: "Missing actor chaining guidance",
    },
    CheckDefinition {
        id: "APF-12",
        name: "Memory and scaling limits",
        severity: Severity::Medium,
        description: "No guidance for memory configuration, large dataset handling or OOM risks",
    },
    CheckDefinition {
        id: "APF-13",
        name: "Parallelization patterns",
        severity: Severity::Low,
        description: "No guidance for concurrent runs, batching large inputs or cross-run rate limiting",
    },
];

const SEC_CHECKS: &[CheckDefinition] = &[
    CheckDefinition {
        id: "SEC-1",
        name: "Auth anti-patterns",
        severity: Severity::High,
        description: "Token/OAuth anti-patterns, insecure auth handling",
    },
    CheckDefinition {
        id: "SEC-4",
        name: "Credential exposure",
        severity: Severity::Medium,
        description: "Credentials in logs, outputs or unprotected storage",
    },
];

/// Checks that are not applicable to dev-category skills; the orchestrator
/// rewrites them to `na` after parsing.
pub const DEV_EXCLUDED_CHECKS: &[&str] = &[
    "DK-1", "DK-2", "DK-5", "APF-2", "APF-4", "APF-5", "APF-7", "APF-8", "APF-9", "APF-11",
];

/// Checks belonging to `group` (prefix before the dash).
pub fn group_checks(group: &str) -> &'static [CheckDefinition] {
    match group {
        "WF" => WF_CHECKS,
        "DK" => DK_CHECKS,
        "APF" => APF_CHECKS,
        "SEC" => SEC_CHECKS,
        _ => &[],
    }
}

/// The full scored vocabulary in display order (WF, DK, APF, SEC).
///
/// Validated once on first access: ids are unique, well-formed and match
/// their group prefix.
pub fn scored_checks() -> &'static [&'static CheckDefinition] {
    static SCORED: OnceLock<Vec<&'static CheckDefinition>> = OnceLock::new();
    SCORED.get_or_init(|| {
        let all: Vec<&'static CheckDefinition> = GROUPS
            .iter()
            .flat_map(|(prefix, _)| group_checks(prefix).iter())
            .collect();
        debug_assert!(registry_is_valid(&all), "check registry failed validation");
        all
    })
}

/// Ids of the full scored vocabulary.
pub fn scored_check_ids() -> Vec<&'static str> {
    scored_checks().iter().map(|c| c.id).collect()
}

/// Number of scored checks.
pub fn vocabulary_size() -> usize {
    scored_checks().len()
}

/// Group prefix of a check id (`"APF-3"` -> `Some("APF")`), or `None` when
/// the prefix is not a known group.
pub fn check_group(check_id: &str) -> Option<&'static str> {
    let prefix = check_id.split('-').next()?;
    GROUPS
        .iter()
        .find(|(g, _)| *g == prefix)
        .map(|(g, _)| *g)
}

fn registry_is_valid(all: &[&CheckDefinition]) -> bool {
    let mut seen = BTreeSet::new();
    for check in all {
        let Some((prefix, number)) = check.id.split_once('-') else {
            return false;
        };
        if check_group(check.id) != Some(prefix) || number.parse::<u32>().is_err() {
            return false;
        }
        if !seen.insert(check.id) {
            return false;
        }
    }
    true
}
