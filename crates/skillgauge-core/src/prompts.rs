//! Prompt construction for scored evaluation units.
//!
//! The scoring system prompt embeds the full check reference table and the
//! output contract the response parser relies on: free-form markdown analysis
//! followed by one trailing ```json block scoring every check.

use std::fmt::Write as _;
use std::sync::OnceLock;

use crate::taxonomy::{group_checks, scored_check_ids, vocabulary_size, GROUPS};

/// Reference table of all scored checks, grouped, for prompt embedding.
fn check_reference() -> String {
    let mut out = String::new();
    for (prefix, group_name) in GROUPS {
        let _ = writeln!(out, "### {prefix} — {group_name}");
        for check in group_checks(prefix) {
            let _ = writeln!(
                out,
                "- **{}** [{}]: {} — {}",
                check.id, check.severity, check.name, check.description
            );
        }
        out.push('\n');
    }
    out
}

/// The system prompt for scored runs. Built once; the taxonomy is static.
pub fn scoring_system_prompt() -> &'static str {
    static PROMPT: OnceLock<String> = OnceLock::new();
    PROMPT.get_or_init(|| {
        let ids = scored_check_ids().join(", ");
        format!(
            r#"You are a **skill quality auditor** performing structured scoring. You will receive:
1. A SKILL.md file — instructions for an AI agent skill
2. A user prompt — a task that a user might ask the skill to handle

Your job is to:
1. Analyze how well the SKILL.md prepares the agent to handle this prompt
2. Provide a detailed markdown analysis
3. Score each check as pass/fail/unclear

## Check Taxonomy ({count} checks)

{reference}
## Output Format

First, provide your detailed analysis in markdown with these sections:

## Approach
How would an agent following this SKILL.md handle the prompt? Step by step.

## Complexities Identified
For each relevant check, explain what you found.

## Risk Assessment
Rate the overall risk: LOW / MEDIUM / HIGH / CRITICAL

## Verdict
One-paragraph summary.

IMPORTANT: The SKILL.md references files and tools that are NOT available to you.
Do not try to access them. Focus purely on analyzing the instructions as written.

Then, at the very end of your response, output a structured JSON block wrapped in ```json fences with your per-check scoring:

```json
{{
  "checks": {{
    "WF-1": {{"result": "pass", "evidence": "Skill provides step-by-step workflow", "summary": "Workflow present"}},
    "WF-2": {{"result": "fail", "evidence": "No retry or fallback logic found", "summary": "Missing feedback loop"}},
    ...
  }},
  "risk_level": "HIGH"
}}
```

Rules for scoring:
- **pass**: The SKILL.md adequately addresses this check for the given prompt
- **fail**: The SKILL.md has a clear gap or issue for this check
- **unclear**: Not enough information to determine, or partially addressed
- You MUST include ALL {count} check IDs in the JSON ({ids})
- The JSON block MUST be the last thing in your response"#,
            count = vocabulary_size(),
            reference = check_reference(),
            ids = ids,
        )
    })
}

/// The per-unit user prompt: the skill document plus the scenario prompt.
pub fn unit_user_prompt(skill_content: &str, scenario_prompt: &str) -> String {
    format!(
        "# SKILL.md Content\n\n```markdown\n{skill_content}\n```\n\n# User Prompt\n\n{scenario_prompt}\n"
    )
}
