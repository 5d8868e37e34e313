//! Scenario catalog and skill manifest loading.
//!
//! Scenarios live in per-domain YAML files; each file names the specialist
//! skill for its domain and may override models or the target skill per
//! scenario. The manifest maps skill names to the documents under evaluation.
//! Both collections are read-only once loaded.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CatalogError;

/// One task prompt aimed at a target skill, loaded from a domain YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    pub prompt: String,
    /// The specialist skill this scenario evaluates.
    pub target_skill: String,
    /// File the scenario was loaded from.
    pub source_file: String,
    pub domain: String,
    /// Optional per-scenario model override; a scored run uses its requested
    /// model list and keeps this only as catalog metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<String>>,
}

/// One manifest entry: where a skill document lives and what kind it is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillEntry {
    pub path: PathBuf,
    #[serde(default)]
    pub category: String,
}

/// The skill registry: `name -> {path, category}`.
#[derive(Debug, Clone, Default)]
pub struct SkillManifest {
    skills: BTreeMap<String, SkillEntry>,
}

#[derive(Deserialize)]
struct ManifestFile {
    skills: BTreeMap<String, SkillEntry>,
}

#[derive(Deserialize)]
struct DomainFile {
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    target_skill: Option<String>,
    #[serde(default)]
    default_models: Option<Vec<String>>,
    #[serde(default)]
    scenarios: Vec<RawScenario>,
}

#[derive(Deserialize)]
struct RawScenario {
    id: String,
    name: String,
    prompt: String,
    #[serde(default)]
    target_skill: Option<String>,
    #[serde(default)]
    models: Option<Vec<String>>,
}

impl SkillManifest {
    /// Load the manifest from a YAML file with a top-level `skills` map.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed: ManifestFile =
            serde_yaml::from_str(&raw).map_err(|source| CatalogError::Yaml {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(skills = parsed.skills.len(), "loaded skill manifest");
        Ok(Self {
            skills: parsed.skills,
        })
    }

    pub fn from_entries(entries: BTreeMap<String, SkillEntry>) -> Self {
        Self { skills: entries }
    }

    pub fn get(&self, name: &str) -> Option<&SkillEntry> {
        self.skills.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.skills.contains_key(name)
    }

    /// Whether `name` is a dev-category skill (exempt from actor-facing checks).
    pub fn is_dev(&self, name: &str) -> bool {
        self.get(name).is_some_and(|e| e.category == "dev")
    }

    /// Skill names with category `generalist`, in manifest order.
    pub fn generalists(&self) -> Vec<&str> {
        self.skills
            .iter()
            .filter(|(_, e)| e.category == "generalist")
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Read the skill document for `name`.
    pub fn read_skill(&self, name: &str) -> Result<String, CatalogError> {
        let entry = self.get(name).ok_or_else(|| CatalogError::UnknownSkill {
            name: name.to_string(),
        })?;
        if !entry.path.exists() {
            return Err(CatalogError::SkillFileMissing {
                path: entry.path.clone(),
            });
        }
        fs::read_to_string(&entry.path).map_err(|source| CatalogError::Read {
            path: entry.path.clone(),
            source,
        })
    }
}

/// Load all domain-based scenario YAML files from `dir`, keyed by domain.
///
/// Files without a `domain` field are skipped; a domain file without a
/// file-level `target_skill` is an error. Files are visited in sorted order
/// so repeated loads are deterministic.
pub fn load_domain_scenarios(
    dir: &Path,
) -> Result<BTreeMap<String, Vec<Scenario>>, CatalogError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|source| CatalogError::Read {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "yaml" || ext == "yml"))
        .collect();
    paths.sort();

    let mut by_domain: BTreeMap<String, Vec<Scenario>> = BTreeMap::new();
    for path in paths {
        let raw = fs::read_to_string(&path).map_err(|source| CatalogError::Read {
            path: path.clone(),
            source,
        })?;
        let parsed: DomainFile =
            serde_yaml::from_str(&raw).map_err(|source| CatalogError::Yaml {
                path: path.clone(),
                source,
            })?;

        let Some(domain) = parsed.domain else {
            continue;
        };
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_skill = parsed
            .target_skill
            .ok_or_else(|| CatalogError::MissingTargetSkill {
                file: file_name.clone(),
            })?;

        let scenarios = by_domain.entry(domain.clone()).or_default();
        for s in parsed.scenarios {
            scenarios.push(Scenario {
                id: s.id,
                name: s.name,
                prompt: s.prompt,
                target_skill: s.target_skill.unwrap_or_else(|| file_skill.clone()),
                source_file: file_name.clone(),
                domain: domain.clone(),
                models: s.models.or_else(|| parsed.default_models.clone()),
            });
        }
    }
    debug!(domains = by_domain.len(), "loaded domain scenarios");
    Ok(by_domain)
}

/// Resolve the concrete target skills for one scenario.
///
/// Dev-category specialists are evaluated alone; every other specialist also
/// fans out to the manifest's generalist skills. The specialist is never
/// duplicated when it is itself a generalist.
pub fn resolve_targets(scenario: &Scenario, manifest: &SkillManifest) -> Vec<String> {
    let specialist = scenario.target_skill.as_str();
    if scenario.domain.is_empty() || manifest.is_dev(specialist) {
        return vec![specialist.to_string()];
    }
    let mut targets = vec![specialist.to_string()];
    for generalist in manifest.generalists() {
        if generalist != specialist {
            targets.push(generalist.to_string());
        }
    }
    targets
}
