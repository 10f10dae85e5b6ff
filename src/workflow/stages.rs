//! 阶段定义表
//!
//! 固定顺序的专家阶段目录；每个阶段声明 key、标题、目标与可用的工具分组。
//! compile 时对照注册表区分可用分组与缺失分组，顺序即路由的优先级顺序。

use serde::Serialize;

use crate::tools::ProviderRegistry;

/// 阶段定义
#[derive(Debug, Clone, Serialize)]
pub struct StageDefinition {
    pub key: String,
    pub title: String,
    pub goal: String,
    pub groups: Vec<String>,
}

impl StageDefinition {
    pub fn new(key: &str, title: &str, goal: &str, groups: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            title: title.to_string(),
            goal: goal.to_string(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }
}

/// 默认的六阶段生物医学流水线
pub fn default_stages() -> Vec<StageDefinition> {
    vec![
        StageDefinition::new(
            "target_agent",
            "TargetAgent",
            "Select core gene targets associated with the disease.",
            &["OpenTargets-MCP-Server"],
        ),
        StageDefinition::new(
            "omics_agent",
            "OmicsAgent",
            "Validate the mutations and expression patterns of the selected targets using multi-omics data.",
            &["PubChem-MCP-Server", "ChEMBL-MCP-Server"],
        ),
        StageDefinition::new(
            "pathway_agent",
            "PathwayAgent",
            "Map the associated signaling pathways and biological functions.",
            &["KEGG-MCP-Server", "Reactome-MCP-Server", "GeneOntology-MCP-Server"],
        ),
        StageDefinition::new(
            "chem_agent",
            "ChemAgent",
            "Collect compounds acting on the pathway together with their activity data.",
            &["PubChem-MCP-Server", "ChEMBL-MCP-Server"],
        ),
        StageDefinition::new(
            "structure_agent",
            "StructureAgent",
            "Predict binding pockets and affinities from 3D structural information.",
            &["AlphaFold-MCP-Server", "PDB-MCP-Server"],
        ),
        StageDefinition::new(
            "clinical_agent",
            "ClinicalAgent",
            "Review clinical-trial and regulatory datasets.",
            &["ClinicalTrials-MCP-Server", "OpenFDA-MCP-Server"],
        ),
    ]
}

/// 编译后的阶段：分组拆为可用 / 缺失
#[derive(Debug, Clone, Serialize)]
pub struct CompiledStage {
    pub key: String,
    pub title: String,
    pub goal: String,
    pub available_groups: Vec<String>,
    pub missing_groups: Vec<String>,
}

/// 阶段目录（编译一次，进程内只读共享）
#[derive(Debug, Clone, Default)]
pub struct StageCatalog {
    stages: Vec<CompiledStage>,
}

impl StageCatalog {
    pub fn compile(definitions: Vec<StageDefinition>, registry: &ProviderRegistry) -> Self {
        let stages = definitions
            .into_iter()
            .map(|def| {
                let (available_groups, missing_groups): (Vec<String>, Vec<String>) =
                    def.groups.into_iter().partition(|g| registry.has_group(g));
                if !missing_groups.is_empty() {
                    tracing::info!(
                        stage = %def.key,
                        missing = ?missing_groups,
                        "stage has unregistered provider groups"
                    );
                }
                CompiledStage {
                    key: def.key,
                    title: def.title,
                    goal: def.goal,
                    available_groups,
                    missing_groups,
                }
            })
            .collect();
        Self { stages }
    }

    /// 直接由编译结果构造
    pub fn from_stages(stages: Vec<CompiledStage>) -> Self {
        Self { stages }
    }

    /// 按 key 查找
    pub fn get(&self, key: &str) -> Option<&CompiledStage> {
        self.stages.iter().find(|s| s.key == key)
    }

    /// 按 key 或标题（忽略大小写）查找
    pub fn find(&self, selector: &str) -> Option<&CompiledStage> {
        let selector = selector.trim();
        self.stages.iter().find(|s| {
            s.key.eq_ignore_ascii_case(selector) || s.title.eq_ignore_ascii_case(selector)
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledStage> {
        self.stages.iter()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn titles(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.title.clone()).collect()
    }
}
