//! 技能引用
//!
//! 技能包的元数据解析（frontmatter、压缩包解包）不在本 crate 内：这里只消费已经校验过的
//! `{name, description, location}` 记录、托管平台上预注册的技能引用，或进程内能力的名称。

mod prompt;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use prompt::{skills_system_prompt, SkillMount};

/// 磁盘上的技能包
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub description: String,
    /// 技能目录（包含 SKILL.md 与 scripts/）
    pub location: PathBuf,
}

impl Skill {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        location: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            location: location.into(),
        }
    }
}

/// 托管平台上的技能引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedSkill {
    #[serde(rename = "skill_id")]
    pub id: String,
    /// 平台内置（"anthropic"）或用户上传（"custom"）
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
}

impl HostedSkill {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            version: "latest".to_string(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

/// 会话持有的技能集合，形态由后端决定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkillSet {
    /// 本机 / 容器后端：磁盘上的技能包
    Packages(Vec<Skill>),
    /// 托管后端：平台技能引用
    Hosted(Vec<HostedSkill>),
    /// 进程内后端：已注册能力的名称
    Native(Vec<String>),
    /// 混合会话：技能分散在各子会话中
    Composite,
}

impl SkillSet {
    /// 技能名称列表（用于路由表前缀）
    pub fn names(&self) -> Vec<String> {
        match self {
            SkillSet::Packages(skills) => skills.iter().map(|s| s.name.clone()).collect(),
            SkillSet::Hosted(skills) => skills.iter().map(|s| s.id.clone()).collect(),
            SkillSet::Native(names) => names.clone(),
            SkillSet::Composite => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.names().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_per_variant() {
        let packages = SkillSet::Packages(vec![Skill::new("pdf", "PDF tools", "/skills/pdf")]);
        assert_eq!(packages.names(), vec!["pdf".to_string()]);
        let hosted = SkillSet::Hosted(vec![HostedSkill::new("xlsx", "anthropic").with_version("2")]);
        assert_eq!(hosted.names(), vec!["xlsx".to_string()]);
        assert!(!hosted.is_empty());
        assert!(SkillSet::Composite.is_empty());
        assert!(SkillSet::Native(vec![]).is_empty());
    }
}
