//! 技能系统提示词
//!
//! 生成 `<available_skills>` 段落：列出每个技能的名称、描述与「执行端看得到的」位置，
//! 让模型先用 view 读 SKILL.md，再按说明运行 scripts/ 下的脚本。

use std::path::Path;

use super::Skill;

/// 技能位置在执行端的呈现方式
#[derive(Debug, Clone, Copy)]
pub enum SkillMount<'a> {
    /// 本机执行：直接使用宿主路径
    Host,
    /// 容器执行：技能根目录挂载到容器内的该路径
    Container { skills_root: &'a Path, mount: &'a str },
}

impl SkillMount<'_> {
    fn location(&self, skill: &Skill) -> String {
        match self {
            SkillMount::Host => skill.location.display().to_string(),
            SkillMount::Container { skills_root, mount } => {
                let rel = skill
                    .location
                    .strip_prefix(skills_root)
                    .unwrap_or_else(|_| Path::new(skill.location.file_name().unwrap_or_default()));
                format!("{}/{}", mount.trim_end_matches('/'), rel.display())
            }
        }
    }
}

/// 构建技能段落；无技能时返回 None
pub fn skills_system_prompt(skills: &[Skill], mount: SkillMount<'_>) -> Option<String> {
    if skills.is_empty() {
        return None;
    }
    let mut parts = vec![
        "You have access to the following skills. Each skill is a directory containing a SKILL.md with instructions and optional scripts.".to_string(),
        "Before using a skill, read its SKILL.md with the view tool, then follow the instructions using the available tools.".to_string(),
        String::new(),
        "<available_skills>".to_string(),
    ];
    for skill in skills {
        parts.push("<skill>".to_string());
        parts.push(format!("<name>{}</name>", skill.name));
        parts.push(format!("<description>{}</description>", skill.description));
        parts.push(format!("<location>{}</location>", mount.location(skill)));
        parts.push("</skill>".to_string());
    }
    parts.push("</available_skills>".to_string());
    Some(parts.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_prompt_lists_skills() {
        let skills = vec![Skill::new("pdf", "Extract text from PDFs", "/opt/skills/pdf")];
        let prompt = skills_system_prompt(&skills, SkillMount::Host).unwrap();
        assert!(prompt.contains("<name>pdf</name>"));
        assert!(prompt.contains("<location>/opt/skills/pdf</location>"));
    }

    #[test]
    fn test_container_prompt_uses_mount_path() {
        let skills = vec![Skill::new("echo", "Echo messages", "/opt/skills/echo")];
        let root = Path::new("/opt/skills");
        let prompt = skills_system_prompt(
            &skills,
            SkillMount::Container {
                skills_root: root,
                mount: "/mnt/skills",
            },
        )
        .unwrap();
        assert!(prompt.contains("<location>/mnt/skills/echo</location>"));
    }

    #[test]
    fn test_no_skills_no_prompt() {
        assert!(skills_system_prompt(&[], SkillMount::Host).is_none());
    }
}
