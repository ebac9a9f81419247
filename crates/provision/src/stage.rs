//! 프로비저닝 단계 정의

use std::fmt;
use std::path::{Path, PathBuf};

use berth_core::config::DEFAULT_TARGET;

/// `name=value` 형태의 입력 변수
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub value: String,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// `name=value` 문자열을 파싱합니다. 첫 번째 `=`에서 나눕니다.
    pub fn parse(raw: &str) -> Option<Self> {
        let (name, value) = raw.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some(Self::new(name, value))
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// 디렉토리 하나 분량의 프로비저닝 단계
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningStage {
    /// 모듈 디렉토리
    pub dir: PathBuf,
    /// 단계 입력 변수
    pub vars: Vec<Variable>,
    /// 다음 단계의 target이 될 output 이름
    pub output: Option<String>,
}

impl ProvisioningStage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            vars: Vec::new(),
            output: None,
        }
    }

    pub fn var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.push(Variable::new(name, value));
        self
    }

    pub fn vars(mut self, vars: impl IntoIterator<Item = Variable>) -> Self {
        self.vars.extend(vars);
        self
    }

    /// 이 단계가 끝나면 `name` output을 읽어 target으로 사용합니다.
    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.output = Some(name.into());
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// 이후 단계가 작업할 workspace ID
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET)
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TargetId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TargetId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_renders_as_assignment() {
        assert_eq!(
            Variable::new("octopus_space_name", "abc").to_string(),
            "octopus_space_name=abc"
        );
    }

    #[test]
    fn variable_parse_splits_on_first_equals() {
        let var = Variable::parse("conn=Server=db;User=sa").unwrap();
        assert_eq!(var.name, "conn");
        assert_eq!(var.value, "Server=db;User=sa");
        assert!(Variable::parse("no_equals").is_none());
        assert!(Variable::parse("=value").is_none());
    }

    #[test]
    fn stage_builder() {
        let stage = ProvisioningStage::new("/modules/create")
            .var("a", "1")
            .vars([Variable::new("b", "2")])
            .output("octopus_space_id");
        assert_eq!(stage.vars.len(), 2);
        assert_eq!(stage.output.as_deref(), Some("octopus_space_id"));
        assert_eq!(stage.dir(), Path::new("/modules/create"));
    }

    #[test]
    fn default_target_is_first_workspace() {
        assert_eq!(TargetId::default().as_str(), "Spaces-1");
    }
}
