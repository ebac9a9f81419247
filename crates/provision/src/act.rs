//! 테스트 workspace 생성 헬퍼
//!
//! [`WorkspaceProvisioner`]는 새 workspace를 만드는 단계와 그 workspace를
//! 채우는 단계를 조립해 파이프라인으로 실행합니다. 생성 단계는 무작위 20자
//! 이름과 호출자가 넘긴 설명을 받고, 그 output이 이후 단계의 target이 됩니다.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::ProvisionError;
use crate::pipeline::ProvisioningPipeline;
use crate::stage::{ProvisioningStage, TargetId, Variable};
use crate::tool::ProvisioningTool;

/// workspace 이름 길이
pub const WORKSPACE_NAME_LEN: usize = 20;

/// 무작위 workspace 이름 (하이픈 없는 UUID 앞 20자)
pub fn random_workspace_name() -> String {
    let mut name = Uuid::new_v4().simple().to_string();
    name.truncate(WORKSPACE_NAME_LEN);
    name
}

/// workspace 생성 + 채우기
pub struct WorkspaceProvisioner<'a, T> {
    pipeline: ProvisioningPipeline<'a, T>,
}

impl<'a, T: ProvisioningTool> WorkspaceProvisioner<'a, T> {
    pub fn new(pipeline: ProvisioningPipeline<'a, T>) -> Self {
        Self { pipeline }
    }

    /// `base_dir`의 기본 생성 모듈을 임시 디렉토리로 복사해 workspace를 만들고,
    /// `base_dir/module_dir`로 채웁니다. 새 workspace ID를 반환합니다.
    ///
    /// 복사본은 반환 전에 삭제됩니다.
    pub async fn act(
        &self,
        base_dir: &Path,
        module_dir: &str,
        description: &str,
        populate_vars: Vec<Variable>,
    ) -> Result<TargetId, ProvisionError> {
        let source = base_dir.join(&self.pipeline.config().create_module_dir);
        let copy = copy_to_temp(source).await?;

        let create = ProvisioningStage::new(copy.path());
        let populate = ProvisioningStage::new(base_dir.join(module_dir)).vars(populate_vars);
        let result = self.run_with_create(description, create, vec![populate]).await;

        if let Err(e) = copy.close() {
            warn!(error = %e, "failed to remove module copy");
        }
        result
    }

    /// 호출자가 지정한 생성 모듈로 workspace를 만들고 `populate`로 채웁니다.
    pub async fn act_with_custom_workspace(
        &self,
        description: &str,
        create: ProvisioningStage,
        populate: ProvisioningStage,
    ) -> Result<TargetId, ProvisionError> {
        self.run_with_create(description, create, vec![populate])
            .await
    }

    /// [`act_with_custom_workspace`](Self::act_with_custom_workspace)와 같지만
    /// 채우기 전에 `prepopulate` 단계를 먼저 실행합니다.
    pub async fn act_with_prepopulated_workspace(
        &self,
        description: &str,
        create: ProvisioningStage,
        prepopulate: ProvisioningStage,
        populate: ProvisioningStage,
    ) -> Result<TargetId, ProvisionError> {
        self.run_with_create(description, create, vec![prepopulate, populate])
            .await
    }

    async fn run_with_create(
        &self,
        description: &str,
        create: ProvisioningStage,
        rest: Vec<ProvisioningStage>,
    ) -> Result<TargetId, ProvisionError> {
        let config = self.pipeline.config();
        let name = random_workspace_name();
        info!(workspace = name.as_str(), description, "populating test workspace");

        let create = create
            .var(&config.workspace_name_var, name)
            .var(&config.workspace_description_var, description)
            .output(&config.workspace_output);

        let mut stages = Vec::with_capacity(rest.len() + 1);
        stages.push(create);
        stages.extend(rest);
        self.pipeline.run(&stages, self.pipeline.initial_target()).await
    }
}

/// `source` 트리를 새 임시 디렉토리로 복사합니다.
pub async fn copy_to_temp(source: PathBuf) -> Result<TempDir, ProvisionError> {
    let copied = tokio::task::spawn_blocking(move || {
        let dest = tempfile::Builder::new().prefix("berth").tempdir()?;
        copy_tree(&source, dest.path())?;
        Ok::<_, std::io::Error>(dest)
    })
    .await
    .map_err(std::io::Error::other)??;
    Ok(copied)
}

fn copy_tree(source: &Path, dest: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(std::io::Error::other)?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockTool, ToolCall};
    use berth_core::BerthConfig;
    use serde_json::json;

    fn test_config() -> BerthConfig {
        let mut config = BerthConfig::default();
        config.provision.wait_for_api = false;
        config.provision.cleanup_delay_ms = 1;
        config
    }

    fn value_of(vars: &[Variable], name: &str) -> Option<String> {
        vars.iter().find(|v| v.name == name).map(|v| v.value.clone())
    }

    fn module_tree() -> tempfile::TempDir {
        let base = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(base.path().join("1-singlespace/nested")).unwrap();
        std::fs::write(base.path().join("1-singlespace/main.tf"), "# create").unwrap();
        std::fs::write(base.path().join("1-singlespace/nested/vars.tf"), "# vars").unwrap();
        std::fs::create_dir_all(base.path().join("2-project")).unwrap();
        std::fs::write(base.path().join("2-project/main.tf"), "# populate").unwrap();
        base
    }

    #[test]
    fn workspace_names_are_twenty_hex_chars() {
        let a = random_workspace_name();
        let b = random_workspace_name();
        assert_eq!(a.len(), WORKSPACE_NAME_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn copy_to_temp_copies_nested_files() {
        let base = module_tree();
        let copy = copy_to_temp(base.path().join("1-singlespace")).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(copy.path().join("main.tf")).unwrap(),
            "# create"
        );
        assert!(copy.path().join("nested/vars.tf").exists());
    }

    #[tokio::test]
    async fn copy_of_missing_source_fails() {
        let err = copy_to_temp(PathBuf::from("/nonexistent/berth/module"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Io(_)));
    }

    #[tokio::test]
    async fn act_creates_then_populates_workspace() {
        let config = test_config();
        let base = module_tree();
        let tool = MockTool::new().with_default_output("octopus_space_id", json!("Spaces-2"));
        let provisioner = WorkspaceProvisioner::new(ProvisioningPipeline::new(
            &tool,
            &config,
            "http://localhost:8080",
            "API-KEY",
        ));

        let id = provisioner
            .act(
                base.path(),
                "2-project",
                "creates_a_project",
                vec![Variable::new("project_name", "Test")],
            )
            .await
            .unwrap();
        assert_eq!(id.as_str(), "Spaces-2");

        let calls = tool.calls();
        let applies: Vec<_> = calls
            .iter()
            .filter_map(|c| match c {
                ToolCall::Apply { dir, vars } => Some((dir.clone(), vars.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(applies.len(), 2);

        let (create_dir, create_vars) = &applies[0];
        assert_ne!(create_dir, &base.path().join("1-singlespace"));
        assert!(!create_dir.exists(), "module copy should be removed");
        assert_eq!(value_of(create_vars, "octopus_space_id").as_deref(), Some("Spaces-1"));
        assert_eq!(
            value_of(create_vars, "octopus_space_name").map(|n| n.len()),
            Some(WORKSPACE_NAME_LEN)
        );
        assert_eq!(
            value_of(create_vars, "octopus_space_description").as_deref(),
            Some("creates_a_project")
        );

        let (populate_dir, populate_vars) = &applies[1];
        assert_eq!(populate_dir, &base.path().join("2-project"));
        assert_eq!(value_of(populate_vars, "octopus_space_id").as_deref(), Some("Spaces-2"));
        assert_eq!(value_of(populate_vars, "project_name").as_deref(), Some("Test"));
    }

    #[tokio::test]
    async fn create_stage_starts_from_configured_default_target() {
        let mut config = test_config();
        config.provision.default_target = "Spaces-7".to_owned();
        let tool = MockTool::new().with_output("/modules/init", "octopus_space_id", json!("Spaces-8"));
        let provisioner = WorkspaceProvisioner::new(ProvisioningPipeline::new(
            &tool,
            &config,
            "http://localhost:8080",
            "API-KEY",
        ));

        let id = provisioner
            .act_with_custom_workspace(
                "default_target",
                ProvisioningStage::new("/modules/init"),
                ProvisioningStage::new("/modules/populate"),
            )
            .await
            .unwrap();

        assert_eq!(id.as_str(), "Spaces-8");
        let applied = tool.applied_vars();
        assert_eq!(value_of(&applied[0], "octopus_space_id").as_deref(), Some("Spaces-7"));
        assert_eq!(value_of(&applied[1], "octopus_space_id").as_deref(), Some("Spaces-8"));
    }

    #[tokio::test]
    async fn custom_workspace_keeps_caller_vars_before_name() {
        let config = test_config();
        let tool = MockTool::new().with_output("/modules/init", "octopus_space_id", json!("Spaces-3"));
        let provisioner =
            WorkspaceProvisioner::new(ProvisioningPipeline::new(&tool, &config, "http://app", "key"));

        let id = provisioner
            .act_with_custom_workspace(
                "custom",
                ProvisioningStage::new("/modules/init").var("managers_team", "Teams-1"),
                ProvisioningStage::new("/modules/populate"),
            )
            .await
            .unwrap();
        assert_eq!(id.as_str(), "Spaces-3");

        let vars = &tool.applied_vars()[0];
        let names: Vec<_> = vars.iter().skip(3).map(|v| v.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["managers_team", "octopus_space_name", "octopus_space_description"]
        );
    }

    #[tokio::test]
    async fn prepopulated_workspace_runs_three_stages_in_order() {
        let config = test_config();
        let tool = MockTool::new().with_output("/modules/init", "octopus_space_id", json!("Spaces-4"));
        let provisioner =
            WorkspaceProvisioner::new(ProvisioningPipeline::new(&tool, &config, "http://app", "key"));

        provisioner
            .act_with_prepopulated_workspace(
                "prepopulated",
                ProvisioningStage::new("/modules/init"),
                ProvisioningStage::new("/modules/prepopulate"),
                ProvisioningStage::new("/modules/populate"),
            )
            .await
            .unwrap();

        let dirs: Vec<_> = tool
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                ToolCall::Apply { dir, vars } => Some((dir, value_of(&vars, "octopus_space_id"))),
                _ => None,
            })
            .collect();
        assert_eq!(
            dirs,
            vec![
                (PathBuf::from("/modules/init"), Some("Spaces-1".to_owned())),
                (PathBuf::from("/modules/prepopulate"), Some("Spaces-4".to_owned())),
                (PathBuf::from("/modules/populate"), Some("Spaces-4".to_owned())),
            ]
        );
    }

    #[tokio::test]
    async fn missing_workspace_output_uses_fallback() {
        let mut config = test_config();
        config.provision.fallback_target = Some("Spaces-2".to_owned());
        let tool = MockTool::new();
        let provisioner =
            WorkspaceProvisioner::new(ProvisioningPipeline::new(&tool, &config, "http://app", "key"));

        let id = provisioner
            .act_with_custom_workspace(
                "fallback",
                ProvisioningStage::new("/modules/init"),
                ProvisioningStage::new("/modules/populate"),
            )
            .await
            .unwrap();
        assert_eq!(id.as_str(), "Spaces-2");
    }
}
