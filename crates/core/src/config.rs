//! 설정 관리: berth.toml 파싱 및 런타임 설정
//!
//! [`BerthConfig`]는 스택 구성, 재시도, 헬스 게이트, 프로비저닝 단계에 필요한
//! 모든 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. 환경변수 (`BERTH_APPLICATION_VERSION=2024.1` 형식, 라이선스는 `LICENSE`)
//! 2. 설정 파일 (`berth.toml`)
//! 3. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), berth_core::error::BerthError> {
//! use berth_core::config::BerthConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = BerthConfig::load("berth.toml").await?;
//!
//! // 파일 없이 기본값 + 환경변수
//! let config = BerthConfig::from_env()?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{BerthError, ConfigError};

/// Credential baked into the application image when no override is given.
pub const DEFAULT_API_KEY: &str = "API-ABCDEFGHIJKLMNOPQURTUVWXYZ12345";

/// Workspace every fresh application instance starts with.
pub const DEFAULT_TARGET: &str = "Spaces-1";

const REDACTED: &str = "***";

/// berth 통합 설정
///
/// `berth.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BerthConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 전체 arrangement 재시도 설정
    #[serde(default)]
    pub retry: RetryConfig,
    /// 헬스 폴링 설정
    #[serde(default)]
    pub health: HealthConfig,
    /// 내부 네트워크 설정
    #[serde(default)]
    pub network: NetworkConfig,
    /// 데이터베이스 컨테이너 설정
    #[serde(default)]
    pub database: DatabaseConfig,
    /// 애플리케이션 컨테이너 설정
    #[serde(default)]
    pub application: ApplicationConfig,
    /// 프로비저닝 도구 설정
    #[serde(default)]
    pub provision: ProvisionConfig,
    /// 정리(teardown) 설정
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

impl BerthConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, BerthError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// 기본값에 환경변수 오버라이드만 적용합니다.
    pub fn from_env() -> Result<Self, BerthError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, BerthError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BerthError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                BerthError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, BerthError> {
        toml::from_str(toml_str).map_err(|e| {
            BerthError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `BERTH_{SECTION}_{FIELD}`.
    /// 라이선스는 관례에 따라 `LICENSE`도 읽습니다.
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "BERTH_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "BERTH_GENERAL_LOG_FORMAT");

        // Retry: non-positive counts keep the default
        override_positive_u32(&mut self.retry.attempts, "BERTH_RETRY_ATTEMPTS");
        override_u64(&mut self.retry.delay_secs, "BERTH_RETRY_DELAY_SECS");

        // Health
        override_u64(
            &mut self.health.poll_interval_ms,
            "BERTH_HEALTH_POLL_INTERVAL_MS",
        );

        // Database
        override_string(&mut self.database.image, "BERTH_DATABASE_IMAGE");
        override_string(&mut self.database.tag, "BERTH_DATABASE_TAG");

        // Application
        override_string(&mut self.application.license, "LICENSE");
        override_string(&mut self.application.license, "BERTH_APPLICATION_LICENSE");
        override_string(&mut self.application.api_key, "BERTH_APPLICATION_API_KEY");
        override_string(&mut self.application.image, "BERTH_APPLICATION_IMAGE");
        override_string(&mut self.application.version, "BERTH_APPLICATION_VERSION");
        override_bool(
            &mut self.application.stream_logs,
            "BERTH_APPLICATION_STREAM_LOGS",
        );
        override_bool(
            &mut self.application.disable_dind,
            "BERTH_APPLICATION_DISABLE_DIND",
        );

        // Provision
        override_string(&mut self.provision.binary, "BERTH_PROVISION_BINARY");
        override_bool(&mut self.provision.skip_init, "BERTH_PROVISION_SKIP_INIT");
        override_bool(&mut self.provision.wait_for_api, "BERTH_PROVISION_WAIT_FOR_API");
        override_bool(&mut self.provision.dump_state, "BERTH_PROVISION_DUMP_STATE");
        override_opt_string(
            &mut self.provision.fallback_target,
            "BERTH_PROVISION_FALLBACK_TARGET",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    ///
    /// 라이선스는 여기서 검사하지 않습니다. 스택을 만들기 직전에
    /// [`ApplicationConfig::require_license`]로 확인합니다.
    pub fn validate(&self) -> Result<(), BerthError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.retry.attempts == 0 || self.retry.attempts > MAX_RETRY_ATTEMPTS {
            return Err(invalid(
                "retry.attempts",
                format!("must be 1-{MAX_RETRY_ATTEMPTS}"),
            ));
        }

        if self.health.poll_interval_ms == 0 {
            return Err(invalid("health.poll_interval_ms", "must be greater than 0"));
        }

        if self.database.image.is_empty() {
            return Err(invalid("database.image", "must not be empty"));
        }
        if self.database.port == 0 {
            return Err(invalid("database.port", "must be greater than 0"));
        }
        if self.database.readiness_command.is_empty() {
            return Err(invalid("database.readiness_command", "must not be empty"));
        }

        if self.application.image.is_empty() {
            return Err(invalid("application.image", "must not be empty"));
        }
        if self.application.port == 0 {
            return Err(invalid("application.port", "must be greater than 0"));
        }
        if !self.application.api_path.starts_with('/') {
            return Err(invalid("application.api_path", "must start with '/'"));
        }

        if self.provision.binary.is_empty() {
            return Err(invalid("provision.binary", "must not be empty"));
        }
        if self.provision.default_target.is_empty() {
            return Err(invalid("provision.default_target", "must not be empty"));
        }
        if self.provision.cleanup_attempts == 0 {
            return Err(invalid(
                "provision.cleanup_attempts",
                "must be greater than 0",
            ));
        }
        if self.provision.command_timeout_secs == Some(0) {
            return Err(invalid(
                "provision.command_timeout_secs",
                "must be greater than 0 when set",
            ));
        }

        Ok(())
    }

    /// 민감 정보를 가린 사본을 반환합니다 (`config show` 출력용).
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.application.license.is_empty() {
            copy.application.license = REDACTED.to_owned();
        }
        copy.application.api_key = REDACTED.to_owned();
        copy.application.admin_password = REDACTED.to_owned();
        let password = std::mem::replace(&mut copy.database.password, REDACTED.to_owned());
        if !password.is_empty() {
            for arg in &mut copy.database.readiness_command {
                *arg = arg.replace(&password, REDACTED);
            }
        }
        copy
    }
}

const MAX_RETRY_ATTEMPTS: u32 = 100;

fn invalid(field: &str, reason: impl Into<String>) -> BerthError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
        }
    }
}

/// 재시도 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 전체 arrangement 시도 횟수
    pub attempts: u32,
    /// 시도 사이 고정 대기 시간 (초)
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_secs: 30,
        }
    }
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

/// 헬스 폴링 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// probe 사이 대기 시간 (밀리초)
    pub poll_interval_ms: u64,
    /// HTTP probe 요청 하나의 타임아웃 (초)
    pub request_timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            request_timeout_secs: 10,
        }
    }
}

impl HealthConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// 내부 네트워크 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// 네트워크 이름 접두사 (뒤에 UUID가 붙음)
    pub name_prefix: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name_prefix: "berth".to_owned(),
        }
    }
}

/// 데이터베이스 컨테이너 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 이미지 (태그 제외)
    pub image: String,
    /// 이미지 태그 (비어 있으면 이미지 기본 태그)
    pub tag: String,
    /// 컨테이너 내부 포트
    pub port: u16,
    /// 관리자 계정
    pub user: String,
    /// 관리자 비밀번호
    pub password: String,
    /// 애플리케이션이 사용할 데이터베이스 이름
    pub database_name: String,
    /// 준비 상태 확인 명령 (컨테이너 안에서 실행, exit code 0 = 준비됨)
    ///
    /// `{user}`, `{password}`는 실행 시점에 계정 값으로 치환됩니다.
    pub readiness_command: Vec<String>,
    /// 준비 대기 타임아웃 (초)
    pub startup_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            image: "mcr.microsoft.com/mssql/server".to_owned(),
            tag: String::new(),
            port: 1433,
            user: "sa".to_owned(),
            readiness_command: vec![
                "/opt/mssql-tools18/bin/sqlcmd".to_owned(),
                "-C".to_owned(),
                "-U".to_owned(),
                "{user}".to_owned(),
                "-P".to_owned(),
                "{password}".to_owned(),
                "-Q".to_owned(),
                "select 1".to_owned(),
            ],
            password: "Password01!".to_owned(),
            database_name: "OctopusDeploy".to_owned(),
            startup_timeout_secs: 60,
        }
    }
}

impl DatabaseConfig {
    /// `image[:tag]`
    pub fn image_reference(&self) -> String {
        if self.tag.is_empty() {
            self.image.clone()
        } else {
            format!("{}:{}", self.image, self.tag)
        }
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    /// 계정 placeholder를 치환한 준비 상태 확인 명령
    pub fn resolved_readiness_command(&self) -> Vec<String> {
        self.readiness_command
            .iter()
            .map(|arg| {
                arg.replace("{user}", &self.user)
                    .replace("{password}", &self.password)
            })
            .collect()
    }
}

/// 애플리케이션 컨테이너 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// 이미지 (태그 제외)
    pub image: String,
    /// 이미지 태그
    pub version: String,
    /// 컨테이너 내부 HTTP 포트
    pub port: u16,
    /// base64 라이선스
    pub license: String,
    /// 관리자 API 키
    pub api_key: String,
    /// 관리자 사용자명
    pub admin_username: String,
    /// 관리자 비밀번호
    pub admin_password: String,
    /// docker-in-docker 비활성화 (false면 privileged 컨테이너)
    pub disable_dind: bool,
    /// 컨테이너 로그를 tracing으로 전달할지 여부
    pub stream_logs: bool,
    /// 로그에 나타나면 준비 완료로 보는 문자열
    pub ready_marker: String,
    /// 로그 마커 대기 타임아웃 (초)
    pub startup_timeout_secs: u64,
    /// 헬스 게이트 경로
    pub api_path: String,
    /// 스택 생성 후 API 대기 타임아웃 (초)
    pub api_timeout_secs: u64,
    /// 추가 환경변수 (기본 환경변수와 충돌하면 무시됨)
    pub extra_env: BTreeMap<String, String>,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            image: "octopusdeploy/octopusdeploy".to_owned(),
            version: "latest".to_owned(),
            port: 8080,
            license: String::new(),
            api_key: DEFAULT_API_KEY.to_owned(),
            admin_username: "admin".to_owned(),
            admin_password: "Password01!".to_owned(),
            disable_dind: true,
            stream_logs: true,
            ready_marker: "Listening for HTTP requests on".to_owned(),
            startup_timeout_secs: 30 * 60,
            api_path: "/api".to_owned(),
            api_timeout_secs: 5 * 60,
            extra_env: BTreeMap::new(),
        }
    }
}

impl ApplicationConfig {
    /// `image:version`
    pub fn image_reference(&self) -> String {
        format!("{}:{}", self.image, self.version)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    /// 라이선스가 설정되어 있고 올바른 base64인지 확인합니다.
    ///
    /// 디코딩된 바이트를 반환합니다. 컨테이너에는 원문 base64가 전달됩니다.
    pub fn require_license(&self) -> Result<Vec<u8>, ConfigError> {
        if self.license.trim().is_empty() {
            return Err(ConfigError::InvalidLicense {
                reason: "no license configured".to_owned(),
            });
        }
        base64::engine::general_purpose::STANDARD
            .decode(self.license.trim())
            .map_err(|e| ConfigError::InvalidLicense {
                reason: e.to_string(),
            })
    }
}

/// 프로비저닝 도구 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// 실행 파일 (PATH에서 검색)
    pub binary: String,
    /// init 단계 생략
    pub skip_init: bool,
    /// apply 전에 API와 workspace 준비를 기다릴지 여부
    pub wait_for_api: bool,
    /// output 읽기 실패 시 state를 로그로 덤프
    pub dump_state: bool,
    /// output을 읽지 못했을 때 사용할 workspace ID
    pub fallback_target: Option<String>,
    /// 파이프라인 시작 시 target
    pub default_target: String,
    /// apply 전 준비 대기 타임아웃 (초)
    pub readiness_timeout_secs: u64,
    /// stale state 삭제 시도 횟수
    pub cleanup_attempts: u32,
    /// stale state 삭제 재시도 간격 (밀리초)
    pub cleanup_delay_ms: u64,
    /// 도구 명령 하나의 타임아웃 (초, 없으면 무제한)
    pub command_timeout_secs: Option<u64>,
    /// 서버 URI 변수 이름
    pub server_var: String,
    /// API 키 변수 이름
    pub api_key_var: String,
    /// target workspace 변수 이름
    pub target_var: String,
    /// 새 workspace 이름 변수
    pub workspace_name_var: String,
    /// 새 workspace 설명 변수
    pub workspace_description_var: String,
    /// 새 workspace ID를 담은 output 이름
    pub workspace_output: String,
    /// workspace 생성 모듈 디렉토리 (base 디렉토리 기준)
    pub create_module_dir: String,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            binary: "terraform".to_owned(),
            skip_init: false,
            wait_for_api: true,
            dump_state: false,
            fallback_target: None,
            default_target: DEFAULT_TARGET.to_owned(),
            readiness_timeout_secs: 5 * 60,
            cleanup_attempts: 3,
            cleanup_delay_ms: 100,
            command_timeout_secs: None,
            server_var: "octopus_server".to_owned(),
            api_key_var: "octopus_apikey".to_owned(),
            target_var: "octopus_space_id".to_owned(),
            workspace_name_var: "octopus_space_name".to_owned(),
            workspace_description_var: "octopus_space_description".to_owned(),
            workspace_output: "octopus_space_id".to_owned(),
            create_module_dir: "1-singlespace".to_owned(),
        }
    }
}

impl ProvisionConfig {
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.cleanup_delay_ms)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}

/// 정리 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// 컨테이너 정지 유예 시간 (초)
    pub stop_timeout_secs: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            stop_timeout_secs: 60,
        }
    }
}

impl CleanupConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        if !val.is_empty() {
            *target = val;
        }
    }
}

fn override_opt_string(target: &mut Option<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        if !val.trim().is_empty() {
            *target = Some(val);
        }
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.to_ascii_lowercase().parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_positive_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) if parsed > 0 => *target = parsed,
            _ => warn!(
                env_key,
                value = val.as_str(),
                "expected a positive integer in env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}
