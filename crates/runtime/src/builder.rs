//! 스택 빌더: 네트워크, 데이터베이스, 애플리케이션 컨테이너 생성
//!
//! # 생성 순서
//! 1. 고유한 이름의 내부 네트워크
//! 2. 데이터베이스 컨테이너 → `select 1` 명령이 성공할 때까지 대기
//! 3. 데이터베이스 내부 IP와 이름 조회
//! 4. 애플리케이션 컨테이너 (연결 문자열, 라이선스, 관리자 계정 주입)
//! 5. 로그에 준비 완료 문자열이 나타날 때까지 대기
//! 6. 호스트에서 접근 가능한 URI 계산
//!
//! 각 리소스는 만들어지는 즉시 [`StackHandle`]에 기록됩니다. 중간에
//! 실패하면 에러를 반환하지만 핸들에는 그때까지 만든 리소스가 남아 있어
//! 호출자가 정리할 수 있습니다.

use std::collections::BTreeMap;

use berth_core::config::BerthConfig;
use berth_core::health::HealthPoller;
use tracing::{info, warn};
use uuid::Uuid;

use crate::docker::{ContainerRuntime, ContainerSpec};
use crate::error::RuntimeError;
use crate::probe::{ExecProbe, LogMarkerProbe};
use crate::stack::{ApplicationHandle, DatabaseHandle, NetworkHandle, StackHandle};

/// 빌드 진행 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildProgress {
    NetworkCreated,
    DatabaseReady,
    ApplicationReady,
}

/// 스택 빌더
pub struct StackBuilder<'a, R: ?Sized> {
    runtime: &'a R,
    config: &'a BerthConfig,
    poller: HealthPoller,
    extra_env: BTreeMap<String, String>,
}

impl<'a, R: ContainerRuntime + ?Sized> StackBuilder<'a, R> {
    pub fn new(runtime: &'a R, config: &'a BerthConfig) -> Self {
        Self {
            runtime,
            config,
            poller: HealthPoller::from_config(&config.health),
            extra_env: config.application.extra_env.clone(),
        }
    }

    pub fn with_poller(mut self, poller: HealthPoller) -> Self {
        self.poller = poller;
        self
    }

    /// 애플리케이션 컨테이너에 추가할 환경변수
    ///
    /// 기본 환경변수와 이름이 겹치면 무시됩니다.
    pub fn with_extra_env(mut self, extra: BTreeMap<String, String>) -> Self {
        self.extra_env.extend(extra);
        self
    }

    pub async fn build(&self, stack: &mut StackHandle) -> Result<(), RuntimeError> {
        self.build_with_progress(stack, |_| {}).await
    }

    /// 스택을 만들면서 단계마다 `on_progress`를 호출합니다.
    pub async fn build_with_progress(
        &self,
        stack: &mut StackHandle,
        mut on_progress: impl FnMut(BuildProgress) + Send,
    ) -> Result<(), RuntimeError> {
        let db_config = &self.config.database;
        let app_config = &self.config.application;

        // 1. network
        let network = format!("{}-{}", self.config.network.name_prefix, Uuid::new_v4());
        self.runtime.create_network(&network).await?;
        stack.network = Some(NetworkHandle {
            name: network.clone(),
        });
        info!(network = network.as_str(), "network created");
        on_progress(BuildProgress::NetworkCreated);

        // 2. database
        let db_spec = ContainerSpec {
            name: format!("{network}-database"),
            image: db_config.image_reference(),
            env: database_environment(self.config),
            exposed_ports: vec![db_config.port],
            network: network.clone(),
            privileged: false,
        };
        let db_id = self.runtime.run_container(&db_spec).await?;
        stack.database = Some(DatabaseHandle {
            container_id: db_id.clone(),
            name: db_spec.name.clone(),
            internal_ip: None,
            port: db_config.port,
        });
        info!(
            container_id = db_id.as_str(),
            image = db_spec.image.as_str(),
            "database container started"
        );

        let probe = ExecProbe::new(self.runtime, &db_id, db_config.resolved_readiness_command());
        self.poller
            .wait_for(&probe, db_config.startup_timeout())
            .await?;

        // 3. internal address
        let db_ip = self.runtime.container_ip(&db_id, &network).await?;
        let db_name = self.runtime.container_name(&db_id).await?;
        if let Some(db) = stack.database.as_mut() {
            db.internal_ip = Some(db_ip.clone());
            db.name = db_name;
        }
        info!(ip = db_ip.as_str(), "database ready");
        on_progress(BuildProgress::DatabaseReady);

        // 4. application
        let app_spec = ContainerSpec {
            name: format!("{network}-application"),
            image: app_config.image_reference(),
            env: merge_environment(&application_environment(self.config, &db_ip), &self.extra_env),
            exposed_ports: vec![app_config.port],
            network: network.clone(),
            privileged: !app_config.disable_dind,
        };
        let app_id = self.runtime.run_container(&app_spec).await?;
        stack.application = Some(ApplicationHandle {
            container_id: app_id.clone(),
            name: app_spec.name.clone(),
            uri: None,
        });
        info!(
            container_id = app_id.as_str(),
            image = app_spec.image.as_str(),
            privileged = app_spec.privileged,
            "application container started"
        );

        if app_config.stream_logs {
            match self.runtime.stream_logs(&app_id).await {
                Ok(stream) => stack.log_stream = Some(stream),
                Err(e) => warn!(error = %e, "failed to attach log streaming, continuing"),
            }
        }

        // 5. ready marker
        let probe = LogMarkerProbe::new(self.runtime, &app_id, app_config.ready_marker.clone());
        self.poller
            .wait_for(&probe, app_config.startup_timeout())
            .await?;

        // 6. external uri
        let port = self.runtime.mapped_port(&app_id, app_config.port).await?;
        let uri = format!("http://{}:{port}", self.runtime.host());
        if let Some(app) = stack.application.as_mut() {
            app.uri = Some(uri.clone());
        }
        info!(uri = uri.as_str(), "application ready");
        on_progress(BuildProgress::ApplicationReady);

        Ok(())
    }
}

/// 데이터베이스 컨테이너 환경변수
pub fn database_environment(config: &BerthConfig) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("ACCEPT_EULA".to_owned(), "Y".to_owned()),
        ("SA_PASSWORD".to_owned(), config.database.password.clone()),
    ])
}

/// 애플리케이션 컨테이너 기본 환경변수
///
/// 데이터베이스는 네트워크 내부 주소로만 접근합니다.
pub fn application_environment(config: &BerthConfig, database_ip: &str) -> BTreeMap<String, String> {
    let db = &config.database;
    let app = &config.application;
    let connection = format!(
        "Server={database_ip},{};Database={};User={};Password={}",
        db.port, db.database_name, db.user, db.password
    );
    let flag = |on: bool| (if on { "Y" } else { "N" }).to_owned();

    BTreeMap::from([
        ("ACCEPT_EULA".to_owned(), "Y".to_owned()),
        ("DB_CONNECTION_STRING".to_owned(), connection.clone()),
        ("CONNSTRING".to_owned(), connection),
        ("CREATE_DB".to_owned(), "Y".to_owned()),
        ("ADMIN_API_KEY".to_owned(), app.api_key.clone()),
        ("DISABLE_DIND".to_owned(), flag(app.disable_dind)),
        ("ADMIN_USERNAME".to_owned(), app.admin_username.clone()),
        ("ADMIN_PASSWORD".to_owned(), app.admin_password.clone()),
        ("OCTOPUS_SERVER_BASE64_LICENSE".to_owned(), app.license.clone()),
        ("LICENSE_BASE64".to_owned(), app.license.clone()),
        ("ENABLE_USAGE".to_owned(), "N".to_owned()),
    ])
}

/// 기본 환경변수에 추가 환경변수를 합칩니다.
///
/// 이름이 겹치면 기본값이 이기고 충돌은 로그로 남습니다. 입력은 변경되지 않습니다.
pub fn merge_environment(
    base: &BTreeMap<String, String>,
    extra: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = base.clone();
    for (key, value) in extra {
        if merged.contains_key(key) {
            warn!(
                key = key.as_str(),
                "environment variable already set by the stack, ignoring override"
            );
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }
    merged
}
