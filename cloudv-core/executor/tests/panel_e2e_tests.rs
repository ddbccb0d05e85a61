//! End-to-End 测试
//!
//! 在真实面板上执行 开通 → 验证 → 销毁，会产生费用。
//!
//! 运行要求:
//! - WebDriver 服务运行中 (默认 http://localhost:4444)
//! - 面板账号有可用余额
//! - 公钥/私钥文件存在
//!
//! 配置方式:
//! 1. 配置文件 (cloudv.toml / config/cloudv.toml / ~/.config/cloudv/cloudv.toml)
//! 2. 环境变量 `CLOUDV_*` (会覆盖配置文件)
//! 3. `CLOUDV_TEST_DATA` 指定测试数据 CSV (默认 testdata.csv)
//!
//! 运行方法:
//! ```bash
//! export CLOUDV_TEST_DATA=./testdata.csv
//! cargo test --test panel_e2e_tests -- --ignored --nocapture
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use cloudv_executor::*;
use tokio_util::sync::CancellationToken;

fn test_data_path() -> PathBuf {
    std::env::var("CLOUDV_TEST_DATA")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("testdata.csv"))
}

fn setup() -> AcceptanceConfig {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,cloudv_executor=debug")
        .try_init();

    let config = AcceptanceConfig::load().expect("Failed to load config");
    config.validate().expect("Invalid config");
    config
}

#[tokio::test]
#[ignore]
async fn test_first_case_end_to_end() {
    let config = setup();
    let cases = load_test_cases(&test_data_path()).expect("Failed to load test data");
    let first = cases.into_iter().take(1).collect::<Vec<_>>();
    assert_eq!(first.len(), 1, "test data is empty");

    let session = Arc::new(PanelSession::new(&config.panel).expect("Failed to create session"));
    let provisioner = Arc::new(
        PanelProvisioner::from_config(session.clone(), &config).expect("Failed to read public key"),
    );
    let teardown = Arc::new(TeardownController::new(
        Arc::new(PanelDestroyer::new(session.clone())),
        &config.teardown,
    ));
    let recorder = Arc::new(MemoryRecorder::new());

    let orchestrator = Orchestrator::new(
        provisioner,
        Arc::new(NetworkVerifier::from_config(&config)),
        teardown,
        recorder.clone(),
    )
    .with_provision_retries(config.provisioning.retries, config.provisioning.retry_delay);

    let report = orchestrator.run(&first, &CancellationToken::new()).await;
    let _ = session.close().await;

    println!("{}", report.to_json().unwrap());
    assert!(report.leaks().is_empty(), "server left running");
    assert_eq!(report.exit_status(), RunExitStatus::Passed);
}

#[tokio::test]
#[ignore]
async fn test_login_only() {
    let config = setup();
    let cases = load_test_cases(&test_data_path()).expect("Failed to load test data");
    let case = cases.first().expect("test data is empty");

    let session = PanelSession::new(&config.panel).expect("Failed to create session");
    {
        let mut page = session.lock().await;
        page.login(&case.account, &case.secret)
            .await
            .expect("Login failed");
        page.open_cloud().await.expect("Cloud page not reachable");
    }
    session.close().await.expect("Failed to close session");
}
