// tests/unit_plugin_manager_test.rs

use async_trait::async_trait;
use auroralink::config::WrapperSettings;
use auroralink::core::dialect::dialect_for_code;
use auroralink::core::driver::{ConnectSpec, DriverConnection, DriverFactory};
use auroralink::core::errors::WrapperError;
use auroralink::core::plugins::factory::{AuxServices, build_plugin_manager};
use auroralink::core::plugins::manager::PluginManager;
use auroralink::core::plugins::service::PluginService;
use auroralink::core::plugins::{
    ConnectionPlugin, ExecuteContext, ExecuteOutcome, NextExecute, TargetFn, methods,
};
use auroralink::core::runtime::WrapperRuntime;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;

/// A factory for chains that never actually dial anything.
struct NullFactory;

#[async_trait]
impl DriverFactory for NullFactory {
    async fn connect(&self, _spec: &ConnectSpec) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        Err(WrapperError::Network("connect ECONNREFUSED".to_string()))
    }
}

fn null_service(settings: WrapperSettings) -> Arc<PluginService> {
    let factory: Arc<dyn DriverFactory> = Arc::new(NullFactory);
    let runtime = WrapperRuntime::new(Arc::clone(&factory));
    let dialect = dialect_for_code(settings.dialect);
    PluginService::new(runtime, Arc::new(settings), factory, dialect)
}

/// Records the order pipeline stages ran in.
struct RecordingPlugin {
    name: &'static str,
    subscribed: &'static [&'static str],
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ConnectionPlugin for RecordingPlugin {
    fn name(&self) -> &'static str {
        self.name
    }

    fn subscribed_methods(&self) -> &'static [&'static str] {
        self.subscribed
    }

    async fn execute(
        &self,
        _ctx: &ExecuteContext,
        next: NextExecute<'_>,
    ) -> Result<ExecuteOutcome, WrapperError> {
        self.log.lock().push(format!("{}:pre", self.name));
        let result = next.call().await;
        self.log.lock().push(format!("{}:post", self.name));
        result
    }
}

/// Terminal stage standing in for the default plugin.
struct TerminalPlugin {
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ConnectionPlugin for TerminalPlugin {
    fn name(&self) -> &'static str {
        "terminal"
    }

    fn subscribed_methods(&self) -> &'static [&'static str] {
        &["*"]
    }

    async fn execute(
        &self,
        ctx: &ExecuteContext,
        _next: NextExecute<'_>,
    ) -> Result<ExecuteOutcome, WrapperError> {
        self.log.lock().push("terminal".to_string());
        (ctx.target)().await
    }
}

fn unit_target() -> TargetFn {
    Arc::new(|| -> BoxFuture<'static, Result<ExecuteOutcome, WrapperError>> {
        Box::pin(async { Ok(ExecuteOutcome::Flag(true)) })
    })
}

#[tokio::test]
async fn execute_pipeline_runs_head_to_tail_with_post_work_unwinding() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let manager = PluginManager::new(vec![
        Arc::new(RecordingPlugin {
            name: "outer",
            subscribed: &["*"],
            log: Arc::clone(&log),
        }),
        Arc::new(RecordingPlugin {
            name: "inner",
            subscribed: &["*"],
            log: Arc::clone(&log),
        }),
        Arc::new(TerminalPlugin {
            log: Arc::clone(&log),
        }),
    ]);

    let outcome = manager
        .execute(ExecuteContext {
            method: methods::QUERY,
            sql: None,
            set_read_only: None,
            target: unit_target(),
        })
        .await
        .unwrap();

    assert!(matches!(outcome, ExecuteOutcome::Flag(true)));
    assert_eq!(
        *log.lock(),
        vec!["outer:pre", "inner:pre", "terminal", "inner:post", "outer:post"]
    );
}

#[tokio::test]
async fn non_subscribed_plugins_are_skipped_transparently() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let manager = PluginManager::new(vec![
        Arc::new(RecordingPlugin {
            name: "query-only",
            subscribed: &[methods::QUERY],
            log: Arc::clone(&log),
        }),
        Arc::new(TerminalPlugin {
            log: Arc::clone(&log),
        }),
    ]);

    manager
        .execute(ExecuteContext {
            method: methods::EXECUTE,
            sql: None,
            set_read_only: None,
            target: unit_target(),
        })
        .await
        .unwrap();
    assert_eq!(*log.lock(), vec!["terminal"]);

    log.lock().clear();
    manager
        .execute(ExecuteContext {
            method: methods::QUERY,
            sql: None,
            set_read_only: None,
            target: unit_target(),
        })
        .await
        .unwrap();
    assert_eq!(
        *log.lock(),
        vec!["query-only:pre", "terminal", "query-only:post"]
    );
}

#[tokio::test]
async fn chain_is_priority_sorted_and_terminated_by_the_default_plugin() {
    let settings = WrapperSettings {
        host: "db.cluster-abc.us-east-2.rds.amazonaws.com".to_string(),
        plugins: "efm2,failover,auroraConnectionTracker".to_string(),
        ..WrapperSettings::default()
    };
    let service = null_service(settings);
    let manager = build_plugin_manager(&service, &AuxServices::default()).unwrap();
    assert_eq!(
        manager.plugin_names(),
        vec!["auroraConnectionTracker", "failover", "efm2", "default"]
    );
}

#[tokio::test]
async fn opting_out_of_sorting_keeps_the_configured_order() {
    let settings = WrapperSettings {
        host: "db.cluster-abc.us-east-2.rds.amazonaws.com".to_string(),
        plugins: "efm2,failover".to_string(),
        auto_sort_plugin_order: false,
        ..WrapperSettings::default()
    };
    let service = null_service(settings);
    let manager = build_plugin_manager(&service, &AuxServices::default()).unwrap();
    assert_eq!(manager.plugin_names(), vec!["efm2", "failover", "default"]);
}

#[tokio::test]
async fn unknown_plugin_codes_are_rejected() {
    let settings = WrapperSettings {
        host: "db.cluster-abc.us-east-2.rds.amazonaws.com".to_string(),
        plugins: "timeTravel".to_string(),
        ..WrapperSettings::default()
    };
    let service = null_service(settings);
    let err = build_plugin_manager(&service, &AuxServices::default()).unwrap_err();
    assert!(matches!(err, WrapperError::IllegalArgument(_)));
}

#[tokio::test]
async fn plugins_requiring_collaborators_fail_without_them() {
    let settings = WrapperSettings {
        host: "db.cluster-abc.us-east-2.rds.amazonaws.com".to_string(),
        plugins: "customEndpoint".to_string(),
        ..WrapperSettings::default()
    };
    let service = null_service(settings);
    let err = build_plugin_manager(&service, &AuxServices::default()).unwrap_err();
    assert!(matches!(err, WrapperError::IllegalArgument(_)));
}
