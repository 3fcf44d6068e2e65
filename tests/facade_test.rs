use async_trait::async_trait;
use std::sync::{Arc, Barrier, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

use registry_facade::demo::greeter_client::GreeterClient;
use registry_facade::demo::greeter_server::GreeterServer;
use registry_facade::server::DemoGreeter;
use registry_facade::{
    FacadeCell, FacadeConfig, FacadeError, Framework, FrameworkError, ReferenceConfig,
    ReferenceKeyMode, RegistryFacade, ServiceConfig,
};

type Greeter = GreeterClient<Channel>;

// 记录调用次数与收到的配置，不做任何网络操作
#[derive(Debug, Default)]
struct CountingFramework {
    exports: AtomicUsize,
    refers: AtomicUsize,
    // (应用名, 注册中心地址, interface:version)
    seen: Mutex<Vec<(String, String, String)>>,
}

impl CountingFramework {
    fn record(&self, application: &str, registry: &str, interface: &str, version: &str) {
        self.seen.lock().unwrap().push((
            application.to_string(),
            registry.to_string(),
            format!("{interface}:{version}"),
        ));
    }

    fn exports(&self) -> usize {
        self.exports.load(Ordering::SeqCst)
    }

    fn refers(&self) -> usize {
        self.refers.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Framework for CountingFramework {
    async fn export(&self, config: ServiceConfig) -> Result<(), FrameworkError> {
        self.exports.fetch_add(1, Ordering::SeqCst);
        self.record(
            &config.application.name,
            &config.registry.url(),
            &config.interface,
            &config.version,
        );
        Ok(())
    }

    async fn refer(&self, config: ReferenceConfig) -> Result<Channel, FrameworkError> {
        self.refers.fetch_add(1, Ordering::SeqCst);
        self.record(
            &config.application.name,
            &config.registry.url(),
            &config.interface,
            &config.version,
        );

        // 模拟耗时的远程解析，放大并发窗口
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(Endpoint::from_static("http://127.0.0.1:9").connect_lazy())
    }
}

// 所有引用都失败的框架
#[derive(Debug, Default)]
struct UnreachableFramework {
    refers: AtomicUsize,
}

#[async_trait]
impl Framework for UnreachableFramework {
    async fn export(&self, config: ServiceConfig) -> Result<(), FrameworkError> {
        Err(FrameworkError::UnsupportedProtocol {
            name: config.protocol.name,
        })
    }

    async fn refer(&self, config: ReferenceConfig) -> Result<Channel, FrameworkError> {
        self.refers.fetch_add(1, Ordering::SeqCst);
        Err(FrameworkError::NoProvider {
            interface: config.interface,
            version: config.version,
        })
    }
}

// 收集日志输出，供断言日志级别
#[derive(Debug, Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn lines_containing(&self, needle: &str) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_string)
            .collect()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

static SHARED_FACADE: FacadeCell<CountingFramework> = FacadeCell::new();

fn counting_facade(mode: ReferenceKeyMode) -> RegistryFacade<CountingFramework> {
    let config = FacadeConfig::new("memory://facade-test", "consumer-app", "tri", 0, 0)
        .unwrap()
        .with_reference_key(mode);
    RegistryFacade::with_framework(config, CountingFramework::default())
}

#[tokio::test]
async fn test_second_init_is_ignored() {
    let cell: FacadeCell<CountingFramework> = FacadeCell::new();

    let first = cell
        .init("memory://first", "first-app", "tri", 20880, 0)
        .unwrap();
    let second = cell
        .init("etcd://10.0.0.1:2379", "second-app", "grpc", 30000, 22222)
        .unwrap();
    // 已初始化后连非法地址也不会再解析
    let third = cell.init("badurl", "third-app", "tri", 1, 1).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &third));
    assert_eq!(second.config().application.name, "first-app");
    assert_eq!(second.config().protocol.port, 20880);
    assert_eq!(second.config().registry.url(), "memory://first");

    cell.register_service(GreeterServer::new(DemoGreeter::new("first-app")), "1.0.0")
        .await
        .unwrap();

    let framework = cell.get().unwrap().framework();
    assert_eq!(framework.exports(), 1);
    assert_eq!(
        framework.seen.lock().unwrap()[0],
        (
            "first-app".to_string(),
            "memory://first".to_string(),
            "demo.Greeter:1.0.0".to_string()
        )
    );
}

#[tokio::test]
async fn test_default_cache_returns_first_handle_for_any_version() {
    let facade = counting_facade(ReferenceKeyMode::Interface);

    let v1 = facade.reference_service::<Greeter>("1.0.0").await.unwrap();
    let v2 = facade.reference_service::<Greeter>("2.0.0").await.unwrap();

    // 默认按接口缓存：第二个版本拿到的是第一次解析出的句柄
    assert!(Arc::ptr_eq(&v1, &v2));
    assert_eq!(facade.framework().refers(), 1);
    assert_eq!(facade.cached_references(), 1);
    assert_eq!(
        facade.framework().seen.lock().unwrap()[0].2,
        "demo.Greeter:1.0.0"
    );
}

#[tokio::test]
async fn test_interface_version_cache_resolves_each_version() {
    let facade = counting_facade(ReferenceKeyMode::InterfaceVersion);

    let v1 = facade.reference_service::<Greeter>("1.0.0").await.unwrap();
    let v2 = facade.reference_service::<Greeter>("2.0.0").await.unwrap();
    let v1_again = facade.reference_service::<Greeter>("1.0.0").await.unwrap();

    assert!(!Arc::ptr_eq(&v1, &v2));
    assert!(Arc::ptr_eq(&v1, &v1_again));
    assert_eq!(facade.framework().refers(), 2);
}

#[tokio::test]
async fn test_calls_before_init_fail_without_side_effects() {
    let cell: FacadeCell<CountingFramework> = FacadeCell::new();

    let register = cell
        .register_service(GreeterServer::new(DemoGreeter::new("app")), "1.0.0")
        .await;
    assert!(matches!(register, Err(FacadeError::Uninitialized)));

    let reference = cell.reference_service::<Greeter>("1.0.0").await;
    assert!(matches!(reference, Err(FacadeError::Uninitialized)));
    assert!(!cell.is_initialized());

    let facade = cell.init("memory://late", "late-app", "tri", 0, 0).unwrap();
    assert_eq!(facade.framework().exports(), 0);
    assert_eq!(facade.framework().refers(), 0);
    assert_eq!(facade.cached_references(), 0);
}

#[tokio::test]
async fn test_init_parses_registry_url() {
    let cell: FacadeCell<CountingFramework> = FacadeCell::new();
    let facade = cell
        .init("zookeeper://host:2181", "app", "tri", 20880, 0)
        .unwrap();

    assert_eq!(facade.config().registry.protocol, "zookeeper");
    assert_eq!(facade.config().registry.address, "host:2181");
    assert_eq!(facade.config().protocol.threads, 200);
}

#[tokio::test]
async fn test_init_rejects_malformed_url() {
    let cell: FacadeCell<CountingFramework> = FacadeCell::new();

    let err = cell.init("badurl", "app", "tri", 20880, 0).unwrap_err();
    assert!(matches!(err, FacadeError::MalformedAddress { ref url } if url == "badurl"));
    assert!(!cell.is_initialized());

    // 失败的初始化不占用容器，之后仍可正常初始化
    let facade = cell.init("memory://ok", "app", "tri", 20880, 0).unwrap();
    assert_eq!(facade.config().registry.address, "ok");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_references_resolve_once() {
    let facade = Arc::new(counting_facade(ReferenceKeyMode::Interface));

    // 所有调用方同时面对空缓存，只允许一次解析
    let mut handles = Vec::new();
    for _ in 0..16 {
        let facade = facade.clone();
        handles.push(tokio::spawn(async move {
            facade.reference_service::<Greeter>("1.0.0").await
        }));
    }

    let results = futures::future::join_all(handles).await;
    let clients: Vec<Arc<Greeter>> = results
        .into_iter()
        .map(|joined| joined.expect("task panicked").expect("reference failed"))
        .collect();

    assert_eq!(facade.framework().refers(), 1);
    for client in &clients {
        assert!(Arc::ptr_eq(client, &clients[0]));
    }
}

#[tokio::test]
async fn test_framework_errors_pass_through() {
    let config = FacadeConfig::new("memory://unreachable", "app", "dubbo", 0, 0).unwrap();
    let facade = RegistryFacade::with_framework(config, UnreachableFramework::default());

    let err = facade
        .reference_service::<Greeter>("1.0.0")
        .await
        .unwrap_err();
    let expected = FrameworkError::NoProvider {
        interface: "demo.Greeter".to_string(),
        version: "1.0.0".to_string(),
    };
    assert_eq!(err.to_string(), expected.to_string());
    assert!(matches!(
        err,
        FacadeError::Framework(FrameworkError::NoProvider { .. })
    ));
    assert_eq!(facade.cached_references(), 0);

    // 失败不缓存，下一次调用会再次解析
    let _ = facade.reference_service::<Greeter>("1.0.0").await;
    assert_eq!(facade.framework().refers.load(Ordering::SeqCst), 2);

    let err = facade
        .register_service(GreeterServer::new(DemoGreeter::new("app")), "1.0.0")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FacadeError::Framework(FrameworkError::UnsupportedProtocol { ref name }) if name == "dubbo"
    ));
}

#[test]
fn test_racing_inits_share_one_facade() {
    const THREADS: usize = 16;
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                SHARED_FACADE
                    .init(
                        &format!("memory://race-{i}"),
                        &format!("app-{i}"),
                        "tri",
                        20000 + i as u16,
                        0,
                    )
                    .unwrap()
            })
        })
        .collect();

    let facades: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("init thread panicked"))
        .collect();

    for facade in &facades {
        assert!(Arc::ptr_eq(facade, &facades[0]));
    }
    assert!(Arc::ptr_eq(SHARED_FACADE.get().unwrap(), &facades[0]));

    // 配置完整来自同一次初始化
    let config = facades[0].config();
    let winner: u16 = config
        .application
        .name
        .strip_prefix("app-")
        .and_then(|i| i.parse().ok())
        .expect("unexpected application name");
    assert_eq!(config.registry.address, format!("race-{winner}"));
    assert_eq!(config.protocol.port, 20000 + winner);
}

#[tokio::test]
async fn test_register_and_reference_log_at_warn() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let facade = counting_facade(ReferenceKeyMode::Interface);
    facade
        .register_service(GreeterServer::new(DemoGreeter::new("app")), "1.0.0")
        .await
        .unwrap();
    facade.reference_service::<Greeter>("1.0.0").await.unwrap();

    let registering = logs.lines_containing("Registering service");
    let referencing = logs.lines_containing("Referencing service");
    assert_eq!(registering.len(), 1);
    assert_eq!(referencing.len(), 1);
    assert!(registering[0].contains("WARN"));
    assert!(referencing[0].contains("WARN"));
    assert!(registering[0].contains("demo.Greeter"));
}
