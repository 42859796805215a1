use axum::Router;
use init_container_injector::{config::InjectionConfig, InjectorServer};
use std::net::SocketAddr;

pub(crate) fn default_test_config() -> InjectionConfig {
    serde_yaml::from_str(
        r#"
containers:
  - name: init-permissions
    image: busybox:1.36
    command: ["sh", "-c", "chmod -R 777 /data"]
    volumeMounts:
      - name: data
        mountPath: /data
  - name: init-wait
    image: busybox
    command: ["sh", "-c", "sleep 1"]
volumes:
  - name: data
    emptyDir: {}
"#,
    )
    .expect("test configuration should be valid")
}

pub(crate) async fn app(config: InjectionConfig) -> Router {
    let server = InjectorServer::new(SocketAddr::from(([127, 0, 0, 1], 8443)), None, config)
        .await
        .unwrap();

    server.router()
}
