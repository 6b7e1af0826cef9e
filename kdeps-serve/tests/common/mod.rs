use std::path::Path;

use kdeps_serve::ServeSelection;
use tokio::net::TcpListener;

/// Writes a single-agent bundle (`agents/<agent>/<version>/workflow.yaml` plus
/// `resources/<action>.yaml` files) under `dir`, matching the `FixtureEvaluator`'s
/// YAML shapes.
pub fn write_bundle(dir: &Path, agent: &str, version: &str, workflow_yaml: &str, resources: &[(&str, &str)]) {
    let version_dir = dir.join("agents").join(agent).join(version);
    std::fs::create_dir_all(version_dir.join("resources")).unwrap();
    std::fs::write(version_dir.join("workflow.yaml"), workflow_yaml).unwrap();
    for (action, yaml) in resources {
        std::fs::write(version_dir.join("resources").join(format!("{action}.yaml")), yaml).unwrap();
    }
}

/// Boots a real kdeps-serve instance on an ephemeral port and returns its base URL.
pub async fn spawn_server(kdeps_home: &Path) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let kdeps_home = kdeps_home.to_path_buf();
    tokio::spawn(async move {
        kdeps_serve::run_serve_on_listener(listener, kdeps_home, ServeSelection::default())
            .await
            .unwrap();
    });
    format!("http://{addr}")
}
