mod common;

use common::{spawn_server, write_bundle};

#[tokio::test]
async fn preflight_failure_returns_422_with_error_code() {
    let dir = tempfile::tempdir().unwrap();
    write_bundle(
        dir.path(),
        "myAgent",
        "1.0.0",
        "agent: myAgent\nversion: \"1.0.0\"\ntarget_action_id: target\naction_ids: []\nroutes:\n  - path: /run\n    methods: [GET]\n",
        &[(
            "target",
            "action_id: target\nname: target\ncategory: test\nrequires: []\npreflight_check: [\"1==2\"]\nrun:\n  kind: apiresponse\n  success: true\n  headers: {}\n  properties: {}\n  data: []\n",
        )],
    );

    let base = spawn_server(dir.path()).await;
    let response = reqwest::get(format!("{base}/run")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], serde_json::json!(false));
    assert_eq!(body["errors"][0]["code"], serde_json::json!("PREFLIGHT_FAILED"));
}

#[tokio::test]
async fn unrouted_path_returns_404() {
    let dir = tempfile::tempdir().unwrap();
    write_bundle(
        dir.path(),
        "myAgent",
        "1.0.0",
        "agent: myAgent\nversion: \"1.0.0\"\ntarget_action_id: target\naction_ids: []\nroutes:\n  - path: /run\n    methods: [GET]\n",
        &[(
            "target",
            "action_id: target\nname: target\ncategory: test\nrequires: []\nrun:\n  kind: apiresponse\n  success: true\n  headers: {}\n  properties: {}\n  data: []\n",
        )],
    );

    let base = spawn_server(dir.path()).await;
    let response = reqwest::get(format!("{base}/not-a-route")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}
