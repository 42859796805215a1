mod common;

use axum::{
    body::Body,
    http::{self, header, Request, StatusCode},
};
use http_body_util::BodyExt;
use init_container_injector::{
    api::admission_review::AdmissionReviewResponse, config::InjectionConfig,
    eligibility::INJECT_ANNOTATION_KEY,
};
use rstest::*;
use serde_json::json;
use tower::ServiceExt;

use common::{app, default_test_config};

const REQUEST_UID: &str = "705ab4f5-6393-11e8-b7cc-42010a800002";

fn mutate_request(body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(http::Method::POST)
        .header(header::CONTENT_TYPE, "application/json")
        .uri("/mutate")
        .body(body.into())
        .unwrap()
}

async fn send(config: InjectionConfig, payload: &str) -> AdmissionReviewResponse {
    let app = app(config).await;
    let response = app.oneshot(mutate_request(payload.to_owned())).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );

    serde_json::from_slice(&response.into_body().collect().await.unwrap().to_bytes()).unwrap()
}

/// Apply the patch of the response to the object carried by the request
fn apply_patch(payload: &str, response: &AdmissionReviewResponse) -> serde_json::Value {
    let review: serde_json::Value = serde_json::from_str(payload).unwrap();
    let mut object = review["request"]["object"].clone();

    let patch_bytes = response
        .response
        .patch_bytes()
        .unwrap()
        .expect("response should carry a patch");
    let patch: json_patch::Patch = serde_json::from_slice(&patch_bytes).unwrap();
    json_patch::patch(&mut object, &patch.0).unwrap();

    object
}

fn init_container_names(object: &serde_json::Value) -> Vec<String> {
    object["spec"]["template"]["spec"]["initContainers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|container| container["name"].as_str().unwrap().to_owned())
        .collect()
}

fn volume_names(object: &serde_json::Value) -> Vec<String> {
    object["spec"]["template"]["spec"]["volumes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|volume| volume["name"].as_str().unwrap().to_owned())
        .collect()
}

#[tokio::test]
async fn test_readiness() {
    let app = app(default_test_config()).await;

    let request = Request::builder()
        .uri("/readiness")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
#[rstest]
#[case::ignored_namespace(include_str!("data/deployment_in_kube_system.json"))]
#[case::not_opted_in(include_str!("data/deployment_without_opt_in.json"))]
async fn test_allowed_without_patch(#[case] payload: &str) {
    let admission_review_response = send(default_test_config(), payload).await;

    assert_eq!(
        admission_review_response.api_version.as_deref(),
        Some("admission.k8s.io/v1")
    );
    assert_eq!(
        admission_review_response.kind.as_deref(),
        Some("AdmissionReview")
    );
    let response = admission_review_response.response;
    assert!(response.allowed);
    assert_eq!(response.uid, REQUEST_UID);
    assert!(response.patch.is_none());
    assert!(response.patch_type.is_none());
    assert!(response.status.is_none());
}

#[tokio::test]
async fn test_inject_into_deployment_without_init_containers() {
    let payload = include_str!("data/deployment_opted_in.json");

    let admission_review_response = send(default_test_config(), payload).await;

    let response = &admission_review_response.response;
    assert!(response.allowed);
    assert_eq!(response.uid, REQUEST_UID);
    assert!(response.patch_type.is_some());

    let patch: serde_json::Value =
        serde_json::from_slice(&response.patch_bytes().unwrap().unwrap()).unwrap();
    let ops = patch.as_array().unwrap();
    assert_eq!(ops.len(), 3);
    assert_eq!(ops[0]["op"], "add");
    assert_eq!(ops[0]["path"], "/spec/template/spec/initContainers");
    assert_eq!(ops[0]["value"].as_array().unwrap().len(), 1);
    assert_eq!(ops[1]["op"], "add");
    assert_eq!(ops[1]["path"], "/spec/template/spec/initContainers/-");
    assert_eq!(ops[2]["op"], "add");
    assert_eq!(ops[2]["path"], "/spec/template/spec/volumes");

    let patched = apply_patch(payload, &admission_review_response);
    assert_eq!(
        init_container_names(&patched),
        vec!["init-permissions", "init-wait"]
    );

    let init_containers = &patched["spec"]["template"]["spec"]["initContainers"];
    assert_eq!(init_containers[0]["imagePullPolicy"], "IfNotPresent");
    assert_eq!(init_containers[1]["imagePullPolicy"], "Always");
    assert_eq!(
        init_containers[0]["terminationMessagePath"],
        "/dev/termination-log"
    );
    assert_eq!(init_containers[0]["volumeMounts"][0]["mountPath"], "/data");

    // every mounted volume is part of the pod
    assert_eq!(volume_names(&patched), vec!["data"]);
    assert_eq!(
        patched["spec"]["template"]["spec"]["volumes"][0]["emptyDir"],
        json!({})
    );

    // the opt-in annotation is not set to "true", it's left untouched
    assert_eq!(patched["metadata"]["annotations"][INJECT_ANNOTATION_KEY], "yes");
}

#[tokio::test]
async fn test_inject_into_deployment_with_init_containers() {
    let payload = include_str!("data/deployment_opted_in_with_init_containers.json");

    let admission_review_response = send(default_test_config(), payload).await;

    let response = &admission_review_response.response;
    assert!(response.allowed);

    let patch: serde_json::Value =
        serde_json::from_slice(&response.patch_bytes().unwrap().unwrap()).unwrap();
    let paths: Vec<&str> = patch
        .as_array()
        .unwrap()
        .iter()
        .map(|op| op["path"].as_str().unwrap())
        .collect();
    assert_eq!(
        paths,
        vec![
            "/spec/template/spec/initContainers/-",
            "/spec/template/spec/initContainers/-",
            "/spec/template/spec/volumes",
        ]
    );

    let patched = apply_patch(payload, &admission_review_response);
    assert_eq!(
        init_container_names(&patched),
        vec!["migrate", "init-permissions", "init-wait"]
    );
    assert_eq!(volume_names(&patched), vec!["data"]);
}

#[tokio::test]
async fn test_volumes_appended_to_existing_ones() {
    let mut payload: serde_json::Value =
        serde_json::from_str(include_str!("data/deployment_opted_in.json")).unwrap();
    payload["request"]["object"]["spec"]["template"]["spec"]["volumes"] =
        json!([{"name": "cache", "emptyDir": {}}]);
    let payload = payload.to_string();

    let admission_review_response = send(default_test_config(), &payload).await;

    let patched = apply_patch(&payload, &admission_review_response);
    assert_eq!(volume_names(&patched), vec!["cache", "data"]);
}

#[tokio::test]
async fn test_nothing_configured() {
    let payload = include_str!("data/deployment_opted_in.json");

    let admission_review_response = send(InjectionConfig::default(), payload).await;

    let response = &admission_review_response.response;
    assert!(response.allowed);
    let patch: serde_json::Value =
        serde_json::from_slice(&response.patch_bytes().unwrap().unwrap()).unwrap();
    assert_eq!(patch, json!([]));
}

#[tokio::test]
#[rstest]
#[case::malformed_json("{\"request\": ")]
#[case::not_an_object("[1, 2, 3]")]
#[case::request_without_uid(r#"{"request": {"operation": "CREATE"}}"#)]
async fn test_malformed_review(#[case] payload: &str) {
    let admission_review_response = send(default_test_config(), payload).await;

    let response = admission_review_response.response;
    assert!(!response.allowed);
    assert!(response.patch.is_none());
    let message = response
        .status
        .expect("status should be filled")
        .message
        .expect("message should be filled");
    assert!(!message.is_empty());
}

#[tokio::test]
async fn test_malformed_object_echoes_uid() {
    let mut payload: serde_json::Value =
        serde_json::from_str(include_str!("data/deployment_opted_in.json")).unwrap();
    payload["request"]["object"]["spec"]["template"]["spec"]["initContainers"] =
        json!("not a list");

    let admission_review_response = send(default_test_config(), &payload.to_string()).await;

    let response = admission_review_response.response;
    assert!(!response.allowed);
    assert!(response.patch.is_none());
    assert_eq!(response.uid, REQUEST_UID);
}

#[tokio::test]
async fn test_empty_body() {
    let app = app(default_test_config()).await;

    let response = app.oneshot(mutate_request(Body::empty())).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_review_larger_than_default_body_limit() {
    // an UPDATE review carries both the new and the old object
    let mut payload: serde_json::Value =
        serde_json::from_str(include_str!("data/deployment_opted_in.json")).unwrap();
    payload["request"]["operation"] = json!("UPDATE");
    payload["request"]["object"]["metadata"]["annotations"]["example.com/blob"] =
        json!("x".repeat(1_100_000));
    payload["request"]["oldObject"] = payload["request"]["object"].clone();
    let payload = payload.to_string();
    assert!(payload.len() > 2 * 1024 * 1024);

    let admission_review_response = send(default_test_config(), &payload).await;

    let response = admission_review_response.response;
    assert!(response.allowed);
    assert_eq!(response.uid, REQUEST_UID);
    assert!(response.patch.is_some());
}

#[tokio::test]
async fn test_mutate_requires_post() {
    let app = app(default_test_config()).await;

    let request = Request::builder()
        .method(http::Method::GET)
        .uri("/mutate")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_concurrent_requests_share_configuration() {
    let app = app(default_test_config()).await;
    let payload = include_str!("data/deployment_opted_in.json");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let app = app.clone();
            tokio::spawn(async move {
                let response = app.oneshot(mutate_request(payload)).await.unwrap();
                let bytes = response.into_body().collect().await.unwrap().to_bytes();
                serde_json::from_slice::<AdmissionReviewResponse>(&bytes).unwrap()
            })
        })
        .collect();

    let mut patches = Vec::new();
    for handle in handles {
        patches.push(handle.await.unwrap().response.patch);
    }
    assert!(patches.iter().all(|patch| patch.is_some()));
    assert!(patches.windows(2).all(|pair| pair[0] == pair[1]));
}
