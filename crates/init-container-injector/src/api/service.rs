use k8s_openapi::api::apps::v1::Deployment;
use std::collections::BTreeMap;
use tracing::{debug, error, info, Span};

use crate::{
    admission_request::AdmissionRequest,
    admission_response::AdmissionResponse,
    api::admission_review::AdmissionReviewRequest,
    config::InjectionConfig,
    defaults::apply_container_defaults,
    eligibility::{should_mutate, INJECT_ANNOTATION_KEY},
    errors::{AdmissionError, Result},
    patch::build_patch,
};

/// Value given to the opt-in annotation once the containers are injected
pub(crate) const INJECTED_ANNOTATION_VALUE: &str = "injected";

/// Decode a raw AdmissionReview and compute the response for it.
///
/// Every failure is turned into a structured response, so that the API
/// server can always process it.
pub(crate) fn review(config: &InjectionConfig, body: &[u8]) -> AdmissionResponse {
    let admission_review: AdmissionReviewRequest = match serde_json::from_slice(body) {
        Ok(admission_review) => admission_review,
        Err(e) => {
            error!(error = %e, "cannot decode request body");
            return AdmissionResponse::reject(String::new(), e.to_string());
        }
    };

    let Some(request) = admission_review.request else {
        error!("{}", AdmissionError::MissingRequest);
        return AdmissionResponse::reject(String::new(), AdmissionError::MissingRequest.to_string());
    };
    populate_span_with_admission_request_data(&request);

    match mutate(config, &request) {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "cannot mutate object");
            AdmissionResponse::reject(request.uid, e.to_string())
        }
    }
}

pub(crate) fn mutate(config: &InjectionConfig, request: &AdmissionRequest) -> Result<AdmissionResponse> {
    let deployment = decode_deployment(request)?;

    info!(
        kind = request.kind.kind.as_str(),
        namespace = request.namespace.as_deref().unwrap_or_default(),
        name = request.name.as_deref().unwrap_or_default(),
        deployment = deployment.metadata.name.as_deref().unwrap_or_default(),
        operation = request.operation.as_str(),
        user = request.user_info.username.as_deref().unwrap_or_default(),
        "admission review"
    );

    // objects being created may not have their namespace set yet
    let namespace = deployment
        .metadata
        .namespace
        .as_deref()
        .or(request.namespace.as_deref())
        .unwrap_or_default();
    if !should_mutate(namespace, deployment.metadata.annotations.as_ref()) {
        info!(namespace, "skip mutation");
        return Ok(AdmissionResponse::allow(request.uid.clone()));
    }

    let containers = apply_container_defaults(&config.containers);
    let annotations = BTreeMap::from([(
        INJECT_ANNOTATION_KEY.to_owned(),
        INJECTED_ANNOTATION_VALUE.to_owned(),
    )]);
    let patch = build_patch(&deployment, &containers, &config.volumes, &annotations)?;

    debug!(patch = %String::from_utf8_lossy(&patch), "JSON patch");
    Ok(AdmissionResponse::with_patch(request.uid.clone(), &patch))
}

fn decode_deployment(request: &AdmissionRequest) -> Result<Deployment> {
    let object = request.object.as_ref().ok_or(AdmissionError::MissingObject)?;

    serde_json::from_value(object.0.clone()).map_err(|source| AdmissionError::InvalidObject {
        kind: request.kind.kind.clone(),
        source,
    })
}

fn populate_span_with_admission_request_data(adm_req: &AdmissionRequest) {
    Span::current().record("kind", adm_req.kind.kind.as_str());
    Span::current().record("name", adm_req.name.clone().unwrap_or_default().as_str());
    Span::current().record(
        "namespace",
        adm_req.namespace.clone().unwrap_or_default().as_str(),
    );
    Span::current().record("operation", adm_req.operation.as_str());
    Span::current().record("request_uid", adm_req.uid.as_str());
}
