use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, error, Span};

use crate::{
    admission_response::AdmissionResponse,
    api::{
        admission_review::AdmissionReviewResponse, api_error::ApiError, service,
        state::ApiServerState,
    },
};

#[tracing::instrument(
    name = "mutation",
    fields(
        request_uid=tracing::field::Empty,
        host=crate::config::HOSTNAME.as_str(),
        name=tracing::field::Empty,
        namespace=tracing::field::Empty,
        operation=tracing::field::Empty,
        kind=tracing::field::Empty,
        allowed=tracing::field::Empty,
        mutated=tracing::field::Empty,
        response_message=tracing::field::Empty,
    ),
    skip_all)]
/// Compute the JSON Patch injecting the init containers into the Deployment
/// carried by the AdmissionReview.
///
/// The body is decoded by hand: malformed reviews must still be answered with
/// a well formed AdmissionReview.
pub(crate) async fn mutate_handler(
    State(state): State<Arc<ApiServerState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    if body.is_empty() {
        error!("empty body");
        return Err(ApiError {
            status: StatusCode::BAD_REQUEST,
            message: "empty body".to_owned(),
        });
    }

    let response = service::review(&state.injection_config, &body);
    populate_span_with_admission_response(&response);

    let payload = serde_json::to_vec(&AdmissionReviewResponse::new(response)).map_err(|e| {
        error!(error = %e, "cannot encode response");
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("cannot encode response: {e}"),
        }
    })?;

    debug!("ready to write response");
    Ok((
        [(header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())],
        payload,
    )
        .into_response())
}

pub(crate) async fn readiness_handler() -> StatusCode {
    StatusCode::OK
}

fn populate_span_with_admission_response(response: &AdmissionResponse) {
    Span::current().record("allowed", response.allowed);
    Span::current().record("mutated", response.patch.is_some());
    if let Some(message) = response
        .status
        .as_ref()
        .and_then(|status| status.message.as_ref())
    {
        Span::current().record("response_message", message.as_str());
    }
}
