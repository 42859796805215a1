//! Defaulting of the configured containers.
//!
//! The API server defaults the fields of the containers it stores. Applying the
//! same defaults before injecting our containers keeps the patched object
//! identical to what the cluster would persist.

use k8s_openapi::api::core::v1::{Container, Probe};

const PULL_ALWAYS: &str = "Always";
const PULL_IF_NOT_PRESENT: &str = "IfNotPresent";
const TERMINATION_MESSAGE_PATH: &str = "/dev/termination-log";
const TERMINATION_MESSAGE_POLICY: &str = "File";
const PORT_PROTOCOL: &str = "TCP";
const HTTP_GET_PATH: &str = "/";
const HTTP_GET_SCHEME: &str = "HTTP";

/// Return a copy of `containers` with the cluster defaults applied.
pub fn apply_container_defaults(containers: &[Container]) -> Vec<Container> {
    containers
        .iter()
        .cloned()
        .map(|mut container| {
            default_container(&mut container);
            container
        })
        .collect()
}

fn default_container(container: &mut Container) {
    if container.image_pull_policy.is_none() {
        let policy = default_pull_policy(container.image.as_deref());
        container.image_pull_policy = Some(policy.to_owned());
    }
    container
        .termination_message_path
        .get_or_insert_with(|| TERMINATION_MESSAGE_PATH.to_owned());
    container
        .termination_message_policy
        .get_or_insert_with(|| TERMINATION_MESSAGE_POLICY.to_owned());

    for port in container.ports.iter_mut().flatten() {
        port.protocol.get_or_insert_with(|| PORT_PROTOCOL.to_owned());
    }

    for probe in [
        container.liveness_probe.as_mut(),
        container.readiness_probe.as_mut(),
        container.startup_probe.as_mut(),
    ]
    .into_iter()
    .flatten()
    {
        default_probe(probe);
    }

    if let Some(resources) = container.resources.as_mut() {
        if let Some(limits) = resources.limits.as_ref() {
            let requests = resources.requests.get_or_insert_with(Default::default);
            for (name, quantity) in limits {
                requests
                    .entry(name.clone())
                    .or_insert_with(|| quantity.clone());
            }
        }
    }
}

fn default_probe(probe: &mut Probe) {
    probe.timeout_seconds.get_or_insert(1);
    probe.period_seconds.get_or_insert(10);
    probe.success_threshold.get_or_insert(1);
    probe.failure_threshold.get_or_insert(3);

    if let Some(http_get) = probe.http_get.as_mut() {
        http_get.path.get_or_insert_with(|| HTTP_GET_PATH.to_owned());
        http_get
            .scheme
            .get_or_insert_with(|| HTTP_GET_SCHEME.to_owned());
    }
}

/// Images using the `latest` tag, explicitly or implicitly, are always pulled.
fn default_pull_policy(image: Option<&str>) -> &'static str {
    match image.filter(|image| !image.is_empty()).map(image_tag) {
        Some(Some("latest")) => PULL_ALWAYS,
        _ => PULL_IF_NOT_PRESENT,
    }
}

/// The tag of an image reference. An image without tag nor digest implicitly
/// uses `latest`, an image referenced only by digest has no tag.
fn image_tag(image: &str) -> Option<&str> {
    let (name, digest) = match image.split_once('@') {
        Some((name, digest)) => (name, Some(digest)),
        None => (image, None),
    };
    // the registry host may carry a port, the tag is in the last path segment
    let last_segment = name.rsplit_once('/').map_or(name, |(_, segment)| segment);

    match last_segment.split_once(':') {
        Some((_, tag)) => Some(tag),
        None if digest.is_none() => Some("latest"),
        None => None,
    }
}
