use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, Volume};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeMap;
use thiserror::Error;

/// Location of the init containers inside of a Deployment
pub const INIT_CONTAINERS_PATH: &str = "/spec/template/spec/initContainers";

/// Location of the volumes inside of a Deployment
pub const VOLUMES_PATH: &str = "/spec/template/spec/volumes";

const ANNOTATIONS_PATH: &str = "/metadata/annotations";

/// An annotation is updated only when the workload already has it set to
/// this exact value.
const ANNOTATION_UPDATE_MARKER: &str = "true";

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("cannot serialize JSON patch: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Add,
    Replace,
}

/// The values carried by the operations we generate
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum PatchValue {
    Container(Box<Container>),
    ContainerList(Vec<Container>),
    Volume(Box<Volume>),
    VolumeList(Vec<Volume>),
    String(String),
}

/// A single RFC 6902 operation
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PatchOperation {
    pub op: Op,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<PatchValue>,
}

/// Build the JSON Patch injecting `containers` as init containers and
/// `volumes` as volumes of the Deployment, then applying the `annotations`
/// updates.
///
/// Operations are emitted in that order: init containers, volumes,
/// annotations.
pub fn build_patch(
    deployment: &Deployment,
    containers: &[Container],
    volumes: &[Volume],
    annotations: &BTreeMap<String, String>,
) -> Result<Vec<u8>, PatchError> {
    let ops = patch_operations(deployment, containers, volumes, annotations);
    Ok(serde_json::to_vec(&ops)?)
}

pub fn patch_operations(
    deployment: &Deployment,
    containers: &[Container],
    volumes: &[Volume],
    annotations: &BTreeMap<String, String>,
) -> Vec<PatchOperation> {
    let pod_spec = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref());
    let existing_init_containers = pod_spec
        .and_then(|pod_spec| pod_spec.init_containers.as_deref())
        .unwrap_or_default();
    let existing_volumes = pod_spec
        .and_then(|pod_spec| pod_spec.volumes.as_deref())
        .unwrap_or_default();

    let mut ops = add_init_containers(existing_init_containers, containers);
    ops.extend(add_volumes(existing_volumes, volumes));
    ops.extend(update_annotations(
        deployment.metadata.annotations.as_ref(),
        annotations,
    ));
    ops
}

/// One `add` operation per container, keeping their order.
///
/// When the workload has no init containers the list doesn't exist yet and
/// appending to it would fail: the first container is added as a single
/// element list, the others are appended.
pub fn add_init_containers(existing: &[Container], containers: &[Container]) -> Vec<PatchOperation> {
    add_to_list(
        INIT_CONTAINERS_PATH,
        !existing.is_empty(),
        containers,
        |container| PatchValue::Container(Box::new(container)),
        PatchValue::ContainerList,
    )
}

/// One `add` operation per volume, following the same rule as
/// [`add_init_containers`].
pub fn add_volumes(existing: &[Volume], volumes: &[Volume]) -> Vec<PatchOperation> {
    add_to_list(
        VOLUMES_PATH,
        !existing.is_empty(),
        volumes,
        |volume| PatchValue::Volume(Box::new(volume)),
        PatchValue::VolumeList,
    )
}

fn add_to_list<T: Clone>(
    path: &str,
    mut list_exists: bool,
    items: &[T],
    item_value: impl Fn(T) -> PatchValue,
    list_value: impl Fn(Vec<T>) -> PatchValue,
) -> Vec<PatchOperation> {
    items
        .iter()
        .map(|item| {
            if list_exists {
                PatchOperation {
                    op: Op::Add,
                    path: format!("{path}/-"),
                    value: Some(item_value(item.clone())),
                }
            } else {
                list_exists = true;
                PatchOperation {
                    op: Op::Add,
                    path: path.to_owned(),
                    value: Some(list_value(vec![item.clone()])),
                }
            }
        })
        .collect()
}

/// A `replace` operation for every update whose key is currently set to
/// `"true"` on the workload.
pub fn update_annotations(
    current: Option<&BTreeMap<String, String>>,
    updates: &BTreeMap<String, String>,
) -> Vec<PatchOperation> {
    let Some(current) = current else {
        return Vec::new();
    };

    updates
        .iter()
        .filter(|(key, _)| {
            current.get(key.as_str()).map(String::as_str) == Some(ANNOTATION_UPDATE_MARKER)
        })
        .map(|(key, value)| PatchOperation {
            op: Op::Replace,
            path: format!("{ANNOTATIONS_PATH}/{}", escape_json_pointer(key)),
            value: Some(PatchValue::String(value.clone())),
        })
        .collect()
}

/// Escape a JSON Pointer reference token (RFC 6901)
pub fn escape_json_pointer(token: &str) -> Cow<'_, str> {
    if token.contains(['~', '/']) {
        Cow::Owned(token.replace('~', "~0").replace('/', "~1"))
    } else {
        Cow::Borrowed(token)
    }
}
