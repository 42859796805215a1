use lazy_static::lazy_static;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Annotation used by workloads to opt into init container injection.
pub const INJECT_ANNOTATION_KEY: &str = "init-container-injector-webhook.sphong.com/inject";

/// The only value of [`INJECT_ANNOTATION_KEY`] enabling the injection,
/// compared case-insensitively.
const INJECT_ANNOTATION_OPT_IN: &str = "yes";

lazy_static! {
    /// Namespaces that are never mutated, whatever their workloads ask for.
    pub static ref IGNORED_NAMESPACES: HashSet<&'static str> =
        HashSet::from(["kube-system", "kube-public"]);
}

/// Decide whether a workload living inside of `namespace` and carrying the
/// given annotations has to be mutated.
pub fn should_mutate(namespace: &str, annotations: Option<&BTreeMap<String, String>>) -> bool {
    if IGNORED_NAMESPACES.contains(namespace) {
        debug!(namespace, "namespace is ignored");
        return false;
    }

    match annotations.and_then(|annotations| annotations.get(INJECT_ANNOTATION_KEY)) {
        Some(value) => value.to_lowercase() == INJECT_ANNOTATION_OPT_IN,
        None => {
            debug!(
                annotation = INJECT_ANNOTATION_KEY,
                "opt-in annotation not found"
            );
            false
        }
    }
}
