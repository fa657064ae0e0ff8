mod metadata;
mod pod;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use metadata::{ListMeta, ObjectMeta};
pub use pod::{Container, ContainerPort, Pod, PodSpec};

/// An accessor trait for a kubernetes Resource.
pub trait Resource: DeserializeOwned + Serialize + Send + Sync {
    /// The group of the resource, or the empty string if the resource doesn't have a
    /// group.
    const GROUP: &'static str;

    /// The version of the resource.
    const VERSION: &'static str;

    /// The kind of the resource, written into request bodies.
    const KIND: &'static str;

    /// The plural of this resource, which is used to construct URLS
    const PLURAL: &'static str;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// `apiVersion` of the resource, `group/version` or just `version` for
    /// the core group.
    fn api_version() -> String {
        if Self::GROUP.is_empty() {
            Self::VERSION.to_string()
        } else {
            format!("{}/{}", Self::GROUP, Self::VERSION)
        }
    }

    /// Creates a url path for http requests for this resource
    fn url_path(namespace: Option<&str>) -> String {
        let group = if Self::GROUP.is_empty() {
            "api"
        } else {
            "apis"
        };
        let api_version = Self::api_version();
        let namespace = match namespace {
            Some(namespace) => format!("namespaces/{namespace}/"),
            None => String::new(),
        };
        let plural = Self::PLURAL;

        format!("/{group}/{api_version}/{namespace}{plural}")
    }
}

/// A generic Kubernetes object list
///
/// This is used instead of a full struct for `PodList` and friends.
/// Kubernetes' API [always seem to expose list structs in this manner](https://docs.rs/k8s-openapi/0.10.0/k8s_openapi/apimachinery/pkg/apis/meta/v1/struct.ObjectMeta.html?search=List).
#[derive(Debug, Deserialize)]
pub struct ObjectList<T> {
    /// ListMeta - only really used for its `resourceVersion` and `continue`
    #[serde(default)]
    pub metadata: ListMeta,

    /// These items we are actually interested in.
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

impl<T> IntoIterator for ObjectList<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
