use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ObjectMeta, Resource};

/// containerPort represents a network port in a single container.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    /// If specified, this must be an IANA_SVC_NAME and unique within the pod.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Number of port to expose on the pod's IP address. This mut be a valid port
    /// number, 0 < x < 65536.
    pub container_port: i32,

    /// Protocol for port. Must be UDP, TCP, or SCTP. Defaults to "TCP".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// A single application container that you want to run within a pod.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Container {
    /// Name of the container specified as a DNS_LABEL. Each container in a pod
    /// must have a unique name (DNS_LABEL). Cannot be updated.
    pub name: String,

    /// Container image name.
    ///
    /// More info: https://kubernetes.io/docs/concepts/containers/images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Container {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Container {
            name: name.into(),
            image: Some(image.into()),
            ..Default::default()
        }
    }
}

/// PodSpec implements k8s pod spec.
///
/// See https://kubernetes.io/docs/reference/generated/kubernetes-api/v1.31/#podspec-v1-core
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    /// List of containers belonging to the pod. There must be at least one
    /// container in a Pod. Containers cannot be added or removed, but their
    /// image can be updated in place.
    pub containers: Vec<Container>,

    /// NodeName is a request to schedule this pod onto a specific node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Pod is a collection of containers that can run on a host. This resource
/// is created by clients and scheduled onto hosts.
///
/// `status` and any field not modelled here are carried in `extra`, so an
/// object read from the server can be written back without losing data.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Pod {
    /// Standard object's metadata.
    ///
    /// More info: https://git.k8s.io/community/contributors/devel/sig-architecture/api-conventions.md#metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<PodSpec>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Pod {
    /// The pod name, empty when the server has not assigned one yet.
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn containers(&self) -> &[Container] {
        self.spec
            .as_ref()
            .map(|spec| spec.containers.as_slice())
            .unwrap_or_default()
    }

    /// Find a container by name, or the first container if `name` is `None`.
    pub fn container_mut(&mut self, name: Option<&str>) -> Option<&mut Container> {
        let containers = &mut self.spec.as_mut()?.containers;

        match name {
            Some(name) => containers.iter_mut().find(|c| c.name == name),
            None => containers.first_mut(),
        }
    }
}

impl Resource for Pod {
    const GROUP: &'static str = "";
    const VERSION: &'static str = "v1";
    const KIND: &'static str = "Pod";
    const PLURAL: &'static str = "pods";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl retry::Versioned for Pod {
    fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ObjectList;

    const POD: &str = r#"{
  "kind": "Pod",
  "apiVersion": "v1",
  "metadata": {
    "name": "jack",
    "namespace": "default",
    "uid": "0972c7d9-c267-4b93-a090-a417eeb9b385",
    "resourceVersion": "150",
    "creationTimestamp": "2024-03-16T20:44:25Z",
    "labels": {
      "app": "web"
    }
  },
  "spec": {
    "containers": [
      {
        "name": "my-container",
        "image": "nginx",
        "imagePullPolicy": "Always",
        "ports": [
          {
            "containerPort": 80,
            "protocol": "TCP"
          }
        ]
      }
    ],
    "nodeName": "node-1",
    "restartPolicy": "Always"
  },
  "status": {
    "phase": "Running"
  }
}"#;

    #[test]
    fn deserialize() {
        let pod = serde_json::from_str::<Pod>(POD).unwrap();

        assert_eq!(pod.name(), "jack");
        assert_eq!(pod.metadata.namespace.as_deref(), Some("default"));
        assert_eq!(pod.metadata.resource_version.as_deref(), Some("150"));
        assert_eq!(pod.metadata.labels.get("app").map(String::as_str), Some("web"));
        assert_eq!(pod.containers().len(), 1);
        assert_eq!(pod.containers()[0].image.as_deref(), Some("nginx"));
        assert_eq!(pod.containers()[0].ports[0].container_port, 80);
        assert_eq!(pod.extra["status"]["phase"], "Running");
    }

    #[test]
    fn unknown_fields_survive_round_trip() {
        let pod = serde_json::from_str::<Pod>(POD).unwrap();
        let written = serde_json::to_value(&pod).unwrap();
        let original = serde_json::from_str::<Value>(POD).unwrap();

        assert_eq!(written, original);
    }

    #[test]
    fn container_mut() {
        let mut pod = serde_json::from_str::<Pod>(POD).unwrap();

        pod.container_mut(None).unwrap().image = Some("httpd:latest".into());
        assert_eq!(pod.containers()[0].image.as_deref(), Some("httpd:latest"));

        assert!(pod.container_mut(Some("my-container")).is_some());
        assert!(pod.container_mut(Some("sidecar")).is_none());
        assert!(Pod::default().container_mut(None).is_none());
    }

    #[test]
    fn new_pod_serializes_minimal_body() {
        let pod = Pod {
            metadata: ObjectMeta {
                generate_name: Some("podctl-".into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container::new("my-container", "nginx")],
                ..Default::default()
            }),
            ..Default::default()
        };

        assert_eq!(
            serde_json::to_value(&pod).unwrap(),
            serde_json::json!({
                "metadata": {
                    "generateName": "podctl-",
                    "namespace": "default"
                },
                "spec": {
                    "containers": [
                        {
                            "name": "my-container",
                            "image": "nginx"
                        }
                    ]
                }
            })
        );
    }

    #[test]
    fn list() {
        let input = r#"{
  "kind": "PodList",
  "apiVersion": "v1",
  "metadata": {
    "resourceVersion": "128055",
    "continue": "token"
  },
  "items": [
    { "metadata": { "name": "a" } },
    { "metadata": { "name": "b" } }
  ]
}"#;

        let list = serde_json::from_str::<ObjectList<Pod>>(input).unwrap();
        assert_eq!(list.metadata.resource_version.as_deref(), Some("128055"));
        assert_eq!(list.metadata.continue_token.as_deref(), Some("token"));

        let names = list.into_iter().map(|pod| pod.name().to_string()).collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn url() {
        assert_eq!(Pod::url_path(None), "/api/v1/pods");
        assert_eq!(Pod::url_path(Some("foo")), "/api/v1/namespaces/foo/pods");
        assert_eq!(Pod::api_version(), "v1");
    }
}
