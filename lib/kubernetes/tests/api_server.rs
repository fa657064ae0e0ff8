use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use kubernetes::{Client, Config, Container, ListParams, ObjectMeta, Pod, PodSpec, ResourceStore};
use retry::{Classify, Error as RetryError, ErrorKind, Retrier, RetryPolicy};
use serde_json::{Value, json};
use tokio::net::TcpListener;

const PODS: &str = "/api/v1/namespaces/default/pods";

#[derive(Default)]
struct State {
    pods: BTreeMap<String, Value>,
    last_version: u64,
    generated: u64,

    // replaces rejected as if another client wrote first
    conflicts: usize,
    forbidden: bool,

    replaces: usize,
}

impl State {
    fn next_version(&mut self) -> String {
        self.last_version += 1;
        self.last_version.to_string()
    }
}

fn json_response(status: StatusCode, body: &Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(serde_json::to_vec(body).unwrap())))
        .unwrap()
}

fn status(code: StatusCode, reason: &str, message: &str) -> Response<Full<Bytes>> {
    json_response(
        code,
        &json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": message,
            "reason": reason,
            "code": code.as_u16(),
        }),
    )
}

fn not_found(name: &str) -> Response<Full<Bytes>> {
    status(
        StatusCode::NOT_FOUND,
        "NotFound",
        &format!("pods \"{name}\" not found"),
    )
}

fn conflict(name: &str) -> Response<Full<Bytes>> {
    status(
        StatusCode::CONFLICT,
        "Conflict",
        &format!(
            "Operation cannot be fulfilled on pods \"{name}\": the object has been modified; please apply your changes to the latest version and try again"
        ),
    )
}

fn handle(method: &Method, path: &str, body: Bytes, state: &mut State) -> Response<Full<Bytes>> {
    if state.forbidden {
        return status(StatusCode::FORBIDDEN, "Forbidden", "pods is forbidden");
    }

    let Some(rest) = path.strip_prefix(PODS) else {
        return status(StatusCode::NOT_FOUND, "NotFound", "unknown path");
    };

    match (method, rest.strip_prefix('/')) {
        (&Method::GET, None) => {
            let items = state.pods.values().cloned().collect::<Vec<_>>();
            json_response(
                StatusCode::OK,
                &json!({
                    "kind": "PodList",
                    "apiVersion": "v1",
                    "metadata": { "resourceVersion": state.last_version.to_string() },
                    "items": items,
                }),
            )
        }

        (&Method::POST, None) => {
            let mut pod = serde_json::from_slice::<Value>(&body).unwrap();
            let name = match pod["metadata"]["name"].as_str() {
                Some(name) => name.to_string(),
                None => {
                    state.generated += 1;
                    let prefix = pod["metadata"]["generateName"].as_str().unwrap_or_default();
                    format!("{prefix}{:05}", state.generated)
                }
            };
            if state.pods.contains_key(&name) {
                return status(
                    StatusCode::CONFLICT,
                    "AlreadyExists",
                    &format!("pods \"{name}\" already exists"),
                );
            }

            pod["metadata"]["name"] = json!(name);
            pod["metadata"]["namespace"] = json!("default");
            pod["metadata"]["resourceVersion"] = json!(state.next_version());
            pod["status"] = json!({ "phase": "Pending" });
            state.pods.insert(name, pod.clone());

            json_response(StatusCode::CREATED, &pod)
        }

        (&Method::GET, Some(name)) => match state.pods.get(name) {
            Some(pod) => json_response(StatusCode::OK, pod),
            None => not_found(name),
        },

        (&Method::PUT, Some(name)) => {
            state.replaces += 1;

            let mut pod = serde_json::from_slice::<Value>(&body).unwrap();
            if !state.pods.contains_key(name) {
                return not_found(name);
            }

            if state.conflicts > 0 {
                state.conflicts -= 1;
                let version = state.next_version();
                if let Some(stored) = state.pods.get_mut(name) {
                    stored["metadata"]["resourceVersion"] = json!(version);
                }
                return conflict(name);
            }

            let current = state.pods[name]["metadata"]["resourceVersion"].clone();
            if pod["metadata"]["resourceVersion"] != current {
                return conflict(name);
            }

            pod["metadata"]["resourceVersion"] = json!(state.next_version());
            state.pods.insert(name.to_string(), pod.clone());

            json_response(StatusCode::OK, &pod)
        }

        (&Method::DELETE, Some(name)) => match state.pods.remove(name) {
            Some(pod) => json_response(StatusCode::OK, &pod),
            None => not_found(name),
        },

        _ => status(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed", "method not allowed"),
    }
}

async fn mock_api_server(state: Arc<Mutex<State>>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();

            let state = Arc::clone(&state);
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let state = Arc::clone(&state);

                    async move {
                        let method = req.method().clone();
                        let path = req.uri().path().to_string();
                        let body = req.into_body().collect().await.unwrap().to_bytes();

                        let mut state = state.lock().unwrap();
                        Ok::<_, Infallible>(handle(&method, &path, body, &mut state))
                    }
                });

                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

async fn setup() -> (Client, Arc<Mutex<State>>) {
    let state = Arc::new(Mutex::new(State::default()));
    let addr = mock_api_server(Arc::clone(&state)).await;

    let config = Config::insecure(format!("http://{addr}").parse().unwrap(), "default");
    (Client::from_config(config, None), state)
}

fn new_pod(name: Option<&str>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: name.map(String::from),
            generate_name: Some("podctl-".into()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container::new("my-container", "nginx")],
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn immediate(max_attempts: u32) -> Retrier {
    Retrier::new(RetryPolicy::new(max_attempts).with_backoff(retry::Constant::default()))
}

#[tokio::test]
async fn pod_lifecycle() {
    let (client, _state) = setup().await;
    assert_eq!(client.namespace(), "default");

    let created = client.create(&new_pod(None)).await.unwrap();
    assert_eq!(created.name(), "podctl-00001");
    assert_eq!(created.metadata.resource_version.as_deref(), Some("1"));
    assert_eq!(created.extra["status"]["phase"], "Pending");

    let fetched = client.get::<Pod>(created.name()).await.unwrap();
    assert_eq!(fetched, created);

    let list = client.list::<Pod>(&ListParams::default()).await.unwrap();
    let names = list.into_iter().map(|pod| pod.name().to_string()).collect::<Vec<_>>();
    assert_eq!(names, vec!["podctl-00001"]);

    client.delete::<Pod>(created.name()).await.unwrap();

    let err = client.get::<Pod>(created.name()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn create_existing_name_is_not_a_conflict() {
    let (client, _state) = setup().await;

    client.create(&new_pod(Some("jack"))).await.unwrap();
    let err = client.create(&new_pod(Some("jack"))).await.unwrap_err();

    assert!(matches!(&err, kubernetes::Error::Api(resp) if resp.reason == "AlreadyExists"));
    assert_eq!(err.kind(), ErrorKind::Other);
}

#[tokio::test]
async fn replace_with_stale_version_conflicts() {
    let (client, _state) = setup().await;
    client.create(&new_pod(Some("jack"))).await.unwrap();

    let mut first = client.get::<Pod>("jack").await.unwrap();
    let mut second = client.get::<Pod>("jack").await.unwrap();

    first.container_mut(None).unwrap().image = Some("httpd".into());
    client.replace("jack", &first).await.unwrap();

    second.container_mut(None).unwrap().image = Some("redis".into());
    let err = client.replace("jack", &second).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let stored = client.get::<Pod>("jack").await.unwrap();
    assert_eq!(stored.containers()[0].image.as_deref(), Some("httpd"));
}

#[tokio::test]
async fn replace_requires_resource_version() {
    let (client, state) = setup().await;

    let err = client.replace("jack", &new_pod(Some("jack"))).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    assert_eq!(state.lock().unwrap().replaces, 0);
}

#[tokio::test]
async fn update_retries_conflicts() {
    let (client, state) = setup().await;
    client.create(&new_pod(Some("jack"))).await.unwrap();
    state.lock().unwrap().conflicts = 2;

    let store = ResourceStore::<Pod>::new(client.clone());
    let updated = immediate(3)
        .update(&store, "jack", |pod| {
            pod.container_mut(None).unwrap().image = Some("httpd:latest".into());
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(updated.containers()[0].image.as_deref(), Some("httpd:latest"));
    assert_eq!(state.lock().unwrap().replaces, 3);

    // status written by the server survives the update
    let stored = client.get::<Pod>("jack").await.unwrap();
    assert_eq!(stored.extra["status"]["phase"], "Pending");
}

#[tokio::test]
async fn update_gives_up_on_persistent_conflicts() {
    let (client, state) = setup().await;
    client.create(&new_pod(Some("jack"))).await.unwrap();
    state.lock().unwrap().conflicts = 100;

    let store = ResourceStore::<Pod>::new(client);
    let err = immediate(4)
        .update(&store, "jack", |pod| {
            pod.container_mut(None).unwrap().image = Some("httpd:latest".into());
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, RetryError::Exhausted { attempts: 4, .. }));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(state.lock().unwrap().replaces, 4);
}

#[tokio::test]
async fn update_missing_pod() {
    let (client, state) = setup().await;

    let store = ResourceStore::<Pod>::new(client);
    let err = immediate(5)
        .update(&store, "ghost", |_pod| Ok(()))
        .await
        .unwrap_err();

    assert!(matches!(err, RetryError::Failed { attempts: 1, .. }));
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(state.lock().unwrap().replaces, 0);
}

#[tokio::test]
async fn update_forbidden() {
    let (client, state) = setup().await;
    client.create(&new_pod(Some("jack"))).await.unwrap();
    state.lock().unwrap().forbidden = true;

    let store = ResourceStore::<Pod>::new(client);
    let err = immediate(5)
        .update(&store, "jack", |_pod| Ok(()))
        .await
        .unwrap_err();

    assert_eq!(err.attempts(), 1);
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[tokio::test]
async fn unreachable_server_is_transport_error() {
    // bind and drop, so nothing listens on the port
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();
    let config = Config::insecure(format!("http://{addr}").parse().unwrap(), "default");
    let client = Client::from_config(config, None);

    let err = client.get::<Pod>("jack").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}
