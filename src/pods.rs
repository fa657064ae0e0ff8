use kubernetes::{Client, Container, ListParams, ObjectMeta, Pod, PodSpec};
use retry::{Classify, ErrorKind, Retrier, VersionedStore};
use tracing::{debug, info};

pub const DEFAULT_GENERATE_NAME: &str = "podctl-";
pub const DEFAULT_CONTAINER: &str = "my-container";
pub const DEFAULT_IMAGE: &str = "nginx";

// pods per list request
const PAGE_SIZE: u32 = 500;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] kubernetes::Error),

    #[error("update pod failed, {0}")]
    Update(#[from] retry::Error<kubernetes::Error>),

    #[error("interrupted")]
    Cancelled,
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::Api(err) => err.kind(),
            Error::Update(err) => err.kind(),
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// A single container pod, named by the server from `generate_name`.
pub fn new_pod(generate_name: &str, container: &str, image: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            generate_name: Some(generate_name.to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container::new(container, image)],
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub async fn create(client: &Client, pod: &Pod) -> Result<Pod, Error> {
    let created = client.create(pod).await?;

    info!(
        message = "pod created",
        name = created.name(),
        namespace = client.namespace(),
    );

    Ok(created)
}

/// Names of all pods in the client's namespace, following continue tokens.
pub async fn list(client: &Client) -> Result<Vec<String>, Error> {
    let mut names = Vec::new();
    let mut params = ListParams {
        limit: Some(PAGE_SIZE),
        ..Default::default()
    };

    loop {
        let list = client.list::<Pod>(&params).await?;
        let next = list.metadata.continue_token.clone();

        names.extend(list.into_iter().map(|pod| pod.name().to_string()));

        match next {
            Some(token) if !token.is_empty() => {
                debug!(message = "fetching next page of pods", fetched = names.len());
                params.continue_token = Some(token);
            }
            _ => break,
        }
    }

    Ok(names)
}

/// Point `container`, or the first container, at `image`.
pub fn set_image(pod: &mut Pod, container: Option<&str>, image: &str) -> Result<(), kubernetes::Error> {
    let name = pod.name().to_string();

    match pod.container_mut(container) {
        Some(target) => {
            target.image = Some(image.to_string());
            Ok(())
        }
        None => Err(kubernetes::Error::Validation(match container {
            Some(container) => format!("pod {name} has no container {container}"),
            None => format!("pod {name} has no containers"),
        })),
    }
}

/// Change the image of one container of pod `name`, re-reading the pod
/// whenever the write loses against a concurrent update.
pub async fn update_image<S>(
    retrier: &Retrier,
    store: &S,
    name: &str,
    container: Option<&str>,
    image: &str,
) -> Result<Pod, Error>
where
    S: VersionedStore<Key = str, Object = Pod, Error = kubernetes::Error>,
{
    let updated = retrier
        .update(store, name, |pod| set_image(pod, container, image))
        .await?;

    info!(
        message = "pod updated",
        name,
        image,
        resource_version = updated.metadata.resource_version.as_deref(),
    );

    Ok(updated)
}

pub async fn delete(client: &Client, name: &str) -> Result<(), Error> {
    client.delete::<Pod>(name).await?;

    info!(message = "pod deleted", name, namespace = client.namespace());

    Ok(())
}
