use std::io::IsTerminal;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use argh::FromArgs;
use exitcode::ExitCode;
use kubernetes::{Client, Pod, ResourceStore};
use retry::{
    CancellationToken, Classify, ErrorKind, ExponentialBackoff, Jitter, Retrier, RetryPolicy,
};
use tracing::{error, info, warn};

use crate::{pods, trace};

const DEFAULT_MAX_ATTEMPTS: i64 = 5;
const DEFAULT_BACKOFF_MS: u64 = 10;
const DEFAULT_BACKOFF_FACTOR: u64 = 2;
const DEFAULT_MAX_BACKOFF_MS: u64 = 1000;

/// Worker threads from `PODCTL_WORKER_THREADS`, or the available
/// parallelism capped at 4.
fn worker_threads(env: Option<String>) -> usize {
    let default = std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(2)
        .min(4);

    match env {
        Some(value) => match value.trim().parse::<usize>() {
            Ok(threads) if threads > 0 => threads,
            _ => {
                warn!(
                    message = "invalid PODCTL_WORKER_THREADS, using default",
                    value,
                    default
                );
                default
            }
        },
        None => default,
    }
}

fn default_generate_name() -> String {
    pods::DEFAULT_GENERATE_NAME.to_string()
}

fn default_container() -> String {
    pods::DEFAULT_CONTAINER.to_string()
}

fn default_image() -> String {
    pods::DEFAULT_IMAGE.to_string()
}

fn default_demo_image() -> String {
    "httpd:latest".to_string()
}

#[derive(FromArgs)]
#[argh(
    description = "Create, list, update and delete Kubernetes pods, retrying updates on write conflicts",
    help_triggers("-h", "--help")
)]
pub struct RootCommand {
    #[argh(
        option,
        short = 'l',
        default = "\"info\".to_string()",
        description = "log level, overridden by PODCTL_LOG"
    )]
    log_level: String,

    #[argh(
        option,
        description = "path to the kubeconfig file, otherwise $KUBECONFIG, ~/.kube/config or the in-cluster service account"
    )]
    kubeconfig: Option<PathBuf>,

    #[argh(
        option,
        short = 'n',
        description = "namespace of the pods, defaults to the namespace of the current context"
    )]
    namespace: Option<String>,

    #[argh(
        option,
        short = 't',
        description = "specify how many threads the Tokio runtime will use, defaults to PODCTL_WORKER_THREADS or up to 4"
    )]
    threads: Option<usize>,

    #[argh(subcommand)]
    command: Command,
}

impl RootCommand {
    pub fn run(&self) -> Result<(), ExitCode> {
        let log_level = std::env::var("PODCTL_LOG").unwrap_or_else(|_| trace::levels(&self.log_level));
        let color = std::io::stderr().is_terminal();
        trace::init(color, &log_level);

        let threads = match self.threads {
            Some(threads) => threads.max(1),
            None => worker_threads(std::env::var("PODCTL_WORKER_THREADS").ok()),
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("podctl-worker")
            .worker_threads(threads)
            .enable_io()
            .enable_time()
            .build()
            .map_err(|err| {
                error!(message = "build tokio runtime failed", %err);
                exitcode::OSERR
            })?;

        let result = runtime.block_on(async move {
            let client = Client::new(self.kubeconfig.as_deref(), self.namespace.clone())
                .map_err(|err| {
                    error!(message = "load kubernetes configuration failed", %err);
                    exit_code(err.kind())
                })?;

            info!(
                message = "start podctl",
                namespace = client.namespace(),
                threads,
            );

            let shutdown = CancellationToken::new();
            tokio::spawn(cancel_on_interrupt(shutdown.clone()));

            run_until_cancelled(&self.command, &client, shutdown)
                .await
                .map_err(handle_command_error)
        });

        runtime.shutdown_timeout(Duration::from_secs(5));

        result
    }
}

/// Run `command`, abandoning it as soon as `shutdown` is cancelled. Requests
/// in flight are dropped, not awaited.
async fn run_until_cancelled(
    command: &Command,
    client: &Client,
    shutdown: CancellationToken,
) -> Result<(), pods::Error> {
    tokio::select! {
        biased;

        _ = shutdown.cancelled() => {
            warn!(message = "command cancelled");
            Err(pods::Error::Cancelled)
        }

        result = command.run(client, shutdown.clone()) => result,
    }
}

async fn cancel_on_interrupt(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            warn!(message = "interrupt received, cancelling");
            shutdown.cancel();
        }
        Err(err) => {
            warn!(message = "unable to listen for interrupt signal", %err);
        }
    }
}

fn exit_code(kind: ErrorKind) -> ExitCode {
    match kind {
        ErrorKind::InvalidConfiguration => exitcode::CONFIG,
        ErrorKind::Transport => exitcode::UNAVAILABLE,
        ErrorKind::PermissionDenied => exitcode::NOPERM,
        ErrorKind::NotFound | ErrorKind::Conflict => exitcode::DATAERR,
        ErrorKind::Cancelled | ErrorKind::Other => exitcode::SOFTWARE,
    }
}

fn handle_command_error(err: pods::Error) -> ExitCode {
    let kind = err.kind();
    error!(message = "command failed", %kind, %err);

    exit_code(kind)
}

/// Build the update retry policy, `max_attempts` below 1 is rejected.
fn retry_policy(
    max_attempts: i64,
    backoff_ms: u64,
    backoff_factor: u64,
    max_backoff_ms: u64,
    jitter: f64,
) -> Result<RetryPolicy, String> {
    let max_attempts = u32::try_from(max_attempts)
        .map_err(|_err| format!("max attempts must be between 1 and {}, got {max_attempts}", u32::MAX))?;

    let backoff = ExponentialBackoff::from_millis(backoff_ms)
        .factor(backoff_factor)
        .max_delay(Duration::from_millis(max_backoff_ms));

    let policy = RetryPolicy::new(max_attempts)
        .with_backoff(backoff)
        .with_jitter(Jitter::new(jitter));
    policy.validate()?;

    Ok(policy)
}

#[derive(Debug, FromArgs)]
#[argh(
    subcommand,
    name = "create",
    description = "Create a pod with a server generated name",
    help_triggers("-h", "--help")
)]
struct Create {
    #[argh(
        option,
        default = "default_generate_name()",
        description = "prefix of the generated pod name"
    )]
    generate_name: String,

    #[argh(
        option,
        default = "default_container()",
        description = "name of the container"
    )]
    container: String,

    #[argh(option, default = "default_image()", description = "container image")]
    image: String,
}

#[derive(Debug, FromArgs)]
#[argh(
    subcommand,
    name = "list",
    description = "List pod names",
    help_triggers("-h", "--help")
)]
struct List {}

#[derive(Debug, FromArgs)]
#[argh(
    subcommand,
    name = "update",
    description = "Change the image of a container, retrying on write conflicts",
    help_triggers("-h", "--help")
)]
struct Update {
    #[argh(positional, description = "pod name")]
    name: String,

    #[argh(option, description = "new container image")]
    image: String,

    #[argh(
        option,
        description = "container to update, defaults to the first container"
    )]
    container: Option<String>,

    #[argh(
        option,
        default = "DEFAULT_MAX_ATTEMPTS",
        description = "total tries, including the first one"
    )]
    max_attempts: i64,

    #[argh(
        option,
        default = "DEFAULT_BACKOFF_MS",
        description = "wait after the first conflict, in milliseconds"
    )]
    backoff_ms: u64,

    #[argh(
        option,
        default = "DEFAULT_BACKOFF_FACTOR",
        description = "multiplier applied to the wait after every conflict"
    )]
    backoff_factor: u64,

    #[argh(
        option,
        default = "DEFAULT_MAX_BACKOFF_MS",
        description = "upper bound of the wait between attempts, in milliseconds"
    )]
    max_backoff_ms: u64,

    #[argh(
        option,
        default = "0.0",
        description = "randomly extend every wait by up to this fraction of it"
    )]
    jitter: f64,
}

#[derive(Debug, FromArgs)]
#[argh(
    subcommand,
    name = "delete",
    description = "Delete a pod",
    help_triggers("-h", "--help")
)]
struct Delete {
    #[argh(positional, description = "pod name")]
    name: String,
}

#[derive(Debug, FromArgs)]
#[argh(
    subcommand,
    name = "demo",
    description = "Create a pod, update its image, list pods and delete it again",
    help_triggers("-h", "--help")
)]
struct Demo {
    #[argh(
        option,
        default = "default_demo_image()",
        description = "image the created pod is updated to"
    )]
    image: String,

    #[argh(
        option,
        default = "DEFAULT_MAX_ATTEMPTS",
        description = "total update tries, including the first one"
    )]
    max_attempts: i64,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Create(Create),
    List(List),
    Update(Update),
    Delete(Delete),
    Demo(Demo),
}

impl Command {
    #![allow(clippy::print_stdout)]
    async fn run(&self, client: &Client, shutdown: CancellationToken) -> Result<(), pods::Error> {
        match self {
            Command::Create(create) => {
                let pod = pods::new_pod(&create.generate_name, &create.container, &create.image);
                let created = pods::create(client, &pod).await?;

                println!("Created pod: {}", created.name());
            }

            Command::List(_) => {
                for name in pods::list(client).await? {
                    println!("{name}");
                }
            }

            Command::Update(update) => {
                let policy = retry_policy(
                    update.max_attempts,
                    update.backoff_ms,
                    update.backoff_factor,
                    update.max_backoff_ms,
                    update.jitter,
                )
                .map_err(retry::Error::<kubernetes::Error>::InvalidConfiguration)?;
                let retrier = Retrier::new(policy).with_cancellation(shutdown);
                let store = ResourceStore::<Pod>::new(client.clone());

                let updated = pods::update_image(
                    &retrier,
                    &store,
                    &update.name,
                    update.container.as_deref(),
                    &update.image,
                )
                .await?;

                println!("Updated pod: {}", updated.name());
            }

            Command::Delete(delete) => {
                pods::delete(client, &delete.name).await?;

                println!("Deleted pod: {}", delete.name);
            }

            Command::Demo(demo) => {
                let policy = retry_policy(
                    demo.max_attempts,
                    DEFAULT_BACKOFF_MS,
                    DEFAULT_BACKOFF_FACTOR,
                    DEFAULT_MAX_BACKOFF_MS,
                    0.0,
                )
                .map_err(retry::Error::<kubernetes::Error>::InvalidConfiguration)?;
                let retrier = Retrier::new(policy).with_cancellation(shutdown);

                run_demo(client, &retrier, &demo.image).await?;
            }
        }

        Ok(())
    }
}

/// Create a pod, update its image, list pods and delete the pod again. The
/// pod is deleted even when the update or the listing fails, and the first
/// error wins.
async fn run_demo(client: &Client, retrier: &Retrier, image: &str) -> Result<(), pods::Error> {
    #![allow(clippy::print_stdout)]

    let pod = pods::new_pod(
        pods::DEFAULT_GENERATE_NAME,
        pods::DEFAULT_CONTAINER,
        pods::DEFAULT_IMAGE,
    );
    let created = pods::create(client, &pod).await?;
    println!("Created pod: {}", created.name());

    let result = async {
        let store = ResourceStore::<Pod>::new(client.clone());
        let updated = pods::update_image(retrier, &store, created.name(), None, image).await?;
        println!("Updated pod: {}", updated.name());

        for name in pods::list(client).await? {
            println!("{name}");
        }

        Ok::<_, pods::Error>(())
    }
    .await;

    if let Err(err) = &result {
        warn!(message = "demo failed, deleting the created pod", name = created.name(), %err);
    }

    let deleted = pods::delete(client, created.name()).await;
    if deleted.is_ok() {
        println!("Deleted pod: {}", created.name());
    }

    result.and(deleted)
}
