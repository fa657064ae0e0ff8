mod client;
mod config;
mod resource;
mod store;

pub use client::{Client, Error, ErrorResponse, ListParams, VersionMatch};
pub use config::{Auth, Config};
pub use resource::{
    Container, ContainerPort, ListMeta, ObjectList, ObjectMeta, Pod, PodSpec, Resource,
};
pub use store::ResourceStore;
