use std::marker::PhantomData;

use async_trait::async_trait;
use retry::{Versioned, VersionedStore};

use crate::{Client, Error, Resource};

/// Exposes the objects of one resource type in the client's namespace as a
/// [`VersionedStore`], reads are `get` and writes are `replace`.
pub struct ResourceStore<R> {
    client: Client,
    _resource: PhantomData<fn() -> R>,
}

impl<R> ResourceStore<R> {
    pub fn new(client: Client) -> Self {
        ResourceStore {
            client,
            _resource: PhantomData,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl<R> VersionedStore for ResourceStore<R>
where
    R: Resource + Versioned + 'static,
{
    type Key = str;
    type Object = R;
    type Error = Error;

    async fn fetch(&self, name: &str) -> Result<R, Error> {
        self.client.get::<R>(name).await
    }

    async fn write(&self, object: R) -> Result<R, Error> {
        let name = object
            .metadata()
            .name
            .clone()
            .ok_or_else(|| Error::Validation(format!("{} has no name", R::KIND)))?;

        self.client.replace(&name, &object).await
    }
}
