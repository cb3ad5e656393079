//! Routed pool over every shard connection.

use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use super::connection::ShardConnection;
use super::types::{Publication, Query, QueryOptions};
use crate::error::{ClusterError, Result};
use crate::routing::types::{Mapper, Operation, Route, RoutingKey, ShardId};

pub struct ClientCluster {
    shards: Vec<Arc<dyn ShardConnection>>,
    mapper: RwLock<Mapper>,
}

impl ClientCluster {
    pub fn new(shards: Vec<Arc<dyn ShardConnection>>, mapper: Mapper) -> Self {
        Self {
            shards,
            mapper: RwLock::new(mapper),
        }
    }

    pub fn shards(&self) -> &[Arc<dyn ShardConnection>] {
        &self.shards
    }

    pub fn shard_ids(&self) -> Vec<ShardId> {
        (0..self.shards.len()).map(ShardId).collect()
    }

    pub fn set_mapper(&self, mapper: Mapper) {
        *self.mapper.write() = mapper;
    }

    pub fn get_mapper(&self) -> Mapper {
        self.mapper.read().clone()
    }

    /// Runs the current mapper for `key` and `operation`.
    pub fn map(&self, key: &RoutingKey, operation: Operation) -> Route {
        let mapper = self.get_mapper();
        mapper(key, operation, &self.shard_ids())
    }

    fn targets(&self, key: &RoutingKey, operation: Operation) -> Result<Vec<Arc<dyn ShardConnection>>> {
        self.map(key, operation)
            .shards()
            .into_iter()
            .map(|id| {
                self.shards
                    .get(id.0)
                    .cloned()
                    .ok_or(ClusterError::UnknownShard { shard: id })
            })
            .collect()
    }

    /// Calls every routed shard concurrently. All calls run to completion; the first
    /// error (in shard order) is returned.
    async fn on_targets<T, F, Fut>(&self, key: &RoutingKey, operation: Operation, call: F) -> Result<Vec<T>>
    where
        F: Fn(Arc<dyn ShardConnection>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let targets = self.targets(key, operation)?;
        tracing::trace!(
            "Routing {:?} for {:?} to {} shard(s)",
            operation,
            key,
            targets.len()
        );
        join_all(targets.into_iter().map(call))
            .await
            .into_iter()
            .collect()
    }

    pub async fn subscribe(&self, channel: &str) -> Result<()> {
        self.on_targets(&RoutingKey::from(channel), Operation::Subscribe, |shard| async move {
            shard.subscribe(channel).await
        })
        .await?;
        Ok(())
    }

    pub async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.on_targets(&RoutingKey::from(channel), Operation::Unsubscribe, |shard| async move {
            shard.unsubscribe(channel).await
        })
        .await?;
        Ok(())
    }

    pub async fn publish(&self, channel: &str, publication: Publication) -> Result<()> {
        self.on_targets(&RoutingKey::from(channel), Operation::Publish, |shard| {
            let publication = publication.clone();
            async move { shard.publish(channel, publication).await }
        })
        .await?;
        Ok(())
    }

    pub async fn is_subscribed(&self, channel: &str) -> Result<bool> {
        let answers = self
            .on_targets(&RoutingKey::from(channel), Operation::IsSubscribed, |shard| async move {
                shard.is_subscribed(channel).await
            })
            .await?;
        Ok(answers.into_iter().any(|subscribed| subscribed))
    }

    /// Drops every subscription this pool holds on every shard.
    pub async fn remove_all(&self) -> Result<()> {
        join_all(self.shards.iter().map(|shard| shard.unsubscribe_all()))
            .await
            .into_iter()
            .collect::<Result<Vec<()>>>()?;
        Ok(())
    }

    pub async fn set(&self, key: &[String], value: Value) -> Result<()> {
        self.on_targets(&path_key(key), Operation::Set, |shard| {
            let value = value.clone();
            async move { shard.set(key, value).await }
        })
        .await?;
        Ok(())
    }

    pub async fn add(&self, key: &[String], value: Value) -> Result<()> {
        self.on_targets(&path_key(key), Operation::Add, |shard| {
            let value = value.clone();
            async move { shard.add(key, value).await }
        })
        .await?;
        Ok(())
    }

    pub async fn get(&self, key: &[String]) -> Result<Option<Value>> {
        let values = self
            .on_targets(&path_key(key), Operation::Get, |shard| async move {
                shard.get(key).await
            })
            .await?;
        Ok(values.into_iter().flatten().next())
    }

    pub async fn count(&self, key: &[String]) -> Result<usize> {
        let counts = self
            .on_targets(&path_key(key), Operation::Count, |shard| async move {
                shard.count(key).await
            })
            .await?;
        Ok(counts.into_iter().sum())
    }

    pub async fn has_key(&self, key: &[String]) -> Result<bool> {
        let answers = self
            .on_targets(&path_key(key), Operation::HasKey, |shard| async move {
                shard.has_key(key).await
            })
            .await?;
        Ok(answers.into_iter().any(|found| found))
    }

    pub async fn remove(&self, key: &[String]) -> Result<Option<Value>> {
        let removed = self
            .on_targets(&path_key(key), Operation::Remove, |shard| async move {
                shard.remove(key).await
            })
            .await?;
        Ok(removed.into_iter().flatten().next())
    }

    pub async fn pop(&self, key: &[String]) -> Result<Option<Value>> {
        let popped = self
            .on_targets(&path_key(key), Operation::Pop, |shard| async move {
                shard.pop(key).await
            })
            .await?;
        Ok(popped.into_iter().flatten().next())
    }

    pub async fn get_range(&self, key: &[String], from: usize, to: Option<usize>) -> Result<Option<Value>> {
        let ranges = self
            .on_targets(&path_key(key), Operation::GetRange, |shard| async move {
                shard.get_range(key, from, to).await
            })
            .await?;
        Ok(ranges.into_iter().flatten().next())
    }

    pub async fn remove_range(&self, key: &[String], from: usize, to: Option<usize>) -> Result<Option<Value>> {
        let removed = self
            .on_targets(&path_key(key), Operation::RemoveRange, |shard| async move {
                shard.remove_range(key, from, to).await
            })
            .await?;
        Ok(removed.into_iter().flatten().next())
    }

    pub async fn splice(&self, key: &[String], index: usize, count: usize, items: Vec<Value>) -> Result<Value> {
        let removed = self
            .on_targets(&path_key(key), Operation::Splice, |shard| {
                let items = items.clone();
                async move { shard.splice(key, index, count, items).await }
            })
            .await?;
        Ok(removed.into_iter().next().unwrap_or_else(|| Value::Array(Vec::new())))
    }

    pub async fn expire(&self, keys: &[Vec<String>], seconds: u64) -> Result<()> {
        for key in keys {
            let single = std::slice::from_ref(key);
            self.on_targets(&path_key(key), Operation::Expire, |shard| async move {
                shard.expire(single, seconds).await
            })
            .await?;
        }
        Ok(())
    }

    pub async fn unexpire(&self, keys: &[Vec<String>]) -> Result<()> {
        for key in keys {
            let single = std::slice::from_ref(key);
            self.on_targets(&path_key(key), Operation::Unexpire, |shard| async move {
                shard.unexpire(single).await
            })
            .await?;
        }
        Ok(())
    }

    pub async fn run(&self, query: &Query, options: &QueryOptions) -> Result<Value> {
        let key = RoutingKey::Query {
            map_index: query.map_index.clone(),
        };
        let results = self
            .on_targets(&key, Operation::Run, |shard| async move {
                shard.run(query, options).await
            })
            .await?;
        Ok(results.into_iter().next().unwrap_or(Value::Null))
    }
}

fn path_key(key: &[String]) -> RoutingKey {
    RoutingKey::Path(key.to_vec())
}
