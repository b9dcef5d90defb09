//! A small partitioned key/value collection with a pluggable executor.
//!
//! Per-record transforms (`map`, `map_values`, `flat_map`) run partition by partition
//! on the collection's [`Executor`] and keep the partitioning. `group_by_key` is the
//! shuffle: it gathers every partition and emits one partition per distinct key.

use std::hash::Hash;
use std::sync::Arc;

use indexmap::IndexMap;
use rayon::prelude::*;

use crate::error::Result;

/// Runs a function over every partition.
///
/// Implementations may run partitions concurrently but must return results in
/// partition order.
pub trait Executor: Clone + Send + Sync {
    fn run<I, O, F>(&self, partitions: Vec<I>, f: F) -> Vec<O>
    where
        I: Send,
        O: Send,
        F: Fn(usize, I) -> O + Send + Sync;
}

/// Runs partitions one after another on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Serial;

impl Executor for Serial {
    fn run<I, O, F>(&self, partitions: Vec<I>, f: F) -> Vec<O>
    where
        I: Send,
        O: Send,
        F: Fn(usize, I) -> O + Send + Sync,
    {
        partitions
            .into_iter()
            .enumerate()
            .map(|(i, part)| f(i, part))
            .collect()
    }
}

/// Runs partitions on a dedicated rayon thread pool.
#[derive(Debug, Clone)]
pub struct Threaded {
    pool: Arc<rayon::ThreadPool>,
}

impl Threaded {
    /// Pool with `threads` workers; `0` lets rayon pick one per core.
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("seriesnii-{i}"))
            .build()?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Executor for Threaded {
    fn run<I, O, F>(&self, partitions: Vec<I>, f: F) -> Vec<O>
    where
        I: Send,
        O: Send,
        F: Fn(usize, I) -> O + Send + Sync,
    {
        self.pool.install(|| {
            partitions
                .into_par_iter()
                .enumerate()
                .map(|(i, part)| f(i, part))
                .collect()
        })
    }
}

/// Partitioned key/value records bound to an executor.
#[derive(Debug, Clone)]
pub struct Keyed<K, V, E> {
    partitions: Vec<Vec<(K, V)>>,
    executor: E,
}

impl<K, V, E> Keyed<K, V, E>
where
    K: Send,
    V: Send,
    E: Executor,
{
    pub fn from_partitions(partitions: Vec<Vec<(K, V)>>, executor: E) -> Self {
        Self {
            partitions,
            executor,
        }
    }

    /// One partition per record.
    pub fn from_records(records: Vec<(K, V)>, executor: E) -> Self {
        let partitions = records.into_iter().map(|kv| vec![kv]).collect();
        Self::from_partitions(partitions, executor)
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn len(&self) -> usize {
        self.partitions.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(Vec::is_empty)
    }

    pub fn partitions(&self) -> &[Vec<(K, V)>] {
        &self.partitions
    }

    pub fn into_partitions(self) -> Vec<Vec<(K, V)>> {
        self.partitions
    }

    pub fn iter(&self) -> impl Iterator<Item = &(K, V)> {
        self.partitions.iter().flatten()
    }

    /// All records, partition by partition.
    pub fn collect(self) -> Vec<(K, V)> {
        self.partitions.into_iter().flatten().collect()
    }

    pub fn map<K2, V2, F>(self, f: F) -> Keyed<K2, V2, E>
    where
        K2: Send,
        V2: Send,
        F: Fn(K, V) -> (K2, V2) + Send + Sync,
    {
        self.flat_map(move |k, v| std::iter::once(f(k, v)))
    }

    pub fn map_values<V2, F>(self, f: F) -> Keyed<K, V2, E>
    where
        V2: Send,
        F: Fn(V) -> V2 + Send + Sync,
    {
        self.map(move |k, v| (k, f(v)))
    }

    /// Fallible `map_values`; the first error in partition order is returned.
    pub fn try_map_values<V2, F>(self, f: F) -> Result<Keyed<K, V2, E>>
    where
        V2: Send,
        F: Fn(&K, V) -> Result<V2> + Send + Sync,
    {
        let executor = self.executor.clone();
        let partitions = executor
            .run(self.partitions, |_, part| {
                part.into_iter()
                    .map(|(k, v)| {
                        let v2 = f(&k, v)?;
                        Ok((k, v2))
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .into_iter()
            .collect::<Result<Vec<_>>>()?;
        Ok(Keyed::from_partitions(partitions, executor))
    }

    /// Expands every record into zero or more records of the same partition.
    pub fn flat_map<K2, V2, I, F>(self, f: F) -> Keyed<K2, V2, E>
    where
        K2: Send,
        V2: Send,
        I: IntoIterator<Item = (K2, V2)>,
        F: Fn(K, V) -> I + Send + Sync,
    {
        let executor = self.executor.clone();
        let partitions = executor.run(self.partitions, |_, part| {
            part.into_iter().flat_map(|(k, v)| f(k, v)).collect()
        });
        Keyed::from_partitions(partitions, executor)
    }

    /// Gathers every value of each key into one record, one partition per key.
    ///
    /// Keys appear in order of first occurrence; values keep their encounter order.
    pub fn group_by_key(self) -> Keyed<K, Vec<V>, E>
    where
        K: Hash + Eq,
    {
        let mut groups: IndexMap<K, Vec<V>> = IndexMap::new();
        for (k, v) in self.partitions.into_iter().flatten() {
            groups.entry(k).or_default().push(v);
        }
        Keyed::from_records(groups.into_iter().collect(), self.executor)
    }

    /// Like `flat_map`, but reads the records in place so the collection can be reused.
    pub fn flat_map_ref<K2, V2, I, F>(&self, f: F) -> Keyed<K2, V2, E>
    where
        K: Sync,
        V: Sync,
        K2: Send,
        V2: Send,
        I: IntoIterator<Item = (K2, V2)>,
        F: Fn(&K, &V) -> I + Send + Sync,
    {
        let parts: Vec<&Vec<(K, V)>> = self.partitions.iter().collect();
        let partitions = self.executor.run(parts, |_, part| {
            part.iter().flat_map(|(k, v)| f(k, v)).collect()
        });
        Keyed::from_partitions(partitions, self.executor.clone())
    }

    /// Runs `f` once per partition, passing the partition number.
    pub fn run_partitions<O, F>(&self, f: F) -> Vec<O>
    where
        K: Sync,
        V: Sync,
        O: Send,
        F: Fn(usize, &[(K, V)]) -> O + Send + Sync,
    {
        let parts: Vec<&Vec<(K, V)>> = self.partitions.iter().collect();
        self.executor.run(parts, |i, part| f(i, part))
    }
}
