//! Built-in demo scenario.
//!
//! A keyed counter cache exercised with a weighted put/get mix. Small
//! enough to read in one sitting, but it touches every part of the
//! harness: selector, per-thread workload units, probes, verification,
//! teardown. Real deployments register their own scenarios next to it.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use gauntlet_core::{
    HarnessError, HarnessResult, LoadTest, OperationSelector, OperationSelectorBuilder,
    TestContext, Workload,
};

use crate::registry::TestRegistry;

#[derive(Debug, Clone, Copy, PartialEq)]
enum CacheOp {
    Put,
    Get,
}

/// Put/get workload over an in-memory keyed counter map.
///
/// Properties: `keys` (key space size, default 1000) and
/// `put_probability` (default 0.8).
pub struct KeyedCounterScenario {
    cache: Arc<RwLock<HashMap<u64, u64>>>,
    selector: Arc<OperationSelector<CacheOp>>,
    key_space: u64,
}

impl KeyedCounterScenario {
    /// Builds the scenario from a coordinator properties map.
    pub fn from_properties(properties: &BTreeMap<String, String>) -> HarnessResult<Self> {
        let key_space = parse_or(properties, "keys", 1000u64)?;
        let put_probability = parse_or(properties, "put_probability", 0.8f64)?;

        let selector = OperationSelectorBuilder::new()
            .operation(CacheOp::Put, put_probability)?
            .default_operation(CacheOp::Get)?
            .build()?;

        if key_space == 0 {
            return Err(HarnessError::configuration("keys must be > 0"));
        }

        Ok(Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            selector: Arc::new(selector),
            key_space,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    properties: &BTreeMap<String, String>,
    key: &str,
    default: T,
) -> HarnessResult<T> {
    match properties.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| HarnessError::configuration(format!("invalid value for {key}: {raw}"))),
    }
}

impl LoadTest for KeyedCounterScenario {
    fn setup(&self, ctx: &TestContext) -> HarnessResult<()> {
        info!(test_id = %ctx.test_id(), keys = self.key_space, "seeding counter cache");
        let mut cache = self.cache.write();
        for key in 0..self.key_space {
            cache.insert(key, 0);
        }
        Ok(())
    }

    fn create_workload(&self) -> Option<Box<dyn Workload>> {
        Some(Box::new(CounterUnit {
            cache: Arc::clone(&self.cache),
            selector: Arc::clone(&self.selector),
            key_space: self.key_space,
            rng: StdRng::from_entropy(),
            local_puts: 0,
        }))
    }

    fn verify(&self, global: bool) -> HarnessResult<()> {
        if !global {
            return Ok(());
        }
        let cache = self.cache.read();
        if cache.len() as u64 != self.key_space {
            return Err(HarnessError::workload(format!(
                "expected {} keys, found {}",
                self.key_space,
                cache.len()
            )));
        }
        Ok(())
    }

    fn teardown(&self, global: bool) -> HarnessResult<()> {
        if global {
            self.cache.write().clear();
        }
        Ok(())
    }
}

struct CounterUnit {
    cache: Arc<RwLock<HashMap<u64, u64>>>,
    selector: Arc<OperationSelector<CacheOp>>,
    key_space: u64,
    rng: StdRng,
    local_puts: u64,
}

impl Workload for CounterUnit {
    fn time_step(&mut self) -> HarnessResult<()> {
        let key = self.rng.gen_range(0..self.key_space);
        match self.selector.select(&mut self.rng) {
            CacheOp::Put => {
                *self.cache.write().entry(key).or_insert(0) += 1;
                self.local_puts += 1;
            }
            CacheOp::Get => {
                let _ = self.cache.read().get(&key).copied();
            }
        }
        Ok(())
    }

    fn after_run(&mut self) -> HarnessResult<()> {
        info!(puts = self.local_puts, "workload thread finished");
        Ok(())
    }
}

/// Registers the scenarios shipped with the worker binary.
pub fn register_builtin(registry: &TestRegistry) {
    registry.register(
        "keyed_counter",
        Arc::new(|properties| {
            Ok(Arc::new(KeyedCounterScenario::from_properties(properties)?)
                as Arc<dyn LoadTest>)
        }),
    );
}
