//! Concurrent stress tests for Cubby.
//!
//! The thrash harness runs many clients against one manager at once, each
//! in its own namespace and all using the same keys. Every client writes its
//! own name as the value, so any value it reads back that is not its own
//! name is a namespace isolation violation.

use cubby_core::{OpContext, StorageClient, StorageManager};
use std::thread;
use std::time::{Duration, Instant};

/// Configuration for a thrash run.
#[derive(Debug, Clone)]
pub struct ThrashConfig {
    /// Number of concurrent clients, one thread each.
    pub clients: usize,
    /// Keys every client uses.
    pub keys: Vec<Vec<u8>>,
    /// Verify → delete → reset rounds per client.
    pub iterations: usize,
}

impl Default for ThrashConfig {
    fn default() -> Self {
        Self {
            clients: 8,
            keys: ["a", "b", "c", "d", "e"]
                .iter()
                .map(|k| k.as_bytes().to_vec())
                .collect(),
            iterations: 100,
        }
    }
}

/// Result of a thrash run.
#[derive(Debug, Clone)]
pub struct ThrashResult {
    /// Client operations performed.
    pub total_ops: usize,
    /// Operations that returned an error.
    pub errors: Vec<String>,
    /// Reads that returned something other than the client's own state.
    pub violations: Vec<String>,
    /// Wall time of the run.
    pub duration: Duration,
}

impl ThrashResult {
    /// True if every operation succeeded and no client saw foreign data.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.violations.is_empty()
    }

    /// Operations per second.
    pub fn ops_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.total_ops as f64 / secs
        } else {
            0.0
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Errors: {}", self.errors.len());
        println!("Violations: {}", self.violations.len());
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second());
    }
}

#[derive(Default)]
struct Findings {
    ops: usize,
    errors: Vec<String>,
    violations: Vec<String>,
}

/// Runs the thrash workload against a started manager.
///
/// Client `i` uses namespace `("thrash", "client-i", "")` and writes
/// `client-i` as every value. Each round it checks every key holds its own
/// name, deletes the key, checks the key is gone, and writes it again.
pub fn run_thrash(manager: &StorageManager, config: &ThrashConfig) -> ThrashResult {
    let start = Instant::now();

    let mut findings = Findings::default();
    thread::scope(|scope| {
        let handles: Vec<_> = (0..config.clients)
            .map(|id| scope.spawn(move || thrash_client(manager, config, id)))
            .collect();

        for (id, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(local) => {
                    findings.ops += local.ops;
                    findings.errors.extend(local.errors);
                    findings.violations.extend(local.violations);
                }
                Err(_) => findings.errors.push(format!("client-{id}: thread panicked")),
            }
        }
    });

    ThrashResult {
        total_ops: findings.ops,
        errors: findings.errors,
        violations: findings.violations,
        duration: start.elapsed(),
    }
}

fn thrash_client(manager: &StorageManager, config: &ThrashConfig, id: usize) -> Findings {
    let ctx = OpContext::background();
    let name = format!("client-{id}");
    let mut findings = Findings::default();

    let client = match manager.get_client(&ctx, "thrash", &name, "") {
        Ok(client) => client,
        Err(e) => {
            findings.errors.push(format!("{name}: get_client: {e}"));
            return findings;
        }
    };

    let mut record = |what: &str, result: Result<Option<Vec<u8>>, cubby_core::CoreError>, expected: Option<&[u8]>| {
        findings.ops += 1;
        match result {
            Ok(actual) if actual.as_deref() == expected => {}
            Ok(actual) => findings.violations.push(format!(
                "{name}: {what} expected {:?}, got {:?}",
                expected.map(String::from_utf8_lossy),
                actual.as_deref().map(String::from_utf8_lossy),
            )),
            Err(e) => findings.errors.push(format!("{name}: {what}: {e}")),
        }
    };

    let own = name.as_bytes();
    for key in &config.keys {
        record("set", client.set(&ctx, key, own).map(|()| None), None);
    }

    for _ in 0..config.iterations {
        for key in &config.keys {
            record("verify", client.get(&ctx, key), Some(own));
            record("delete", client.delete(&ctx, key).map(|()| None), None);
            record("verify deleted", client.get(&ctx, key), None);
            record("reset", client.set(&ctx, key, own).map(|()| None), None);
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestManager;

    #[test]
    fn eight_clients_never_see_each_other() {
        let fixture = TestManager::with_config(|config| config.fsync(false));
        let result = run_thrash(&fixture.manager, &ThrashConfig::default());

        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert!(result.violations.is_empty(), "{:?}", result.violations);
        assert_eq!(result.total_ops, 8 * (5 + 100 * 5 * 4));
    }

    #[test]
    fn thrash_with_fsync() {
        let fixture = TestManager::new();
        let config = ThrashConfig {
            clients: 4,
            iterations: 5,
            ..ThrashConfig::default()
        };
        let result = run_thrash(&fixture.manager, &config);
        assert!(result.is_clean(), "{result:?}");
    }
}
