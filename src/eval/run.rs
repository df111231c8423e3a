//! The round loop.
//!
//! Each round dequeues the lowest non-empty readiness tier among the
//! vertices with no pending dependencies, evaluates that batch in key
//! order, then recomputes the dependencies of everything still pending.
//! Any error in a batch aborts the pass; mutations from earlier rounds stay.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, info_span};

use super::{attr, Evaluator, Key, ReadyPriority};
use crate::{export, Error, Result, ResultExt};

impl Evaluator {
    /// Run rounds until no work is left. With a debug directory configured,
    /// the evaluation graph is exported afterwards whatever the outcome.
    pub fn evaluate(&mut self) -> Result<()> {
        let result = self.run_rounds();
        if let Some(dir) = self.config().debug_dir.clone() {
            export::write_debug_graphs(self, &dir);
        }
        result
    }

    fn run_rounds(&mut self) -> Result<()> {
        loop {
            if self.unevaluated.order() == 0 {
                return Ok(());
            }
            let round = self.evaluated_order.len();
            let _span = info_span!("round", round).entered();

            let ready = self.poll_ready()?;
            self.evaluated_order.push(Vec::new());

            let mut errs = Vec::new();
            for key in ready {
                // an earlier vertex in this batch may have removed or renamed it
                if !self.unevaluated.contains(&key) {
                    continue;
                }
                self.unevaluated.remove_vertex(&key)?;
                let Some(vertex) = self.graph.vertex(&key) else { continue };
                self.evaluated_order[round].push(key.clone());
                self.graph.set_attribute(&key, attr::ROUND, round.to_string())?;

                debug!(%key, "evaluating");
                let renames_before = self.renames.len();
                let start = Instant::now();
                let result = vertex.evaluate(self);
                let elapsed = start.elapsed();
                let key = self.follow_renames(&key, renames_before);

                if self.graph.contains(&key) {
                    self.graph.set_attribute(&key, attr::DURATION, format!("{elapsed:?}"))?;
                }
                if let Err(err) = result {
                    self.errored.insert(key.clone());
                    if self.graph.contains(&key) {
                        self.graph.set_attribute(&key, attr::ERROR, err.to_string())?;
                    }
                    errs.push(err.context(format!("failed to evaluate {key}")));
                }
            }
            if !errs.is_empty() {
                return Error::join(errs).context(|| format!("failed to evaluate group {round}"));
            }
            self.recalculate_unevaluated()?;
        }
    }

    /// The sorted batch of the lowest readiness tier among vertices with
    /// no pending dependencies.
    fn poll_ready(&self) -> Result<Vec<Key>> {
        let mut tiers: BTreeMap<ReadyPriority, Vec<Key>> = BTreeMap::new();
        for (key, deps) in self.unevaluated.adjacency_map() {
            if !deps.is_empty() {
                continue;
            }
            let Some(vertex) = self.graph.vertex(&key) else {
                return Err(Error::NotFound(format!("vertex for pending key {key}")));
            };
            let tier = vertex.ready(self).context(|| format!("could not check readiness of {key}"))?;
            self.graph.set_attribute(&key, attr::READY, tier.to_string())?;
            tiers.entry(tier).or_default().push(key);
        }

        let Some((tier, mut ready)) = tiers.pop_first() else {
            return Err(Error::CircularDependency { remaining: self.unevaluated.order() });
        };
        ready.sort();
        let waiting: usize = tiers.values().map(Vec::len).sum();
        debug!(%tier, ready = ready.len(), waiting, "dequeued");
        Ok(ready)
    }

    /// Recompute the dependencies of every pending vertex against the graph
    /// as it is after this round.
    fn recalculate_unevaluated(&self) -> Result<()> {
        let mut errs = Vec::new();
        for key in self.unevaluated.topological_sort()? {
            let Some(vertex) = self.graph.vertex(&key) else { continue };
            let changes = match vertex.dependencies(self) {
                Ok(changes) => changes,
                Err(err) => {
                    errs.push(err.context(format!("could not calculate dependencies of {key}")));
                    continue;
                }
            };
            if let Err(err) = self.enqueue(changes) {
                errs.push(err.context(format!("could not enqueue dependencies of {key}")));
            }
        }
        Error::join(errs)
    }
}
