use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{Error, Result};
use crate::model::Graph;

/// Tags for the passes this crate knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum PassKind {
    TopologicalSort,
    Liveness,
    MemoryLayout,
}

/// Result of running a pass
#[derive(Debug, Clone)]
pub struct PassResult {
    /// Name of the pass
    pub name: String,
    /// Whether the pass made any changes
    pub changed: bool,
    /// Duration of the pass
    pub duration: Duration,
}

impl PassResult {
    pub fn new(kind: PassKind, changed: bool, duration: Duration) -> Self {
        Self {
            name: kind.to_string(),
            changed,
            duration,
        }
    }
}

/// Statistics from running a pass pipeline
#[derive(Debug, Clone, Default)]
pub struct PassStats {
    /// Results from each pass, in run order
    pub pass_results: Vec<PassResult>,
    /// Total time spent in passes
    pub total_duration: Duration,
}

impl PassStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pass result
    pub fn add_pass_result(&mut self, result: PassResult) {
        self.total_duration += result.duration;
        self.pass_results.push(result);
    }

    /// Whether any pass changed the graph
    pub fn changed(&self) -> bool {
        self.pass_results.iter().any(|r| r.changed)
    }
}

/// A compiler pass over a graph
pub trait Pass {
    /// Tag identifying the pass
    fn kind(&self) -> PassKind;

    /// Passes that must have run before this one
    fn dependencies(&self) -> &'static [PassKind] {
        &[]
    }

    /// Structural ordering check against the passes that already ran
    fn check_prerequisites(&self, executed: &HashSet<PassKind>) -> Result<()> {
        match self.dependencies().iter().find(|dep| !executed.contains(*dep)) {
            Some(&dependency) => Err(Error::MissingDependency {
                pass: self.kind(),
                dependency,
            }),
            None => Ok(()),
        }
    }

    /// Run the pass on the graph
    fn run(&mut self, graph: &mut Graph) -> Result<PassResult>;
}

/// Runs registered passes in dependency order
#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
    executed: HashSet<PassKind>,
}

impl PassManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat the given passes as already run, e.g. by an earlier pipeline
    pub fn with_executed(mut self, executed: impl IntoIterator<Item = PassKind>) -> Self {
        self.executed.extend(executed);
        self
    }

    /// Register a pass
    pub fn register_pass(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    /// Passes that have completed so far
    pub fn executed(&self) -> &HashSet<PassKind> {
        &self.executed
    }

    /// Run all registered passes. The first failure aborts the pipeline.
    pub fn run_passes(&mut self, graph: &mut Graph) -> Result<PassStats> {
        let order = self.sort_passes_by_dependencies()?;
        let mut stats = PassStats::new();

        for index in order {
            let pass = &mut self.passes[index];
            let kind = pass.kind();
            pass.check_prerequisites(&self.executed)?;

            debug!("running pass {} on graph {}", kind, graph.name);
            let result = pass.run(graph)?;
            debug!("pass {} finished, changed: {}", kind, result.changed);

            self.executed.insert(kind);
            stats.add_pass_result(result);
        }

        info!(
            "ran {} passes on graph {} in {:?}",
            stats.pass_results.len(),
            graph.name,
            stats.total_duration
        );
        Ok(stats)
    }

    /// Registration order, moved so registered dependencies run first.
    ///
    /// Dependencies that are not registered are left for `check_prerequisites`.
    fn sort_passes_by_dependencies(&self) -> Result<Vec<usize>> {
        let mut sorted = Vec::new();
        let mut visited = HashSet::new();
        let mut visiting = HashSet::new();

        let by_kind: HashMap<PassKind, usize> = self
            .passes
            .iter()
            .enumerate()
            .map(|(index, pass)| (pass.kind(), index))
            .collect();

        for index in 0..self.passes.len() {
            self.dfs_sort(index, &by_kind, &mut visited, &mut visiting, &mut sorted)?;
        }

        Ok(sorted)
    }

    fn dfs_sort(
        &self,
        index: usize,
        by_kind: &HashMap<PassKind, usize>,
        visited: &mut HashSet<usize>,
        visiting: &mut HashSet<usize>,
        sorted: &mut Vec<usize>,
    ) -> Result<()> {
        if visited.contains(&index) {
            return Ok(());
        }

        let kind = self.passes[index].kind();
        if !visiting.insert(index) {
            return Err(Error::InvalidGraph(format!(
                "Cycle detected in pass dependencies: {}",
                kind
            )));
        }

        for dep in self.passes[index].dependencies() {
            if let Some(&dep_index) = by_kind.get(dep) {
                self.dfs_sort(dep_index, by_kind, visited, visiting, sorted)?;
            }
        }

        visiting.remove(&index);
        visited.insert(index);
        sorted.push(index);

        Ok(())
    }
}

/// Time a pass body and wrap its change flag in a `PassResult`
pub(crate) fn timed<F>(kind: PassKind, body: F) -> Result<PassResult>
where
    F: FnOnce() -> Result<bool>,
{
    let start = Instant::now();
    let changed = body()?;
    Ok(PassResult::new(kind, changed, start.elapsed()))
}
