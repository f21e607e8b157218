//! Stage graph executor.
//!
//! A fixed registry of named stages with declared dependencies is
//! validated (unique ids, known deps, acyclic), ordered topologically,
//! and run fail-fast: the first stage error aborts the pipeline and is
//! surfaced with the failing stage's id. A stage whose cache key matches
//! a prior completed run is skipped and its recorded artifacts are
//! replayed.
//!
//! The default run is sequential. Stages with no dependency relation
//! (kernel build, userspace build) could be scheduled concurrently;
//! everything shared goes through the cache directory, where records
//! are written atomically.

use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::artifact::{Artifact, ArtifactKind};
use crate::cache;
use crate::context::BuildContext;
use crate::error::BuildError;

/// Action run by a stage. Returns the artifacts the stage produced.
pub type StageAction = Box<dyn Fn(&BuildContext) -> Result<Vec<Artifact>>>;

/// One build stage: identifier, dependencies, declared products, and an
/// optional cache key. A stage without a cache key always runs.
pub struct Stage {
    pub id: &'static str,
    pub deps: Vec<&'static str>,
    pub produces: Vec<ArtifactKind>,
    pub cache_key: Option<String>,
    pub action: StageAction,
}

impl Stage {
    pub fn new(id: &'static str, deps: &[&'static str], action: StageAction) -> Self {
        Self {
            id,
            deps: deps.to_vec(),
            produces: Vec::new(),
            cache_key: None,
            action,
        }
    }

    pub fn produces(mut self, kinds: &[ArtifactKind]) -> Self {
        self.produces = kinds.to_vec();
        self
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }
}

/// How a stage completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    /// Action ran to completion.
    Built,
    /// Cache key matched a prior run; recorded artifacts were reused.
    Cached,
}

/// Aggregated result of a pipeline run. Replaces any notion of global
/// pass/fail counters: the executor hands the whole outcome back.
#[derive(Debug)]
pub struct PipelineReport {
    pub outcomes: Vec<(String, StageStatus)>,
    pub artifacts: BTreeMap<ArtifactKind, Artifact>,
}

impl PipelineReport {
    pub fn built_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, s)| *s == StageStatus::Built)
            .count()
    }

    pub fn cached_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, s)| *s == StageStatus::Cached)
            .count()
    }

    pub fn print_summary(&self) {
        println!("\n=== Pipeline Summary ===");
        for (stage, status) in &self.outcomes {
            let tag = match status {
                StageStatus::Built => "BUILT",
                StageStatus::Cached => "CACHED",
            };
            println!("  [{}] {}", tag, stage);
        }
        for artifact in self.artifacts.values() {
            println!(
                "  {} -> {} ({} KB)",
                artifact.kind,
                artifact.path.display(),
                artifact.size_bytes / 1024
            );
        }
    }
}

/// Stage graph executor over a fixed registry.
pub struct Executor {
    stages: Vec<Stage>,
    order: Vec<usize>,
}

// `Stage` holds a boxed closure (`StageAction`) and cannot derive `Debug`;
// provide a minimal manual impl so tests can `unwrap_err()` on `Executor`.
impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field(
                "stages",
                &self.stages.iter().map(|s| s.id).collect::<Vec<_>>(),
            )
            .field("order", &self.order)
            .finish()
    }
}

impl Executor {
    /// Validate the registry and precompute the execution order.
    /// A cyclic or malformed registry is rejected before any stage runs.
    pub fn new(stages: Vec<Stage>) -> Result<Self> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, stage) in stages.iter().enumerate() {
            if index.insert(stage.id, i).is_some() {
                bail!("duplicate stage id '{}'", stage.id);
            }
        }
        for stage in &stages {
            for dep in &stage.deps {
                if !index.contains_key(dep) {
                    bail!("stage '{}' depends on unknown stage '{}'", stage.id, dep);
                }
            }
        }

        let order = topo_order(&stages, &index)?;
        Ok(Self { stages, order })
    }

    /// Stage ids in execution order.
    pub fn execution_order(&self) -> Vec<&'static str> {
        self.order.iter().map(|&i| self.stages[i].id).collect()
    }

    /// Run all stages in dependency order, fail-fast.
    pub fn run(&self, ctx: &BuildContext) -> Result<PipelineReport> {
        let mut outcomes = Vec::new();
        let mut artifacts: BTreeMap<ArtifactKind, Artifact> = BTreeMap::new();

        for &i in &self.order {
            let stage = &self.stages[i];

            if let Some(cached) = self.try_replay(ctx, stage) {
                println!("[SKIP] {} (cache key unchanged)", stage.id);
                for artifact in &cached {
                    record_artifact(&mut artifacts, artifact.clone())?;
                }
                outcomes.push((stage.id.to_string(), StageStatus::Cached));
                continue;
            }

            if ctx.verbose {
                println!("[RUN ] {}", stage.id);
            }
            let produced = (stage.action)(ctx)
                .with_context(|| format!("stage '{}' failed", stage.id))?;

            for kind in &stage.produces {
                if !produced.iter().any(|a| a.kind == *kind) {
                    bail!(
                        "stage '{}' declared {} but did not produce it",
                        stage.id,
                        kind
                    );
                }
            }
            for artifact in &produced {
                record_artifact(&mut artifacts, artifact.clone())?;
            }

            if let Some(key) = &stage.cache_key {
                cache::store_record(
                    &ctx.cache_dir,
                    &cache::StageRecord {
                        stage: stage.id.to_string(),
                        cache_key: key.clone(),
                        artifacts: produced,
                    },
                )?;
            }
            outcomes.push((stage.id.to_string(), StageStatus::Built));
        }

        Ok(PipelineReport {
            outcomes,
            artifacts,
        })
    }

    /// Which stages would be skipped on the next run (for `show status`).
    pub fn cached_stages(&self, ctx: &BuildContext) -> Vec<(&'static str, bool)> {
        self.order
            .iter()
            .map(|&i| {
                let stage = &self.stages[i];
                (stage.id, self.try_replay(ctx, stage).is_some())
            })
            .collect()
    }

    /// Check whether a stage can be skipped: cache key matches the
    /// stored record and every recorded artifact still exists.
    fn try_replay(&self, ctx: &BuildContext, stage: &Stage) -> Option<Vec<Artifact>> {
        let key = stage.cache_key.as_ref()?;
        let record = cache::load_record(&ctx.cache_dir, stage.id)?;
        if record.cache_key != *key {
            return None;
        }
        if !record.artifacts.iter().all(Artifact::still_present) {
            return None;
        }
        Some(record.artifacts)
    }
}

/// Kahn's algorithm. Deterministic (declaration order among ready
/// stages); leftover nodes mean a cycle.
fn topo_order(stages: &[Stage], index: &HashMap<&str, usize>) -> Result<Vec<usize>> {
    let n = stages.len();
    let mut indegree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (i, stage) in stages.iter().enumerate() {
        for dep in &stage.deps {
            let d = index[*dep];
            indegree[i] += 1;
            dependents[d].push(i);
        }
    }

    let mut queue: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &j in &dependents[i] {
            indegree[j] -= 1;
            if indegree[j] == 0 {
                queue.push_back(j);
            }
        }
    }

    if order.len() != n {
        let ordered: HashSet<usize> = order.iter().copied().collect();
        let stuck = (0..n)
            .find(|i| !ordered.contains(i))
            .map(|i| stages[i].id)
            .unwrap_or("?");
        return Err(BuildError::StageCycle(stuck.to_string()).into());
    }
    Ok(order)
}

fn record_artifact(
    artifacts: &mut BTreeMap<ArtifactKind, Artifact>,
    artifact: Artifact,
) -> Result<()> {
    if artifacts.contains_key(&artifact.kind) {
        bail!(
            "two stages produced an artifact of kind '{}'",
            artifact.kind
        );
    }
    artifacts.insert(artifact.kind, artifact);
    Ok(())
}
