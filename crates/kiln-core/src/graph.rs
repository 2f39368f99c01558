use dag::{CycleError, Dag};

use crate::artifact::{Artifact, ArtifactId};
use crate::registry::Registry;

/// The recipe dependency graph. Internally, edges run dependency -> recipe
/// so that a batched topological walk (which starts from nodes with no
/// incoming edges) yields dependencies before the recipes that need them,
/// even though the relationship everyone talks about is "recipe depends on
/// artifact".
pub struct Graph {
    inner: Dag<ArtifactId>,
}

impl Graph {
    pub fn build(registry: &Registry) -> Self {
        let mut inner = Dag::new();

        for artifact in registry.iter() {
            inner.add_node_or_get_index(artifact.id());
        }

        for artifact in registry.iter() {
            let Artifact::Recipe(recipe) = artifact else {
                continue;
            };
            let recipe_idx = inner.add_node_or_get_index(&recipe.id);

            for dependency in &recipe.dependencies {
                let dependency_idx = inner.add_node_or_get_index(dependency.artifact_id());
                inner.add_edge(dependency_idx, recipe_idx);
            }
        }

        Self { inner }
    }

    /// Artifact ids in dependency-respecting waves: every id in batch N has
    /// every one of its dependencies in some batch < N.
    pub fn batches(&self) -> Result<Vec<Vec<ArtifactId>>, CycleError> {
        self.inner.batched_topo()
    }
}
