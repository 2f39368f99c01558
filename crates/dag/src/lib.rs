use petgraph::{
    Direction,
    prelude::DiGraph,
    visit::{Dfs, Walker},
};

/// NodeIndex as employed in the dependency graph
pub type NodeIndex = petgraph::prelude::NodeIndex<u32>;

/// Outcome of attempting to add an edge to the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddEdgeOutcome {
    /// The edge was inserted.
    Added,
    /// The edge was already present.
    AlreadyExists,
    /// Adding the edge would have introduced a cycle; it was not inserted.
    WouldCycle,
}

/// A cycle was detected while walking the graph in topological waves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("dependency graph contains a cycle")]
pub struct CycleError;

/// Simplistic encapsulation of petgraph APIs for building and walking
/// a dependency graph in topological waves.
#[derive(Debug, Clone)]
pub struct Dag<N>(DiGraph<N, (), u32>);

impl<N> Default for Dag<N> {
    fn default() -> Self {
        Self(DiGraph::default())
    }
}

impl<N> AsRef<DiGraph<N, (), u32>> for Dag<N> {
    fn as_ref(&self) -> &DiGraph<N, (), u32> {
        &self.0
    }
}

impl<N> Dag<N>
where
    N: Clone + PartialEq,
{
    /// Construct a new Dag
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds node N to the graph and returns the index.
    ///
    /// If N already exists, it'll return the index of that node.
    pub fn add_node_or_get_index(&mut self, node: &N) -> NodeIndex {
        if let Some(index) = self.get_index(node) {
            index
        } else {
            self.0.add_node(node.clone())
        }
    }

    /// Returns true if the node exists
    pub fn node_exists(&self, node: &N) -> bool {
        self.get_index(node).is_some()
    }

    /// Add an edge from a to b, reporting whether it was inserted.
    pub fn add_edge(&mut self, a: NodeIndex, b: NodeIndex) -> AddEdgeOutcome {
        let a_node = &self.0[a];

        // prevent cycle (b connects back to a)
        if self.dfs(b).any(|n| n == a_node) {
            return AddEdgeOutcome::WouldCycle;
        }

        if self.0.contains_edge(a, b) {
            return AddEdgeOutcome::AlreadyExists;
        }

        self.0.add_edge(a, b, ());

        AddEdgeOutcome::Added
    }

    pub fn iter_nodes(&self) -> impl Iterator<Item = &'_ N> {
        self.0.node_weights()
    }

    /// Perform a depth-first search, given the start index
    pub fn dfs(&self, start: NodeIndex) -> impl Iterator<Item = &'_ N> {
        let dfs = Dfs::new(&self.0, start);

        dfs.iter(&self.0).map(|i| &self.0[i])
    }

    /// Returns batches of nodes that can be executed in parallel, in
    /// dependency order (a node only appears in a batch once every node
    /// with an edge into it has appeared in an earlier batch).
    ///
    /// Errs if the graph contains a cycle.
    pub fn batched_topo(&self) -> Result<Vec<Vec<N>>, CycleError>
    where
        N: Ord,
    {
        let mut g = self.0.clone();
        let mut batches = Vec::new();

        while g.node_count() > 0 {
            let mut sources: Vec<_> = g.externals(Direction::Incoming).collect();
            if sources.is_empty() {
                return Err(CycleError);
            }

            let batch_nodes: Vec<_> = sources.iter().map(|&i| g[i].clone()).collect();
            batches.push(batch_nodes);

            // Reverse index before removing nodes to avoid graph invalidation (dupes in batches)
            sources.sort_by_key(|&idx| std::cmp::Reverse(idx.index()));

            for ix in sources {
                g.remove_node(ix);
            }
        }
        Ok(batches)
    }

    /// Return the index for node of type N
    pub fn get_index(&self, node: &N) -> Option<NodeIndex> {
        self.0.node_indices().find(|i| self.0[*i] == *node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(dag: &mut Dag<String>, id: &str) -> NodeIndex {
        dag.add_node_or_get_index(&id.to_owned())
    }

    #[test]
    fn recipe_chain_batches_one_artifact_per_wave() {
        let mut dag: Dag<String> = Dag::new();

        // fetch:data.csv -> recipe:raw/v1 -> recipe:clean/v1 -> recipe:report/v1
        let fetch = node(&mut dag, "fetch:data.csv");
        let raw = node(&mut dag, "recipe:raw/v1");
        let clean = node(&mut dag, "recipe:clean/v1");
        let report = node(&mut dag, "recipe:report/v1");

        assert_eq!(dag.add_edge(fetch, raw), AddEdgeOutcome::Added);
        assert_eq!(dag.add_edge(raw, clean), AddEdgeOutcome::Added);
        assert_eq!(dag.add_edge(clean, report), AddEdgeOutcome::Added);

        let batches = dag.batched_topo().unwrap();

        // a strict chain has no room for parallelism: one artifact per wave
        assert_eq!(batches.len(), 4);
        for batch in &batches {
            assert_eq!(batch.len(), 1);
        }
    }

    #[test]
    fn recipes_sharing_a_dependent_batch_by_depth() {
        let mut dag: Dag<String> = Dag::new();

        //   fetch:a.csv -> recipe:clean_a/v1 -\
        //                                       -> recipe:merged/v1
        //   fetch:b.csv -> recipe:clean_b/v1 -/
        let fetch_a = node(&mut dag, "fetch:a.csv");
        let fetch_b = node(&mut dag, "fetch:b.csv");
        let clean_a = node(&mut dag, "recipe:clean_a/v1");
        let clean_b = node(&mut dag, "recipe:clean_b/v1");
        let merged = node(&mut dag, "recipe:merged/v1");

        dag.add_edge(fetch_a, clean_a);
        dag.add_edge(fetch_b, clean_b);
        dag.add_edge(clean_a, merged);
        dag.add_edge(clean_b, merged);

        let batches = dag.batched_topo().unwrap();

        assert_eq!(batches.len(), 3);

        assert_eq!(batches[0].len(), 2);
        assert!(batches[0].contains(&"fetch:a.csv".to_owned()));
        assert!(batches[0].contains(&"fetch:b.csv".to_owned()));

        assert_eq!(batches[1].len(), 2);
        assert!(batches[1].contains(&"recipe:clean_a/v1".to_owned()));
        assert!(batches[1].contains(&"recipe:clean_b/v1".to_owned()));

        assert_eq!(batches[2].len(), 1);
        assert!(batches[2].contains(&"recipe:merged/v1".to_owned()));
    }

    #[test]
    fn independent_recipes_land_in_a_single_wave() {
        let mut dag: Dag<String> = Dag::new();

        node(&mut dag, "recipe:a/v1");
        node(&mut dag, "recipe:b/v1");
        node(&mut dag, "recipe:c/v1");
        node(&mut dag, "recipe:d/v1");

        let batches = dag.batched_topo().unwrap();

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 4);
    }

    #[test]
    fn empty_graph_has_no_batches() {
        let dag: Dag<String> = Dag::new();
        let batches = dag.batched_topo().unwrap();
        assert_eq!(batches.len(), 0);
    }

    #[test]
    fn test_cycle_detected() {
        let mut dag: Dag<String> = Dag::new();

        let a = node(&mut dag, "recipe:a/v1");
        let b = node(&mut dag, "recipe:b/v1");
        let c = node(&mut dag, "recipe:c/v1");

        dag.add_edge(a, b);
        dag.add_edge(b, c);
        // c -> a would close a cycle; add_edge must refuse it.
        assert_eq!(dag.add_edge(c, a), AddEdgeOutcome::WouldCycle);

        // the graph as constructed (without the rejected edge) remains acyclic
        assert!(dag.batched_topo().is_ok());
    }

    #[test]
    fn test_add_edge_already_exists() {
        let mut dag: Dag<String> = Dag::new();

        let fetch = node(&mut dag, "fetch:data.csv");
        let recipe = node(&mut dag, "recipe:raw/v1");

        assert_eq!(dag.add_edge(fetch, recipe), AddEdgeOutcome::Added);
        assert_eq!(dag.add_edge(fetch, recipe), AddEdgeOutcome::AlreadyExists);
    }
}
