use std::collections::HashMap;

use url::Url;

use crate::artifact::{Artifact, ArtifactId, Fetch, Recipe};

/// The in-memory set of artifacts a manifest load produces. Read-only once
/// loading finishes; the scheduler never mutates it.
#[derive(Debug, Default)]
pub struct Registry {
    artifacts: HashMap<ArtifactId, Artifact>,
    fetch_by_url: HashMap<Url, ArtifactId>,
}

impl Registry {
    /// Register a (already normalized) fetch URL, returning the id of the
    /// artifact representing it. Two calls with the same normalized URL
    /// share the same artifact rather than creating a duplicate.
    pub fn register_fetch(&mut self, url: Url) -> ArtifactId {
        if let Some(id) = self.fetch_by_url.get(&url) {
            return id.clone();
        }

        let id = ArtifactId::fetch(&url);
        self.fetch_by_url.insert(url.clone(), id.clone());
        self.artifacts.insert(id.clone(), Artifact::Fetch(Fetch { id: id.clone(), url }));
        id
    }

    pub fn insert_recipe(&mut self, recipe: Recipe) {
        let id = recipe.id.clone();
        self.artifacts.insert(id, Artifact::Recipe(recipe));
    }

    pub fn get(&self, id: &ArtifactId) -> Option<&Artifact> {
        self.artifacts.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.values()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_the_same_url_twice_shares_the_artifact() {
        let mut registry = Registry::default();
        let url = Url::parse("https://example.com/a").unwrap();

        let first = registry.register_fetch(url.clone());
        let second = registry.register_fetch(url);

        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }
}
