//! The package dependency graph.
//!
//! [`DependencyGraph::load`] parses every recipe under the packages and
//! variants directories, resolves requirement names into graph edges, and
//! populates the inverse `required_by` edges used for change propagation.
//! Requirement names that are not in the tree (external or private
//! dependencies) stay as [`Requirement::Unresolved`] placeholders - logged,
//! never fatal.
//!
//! The graph owns every [`Recipe`]; packages are keyed by name, so edges
//! are name references rather than shared pointers. All mutation happens on
//! the single orchestrating thread.

pub mod changes;

use anyhow::Result;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;

use crate::config::Config;
use crate::core::DepforgeError;
use crate::recipe::{RECIPE_FILE, Recipe, Requirement};

/// All loaded recipes: packages (may be depended upon) and variants
/// (aggregate requirements, never depended upon).
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Package name to recipe.
    pub packages: BTreeMap<String, Recipe>,
    /// Variant name to recipe, kept apart from packages.
    pub variants: BTreeMap<String, Recipe>,
}

impl DependencyGraph {
    /// Load every package and variant recipe in the tree and link the
    /// requirement edges. A recipe that fails to parse aborts the load; no
    /// partial graph is used for resolution.
    pub fn load(config: &Config) -> Result<Self> {
        let base_class = &config.settings.recipes.base_class;
        let mut graph = Self::default();
        graph.packages = load_recipe_dir(&config.packages_dir(), base_class, false)?;
        let variants_dir = config.variants_dir();
        if variants_dir.is_dir() {
            graph.variants = load_recipe_dir(&variants_dir, base_class, true)?;
        }
        graph.link();
        Ok(graph)
    }

    /// Resolve requirement placeholders against the package map and build
    /// the inverse edges.
    fn link(&mut self) {
        let known: BTreeSet<String> = self.packages.keys().cloned().collect();

        let mut inverse: Vec<(String, String)> = Vec::new();
        for (name, recipe) in &mut self.packages {
            for requirement in recipe.requirements.values_mut() {
                let req_name = requirement.name().to_string();
                if known.contains(&req_name) {
                    *requirement = Requirement::Loaded { name: req_name.clone() };
                    inverse.push((req_name, name.clone()));
                } else {
                    tracing::debug!(
                        "{name} depends on {req_name}, which is not in the tree"
                    );
                }
            }
        }
        for (target, dependent) in inverse {
            if let Some(recipe) = self.packages.get_mut(&target) {
                recipe.required_by.insert(dependent);
            }
        }

        for recipe in self.variants.values_mut() {
            for requirement in recipe.requirements.values_mut() {
                let req_name = requirement.name().to_string();
                if known.contains(&req_name) {
                    // variants are sinks: no inverse edge
                    *requirement = Requirement::Loaded { name: req_name };
                }
            }
        }
    }

    /// Fail with [`DepforgeError::DependencyCycle`] if the `requires`
    /// relation contains a cycle. Resolution must not iterate over a cyclic
    /// graph.
    pub fn ensure_acyclic(&self) -> Result<()> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut indices: HashMap<&str, NodeIndex> = HashMap::new();
        for name in self.packages.keys() {
            indices.insert(name, graph.add_node(name));
        }
        for (name, recipe) in &self.packages {
            for requirement in recipe.requirements.values() {
                if requirement.is_loaded() {
                    graph.add_edge(indices[name.as_str()], indices[requirement.name()], ());
                }
            }
        }

        for component in tarjan_scc(&graph) {
            let is_cycle = component.len() > 1
                || graph.contains_edge(component[0], component[0]);
            if is_cycle {
                let mut names: Vec<&str> =
                    component.iter().map(|&idx| graph[idx]).collect();
                names.sort_unstable();
                let mut cycle = names.join(" -> ");
                cycle.push_str(" -> ");
                cycle.push_str(names[0]);
                return Err(DepforgeError::DependencyCycle { cycle }.into());
            }
        }
        Ok(())
    }

    /// Every transitive dependent of the seed packages (via `required_by`),
    /// seeds included.
    pub fn dependents_closure<I, S>(&self, seeds: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut closure: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<String> = seeds.into_iter().map(Into::into).collect();
        while let Some(name) = queue.pop_front() {
            if !closure.insert(name.clone()) {
                continue;
            }
            if let Some(recipe) = self.packages.get(&name) {
                for dependent in &recipe.required_by {
                    if !closure.contains(dependent) {
                        queue.push_back(dependent.clone());
                    }
                }
            }
        }
        closure
    }

    /// Direct dependents of a package, sorted.
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.packages
            .get(name)
            .map(|recipe| recipe.required_by.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Render a dependents-first ASCII tree for the given roots: each root
    /// followed by everything that (transitively) requires it.
    pub fn render_dependents_tree(&self, roots: &[&str]) -> String {
        self.render_tree(roots, |name| self.dependents_of(name))
    }

    /// Render a requirements tree for the given roots: each root followed
    /// by what it (transitively) requires. Unresolved requirements are
    /// marked external.
    pub fn render_requirements_tree(&self, roots: &[&str]) -> String {
        self.render_tree(roots, |name| {
            self.packages
                .get(name)
                .map(|recipe| {
                    recipe.requirements.values().map(Requirement::name).collect()
                })
                .unwrap_or_default()
        })
    }

    fn render_tree<'a, F>(&'a self, roots: &[&'a str], children: F) -> String
    where
        F: Fn(&str) -> Vec<&'a str>,
    {
        let mut out = String::new();
        for root in roots {
            let label = match self.packages.get(*root) {
                Some(recipe) => recipe.package_ref(),
                None => format!("{root} (external)"),
            };
            out.push_str(&label);
            out.push('\n');
            let mut visited = BTreeSet::new();
            visited.insert(root.to_string());
            self.render_subtree(*root, "", &children, &mut visited, &mut out);
        }
        out
    }

    fn render_subtree<'a, F>(
        &'a self,
        name: &str,
        prefix: &str,
        children: &F,
        visited: &mut BTreeSet<String>,
        out: &mut String,
    ) where
        F: Fn(&str) -> Vec<&'a str>,
    {
        let kids = children(name);
        for (idx, child) in kids.iter().enumerate() {
            let last = idx == kids.len() - 1;
            let connector = if last { "└── " } else { "├── " };
            let label = match self.packages.get(*child) {
                Some(recipe) => recipe.package_ref(),
                None => format!("{child} (external)"),
            };
            out.push_str(prefix);
            out.push_str(connector);
            out.push_str(&label);
            if visited.insert(child.to_string()) {
                out.push('\n');
                let child_prefix =
                    if last { format!("{prefix}    ") } else { format!("{prefix}│   ") };
                self.render_subtree(child, &child_prefix, children, visited, out);
            } else {
                out.push_str(" (*)\n");
            }
        }
    }
}

fn load_recipe_dir(
    dir: &Path,
    base_class: &str,
    variant: bool,
) -> Result<BTreeMap<String, Recipe>> {
    let mut recipes: BTreeMap<String, Recipe> = BTreeMap::new();
    if !dir.is_dir() {
        return Err(DepforgeError::ConfigError {
            message: format!("recipe directory {} does not exist", dir.display()),
        }
        .into());
    }

    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
    entries.sort_by_key(std::fs::DirEntry::file_name);

    for entry in entries {
        let recipe_path = entry.path().join(RECIPE_FILE);
        if !recipe_path.is_file() {
            continue;
        }
        let recipe = if variant {
            Recipe::load_variant(&recipe_path, base_class)?
        } else {
            Recipe::load(&recipe_path, base_class)?
        };
        tracing::trace!("loaded {}", recipe.package_ref());
        if let Some(existing) = recipes.get(&recipe.name) {
            return Err(DepforgeError::DuplicatePackage {
                name: recipe.name.clone(),
                first: existing.path().display().to_string(),
                second: recipe.path().display().to_string(),
            }
            .into());
        }
        recipes.insert(recipe.name.clone(), recipe);
    }
    Ok(recipes)
}
