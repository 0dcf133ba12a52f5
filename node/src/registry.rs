//! Declarative service construction.
//!
//! Services are declared with a name, the names they depend on and a
//! factory. [`ServiceRegistry::build`] runs the factories in dependency
//! order (Kahn's algorithm, ties broken by declaration order) and collects
//! the outputs into [`Services`]. A factory can only read services it
//! declared, so the declared graph is the real one.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::lifecycle::Component;
use crate::NodeError;

type Factory = Box<dyn FnOnce(&Deps<'_>, &mut Services) -> Result<(), NodeError>>;

struct Declaration {
    name: &'static str,
    deps: Vec<&'static str>,
    factory: Factory,
}

/// Everything the registry built, by name.
#[derive(Default)]
pub struct Services {
    entries: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
    order: Vec<&'static str>,
    components: Vec<Arc<dyn Component>>,
}

impl Services {
    /// A clone of the service registered as `name`.
    pub fn get<T: Any + Clone>(&self, name: &str) -> Result<T, NodeError> {
        self.entries
            .get(name)
            .and_then(|entry| entry.downcast_ref::<T>())
            .cloned()
            .ok_or_else(|| NodeError::MissingDependency {
                component: "services".to_string(),
                dependency: name.to_string(),
            })
    }

    /// Names in the order their factories ran.
    pub fn construction_order(&self) -> &[&'static str] {
        &self.order
    }

    /// Lifecycle components in construction order.
    pub fn components(&self) -> &[Arc<dyn Component>] {
        &self.components
    }
}

/// The view a factory has of already-built services.
pub struct Deps<'a> {
    component: &'static str,
    allowed: &'a [&'static str],
    services: &'a Services,
}

impl Deps<'_> {
    pub fn get<T: Any + Clone>(&self, name: &'static str) -> Result<T, NodeError> {
        if !self.allowed.contains(&name) {
            return Err(NodeError::MissingDependency {
                component: self.component.to_string(),
                dependency: name.to_string(),
            });
        }
        self.services.get(name)
    }
}

#[derive(Default)]
pub struct ServiceRegistry {
    declarations: Vec<Declaration>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a plain service.
    pub fn provide<T, F>(&mut self, name: &'static str, deps: &[&'static str], factory: F) -> &mut Self
    where
        T: Any + Clone + Send + Sync,
        F: FnOnce(&Deps<'_>) -> Result<T, NodeError> + 'static,
    {
        self.declarations.push(Declaration {
            name,
            deps: deps.to_vec(),
            factory: Box::new(move |deps, services| {
                let value = factory(deps)?;
                services.entries.insert(name, Box::new(value));
                Ok(())
            }),
        });
        self
    }

    /// Declare a service that also takes part in the lifecycle.
    pub fn provide_component<T, F>(
        &mut self,
        name: &'static str,
        deps: &[&'static str],
        factory: F,
    ) -> &mut Self
    where
        T: Component + 'static,
        F: FnOnce(&Deps<'_>) -> Result<Arc<T>, NodeError> + 'static,
    {
        self.declarations.push(Declaration {
            name,
            deps: deps.to_vec(),
            factory: Box::new(move |deps, services| {
                let value = factory(deps)?;
                services.components.push(Arc::clone(&value) as Arc<dyn Component>);
                services.entries.insert(name, Box::new(value));
                Ok(())
            }),
        });
        self
    }

    /// Topological order of the declarations, without building anything.
    pub fn order(&self) -> Result<Vec<&'static str>, NodeError> {
        Ok(self
            .sorted_indices()?
            .into_iter()
            .map(|i| self.declarations[i].name)
            .collect())
    }

    fn sorted_indices(&self) -> Result<Vec<usize>, NodeError> {
        let index: HashMap<&str, usize> = self
            .declarations
            .iter()
            .enumerate()
            .map(|(i, decl)| (decl.name, i))
            .collect();

        let mut in_degree = vec![0usize; self.declarations.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.declarations.len()];
        for (i, decl) in self.declarations.iter().enumerate() {
            for dep in &decl.deps {
                let &d = index.get(dep).ok_or_else(|| NodeError::MissingDependency {
                    component: decl.name.to_string(),
                    dependency: dep.to_string(),
                })?;
                in_degree[i] += 1;
                dependents[d].push(i);
            }
        }

        let mut ready: VecDeque<usize> = (0..self.declarations.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut sorted = Vec::with_capacity(self.declarations.len());
        while let Some(i) = ready.pop_front() {
            sorted.push(i);
            for &next in &dependents[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push_back(next);
                }
            }
        }

        if sorted.len() < self.declarations.len() {
            let stuck = (0..self.declarations.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.declarations[i].name.to_string())
                .collect();
            return Err(NodeError::DependencyCycle(stuck));
        }
        Ok(sorted)
    }

    /// Run every factory in dependency order.
    pub fn build(self) -> Result<Services, NodeError> {
        let order = self.sorted_indices()?;
        let mut slots: Vec<Option<Declaration>> =
            self.declarations.into_iter().map(Some).collect();
        let mut services = Services::default();

        for i in order {
            let Some(decl) = slots[i].take() else {
                continue;
            };
            let factory = decl.factory;
            // Factories see a snapshot of what is built so far; outputs are
            // inserted after they return.
            let mut built = Services::default();
            {
                let deps = Deps {
                    component: decl.name,
                    allowed: &decl.deps,
                    services: &services,
                };
                factory(&deps, &mut built)?;
            }
            services.entries.extend(built.entries);
            services.components.extend(built.components);
            services.order.push(decl.name);
            tracing::debug!(service = decl.name, "constructed");
        }
        Ok(services)
    }
}
