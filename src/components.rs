//! Named application components
//!
//! `@name` keys read values the application registers here, e.g. a tenant
//! name or a deployment color. The registry is passed to dispatch explicitly
//! rather than living in a global.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Lookup of named components by their string form.
pub trait ComponentLookup: Send + Sync {
    /// String form of component `name`, or `None` when nothing is registered.
    fn component(&self, name: &str) -> Option<String>;
}

impl<T: ComponentLookup + ?Sized> ComponentLookup for Arc<T> {
    fn component(&self, name: &str) -> Option<String> {
        (**self).component(name)
    }
}

impl ComponentLookup for HashMap<String, String> {
    fn component(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Lookup with nothing registered.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoComponents;

impl ComponentLookup for NoComponents {
    fn component(&self, _name: &str) -> Option<String> {
        None
    }
}

type Producer = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Clone)]
enum Component {
    Fixed(String),
    Computed(Producer),
}

/// Immutable registry of named components.
///
/// # Example
///
/// ```
/// use user_agent_metrics::{ComponentLookup, ComponentRegistry};
///
/// let registry = ComponentRegistry::builder()
///     .component("region", "eu-west-1")
///     .computed("color", || "blue".to_string())
///     .build();
///
/// assert_eq!(registry.component("region").as_deref(), Some("eu-west-1"));
/// assert_eq!(registry.component("color").as_deref(), Some("blue"));
/// assert_eq!(registry.component("missing"), None);
/// ```
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    components: HashMap<String, Component>,
}

impl ComponentRegistry {
    /// Create a builder.
    pub fn builder() -> ComponentRegistryBuilder {
        ComponentRegistryBuilder::default()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.components.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl ComponentLookup for ComponentRegistry {
    fn component(&self, name: &str) -> Option<String> {
        match self.components.get(name)? {
            Component::Fixed(value) => Some(value.clone()),
            Component::Computed(produce) => Some(produce()),
        }
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// Builder for [`ComponentRegistry`].
#[derive(Default)]
pub struct ComponentRegistryBuilder {
    components: HashMap<String, Component>,
}

impl ComponentRegistryBuilder {
    /// Register a fixed value; its `Display` form is captured now.
    pub fn component(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
        self.components
            .insert(name.into(), Component::Fixed(value.to_string()));
        self
    }

    /// Register a value computed on every lookup.
    pub fn computed<F>(mut self, name: impl Into<String>, produce: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.components
            .insert(name.into(), Component::Computed(Arc::new(produce)));
        self
    }

    /// Build the registry.
    pub fn build(self) -> ComponentRegistry {
        ComponentRegistry {
            components: self.components,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fixed_components() {
        let registry = ComponentRegistry::builder()
            .component("myBean", "value")
            .component("answer", 42)
            .build();

        assert_eq!(registry.component("myBean").as_deref(), Some("value"));
        assert_eq!(registry.component("answer").as_deref(), Some("42"));
        assert_eq!(registry.component("mybean"), None);
        assert_eq!(registry.names(), vec!["answer", "myBean"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_computed_components_are_evaluated_per_lookup() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = ComponentRegistry::builder()
            .computed("tick", move || {
                (counter.fetch_add(1, Ordering::SeqCst) + 1).to_string()
            })
            .build();

        assert_eq!(registry.component("tick").as_deref(), Some("1"));
        assert_eq!(registry.component("tick").as_deref(), Some("2"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_other_lookups() {
        assert_eq!(NoComponents.component("x"), None);

        let mut map = HashMap::new();
        map.insert("k".to_string(), "v".to_string());
        assert_eq!(map.component("k").as_deref(), Some("v"));

        let shared: Arc<dyn ComponentLookup> = Arc::new(map);
        assert_eq!(shared.component("k").as_deref(), Some("v"));
        assert!(ComponentRegistry::default().is_empty());
    }
}
