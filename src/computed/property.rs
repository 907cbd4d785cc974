//! Computed property descriptors.

use crate::engine::Engine;
use crate::error::Result;
use crate::object::ObjectRef;
use crate::types::Value;
use std::fmt;
use std::sync::Arc;

/// Computes the value of a property from the object it lives on.
pub type Getter = Arc<dyn Fn(&Engine, &ObjectRef) -> Result<Value> + Send + Sync>;

/// Handles a direct write. The returned value becomes the cached value.
pub type Setter = Arc<dyn Fn(&Engine, &ObjectRef, Value) -> Result<Value> + Send + Sync>;

/// Declaration of a computed property.
///
/// ```ignore
/// let upper = ComputedProperty::new(|engine, obj| {
///     let bar = engine.get(obj, "bar")?;
///     Ok(bar.as_str().unwrap_or_default().to_uppercase().into())
/// })
/// .property(["bar"]);
/// engine.define_computed(&obj, "foo", upper)?;
/// ```
#[derive(Clone)]
pub struct ComputedProperty {
    pub(crate) getter: Getter,
    pub(crate) setter: Option<Setter>,
    pub(crate) dependent_keys: Vec<String>,
    pub(crate) volatile: bool,
}

impl ComputedProperty {
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn(&Engine, &ObjectRef) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            getter: Arc::new(getter),
            setter: None,
            dependent_keys: Vec::new(),
            volatile: false,
        }
    }

    /// Declare dependency paths. Local keys and chained paths are both
    /// accepted.
    pub fn property<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependent_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Install a setter. Without one, a direct write caches the written value
    /// as is.
    pub fn with_setter<F>(mut self, setter: F) -> Self
    where
        F: Fn(&Engine, &ObjectRef, Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.setter = Some(Arc::new(setter));
        self
    }

    /// Never cache; every read calls the getter.
    pub fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    pub fn dependent_keys(&self) -> &[String] {
        &self.dependent_keys
    }

    pub fn is_volatile(&self) -> bool {
        self.volatile
    }
}

impl fmt::Debug for ComputedProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedProperty")
            .field("dependent_keys", &self.dependent_keys)
            .field("has_setter", &self.setter.is_some())
            .field("volatile", &self.volatile)
            .finish()
    }
}
