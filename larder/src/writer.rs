use shared::{Error, Result};
use std::any::{Any, type_name};
use std::fmt::Debug;
use std::sync::Arc;

/// A value with its static type erased, as held by the in-process store and by
/// in-flight computations. Cloning shares the value.
#[derive(Clone)]
pub struct Erased {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Erased {
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: type_name::<T>(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl Debug for Erased {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Erased")
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Writes a copy of `value` into `dest`.
///
/// Fails with `InvalidDestination` when the stored type is not `T`; `dest` is
/// left untouched in that case.
pub fn write_to<T: Clone + 'static>(value: &Erased, dest: &mut T) -> Result<()> {
    match value.downcast_ref::<T>() {
        Some(v) => {
            dest.clone_from(v);
            Ok(())
        }
        None => Err(Error::InvalidDestination {
            expected: type_name::<T>(),
            found: value.type_name(),
        }),
    }
}
