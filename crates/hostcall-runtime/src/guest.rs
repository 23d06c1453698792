//! The seam between instances and whatever executes guest code.
//!
//! A [`GuestLoader`] turns resolved module bytes into a [`GuestModule`]. The
//! module only ever sees the host through a [`Kernel`], so any engine (or a
//! plain Rust implementation in tests) can drive the same call surface.

use hostcall_manifest::ResolvedModule;

use crate::error::{GuestTrap, RuntimeResult};
use crate::kernel::Kernel;

/// An instantiated guest.
pub trait GuestModule: Send {
    /// Whether the guest exports `name`.
    fn function_exists(&self, name: &str) -> bool;

    /// Run export `name`. A non-zero return code is a guest failure.
    ///
    /// # Errors
    ///
    /// Returns a [`GuestTrap`] if execution stops abnormally, including a
    /// failed host call propagated out of [`Kernel::call_host`].
    fn call(&mut self, name: &str, kernel: &mut Kernel<'_>) -> Result<i32, GuestTrap>;
}

/// Builds guests from resolved modules.
pub trait GuestLoader: Send + Sync {
    /// Instantiate `modules`; the main module is the one named
    /// [`MAIN_MODULE`](hostcall_manifest::MAIN_MODULE), else the last one.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Instantiation`](crate::RuntimeError::Instantiation)
    /// if the modules cannot be linked or started.
    fn instantiate(&self, modules: &[ResolvedModule]) -> RuntimeResult<Box<dyn GuestModule>>;
}

impl<F> GuestLoader for F
where
    F: Fn(&[ResolvedModule]) -> RuntimeResult<Box<dyn GuestModule>> + Send + Sync,
{
    fn instantiate(&self, modules: &[ResolvedModule]) -> RuntimeResult<Box<dyn GuestModule>> {
        self(modules)
    }
}
