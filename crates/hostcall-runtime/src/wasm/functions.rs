//! Host functions as Extism imports.

use std::any::Any;
use std::sync::{Arc, Mutex};

use extism::{CurrentPlugin, Error, Function, PTR, UserData, Val};
use hostcall_core::{CallContext, FailurePolicy, FunctionScope, InvocationBridge, InvocationError};
use tracing::warn;

use super::memory::ExtismMemory;

/// Per-plugin state shared by every generated import.
#[derive(Default)]
pub(crate) struct HostCallState {
    pub(crate) plugin_id: String,
    /// First host failure of the current call.
    pub(crate) failure: Mutex<Option<InvocationError>>,
    pub(crate) poisoned: Mutex<Option<String>>,
    pub(crate) host_context: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
}

impl HostCallState {
    pub(crate) fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            ..Self::default()
        }
    }

    pub(crate) fn take_failure(&self) -> Option<InvocationError> {
        self.failure.lock().ok().and_then(|mut f| f.take())
    }

    /// Error refusing a new host call: the poison, or an earlier failure of
    /// the current call.
    fn refusal(&self) -> Option<InvocationError> {
        if let Some(message) = self.poison_message() {
            return Some(InvocationError::Poisoned { message });
        }
        self.failure.lock().ok().and_then(|f| f.clone())
    }

    pub(crate) fn poison_message(&self) -> Option<String> {
        self.poisoned.lock().ok().and_then(|p| p.clone())
    }

    pub(crate) fn set_host_context(&self, value: Option<Arc<dyn Any + Send + Sync>>) {
        if let Ok(mut slot) = self.host_context.lock() {
            *slot = value;
        }
    }

    fn record(&self, error: &InvocationError, policy: FailurePolicy) {
        if let Ok(mut failure) = self.failure.lock()
            && failure.is_none()
        {
            *failure = Some(error.clone());
        }
        if policy == FailurePolicy::PoisonInstance
            && let Ok(mut poisoned) = self.poisoned.lock()
        {
            warn!(plugin = %self.plugin_id, error = %error, "Instance poisoned");
            *poisoned = Some(error.to_string());
        }
    }

    fn host_context(&self) -> Result<Option<Arc<dyn Any + Send + Sync>>, Error> {
        self.host_context
            .lock()
            .map(|c| c.clone())
            .map_err(|e| Error::msg(format!("host state lock poisoned: {e}")))
    }
}

/// Convert every function in `scope` into an Extism import.
///
/// Imports are registered in each descriptor's namespace. A failing host
/// call traps the guest with the error message and, under
/// [`FailurePolicy::PoisonInstance`], makes every later import call fail.
/// Either way, later imports in the same export call repeat the failure.
#[must_use]
pub fn to_extism_functions(scope: &Arc<FunctionScope>, policy: FailurePolicy) -> Vec<Function> {
    functions_with_state(scope, policy, &Arc::new(HostCallState::default()))
}

pub(crate) fn functions_with_state(
    scope: &Arc<FunctionScope>,
    policy: FailurePolicy,
    state: &Arc<HostCallState>,
) -> Vec<Function> {
    let bridge = InvocationBridge::new(Arc::clone(scope)).with_policy(policy);
    scope
        .iter()
        .map(|descriptor| {
            let name = descriptor.name().to_string();
            let params = vec![PTR; descriptor.arity()];
            let results = if descriptor.returns().is_some() {
                vec![PTR]
            } else {
                Vec::new()
            };
            let bridge = bridge.clone();
            let state = Arc::clone(state);
            let function_name = name.clone();
            Function::new(
                name,
                params,
                results,
                UserData::new(()),
                move |plugin: &mut CurrentPlugin,
                      inputs: &[Val],
                      outputs: &mut [Val],
                      _user_data: UserData<()>| {
                    call_import(&bridge, &state, &function_name, plugin, inputs, outputs)
                },
            )
            .with_namespace(descriptor.namespace())
        })
        .collect()
}

fn call_import(
    bridge: &InvocationBridge,
    state: &HostCallState,
    name: &str,
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    outputs: &mut [Val],
) -> Result<(), Error> {
    if let Some(err) = state.refusal() {
        return Err(Error::msg(err.to_string()));
    }

    let offsets = inputs
        .iter()
        .map(|v| v.i64().map(i64::cast_unsigned))
        .collect::<Option<Vec<u64>>>()
        .ok_or_else(|| Error::msg(format!("{name}: every argument must be an i64 offset")))?;

    let mut ctx = CallContext::new(Some(state.plugin_id.clone()));
    ctx.set_host_context(state.host_context()?);

    let mut memory = ExtismMemory::new(plugin);
    match bridge.invoke(&mut memory, &mut ctx, name, &offsets) {
        Ok(region) => {
            if let Some(slot) = outputs.first_mut() {
                *slot = Val::I64(region.map_or(0, |r| r.offset).cast_signed());
            }
            Ok(())
        },
        Err(e) => {
            state.record(&e, bridge.policy());
            Err(Error::msg(e.to_string()))
        },
    }
}
