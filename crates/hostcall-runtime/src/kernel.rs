//! The guest-facing kernel.
//!
//! Every guest gets the same set of imports: block allocation, byte and
//! word loads and stores, input/output/error slots, manifest config, vars,
//! logging, and one entry per registered host function. [`Kernel`] is that
//! surface for the duration of one export call.
//!
//! | Import | Method |
//! |--------|--------|
//! | `extism_alloc` / `extism_free` / `extism_length` | [`Kernel::alloc`], [`Kernel::free`], [`Kernel::length`] |
//! | `extism_load_u8` / `extism_store_u8` | [`Kernel::load_u8`], [`Kernel::store_u8`] |
//! | `extism_load_u64` / `extism_store_u64` | [`Kernel::load_u64`], [`Kernel::store_u64`] |
//! | `extism_input_offset` / `extism_input_length` / `extism_input_load_u8` | [`Kernel::input_offset`], [`Kernel::input_length`], [`Kernel::input_load_u8`] |
//! | `extism_output_set` / `extism_error_set` | [`Kernel::output_set`], [`Kernel::error_set`] |
//! | `extism_config_get` | [`Kernel::config_get`] |
//! | `extism_var_get` / `extism_var_set` | [`Kernel::var_get`], [`Kernel::var_set`] |
//! | `extism_log_{debug,info,warn,error}` | [`Kernel::log_debug`] etc. |
//! | user imports | [`Kernel::call_host`] |

use std::collections::BTreeMap;

use hostcall_core::{
    CallContext, FailurePolicy, GuestMemory, InvocationBridge, InvocationError, LinearMemory,
    MemoryError, Region,
};
use tracing::{debug, error, info, warn};

use crate::error::GuestTrap;

/// Instance state the kernel operates on. Owned by the instance.
#[derive(Debug, Clone)]
pub(crate) struct KernelState {
    pub(crate) memory: LinearMemory,
    pub(crate) vars: BTreeMap<String, Vec<u8>>,
    pub(crate) config: BTreeMap<String, String>,
    pub(crate) input: Region,
    pub(crate) output: Option<Region>,
    pub(crate) error: Option<Region>,
    /// First host failure of the current call.
    pub(crate) host_failure: Option<InvocationError>,
    pub(crate) max_var_bytes: Option<u64>,
}

impl KernelState {
    pub(crate) fn new(
        max_memory_bytes: u64,
        config: BTreeMap<String, String>,
        max_var_bytes: Option<u64>,
    ) -> Self {
        Self {
            memory: LinearMemory::new(max_memory_bytes),
            vars: BTreeMap::new(),
            config,
            input: Region::empty(),
            output: None,
            error: None,
            host_failure: None,
            max_var_bytes,
        }
    }

    /// Clear per-call state and copy `input` into fresh memory. Vars survive.
    pub(crate) fn begin_call(&mut self, input: &[u8]) -> Result<(), MemoryError> {
        self.memory.reset();
        self.output = None;
        self.error = None;
        self.host_failure = None;
        self.input = self.memory.alloc_bytes(input)?;
        Ok(())
    }

    /// Drop everything, vars included.
    pub(crate) fn reset(&mut self) {
        self.memory.reset();
        self.vars.clear();
        self.input = Region::empty();
        self.output = None;
        self.error = None;
        self.host_failure = None;
    }

    fn vars_size(&self) -> u64 {
        self.vars
            .iter()
            .map(|(k, v)| {
                u64::try_from(k.len().saturating_add(v.len())).unwrap_or(u64::MAX)
            })
            .fold(0u64, u64::saturating_add)
    }
}

/// Log level of a guest log import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestLogLevel {
    /// `extism_log_debug`
    Debug,
    /// `extism_log_info`
    Info,
    /// `extism_log_warn`
    Warn,
    /// `extism_log_error`
    Error,
}

/// The imports available to a guest during one export call.
pub struct Kernel<'a> {
    state: &'a mut KernelState,
    bridge: &'a InvocationBridge,
    ctx: &'a mut CallContext,
}

impl std::fmt::Debug for Kernel<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("plugin", &self.ctx.plugin())
            .field("input", &self.state.input)
            .field("has_output", &self.state.output.is_some())
            .finish_non_exhaustive()
    }
}

impl<'a> Kernel<'a> {
    pub(crate) fn new(
        state: &'a mut KernelState,
        bridge: &'a InvocationBridge,
        ctx: &'a mut CallContext,
    ) -> Self {
        Self { state, bridge, ctx }
    }

    /// Id of the calling plugin.
    #[must_use]
    pub fn plugin_id(&self) -> &str {
        self.ctx.plugin().unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Memory
    // -----------------------------------------------------------------------

    /// Allocate `size` bytes. Zero returns the null handle.
    ///
    /// # Errors
    ///
    /// Fails when the memory limit would be exceeded.
    pub fn alloc(&mut self, size: u64) -> Result<u64, GuestTrap> {
        Ok(self.state.memory.alloc(size)?)
    }

    /// Free the block at `offset`.
    ///
    /// # Errors
    ///
    /// Fails when no block starts at `offset`.
    pub fn free(&mut self, offset: u64) -> Result<(), GuestTrap> {
        Ok(self.state.memory.free(offset)?)
    }

    /// Length of the block at `offset`, `0` for unknown offsets.
    #[must_use]
    pub fn length(&self, offset: u64) -> u64 {
        self.state.memory.block_len(offset).unwrap_or_default()
    }

    /// Load one byte.
    ///
    /// # Errors
    ///
    /// Fails when `offset` is past the end of memory.
    pub fn load_u8(&self, offset: u64) -> Result<u8, GuestTrap> {
        Ok(self.state.memory.load_u8(offset)?)
    }

    /// Store one byte.
    ///
    /// # Errors
    ///
    /// Fails when `offset` is past the end of memory.
    pub fn store_u8(&mut self, offset: u64, value: u8) -> Result<(), GuestTrap> {
        Ok(self.state.memory.store_u8(offset, value)?)
    }

    /// Load a little-endian `u64`.
    ///
    /// # Errors
    ///
    /// Fails when the word is not fully inside memory.
    pub fn load_u64(&self, offset: u64) -> Result<u64, GuestTrap> {
        Ok(self.state.memory.load_u64(offset)?)
    }

    /// Store a little-endian `u64`.
    ///
    /// # Errors
    ///
    /// Fails when the word is not fully inside memory.
    pub fn store_u64(&mut self, offset: u64, value: u64) -> Result<(), GuestTrap> {
        Ok(self.state.memory.store_u64(offset, value)?)
    }

    /// Copy the whole block at `offset`.
    ///
    /// # Errors
    ///
    /// Fails when no block starts at `offset`.
    pub fn read_block(&mut self, offset: u64) -> Result<Vec<u8>, GuestTrap> {
        let region = self.state.memory.region(offset)?;
        Ok(self.state.memory.read(region)?)
    }

    /// Read the block at `offset` as UTF-8, replacing invalid sequences.
    ///
    /// # Errors
    ///
    /// Fails when no block starts at `offset`.
    pub fn read_string(&mut self, offset: u64) -> Result<String, GuestTrap> {
        let bytes = self.read_block(offset)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Allocate a block holding `bytes` and return its offset.
    ///
    /// # Errors
    ///
    /// Fails when the memory limit would be exceeded.
    pub fn write_block(&mut self, bytes: impl AsRef<[u8]>) -> Result<u64, GuestTrap> {
        Ok(self.state.memory.alloc_bytes(bytes.as_ref())?.offset)
    }

    // -----------------------------------------------------------------------
    // Input / output / error
    // -----------------------------------------------------------------------

    /// Offset of the call input block.
    #[must_use]
    pub fn input_offset(&self) -> u64 {
        self.state.input.offset
    }

    /// Length of the call input.
    #[must_use]
    pub fn input_length(&self) -> u64 {
        self.state.input.len
    }

    /// Load byte `index` of the input.
    ///
    /// # Errors
    ///
    /// Fails when `index` is past the end of the input.
    pub fn input_load_u8(&self, index: u64) -> Result<u8, GuestTrap> {
        self.input_load(index, 1)?;
        Ok(self.state.memory.load_u8(self.input_position(index)?)?)
    }

    /// Load the little-endian `u64` at byte `index` of the input.
    ///
    /// # Errors
    ///
    /// Fails when the word is not fully inside the input.
    pub fn input_load_u64(&self, index: u64) -> Result<u64, GuestTrap> {
        self.input_load(index, 8)?;
        Ok(self.state.memory.load_u64(self.input_position(index)?)?)
    }

    /// The whole input.
    ///
    /// # Errors
    ///
    /// Fails only if the input block was freed by the guest.
    pub fn input(&mut self) -> Result<Vec<u8>, GuestTrap> {
        let input = self.state.input;
        Ok(self.state.memory.read(input)?)
    }

    /// Mark `length` bytes at `offset` as the call output.
    ///
    /// # Errors
    ///
    /// Fails when the span is not inside memory.
    pub fn output_set(&mut self, offset: u64, length: u64) -> Result<(), GuestTrap> {
        let region = Region::new(offset, length);
        self.check_span(region)?;
        self.state.output = Some(region);
        Ok(())
    }

    /// Allocate `bytes` and make them the call output.
    ///
    /// # Errors
    ///
    /// Fails when the memory limit would be exceeded.
    pub fn set_output(&mut self, bytes: impl AsRef<[u8]>) -> Result<(), GuestTrap> {
        let region = self.state.memory.alloc_bytes(bytes.as_ref())?;
        self.state.output = Some(region);
        Ok(())
    }

    /// Set the block at `offset` as the call error; `0` clears it.
    ///
    /// # Errors
    ///
    /// Fails when no block starts at `offset`.
    pub fn error_set(&mut self, offset: u64) -> Result<(), GuestTrap> {
        if offset == 0 {
            self.state.error = None;
            return Ok(());
        }
        self.state.error = Some(self.state.memory.region(offset)?);
        Ok(())
    }

    /// Allocate `message` and make it the call error.
    ///
    /// # Errors
    ///
    /// Fails when the memory limit would be exceeded.
    pub fn set_error(&mut self, message: &str) -> Result<(), GuestTrap> {
        let offset = self.write_block(message)?;
        self.error_set(offset)
    }

    // -----------------------------------------------------------------------
    // Config and vars
    // -----------------------------------------------------------------------

    /// Look up the config key stored at `key_offset`; returns an offset to
    /// the value or `0` when absent.
    ///
    /// # Errors
    ///
    /// Fails when the key block is invalid or the value cannot be allocated.
    pub fn config_get(&mut self, key_offset: u64) -> Result<u64, GuestTrap> {
        let key = self.read_string(key_offset)?;
        match self.state.config.get(&key).cloned() {
            Some(value) => self.write_block(value),
            None => Ok(0),
        }
    }

    /// Look up the var named at `key_offset`; returns an offset to the value
    /// or `0` when absent.
    ///
    /// # Errors
    ///
    /// Fails when the key block is invalid or the value cannot be allocated.
    pub fn var_get(&mut self, key_offset: u64) -> Result<u64, GuestTrap> {
        let key = self.read_string(key_offset)?;
        match self.state.vars.get(&key).cloned() {
            Some(value) => self.write_block(value),
            None => Ok(0),
        }
    }

    /// Set the var named at `key_offset` to the block at `value_offset`;
    /// a `0` value removes the var.
    ///
    /// # Errors
    ///
    /// Fails when a block is invalid or the var store limit is exceeded.
    pub fn var_set(&mut self, key_offset: u64, value_offset: u64) -> Result<(), GuestTrap> {
        let key = self.read_string(key_offset)?;
        if value_offset == 0 {
            self.state.vars.remove(&key);
            return Ok(());
        }
        let value = self.read_block(value_offset)?;
        let previous = self.state.vars.insert(key.clone(), value);
        if let Some(limit) = self.state.max_var_bytes
            && self.state.vars_size() > limit
        {
            match previous {
                Some(old) => self.state.vars.insert(key, old),
                None => self.state.vars.remove(&key),
            };
            return Err(GuestTrap::abort(format!(
                "var store limit of {limit} bytes exceeded"
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Logging
    // -----------------------------------------------------------------------

    /// `extism_log_debug`
    ///
    /// # Errors
    ///
    /// Fails when the message block is invalid.
    pub fn log_debug(&mut self, offset: u64) -> Result<(), GuestTrap> {
        self.log(GuestLogLevel::Debug, offset)
    }

    /// `extism_log_info`
    ///
    /// # Errors
    ///
    /// Fails when the message block is invalid.
    pub fn log_info(&mut self, offset: u64) -> Result<(), GuestTrap> {
        self.log(GuestLogLevel::Info, offset)
    }

    /// `extism_log_warn`
    ///
    /// # Errors
    ///
    /// Fails when the message block is invalid.
    pub fn log_warn(&mut self, offset: u64) -> Result<(), GuestTrap> {
        self.log(GuestLogLevel::Warn, offset)
    }

    /// `extism_log_error`
    ///
    /// # Errors
    ///
    /// Fails when the message block is invalid.
    pub fn log_error(&mut self, offset: u64) -> Result<(), GuestTrap> {
        self.log(GuestLogLevel::Error, offset)
    }

    /// Log the message stored at `offset` with the calling plugin's id.
    ///
    /// # Errors
    ///
    /// Fails when the message block is invalid.
    pub fn log(&mut self, level: GuestLogLevel, offset: u64) -> Result<(), GuestTrap> {
        let message = self.read_string(offset)?;
        let plugin = self.plugin_id().to_string();
        match level {
            GuestLogLevel::Debug => debug!(plugin = %plugin, "{message}"),
            GuestLogLevel::Info => info!(plugin = %plugin, "{message}"),
            GuestLogLevel::Warn => warn!(plugin = %plugin, "{message}"),
            GuestLogLevel::Error => error!(plugin = %plugin, "{message}"),
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Host calls
    // -----------------------------------------------------------------------

    /// Call the host function `name` with one block offset per argument.
    /// Returns the result block offset, `0` for unit functions.
    ///
    /// # Errors
    ///
    /// Returns the [`InvocationError`] as a trap. After a failure every
    /// later host call in the same export call fails too; under
    /// [`FailurePolicy::PoisonInstance`] it fails with
    /// [`InvocationError::Poisoned`].
    pub fn call_host(&mut self, name: &str, args: &[u64]) -> Result<u64, GuestTrap> {
        if let Some(previous) = &self.state.host_failure {
            let err = match self.bridge.policy() {
                FailurePolicy::PoisonInstance => InvocationError::Poisoned {
                    message: previous.to_string(),
                },
                FailurePolicy::TerminateCall => previous.clone(),
            };
            return Err(err.into());
        }

        match self
            .bridge
            .invoke(&mut self.state.memory, &mut *self.ctx, name, args)
        {
            Ok(region) => Ok(region.map_or(0, |r| r.offset)),
            Err(e) => {
                self.state.host_failure = Some(e.clone());
                Err(e.into())
            },
        }
    }

    fn input_load(&self, index: u64, width: u64) -> Result<(), MemoryError> {
        let input = self.state.input;
        let end = index.checked_add(width);
        match end {
            Some(end) if end <= input.len => Ok(()),
            _ => Err(MemoryError::OutOfBounds {
                offset: index,
                len: width,
                size: input.len,
            }),
        }
    }

    fn input_position(&self, index: u64) -> Result<u64, MemoryError> {
        let input = self.state.input;
        input
            .offset
            .checked_add(index)
            .ok_or(MemoryError::OutOfBounds {
                offset: index,
                len: 1,
                size: input.len,
            })
    }

    fn check_span(&self, region: Region) -> Result<(), MemoryError> {
        let size = self.state.memory.size();
        match region.end() {
            Some(end) if end <= size => Ok(()),
            _ => Err(MemoryError::OutOfBounds {
                offset: region.offset,
                len: region.len,
                size,
            }),
        }
    }
}
