//! Resolved adapter capabilities.

use crate::catalog::Command;
use crate::types::{Capabilities, ExceptionBreakpointsFilter};

/// Capabilities of the debug adapter with absent flags resolved to `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterCapabilities {
    /// Whether the adapter supports `configurationDone`.
    pub supports_configuration_done_request: bool,
    /// Whether the adapter supports function breakpoints.
    pub supports_function_breakpoints: bool,
    /// Whether the adapter supports conditional breakpoints.
    pub supports_conditional_breakpoints: bool,
    /// Whether the adapter supports hit-count breakpoints.
    pub supports_hit_conditional_breakpoints: bool,
    /// Whether the adapter supports `evaluate` for hovers.
    pub supports_evaluate_for_hovers: bool,
    /// Whether the adapter supports stepping backwards.
    pub supports_step_back: bool,
    /// Whether the adapter supports setting variable values.
    pub supports_set_variable: bool,
    /// Whether the adapter supports `restartFrame`.
    pub supports_restart_frame: bool,
    /// Whether the adapter supports the `restart` request.
    pub supports_restart_request: bool,
    /// Whether the adapter supports the `terminate` request.
    pub supports_terminate_request: bool,
    /// Whether the adapter honours `terminateDebuggee`.
    pub support_terminate_debuggee: bool,
    /// Whether the adapter supports the `cancel` request.
    pub supports_cancel_request: bool,
    /// Whether the adapter supports logpoints.
    pub supports_log_points: bool,
    /// Whether the adapter supports `loadedSources`.
    pub supports_loaded_sources_request: bool,
    /// Whether the adapter supports `modules`.
    pub supports_modules_request: bool,
    /// Whether the adapter supports `readMemory`.
    pub supports_read_memory_request: bool,
    /// Whether the adapter supports `disassemble`.
    pub supports_disassemble_request: bool,
    /// Whether the adapter supports `completions`.
    pub supports_completions_request: bool,
    /// Whether the adapter supports paged stack traces.
    pub supports_delayed_stack_trace_loading: bool,
    /// Exception filters offered by the adapter.
    pub exception_breakpoint_filters: Vec<ExceptionBreakpointsFilter>,
}

impl AdapterCapabilities {
    /// Build from the `initialize` response body.
    pub fn from_initialize_response(caps: &Capabilities) -> Self {
        let mut resolved = Self::default();
        resolved.apply(caps);
        resolved
    }

    /// Apply a `capabilities` event: only the flags present in `update`
    /// change.
    pub fn apply(&mut self, update: &Capabilities) {
        fn set(target: &mut bool, value: Option<bool>) {
            if let Some(value) = value {
                *target = value;
            }
        }
        set(
            &mut self.supports_configuration_done_request,
            update.supports_configuration_done_request,
        );
        set(
            &mut self.supports_function_breakpoints,
            update.supports_function_breakpoints,
        );
        set(
            &mut self.supports_conditional_breakpoints,
            update.supports_conditional_breakpoints,
        );
        set(
            &mut self.supports_hit_conditional_breakpoints,
            update.supports_hit_conditional_breakpoints,
        );
        set(
            &mut self.supports_evaluate_for_hovers,
            update.supports_evaluate_for_hovers,
        );
        set(&mut self.supports_step_back, update.supports_step_back);
        set(&mut self.supports_set_variable, update.supports_set_variable);
        set(&mut self.supports_restart_frame, update.supports_restart_frame);
        set(
            &mut self.supports_restart_request,
            update.supports_restart_request,
        );
        set(
            &mut self.supports_terminate_request,
            update.supports_terminate_request,
        );
        set(
            &mut self.support_terminate_debuggee,
            update.support_terminate_debuggee,
        );
        set(
            &mut self.supports_cancel_request,
            update.supports_cancel_request,
        );
        set(&mut self.supports_log_points, update.supports_log_points);
        set(
            &mut self.supports_loaded_sources_request,
            update.supports_loaded_sources_request,
        );
        set(
            &mut self.supports_modules_request,
            update.supports_modules_request,
        );
        set(
            &mut self.supports_read_memory_request,
            update.supports_read_memory_request,
        );
        set(
            &mut self.supports_disassemble_request,
            update.supports_disassemble_request,
        );
        set(
            &mut self.supports_completions_request,
            update.supports_completions_request,
        );
        set(
            &mut self.supports_delayed_stack_trace_loading,
            update.supports_delayed_stack_trace_loading,
        );
        if let Some(filters) = &update.exception_breakpoint_filters {
            self.exception_breakpoint_filters = filters.clone();
        }
    }

    /// Whether the adapter advertised support for `command`.
    ///
    /// Commands that have no capability flag are always supported.
    pub fn supports(&self, command: Command) -> bool {
        match command {
            Command::ConfigurationDone => self.supports_configuration_done_request,
            Command::SetFunctionBreakpoints => self.supports_function_breakpoints,
            Command::StepBack | Command::ReverseContinue => self.supports_step_back,
            Command::SetVariable => self.supports_set_variable,
            Command::RestartFrame => self.supports_restart_frame,
            Command::Restart => self.supports_restart_request,
            Command::Terminate => self.supports_terminate_request,
            Command::Cancel => self.supports_cancel_request,
            Command::LoadedSources => self.supports_loaded_sources_request,
            Command::Modules => self.supports_modules_request,
            Command::ReadMemory => self.supports_read_memory_request,
            Command::Disassemble => self.supports_disassemble_request,
            Command::Completions => self.supports_completions_request,
            _ => true,
        }
    }
}
