//! Validation-layer diagnostics routed through a pluggable sink.

use ash::vk;
use std::ffi::c_void;
use tracing::{debug, error, warn};

/// Severity of a validation-layer message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Verbose,
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn from_vk(flags: vk::DebugUtilsMessageSeverityFlagsEXT) -> Self {
        if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            Self::Error
        } else if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            Self::Warning
        } else if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
            Self::Info
        } else {
            Self::Verbose
        }
    }
}

/// Receives messages emitted by the validation layer.
pub trait DiagnosticSink: Send + Sync {
    fn message(&self, severity: Severity, kind: &str, text: &str);
}

/// Default sink: forwards every message to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn message(&self, severity: Severity, kind: &str, text: &str) {
        match severity {
            Severity::Error => error!(kind, "validation layer: {text}"),
            Severity::Warning => warn!(kind, "validation layer: {text}"),
            Severity::Info | Severity::Verbose => debug!(kind, "validation layer: {text}"),
        }
    }
}

pub(crate) fn message_kind(types: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if types.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if types.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "general"
    }
}

/// Messenger create-info wired to `sink`.
///
/// `sink` must stay at a fixed address for as long as the messenger (or the
/// instance that chains this struct) exists.
#[allow(clippy::borrowed_box)]
pub(crate) fn messenger_create_info(
    sink: &Box<dyn DiagnosticSink>,
) -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
        .user_data(sink as *const Box<dyn DiagnosticSink> as *mut c_void)
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user_data: *mut c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || user_data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: user_data is the boxed sink registered in `messenger_create_info`,
    // and the loader hands us a valid callback-data pointer for this call.
    let (sink, text) = unsafe {
        let sink = &*(user_data as *const Box<dyn DiagnosticSink>);
        let text = (*callback_data)
            .message_as_c_str()
            .map(|m| m.to_string_lossy().into_owned())
            .unwrap_or_default();
        (sink, text)
    };
    sink.message(Severity::from_vk(severity), message_kind(types), &text);
    vk::FALSE
}
