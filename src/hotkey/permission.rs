//! Accessibility permission checks
//!
//! Observing system-wide keyboard events requires the process to be trusted
//! under System Settings > Privacy & Security > Accessibility.

/// Query/request access to system-wide input events
pub trait PermissionGate: Send + Sync {
    /// Non-prompting check
    fn is_authorized(&self) -> bool;

    /// Check and let the OS show its consent prompt if needed. The prompt is
    /// asynchronous, so the result reflects the state at call time; re-poll
    /// `is_authorized` afterwards.
    fn request_authorization(&self) -> bool;
}

/// macOS Accessibility trust, via `AXIsProcessTrustedWithOptions`
#[derive(Debug, Default, Clone, Copy)]
pub struct AccessibilityPermission;

impl PermissionGate for AccessibilityPermission {
    fn is_authorized(&self) -> bool {
        accessibility_trusted(false)
    }

    fn request_authorization(&self) -> bool {
        accessibility_trusted(true)
    }
}

#[cfg(target_os = "macos")]
fn accessibility_trusted(prompt: bool) -> bool {
    use core_foundation::base::TCFType;
    use core_foundation::boolean::CFBoolean;
    use core_foundation::dictionary::{CFDictionary, CFDictionaryRef};
    use core_foundation::string::CFString;

    #[link(name = "ApplicationServices", kind = "framework")]
    extern "C" {
        fn AXIsProcessTrustedWithOptions(options: CFDictionaryRef) -> bool;
    }

    let options = CFDictionary::from_CFType_pairs(&[(
        CFString::new("AXTrustedCheckOptionPrompt"),
        CFBoolean::from(prompt),
    )]);

    let trusted = unsafe { AXIsProcessTrustedWithOptions(options.as_concrete_TypeRef()) };
    tracing::debug!(prompt, trusted, "accessibility trust checked");
    trusted
}

#[cfg(not(target_os = "macos"))]
fn accessibility_trusted(prompt: bool) -> bool {
    tracing::debug!(prompt, "accessibility trust is not available on this platform");
    false
}
