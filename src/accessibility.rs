//! macOS Accessibility API backend for the element tree

use std::ffi::c_void;
use std::fmt;

use accessibility::{AXAttribute, AXUIElement, AXUIElementAttributes};
use accessibility_sys::{
    AXIsProcessTrusted, AXIsProcessTrustedWithOptions, AXUIElementCopyActionNames, AXValueGetTypeID,
    AXValueGetValue, AXValueRef, AXValueType, kAXValueTypeCGPoint, kAXValueTypeCGSize,
};
use core_foundation::array::{CFArray, CFArrayRef};
use core_foundation::base::{CFType, TCFType};
use core_foundation::boolean::CFBoolean;
use core_foundation::dictionary::CFDictionary;
use core_foundation::string::CFString;
use core_graphics::geometry::{CGPoint, CGSize};
use parking_lot::Mutex;

use crate::error::HammerError;
use crate::lifecycle::SystemProcesses;
use crate::tree::{ElementTree, Frame, Size};

/// Test if the Accessibility API actually works (not just permissions check)
pub fn test_api_access() -> Result<(), HammerError> {
    if !has_accessibility_permissions() {
        return Err(HammerError::Accessibility(
            "Process is not trusted for Accessibility (AXIsProcessTrusted=false)".to_string(),
        ));
    }
    Ok(())
}

/// Check if the app has Accessibility permissions
pub fn has_accessibility_permissions() -> bool {
    unsafe { AXIsProcessTrusted() }
}

/// Request Accessibility permissions from the user
pub fn request_accessibility_permissions() -> bool {
    unsafe {
        let key = CFString::new("AXTrustedCheckOptionPrompt");
        let value = CFBoolean::true_value();
        let dict = CFDictionary::from_CFType_pairs(&[(key.as_CFType(), value.as_CFType())]);
        AXIsProcessTrustedWithOptions(dict.as_CFTypeRef() as *const _)
    }
}

/// An `AXUIElement` that can cross threads.
///
/// AX calls are thread safe; the CF wrapper just doesn't say so.
#[derive(Clone, PartialEq)]
pub struct AxElement(AXUIElement);

unsafe impl Send for AxElement {}
unsafe impl Sync for AxElement {}

impl fmt::Debug for AxElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = self.0.role().map(|r| r.to_string()).ok();
        f.debug_struct("AxElement")
            .field("ptr", &self.0.as_concrete_TypeRef())
            .field("role", &role)
            .finish()
    }
}

/// Element tree over the live Accessibility hierarchy.
pub struct AxTree {
    processes: Mutex<SystemProcesses>,
}

impl AxTree {
    pub fn new() -> Self {
        AxTree {
            processes: Mutex::new(SystemProcesses::new()),
        }
    }

    fn attribute(element: &AxElement, name: &str) -> Option<CFType> {
        let attr: AXAttribute<CFType> = AXAttribute::new(&CFString::new(name));
        element.0.attribute(&attr).ok()
    }

    fn element_attribute(element: &AxElement, name: &str) -> Option<AxElement> {
        Self::attribute(element, name)?
            .downcast_into::<AXUIElement>()
            .map(AxElement)
    }

    /// Decode an `AXValue` attribute into `out`.
    fn value_attribute<V>(element: &AxElement, name: &str, kind: AXValueType, out: &mut V) -> bool {
        let Some(value) = Self::attribute(element, name) else {
            return false;
        };
        if value.type_of() != unsafe { AXValueGetTypeID() } {
            return false;
        }

        unsafe {
            AXValueGetValue(
                value.as_CFTypeRef() as AXValueRef,
                kind,
                out as *mut V as *mut c_void,
            )
        }
    }

    fn collect(elements: &CFArray<AXUIElement>) -> Vec<AxElement> {
        (0..elements.len())
            .filter_map(|i| elements.get(i).map(|e| AxElement(e.clone())))
            .collect()
    }

    fn has_role(element: &AxElement, role: &str) -> bool {
        element
            .0
            .role()
            .map(|r| r.to_string() == role)
            .unwrap_or(false)
    }
}

/// An unreadable or non-boolean `AXFocused` counts as not focused.
fn focus_flag(value: Option<CFType>) -> bool {
    value
        .and_then(|v| v.downcast_into::<CFBoolean>())
        .map(bool::from)
        .unwrap_or(false)
}

impl Default for AxTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ElementTree for AxTree {
    type Handle = AxElement;

    fn find_application(&self, process_name: &str) -> Option<AxElement> {
        let pid = self.processes.lock().pid_for_name(process_name)?;
        let app = AxElement(AXUIElement::application(pid as i32));
        if Self::has_role(&app, "AXApplication") {
            Some(app)
        } else {
            tracing::debug!("{} (PID {}) has no accessible application", process_name, pid);
            None
        }
    }

    fn focused_window(&self, application: &AxElement) -> Option<AxElement> {
        Self::element_attribute(application, "AXFocusedWindow")
            .filter(|window| Self::has_role(window, "AXWindow"))
    }

    fn windows(&self, application: &AxElement) -> Option<Vec<AxElement>> {
        application.0.windows().ok().map(|w| Self::collect(&w))
    }

    fn is_focused(&self, handle: &AxElement) -> bool {
        focus_flag(Self::attribute(handle, "AXFocused"))
    }

    fn role(&self, handle: &AxElement) -> Option<String> {
        handle.0.role().ok().map(|r| r.to_string())
    }

    fn title(&self, handle: &AxElement) -> Option<String> {
        handle.0.title().ok().map(|t| t.to_string())
    }

    fn size(&self, handle: &AxElement) -> Option<Size> {
        let mut size = CGSize::new(0.0, 0.0);
        Self::value_attribute(handle, "AXSize", kAXValueTypeCGSize, &mut size)
            .then(|| Size::new(size.width, size.height))
    }

    fn frame(&self, handle: &AxElement) -> Option<Frame> {
        let mut origin = CGPoint::new(0.0, 0.0);
        if !Self::value_attribute(handle, "AXPosition", kAXValueTypeCGPoint, &mut origin) {
            return None;
        }
        let size = self.size(handle)?;
        Some(Frame {
            x: origin.x,
            y: origin.y,
            width: size.width,
            height: size.height,
        })
    }

    fn children(&self, handle: &AxElement) -> Option<Vec<AxElement>> {
        handle.0.children().ok().map(|c| Self::collect(&c))
    }

    fn supports_action(&self, handle: &AxElement, action: &str) -> bool {
        let names = unsafe {
            let mut names: CFArrayRef = std::ptr::null();
            let result = AXUIElementCopyActionNames(handle.0.as_concrete_TypeRef(), &mut names);
            if result != 0 || names.is_null() {
                return false;
            }
            CFArray::<CFString>::wrap_under_create_rule(names)
        };

        names.iter().any(|name| name.to_string() == action)
    }

    fn invoke_action(&self, handle: &AxElement, action: &str) -> bool {
        match handle.0.perform_action(&CFString::new(action)) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("{} failed: {:?}", action, e);
                false
            }
        }
    }
}
