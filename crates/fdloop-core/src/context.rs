//! User context attached to a file descriptor handle.
//!
//! The handle never owns `info` in any sense beyond holding a reference
//! to it. The optional hooks let the caller observe when a run-loop
//! source captures and drops the info.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Opaque user payload passed back to the callback.
pub type ContextInfo = Arc<dyn Any + Send + Sync>;

/// Called when a run-loop source captures `info`.
pub type RetainCallBack = fn(&ContextInfo);

/// Called when a run-loop source releases `info`.
pub type ReleaseCallBack = fn(&ContextInfo);

/// Renders `info` for debug output.
pub type CopyDescriptionCallBack = fn(&ContextInfo) -> String;

/// Context supplied at creation and copied out by `get_context`.
///
/// `version` must be 0 for `get_context` to fill the structure in.
#[derive(Clone, Default)]
pub struct FileDescriptorContext {
    pub version: isize,
    pub info: Option<ContextInfo>,
    pub retain: Option<RetainCallBack>,
    pub release: Option<ReleaseCallBack>,
    pub copy_description: Option<CopyDescriptionCallBack>,
}

impl FileDescriptorContext {
    /// Context carrying only `info`, without hooks.
    pub fn with_info(info: ContextInfo) -> Self {
        Self {
            info: Some(info),
            ..Self::default()
        }
    }

    /// Run the retain hook, if both a hook and info are present.
    #[inline]
    pub fn retain_info(&self) {
        if let (Some(retain), Some(info)) = (self.retain, self.info.as_ref()) {
            retain(info);
        }
    }

    /// Run the release hook, if both a hook and info are present.
    #[inline]
    pub fn release_info(&self) {
        if let (Some(release), Some(info)) = (self.release, self.info.as_ref()) {
            release(info);
        }
    }

    /// Describe `info` through the user hook.
    pub fn describe(&self) -> Option<String> {
        match (self.copy_description, self.info.as_ref()) {
            (Some(describe), Some(info)) => Some(describe(info)),
            _ => None,
        }
    }
}

impl fmt::Debug for FileDescriptorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileDescriptorContext")
            .field("version", &self.version)
            .field("info", &self.describe().or_else(|| self.info.as_ref().map(|_| "<opaque>".into())))
            .field("retain", &self.retain.is_some())
            .field("release", &self.release.is_some())
            .field("copy_description", &self.copy_description.is_some())
            .finish()
    }
}
