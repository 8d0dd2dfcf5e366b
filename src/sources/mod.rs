use crate::model::AppDescriptor;

/// Lookup of installed applications by normalized desktop-entry id.
pub trait AppResolver {
    fn resolve(&self, id: &str) -> Option<AppDescriptor>;
    /// Applications suitable for search results, in lookup precedence order.
    fn installed(&self) -> Vec<AppDescriptor>;
}

pub mod desktop;
