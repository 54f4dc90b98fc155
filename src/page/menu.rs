//! Navigation menus keyed by menu type

use std::collections::HashMap;

use super::Link;

/// Menu type that shares the admin menu
const SUPER_ADMIN: &str = "super-admin";
const ADMIN: &str = "admin";

/// Read-only registry of navigation link sets, built at start-up.
#[derive(Debug, Clone, Default)]
pub struct Menu {
    types: HashMap<String, Vec<Link>>,
}

impl Menu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append links to a menu type
    pub fn add_link(&mut self, typ: impl Into<String>, links: impl IntoIterator<Item = Link>) {
        self.types.entry(typ.into()).or_default().extend(links);
    }

    /// Builder form of [`Menu::add_link`]
    pub fn with_links(mut self, typ: impl Into<String>, links: impl IntoIterator<Item = Link>) -> Self {
        self.add_link(typ, links);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Links for a menu type with the active state set for `path`.
    ///
    /// A link is active when its href equals the path and partially active
    /// when the path contains its href. Returns `None` for unknown types.
    pub fn get(&self, typ: &str, path: &str) -> Option<Vec<Link>> {
        let links = self.types.get(typ)?;
        Some(
            links
                .iter()
                .map(|link| {
                    let mut link = link.clone();
                    if link.href == path {
                        link.is_active = true;
                    } else if !link.href.is_empty() && path.contains(link.href.as_str()) {
                        link.is_partial_active = true;
                    }
                    link
                })
                .collect(),
        )
    }
}

/// Menu type used for a session's menu type.
pub fn menu_type_for(session_menu_type: &str) -> &str {
    if session_menu_type == SUPER_ADMIN {
        ADMIN
    } else {
        session_menu_type
    }
}
