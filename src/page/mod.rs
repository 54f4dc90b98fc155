//! Page view model
//!
//! A [`Page`] is the per-request data model handed to templates. Requests
//! never build pages from scratch: a [`PagePrototype`] holding the
//! process-wide defaults (scripts, stylesheets, header) is created once at
//! start-up and every GET request works on its own deep copy, hydrated from
//! the session's flash data.

pub mod menu;
pub mod render;

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::flash::{self, FormMap, GroupMap};
use crate::sessions::SessionRecord;

/// Logo shown in the page header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HeaderLogo {
    pub img: String,
    pub height: String,
    pub width: String,
}

/// Page header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Header {
    pub logo: HeaderLogo,
    pub title: String,
    pub nav: Vec<Link>,
}

/// Navigation link, optionally with nested links
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Link {
    pub links: Vec<Link>,
    pub href: String,
    pub name: String,
    pub is_active: bool,
    pub is_partial_active: bool,
    pub title: String,
    pub attrs: BTreeMap<String, String>,
}

impl Link {
    pub fn new(name: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            href: href.into(),
            ..Default::default()
        }
    }

    /// Attach nested links
    pub fn with_links(mut self, links: Vec<Link>) -> Self {
        self.links = links;
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }
}

/// Navigational link shown above the page content
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BreadCrumb {
    pub label: String,
    pub link: String,
}

/// Per-request page view.
///
/// `Clone` is a deep copy: every list and the nested header are
/// independently allocated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Page {
    pub header: Option<Header>,
    pub nav: Vec<Link>,
    pub sub_nav: Vec<Link>,
    pub title: String,
    pub links: Vec<String>,
    pub scripts: Vec<String>,
    pub scripts_no_bust: Vec<String>,
    pub scripts_no_bust_post_scripts: Vec<String>,
    pub info_message: String,
    pub error_message: String,
    pub form_errors: FormMap,
    pub form_values: FormMap,
    pub group_values: GroupMap,
    pub body_class: String,
    #[serde(rename = "FaviconHTML")]
    pub favicon_html: String,
    pub collapse_menu: bool,
    pub go_back: bool,
    pub bread_crumbs: Vec<BreadCrumb>,
}

fn push_unique(list: &mut Vec<String>, items: &[&str]) {
    for item in items {
        if !list.iter().any(|existing| existing == item) {
            list.push((*item).to_string());
        }
    }
}

impl Page {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add stylesheets that are not already present
    pub fn add_link(&mut self, links: &[&str]) {
        push_unique(&mut self.links, links);
    }

    /// Add scripts (cache-busted) that are not already present
    pub fn add_script(&mut self, scripts: &[&str]) {
        push_unique(&mut self.scripts, scripts);
    }

    /// Add scripts that are loaded without a cache buster
    pub fn add_script_no_bust(&mut self, scripts: &[&str]) {
        push_unique(&mut self.scripts_no_bust, scripts);
    }

    /// Add scripts loaded without a cache buster after the regular scripts
    pub fn add_script_no_bust_post_scripts(&mut self, scripts: &[&str]) {
        push_unique(&mut self.scripts_no_bust_post_scripts, scripts);
    }

    pub fn add_breadcrumb(&mut self, label: impl Into<String>, link: impl Into<String>) -> &mut Self {
        self.bread_crumbs.push(BreadCrumb {
            label: label.into(),
            link: link.into(),
        });
        self
    }

    /// Whether the page already carries form values or form errors
    pub fn existing_values(&self) -> bool {
        !self.form_errors.is_empty() || !self.form_values.is_empty()
    }

    /// Set the navigation on both the page and its header
    pub fn set_nav(&mut self, nav: Vec<Link>) {
        if let Some(header) = self.header.as_mut() {
            header.nav = nav.clone();
        }
        self.nav = nav;
    }

    /// Move flash data from the session onto the page.
    ///
    /// Values already present on the page take precedence over flashed ones.
    /// All flash entries are consumed regardless.
    pub fn hydrate_from_session(&mut self, record: &mut SessionRecord) {
        let error_message = flash::take_error_message(record);
        let info_message = flash::take_info_message(record);
        let form_errors = flash::take_form_errors(record);
        let form_values = flash::take_form_values(record);
        let group_values = flash::take_group_values(record);

        if self.error_message.is_empty() {
            self.error_message = error_message;
        }
        if self.info_message.is_empty() {
            self.info_message = info_message;
        }
        for (k, v) in form_errors {
            self.form_errors.entry(k).or_insert(v);
        }
        for (k, v) in form_values {
            self.form_values.entry(k).or_insert(v);
        }
        for (k, v) in group_values {
            self.group_values.entry(k).or_insert(v);
        }
    }
}

/// Copy of `links` with every link whose href equals `path` marked active.
pub fn set_active(path: &str, links: &[Link]) -> Vec<Link> {
    links
        .iter()
        .map(|link| {
            let mut link = link.clone();
            if link.href == path {
                link.is_active = true;
            }
            link
        })
        .collect()
}

/// Immutable page defaults shared by all requests.
#[derive(Debug, Clone, Default)]
pub struct PagePrototype(Arc<Page>);

impl PagePrototype {
    pub fn new(page: Page) -> Self {
        Self(Arc::new(page))
    }

    /// Allocate a fresh page for one request.
    pub fn instantiate(&self) -> Page {
        (*self.0).clone()
    }

    /// Read-only view of the defaults
    pub fn page(&self) -> &Page {
        &self.0
    }
}
