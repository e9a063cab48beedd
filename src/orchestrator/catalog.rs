//! Script catalog bookkeeping and the user's selection within it.

use crate::error::SelectionError;
use crate::model::Catalog;
use std::collections::BTreeSet;

/// Catalog request context; tied to the detection cycle that produced the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CatalogTicket {
    pub host: String,
    pub os: String,
    pub cycle: u64,
}

impl CatalogTicket {
    /// Current only while the host, the cycle and the detected OS are all unchanged.
    pub(crate) fn is_current(&self, host: &str, cycle: u64, os: Option<&str>) -> bool {
        self.host == host && self.cycle == cycle && os == Some(self.os.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CatalogOutcome {
    Ready(usize),
    Empty,
    Failed,
    Stale,
}

/// Filenames picked for the next run. Always a subset of the catalog it was
/// built against; replacing the catalog means starting a fresh selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Selection {
    names: BTreeSet<String>,
}

impl Selection {
    pub(crate) fn select(&mut self, catalog: &Catalog, name: &str) -> Result<(), SelectionError> {
        if catalog.is_empty() {
            return Err(SelectionError::NoCatalog);
        }
        if !catalog.contains_key(name) {
            return Err(SelectionError::UnknownScript(name.to_string()));
        }
        self.names.insert(name.to_string());
        Ok(())
    }

    pub(crate) fn deselect(&mut self, name: &str) -> bool {
        self.names.remove(name)
    }

    pub(crate) fn select_all(&mut self, catalog: &Catalog) -> Result<usize, SelectionError> {
        if catalog.is_empty() {
            return Err(SelectionError::NoCatalog);
        }
        self.names = catalog.keys().cloned().collect();
        Ok(self.names.len())
    }

    pub(crate) fn clear(&mut self) {
        self.names.clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Selected filenames in catalog order.
    pub(crate) fn ordered(&self, catalog: &Catalog) -> Vec<String> {
        catalog
            .keys()
            .filter(|k| self.names.contains(*k))
            .cloned()
            .collect()
    }

    pub(crate) fn names(&self) -> &BTreeSet<String> {
        &self.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptDescriptor;

    fn catalog(names: &[&str]) -> Catalog {
        names
            .iter()
            .map(|n| (n.to_string(), ScriptDescriptor::default()))
            .collect()
    }

    #[test]
    fn only_catalog_entries_can_be_selected() {
        let cat = catalog(&["firewall.sh", "users.sh"]);
        let mut sel = Selection::default();
        sel.select(&cat, "users.sh").unwrap();
        assert_eq!(
            sel.select(&cat, "rootkit.sh"),
            Err(SelectionError::UnknownScript("rootkit.sh".into()))
        );
        assert_eq!(sel.ordered(&cat), vec!["users.sh"]);
    }

    #[test]
    fn empty_catalog_has_nothing_to_select() {
        let mut sel = Selection::default();
        assert_eq!(sel.select(&Catalog::new(), "a.sh"), Err(SelectionError::NoCatalog));
        assert_eq!(sel.select_all(&Catalog::new()), Err(SelectionError::NoCatalog));
        assert!(sel.is_empty());
    }

    #[test]
    fn select_all_then_deselect_keeps_catalog_order() {
        let cat = catalog(&["c.sh", "a.sh", "b.sh"]);
        let mut sel = Selection::default();
        assert_eq!(sel.select_all(&cat), Ok(3));
        assert!(sel.deselect("b.sh"));
        assert!(!sel.deselect("b.sh"));
        assert_eq!(sel.ordered(&cat), vec!["a.sh", "c.sh"]);
    }

    #[test]
    fn ticket_requires_same_host_cycle_and_os() {
        let t = CatalogTicket {
            host: "10.0.0.5".into(),
            os: "Linux".into(),
            cycle: 2,
        };
        assert!(t.is_current("10.0.0.5", 2, Some("Linux")));
        assert!(!t.is_current("10.0.0.6", 2, Some("Linux")));
        assert!(!t.is_current("10.0.0.5", 3, Some("Linux")));
        assert!(!t.is_current("10.0.0.5", 2, Some("Windows")));
        assert!(!t.is_current("10.0.0.5", 2, None));
    }
}
