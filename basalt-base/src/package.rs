use indexmap::IndexSet;

use crate::id::PackageId;

/// The runtime packages of loaded classes.
/// Since there is a single defining loader, a runtime package is identified by its name alone.
#[derive(Debug, Clone, Default)]
pub struct Packages {
    packages: IndexSet<String>,
}
impl Packages {
    #[must_use]
    pub fn path_find(&self, name: &str) -> Option<PackageId> {
        self.packages
            .get_index_of(name)
            .map(|idx| PackageId::new_unchecked(idx as u32))
    }

    pub fn slice_path_create_if_needed(&mut self, name: &str) -> PackageId {
        if let Some(id) = self.path_find(name) {
            id
        } else {
            let (idx, _) = self.packages.insert_full(name.to_owned());
            PackageId::new_unchecked(idx as u32)
        }
    }

    /// The name of the package, like `java/lang`. The unnamed package is empty.
    #[must_use]
    pub fn name(&self, id: PackageId) -> Option<&str> {
        self.packages
            .iter()
            .enumerate()
            .find(|(idx, _)| PackageId::new_unchecked(*idx as u32) == id)
            .map(|(_, name)| name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}
