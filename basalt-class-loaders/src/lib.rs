//! Sources of class files for the runtime: directories on disk, and class files held in memory.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
};

use basalt_base::{ClassFileLoader, LoadClassFileError};

/// Class path directories, searched in the order they were added.
/// `pkg/Name` is found at `<dir>/pkg/Name.class`.
#[derive(Debug, Default, Clone)]
pub struct ClassDirectories {
    directories: Vec<PathBuf>,
}
impl ClassDirectories {
    pub fn add(&mut self, path: &Path) -> std::io::Result<()> {
        self.directories.push(path.canonicalize()?);
        Ok(())
    }

    #[must_use]
    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    /// The first existing file at `rel_path` in the directories
    #[must_use]
    pub fn find_file(&self, rel_path: &Path) -> Option<PathBuf> {
        self.directories
            .iter()
            .map(|dir| dir.join(rel_path))
            .find(|path| path.is_file())
    }
}

impl ClassFileLoader for ClassDirectories {
    fn load_class_file(&self, name: &str) -> Result<Option<Vec<u8>>, LoadClassFileError> {
        let rel_path = match class_name_to_relative_path(name) {
            Some(rel_path) => rel_path,
            // Can't be on disk, like array classes
            None => return Ok(None),
        };

        match self.find_file(&rel_path) {
            Some(path) => {
                let data = std::fs::read(&path)?;
                tracing::info!("Read class file {}", path.display());
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }
}

/// The path of the class file for a binary name, relative to a class path directory.
/// Names with parts that could leave the directory have no path.
fn class_name_to_relative_path(name: &str) -> Option<PathBuf> {
    let mut parts = name.split('/').peekable();
    let mut path = PathBuf::new();
    while let Some(part) = parts.next() {
        if part.is_empty() || part == "." || part == ".." || part.contains(['\\', '[', ':']) {
            return None;
        }

        if parts.peek().is_some() {
            path.push(part);
        } else {
            path.push(format!("{}.class", part));
        }
    }
    Some(path)
}

/// Class files held in memory, keyed by binary name.
/// Classes can be added while a runtime is using the loader, through an `Arc`.
#[derive(Debug, Default)]
pub struct MemoryClassLoader {
    classes: RwLock<HashMap<String, Arc<[u8]>>>,
}
impl MemoryClassLoader {
    #[must_use]
    pub fn new() -> MemoryClassLoader {
        MemoryClassLoader::default()
    }

    /// Add a class file, returning whether it replaced one with the same name
    pub fn insert(&self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> bool {
        let data: Vec<u8> = data.into();
        let data: Arc<[u8]> = Arc::from(data);
        self.classes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), data)
            .is_some()
    }

    #[must_use]
    pub fn with(self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> MemoryClassLoader {
        self.insert(name, data);
        self
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
impl<N: Into<String>, D: Into<Vec<u8>>> FromIterator<(N, D)> for MemoryClassLoader {
    fn from_iter<T: IntoIterator<Item = (N, D)>>(iter: T) -> Self {
        let loader = MemoryClassLoader::new();
        for (name, data) in iter {
            loader.insert(name, data);
        }
        loader
    }
}
impl ClassFileLoader for MemoryClassLoader {
    fn load_class_file(&self, name: &str) -> Result<Option<Vec<u8>>, LoadClassFileError> {
        let classes = self.classes.read().unwrap_or_else(PoisonError::into_inner);
        Ok(classes.get(name).map(|data| data.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::Arc};

    use basalt_base::ClassFileLoader;

    use super::{class_name_to_relative_path, ClassDirectories, MemoryClassLoader};

    /// A fresh directory under the system temporary directory
    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "basalt-class-loaders-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            class_name_to_relative_path("java/lang/Object"),
            Some(PathBuf::from("java").join("lang").join("Object.class"))
        );
        assert_eq!(
            class_name_to_relative_path("Main"),
            Some(PathBuf::from("Main.class"))
        );
        assert_eq!(class_name_to_relative_path("../Main"), None);
        assert_eq!(class_name_to_relative_path("a//b"), None);
        assert_eq!(class_name_to_relative_path("/abs"), None);
        assert_eq!(class_name_to_relative_path("[I"), None);
    }

    #[test]
    fn test_class_directories() {
        let first = temp_dir("first");
        let second = temp_dir("second");
        std::fs::create_dir_all(first.join("pkg")).unwrap();
        std::fs::create_dir_all(second.join("pkg")).unwrap();
        std::fs::write(first.join("pkg").join("A.class"), [1u8]).unwrap();
        std::fs::write(second.join("pkg").join("A.class"), [2u8]).unwrap();
        std::fs::write(second.join("pkg").join("B.class"), [3u8]).unwrap();

        let mut dirs = ClassDirectories::default();
        dirs.add(&first).unwrap();
        dirs.add(&second).unwrap();
        assert_eq!(dirs.directories().len(), 2);

        assert_eq!(dirs.load_class_file("pkg/A").unwrap(), Some(vec![1]));
        assert_eq!(dirs.load_class_file("pkg/B").unwrap(), Some(vec![3]));
        assert_eq!(dirs.load_class_file("pkg/C").unwrap(), None);
        // Packages are directories, not class files
        assert_eq!(dirs.load_class_file("pkg").unwrap(), None);

        assert!(dirs.add(&first.join("missing")).is_err());

        let _ = std::fs::remove_dir_all(first);
        let _ = std::fs::remove_dir_all(second);
    }

    #[test]
    fn test_memory_loader() {
        let loader = Arc::new(MemoryClassLoader::new().with("A", vec![1u8]));
        assert_eq!(loader.load_class_file("A").unwrap(), Some(vec![1]));
        assert_eq!(loader.load_class_file("B").unwrap(), None);

        // Adding through a shared handle
        let shared = Arc::clone(&loader);
        assert!(!shared.insert("B", vec![2u8]));
        assert!(shared.insert("A", vec![3u8]));
        assert_eq!(loader.load_class_file("A").unwrap(), Some(vec![3]));
        assert_eq!(loader.len(), 2);
        assert!(loader.contains("B"));

        let collected: MemoryClassLoader = vec![("X", vec![4u8])].into_iter().collect();
        assert_eq!(collected.load_class_file("X").unwrap(), Some(vec![4]));
    }
}
