use std::{collections::HashMap, error::Error, sync::Arc};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LoadClassFileError {
    /// There was an error in reading the file
    #[error("failed to read class file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("{0}")]
    Opaque(Box<dyn Error + Send + Sync>),
}

/// A source of class file bytes.
/// Note: Not exactly a class loader in the java sense, since there is only ever one defining
/// loader. This just finds the bytes.
pub trait ClassFileLoader: Send + Sync {
    /// Load the bytes of the class file with the given binary name, like `java/lang/Object`.
    /// Returns `Ok(None)` if this source does not have the class.
    fn load_class_file(&self, name: &str) -> Result<Option<Vec<u8>>, LoadClassFileError>;
}
impl<'a, T: ClassFileLoader + ?Sized> ClassFileLoader for &'a T {
    fn load_class_file(&self, name: &str) -> Result<Option<Vec<u8>>, LoadClassFileError> {
        <T as ClassFileLoader>::load_class_file(self, name)
    }
}
impl<T: ClassFileLoader + ?Sized> ClassFileLoader for Box<T> {
    fn load_class_file(&self, name: &str) -> Result<Option<Vec<u8>>, LoadClassFileError> {
        <T as ClassFileLoader>::load_class_file(self, name)
    }
}
impl<T: ClassFileLoader + ?Sized> ClassFileLoader for Arc<T> {
    fn load_class_file(&self, name: &str) -> Result<Option<Vec<u8>>, LoadClassFileError> {
        <T as ClassFileLoader>::load_class_file(self, name)
    }
}
impl ClassFileLoader for HashMap<String, Vec<u8>> {
    fn load_class_file(&self, name: &str) -> Result<Option<Vec<u8>>, LoadClassFileError> {
        Ok(self.get(name).cloned())
    }
}

/// Tries each loader in order, returning the first class file found
#[derive(Default)]
pub struct LoaderChain {
    loaders: Vec<Box<dyn ClassFileLoader>>,
}
impl LoaderChain {
    #[must_use]
    pub fn new() -> LoaderChain {
        LoaderChain::default()
    }

    pub fn push(&mut self, loader: impl ClassFileLoader + 'static) {
        self.loaders.push(Box::new(loader));
    }

    #[must_use]
    pub fn with(mut self, loader: impl ClassFileLoader + 'static) -> LoaderChain {
        self.push(loader);
        self
    }
}
impl ClassFileLoader for LoaderChain {
    fn load_class_file(&self, name: &str) -> Result<Option<Vec<u8>>, LoadClassFileError> {
        for loader in &self.loaders {
            if let Some(data) = loader.load_class_file(name)? {
                return Ok(Some(data));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{ClassFileLoader, LoaderChain};

    #[test]
    fn test_chain_order() {
        let mut first: HashMap<String, Vec<u8>> = HashMap::new();
        first.insert("A".to_owned(), vec![1]);
        let mut second: HashMap<String, Vec<u8>> = HashMap::new();
        second.insert("A".to_owned(), vec![2]);
        second.insert("B".to_owned(), vec![3]);

        let chain = LoaderChain::new().with(first).with(second);
        assert_eq!(chain.load_class_file("A").unwrap(), Some(vec![1]));
        assert_eq!(chain.load_class_file("B").unwrap(), Some(vec![3]));
        assert_eq!(chain.load_class_file("C").unwrap(), None);
    }
}
