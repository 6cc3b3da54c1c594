pub mod class_file_loader;
pub mod class_names;
pub mod classes;
