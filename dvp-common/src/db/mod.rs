//! Database bootstrap shared by the importer binaries and tests

pub mod init;

pub use init::init_database;
