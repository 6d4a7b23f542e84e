//! Physical asset entities: modules, enclosures, and servers.

pub mod module;
pub mod server;

pub use module::Module;
pub use server::{Enclosure, Server};
