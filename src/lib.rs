//! Linkmine: recover shared video links from a local message database.
//!
//! Rows come from [`store`], attributed bodies are decoded by [`archive`],
//! links are found and canonicalized by [`links`], and [`pipeline`] merges
//! everything into a [`registry::LinkRegistry`].

pub mod archive;
pub mod links;
pub mod output;
pub mod pipeline;
pub mod registry;
pub mod settings;
pub mod store;
pub mod timestamp;
