pub mod categories;
pub mod category_graph;
pub mod config;
pub mod curation;
pub mod dates;
pub mod license;
pub mod malformed;
pub mod mapping;
pub mod markup;
pub mod mediawiki;
pub mod progress;
pub mod template;
pub mod title;
