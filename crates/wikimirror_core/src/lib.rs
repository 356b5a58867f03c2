pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod export;
pub mod job;
pub mod mediawiki;
pub mod resolver;
pub mod summary;
pub mod title;
pub mod transform;
pub mod wikitext;
