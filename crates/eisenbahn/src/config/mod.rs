//! `eisenbahn.toml`: where sites listen and where job events are published.

mod loading;
mod types;
mod validation;


pub use types::{EisenbahnConfig, EventsConfig, SiteConfig, TransportConfig};
