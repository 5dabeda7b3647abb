//! Domain-specific message types for the eisenbahn messaging layer.
//!
//! - **Resource messages** (`resources`): check/cancel requests and site replies
//! - **Event messages** (`events`): job lifecycle notifications published via PUB/SUB
//! - **Topic constants** (`topics`): canonical topic strings for routing

pub mod events;
pub mod resources;
pub mod topics;

pub use events::*;
pub use resources::*;
