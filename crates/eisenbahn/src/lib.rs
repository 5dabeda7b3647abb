pub mod config;
pub mod error;
pub mod fanout;
pub mod message;
pub mod messages;
pub mod pubsub;
pub mod reqrep;
pub mod traits;
pub mod transport;

pub use config::{EisenbahnConfig, EventsConfig, SiteConfig, TransportConfig};
pub use error::EisenbahnError;
pub use fanout::ZmqSiteRequester;
pub use message::Message;
pub use messages::events;
pub use messages::resources;
pub use messages::topics;
pub use pubsub::{ZmqPublisher, ZmqSubscriber};
pub use reqrep::{ReplyToken, ZmqRequestClient, ZmqRequestServer};
pub use traits::{
    EventPublisher, EventSubscriber, RequestHandler, RequestSender, SiteRequester, SiteResponses,
};
pub use transport::Transport;
