//! Wire schema and socket plumbing for the control surface.

pub mod messages;
pub mod publish_socket;
pub mod reply_socket;

pub use publish_socket::PublishSocket;
pub use reply_socket::ReplySocket;
