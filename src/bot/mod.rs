/// Command and message handlers
pub mod handlers;
/// Delivery of formatted replies
pub mod messaging;
