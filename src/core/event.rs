use super::data::WsData;
use super::types::WsError;

/// Normalized client-side connection event.
///
/// Events are delivered to a single callback in the exact order the transport
/// raised them. `Opened` fires at most once and always before any
/// `DataReceived`; `Closed` is the sole terminal event and nothing follows it.
/// A connection that fails before ever opening reports `Error`, not `Closed`.
#[derive(Debug, PartialEq)]
pub enum WsEvent {
    /// The connection became usable for sending.
    Opened,
    /// Inbound application data.
    DataReceived { data: WsData },
    /// Non-terminal failure; the socket may or may not still be usable.
    Error { error: WsError },
    /// Terminal. `error` is `None` for a clean shutdown.
    Closed { error: Option<WsError> },
}
