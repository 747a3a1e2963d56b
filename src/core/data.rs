use bytes::Bytes;

use super::frame::WsFrame;

/// Application payload carried by a websocket connection: UTF-8 text or opaque
/// bytes.
///
/// This is the payload surface consumers see; framing details (ping/pong,
/// close) stay below it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsData {
    Text(String),
    Binary(Bytes),
}

impl WsData {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            WsData::Text(text) => Some(text.as_str()),
            WsData::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            WsData::Text(text) => text.as_bytes(),
            WsData::Binary(bytes) => bytes.as_ref(),
        }
    }

    pub(crate) fn into_frame(self) -> WsFrame {
        match self {
            WsData::Text(text) => WsFrame::Text(Bytes::from(text)),
            WsData::Binary(bytes) => WsFrame::Binary(bytes),
        }
    }
}

impl From<&str> for WsData {
    fn from(value: &str) -> Self {
        WsData::Text(value.to_string())
    }
}

impl From<String> for WsData {
    fn from(value: String) -> Self {
        WsData::Text(value)
    }
}

impl From<Vec<u8>> for WsData {
    fn from(value: Vec<u8>) -> Self {
        WsData::Binary(Bytes::from(value))
    }
}

impl From<Bytes> for WsData {
    fn from(value: Bytes) -> Self {
        WsData::Binary(value)
    }
}

impl From<&[u8]> for WsData {
    fn from(value: &[u8]) -> Self {
        WsData::Binary(Bytes::copy_from_slice(value))
    }
}

impl PartialEq<&str> for WsData {
    fn eq(&self, other: &&str) -> bool {
        self.as_text() == Some(*other)
    }
}

/// Project a raw frame onto the payload surface. Ping/pong and close frames
/// carry no application data.
pub(crate) fn data_from_frame(frame: WsFrame) -> Option<WsData> {
    match frame {
        WsFrame::Text(bytes) => Some(match String::from_utf8(bytes.to_vec()) {
            Ok(text) => WsData::Text(text),
            // A transport that hands us non-UTF-8 text is out of contract;
            // degrade to binary rather than dropping the payload.
            Err(err) => WsData::Binary(Bytes::from(err.into_bytes())),
        }),
        WsFrame::Binary(bytes) => Some(WsData::Binary(bytes)),
        WsFrame::Ping(_) | WsFrame::Pong(_) | WsFrame::Close(_) => None,
    }
}
