use crate::{Error, Result};
use bytes::{Buf, BufMut};
use std::fmt;

/// Whether a message carries a request or a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SipMessageType {
    Request = 0,
    Response = 1,
    Invalid = 2,
}

impl SipMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SipMessageType::Request => "Request",
            SipMessageType::Response => "Response",
            SipMessageType::Invalid => "Invalid",
        }
    }

    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(SipMessageType::Request),
            1 => Ok(SipMessageType::Response),
            2 => Ok(SipMessageType::Invalid),
            other => Err(Error::Codec(format!("unknown message type {}", other))),
        }
    }
}

impl fmt::Display for SipMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request method.  Only meaningful when the message type is `Request`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SipMethod {
    Invite = 0,
    Bye = 1,
    Ack = 2,
    Cancel = 3,
    Invalid = 4,
}

impl SipMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SipMethod::Invite => "INVITE",
            SipMethod::Bye => "BYE",
            SipMethod::Ack => "ACK",
            SipMethod::Cancel => "CANCEL",
            SipMethod::Invalid => "Invalid",
        }
    }

    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(SipMethod::Invite),
            1 => Ok(SipMethod::Bye),
            2 => Ok(SipMethod::Ack),
            3 => Ok(SipMethod::Cancel),
            4 => Ok(SipMethod::Invalid),
            other => Err(Error::Codec(format!("unknown method {}", other))),
        }
    }
}

impl fmt::Display for SipMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-readable form of the status codes the engine works with.
pub fn status_code_to_string(status_code: u16) -> &'static str {
    match status_code {
        100 => "100 Trying",
        200 => "200 OK",
        408 => "408 Request Timeout",
        _ => "Unknown",
    }
}

/// Wire header prepended to every signaling message.
///
/// Fixed big-endian layout: message type (u8), method (u8), status code
/// (u16), request URI (u32), from (u32), to (u32), call id (u16).
/// The method field is meaningful only for requests and the status code
/// only for responses; the unused field is serialized as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SipHeader {
    pub message_type: SipMessageType,
    pub method: SipMethod,
    pub status_code: u16,
    pub request_uri: u32,
    pub from: u32,
    pub to: u32,
    pub call_id: u16,
}

impl SipHeader {
    /// Encoded size in bytes; the layout is fixed.
    pub const SERIALIZED_SIZE: usize = 18;

    pub fn request(method: SipMethod, request_uri: u32, from: u32, to: u32, call_id: u16) -> Self {
        SipHeader {
            message_type: SipMessageType::Request,
            method,
            status_code: 0,
            request_uri,
            from,
            to,
            call_id,
        }
    }

    pub fn response(status_code: u16, from: u32, to: u32, call_id: u16) -> Self {
        SipHeader {
            message_type: SipMessageType::Response,
            method: SipMethod::Invalid,
            status_code,
            request_uri: 0,
            from,
            to,
            call_id,
        }
    }

    pub fn serialized_size(&self) -> usize {
        Self::SERIALIZED_SIZE
    }

    pub fn serialize(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.message_type as u8);
        buf.put_u8(self.method as u8);
        buf.put_u16(self.status_code);
        buf.put_u32(self.request_uri);
        buf.put_u32(self.from);
        buf.put_u32(self.to);
        buf.put_u16(self.call_id);
    }

    /// Decode a header, consuming exactly [`Self::SERIALIZED_SIZE`] bytes.
    ///
    /// Fails closed: short buffers and unknown discriminants are rejected
    /// rather than decoded best-effort.
    pub fn deserialize(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < Self::SERIALIZED_SIZE {
            return Err(Error::Codec(format!(
                "buffer too short for header: {} < {}",
                buf.remaining(),
                Self::SERIALIZED_SIZE
            )));
        }
        let message_type = SipMessageType::from_u8(buf.get_u8())?;
        let method = SipMethod::from_u8(buf.get_u8())?;
        Ok(SipHeader {
            message_type,
            method,
            status_code: buf.get_u16(),
            request_uri: buf.get_u32(),
            from: buf.get_u32(),
            to: buf.get_u32(),
            call_id: buf.get_u16(),
        })
    }
}

impl fmt::Display for SipHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message_type {
            SipMessageType::Request => {
                write!(
                    f,
                    "{} {} RequestUri={} ",
                    self.message_type, self.method, self.request_uri
                )?;
            }
            SipMessageType::Response => {
                write!(
                    f,
                    "{} {} ",
                    self.message_type,
                    status_code_to_string(self.status_code)
                )?;
            }
            SipMessageType::Invalid => {}
        }
        write!(
            f,
            "From={} To={} CallId={}",
            self.from, self.to, self.call_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn round_trip_request() {
        let header = SipHeader::request(SipMethod::Invite, 3, 1, 2, 7);
        let mut buf = BytesMut::new();
        header.serialize(&mut buf);
        assert_eq!(buf.len(), SipHeader::SERIALIZED_SIZE);
        let decoded = SipHeader::deserialize(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn round_trip_response() {
        let header = SipHeader::response(200, 1, 2, 7);
        let mut buf = BytesMut::new();
        header.serialize(&mut buf);
        let decoded = SipHeader::deserialize(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.status_code, 200);
        assert_eq!(decoded.method, SipMethod::Invalid);
    }

    #[test]
    fn round_trip_extremes() {
        let header = SipHeader::request(SipMethod::Cancel, u32::MAX, u32::MAX, 0, u16::MAX);
        let mut buf = BytesMut::new();
        header.serialize(&mut buf);
        let decoded = SipHeader::deserialize(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn short_buffer_rejected() {
        let header = SipHeader::request(SipMethod::Bye, 3, 1, 2, 7);
        let mut buf = BytesMut::new();
        header.serialize(&mut buf);
        let mut truncated = buf.freeze().slice(0..10);
        assert!(matches!(
            SipHeader::deserialize(&mut truncated),
            Err(Error::Codec(_))
        ));
    }

    #[test]
    fn unknown_discriminant_rejected() {
        let mut buf = BytesMut::new();
        SipHeader::request(SipMethod::Invite, 3, 1, 2, 7).serialize(&mut buf);
        buf[0] = 9;
        assert!(matches!(
            SipHeader::deserialize(&mut buf.freeze()),
            Err(Error::Codec(_))
        ));
    }

    #[test]
    fn display_forms() {
        let req = SipHeader::request(SipMethod::Invite, 3, 1, 2, 7);
        assert_eq!(
            req.to_string(),
            "Request INVITE RequestUri=3 From=1 To=2 CallId=7"
        );
        let resp = SipHeader::response(100, 2, 1, 7);
        assert_eq!(resp.to_string(), "Response 100 Trying From=2 To=1 CallId=7");
    }
}
