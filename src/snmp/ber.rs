//! SNMPv2c message encoding and decoding (BER subset)
//!
//! Only the universal and application types that appear in SNMPv2c
//! GET/GETNEXT/GETBULK exchanges are handled.

use crate::error::{ErrorStatus, SnmpError, SnmpResult};
use crate::snmp::{Oid, PduType, Request, Response, Value, VarBind};

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_IP_ADDRESS: u8 = 0x40;
const TAG_COUNTER32: u8 = 0x41;
const TAG_GAUGE32: u8 = 0x42;
const TAG_TIMETICKS: u8 = 0x43;
const TAG_OPAQUE: u8 = 0x44;
const TAG_COUNTER64: u8 = 0x46;
const TAG_NO_SUCH_OBJECT: u8 = 0x80;
const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
const TAG_END_OF_MIB_VIEW: u8 = 0x82;

/// SNMP version field value for v2c
pub const VERSION_2C: i64 = 1;

/// A fully decoded SNMP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub version: i64,
    pub community: Vec<u8>,
    pub pdu_type: PduType,
    pub request_id: i32,
    /// error-status, or non-repeaters for GETBULK
    pub field2: i64,
    /// error-index, or max-repetitions for GETBULK
    pub field3: i64,
    pub varbinds: Vec<VarBind>,
}

impl Message {
    /// Interpret this message as a response PDU
    pub fn into_response(self) -> SnmpResult<Response> {
        if self.pdu_type != PduType::Response {
            return Err(SnmpError::Decode(format!(
                "expected a response PDU, got {:?}",
                self.pdu_type
            )));
        }

        Ok(Response {
            error_status: ErrorStatus::from_code(self.field2),
            error_index: u32::try_from(self.field3).unwrap_or(0),
            varbinds: self.varbinds,
        })
    }

    /// Interpret this message as a request (used by simulated agents)
    pub fn into_request(self) -> SnmpResult<Request> {
        if self.pdu_type == PduType::Response {
            return Err(SnmpError::Decode("expected a request PDU".to_string()));
        }

        let (non_repeaters, max_repetitions) = if self.pdu_type == PduType::GetBulk {
            (
                u32::try_from(self.field2).unwrap_or(0),
                u32::try_from(self.field3).unwrap_or(0),
            )
        } else {
            (0, 0)
        };

        Ok(Request {
            pdu_type: self.pdu_type,
            oids: self.varbinds.into_iter().map(|vb| vb.oid).collect(),
            non_repeaters,
            max_repetitions,
        })
    }
}

/// Builder for outgoing SNMPv2c messages
pub struct MessageBuilder {
    community: Vec<u8>,
    request_id: i32,
}

impl MessageBuilder {
    pub fn new(community: &str) -> Self {
        Self {
            community: community.as_bytes().to_vec(),
            request_id: 0,
        }
    }

    pub fn request_id(mut self, request_id: i32) -> Self {
        self.request_id = request_id;
        self
    }

    /// Encode a request; every requested OID is sent with a NULL value
    pub fn build_request(&self, request: &Request) -> SnmpResult<Vec<u8>> {
        let (field2, field3) = match request.pdu_type {
            PduType::GetBulk => (request.non_repeaters as i64, request.max_repetitions as i64),
            PduType::Response => {
                return Err(SnmpError::Encode("a response is not a request".to_string()))
            }
            _ => (0, 0),
        };
        let varbinds: Vec<VarBind> = request.oids.iter().cloned().map(VarBind::null).collect();
        self.build(request.pdu_type, field2, field3, &varbinds)
    }

    /// Encode a response PDU
    pub fn build_response(&self, response: &Response) -> SnmpResult<Vec<u8>> {
        self.build(
            PduType::Response,
            response.error_status.code(),
            response.error_index as i64,
            &response.varbinds,
        )
    }

    fn build(&self, pdu_type: PduType, field2: i64, field3: i64, varbinds: &[VarBind]) -> SnmpResult<Vec<u8>> {
        let mut vb_list = Vec::new();
        for vb in varbinds {
            let mut pair = Vec::new();
            encode_oid(&vb.oid, &mut pair)?;
            encode_value(&vb.value, &mut pair)?;
            encode_tlv(TAG_SEQUENCE, &pair, &mut vb_list);
        }

        let mut pdu = Vec::new();
        encode_integer(TAG_INTEGER, self.request_id as i64, &mut pdu);
        encode_integer(TAG_INTEGER, field2, &mut pdu);
        encode_integer(TAG_INTEGER, field3, &mut pdu);
        encode_tlv(TAG_SEQUENCE, &vb_list, &mut pdu);

        let mut body = Vec::new();
        encode_integer(TAG_INTEGER, VERSION_2C, &mut body);
        encode_tlv(TAG_OCTET_STRING, &self.community, &mut body);
        encode_tlv(pdu_type.tag(), &pdu, &mut body);

        let mut message = Vec::with_capacity(body.len() + 4);
        encode_tlv(TAG_SEQUENCE, &body, &mut message);
        Ok(message)
    }
}

/// Append a BER length
pub fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}

fn encode_tlv(tag: u8, content: &[u8], out: &mut Vec<u8>) {
    out.push(tag);
    encode_length(content.len(), out);
    out.extend_from_slice(content);
}

fn encode_integer(tag: u8, value: i64, out: &mut Vec<u8>) {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    // Drop redundant sign bytes
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    encode_tlv(tag, &bytes[start..], out);
}

fn encode_unsigned(tag: u8, value: u64, out: &mut Vec<u8>) {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(bytes.len() - 1);
    let mut content = Vec::with_capacity(9);
    if bytes[skip] & 0x80 != 0 {
        content.push(0);
    }
    content.extend_from_slice(&bytes[skip..]);
    encode_tlv(tag, &content, out);
}

fn encode_oid(oid: &Oid, out: &mut Vec<u8>) -> SnmpResult<()> {
    let arcs = oid.arcs();
    if arcs.len() < 2 || arcs[0] > 2 || (arcs[0] < 2 && arcs[1] >= 40) {
        return Err(SnmpError::Encode(format!("cannot encode OID {}", oid)));
    }

    let mut content = Vec::new();
    push_base128(arcs[0] as u64 * 40 + arcs[1] as u64, &mut content);
    for arc in &arcs[2..] {
        push_base128(*arc as u64, &mut content);
    }
    encode_tlv(TAG_OID, &content, out);
    Ok(())
}

fn push_base128(mut value: u64, out: &mut Vec<u8>) {
    let mut tmp = [0u8; 10];
    let mut i = tmp.len();
    loop {
        i -= 1;
        tmp[i] = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    let last = tmp.len() - 1;
    for (pos, byte) in tmp.iter().enumerate().skip(i) {
        out.push(if pos == last { *byte } else { byte | 0x80 });
    }
}

fn encode_value(value: &Value, out: &mut Vec<u8>) -> SnmpResult<()> {
    match value {
        Value::Integer(v) => encode_integer(TAG_INTEGER, *v, out),
        Value::OctetString(bytes) => encode_tlv(TAG_OCTET_STRING, bytes, out),
        Value::Null => encode_tlv(TAG_NULL, &[], out),
        Value::ObjectId(oid) => encode_oid(oid, out)?,
        Value::IpAddress(octets) => encode_tlv(TAG_IP_ADDRESS, octets, out),
        Value::Counter32(v) => encode_unsigned(TAG_COUNTER32, *v as u64, out),
        Value::Gauge32(v) => encode_unsigned(TAG_GAUGE32, *v as u64, out),
        Value::TimeTicks(v) => encode_unsigned(TAG_TIMETICKS, *v as u64, out),
        Value::Opaque(bytes) => encode_tlv(TAG_OPAQUE, bytes, out),
        Value::Counter64(v) => encode_unsigned(TAG_COUNTER64, *v, out),
        Value::NoSuchObject => encode_tlv(TAG_NO_SUCH_OBJECT, &[], out),
        Value::NoSuchInstance => encode_tlv(TAG_NO_SUCH_INSTANCE, &[], out),
        Value::EndOfMibView => encode_tlv(TAG_END_OF_MIB_VIEW, &[], out),
    }
    Ok(())
}

/// Cursor over a BER buffer
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn byte(&mut self) -> SnmpResult<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| SnmpError::Decode("unexpected end of message".to_string()))?;
        self.pos += 1;
        Ok(b)
    }

    fn length(&mut self) -> SnmpResult<usize> {
        let first = self.byte()?;
        if first < 0x80 {
            return Ok(first as usize);
        }
        let count = (first & 0x7F) as usize;
        if count == 0 || count > 4 {
            return Err(SnmpError::Decode(format!("unsupported length form 0x{:02x}", first)));
        }
        let mut len = 0usize;
        for _ in 0..count {
            len = (len << 8) | self.byte()? as usize;
        }
        Ok(len)
    }

    /// Read one TLV, returning its tag and content
    fn tlv(&mut self) -> SnmpResult<(u8, &'a [u8])> {
        let tag = self.byte()?;
        let len = self.length()?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| SnmpError::Decode(format!("length {} overruns message", len)))?;
        let content = &self.buf[self.pos..end];
        self.pos = end;
        Ok((tag, content))
    }

    fn expect(&mut self, expected: u8) -> SnmpResult<&'a [u8]> {
        let (tag, content) = self.tlv()?;
        if tag != expected {
            return Err(SnmpError::Decode(format!(
                "expected tag 0x{:02x}, found 0x{:02x}",
                expected, tag
            )));
        }
        Ok(content)
    }

    fn integer(&mut self) -> SnmpResult<i64> {
        decode_integer(self.expect(TAG_INTEGER)?)
    }
}

fn decode_integer(content: &[u8]) -> SnmpResult<i64> {
    if content.is_empty() || content.len() > 8 {
        return Err(SnmpError::Decode(format!("bad integer length {}", content.len())));
    }
    let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for b in content {
        value = (value << 8) | *b as i64;
    }
    Ok(value)
}

fn decode_unsigned(content: &[u8]) -> SnmpResult<u64> {
    let trimmed = match content {
        [0, rest @ ..] if !rest.is_empty() => rest,
        other => other,
    };
    if trimmed.is_empty() || trimmed.len() > 8 {
        return Err(SnmpError::Decode(format!("bad unsigned length {}", content.len())));
    }
    Ok(trimmed.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
}

fn decode_u32(content: &[u8]) -> SnmpResult<u32> {
    let value = decode_unsigned(content)?;
    u32::try_from(value).map_err(|_| SnmpError::Decode(format!("value {} exceeds 32 bits", value)))
}

fn decode_oid(content: &[u8]) -> SnmpResult<Oid> {
    if content.is_empty() {
        return Err(SnmpError::Decode("empty OID".to_string()));
    }

    let mut subids = Vec::new();
    let mut current: u64 = 0;
    for (i, b) in content.iter().enumerate() {
        current = (current << 7) | (b & 0x7F) as u64;
        if current > u32::MAX as u64 * 40 {
            return Err(SnmpError::Decode("OID arc overflow".to_string()));
        }
        if b & 0x80 == 0 {
            subids.push(current);
            current = 0;
        } else if i == content.len() - 1 {
            return Err(SnmpError::Decode("truncated OID arc".to_string()));
        }
    }

    let first = subids[0];
    let (a, b) = match first {
        0..=39 => (0, first),
        40..=79 => (1, first - 40),
        _ => (2, first - 80),
    };

    let mut arcs = Vec::with_capacity(subids.len() + 1);
    arcs.push(a as u32);
    arcs.push(u32::try_from(b).map_err(|_| SnmpError::Decode("OID arc overflow".to_string()))?);
    for sub in &subids[1..] {
        arcs.push(u32::try_from(*sub).map_err(|_| SnmpError::Decode("OID arc overflow".to_string()))?);
    }
    Ok(Oid::new(arcs))
}

fn decode_value(tag: u8, content: &[u8]) -> SnmpResult<Value> {
    Ok(match tag {
        TAG_INTEGER => Value::Integer(decode_integer(content)?),
        TAG_OCTET_STRING => Value::OctetString(content.to_vec()),
        TAG_NULL => Value::Null,
        TAG_OID => Value::ObjectId(decode_oid(content)?),
        TAG_IP_ADDRESS => {
            let octets: [u8; 4] = content
                .try_into()
                .map_err(|_| SnmpError::Decode("IpAddress must be 4 octets".to_string()))?;
            Value::IpAddress(octets)
        }
        TAG_COUNTER32 => Value::Counter32(decode_u32(content)?),
        TAG_GAUGE32 => Value::Gauge32(decode_u32(content)?),
        TAG_TIMETICKS => Value::TimeTicks(decode_u32(content)?),
        TAG_OPAQUE => Value::Opaque(content.to_vec()),
        TAG_COUNTER64 => Value::Counter64(decode_unsigned(content)?),
        TAG_NO_SUCH_OBJECT => Value::NoSuchObject,
        TAG_NO_SUCH_INSTANCE => Value::NoSuchInstance,
        TAG_END_OF_MIB_VIEW => Value::EndOfMibView,
        other => return Err(SnmpError::Decode(format!("unsupported value tag 0x{:02x}", other))),
    })
}

/// Decode a complete SNMP message
pub fn decode_message(bytes: &[u8]) -> SnmpResult<Message> {
    let mut outer = Reader::new(bytes);
    let mut body = Reader::new(outer.expect(TAG_SEQUENCE)?);

    let version = body.integer()?;
    let community = body.expect(TAG_OCTET_STRING)?.to_vec();

    let (pdu_tag, pdu_content) = body.tlv()?;
    let pdu_type = PduType::from_tag(pdu_tag)
        .ok_or_else(|| SnmpError::Decode(format!("unsupported PDU tag 0x{:02x}", pdu_tag)))?;

    let mut pdu = Reader::new(pdu_content);
    let request_id = pdu.integer()?;
    let field2 = pdu.integer()?;
    let field3 = pdu.integer()?;

    let mut list = Reader::new(pdu.expect(TAG_SEQUENCE)?);
    let mut varbinds = Vec::new();
    while !list.is_empty() {
        let mut pair = Reader::new(list.expect(TAG_SEQUENCE)?);
        let oid = decode_oid(pair.expect(TAG_OID)?)?;
        let (tag, content) = pair.tlv()?;
        varbinds.push(VarBind::new(oid, decode_value(tag, content)?));
    }

    Ok(Message {
        version,
        community,
        pdu_type,
        request_id: i32::try_from(request_id)
            .map_err(|_| SnmpError::Decode(format!("request-id {} out of range", request_id)))?,
        field2,
        field3,
        varbinds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn oid(s: &str) -> Oid {
        s.parse().unwrap()
    }

    #[test]
    fn test_sys_descr_get_matches_reference_bytes() {
        // GetRequest, community "public", request-id 0x12345678, sysDescr.0
        let expected: [u8; 43] = [
            0x30, 0x29, 0x02, 0x01, 0x01, 0x04, 0x06, 0x70, 0x75, 0x62, 0x6c, 0x69, 0x63, 0xA0,
            0x1C, 0x02, 0x04, 0x12, 0x34, 0x56, 0x78, 0x02, 0x01, 0x00, 0x02, 0x01, 0x00, 0x30,
            0x0E, 0x30, 0x0C, 0x06, 0x08, 0x2B, 0x06, 0x01, 0x02, 0x01, 0x01, 0x01, 0x00, 0x05,
            0x00,
        ];
        let bytes = MessageBuilder::new("public")
            .request_id(0x12345678)
            .build_request(&Request::get(oid("1.3.6.1.2.1.1.1.0")))
            .unwrap();
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_response_decoding() {
        let response = Response::ok(vec![
            VarBind::new(oid("1.3.6.1.2.1.1.1.0"), Value::OctetString(b"SwitchOS v1.2".to_vec())),
            VarBind::new(oid("1.3.6.1.2.1.31.1.1.1.15.3"), Value::Gauge32(10_000)),
            VarBind::new(oid("1.3.6.1.2.1.1.3.0"), Value::TimeTicks(u32::MAX)),
            VarBind::new(oid("1.3.6.1.2.1.2.2.1.7.1"), Value::Integer(-129)),
            VarBind::new(oid("1.3.6.1.2.1.1.9.0"), Value::NoSuchInstance),
            VarBind::new(oid("1.3.6.1.2.1.4.20.1.1.10.0.0.1"), Value::IpAddress([10, 0, 0, 1])),
            VarBind::new(oid("1.3.6.1.2.1.31.1.1.1.6.1"), Value::Counter64(u64::MAX)),
        ]);
        let bytes = MessageBuilder::new("ro")
            .request_id(-7)
            .build_response(&response)
            .unwrap();

        let message = decode_message(&bytes).unwrap();
        assert_eq!(message.version, VERSION_2C);
        assert_eq!(message.community, b"ro");
        assert_eq!(message.request_id, -7);
        assert_eq!(message.into_response().unwrap(), response);
    }

    #[test]
    fn test_bulk_request_fields() {
        let request = Request::get_bulk(oid("1.3.6.1.2.1.31.1.1.1.18"), 50);
        let bytes = MessageBuilder::new("public").request_id(1).build_request(&request).unwrap();
        let decoded = decode_message(&bytes).unwrap();
        assert_eq!(decoded.pdu_type, PduType::GetBulk);
        assert_eq!(decoded.into_request().unwrap(), request);
    }

    #[test]
    fn test_error_status_survives() {
        let response = Response::error(ErrorStatus::NoSuchName, 1);
        let bytes = MessageBuilder::new("public").build_response(&response).unwrap();
        let decoded = decode_message(&bytes).unwrap().into_response().unwrap();
        assert_eq!(decoded.error_status, ErrorStatus::NoSuchName);
        assert_eq!(decoded.error_index, 1);
    }

    #[test]
    fn test_truncated_message_is_rejected() {
        let bytes = MessageBuilder::new("public")
            .build_request(&Request::get(oid("1.3.6.1.2.1.1.1.0")))
            .unwrap();
        assert!(decode_message(&bytes[..bytes.len() - 3]).is_err());
        assert!(decode_message(&[]).is_err());
    }

    #[test]
    fn test_oid_arc_encoding() {
        let big = oid("1.3.6.1.4.1.2011.2.23.4294967295");
        let mut out = Vec::new();
        encode_oid(&big, &mut out).unwrap();
        assert_eq!(decode_oid(&out[2..]).unwrap(), big);

        let mut bad = Vec::new();
        assert!(encode_oid(&oid("5.1"), &mut bad).is_err());
    }

    proptest! {
        #[test]
        fn prop_length_encoding_is_readable(len in 0usize..10_000_000) {
            let mut out = Vec::new();
            encode_length(len, &mut out);
            let mut reader = Reader::new(&out);
            prop_assert_eq!(reader.length().unwrap(), len);
            prop_assert!(reader.is_empty());
        }
    }
}
