//! SNMPv2c client pieces used by the discovery engine
//!
//! This is not a general SNMP library. It covers exactly the query shapes
//! the engine needs: GET, GETNEXT, GETBULK and walks built on top of them.

pub mod ber;
pub mod mib;
pub mod oid;
pub mod session;
pub mod transport;

use crate::error::{ErrorStatus, SnmpError, SnmpResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

pub use oid::Oid;
pub use session::{BulkWalk, SnmpSession, Walk};
pub use transport::{Transport, UdpTransport};

/// Address of a single data item on a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Locator {
    /// `MODULE::name.index`, resolved through the MIB table
    Symbolic {
        module: Option<String>,
        name: String,
        index: Vec<u32>,
    },
    /// Raw numeric path
    Numeric(Oid),
}

impl Locator {
    pub fn symbolic(module: &str, name: &str) -> Self {
        Locator::Symbolic {
            module: Some(module.to_string()),
            name: name.to_string(),
            index: Vec::new(),
        }
    }

    pub fn numeric(oid: Oid) -> Self {
        Locator::Numeric(oid)
    }

    /// Same object with an instance index appended
    pub fn with_index(self, suffix: &[u32]) -> Self {
        match self {
            Locator::Symbolic { module, name, mut index } => {
                index.extend_from_slice(suffix);
                Locator::Symbolic { module, name, index }
            }
            Locator::Numeric(oid) => Locator::Numeric(oid.extend(suffix)),
        }
    }

    /// Resolve to the numeric OID that goes on the wire
    pub fn resolve(&self) -> SnmpResult<Oid> {
        match self {
            Locator::Numeric(oid) => Ok(oid.clone()),
            Locator::Symbolic { module, name, index } => {
                let base = match module {
                    Some(module) => mib::resolve(module, name),
                    None => mib::resolve_name(name),
                };
                base.map(|oid| oid.extend(index))
                    .ok_or_else(|| SnmpError::UnknownObject(self.to_string()))
            }
        }
    }
}

impl FromStr for Locator {
    type Err = SnmpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.trim_start_matches('.').chars().all(|c| c.is_ascii_digit() || c == '.') {
            return Ok(Locator::Numeric(s.parse()?));
        }

        let (module, rest) = match s.split_once("::") {
            Some((module, rest)) => (Some(module.to_string()), rest),
            None => (None, s),
        };

        let mut parts = rest.split('.');
        let name = parts.next().unwrap_or_default().to_string();
        if name.is_empty() {
            return Err(SnmpError::UnknownObject(s.to_string()));
        }
        let index = parts
            .map(|arc| {
                arc.parse::<u32>()
                    .map_err(|_| SnmpError::Decode(format!("invalid index '{}' in '{}'", arc, s)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Locator::Symbolic { module, name, index })
    }
}

impl TryFrom<String> for Locator {
    type Error = SnmpError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Locator> for String {
    fn from(locator: Locator) -> Self {
        locator.to_string()
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Numeric(oid) => write!(f, "{}", oid),
            Locator::Symbolic { module, name, index } => {
                if let Some(module) = module {
                    write!(f, "{}::", module)?;
                }
                write!(f, "{}", name)?;
                for arc in index {
                    write!(f, ".{}", arc)?;
                }
                Ok(())
            }
        }
    }
}

/// Values an agent can return in a varbind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    ObjectId(Oid),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl Value {
    /// The three SNMPv2 exception values
    pub fn is_exception(&self) -> bool {
        matches!(self, Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView)
    }

    /// Textual rendering used for stored attributes
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::OctetString(bytes) | Value::Opaque(bytes) => {
                Some(String::from_utf8_lossy(bytes).trim_end_matches('\0').trim().to_string())
            }
            Value::Integer(v) => Some(v.to_string()),
            Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => Some(v.to_string()),
            Value::Counter64(v) => Some(v.to_string()),
            Value::ObjectId(oid) => Some(oid.to_string()),
            Value::IpAddress(octets) => Some(Ipv4Addr::from(*octets).to_string()),
            Value::Null | Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView => None,
        }
    }

    /// Numeric rendering (speeds, counters)
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Integer(v) if *v >= 0 => Some(*v as u64),
            Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => Some(*v as u64),
            Value::Counter64(v) => Some(*v),
            Value::OctetString(bytes) => String::from_utf8_lossy(bytes).trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::NoSuchObject => f.write_str("noSuchObject"),
            Value::NoSuchInstance => f.write_str("noSuchInstance"),
            Value::EndOfMibView => f.write_str("endOfMibView"),
            Value::Null => f.write_str("NULL"),
            other => f.write_str(&other.as_text().unwrap_or_default()),
        }
    }
}

/// One `(oid, value)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarBind {
    pub oid: Oid,
    pub value: Value,
}

impl VarBind {
    pub fn new(oid: Oid, value: Value) -> Self {
        Self { oid, value }
    }

    pub fn null(oid: Oid) -> Self {
        Self { oid, value: Value::Null }
    }
}

/// PDU kinds the engine sends or receives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduType {
    Get,
    GetNext,
    GetBulk,
    Response,
}

impl PduType {
    pub fn tag(&self) -> u8 {
        match self {
            PduType::Get => 0xA0,
            PduType::GetNext => 0xA1,
            PduType::Response => 0xA2,
            PduType::GetBulk => 0xA5,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0xA0 => Some(PduType::Get),
            0xA1 => Some(PduType::GetNext),
            0xA2 => Some(PduType::Response),
            0xA5 => Some(PduType::GetBulk),
            _ => None,
        }
    }
}

/// A request as handed to a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub pdu_type: PduType,
    pub oids: Vec<Oid>,
    pub non_repeaters: u32,
    pub max_repetitions: u32,
}

impl Request {
    pub fn get(oid: Oid) -> Self {
        Self {
            pdu_type: PduType::Get,
            oids: vec![oid],
            non_repeaters: 0,
            max_repetitions: 0,
        }
    }

    pub fn get_next(oid: Oid) -> Self {
        Self {
            pdu_type: PduType::GetNext,
            oids: vec![oid],
            non_repeaters: 0,
            max_repetitions: 0,
        }
    }

    pub fn get_bulk(oid: Oid, max_repetitions: u32) -> Self {
        Self {
            pdu_type: PduType::GetBulk,
            oids: vec![oid],
            non_repeaters: 0,
            max_repetitions,
        }
    }
}

/// A decoded response PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub error_status: ErrorStatus,
    pub error_index: u32,
    pub varbinds: Vec<VarBind>,
}

impl Response {
    pub fn ok(varbinds: Vec<VarBind>) -> Self {
        Self {
            error_status: ErrorStatus::NoError,
            error_index: 0,
            varbinds,
        }
    }

    pub fn error(status: ErrorStatus, index: u32) -> Self {
        Self {
            error_status: status,
            error_index: index,
            varbinds: Vec::new(),
        }
    }
}

/// Three-way result of one protocol call
///
/// `Empty` is a soft failure (no such object, agent error status) and
/// `Failed` a transport failure; both mean "absent" for this call only.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Value(T),
    Empty,
    Failed(SnmpError),
}

impl<T> Outcome<T> {
    pub fn value(self) -> Option<T> {
        match self {
            Outcome::Value(v) => Some(v),
            _ => None,
        }
    }
}
