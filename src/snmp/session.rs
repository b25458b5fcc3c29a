//! Per-device protocol session: GET, GETNEXT, GETBULK and walks

use crate::error::SnmpError;
use crate::snmp::transport::Transport;
use crate::snmp::{Locator, Oid, Outcome, Request, Response, Value};
use std::collections::VecDeque;
use std::net::IpAddr;

/// Default GETBULK page size
pub const DEFAULT_MAX_REPETITIONS: u32 = 50;
/// Default bound on GETBULK round trips per walk
pub const DEFAULT_MAX_CALLS: u32 = 10;

/// A conversation with one agent over a borrowed transport
pub struct SnmpSession<'a> {
    transport: &'a mut dyn Transport,
    target: IpAddr,
    community: &'a str,
    max_calls: u32,
}

impl<'a> SnmpSession<'a> {
    pub fn new(transport: &'a mut dyn Transport, target: IpAddr, community: &'a str) -> Self {
        Self {
            transport,
            target,
            community,
            max_calls: DEFAULT_MAX_CALLS,
        }
    }

    /// Bound the number of GETBULK round trips of one bulk walk
    pub fn with_max_calls(mut self, max_calls: u32) -> Self {
        self.max_calls = max_calls.max(1);
        self
    }

    pub fn target(&self) -> IpAddr {
        self.target
    }

    /// Single GET
    pub fn get(&mut self, locator: &Locator) -> Outcome<Value> {
        let oid = match self.resolve(locator) {
            Some(oid) => oid,
            None => return Outcome::Empty,
        };

        match self.send(&Request::get(oid)) {
            Outcome::Value(response) => match response.varbinds.into_iter().next() {
                Some(vb) if !vb.value.is_exception() => Outcome::Value(vb.value),
                Some(vb) => {
                    log::debug!("{}: {} returned {}", self.target, locator, vb.value);
                    Outcome::Empty
                }
                None => Outcome::Empty,
            },
            Outcome::Empty => Outcome::Empty,
            Outcome::Failed(e) => Outcome::Failed(e),
        }
    }

    /// Single GETNEXT
    pub fn get_next(&mut self, locator: &Locator) -> Outcome<(Oid, Value)> {
        match self.resolve(locator) {
            Some(oid) => self.next_after(oid),
            None => Outcome::Empty,
        }
    }

    /// Lazy walk over the subtree below `locator`, one GETNEXT per row
    pub fn walk<'s>(&'s mut self, locator: &Locator) -> Walk<'s, 'a> {
        let root = self.resolve(locator);
        Walk {
            last: root.clone().unwrap_or_default(),
            root,
            session: self,
            done: false,
            error: None,
        }
    }

    /// Lazy walk over the subtree below `locator`, `max_repetitions` rows per
    /// GETBULK round trip
    pub fn get_bulk<'s>(&'s mut self, locator: &Locator, max_repetitions: u32) -> BulkWalk<'s, 'a> {
        let root = self.resolve(locator);
        let calls_left = self.max_calls;
        BulkWalk {
            last: root.clone().unwrap_or_default(),
            root,
            session: self,
            max_repetitions: max_repetitions.max(1),
            calls_left,
            buffer: VecDeque::new(),
            done: false,
            error: None,
        }
    }

    fn resolve(&self, locator: &Locator) -> Option<Oid> {
        match locator.resolve() {
            Ok(oid) => Some(oid),
            Err(e) => {
                log::warn!("{}: {}", self.target, e);
                None
            }
        }
    }

    fn next_after(&mut self, oid: Oid) -> Outcome<(Oid, Value)> {
        match self.send(&Request::get_next(oid)) {
            Outcome::Value(response) => match response.varbinds.into_iter().next() {
                Some(vb) if !vb.value.is_exception() => Outcome::Value((vb.oid, vb.value)),
                _ => Outcome::Empty,
            },
            Outcome::Empty => Outcome::Empty,
            Outcome::Failed(e) => Outcome::Failed(e),
        }
    }

    /// One round trip; a non-zero error status becomes `Empty`
    fn send(&mut self, request: &Request) -> Outcome<Response> {
        match self.transport.exchange(self.target, self.community, request) {
            Ok(response) if response.error_status.code() != 0 => {
                let err = SnmpError::Status {
                    target: self.target,
                    status: response.error_status,
                    index: response.error_index,
                };
                log::debug!("{}", err);
                Outcome::Empty
            }
            Ok(response) => Outcome::Value(response),
            Err(e) => {
                log::debug!("{:?} to {} failed: {}", request.pdu_type, self.target, e);
                Outcome::Failed(e)
            }
        }
    }
}

/// Iterator produced by [`SnmpSession::walk`]
///
/// Ends when a returned OID leaves the subtree, does not increase, carries an
/// exception value, or when a call fails.
pub struct Walk<'s, 'a> {
    session: &'s mut SnmpSession<'a>,
    root: Option<Oid>,
    last: Oid,
    done: bool,
    error: Option<SnmpError>,
}

impl Walk<'_, '_> {
    /// Transport error that ended the walk, if any
    pub fn error(&self) -> Option<&SnmpError> {
        self.error.as_ref()
    }
}

impl Iterator for Walk<'_, '_> {
    type Item = (Oid, Value);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let root = match &self.root {
            Some(root) => root,
            None => {
                self.done = true;
                return None;
            }
        };

        match self.session.next_after(self.last.clone()) {
            Outcome::Value((oid, value)) if oid.starts_with(root) && oid > self.last => {
                self.last = oid.clone();
                Some((oid, value))
            }
            Outcome::Value((oid, _)) => {
                if oid.starts_with(root) {
                    log::warn!("{}: agent returned non-increasing OID {}", self.session.target, oid);
                }
                self.done = true;
                None
            }
            Outcome::Empty => {
                self.done = true;
                None
            }
            Outcome::Failed(e) => {
                self.error = Some(e);
                self.done = true;
                None
            }
        }
    }
}

/// Iterator produced by [`SnmpSession::get_bulk`]
///
/// Yields the same rows as [`Walk`] but fetches them in pages, and gives up
/// after the session's call bound.
pub struct BulkWalk<'s, 'a> {
    session: &'s mut SnmpSession<'a>,
    root: Option<Oid>,
    last: Oid,
    max_repetitions: u32,
    calls_left: u32,
    buffer: VecDeque<(Oid, Value)>,
    done: bool,
    error: Option<SnmpError>,
}

impl BulkWalk<'_, '_> {
    /// Transport error that ended the walk, if any
    pub fn error(&self) -> Option<&SnmpError> {
        self.error.as_ref()
    }

    fn fill(&mut self) {
        let root = match &self.root {
            Some(root) => root.clone(),
            None => {
                self.done = true;
                return;
            }
        };
        if self.calls_left == 0 {
            log::debug!("{}: bulk walk of {} stopped at call limit", self.session.target, root);
            self.done = true;
            return;
        }
        self.calls_left -= 1;

        let request = Request::get_bulk(self.last.clone(), self.max_repetitions);
        let response = match self.session.send(&request) {
            Outcome::Value(response) => response,
            Outcome::Empty => {
                self.done = true;
                return;
            }
            Outcome::Failed(e) => {
                self.error = Some(e);
                self.done = true;
                return;
            }
        };

        if response.varbinds.is_empty() {
            self.done = true;
            return;
        }

        for vb in response.varbinds {
            if vb.value.is_exception() || !vb.oid.starts_with(&root) || vb.oid <= self.last {
                self.done = true;
                return;
            }
            self.last = vb.oid.clone();
            self.buffer.push_back((vb.oid, vb.value));
        }
    }
}

impl Iterator for BulkWalk<'_, '_> {
    type Item = (Oid, Value);

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.done {
            self.fill();
        }
        self.buffer.pop_front()
    }
}
