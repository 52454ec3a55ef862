//! Interpretation of raw response buffers.
//!
//! The wire client hands complete response buffers (everything up to, but
//! not including, the tagged completion line) to the functions here, which
//! walk them with `imap-proto` and produce owned values. Responses that
//! belong to the session rather than the command are routed to an
//! unsolicited side channel, as Section 7 of RFC 3501 requires clients to
//! tolerate them at any time.

use std::sync::mpsc;

use chrono::{DateTime, FixedOffset};
use imap_proto::{self, AttributeValue, MailboxDatum, MessageSection, Response, SectionPath};
use regex::Regex;

use crate::error::{Error, ParseError, Result};
use crate::types::{
    Capabilities, FetchRecord, Flag, Name, NameAttribute, Selection, StatusInfo,
    UnsolicitedResponse,
};

lazy_static::lazy_static! {
    static ref AUTH_CHALLENGE: Regex = Regex::new("^\\+ ?(.*)\r\n").expect("static regex");
}

/// Extract the base64 payload of a `+ <challenge>` continuation line.
pub fn parse_authenticate_challenge(line: &str) -> Result<String> {
    if let Some(cap) = AUTH_CHALLENGE.captures(line) {
        let data = cap.get(1).map(|m| m.as_str()).unwrap_or("");
        return Ok(data.to_string());
    }
    Err(Error::Parse(ParseError::Authentication(
        line.to_string(),
        None,
    )))
}

enum MapOrNot<'a, T> {
    Map(T),
    Not(Response<'a>),
    #[allow(dead_code)]
    Ignore,
}

fn unexpected(resp: &Response<'_>) -> Error {
    Error::Parse(ParseError::Unexpected(format!("{:?}", resp)))
}

fn parse_many_into<'input, T, F>(
    input: &'input [u8],
    into: &mut Vec<T>,
    unsolicited: &mut mpsc::Sender<UnsolicitedResponse>,
    mut map: F,
) -> Result<()>
where
    F: FnMut(Response<'input>) -> Result<MapOrNot<'input, T>>,
{
    let mut rest = input;
    while !rest.is_empty() {
        match imap_proto::parser::parse_response(rest) {
            Ok((remaining, resp)) => {
                rest = remaining;
                match map(resp)? {
                    MapOrNot::Map(t) => into.push(t),
                    MapOrNot::Not(resp) => {
                        if let Some(resp) = handle_unilateral(resp, unsolicited) {
                            return Err(unexpected(&resp));
                        }
                    }
                    MapOrNot::Ignore => {}
                }
            }
            _ => return Err(Error::Parse(ParseError::Invalid(rest.to_vec()))),
        }
    }
    Ok(())
}

pub fn parse_capabilities(
    input: &[u8],
    unsolicited: &mut mpsc::Sender<UnsolicitedResponse>,
) -> Result<Capabilities> {
    let mut all: Vec<String> = Vec::new();
    parse_many_into(input, &mut all, unsolicited, |resp| match resp {
        Response::Capabilities(caps) => Ok(MapOrNot::Map(
            caps.iter().map(capability_string).collect::<Vec<_>>().join("\n"),
        )),
        resp => Ok(MapOrNot::Not(resp)),
    })?;
    Ok(Capabilities::new(all.iter().flat_map(|s| s.split('\n'))))
}

fn capability_string(cap: &imap_proto::Capability<'_>) -> String {
    use imap_proto::Capability as Wire;
    match cap {
        Wire::Imap4rev1 => "IMAP4REV1".to_string(),
        Wire::Auth(mech) => format!("AUTH={}", mech),
        Wire::Atom(atom) => atom.to_string(),
        #[allow(unreachable_patterns)]
        other => format!("{:?}", other),
    }
}

/// Parse `LIST` or `LSUB` results. Names are returned as received; decoding
/// to UTF-8 happens inside [`Name`].
pub fn parse_names(
    input: &[u8],
    unsolicited: &mut mpsc::Sender<UnsolicitedResponse>,
) -> Result<Vec<Name>> {
    let mut names = Vec::new();
    parse_many_into(input, &mut names, unsolicited, |resp| match resp {
        Response::MailboxData(MailboxDatum::List {
            name_attributes,
            delimiter,
            name,
        }) => Ok(MapOrNot::Map(Name::from_wire(
            name.to_string(),
            delimiter.map(|d| d.to_string()),
            name_attributes.iter().map(name_attribute).collect(),
        ))),
        resp => Ok(MapOrNot::Not(resp)),
    })?;
    Ok(names)
}

fn name_attribute(attr: &imap_proto::types::NameAttribute<'_>) -> NameAttribute {
    use imap_proto::types::NameAttribute as Wire;
    match attr {
        Wire::NoInferiors => NameAttribute::NoInferiors,
        Wire::NoSelect => NameAttribute::NoSelect,
        Wire::Marked => NameAttribute::Marked,
        Wire::Unmarked => NameAttribute::Unmarked,
        Wire::Extension(ext) => NameAttribute::from_wire(ext.as_ref()),
        #[allow(unreachable_patterns)]
        other => NameAttribute::from_wire(&format!("{:?}", other)),
    }
}

pub fn parse_fetches(
    input: &[u8],
    unsolicited: &mut mpsc::Sender<UnsolicitedResponse>,
) -> Result<Vec<FetchRecord>> {
    let mut fetches = Vec::new();
    parse_many_into(input, &mut fetches, unsolicited, |resp| match resp {
        Response::Fetch(seq, attrs) => {
            let mut record = FetchRecord {
                seq,
                ..FetchRecord::default()
            };
            for attr in &attrs {
                match attr {
                    AttributeValue::Uid(uid) => record.uid = Some(*uid),
                    AttributeValue::Flags(flags) => {
                        record
                            .flags
                            .extend(flags.iter().map(|f| Flag::from(f.to_string())));
                    }
                    AttributeValue::Rfc822Size(size) => record.size = Some(*size),
                    AttributeValue::InternalDate(date) => {
                        record.internal_date = parse_internal_date(date);
                    }
                    AttributeValue::BodySection { section, data, .. } => {
                        let bytes = data.as_ref().map(|d| d.to_vec());
                        match section {
                            None => record.body = bytes,
                            Some(SectionPath::Full(MessageSection::Header))
                            | Some(SectionPath::Part(_, Some(MessageSection::Header))) => {
                                record.header = bytes;
                            }
                            _ => {}
                        }
                    }
                    AttributeValue::Rfc822(data) => {
                        record.body = data.as_ref().map(|d| d.to_vec());
                    }
                    AttributeValue::Rfc822Header(data) => {
                        record.header = data.as_ref().map(|d| d.to_vec());
                    }
                    AttributeValue::Envelope(env) => {
                        record.envelope_message_id = env
                            .message_id
                            .as_ref()
                            .map(|id| String::from_utf8_lossy(id).trim().to_string());
                    }
                    _ => {}
                }
            }
            Ok(MapOrNot::Map(record))
        }
        resp => Ok(MapOrNot::Not(resp)),
    })?;
    Ok(fetches)
}

/// Parse the untagged data of a `SELECT` or `EXAMINE`.
pub fn parse_selection(
    input: &[u8],
    unsolicited: &mut mpsc::Sender<UnsolicitedResponse>,
) -> Result<Selection> {
    let mut selection = Selection::default();
    let mut rest = input;
    while !rest.is_empty() {
        match imap_proto::parser::parse_response(rest) {
            Ok((remaining, resp)) => {
                rest = remaining;
                match resp {
                    Response::Data { status, code, .. }
                        if matches!(status, imap_proto::Status::Ok) =>
                    {
                        use imap_proto::ResponseCode;
                        match code {
                            Some(ResponseCode::UidValidity(v)) => {
                                selection.uid_validity = Some(v);
                            }
                            Some(ResponseCode::UidNext(v)) => selection.uid_next = Some(v),
                            Some(ResponseCode::Unseen(v)) => selection.unseen = Some(v),
                            Some(ResponseCode::PermanentFlags(flags)) => {
                                selection
                                    .permanent_flags
                                    .extend(flags.iter().map(|f| Flag::from(f.to_string())));
                            }
                            Some(ResponseCode::ReadOnly) => selection.is_read_only = true,
                            Some(ResponseCode::ReadWrite) => selection.is_read_only = false,
                            _ => {}
                        }
                    }
                    Response::MailboxData(MailboxDatum::Exists(n)) => selection.exists = n,
                    Response::MailboxData(MailboxDatum::Recent(n)) => selection.recent = n,
                    Response::MailboxData(MailboxDatum::Flags(flags)) => {
                        selection
                            .flags
                            .extend(flags.iter().map(|f| Flag::from(f.to_string())));
                    }
                    resp => {
                        if let Some(resp) = handle_unilateral(resp, unsolicited) {
                            return Err(unexpected(&resp));
                        }
                    }
                }
            }
            _ => return Err(Error::Parse(ParseError::Invalid(rest.to_vec()))),
        }
    }
    Ok(selection)
}

/// Parse a `STATUS` reply for the mailbox the command named. Status data
/// for any other mailbox goes to the side channel.
pub fn parse_status(
    input: &[u8],
    unsolicited: &mut mpsc::Sender<UnsolicitedResponse>,
) -> Result<StatusInfo> {
    let mut infos = Vec::new();
    parse_many_into(input, &mut infos, unsolicited, |resp| match resp {
        Response::MailboxData(MailboxDatum::Status { status, .. }) => {
            Ok(MapOrNot::Map(status_info(&status)))
        }
        resp => Ok(MapOrNot::Not(resp)),
    })?;
    infos
        .into_iter()
        .next()
        .ok_or_else(|| Error::Parse(ParseError::Unexpected("STATUS reply without data".into())))
}

fn status_info(attrs: &[imap_proto::StatusAttribute]) -> StatusInfo {
    let mut info = StatusInfo::default();
    for attr in attrs {
        use imap_proto::StatusAttribute as Wire;
        match attr {
            Wire::Messages(n) => info.messages = Some(*n),
            Wire::Recent(n) => info.recent = Some(*n),
            Wire::UidNext(n) => info.uid_next = Some(*n),
            Wire::UidValidity(n) => info.uid_validity = Some(*n),
            Wire::Unseen(n) => info.unseen = Some(*n),
            _ => {}
        }
    }
    info
}

pub fn parse_expunge(
    input: &[u8],
    unsolicited: &mut mpsc::Sender<UnsolicitedResponse>,
) -> Result<Vec<u32>> {
    let mut seqs = Vec::new();
    parse_many_into(input, &mut seqs, unsolicited, |resp| match resp {
        Response::Expunge(seq) => Ok(MapOrNot::Map(seq)),
        resp => Ok(MapOrNot::Not(resp)),
    })?;
    Ok(seqs)
}

/// Drain a buffer that carries no command-specific data (`NOOP`, `STORE
/// FLAGS.SILENT`, `ID`, subscription changes and the like).
pub fn parse_drain(
    input: &[u8],
    unsolicited: &mut mpsc::Sender<UnsolicitedResponse>,
) -> Result<()> {
    let mut rest = input;
    while !rest.is_empty() {
        match imap_proto::parser::parse_response(rest) {
            Ok((remaining, resp)) => {
                rest = remaining;
                // FETCH responses here are flag updates we did not ask
                // for; anything else unexpected is a protocol error.
                if let Some(resp) = handle_unilateral(resp, unsolicited) {
                    return Err(unexpected(&resp));
                }
            }
            _ => return Err(Error::Parse(ParseError::Invalid(rest.to_vec()))),
        }
    }
    Ok(())
}

/// Drain an `ID` reply. The payload is advisory and servers vary in how
/// they shape it, so everything is accepted and dropped, parseable or not.
pub fn parse_id(input: &[u8], unsolicited: &mut mpsc::Sender<UnsolicitedResponse>) -> Result<()> {
    let mut rest = input;
    while !rest.is_empty() {
        match imap_proto::parser::parse_response(rest) {
            Ok((remaining, resp)) => {
                rest = remaining;
                let _ = handle_unilateral(resp, unsolicited);
            }
            _ => {
                log::debug!("ignoring unparsed ID response data");
                break;
            }
        }
    }
    Ok(())
}

/// Route a unilateral server response (Section 7 of RFC 3501) to the side
/// channel. Returns the response back when it is not one.
fn handle_unilateral<'a>(
    resp: Response<'a>,
    unsolicited: &mut mpsc::Sender<UnsolicitedResponse>,
) -> Option<Response<'a>> {
    match resp {
        Response::MailboxData(MailboxDatum::Exists(n)) => {
            unsolicited.send(UnsolicitedResponse::Exists(n)).ok();
        }
        Response::MailboxData(MailboxDatum::Recent(n)) => {
            unsolicited.send(UnsolicitedResponse::Recent(n)).ok();
        }
        Response::MailboxData(MailboxDatum::Status { mailbox, status }) => {
            unsolicited
                .send(UnsolicitedResponse::Status {
                    mailbox: mailbox.to_string(),
                    status: status_info(&status),
                })
                .ok();
        }
        Response::Expunge(n) => {
            unsolicited.send(UnsolicitedResponse::Expunge(n)).ok();
        }
        Response::Fetch(seq, attrs) => {
            let mut flags = Vec::new();
            for attr in &attrs {
                if let AttributeValue::Flags(fs) = attr {
                    flags.extend(fs.iter().map(|f| Flag::from(f.to_string())));
                }
            }
            unsolicited
                .send(UnsolicitedResponse::Fetch { seq, flags })
                .ok();
        }
        Response::Data { status, information, .. }
            if matches!(status, imap_proto::Status::Bye) =>
        {
            unsolicited
                .send(UnsolicitedResponse::Bye(
                    information.map(|i| i.to_string()).unwrap_or_default(),
                ))
                .ok();
        }
        // Untagged OK with or without a response code carries nothing a
        // command cares about at this layer.
        Response::Data { status, .. } if matches!(status, imap_proto::Status::Ok) => {}
        // Servers may volunteer CAPABILITY lines after LOGIN or SELECT;
        // harmless wherever they appear.
        Response::Capabilities(_) => {}
        resp => return Some(resp),
    }
    None
}

pub(crate) fn parse_internal_date(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(s.trim(), "%d-%b-%Y %H:%M:%S %z").ok()
}
