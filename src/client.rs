//! The IMAP wire client.
//!
//! One [`Client`] owns one socket and speaks RFC 3501 over it: it numbers
//! commands with a tag counter, writes one command at a time, and reads
//! everything up to the matching tagged completion line, handing the
//! untagged portion to [`parse`](crate::parse). Mailbox names are encoded
//! to modified UTF-7 on the way out; the literal-aware reader keeps message
//! bodies intact on the way in.

use std::io::{BufRead, Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use bufstream::BufStream;
use chrono::{DateTime, FixedOffset};
use hmac::{Hmac, Mac};
use md5::Md5;
use native_tls::{Certificate, HandshakeError, TlsConnector};
use regex::Regex;

use crate::error::{Error, ParseError, Result, ValidateError};
use crate::guid::to_hex;
use crate::parse;
use crate::types::{
    Capabilities, FetchRecord, Flag, Name, Selection, StatusInfo, UidSet, UnsolicitedResponse,
};
use crate::utf7;

static TAG_PREFIX: &str = "a";
const INITIAL_TAG: u32 = 0;
const LF: u8 = 0x0a;

lazy_static::lazy_static! {
    static ref GREETING_CAPABILITIES: Regex =
        Regex::new(r"(?i)\[CAPABILITY ([^\]]+)\]").expect("static regex");
}

/// Any stream a [`Client`] can run over.
pub trait ImapStream: Read + Write + Send {}

impl<T: Read + Write + Send> ImapStream for T {}

/// Transport settings for [`Client::connect`].
#[derive(Clone, Debug)]
pub struct TlsOptions {
    /// Wrap the connection in TLS from the first byte (`imaps://`).
    pub tls: bool,
    /// Upgrade a plaintext connection with `STARTTLS` before anything else.
    pub starttls: bool,
    /// Verify the server certificate chain and hostname.
    pub verify: bool,
    /// Extra PEM bundle of trusted roots.
    pub ca_bundle: Option<PathBuf>,
    /// Socket read timeout; unblocks a stalled fetch so the retry envelope
    /// can take over.
    pub read_timeout: Option<Duration>,
}

impl Default for TlsOptions {
    fn default() -> TlsOptions {
        TlsOptions {
            tls: false,
            starttls: false,
            verify: true,
            ca_bundle: None,
            read_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// The authentication mechanisms the client can drive, in the order they
/// are attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMechanism {
    Plain,
    Login,
    CramMd5,
}

impl std::fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AuthMechanism::Plain => "PLAIN",
            AuthMechanism::Login => "LOGIN",
            AuthMechanism::CramMd5 => "CRAM-MD5",
        })
    }
}

/// One authenticated (or authenticating) IMAP connection.
pub struct Client {
    stream: BufStream<Box<dyn ImapStream>>,
    tag: u32,
    /// Dump every line sent and received to the `imap.wire` trace target.
    pub debug: bool,
    greeting: Option<String>,
    unsolicited_tx: mpsc::Sender<UnsolicitedResponse>,
    unsolicited_rx: mpsc::Receiver<UnsolicitedResponse>,
}

impl Client {
    /// Wrap an established stream. The greeting has not been read yet.
    pub fn new(stream: Box<dyn ImapStream>) -> Client {
        let (tx, rx) = mpsc::channel();
        Client {
            stream: BufStream::new(stream),
            tag: INITIAL_TAG,
            debug: false,
            greeting: None,
            unsolicited_tx: tx,
            unsolicited_rx: rx,
        }
    }

    /// Open a socket to `host:port`, perform the requested TLS setup, and
    /// read the server greeting.
    pub fn connect(host: &str, port: u16, options: &TlsOptions) -> Result<Client> {
        let tcp = TcpStream::connect((host, port))?;
        tcp.set_read_timeout(options.read_timeout)?;
        tcp.set_write_timeout(options.read_timeout)?;

        if options.tls {
            let stream = tls_handshake(host, tcp, options)?;
            let mut client = Client::new(Box::new(stream));
            client.read_greeting()?;
            Ok(client)
        } else if options.starttls {
            // The upgrade happens while the stream type is still concrete;
            // nothing may be buffered past the STARTTLS completion line.
            let mut tcp = tcp;
            let greeting = starttls_exchange(&mut tcp)?;
            let stream = tls_handshake(host, tcp, options)?;
            let mut client = Client::new(Box::new(stream));
            client.greeting = Some(greeting);
            Ok(client)
        } else {
            let mut client = Client::new(Box::new(tcp));
            client.read_greeting()?;
            Ok(client)
        }
    }

    /// Read the untagged greeting line.
    pub fn read_greeting(&mut self) -> Result<()> {
        let mut line = Vec::new();
        self.readline(&mut line)?;
        let text = String::from_utf8_lossy(&line).trim_end().to_string();
        if !text.starts_with("* OK") && !text.starts_with("* PREAUTH") {
            return Err(Error::Parse(ParseError::Unexpected(text)));
        }
        self.greeting = Some(text);
        Ok(())
    }

    /// The greeting line, once read.
    pub fn greeting(&self) -> Option<&str> {
        self.greeting.as_deref()
    }

    /// Capabilities advertised in the greeting's `[CAPABILITY ...]`
    /// response code, when the server includes one.
    pub fn greeting_capabilities(&self) -> Option<Capabilities> {
        let greeting = self.greeting.as_deref()?;
        let caps = GREETING_CAPABILITIES.captures(greeting)?;
        Some(Capabilities::new(caps[1].split_whitespace()))
    }

    /// Pull everything the server said on its own initiative since the
    /// last drain.
    pub fn drain_unsolicited(&mut self) -> Vec<UnsolicitedResponse> {
        self.unsolicited_rx.try_iter().collect()
    }

    pub fn capability(&mut self) -> Result<Capabilities> {
        let data = self.run_command("CAPABILITY")?;
        parse::parse_capabilities(&data, &mut self.unsolicited_tx)
    }

    /// `LOGIN` with quoted credentials. Returns any capabilities the
    /// server volunteered alongside the completion.
    pub fn login(&mut self, username: &str, password: &str) -> Result<Capabilities> {
        let cmd = format!("LOGIN {} {}", quote(username)?, quote(password)?);
        let log_as = format!("LOGIN {} \"<password>\"", quote(username)?);
        let data = self.run_command_redacted(&cmd, Some(&log_as))?;
        parse::parse_capabilities(&data, &mut self.unsolicited_tx)
    }

    /// Drive one `AUTHENTICATE` exchange to completion.
    pub fn authenticate(
        &mut self,
        mechanism: AuthMechanism,
        username: &str,
        password: &str,
    ) -> Result<Capabilities> {
        let tag = self.next_tag();
        self.write_line(
            format!("{} AUTHENTICATE {}", tag, mechanism).as_bytes(),
            None,
        )?;

        let tag_prefix = format!("{} ", tag);
        let mut untagged = Vec::new();
        loop {
            let mut line = Vec::new();
            self.readline(&mut line)?;
            if line.starts_with(b"+") {
                let text = as_utf8(&line)?;
                let challenge = parse::parse_authenticate_challenge(text)?;
                let reply = self.auth_reply(mechanism, username, password, &challenge)?;
                self.write_line(reply.as_bytes(), Some("<auth data>"))?;
            } else if line.starts_with(tag_prefix.as_bytes()) {
                classify_tagged(&line)?;
                return parse::parse_capabilities(&untagged, &mut self.unsolicited_tx);
            } else {
                untagged.extend_from_slice(&line);
            }
        }
    }

    fn auth_reply(
        &self,
        mechanism: AuthMechanism,
        username: &str,
        password: &str,
        challenge: &str,
    ) -> Result<String> {
        match mechanism {
            AuthMechanism::Plain => {
                Ok(base64::encode(format!("\0{}\0{}", username, password)))
            }
            AuthMechanism::Login => {
                let prompt = base64::decode(challenge).map_err(|e| {
                    Error::Parse(ParseError::Authentication(challenge.to_string(), Some(e)))
                })?;
                if String::from_utf8_lossy(&prompt).to_ascii_lowercase().contains("pass") {
                    Ok(base64::encode(password))
                } else {
                    Ok(base64::encode(username))
                }
            }
            AuthMechanism::CramMd5 => {
                let nonce = base64::decode(challenge).map_err(|e| {
                    Error::Parse(ParseError::Authentication(challenge.to_string(), Some(e)))
                })?;
                let digest = cram_md5(password, &nonce);
                Ok(base64::encode(format!("{} {}", username, digest)))
            }
        }
    }

    pub fn list(&mut self, reference: &str, pattern: &str) -> Result<Vec<Name>> {
        let cmd = format!("LIST {} {}", mailbox_arg(reference)?, mailbox_arg(pattern)?);
        let data = self.run_command(&cmd)?;
        parse::parse_names(&data, &mut self.unsolicited_tx)
    }

    pub fn lsub(&mut self, reference: &str, pattern: &str) -> Result<Vec<Name>> {
        let cmd = format!("LSUB {} {}", mailbox_arg(reference)?, mailbox_arg(pattern)?);
        let data = self.run_command(&cmd)?;
        parse::parse_names(&data, &mut self.unsolicited_tx)
    }

    /// Open a mailbox read-write.
    pub fn select(&mut self, mailbox: &str) -> Result<Selection> {
        let data = self.run_command(&format!("SELECT {}", mailbox_arg(mailbox)?))?;
        parse::parse_selection(&data, &mut self.unsolicited_tx)
    }

    /// Open a mailbox read-only.
    pub fn examine(&mut self, mailbox: &str) -> Result<Selection> {
        let data = self.run_command(&format!("EXAMINE {}", mailbox_arg(mailbox)?))?;
        let mut selection = parse::parse_selection(&data, &mut self.unsolicited_tx)?;
        selection.is_read_only = true;
        Ok(selection)
    }

    pub fn status(&mut self, mailbox: &str, items: &[&str]) -> Result<StatusInfo> {
        let cmd = format!("STATUS {} ({})", mailbox_arg(mailbox)?, items.join(" "));
        let data = self.run_command(&cmd)?;
        parse::parse_status(&data, &mut self.unsolicited_tx)
    }

    pub fn uid_fetch(&mut self, set: &UidSet, query: &str) -> Result<Vec<FetchRecord>> {
        let data = self.run_command(&format!("UID FETCH {} {}", set, query))?;
        parse::parse_fetches(&data, &mut self.unsolicited_tx)
    }

    /// `UID STORE`; returns the flag updates the server echoed back, which
    /// is empty for `.SILENT` items.
    pub fn uid_store(&mut self, set: &UidSet, item: &str) -> Result<Vec<FetchRecord>> {
        let data = self.run_command(&format!("UID STORE {} {}", set, item))?;
        parse::parse_fetches(&data, &mut self.unsolicited_tx)
    }

    pub fn uid_copy(&mut self, set: &UidSet, mailbox: &str) -> Result<()> {
        let cmd = format!("UID COPY {} {}", set, mailbox_arg(mailbox)?);
        let data = self.run_command(&cmd)?;
        parse::parse_drain(&data, &mut self.unsolicited_tx)
    }

    /// Append one message. `\Recent` (and the `\*` marker) are stripped
    /// from the flag list, as RFC 3501 forbids them in `APPEND`.
    pub fn append(
        &mut self,
        mailbox: &str,
        body: &[u8],
        flags: &[Flag<'_>],
        internal_date: Option<DateTime<FixedOffset>>,
    ) -> Result<()> {
        let mut cmd = format!("APPEND {}", mailbox_arg(mailbox)?);
        let storable: Vec<Flag<'_>> = flags.iter().filter(|f| f.storable()).cloned().collect();
        if !storable.is_empty() {
            cmd.push(' ');
            cmd.push_str(&Flag::set_to_wire(&storable));
        }
        if let Some(date) = internal_date {
            cmd.push_str(&format!(" \"{}\"", date.format("%d-%b-%Y %H:%M:%S %z")));
        }
        cmd.push_str(&format!(" {{{}}}", body.len()));

        let tag = self.next_tag();
        self.write_line(format!("{} {}", tag, cmd).as_bytes(), None)?;

        let mut line = Vec::new();
        self.readline(&mut line)?;
        if !line.starts_with(b"+") {
            if line.starts_with(format!("{} ", tag).as_bytes()) {
                classify_tagged(&line)?;
            }
            return Err(Error::Append);
        }

        self.stream.write_all(body)?;
        self.stream.write_all(b"\r\n")?;
        self.stream.flush()?;
        if self.debug {
            log::trace!(target: "imap.wire", "C: <{} literal octets>", body.len());
        }

        let data = self.read_response(&tag)?;
        parse::parse_drain(&data, &mut self.unsolicited_tx)
    }

    pub fn create(&mut self, mailbox: &str) -> Result<()> {
        self.run_command_and_check_ok(&format!("CREATE {}", mailbox_arg(mailbox)?))
    }

    pub fn subscribe(&mut self, mailbox: &str) -> Result<()> {
        self.run_command_and_check_ok(&format!("SUBSCRIBE {}", mailbox_arg(mailbox)?))
    }

    pub fn unsubscribe(&mut self, mailbox: &str) -> Result<()> {
        self.run_command_and_check_ok(&format!("UNSUBSCRIBE {}", mailbox_arg(mailbox)?))
    }

    /// `EXPUNGE`; returns the expunged sequence numbers.
    pub fn expunge(&mut self) -> Result<Vec<u32>> {
        let data = self.run_command("EXPUNGE")?;
        parse::parse_expunge(&data, &mut self.unsolicited_tx)
    }

    /// `CLOSE`: deselect, expunging `\Deleted` messages if the mailbox was
    /// opened read-write.
    pub fn close(&mut self) -> Result<()> {
        self.run_command_and_check_ok("CLOSE")
    }

    /// RFC 3691 `UNSELECT`: deselect without expunging.
    pub fn unselect(&mut self) -> Result<()> {
        self.run_command_and_check_ok("UNSELECT")
    }

    pub fn noop(&mut self) -> Result<()> {
        self.run_command_and_check_ok("NOOP")
    }

    /// RFC 2971 `ID`.
    pub fn id(&mut self, pairs: &[(&str, &str)]) -> Result<()> {
        let body = if pairs.is_empty() {
            "NIL".to_string()
        } else {
            let mut fields = Vec::with_capacity(pairs.len());
            for (key, value) in pairs {
                fields.push(format!("{} {}", quote(key)?, quote(value)?));
            }
            format!("({})", fields.join(" "))
        };
        let data = self.run_command(&format!("ID {}", body))?;
        parse::parse_id(&data, &mut self.unsolicited_tx)
    }

    pub fn logout(&mut self) -> Result<()> {
        self.run_command_and_check_ok("LOGOUT")
    }

    fn next_tag(&mut self) -> String {
        self.tag += 1;
        format!("{}{}", TAG_PREFIX, self.tag)
    }

    fn run_command(&mut self, untagged: &str) -> Result<Vec<u8>> {
        self.run_command_redacted(untagged, None)
    }

    fn run_command_redacted(&mut self, untagged: &str, log_as: Option<&str>) -> Result<Vec<u8>> {
        let tag = self.next_tag();
        let log_as = log_as.map(|l| format!("{} {}", tag, l));
        self.write_line(
            format!("{} {}", tag, untagged).as_bytes(),
            log_as.as_deref(),
        )?;
        self.read_response(&tag)
    }

    fn run_command_and_check_ok(&mut self, untagged: &str) -> Result<()> {
        let data = self.run_command(untagged)?;
        parse::parse_drain(&data, &mut self.unsolicited_tx)
    }

    /// Collect everything up to the tagged completion line for `tag`,
    /// skipping over byte-counted literals so message content can never be
    /// mistaken for a line of protocol.
    fn read_response(&mut self, tag: &str) -> Result<Vec<u8>> {
        let tag_prefix = format!("{} ", tag);
        let mut data = Vec::new();
        let mut literal_remaining = 0usize;
        loop {
            let line_start = data.len();
            self.readline(&mut data)?;
            let chunk_len = data.len() - line_start;
            if literal_remaining >= chunk_len {
                literal_remaining -= chunk_len;
                continue;
            }
            let content_start = line_start + literal_remaining;
            literal_remaining = 0;
            if let Some(n) = literal_announcement(&data[content_start..]) {
                literal_remaining = n;
                continue;
            }
            if data[content_start..].starts_with(tag_prefix.as_bytes()) {
                let status_line = data.split_off(content_start);
                classify_tagged(&status_line)?;
                return Ok(data);
            }
        }
    }

    fn readline(&mut self, into: &mut Vec<u8>) -> Result<usize> {
        let read = self.stream.read_until(LF, into)?;
        if read == 0 {
            return Err(Error::ConnectionLost);
        }
        if self.debug {
            let line = &into[into.len() - read..];
            log::trace!(target: "imap.wire", "S: {}", String::from_utf8_lossy(line).trim_end());
        }
        Ok(read)
    }

    fn write_line(&mut self, content: &[u8], log_as: Option<&str>) -> Result<()> {
        self.stream.write_all(content)?;
        self.stream.write_all(b"\r\n")?;
        self.stream.flush()?;
        if self.debug {
            match log_as {
                Some(redacted) => log::trace!(target: "imap.wire", "C: {}", redacted),
                None => log::trace!(
                    target: "imap.wire",
                    "C: {}",
                    String::from_utf8_lossy(content)
                ),
            }
        }
        Ok(())
    }
}

/// Encode a UTF-8 mailbox name for the wire: modified UTF-7, quoted.
fn mailbox_arg(name: &str) -> Result<String> {
    quote(&utf7::encode(name))
}

/// Render an IMAP quoted string, rejecting characters a quoted string
/// cannot carry.
fn quote(value: &str) -> Result<String> {
    for c in value.chars() {
        if c == '\r' || c == '\n' {
            return Err(ValidateError(c).into());
        }
    }
    Ok(format!(
        "\"{}\"",
        value.replace('\\', "\\\\").replace('"', "\\\"")
    ))
}

fn as_utf8(line: &[u8]) -> Result<&str> {
    std::str::from_utf8(line)
        .map_err(|e| Error::Parse(ParseError::DataNotUtf8(line.to_vec(), e)))
}

/// Check a tagged completion line, mapping `NO` and `BAD` to their errors.
fn classify_tagged(line: &[u8]) -> Result<()> {
    let text = as_utf8(line)?.trim_end();
    let mut parts = text.splitn(3, ' ');
    let _tag = parts.next();
    let status = parts.next().unwrap_or("");
    let information = parts.next().unwrap_or("").to_string();
    match status {
        "OK" => Ok(()),
        "NO" => Err(Error::No(information)),
        "BAD" => Err(Error::Bad(information)),
        _ => Err(Error::Parse(ParseError::Unexpected(text.to_string()))),
    }
}

/// `{n}` at the end of a response line announces n literal octets.
fn literal_announcement(line: &[u8]) -> Option<usize> {
    let line = match line {
        [rest @ .., b'\r', b'\n'] | [rest @ .., b'\n'] => rest,
        _ => return None,
    };
    if !line.ends_with(b"}") {
        return None;
    }
    let open = line.iter().rposition(|&b| b == b'{')?;
    let digits = &line[open + 1..line.len() - 1];
    if digits.is_empty() || !digits.iter().all(|b| b.is_ascii_digit()) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// RFC 2195 response: hex HMAC-MD5 of the server nonce under the password.
fn cram_md5(password: &str, nonce: &[u8]) -> String {
    let mut mac =
        <Hmac<Md5> as Mac>::new_from_slice(password.as_bytes()).expect("any key length works");
    mac.update(nonce);
    to_hex(&mac.finalize().into_bytes())
}

fn tls_handshake(
    host: &str,
    tcp: TcpStream,
    options: &TlsOptions,
) -> Result<native_tls::TlsStream<TcpStream>> {
    let mut builder = TlsConnector::builder();
    if !options.verify {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    }
    if let Some(path) = &options.ca_bundle {
        for cert in load_ca_bundle(path)? {
            builder.add_root_certificate(cert);
        }
    }
    let connector = builder.build().map_err(Error::Tls)?;
    let mut attempt = connector.connect(host, tcp);
    loop {
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(HandshakeError::WouldBlock(mid)) => attempt = mid.handshake(),
            // Verification failures surface here; never retried.
            Err(HandshakeError::Failure(e)) => return Err(Error::TlsVerify(e)),
        }
    }
}

fn load_ca_bundle(path: &Path) -> Result<Vec<Certificate>> {
    const END: &str = "-----END CERTIFICATE-----";
    let pem = std::fs::read_to_string(path)?;
    let mut certs = Vec::new();
    let mut rest = pem.as_str();
    while let Some(idx) = rest.find(END) {
        let (block, tail) = rest.split_at(idx + END.len());
        certs.push(Certificate::from_pem(block.trim().as_bytes()).map_err(Error::Tls)?);
        rest = tail;
    }
    if certs.is_empty() {
        return Err(Error::Config(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Run the plaintext half of a STARTTLS upgrade byte-for-byte, so nothing
/// past the completion line is consumed before the handshake.
fn starttls_exchange(tcp: &mut TcpStream) -> Result<String> {
    let greeting = read_line_raw(tcp)?;
    if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
        return Err(Error::Parse(ParseError::Unexpected(greeting)));
    }
    tcp.write_all(b"a0 STARTTLS\r\n")?;
    loop {
        let line = read_line_raw(tcp)?;
        if line.starts_with("a0 ") {
            classify_tagged(line.as_bytes())?;
            return Ok(greeting);
        }
    }
}

fn read_line_raw(tcp: &mut TcpStream) -> Result<String> {
    let mut buf = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        let n = tcp.read(&mut byte)?;
        if n == 0 {
            return Err(Error::ConnectionLost);
        }
        buf.push(byte[0]);
        if buf.ends_with(b"\n") {
            break;
        }
    }
    let trimmed = String::from_utf8_lossy(&buf).trim_end().to_string();
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_stream::MockStream;

    fn client_with(response: &[u8]) -> (Client, crate::mock_stream::WrittenBuf) {
        let mock = MockStream::new(response.to_vec());
        let written = mock.written();
        (Client::new(Box::new(mock)), written)
    }

    fn written_string(buf: &crate::mock_stream::WrittenBuf) -> String {
        String::from_utf8_lossy(&buf.lock().unwrap()).into_owned()
    }

    #[test]
    fn tags_count_up() {
        let (mut client, written) =
            client_with(b"a1 OK NOOP completed\r\na2 OK NOOP completed\r\n");
        client.noop().unwrap();
        client.noop().unwrap();
        assert_eq!(written_string(&written), "a1 NOOP\r\na2 NOOP\r\n");
    }

    #[test]
    fn greeting_and_capability_scrape() {
        let (mut client, _) = client_with(
            b"* OK [CAPABILITY IMAP4rev1 STARTTLS AUTH=PLAIN UNSELECT] Dovecot ready.\r\n",
        );
        client.read_greeting().unwrap();
        let caps = client.greeting_capabilities().unwrap();
        assert!(caps.has("UNSELECT"));
        assert!(caps.has("AUTH=PLAIN"));
    }

    #[test]
    fn greeting_without_capability_code() {
        let (mut client, _) = client_with(b"* OK ready\r\n");
        client.read_greeting().unwrap();
        assert!(client.greeting_capabilities().is_none());
    }

    #[test]
    fn login_quotes_credentials() {
        let (mut client, written) = client_with(b"a1 OK Logged in\r\n");
        client.login("bob", "pa\"ss\\word").unwrap();
        assert_eq!(
            written_string(&written),
            "a1 LOGIN \"bob\" \"pa\\\"ss\\\\word\"\r\n"
        );
    }

    #[test]
    fn login_rejects_crlf() {
        let (mut client, _) = client_with(b"");
        assert!(matches!(
            client.login("bob", "pass\r\nword"),
            Err(Error::Validate(_))
        ));
    }

    #[test]
    fn select_parses_untagged_data() {
        let (mut client, written) = client_with(
            b"* FLAGS (\\Seen \\Deleted)\r\n\
              * 3 EXISTS\r\n\
              * 0 RECENT\r\n\
              * OK [UIDVALIDITY 42] UIDs valid\r\n\
              * OK [UIDNEXT 7] next\r\n\
              a1 OK [READ-WRITE] SELECT completed\r\n",
        );
        let sel = client.select("INBOX").unwrap();
        assert_eq!(written_string(&written), "a1 SELECT \"INBOX\"\r\n");
        assert_eq!(sel.exists, 3);
        assert_eq!(sel.uid_validity, Some(42));
        assert_eq!(sel.uid_next, Some(7));
        assert!(!sel.is_read_only);
    }

    #[test]
    fn examine_is_read_only_and_utf7_encoded() {
        let (mut client, written) = client_with(b"* 0 EXISTS\r\na1 OK done\r\n");
        let sel = client.examine("円グラフ良いです").unwrap();
        assert!(sel.is_read_only);
        assert_eq!(
            written_string(&written),
            "a1 EXAMINE \"&UYYwsDDpMNWCbzBEMGcwWQ-\"\r\n"
        );
    }

    #[test]
    fn select_failure_is_a_no() {
        let (mut client, _) = client_with(b"a1 NO Mailbox doesn't exist: Nope\r\n");
        match client.select("Nope") {
            Err(Error::No(msg)) => assert!(msg.contains("doesn't exist")),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn uid_fetch_reads_literals() {
        let (mut client, written) = client_with(
            b"* 1 FETCH (UID 10 RFC822.SIZE 14 BODY[] {14}\r\nFrom: a@b\r\n\r\nx)\r\n\
              a1 OK Fetch completed\r\n",
        );
        let records = client
            .uid_fetch(&UidSet::Single(10), "(UID RFC822.SIZE BODY.PEEK[])")
            .unwrap();
        assert_eq!(
            written_string(&written),
            "a1 UID FETCH 10 (UID RFC822.SIZE BODY.PEEK[])\r\n"
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].uid, Some(10));
        assert_eq!(records[0].body.as_deref(), Some(&b"From: a@b\r\n\r\nx"[..]));
    }

    #[test]
    fn literal_may_contain_fake_tagged_line() {
        let body = b"a1 OK looks done\r\nbut is payload";
        let response = format!(
            "* 1 FETCH (UID 5 BODY[] {{{}}}\r\n{})\r\na1 OK real completion\r\n",
            body.len(),
            String::from_utf8_lossy(body)
        );
        let (mut client, _) = client_with(response.as_bytes());
        let records = client.uid_fetch(&UidSet::Single(5), "(UID BODY.PEEK[])").unwrap();
        assert_eq!(records[0].body.as_deref(), Some(&body[..]));
    }

    #[test]
    fn append_waits_for_continuation() {
        let (mut client, written) = client_with(b"+ Ready for literal data\r\na1 OK APPEND completed\r\n");
        let date = parse::parse_internal_date("17-Jul-1996 02:44:25 -0700").unwrap();
        client
            .append(
                "Archive",
                b"From: a@b\r\n\r\nhello",
                &[Flag::Seen, Flag::Recent],
                Some(date),
            )
            .unwrap();
        let sent = written_string(&written);
        assert!(
            sent.starts_with(
                "a1 APPEND \"Archive\" (\\Seen) \"17-Jul-1996 02:44:25 -0700\" {18}\r\n"
            ),
            "unexpected command: {}",
            sent
        );
        assert!(sent.ends_with("From: a@b\r\n\r\nhello\r\n"));
        assert!(!sent.contains("\\Recent"));
    }

    #[test]
    fn append_refusal_maps_to_error() {
        let (mut client, _) = client_with(b"a1 NO [OVERQUOTA] out of space\r\n");
        match client.append("INBOX", b"x", &[], None) {
            Err(Error::No(msg)) => assert!(msg.contains("OVERQUOTA")),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn store_and_copy_wire_forms() {
        let (mut client, written) = client_with(b"a1 OK done\r\na2 OK done\r\n");
        client
            .uid_store(&UidSet::Single(9), "FLAGS.SILENT (\\Seen)")
            .unwrap();
        client
            .uid_copy(&UidSet::Single(9), "[Gmail]/Trash")
            .unwrap();
        assert_eq!(
            written_string(&written),
            "a1 UID STORE 9 FLAGS.SILENT (\\Seen)\r\na2 UID COPY 9 \"[Gmail]/Trash\"\r\n"
        );
    }

    #[test]
    fn authenticate_plain_round_trip() {
        let (mut client, written) = client_with(b"+ \r\na1 OK authenticated\r\n");
        client
            .authenticate(AuthMechanism::Plain, "bob", "secret")
            .unwrap();
        let sent = written_string(&written);
        assert!(sent.starts_with("a1 AUTHENTICATE PLAIN\r\n"));
        assert!(sent.contains(&base64::encode("\0bob\0secret")));
    }

    #[test]
    fn authenticate_cram_md5_round_trip() {
        // RFC 2195's worked example.
        let challenge = base64::encode("<1896.697170952@postoffice.reston.mci.net>");
        let response = format!("+ {}\r\na1 OK authenticated\r\n", challenge);
        let (mut client, written) = client_with(response.as_bytes());
        client
            .authenticate(AuthMechanism::CramMd5, "tim", "tanstaaftanstaaf")
            .unwrap();
        let sent = written_string(&written);
        let expected = base64::encode("tim b913a602c7eda7a495b4e6e7334d3890");
        assert!(sent.contains(&expected), "missing digest in {}", sent);
    }

    #[test]
    fn id_command_forms() {
        let (mut client, written) = client_with(b"* ID NIL\r\na1 OK done\r\n");
        client.id(&[("guid", "1")]).unwrap();
        assert_eq!(written_string(&written), "a1 ID (\"guid\" \"1\")\r\n");
    }

    #[test]
    fn literal_announcements() {
        assert_eq!(literal_announcement(b"* 1 FETCH (BODY[] {42}\r\n"), Some(42));
        assert_eq!(literal_announcement(b"* 1 FETCH (BODY[] {0}\r\n"), Some(0));
        assert_eq!(literal_announcement(b"a1 OK done\r\n"), None);
        assert_eq!(literal_announcement(b"* weird {x}\r\n"), None);
    }

    #[test]
    fn read_error_becomes_io_error() {
        let mock = MockStream::new_err();
        let mut client = Client::new(Box::new(mock));
        assert!(matches!(client.noop(), Err(Error::Io(_))));
    }
}
