use chrono::{DateTime, FixedOffset};

use super::{Flag, Uid};

/// One message's worth of `FETCH` response data, owned.
///
/// Only the attributes the synchronizer asks for are captured; requests use
/// `BODY.PEEK[...]` and the server answers under `BODY[...]`, so the peek
/// marker never appears here.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FetchRecord {
    /// Message sequence number the response was keyed by.
    pub seq: u32,

    /// The message UID, present whenever `UID` was among the requested
    /// items (it always is for `UID FETCH`).
    pub uid: Option<Uid>,

    /// Current flag set.
    pub flags: Vec<Flag<'static>>,

    /// `RFC822.SIZE` in octets.
    pub size: Option<u32>,

    /// `INTERNALDATE` as the server reported it.
    pub internal_date: Option<DateTime<FixedOffset>>,

    /// The `BODY[HEADER...]` blob, when headers were requested.
    pub header: Option<Vec<u8>>,

    /// The full `BODY[]` blob, when the whole message was requested.
    pub body: Option<Vec<u8>>,

    /// `Message-ID` from the `ENVELOPE`, when the envelope was requested.
    pub envelope_message_id: Option<String>,
}

impl FetchRecord {
    /// INTERNALDATE as Unix seconds, when present.
    pub fn internal_date_unix(&self) -> Option<i64> {
        self.internal_date.map(|d| d.timestamp())
    }
}
