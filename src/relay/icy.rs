//! ICY (shoutcast) response handling: status-line translation and removal of
//! in-band metadata blocks.

use crate::error::RelayError;

/// Largest response/request head accepted before giving up
pub const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Byte offset just past the blank line ending an HTTP/ICY head
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4);
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| i + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Parsed upstream response head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status_line: String,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn parse(head: &[u8]) -> Result<Self, RelayError> {
        let text = String::from_utf8_lossy(head);
        let mut lines = text.lines().map(|l| l.trim_end_matches('\r'));

        let status_line = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| RelayError::InvalidRequest("empty upstream response".to_string()))?
            .to_string();

        let headers = lines
            .filter(|l| !l.is_empty())
            .filter_map(|l| l.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();

        Ok(Self {
            status_line,
            headers,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Interval between metadata blocks, when the server inserts them
    pub fn metaint(&self) -> Option<usize> {
        self.header("icy-metaint")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
    }

    pub fn is_icy(&self) -> bool {
        self.status_line.starts_with("ICY")
    }

    /// Head as forwarded to the decoder: plain HTTP status, no metadata interval
    pub fn translated(&self) -> String {
        let status = match self.status_line.strip_prefix("ICY") {
            Some(rest) => format!("HTTP/1.0{}", rest),
            None => self.status_line.clone(),
        };

        let mut out = status;
        out.push_str("\r\n");
        for (k, v) in &self.headers {
            if k.eq_ignore_ascii_case("icy-metaint") {
                continue;
            }
            out.push_str(k);
            out.push_str(": ");
            out.push_str(v);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out
    }
}

enum StripState {
    Audio { remaining: usize },
    Length,
    Metadata { remaining: usize },
}

/// Removes metadata blocks inserted every `metaint` audio bytes
pub struct IcyMetadataStripper {
    metaint: usize,
    state: StripState,
    metadata: Vec<u8>,
    stream_title: Option<String>,
    title_changed: bool,
}

impl IcyMetadataStripper {
    pub fn new(metaint: usize) -> Self {
        Self {
            metaint,
            state: StripState::Audio { remaining: metaint },
            metadata: Vec::new(),
            stream_title: None,
            title_changed: false,
        }
    }

    /// Append the audio part of `input` to `out`
    pub fn feed(&mut self, mut input: &[u8], out: &mut Vec<u8>) {
        while !input.is_empty() {
            match self.state {
                StripState::Audio { remaining } => {
                    let n = remaining.min(input.len());
                    out.extend_from_slice(&input[..n]);
                    input = &input[n..];
                    self.state = if remaining == n {
                        StripState::Length
                    } else {
                        StripState::Audio {
                            remaining: remaining - n,
                        }
                    };
                }
                StripState::Length => {
                    let len = input[0] as usize * 16;
                    input = &input[1..];
                    self.metadata.clear();
                    self.state = if len == 0 {
                        StripState::Audio {
                            remaining: self.metaint,
                        }
                    } else {
                        StripState::Metadata { remaining: len }
                    };
                }
                StripState::Metadata { remaining } => {
                    let n = remaining.min(input.len());
                    self.metadata.extend_from_slice(&input[..n]);
                    input = &input[n..];
                    if remaining == n {
                        self.finish_metadata();
                        self.state = StripState::Audio {
                            remaining: self.metaint,
                        };
                    } else {
                        self.state = StripState::Metadata {
                            remaining: remaining - n,
                        };
                    }
                }
            }
        }
    }

    fn finish_metadata(&mut self) {
        let text = String::from_utf8_lossy(&self.metadata);
        if let Some(title) = parse_stream_title(&text) {
            if self.stream_title.as_deref() != Some(title.as_str()) {
                self.stream_title = Some(title);
                self.title_changed = true;
            }
        }
        self.metadata.clear();
    }

    pub fn stream_title(&self) -> Option<&str> {
        self.stream_title.as_deref()
    }

    /// Title seen since the last call, if it changed
    pub fn take_title_change(&mut self) -> Option<String> {
        if std::mem::take(&mut self.title_changed) {
            self.stream_title.clone()
        } else {
            None
        }
    }
}

/// Extract `StreamTitle='...';` from a metadata block
pub fn parse_stream_title(metadata: &str) -> Option<String> {
    let start = metadata.find("StreamTitle='")? + "StreamTitle='".len();
    let rest = &metadata[start..];
    let end = rest.find("';").or_else(|| rest.rfind('\''))?;
    let title = rest[..end].trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}
