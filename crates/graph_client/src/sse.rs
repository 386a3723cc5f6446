//! Incremental Server-Sent-Events framing.
//!
//! Bytes are buffered until a full line is available, so chunk boundaries may
//! fall anywhere, including inside a multi-byte character.

use std::time::Duration;

/// One assembled event block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field, if the block had one.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`. Empty for a type-only block.
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct EventParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: String,
    has_data: bool,
    id: Option<String>,
    retry: Option<Duration>,
    seen_first_line: bool,
}

impl EventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk; `on_frame` runs once per completed event.
    pub fn feed<F>(&mut self, chunk: &[u8], mut on_frame: F)
    where
        F: FnMut(SseFrame),
    {
        self.buffer.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let mut line = &self.buffer[start..end];
            if let Some((&b'\r', rest)) = line.split_last() {
                line = rest;
            }
            let line = String::from_utf8_lossy(line).into_owned();
            start = end + 1;

            if let Some(frame) = self.process_line(&line) {
                on_frame(frame);
            }
        }
        self.buffer.drain(..start);
    }

    /// Whether an incomplete event is buffered.
    pub fn pending(&self) -> bool {
        !self.buffer.is_empty() || self.has_data || self.event.is_some()
    }

    /// Drop any buffered partial event.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        let line = if self.seen_first_line {
            line
        } else {
            self.seen_first_line = true;
            line.strip_prefix('\u{feff}').unwrap_or(line)
        };

        if line.is_empty() {
            return self.take_frame();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(idx) => {
                let value = &line[idx + 1..];
                (&line[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "event" => {
                self.event = (!value.is_empty()).then(|| value.to_string());
            }
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "id" => {
                if !value.contains('\0') {
                    self.id = Some(value.to_string());
                }
            }
            "retry" => {
                if let Ok(millis) = value.parse::<u64>() {
                    self.retry = Some(Duration::from_millis(millis));
                }
            }
            _ => {}
        }
        None
    }

    fn take_frame(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data);
        let id = self.id.take();
        let retry = self.retry.take();
        self.has_data = false;

        // heartbeat
        if data.is_empty() && event.is_none() {
            return None;
        }

        Some(SseFrame {
            event,
            data,
            id,
            retry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(chunks: &[&[u8]]) -> Vec<SseFrame> {
        let mut parser = EventParser::new();
        let mut frames = Vec::new();
        for chunk in chunks {
            parser.feed(chunk, |frame| frames.push(frame));
        }
        frames
    }

    fn parse_one(input: &[u8]) -> Vec<SseFrame> {
        parse_all(&[input])
    }

    fn frame(event: Option<&str>, data: &str) -> SseFrame {
        SseFrame {
            event: event.map(str::to_string),
            data: data.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_typed_and_untyped_events() {
        let frames = parse_one(b"event: values\ndata: {\"a\":1}\n\ndata: plain\n\n");
        assert_eq!(
            frames,
            vec![frame(Some("values"), "{\"a\":1}"), frame(None, "plain")]
        );
    }

    #[test]
    fn test_multiline_data_is_joined() {
        let frames = parse_one(b"data: first\ndata: second\ndata:third\n\n");
        assert_eq!(frames, vec![frame(None, "first\nsecond\nthird")]);
    }

    #[test]
    fn test_comments_and_heartbeats_are_dropped() {
        let frames = parse_one(b": ping\n\n\n\ndata:\n\n: keep-alive\nevent: error\ndata: {}\n\n");
        assert_eq!(frames, vec![frame(Some("error"), "{}")]);
    }

    #[test]
    fn test_type_only_block_is_emitted() {
        let frames = parse_one(b"event: values\n\ndata: {}\n\n");
        assert_eq!(frames, vec![frame(Some("values"), ""), frame(None, "{}")]);
    }

    #[test]
    fn test_crlf_and_bom() {
        let frames = parse_one(b"\xEF\xBB\xBFevent: updates\r\ndata: x\r\n\r\n");
        assert_eq!(frames, vec![frame(Some("updates"), "x")]);
    }

    #[test]
    fn test_id_and_retry_fields() {
        let frames = parse_one(b"id: 42\nretry: 1500\ndata: x\n\n");
        assert_eq!(frames[0].id.as_deref(), Some("42"));
        assert_eq!(frames[0].retry, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_truncated_event_is_never_emitted() {
        let mut parser = EventParser::new();
        let mut frames = Vec::new();
        parser.feed(b"event: values\ndata: {\"messages\":", |f| frames.push(f));

        assert!(frames.is_empty());
        assert!(parser.pending());
        parser.reset();
        assert!(!parser.pending());
    }

    #[test]
    fn test_every_split_offset_yields_same_frames() {
        let stream = "event: values\ndata: {\"messages\":[{\"content\":\"héllo ✓\"}]}\n\n: c\n\nevent: updates\r\ndata: a\r\ndata: b\r\n\r\n".as_bytes();
        let expected = parse_all(&[stream]);
        assert_eq!(expected.len(), 2);

        for split in 0..=stream.len() {
            let (head, tail) = stream.split_at(split);
            assert_eq!(parse_all(&[head, tail]), expected, "split at {split}");
        }

        let single_bytes: Vec<&[u8]> = stream.chunks(1).collect();
        assert_eq!(parse_all(&single_bytes), expected);
    }
}
