use serde::Serialize;
use serde_json::json;

use crate::domain::UserId;

/// One piece of a rich group message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Segment {
    Text(String),
    Mention(UserId),
    Image(String),
}

/// An ordered list of segments sent as one chat message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupMessage {
    segments: Vec<Segment>,
}

impl GroupMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        if text.is_empty() {
            return self;
        }
        // Adjacent text merges into one segment.
        if let Some(Segment::Text(last)) = self.segments.last_mut() {
            last.push_str(&text);
        } else {
            self.segments.push(Segment::Text(text));
        }
        self
    }

    pub fn mention(mut self, user: UserId) -> Self {
        self.segments.push(Segment::Mention(user));
        self
    }

    pub fn image(mut self, url: impl Into<String>) -> Self {
        self.segments.push(Segment::Image(url.into()));
        self
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Human-readable rendering for logs and tests.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(t) => out.push_str(t),
                Segment::Mention(user) => out.push_str(&format!("@{user} ")),
                Segment::Image(url) => out.push_str(&format!("[image:{url}]")),
            }
        }
        out
    }

    /// OneBot v11 message-array encoding.
    pub fn to_onebot(&self) -> serde_json::Value {
        let segments: Vec<_> = self
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Text(t) => json!({"type": "text", "data": {"text": t}}),
                Segment::Mention(user) => json!({"type": "at", "data": {"qq": user.to_string()}}),
                Segment::Image(url) => json!({"type": "image", "data": {"file": url}}),
            })
            .collect();
        serde_json::Value::Array(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_merges_text() {
        let msg = GroupMessage::new()
            .mention(1)
            .text("a")
            .text("")
            .text("b")
            .image("http://x/y.png");
        assert_eq!(
            msg.segments(),
            &[
                Segment::Mention(1),
                Segment::Text("ab".into()),
                Segment::Image("http://x/y.png".into())
            ]
        );
        assert_eq!(msg.plain_text(), "@1 ab[image:http://x/y.png]");
    }

    #[test]
    fn test_onebot_encoding() {
        let msg = GroupMessage::new().mention(42).text("hi");
        assert_eq!(
            msg.to_onebot(),
            json!([
                {"type": "at", "data": {"qq": "42"}},
                {"type": "text", "data": {"text": "hi"}}
            ])
        );
    }
}
