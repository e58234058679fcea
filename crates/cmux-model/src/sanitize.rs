// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Message sanitization: strip `file` parts carrying an image `mediaType`
//! when the target model does not support image input.
//!
//! Call [`strip_images_if_unsupported`] before building a
//! [`crate::CompletionRequest`] so a vision-incapable model never receives a
//! part it cannot interpret.

use crate::{catalog::InputModality, message::Message, MessagePart};

const IMAGE_OMITTED: &str = "[image omitted: model does not support image input]";

/// Replace every `file` part whose `media_type` starts with `image/` with a
/// text placeholder, unless `modalities` includes [`InputModality::Image`].
pub fn strip_images_if_unsupported(messages: Vec<Message>, modalities: &[InputModality]) -> Vec<Message> {
    if modalities.contains(&InputModality::Image) {
        return messages;
    }
    messages.into_iter().map(strip_message).collect()
}

fn strip_message(mut m: Message) -> Message {
    m.parts = m.parts.into_iter().map(strip_part).collect();
    m
}

fn strip_part(part: MessagePart) -> MessagePart {
    match part {
        MessagePart::File { media_type, .. } if media_type.starts_with("image/") => {
            MessagePart::text(IMAGE_OMITTED)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_only() -> Vec<InputModality> {
        vec![InputModality::Text]
    }

    fn vision() -> Vec<InputModality> {
        vec![InputModality::Text, InputModality::Image]
    }

    fn image_message() -> Message {
        let mut m = Message::user("m1", 1, "describe this");
        m.parts.push(MessagePart::File { url: "data:image/png;base64,ABC".into(), media_type: "image/png".into() });
        m
    }

    #[test]
    fn no_op_when_images_supported() {
        let result = strip_images_if_unsupported(vec![image_message()], &vision());
        assert!(result[0].parts.iter().any(|p| matches!(p, MessagePart::File { .. })));
    }

    #[test]
    fn strips_image_file_part_when_unsupported() {
        let result = strip_images_if_unsupported(vec![image_message()], &text_only());
        assert!(!result[0].parts.iter().any(|p| matches!(p, MessagePart::File { .. })));
        assert!(result[0].as_text().unwrap().contains("image omitted"));
    }

    #[test]
    fn non_image_file_parts_pass_through() {
        let mut m = Message::assistant("m2", 2);
        m.parts.push(MessagePart::File { url: "file:///tmp/a.txt".into(), media_type: "text/plain".into() });
        let result = strip_images_if_unsupported(vec![m], &text_only());
        assert!(result[0].parts.iter().any(|p| matches!(p, MessagePart::File { .. })));
    }

    #[test]
    fn text_only_messages_are_unchanged() {
        let m = Message::user("m3", 3, "hello");
        let result = strip_images_if_unsupported(vec![m], &text_only());
        assert_eq!(result[0].as_text(), Some("hello".to_string()));
    }
}
