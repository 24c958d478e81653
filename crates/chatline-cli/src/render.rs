use chatline_protocol::{MessageId, SessionSnapshot};

/// Turns successive snapshots into the text that has not been printed yet.
#[derive(Debug, Default)]
pub struct Renderer {
    message: Option<MessageId>,
    text: usize,
    reasoning: usize,
}

impl Renderer {
    /// Output for everything new in `snapshot` since the last call.
    ///
    /// Reasoning is printed in brackets ahead of the reply text.
    pub fn render(&mut self, snapshot: &SessionSnapshot) -> String {
        let Some(reply) = snapshot.assistant() else {
            return String::new();
        };
        if self.message.as_ref() != Some(&reply.id) {
            self.message = Some(reply.id.clone());
            self.text = 0;
            self.reasoning = 0;
        }

        let mut out = String::new();
        let reasoning = reply.reasoning();
        if reasoning.len() > self.reasoning {
            out.push_str(&format!("[{}]", &reasoning[self.reasoning..]));
            self.reasoning = reasoning.len();
        }
        if reply.content.len() > self.text {
            if self.text == 0 && self.reasoning > 0 {
                out.push('\n');
            }
            out.push_str(&reply.content[self.text..]);
            self.text = reply.content.len();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use chatline_protocol::{IdSource, StreamDecoder, StreamSession};

    use super::*;

    #[test]
    fn prints_only_new_text() {
        let mut decoder =
            StreamDecoder::with_session(StreamSession::with_ids(IdSource::sequential("m")));
        let mut renderer = Renderer::default();
        let mut printed = Vec::new();
        for chunk in ["g:\"plan\"\n", "0:\"Hel\"\n", "0:\"lo\"\n", "d:{\"finishReason\":\"stop\"}\n"] {
            decoder.push_chunk_with(chunk.as_bytes(), |_, session| {
                printed.push(renderer.render(&session.snapshot()));
            });
        }
        assert_eq!(printed, vec!["[plan]", "\nHel", "lo", ""]);
    }
}
