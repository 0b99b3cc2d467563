use crate::message::Message;
use std::collections::HashMap;

/// Rollup counters for all the messages attached to a chunk, session, or
/// source, grounded on `CodeStatus` in the original.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeStatus {
    pub prevent_caching: bool,
    pub prevent_exec: bool,
    pub error_count: u32,
    pub warning_count: u32,
    pub has_stderr: bool,
    pub has_non_stderr: bool,
}

impl CodeStatus {
    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn has_warnings(&self) -> bool {
        self.warning_count > 0
    }
}

/// Identifies the collection a reference-style message (`StderrRunErrorRef`,
/// `StderrRunWarningRef`) points back to. Replaces the original's pointer
/// identity on a shared Python list (`id(msg.message)`) with the value
/// equality the spec's design notes call for: a reference is "the same
/// thing" if it names the same owner and the same logical buffer, not if it
/// happens to be the same heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageOwner {
    Session,
    Chunk(usize),
}

/// `buffer_index` disambiguates multiple distinct stderr/compile buffers
/// belonging to the same owner (for example a session's `other_stderr_lines`
/// vs. `template_end_stderr_lines`); a chunk has only one stderr buffer, so
/// its messages always use `buffer_index = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub owner: MessageOwner,
    pub buffer_index: u32,
}

impl MessageRef {
    pub fn chunk(index: usize) -> Self {
        MessageRef {
            owner: MessageOwner::Chunk(index),
            buffer_index: 0,
        }
    }

    pub fn session_buffer(buffer_index: u32) -> Self {
        MessageRef {
            owner: MessageOwner::Session,
            buffer_index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Errors,
    Warnings,
}

/// A list of messages of one channel (errors xor warnings) belonging to a
/// single chunk, session, or source, with rollup bits maintained on every
/// push -- grounded on `MessageList`/`ErrorMessageList`/`WarningMessageList`.
#[derive(Debug, Clone, Default)]
pub struct MessageList {
    channel: Option<Channel>,
    messages: Vec<Message>,
    pub prevent_caching: bool,
    pub prevent_exec: bool,
    pub has_stderr: bool,
    pub has_non_stderr: bool,
    refs: HashMap<MessageRef, usize>,
}

impl MessageList {
    pub fn errors() -> Self {
        MessageList {
            channel: Some(Channel::Errors),
            ..Default::default()
        }
    }

    pub fn warnings() -> Self {
        MessageList {
            channel: Some(Channel::Warnings),
            ..Default::default()
        }
    }

    fn assert_channel(&self, msg: &Message) {
        let expected = if msg.kind.is_error() { Channel::Errors } else { Channel::Warnings };
        if let Some(channel) = self.channel {
            assert_eq!(channel, expected, "attempted to mix errors and warnings in one MessageList");
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.assert_channel(&msg);
        self.prevent_caching |= msg.prevent_caching();
        self.prevent_exec |= msg.prevent_exec();
        self.has_stderr |= msg.is_stderr();
        self.has_non_stderr |= !msg.is_stderr();
        self.messages.push(msg);
    }

    /// Push a message that stands for (part of) a shared buffer, recording
    /// `r` so later `has_ref`/`update_refed` calls can find it again.
    pub fn push_ref(&mut self, msg: Message, r: MessageRef) {
        self.refs.insert(r, self.messages.len());
        self.push(msg);
    }

    pub fn has_ref(&self, r: MessageRef) -> bool {
        self.refs.contains_key(&r)
    }

    pub fn update_refed(&mut self, r: MessageRef) {
        if let Some(&idx) = self.refs.get(&r) {
            if let Some(m) = self.messages.get_mut(idx) {
                m.is_refed = true;
            }
        }
    }

    pub fn register_status(&self, status: &mut CodeStatus) {
        for msg in &self.messages {
            if !msg.is_ref() {
                if msg.kind.is_error() {
                    status.error_count += 1;
                } else {
                    status.warning_count += 1;
                }
            }
        }
        status.prevent_caching |= self.prevent_caching;
        status.prevent_exec |= self.prevent_exec;
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn cacheable(&self) -> Vec<&Message> {
        self.messages.iter().filter(|m| m.is_cacheable()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::MessageKind;

    #[test]
    fn register_status_counts_non_ref_messages_only() {
        let mut errors = MessageList::errors();
        errors.push(Message::new(MessageKind::SourceError, "bad option"));
        errors.push_ref(
            Message::new(MessageKind::StderrRunErrorRef, "traceback"),
            MessageRef::session_buffer(0),
        );
        let mut status = CodeStatus::default();
        errors.register_status(&mut status);
        assert_eq!(status.error_count, 1);
        assert!(status.prevent_exec);
    }

    #[test]
    fn has_ref_and_update_refed_round_trip() {
        let mut errors = MessageList::errors();
        let r = MessageRef::chunk(3);
        errors.push_ref(Message::new(MessageKind::StderrRunError, "boom"), r);
        assert!(errors.has_ref(r));
        errors.update_refed(r);
        assert!(errors.iter().next().unwrap().is_refed);
    }

    #[test]
    #[should_panic(expected = "mix errors and warnings")]
    fn mixing_errors_and_warnings_panics() {
        let mut errors = MessageList::errors();
        errors.push(Message::new(MessageKind::RunWarning, "careful"));
    }
}
