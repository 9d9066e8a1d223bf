//! Transcript aggregation.
//!
//! Folds the channel's partial-text events into an ordered list of discrete
//! messages: consecutive non-final fragments from the same speaker grow one
//! open message until a finality boundary closes it.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Who produced a transcript fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Agent,
}

/// One partial-text event as delivered by the channel.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEvent {
    pub speaker: Speaker,
    pub text: String,
    pub is_final: bool,
}

/// One aggregated utterance.
///
/// Mutable while open (non-final); immutable once an event marks it final.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: u64,
    pub speaker: Speaker,
    pub text: String,
    pub created_at: SystemTime,
    pub is_final: bool,
}

/// Folds transcript events into messages. Pure bookkeeping, no failure
/// modes: malformed events are rejected upstream before reaching here.
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    messages: Vec<Message>,
    next_id: u64,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the message list.
    ///
    /// Extends the most recent message when it is open and from the same
    /// speaker; otherwise opens a new message. Events are never dropped and
    /// message order follows append order.
    pub fn append(&mut self, event: TranscriptEvent) {
        if let Some(last) = self.messages.last_mut()
            && !last.is_final
            && last.speaker == event.speaker
        {
            last.text.push_str(&event.text);
            last.is_final = event.is_final;
            return;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.messages.push(Message {
            id,
            speaker: event.speaker,
            text: event.text,
            created_at: SystemTime::now(),
            is_final: event.is_final,
        });
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Hand the finished transcript to the persistence collaborator,
    /// leaving the aggregator empty.
    pub fn take_messages(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.messages)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(speaker: Speaker, text: &str, is_final: bool) -> TranscriptEvent {
        TranscriptEvent {
            speaker,
            text: text.to_string(),
            is_final,
        }
    }

    #[test]
    fn test_fragments_merge_until_finality() {
        let mut aggregator = TranscriptAggregator::new();
        aggregator.append(event(Speaker::User, "Hel", false));
        aggregator.append(event(Speaker::User, "lo", true));
        aggregator.append(event(Speaker::Agent, "Hi", true));

        let messages = aggregator.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].speaker, Speaker::User);
        assert_eq!(messages[0].text, "Hello");
        assert!(messages[0].is_final);
        assert_eq!(messages[1].speaker, Speaker::Agent);
        assert_eq!(messages[1].text, "Hi");
        assert!(messages[1].is_final);
    }

    #[test]
    fn test_final_message_is_never_reopened() {
        let mut aggregator = TranscriptAggregator::new();
        aggregator.append(event(Speaker::User, "Hello", true));
        aggregator.append(event(Speaker::User, "again", false));

        let messages = aggregator.messages();
        assert_eq!(messages.len(), 2, "post-final event opens a new message");
        assert_eq!(messages[0].text, "Hello");
        assert_eq!(messages[1].text, "again");
        assert!(!messages[1].is_final);
    }

    #[test]
    fn test_speaker_change_opens_new_message() {
        let mut aggregator = TranscriptAggregator::new();
        aggregator.append(event(Speaker::User, "How do I", false));
        aggregator.append(event(Speaker::Agent, "You can", false));
        aggregator.append(event(Speaker::User, " say this?", false));

        let messages = aggregator.messages();
        assert_eq!(messages.len(), 3, "interleaved speakers never merge");
        assert_eq!(messages[0].text, "How do I");
        assert_eq!(messages[1].text, "You can");
        assert_eq!(messages[2].text, " say this?");
    }

    #[test]
    fn test_order_follows_delivery_not_speaker() {
        let mut aggregator = TranscriptAggregator::new();
        aggregator.append(event(Speaker::Agent, "Hola", true));
        aggregator.append(event(Speaker::User, "Hola", true));
        aggregator.append(event(Speaker::Agent, "¿Qué tal?", true));

        let speakers: Vec<Speaker> = aggregator.messages().iter().map(|m| m.speaker).collect();
        assert_eq!(speakers, [Speaker::Agent, Speaker::User, Speaker::Agent]);
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let mut aggregator = TranscriptAggregator::new();
        for i in 0..5 {
            aggregator.append(event(Speaker::User, &format!("msg {}", i), true));
        }
        let ids: Vec<u64> = aggregator.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, [0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_take_messages_empties_aggregator() {
        let mut aggregator = TranscriptAggregator::new();
        aggregator.append(event(Speaker::User, "Hello", true));

        let taken = aggregator.take_messages();
        assert_eq!(taken.len(), 1);
        assert!(aggregator.is_empty());

        // A fresh turn after the handoff starts a new message
        aggregator.append(event(Speaker::User, "More", false));
        assert_eq!(aggregator.messages().len(), 1);
    }

    #[test]
    fn test_empty_fragments_still_fold() {
        let mut aggregator = TranscriptAggregator::new();
        aggregator.append(event(Speaker::Agent, "", false));
        aggregator.append(event(Speaker::Agent, "Bonjour", true));

        assert_eq!(aggregator.messages().len(), 1);
        assert_eq!(aggregator.messages()[0].text, "Bonjour");
    }

    #[test]
    fn test_speaker_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&Speaker::User).expect("serialize"),
            "\"user\""
        );
        let agent: Speaker = serde_json::from_str("\"agent\"").expect("deserialize");
        assert_eq!(agent, Speaker::Agent);
    }
}
