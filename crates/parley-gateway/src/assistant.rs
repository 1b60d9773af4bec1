//! Deterministic rule-based replies for `ai` rooms.
//!
//! Rules are tried in order and the first match wins. Anything unmatched gets
//! one of a fixed set of generic replies, picked from a hash of the input so
//! the same text always gets the same answer.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

const GENERIC_REPLIES: [&str; 6] = [
    "That's interesting! Can you tell me more about that?",
    "I understand. How can I help you with that?",
    "I see what you mean. What else would you like to know?",
    "Thanks for sharing! What else is on your mind?",
    "I appreciate you telling me that. Is there something specific I can help with?",
    "That's a great point! What would you like to discuss further?",
];

pub fn reply(text: &str, now: DateTime<Utc>) -> String {
    let text = text.trim().to_lowercase();
    let words: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .collect();
    let has = |word: &str| words.contains(&word);
    let asks_what = has("what") || has("what's");

    if has("hello") || has("hi") || has("hey") {
        return "Hello! How can I assist you today?".into();
    }

    if text.contains("how are you") || text.contains("how r u") {
        return "I'm doing great, thank you for asking! How can I help you?".into();
    }

    if asks_what && (has("date") || has("today")) {
        return format!("Today is {}.", now.format("%A, %B %-d, %Y"));
    }

    if asks_what && has("time") {
        return format!("The current time is {}.", now.format("%I:%M:%S %p"));
    }

    if asks_what && has("day") {
        return format!("Today is {}.", now.format("%A"));
    }

    if asks_what && has("year") {
        return format!("The current year is {}.", now.format("%Y"));
    }

    if asks_what && has("month") {
        return format!("The current month is {}.", now.format("%B"));
    }

    if has("help") || has("assist") {
        return "I'm here to help! I can tell you the current date, time, day, and answer \
                simple questions. What would you like to know?"
            .into();
    }

    if words.iter().any(|w| w.starts_with("thank")) {
        return "You're welcome! Is there anything else I can help with?".into();
    }

    if has("bye") || has("goodbye") || text.contains("see you") {
        return "Goodbye! Feel free to reach out anytime!".into();
    }

    if has("sleep") || has("tired") || has("rest") {
        return "It sounds like you need some rest. Have a good sleep! Feel free to come back \
                anytime."
            .into();
    }

    if text.contains("who are you") || text.contains("what are you") {
        return "I'm an AI assistant built into this chat application. I can help answer basic \
                questions and have conversations with you!"
            .into();
    }

    if text.contains("your name") {
        return "I'm your AI Assistant! You can ask me questions about dates, time, or just chat \
                with me."
            .into();
    }

    if matches!(
        words.first().copied(),
        Some("ok" | "okay" | "cool" | "nice" | "great" | "good")
    ) {
        return "Is there anything else I can help you with?".into();
    }

    let digest = Sha256::digest(text.as_bytes());
    GENERIC_REPLIES[digest[0] as usize % GENERIC_REPLIES.len()].into()
}
