//! Conversation types
//!
//! A turn is one user line paired with the bot's reply; the transcript is the
//! ordered list of turns kept for the lifetime of a session.

/// One exchange between the user and the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    /// What the user typed
    pub user: String,
    /// What the model answered
    pub bot: String,
}

impl Turn {
    pub fn new(user: impl Into<String>, bot: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            bot: bot.into(),
        }
    }
}

/// In-memory conversation history
///
/// Only ever grows. Nothing is truncated or summarized, so prompts built from
/// it grow with every turn.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Render past turns followed by an open tag for the model's answer
    pub fn prompt_for(&self, user_input: &str) -> String {
        let mut prompt = String::new();
        for turn in &self.turns {
            prompt.push_str("User: ");
            prompt.push_str(&turn.user);
            prompt.push_str("\nBot: ");
            prompt.push_str(&turn.bot);
            prompt.push('\n');
        }
        prompt.push_str("User: ");
        prompt.push_str(user_input);
        prompt.push_str("\nBot: ");
        prompt
    }
}
