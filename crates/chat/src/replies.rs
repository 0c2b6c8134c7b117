//! Canned assistant replies.
//!
//! There is no inference here: the reply is a deterministic function of the
//! user's text. Rules are evaluated top to bottom with case-insensitive
//! substring matching and the first hit wins.

use chatdeck_config::ChatConfig;

pub const WELCOME_MESSAGE: &str = "👋 Welcome to your workspace! I'm here to help you build amazing apps.\n\n\
I can help you:\n\
• Create beautiful UI components\n\
• Set up database structures\n\
• Add authentication features\n\
• Make your app responsive\n\
• Deploy to production\n\n\
What would you like to build today?";

pub const FALLBACK_REPLY: &str = "I understand your request. Let me work on that for you...";

const BUILTIN_RULES: &[(&[&str], &str)] = &[
    (
        &["color", "theme"],
        "I'll help you update the color scheme! Let me modify the theme colors to make it more visually appealing.",
    ),
    (
        &["component", "ui"],
        "Great! I'll create that UI component for you. Let me build it with modern design patterns and smooth animations.",
    ),
    (
        &["database", "data"],
        "I'll set up the database structure for you. Creating the necessary tables and relationships...",
    ),
    (
        &["auth", "login"],
        "I'll enhance the authentication system with better user experience and security features.",
    ),
    (
        &["responsive", "mobile"],
        "I'll make sure the design is fully responsive and works beautifully on all devices!",
    ),
    (
        &["deploy", "publish"],
        "I'll prepare your app for deployment with optimized builds and proper configuration.",
    ),
    (
        &["animation", "transition"],
        "I'll add smooth animations and transitions to make the user experience more delightful!",
    ),
    (
        &["help", "how"],
        "I'm here to help! I can build components, modify designs, set up databases, add features, and deploy your app. What would you like to create?",
    ),
];

/// One row of the reply table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRule {
    /// Lowercased; a rule matches if any keyword occurs in the text
    pub keywords: Vec<String>,
    pub response: String,
}

impl ReplyRule {
    pub fn new<K: AsRef<str>>(keywords: &[K], response: impl Into<String>) -> Self {
        Self {
            keywords: keywords
                .iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            response: response.into(),
        }
    }

    fn matches(&self, lowered: &str) -> bool {
        self.keywords.iter().any(|k| lowered.contains(k.as_str()))
    }
}

/// Ordered `(keywords, response)` rules plus a fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTable {
    rules: Vec<ReplyRule>,
    fallback: String,
}

impl ReplyTable {
    pub fn new(rules: Vec<ReplyRule>, fallback: impl Into<String>) -> Self {
        Self {
            rules,
            fallback: fallback.into(),
        }
    }

    pub fn builtin() -> Self {
        let rules = BUILTIN_RULES
            .iter()
            .map(|(keywords, response)| ReplyRule::new(keywords, *response))
            .collect();
        Self::new(rules, FALLBACK_REPLY)
    }

    /// Configured rules replace the built-in ones; an empty list keeps them.
    pub fn from_config(config: &ChatConfig) -> Self {
        let mut table = if config.replies.is_empty() {
            Self::builtin()
        } else {
            let rules = config
                .replies
                .iter()
                .map(|r| ReplyRule::new(&r.keywords, r.response.clone()))
                .collect();
            Self::new(rules, FALLBACK_REPLY)
        };
        if let Some(fallback) = &config.fallback_reply {
            table.fallback = fallback.clone();
        }
        table
    }

    /// The reply for a user's text.
    pub fn reply_for(&self, text: &str) -> &str {
        let lowered = text.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map(|rule| rule.response.as_str())
            .unwrap_or(&self.fallback)
    }

    pub fn rules(&self) -> &[ReplyRule] {
        &self.rules
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }
}

impl Default for ReplyTable {
    fn default() -> Self {
        Self::builtin()
    }
}
