//! Topic names used on the bus.
//!
//! | Direction | Topic |
//! |---|---|
//! | subscribe | `<prefix>/set/#` |
//! | publish, per attribute | `<prefix>/state/<attribute>` |
//! | publish, single topic | `<prefix>/state/<single-topic-name>` |

use altherma_types::Attribute;

/// The prefix and publish mode shared by the command channel and the state
/// reporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    prefix: String,
    single_topic: Option<String>,
}

impl TopicScheme {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            single_topic: None,
        }
    }

    /// Publish every cycle as one JSON object under `<prefix>/state/<name>`.
    pub fn with_single_topic(mut self, name: impl Into<String>) -> Self {
        self.single_topic = Some(name.into());
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Subscription filter covering the whole command namespace.
    pub fn command_filter(&self) -> String {
        format!("{}/set/#", self.prefix)
    }

    /// The command name carried by `topic`, if it lies in the command
    /// namespace.
    pub fn command_name<'a>(&self, topic: &'a str) -> Option<&'a str> {
        topic
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix("/set/")
            .filter(|name| !name.is_empty())
    }

    pub fn state_topic(&self, attribute: Attribute) -> String {
        format!("{}/state/{}", self.prefix, attribute.suffix())
    }

    /// `Some` in single-topic mode.
    pub fn single_topic(&self) -> Option<String> {
        self.single_topic
            .as_ref()
            .map(|name| format!("{}/state/{name}", self.prefix))
    }
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new("altherma")
    }
}
